//! Retry classification and backoff delays
//!
//! Whether a failed fetch attempt is retried is fully determined by the
//! classified error kind, never by inspecting error messages. Server errors
//! retry after a "full jitter" exponential backoff: the delay is drawn
//! uniformly from `[0, min(max_delay, base * 2^attempt)]`, which spreads
//! concurrent retries out and avoids synchronized retry storms.

use std::time::Duration;

use rand::Rng;

use crate::error::FetchError;

/// What the retry loop should do with a classified failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryAction {
    /// Wait a jittered exponential delay, then retry
    RetryAfterBackoff,
    /// Retry at once; transient connection glitches need no backoff
    RetryImmediately,
    /// Give up and surface this failure
    Terminate,
}

/// Trait mapping classified errors to retry behavior
///
/// Transient transport failures retry immediately, overloaded-server
/// responses retry with backoff, and everything else is permanent.
pub trait RetryClass {
    /// The action the retry loop should take for this failure
    fn retry_action(&self) -> RetryAction;
}

impl RetryClass for FetchError {
    fn retry_action(&self) -> RetryAction {
        match self {
            FetchError::TimedOut | FetchError::ConnectionLost => RetryAction::RetryImmediately,
            FetchError::ServerError(_) => RetryAction::RetryAfterBackoff,
            // 429 ends the attempt loop; the shared rate limiter owns the wait.
            FetchError::TooManyRequests(_) => RetryAction::Terminate,
            FetchError::Network(_)
            | FetchError::BadRequest
            | FetchError::Unauthorized
            | FetchError::Forbidden
            | FetchError::NotFound
            | FetchError::Http(_)
            | FetchError::InvalidResponse
            | FetchError::Decoding(_)
            | FetchError::Encoding(_) => RetryAction::Terminate,
        }
    }
}

/// Full-jitter exponential backoff delay.
///
/// Draws uniformly from `[0, min(max_delay, base * 2^attempt)]`. `attempt`
/// is zero-based: the first retry of a fetch samples from `[0, base]`.
/// The random source is a parameter so tests can use a seeded generator.
pub fn backoff_delay<R: Rng>(
    attempt: u32,
    base: Duration,
    max_delay: Duration,
    rng: &mut R,
) -> Duration {
    let uncapped = base.as_secs_f64() * 2f64.powi(attempt.min(63) as i32);
    let cap = uncapped.min(max_delay.as_secs_f64());
    if cap <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rng.gen_range(0.0..=cap))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn transient_transport_failures_retry_immediately() {
        assert_eq!(FetchError::TimedOut.retry_action(), RetryAction::RetryImmediately);
        assert_eq!(
            FetchError::ConnectionLost.retry_action(),
            RetryAction::RetryImmediately
        );
    }

    #[test]
    fn server_errors_retry_with_backoff() {
        assert_eq!(
            FetchError::ServerError(500).retry_action(),
            RetryAction::RetryAfterBackoff
        );
        assert_eq!(
            FetchError::ServerError(503).retry_action(),
            RetryAction::RetryAfterBackoff
        );
    }

    #[test]
    fn rate_limit_terminates_the_attempt_loop() {
        assert_eq!(
            FetchError::TooManyRequests(Duration::from_secs(5)).retry_action(),
            RetryAction::Terminate
        );
    }

    #[test]
    fn client_and_payload_errors_are_never_retried() {
        let permanent = [
            FetchError::Network("tls handshake failed".into()),
            FetchError::BadRequest,
            FetchError::Unauthorized,
            FetchError::Forbidden,
            FetchError::NotFound,
            FetchError::Http(418),
            FetchError::InvalidResponse,
            FetchError::Decoding("bad json".into()),
            FetchError::Encoding("bad body".into()),
        ];
        for error in permanent {
            assert_eq!(
                error.retry_action(),
                RetryAction::Terminate,
                "{error} must not be retried"
            );
        }
    }

    // -----------------------------------------------------------------------
    // backoff_delay bounds verification
    // -----------------------------------------------------------------------

    #[test]
    fn backoff_stays_within_the_attempt_cap() {
        let base = Duration::from_secs(1);
        let max_delay = Duration::from_secs(10);
        let mut rng = StdRng::seed_from_u64(42);

        for attempt in 0..6 {
            let cap = Duration::from_secs_f64(
                (base.as_secs_f64() * 2f64.powi(attempt as i32)).min(max_delay.as_secs_f64()),
            );
            // Run enough samples that a bounds violation would surface.
            for _ in 0..200 {
                let delay = backoff_delay(attempt, base, max_delay, &mut rng);
                assert!(
                    delay <= cap,
                    "attempt {attempt}: delay {delay:?} exceeds cap {cap:?}"
                );
            }
        }
    }

    #[test]
    fn backoff_cap_grows_exponentially_until_max_delay() {
        let base = Duration::from_secs(1);
        let max_delay = Duration::from_secs(10);
        let mut rng = StdRng::seed_from_u64(7);

        // With 200 samples per attempt, the maximum observed delay gets close
        // to the cap; successive caps are 1s, 2s, 4s, 8s, then pinned at 10s.
        let observed_max = |attempt: u32, rng: &mut StdRng| {
            (0..200)
                .map(|_| backoff_delay(attempt, base, max_delay, rng))
                .max()
                .unwrap()
        };

        let max0 = observed_max(0, &mut rng);
        let max2 = observed_max(2, &mut rng);
        let max5 = observed_max(5, &mut rng);

        assert!(max0 <= Duration::from_secs(1));
        assert!(max2 <= Duration::from_secs(4));
        assert!(max2 > Duration::from_secs(1), "attempt 2 should sample above 1s");
        assert!(max5 <= Duration::from_secs(10), "cap is pinned at max_delay");
        assert!(max5 > Duration::from_secs(8), "attempt 5 should sample above 8s");
    }

    #[test]
    fn zero_base_yields_zero_delay() {
        let mut rng = StdRng::seed_from_u64(0);
        let delay = backoff_delay(3, Duration::ZERO, Duration::from_secs(10), &mut rng);
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn huge_attempt_indices_saturate_at_max_delay() {
        let mut rng = StdRng::seed_from_u64(1);
        let delay = backoff_delay(
            u32::MAX,
            Duration::from_secs(1),
            Duration::from_secs(10),
            &mut rng,
        );
        assert!(delay <= Duration::from_secs(10));
    }
}
