//! Shared rate-limit gate derived from server-supplied wait hints
//!
//! A single [`RateLimiter`] is shared by every fetch issued through one
//! orchestrator instance: when any request is told to back off (HTTP 429),
//! the recorded cool-down throttles all sibling and future fetches, not just
//! the one that triggered it. The stored deadline expires lazily on read.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Injected time source, so tests can advance time without real sleeps
pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Shared gate that blocks new network attempts until a cool-down elapses
pub struct RateLimiter {
    resume_after: Mutex<Option<Instant>>,
    clock: Clock,
}

impl RateLimiter {
    /// Create a limiter backed by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Instant::now))
    }

    /// Create a limiter with an injected clock
    pub fn with_clock(clock: Clock) -> Self {
        RateLimiter {
            resume_after: Mutex::new(None),
            clock,
        }
    }

    /// Record a server-supplied cool-down starting now.
    pub fn set_reset_interval(&self, wait: Duration) {
        let deadline = (self.clock)() + wait;
        let mut slot = self
            .resume_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(deadline);
        tracing::debug!(wait_secs = wait.as_secs(), "rate limit cool-down recorded");
    }

    /// Remaining cool-down, if one is still in effect.
    ///
    /// An elapsed deadline is cleared on read (lazy expiry), so a `None`
    /// return also means the stored state is gone.
    pub fn reset_interval(&self) -> Option<Duration> {
        let mut slot = self
            .resume_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *slot {
            Some(deadline) => {
                let now = (self.clock)();
                if deadline > now {
                    Some(deadline - now)
                } else {
                    *slot = None;
                    None
                }
            }
            None => None,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self
            .resume_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("RateLimiter")
            .field("resume_after", &*slot)
            .finish()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    /// Manually-advanced clock shared between the test and the limiter.
    fn manual_clock() -> (Arc<Mutex<Instant>>, Clock) {
        let now = Arc::new(Mutex::new(Instant::now()));
        let clock = {
            let now = now.clone();
            Arc::new(move || *now.lock().unwrap()) as Clock
        };
        (now, clock)
    }

    fn advance(now: &Arc<Mutex<Instant>>, by: Duration) {
        let mut guard = now.lock().unwrap();
        *guard += by;
    }

    #[test]
    fn fresh_limiter_is_open() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.reset_interval(), None);
    }

    #[test]
    fn gate_reports_remaining_wait_within_the_window() {
        let (now, clock) = manual_clock();
        let limiter = RateLimiter::with_clock(clock);

        limiter.set_reset_interval(Duration::from_secs(2));
        advance(&now, Duration::from_millis(500));

        let remaining = limiter.reset_interval().expect("gate should be closed");
        assert_eq!(remaining, Duration::from_millis(1500));
    }

    #[test]
    fn gate_clears_lazily_once_the_window_elapses() {
        let (now, clock) = manual_clock();
        let limiter = RateLimiter::with_clock(clock);

        limiter.set_reset_interval(Duration::from_secs(2));
        advance(&now, Duration::from_secs(2));

        assert_eq!(limiter.reset_interval(), None);
        // The stored deadline is gone: rolling time backwards must not
        // resurrect it.
        assert_eq!(limiter.reset_interval(), None);
    }

    #[test]
    fn later_hint_replaces_the_stored_deadline() {
        let (now, clock) = manual_clock();
        let limiter = RateLimiter::with_clock(clock);

        limiter.set_reset_interval(Duration::from_secs(10));
        limiter.set_reset_interval(Duration::from_secs(1));
        advance(&now, Duration::from_secs(2));

        assert_eq!(limiter.reset_interval(), None, "shorter hint must win");
    }
}
