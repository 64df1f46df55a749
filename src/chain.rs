//! Sequential task composition with lazy step production
//!
//! A [`Chain`] runs sub-tasks strictly one at a time, in append order. Each
//! step after the first is produced lazily from the previous step's output,
//! so no sub-task exists before the chain reaches it. The chain stops at the
//! first failure, and cancelling the chain cancels whichever sub-task is
//! currently active and halts production of further steps.
//!
//! Steps are homogeneous over the chain's output type; use [`Task::map`] for
//! typed one-step transformations.
//!
//! # Example
//!
//! ```no_run
//! use tasknet::chain::Chain;
//! use tasknet::task::Task;
//!
//! # fn fetch_number() -> Task<u32, String> { Task::new(|t| t.complete(Ok(1))) }
//! # fn fetch_double(n: u32) -> Task<u32, String> { Task::new(move |t| t.complete(Ok(n * 2))) }
//! let chain = Chain::starting_with(|| fetch_number())
//!     .then(|n| fetch_double(n))
//!     .into_task();
//! chain.run();
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;

use crate::task::{Outcome, Task, TaskState};

type FirstFn<T, E> = Box<dyn FnOnce() -> Task<T, E> + Send>;
type StepFn<T, E> = Box<dyn FnOnce(T) -> Task<T, E> + Send>;

struct ChainState<T, E> {
    started: bool,
    first: Option<FirstFn<T, E>>,
    producers: VecDeque<StepFn<T, E>>,
    active: Option<Task<T, E>>,
}

enum NextStep<T, E> {
    First(FirstFn<T, E>),
    Step(StepFn<T, E>),
    Done,
}

/// Sequential composition of tasks where each step depends on the previous
/// step's output
///
/// The chain is itself a [`Task`]: run it, cancel it, or register completion
/// handlers like any other task. It completes successfully with the last
/// sub-task's output, or with the first sub-task failure encountered.
pub struct Chain<T, E> {
    task: Task<T, E>,
    state: Arc<Mutex<ChainState<T, E>>>,
}

impl<T, E> Chain<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a chain whose first step is produced by `producer`.
    pub fn starting_with<F>(producer: F) -> Self
    where
        F: FnOnce() -> Task<T, E> + Send + 'static,
    {
        let state = Arc::new(Mutex::new(ChainState {
            started: false,
            first: Some(Box::new(producer)),
            producers: VecDeque::new(),
            active: None,
        }));

        let task = Task::new({
            let state = Arc::clone(&state);
            move |chain: Task<T, E>| {
                lock(&state).started = true;

                // Cancelling the chain cancels the active step and drops any
                // steps not yet produced.
                {
                    let state = Arc::clone(&state);
                    chain.on_cancel(move || {
                        let active = {
                            let mut state = lock(&state);
                            state.first = None;
                            state.producers.clear();
                            state.active.take()
                        };
                        if let Some(active) = active {
                            active.cancel();
                        }
                    });
                }

                advance(state, chain, None);
            }
        });

        Chain { task, state }
    }

    /// Append a step produced from the previous step's output.
    ///
    /// Appending after the chain has started is ignored.
    pub fn then<F>(self, producer: F) -> Self
    where
        F: FnOnce(T) -> Task<T, E> + Send + 'static,
    {
        {
            let mut state = lock(&self.state);
            if state.started {
                tracing::warn!(id = %self.task.id(), "then() after chain start ignored");
            } else {
                state.producers.push_back(Box::new(producer));
            }
        }
        self
    }

    /// The backing task, consuming the builder
    pub fn into_task(self) -> Task<T, E> {
        self.task
    }

    /// A handle to the backing task
    pub fn task(&self) -> Task<T, E> {
        self.task.clone()
    }

    /// Start the chain on the current tokio runtime
    pub fn run(&self) {
        self.task.run();
    }

    /// Start the chain on the given executor
    pub fn run_on(&self, executor: &Handle) {
        self.task.run_on(executor);
    }

    /// Cancel the chain and whichever sub-task is currently active
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// Register a completion handler on the backing task
    pub fn on_completion<F>(&self, handler: F)
    where
        F: FnOnce(Outcome<T, E>) + Send + 'static,
    {
        self.task.on_completion(handler);
    }
}

/// Pop the next producer and run the sub-task it materializes.
///
/// `input` is `None` only for the very first step.
fn advance<T, E>(state: Arc<Mutex<ChainState<T, E>>>, chain: Task<T, E>, input: Option<T>)
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    if chain.state() != TaskState::Executing {
        return;
    }

    let next = {
        let mut state = lock(&state);
        if let Some(first) = state.first.take() {
            NextStep::First(first)
        } else if let Some(producer) = state.producers.pop_front() {
            NextStep::Step(producer)
        } else {
            NextStep::Done
        }
    };

    match (next, input) {
        (NextStep::Done, Some(value)) => chain.complete(Ok(value)),
        (NextStep::First(producer), _) => run_step(state, chain, producer()),
        (NextStep::Step(producer), Some(value)) => run_step(state, chain, producer(value)),
        // The first step always runs before any appended step, so a missing
        // input here means the chain state was corrupted externally.
        (NextStep::Done, None) | (NextStep::Step(_), None) => chain.cancel(),
    }
}

fn run_step<T, E>(state: Arc<Mutex<ChainState<T, E>>>, chain: Task<T, E>, sub: Task<T, E>)
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    // A producer handing back an already-started or already-cancelled task is
    // a programmer error; surface it by aborting the whole chain rather than
    // silently skipping the step.
    if sub.state() != TaskState::Ready {
        tracing::warn!(
            id = %chain.id(),
            step = %sub.id(),
            state = ?sub.state(),
            "chain step was not ready; aborting chain as cancelled"
        );
        chain.cancel();
        return;
    }

    lock(&state).active = Some(sub.clone());

    // Close the window where the chain was cancelled between the state check
    // above and the active-slot registration.
    if chain.state() != TaskState::Executing {
        lock(&state).active = None;
        sub.cancel();
        return;
    }

    {
        let state = Arc::clone(&state);
        let chain = chain.clone();
        sub.on_completion(move |outcome| match outcome {
            Outcome::Success(value) => advance(state, chain, Some(value)),
            Outcome::Failure(error) => chain.complete(Err(error)),
            Outcome::Cancelled => chain.cancel(),
        });
    }

    let executor = chain.executor().unwrap_or_else(Handle::current);
    sub.run_on(&executor);
}

fn lock<T, E>(state: &Arc<Mutex<ChainState<T, E>>>) -> MutexGuard<'_, ChainState<T, E>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn value_task(value: u32) -> Task<u32, String> {
        Task::new(move |task| task.complete(Ok(value)))
    }

    fn failing_task(message: &str) -> Task<u32, String> {
        let message = message.to_string();
        Task::new(move |task| task.complete(Err(message)))
    }

    /// A task that never completes until cancelled.
    fn stuck_task() -> Task<u32, String> {
        Task::new(|_| {})
    }

    async fn await_chain(chain: Chain<u32, String>) -> Outcome<u32, String> {
        let (tx, rx) = oneshot::channel();
        chain.on_completion(move |outcome| {
            let _ = tx.send(outcome);
        });
        chain.run();
        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("chain did not finish in time")
            .expect("outcome sender dropped")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn steps_run_in_order_and_feed_outputs_forward() {
        let chain = Chain::starting_with(|| value_task(1))
            .then(|n| value_task(n + 10))
            .then(|n| value_task(n * 2));
        assert_eq!(await_chain(chain).await, Outcome::Success(22));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_step_chain_yields_that_step_output() {
        let chain = Chain::starting_with(|| value_task(9));
        assert_eq!(await_chain(chain).await, Outcome::Success(9));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failure_short_circuits_and_later_producers_never_run() {
        let later_ran = Arc::new(AtomicBool::new(false));
        let chain = Chain::starting_with(|| value_task(1))
            .then(|_| failing_task("step b failed"))
            .then({
                let later_ran = later_ran.clone();
                move |n| {
                    later_ran.store(true, Ordering::SeqCst);
                    value_task(n)
                }
            });

        assert_eq!(
            await_chain(chain).await,
            Outcome::Failure("step b failed".into())
        );
        assert!(!later_ran.load(Ordering::SeqCst), "producer C must not run");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelling_the_chain_cancels_the_active_step() {
        let stuck = stuck_task();
        let later_ran = Arc::new(AtomicBool::new(false));
        let chain = Chain::starting_with({
            let stuck = stuck.clone();
            move || stuck
        })
        .then({
            let later_ran = later_ran.clone();
            move |n| {
                later_ran.store(true, Ordering::SeqCst);
                value_task(n)
            }
        });

        let task = chain.task();
        let (tx, rx) = oneshot::channel();
        task.on_completion(move |outcome| {
            let _ = tx.send(outcome);
        });
        chain.run();
        // Let the first step start before cancelling.
        tokio::time::sleep(Duration::from_millis(50)).await;
        chain.cancel();

        assert_eq!(rx.await.unwrap(), Outcome::Cancelled);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stuck.state(), TaskState::Cancelled);
        assert!(!later_ran.load(Ordering::SeqCst), "step after cancel must not start");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_ready_step_aborts_the_chain_as_cancelled() {
        let chain = Chain::starting_with(|| {
            let task = value_task(1);
            task.cancel();
            task
        });
        assert_eq!(await_chain(chain).await, Outcome::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn then_after_start_is_ignored() {
        let extra_ran = Arc::new(AtomicBool::new(false));
        let chain = Chain::starting_with(|| value_task(5));
        let (tx, rx) = oneshot::channel();
        chain.on_completion(move |outcome| {
            let _ = tx.send(outcome);
        });
        chain.run();
        assert_eq!(rx.await.unwrap(), Outcome::Success(5));

        let chain = chain.then({
            let extra_ran = extra_ran.clone();
            move |n| {
                extra_ran.store(true, Ordering::SeqCst);
                value_task(n)
            }
        });
        drop(chain);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!extra_ran.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn steps_never_overlap() {
        let executing = Arc::new(AtomicU32::new(0));
        let overlap = Arc::new(AtomicBool::new(false));

        fn tracked(executing: Arc<AtomicU32>, overlap: Arc<AtomicBool>) -> Task<u32, String> {
            Task::new(move |task| {
                if executing.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.store(true, Ordering::SeqCst);
                }
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    executing.fetch_sub(1, Ordering::SeqCst);
                    task.complete(Ok(0));
                });
            })
        }

        let chain = Chain::starting_with({
            let (e, o) = (executing.clone(), overlap.clone());
            move || tracked(e, o)
        })
        .then({
            let (e, o) = (executing.clone(), overlap.clone());
            move |_| tracked(e, o)
        })
        .then({
            let (e, o) = (executing.clone(), overlap.clone());
            move |_| tracked(e, o)
        });

        assert!(await_chain(chain).await.is_success());
        assert!(!overlap.load(Ordering::SeqCst), "chain steps must be strictly sequential");
    }
}
