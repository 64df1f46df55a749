//! Cancellable unit of asynchronous work with an explicit lifecycle
//!
//! A [`Task`] is created in `Ready` state holding a closure describing its
//! work. Starting it on an executor transitions it to `Executing` and invokes
//! the work exactly once; the work (or anything holding a clone of the task)
//! later calls [`Task::complete`]. Completion and cancellation handlers are
//! queued under the task's lock and fire exactly once each when the task
//! reaches a terminal state.
//!
//! State transitions are monotonic and one-way. Only five transitions are
//! legal:
//!
//! ```text
//! Ready --run--> Executing --complete(Ok)--> Success
//!                Executing --complete(Err)-> Failure
//! Ready|Executing --cancel--> Cancelled
//! ```
//!
//! All terminal states are absorbing: `complete` or `cancel` on a terminal
//! task is a silent no-op, which protects against races where a cancellation
//! and a natural completion land concurrently.
//!
//! # Example
//!
//! ```
//! use tasknet::task::{Outcome, Task};
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() {
//! let task: Task<u32, String> = Task::new(|task| {
//!     task.complete(Ok(42));
//! });
//!
//! let (tx, rx) = tokio::sync::oneshot::channel();
//! task.on_completion(move |outcome| {
//!     let _ = tx.send(outcome);
//! });
//! task.run();
//!
//! assert!(matches!(rx.await, Ok(Outcome::Success(42))));
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;

/// Process-wide counter backing [`TaskId`] allocation
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Stable unique identifier for a task, used for debugging and equality
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value of the id
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable lifecycle state of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not yet started
    Ready,
    /// Work has been invoked, no terminal result yet
    Executing,
    /// Completed with a success value
    Success,
    /// Completed with a failure value
    Failure,
    /// Cancelled before producing a result
    Cancelled,
}

impl TaskState {
    /// True for `Success`, `Failure`, and `Cancelled`
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Cancelled
        )
    }
}

/// Terminal result delivered to every completion handler
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// The task produced a value
    Success(T),
    /// The task failed with a classified error
    Failure(E),
    /// The task was cancelled before producing a result
    Cancelled,
}

impl<T, E> Outcome<T, E> {
    /// True if this outcome is a success
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// True if this outcome is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// The success value, if any
    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    /// The failure value, if any
    pub fn failure(self) -> Option<E> {
        match self {
            Outcome::Failure(error) => Some(error),
            _ => None,
        }
    }
}

type Work<T, E> = Box<dyn FnOnce(Task<T, E>) + Send>;
type CompletionHandler<T, E> = Box<dyn FnOnce(Outcome<T, E>) + Send>;
type CancelHandler = Box<dyn FnOnce() + Send>;

enum Phase<T, E> {
    Ready,
    Executing,
    Finished(Outcome<T, E>),
}

struct Inner<T, E> {
    phase: Phase<T, E>,
    work: Option<Work<T, E>>,
    executor: Option<Handle>,
    completions: Vec<CompletionHandler<T, E>>,
    cancellations: Vec<CancelHandler>,
}

struct Shared<T, E> {
    id: TaskId,
    label: Option<String>,
    inner: Mutex<Inner<T, E>>,
}

/// A single cancellable unit of asynchronous work with one terminal result
///
/// `Task` is a cheap handle (internally reference-counted); clones observe
/// and drive the same underlying unit of work. Equality and hashing are by
/// [`TaskId`].
pub struct Task<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for Task<T, E> {
    fn clone(&self) -> Self {
        Task {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> PartialEq for Task<T, E> {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl<T, E> Eq for Task<T, E> {}

impl<T, E> std::hash::Hash for Task<T, E> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.shared.id.hash(state);
    }
}

impl<T, E> fmt::Debug for Task<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.shared.id)
            .field("label", &self.shared.label)
            .finish()
    }
}

impl<T, E> Task<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a new task in `Ready` state.
    ///
    /// `work` is invoked exactly once when the task is started; it receives a
    /// clone of the task so it can call [`Task::complete`] once the
    /// asynchronous operation it kicks off has finished.
    pub fn new<W>(work: W) -> Self
    where
        W: FnOnce(Task<T, E>) + Send + 'static,
    {
        Self::make(None, work)
    }

    /// Create a new labelled task in `Ready` state
    pub fn with_label<W>(label: impl Into<String>, work: W) -> Self
    where
        W: FnOnce(Task<T, E>) + Send + 'static,
    {
        Self::make(Some(label.into()), work)
    }

    fn make<W>(label: Option<String>, work: W) -> Self
    where
        W: FnOnce(Task<T, E>) + Send + 'static,
    {
        Task {
            shared: Arc::new(Shared {
                id: TaskId::next(),
                label,
                inner: Mutex::new(Inner {
                    phase: Phase::Ready,
                    work: Some(Box::new(work)),
                    executor: None,
                    completions: Vec::new(),
                    cancellations: Vec::new(),
                }),
            }),
        }
    }

    /// Unique id of this task
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// Human-readable label, if one was supplied
    pub fn label(&self) -> Option<&str> {
        self.shared.label.as_deref()
    }

    /// Snapshot of the current lifecycle state
    pub fn state(&self) -> TaskState {
        match &self.lock().phase {
            Phase::Ready => TaskState::Ready,
            Phase::Executing => TaskState::Executing,
            Phase::Finished(Outcome::Success(_)) => TaskState::Success,
            Phase::Finished(Outcome::Failure(_)) => TaskState::Failure,
            Phase::Finished(Outcome::Cancelled) => TaskState::Cancelled,
        }
    }

    /// Start the task on the current tokio runtime.
    ///
    /// Equivalent to `run_on(&Handle::current())`; panics outside a runtime
    /// context, like any `Handle::current()` call.
    pub fn run(&self) {
        self.run_on(&Handle::current());
    }

    /// Start the task on the given executor.
    ///
    /// Transitions `Ready -> Executing` and invokes the stored work exactly
    /// once. All of this task's later callbacks are dispatched on the same
    /// executor. Calling `run_on` on a non-`Ready` task has no effect;
    /// completion handlers registered at any time are still delivered
    /// according to the current or terminal state.
    pub fn run_on(&self, executor: &Handle) {
        let work = {
            let mut inner = self.lock();
            match inner.phase {
                Phase::Ready => {
                    inner.phase = Phase::Executing;
                    inner.executor = Some(executor.clone());
                    inner.work.take()
                }
                _ => None,
            }
        };

        let Some(work) = work else {
            tracing::trace!(id = %self.shared.id, "run on non-ready task ignored");
            return;
        };

        tracing::debug!(id = %self.shared.id, label = self.shared.label.as_deref(), "task started");
        let task = self.clone();
        executor.spawn(async move {
            work(task);
        });
    }

    /// Finish the task with a success or failure result.
    ///
    /// Valid only from `Executing`; silently ignored from any other state.
    /// Every registered completion handler fires exactly once with a clone of
    /// the outcome, then all handler lists are cleared.
    pub fn complete(&self, result: Result<T, E>) {
        let outcome = match result {
            Ok(value) => Outcome::Success(value),
            Err(error) => Outcome::Failure(error),
        };

        let (completions, executor) = {
            let mut inner = self.lock();
            if !matches!(inner.phase, Phase::Executing) {
                return;
            }
            inner.phase = Phase::Finished(outcome.clone());
            inner.work = None;
            inner.cancellations.clear();
            (
                std::mem::take(&mut inner.completions),
                inner.executor.clone(),
            )
        };

        tracing::debug!(id = %self.shared.id, success = outcome.is_success(), "task finished");
        dispatch(executor, move || {
            for handler in completions {
                handler(outcome.clone());
            }
        });
    }

    /// Cancel the task.
    ///
    /// Transitions `Ready -> Cancelled` or `Executing -> Cancelled`; a no-op
    /// on terminal tasks. Cancellation handlers fire in reverse registration
    /// order (the most recently attached cleanup, typically the innermost
    /// dependency's, runs first), then every completion handler fires with
    /// [`Outcome::Cancelled`]. Handlers run on the executor the task was
    /// started on, or synchronously if it never started.
    pub fn cancel(&self) {
        let (cancellations, completions, executor) = {
            let mut inner = self.lock();
            match inner.phase {
                Phase::Ready | Phase::Executing => {
                    inner.phase = Phase::Finished(Outcome::Cancelled);
                    inner.work = None;
                    (
                        std::mem::take(&mut inner.cancellations),
                        std::mem::take(&mut inner.completions),
                        inner.executor.clone(),
                    )
                }
                Phase::Finished(_) => return,
            }
        };

        tracing::debug!(id = %self.shared.id, label = self.shared.label.as_deref(), "task cancelled");
        dispatch(executor, move || {
            for handler in cancellations.into_iter().rev() {
                handler();
            }
            for handler in completions {
                handler(Outcome::Cancelled);
            }
        });
    }

    /// Register a completion handler.
    ///
    /// Fires exactly once with the task's terminal outcome. If the task is
    /// already terminal, the handler fires immediately on the calling thread.
    pub fn on_completion<F>(&self, handler: F)
    where
        F: FnOnce(Outcome<T, E>) + Send + 'static,
    {
        let mut handler = Some(handler);
        let immediate = {
            let mut inner = self.lock();
            if let Phase::Finished(outcome) = &inner.phase {
                Some(outcome.clone())
            } else {
                if let Some(handler) = handler.take() {
                    inner.completions.push(Box::new(handler));
                }
                None
            }
        };
        if let (Some(outcome), Some(handler)) = (immediate, handler) {
            handler(outcome);
        }
    }

    /// Register a cancellation handler.
    ///
    /// Fires only if the task ends up `Cancelled`; a handler registered after
    /// the task was already cancelled fires immediately. Handlers registered
    /// on a task that completed normally are dropped without firing.
    pub fn on_cancel<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut handler = Some(handler);
        let fire = {
            let mut inner = self.lock();
            match &inner.phase {
                Phase::Finished(Outcome::Cancelled) => true,
                Phase::Finished(_) => false,
                _ => {
                    if let Some(handler) = handler.take() {
                        inner.cancellations.push(Box::new(handler));
                    }
                    false
                }
            }
        };
        if fire {
            if let Some(handler) = handler {
                handler();
            }
        }
    }

    /// Derive a task that transforms this task's success value.
    ///
    /// Running the derived task starts this task on the same executor;
    /// cancelling the derived task cancels this one. Failures and
    /// cancellations pass through untransformed.
    pub fn map<U, F>(&self, transform: F) -> Task<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let source = self.clone();
        Task::<U, E>::make(self.shared.label.clone(), move |mapped: Task<U, E>| {
            {
                let mapped = mapped.clone();
                source.on_completion(move |outcome| match outcome {
                    Outcome::Success(value) => mapped.complete(Ok(transform(value))),
                    Outcome::Failure(error) => mapped.complete(Err(error)),
                    Outcome::Cancelled => mapped.cancel(),
                });
            }
            {
                let source = source.clone();
                mapped.on_cancel(move || source.cancel());
            }
            let executor = mapped.executor().unwrap_or_else(Handle::current);
            source.run_on(&executor);
        })
    }

    /// Derive a task that transforms this task's failure value.
    ///
    /// The mirror image of [`Task::map`]: success values and cancellations
    /// pass through untouched.
    pub fn map_error<E2, F>(&self, transform: F) -> Task<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        let source = self.clone();
        Task::<T, E2>::make(self.shared.label.clone(), move |mapped: Task<T, E2>| {
            {
                let mapped = mapped.clone();
                source.on_completion(move |outcome| match outcome {
                    Outcome::Success(value) => mapped.complete(Ok(value)),
                    Outcome::Failure(error) => mapped.complete(Err(transform(error))),
                    Outcome::Cancelled => mapped.cancel(),
                });
            }
            {
                let source = source.clone();
                mapped.on_cancel(move || source.cancel());
            }
            let executor = mapped.executor().unwrap_or_else(Handle::current);
            source.run_on(&executor);
        })
    }

    /// Executor captured when the task was started, if any
    pub(crate) fn executor(&self) -> Option<Handle> {
        self.lock().executor.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        // A panicking callback must not wedge every other handle on the task.
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Invoke `f` on the executor if one was captured, synchronously otherwise.
///
/// Callbacks are always invoked with the task's lock released.
fn dispatch<F>(executor: Option<Handle>, f: F)
where
    F: FnOnce() + Send + 'static,
{
    match executor {
        Some(handle) => {
            handle.spawn(async move { f() });
        }
        None => f(),
    }
}
