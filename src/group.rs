//! Parallel task fan-out with bounded concurrency and cancel-on-error policies
//!
//! [`Task::group`] runs a fixed collection of sibling tasks concurrently and
//! completes once every sibling has reached a terminal state. An optional
//! concurrency limit admits siblings through a counting semaphore, and a
//! [`CancelPolicy`] decides whether a sibling's failure aborts the rest of
//! the group.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::task::{Outcome, Task, TaskState};

/// Policy deciding whether a sibling failure cancels the rest of the group
pub enum CancelPolicy<E> {
    /// Failures never cancel siblings; the group still completes successfully
    Never,
    /// The first failure cancels every sibling not yet terminal
    Always,
    /// The first failure satisfying the predicate cancels the rest
    When(Arc<dyn Fn(&E) -> bool + Send + Sync>),
}

impl<E> CancelPolicy<E> {
    fn triggers(&self, error: &E) -> bool {
        match self {
            CancelPolicy::Never => false,
            CancelPolicy::Always => true,
            CancelPolicy::When(predicate) => predicate(error),
        }
    }
}

impl<E> Clone for CancelPolicy<E> {
    fn clone(&self) -> Self {
        match self {
            CancelPolicy::Never => CancelPolicy::Never,
            CancelPolicy::Always => CancelPolicy::Always,
            CancelPolicy::When(predicate) => CancelPolicy::When(Arc::clone(predicate)),
        }
    }
}

impl<E> std::fmt::Debug for CancelPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelPolicy::Never => write!(f, "Never"),
            CancelPolicy::Always => write!(f, "Always"),
            CancelPolicy::When(_) => write!(f, "When(..)"),
        }
    }
}

/// Options controlling a task group
///
/// When several siblings fail in rapid succession, the error the group
/// reports is the first one to acquire the group's internal lock. The
/// tie-break is deliberately nondeterministic.
#[derive(Clone, Debug)]
pub struct GroupOptions<E> {
    /// Whether a sibling failure cancels the remaining siblings
    pub cancel_on_error: CancelPolicy<E>,
    /// Maximum number of siblings executing at once (`None` = unbounded)
    pub max_concurrent: Option<usize>,
    /// Executor to start siblings on; defaults to the group's own executor
    pub executor: Option<Handle>,
}

impl<E> Default for GroupOptions<E> {
    fn default() -> Self {
        GroupOptions {
            cancel_on_error: CancelPolicy::Never,
            max_concurrent: None,
            executor: None,
        }
    }
}

struct GroupState<E> {
    outstanding: usize,
    triggering_error: Option<E>,
    aborted: bool,
}

impl<T, E> Task<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Run `siblings` in parallel as a single task.
    ///
    /// Siblings already terminal (e.g. cancelled out-of-band) are skipped.
    /// The group completes once every admitted sibling is terminal: with the
    /// error that triggered cancellation if one did, otherwise successfully.
    /// Sibling results are discarded; register per-sibling completion
    /// handlers to observe them. Cancelling the group cancels every sibling
    /// not yet terminal.
    pub fn group(siblings: Vec<Task<T, E>>, options: GroupOptions<E>) -> Task<(), E> {
        Task::<(), E>::new(move |group: Task<(), E>| {
            let executor = options
                .executor
                .clone()
                .or_else(|| group.executor())
                .unwrap_or_else(Handle::current);

            let ready: Vec<Task<T, E>> = siblings
                .iter()
                .filter(|task| task.state() == TaskState::Ready)
                .cloned()
                .collect();

            if ready.len() < siblings.len() {
                tracing::debug!(
                    id = %group.id(),
                    skipped = siblings.len() - ready.len(),
                    "skipping siblings already terminal"
                );
            }

            if ready.is_empty() {
                group.complete(Ok(()));
                return;
            }

            let state = Arc::new(Mutex::new(GroupState {
                outstanding: ready.len(),
                triggering_error: None,
                aborted: false,
            }));

            // The group's own cancellation propagates to every sibling.
            {
                let siblings = ready.clone();
                group.on_cancel(move || {
                    for sibling in &siblings {
                        sibling.cancel();
                    }
                });
            }

            // Bookkeeping is registered on every sibling before any of them
            // starts, so an instantly-failing sibling cannot race past its
            // peers' registration.
            for sibling in &ready {
                let state = Arc::clone(&state);
                let group = group.clone();
                let peers = ready.clone();
                let policy = options.cancel_on_error.clone();
                sibling.on_completion(move |outcome| {
                    let (cancel_peers, finish) = {
                        let mut state = lock(&state);
                        let mut cancel_peers = false;
                        if let Outcome::Failure(error) = &outcome {
                            // First policy-matching failure under the lock wins.
                            if !state.aborted && policy.triggers(error) {
                                state.aborted = true;
                                state.triggering_error = Some(error.clone());
                                cancel_peers = true;
                            }
                        }
                        state.outstanding -= 1;
                        (cancel_peers, state.outstanding == 0)
                    };

                    if cancel_peers {
                        tracing::debug!(id = %group.id(), "sibling failure aborts group");
                        for peer in &peers {
                            peer.cancel();
                        }
                    }
                    if finish {
                        let error = lock(&state).triggering_error.take();
                        match error {
                            Some(error) => group.complete(Err(error)),
                            None => group.complete(Ok(())),
                        }
                    }
                });
            }

            match options.max_concurrent {
                None => {
                    for sibling in &ready {
                        sibling.run_on(&executor);
                    }
                }
                Some(limit) => {
                    // Admission loop: each permit is held until its sibling
                    // reaches a terminal state, so at most `limit` siblings
                    // execute at once. Siblings cancelled while waiting for
                    // admission release their permit immediately.
                    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
                    let siblings = ready;
                    let start_on = executor.clone();
                    executor.spawn(async move {
                        for sibling in siblings {
                            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await
                            else {
                                break;
                            };
                            sibling.on_completion(move |_| drop(permit));
                            sibling.run_on(&start_on);
                        }
                    });
                }
            }
        })
    }
}

fn lock<E>(state: &Arc<Mutex<GroupState<E>>>) -> MutexGuard<'_, GroupState<E>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
