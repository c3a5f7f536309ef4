//! Bounded-concurrency executor
//!
//! Runs a worker over a list of items on tokio tasks with at most
//! `max_workers` in flight. Each item's outcome lands in its own slot of
//! the returned vector, aligned with the input order. A failing or
//! panicking worker only affects its own slot.
//!
//! There is a single code path for every worker budget; `max_workers = 1`
//! is the sequential case.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, warn};

/// Progress notification sent after each completed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Callback invoked from worker tasks as items complete
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Failure recorded in one item's slot
#[derive(Debug, Error)]
pub enum WorkError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("worker task cancelled")]
    Cancelled,
}

impl<E> WorkError<E> {
    /// The worker's own error, if that is what failed the item
    pub fn into_inner(self) -> Option<E> {
        match self {
            WorkError::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcome of one work item; never both a value and an error
pub type WorkResult<T, E> = Result<T, WorkError<E>>;

/// Fixed worker budget over tokio tasks
#[derive(Debug, Clone, Copy)]
pub struct BoundedExecutor {
    max_workers: usize,
}

impl BoundedExecutor {
    /// Budgets below 1 are raised to 1
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `worker` over `items`, returning results in input order.
    ///
    /// Every item is dispatched to its own task, which waits for a permit
    /// before calling the worker. Dropping the returned future closes the
    /// permits: items holding one run to completion, queued items resolve
    /// to [`WorkError::Cancelled`] without calling the worker.
    pub async fn run<I, T, E, F, Fut>(
        &self,
        items: Vec<I>,
        worker: F,
        on_progress: Option<ProgressFn>,
    ) -> Vec<WorkResult<T, E>>
    where
        I: Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let worker = Arc::new(worker);
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let completed = Arc::new(AtomicUsize::new(0));
        let _close_on_drop = ClosePermits(Arc::clone(&permits));

        debug!(items = total, max_workers = self.max_workers, "Dispatching work items");

        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let worker = Arc::clone(&worker);
                let permits = Arc::clone(&permits);
                let completed = Arc::clone(&completed);
                let on_progress = on_progress.clone();

                tokio::spawn(async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return Err(WorkError::Cancelled),
                    };

                    let outcome = worker(item).await.map_err(WorkError::Failed);

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(callback) = on_progress {
                        callback(Progress {
                            completed: done,
                            total,
                        });
                    }
                    outcome
                })
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        for (index, handle) in handles.into_iter().enumerate() {
            let slot = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(index, error = %e, "Work item task did not complete");
                    Err(join_error(e))
                }
            };
            results.push(slot);
        }
        results
    }
}

/// Closes the semaphore when the owning `run` future goes away
struct ClosePermits(Arc<Semaphore>);

impl Drop for ClosePermits {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn join_error<E>(e: JoinError) -> WorkError<E> {
    if !e.is_panic() {
        return WorkError::Cancelled;
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    WorkError::Panicked(message)
}
