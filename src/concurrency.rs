//! Bounded-parallelism primitive shared by the plugin auditor's directory
//! walk and the heartbeat scanner.
//!
//! [`BoundedPool`] runs up to `max_concurrent` tasks at a time over a
//! `tokio::sync::Semaphore`-gated `JoinSet`, preserving input order and
//! isolating a panicking or cancelled task to a `None` slot rather than
//! losing the rest of the batch.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Runs a set of futures with bounded concurrency, isolating each task's
/// panic or cancellation from the others — a task that fails does not
/// prevent the remaining tasks from completing.
pub struct BoundedPool {
    semaphore: Arc<Semaphore>,
    max_workers: usize,
}

impl BoundedPool {
    /// Create a pool that runs at most `max_workers` tasks concurrently.
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Run every future produced by `tasks`, spawning at most this pool's
    /// configured concurrency at once, and return `Some(output)` for each
    /// task that completed successfully — `None` in that task's slot if it
    /// panicked, preserving input order.
    pub async fn run_all<T, F, Fut>(&self, tasks: Vec<T>, make_future: F) -> Vec<Option<Fut::Output>>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let make_future = Arc::new(make_future);
        let mut joins = JoinSet::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let semaphore = self.semaphore.clone();
            let make_future = make_future.clone();
            joins.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                let output = make_future(task).await;
                (index, output)
            });
        }

        let total = joins.len();
        let mut slots: Vec<Option<Fut::Output>> = (0..total).map(|_| None).collect();
        while let Some(joined) = joins.join_next().await {
            if let Ok((index, output)) = joined {
                slots[index] = Some(output);
            }
        }
        slots
    }

    /// The number of tasks this pool will run at once.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_workers
    }
}
