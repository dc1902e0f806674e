//! Bounded task pools and the batches that track them.
//!
//! A [`WorkerPool`] is a semaphore with a name: every task holds one permit
//! while it runs. A [`Batch`] is the join counter a caller waits on; tasks
//! from any pool can be spawned into it.

use crate::error::{Error, Result};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
    Panicked,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub label: String,
    pub error: String,
}

/// Counts for a settled batch. Panicked tasks are included in `failed`.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub failures: Vec<Failure>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

#[derive(Default)]
struct BatchState {
    completed: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    failures: Mutex<Vec<Failure>>,
}

impl BatchState {
    fn record(&self, label: &str, outcome: TaskOutcome, error: Option<String>) {
        let counter = match outcome {
            TaskOutcome::Completed => &self.completed,
            TaskOutcome::Failed | TaskOutcome::Panicked => &self.failed,
            TaskOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = error {
            self.failures
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(Failure {
                    label: label.to_string(),
                    error,
                });
        }
    }
}

/// Join counter for a group of tasks.
#[derive(Clone, Default)]
pub struct Batch {
    tracker: TaskTracker,
    state: Arc<BatchState>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks spawned into this batch that have not finished yet.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every task spawned so far has finished.
    pub async fn wait(&self) -> BatchSummary {
        self.tracker.close();
        self.tracker.wait().await;
        self.summary()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            completed: self.state.completed.load(Ordering::SeqCst),
            failed: self.state.failed.load(Ordering::SeqCst),
            cancelled: self.state.cancelled.load(Ordering::SeqCst),
            failures: self
                .state
                .failures
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

/// At most `capacity` tasks of this pool run at once, across all batches.
#[derive(Clone)]
pub struct WorkerPool {
    name: &'static str,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `task` in `batch` once a permit is free.
    pub fn submit<F>(&self, batch: &Batch, label: impl Into<String>, task: F) -> JoinHandle<TaskOutcome>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.spawn(batch, None, label.into(), task)
    }

    /// Like [`submit`](Self::submit), but the task is dropped without
    /// running if `cancel` fires before it gets a permit.
    pub fn submit_cancellable<F>(
        &self,
        batch: &Batch,
        cancel: &CancellationToken,
        label: impl Into<String>,
        task: F,
    ) -> JoinHandle<TaskOutcome>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.spawn(batch, Some(cancel.clone()), label.into(), task)
    }

    fn spawn<F>(
        &self,
        batch: &Batch,
        cancel: Option<CancellationToken>,
        label: String,
        task: F,
    ) -> JoinHandle<TaskOutcome>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let state = Arc::clone(&batch.state);
        let pool = self.name;

        batch.tracker.spawn(async move {
            let permit = match &cancel {
                Some(cancel) => {
                    if cancel.is_cancelled() {
                        None
                    } else {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            permit = Arc::clone(&permits).acquire_owned() => permit.ok(),
                        }
                    }
                }
                None => permits.acquire_owned().await.ok(),
            };
            let Some(_permit) = permit else {
                debug!(pool, task = %label, "skipped, shutting down");
                state.record(&label, TaskOutcome::Cancelled, None);
                return TaskOutcome::Cancelled;
            };

            let (outcome, error) = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => (TaskOutcome::Completed, None),
                Ok(Err(Error::Cancelled)) => {
                    debug!(pool, task = %label, "cancelled");
                    (TaskOutcome::Cancelled, None)
                }
                Ok(Err(e)) => {
                    error!("❌ [{}] {}", label, e);
                    (TaskOutcome::Failed, Some(e.to_string()))
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("💥 [{}] task panicked: {}", label, message);
                    (TaskOutcome::Panicked, Some(format!("panicked: {}", message)))
                }
            };
            state.record(&label, outcome, error);
            outcome
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tokio::sync::Notify;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_runs_more_than_capacity() {
        let pool = WorkerPool::new("download", 3);
        let batch = Batch::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..20 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(&batch, format!("task-{}", i), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let summary = batch.wait().await;
        assert_eq!(summary.completed, 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn empty_batch_settles_immediately() {
        let summary = Batch::new().wait().await;
        assert_eq!(summary.total(), 0);
    }

    #[tokio::test]
    async fn zero_capacity_is_raised_to_one() {
        let pool = WorkerPool::new("global", 0);
        assert_eq!(pool.name(), "global");
        assert_eq!(pool.capacity(), 1);
        let batch = Batch::new();
        pool.submit(&batch, "only", async { Ok(()) });
        assert_eq!(batch.wait().await.completed, 1);
    }

    fn explode() -> Result<()> {
        panic!("unexpected payload")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panics_and_errors_stay_inside_the_task() {
        let pool = WorkerPool::new("global", 2);
        let batch = Batch::new();

        pool.submit(&batch, "fine", async { Ok(()) });
        pool.submit(&batch, "broken", async {
            Err(Error::Api {
                status: 500,
                url: "https://api.beatport.com/v4/catalog/tracks/1/".into(),
            })
        });
        let boom = pool.submit(&batch, "boom", async { explode() });

        let summary = batch.wait().await;
        assert_eq!(boom.await.unwrap(), TaskOutcome::Panicked);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failures.len(), 2);
        assert!(summary
            .failures
            .iter()
            .any(|f| f.label == "boom" && f.error.contains("unexpected payload")));
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_entry_never_runs() {
        let pool = WorkerPool::new("download", 1);
        let batch = Batch::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_task = Arc::clone(&ran);
        let handle = pool.submit_cancellable(&batch, &cancel, "late", async move {
            ran_in_task.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(handle.await.unwrap(), TaskOutcome::Cancelled);
        let summary = batch.wait().await;
        assert_eq!(summary.cancelled, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queued_tasks_are_dropped_on_cancel_but_running_ones_finish() {
        let pool = WorkerPool::new("download", 1);
        let batch = Batch::new();
        let cancel = CancellationToken::new();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let finished = Arc::new(AtomicUsize::new(0));

        {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            let finished = Arc::clone(&finished);
            pool.submit_cancellable(&batch, &cancel, "running", async move {
                started.notify_one();
                release.notified().await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        started.notified().await;

        let queued_ran = Arc::new(AtomicUsize::new(0));
        let queued = {
            let queued_ran = Arc::clone(&queued_ran);
            pool.submit_cancellable(&batch, &cancel, "queued", async move {
                queued_ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        cancel.cancel();
        assert_eq!(queued.await.unwrap(), TaskOutcome::Cancelled);
        release.notify_one();

        let summary = batch.wait().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(queued_ran.load(Ordering::SeqCst), 0);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.cancelled, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn wait_returns_only_after_every_task_reported() {
        let pool = WorkerPool::new("global", 4);
        let batch = Batch::new();
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..12u64 {
            let done = Arc::clone(&done);
            pool.submit(&batch, format!("job-{}", i), async move {
                tokio::time::sleep(Duration::from_millis(2 * (12 - i))).await;
                done.fetch_add(1, Ordering::SeqCst);
                if i % 3 == 0 {
                    return Err(Error::Cancelled);
                }
                Ok(())
            });
        }

        let summary = batch.wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 12);
        assert_eq!(summary.total(), 12);
        assert_eq!(summary.cancelled, 4);
        assert_eq!(batch.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn capacity_one_serializes_transfers() {
        let pool = WorkerPool::new("download", 1);
        let batch = Batch::new();
        let spans = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let spans = Arc::clone(&spans);
            pool.submit(&batch, format!("file-{}", i), async move {
                let start = Instant::now();
                tokio::time::sleep(Duration::from_millis(10)).await;
                spans.lock().unwrap().push((start, Instant::now()));
                Ok(())
            });
        }
        batch.wait().await;

        let mut spans = spans.lock().unwrap().clone();
        assert_eq!(spans.len(), 5);
        spans.sort_by_key(|(start, _)| *start);
        for pair in spans.windows(2) {
            assert!(pair[1].0 >= pair[0].1, "transfers overlapped");
        }
    }
}
