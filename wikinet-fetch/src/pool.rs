use futures::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

/// Worker count that keeps request volume within the wiki's courtesy limits.
pub const DEFAULT_WORKERS: usize = 8;

/// Called after each task finishes with the running completion count and the task label.
pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub label: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    pub submitted: usize,
    pub completed: usize,
    pub failures: Vec<TaskFailure>,
    /// Tasks still running when the drain deadline passed. They are left to finish on
    /// their own; their results are not part of this report.
    pub timed_out: usize,
}

impl PoolReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn succeeded(&self) -> usize {
        self.completed - self.failures.len()
    }

    pub fn all_finished(&self) -> bool {
        self.timed_out == 0
    }
}

struct Finished {
    label: String,
    result: Result<(), String>,
}

/// Runs independent tasks with at most `width` of them in flight at once.
///
/// A failing or panicking task is recorded in the [`PoolReport`] and never affects its
/// siblings. The pool is consumed by [`WorkerPool::drain`].
pub struct WorkerPool {
    width: usize,
    semaphore: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<Finished>,
    rx: mpsc::UnboundedReceiver<Finished>,
    submitted: usize,
    progress_callback: Option<ProgressCallback>,
}

impl WorkerPool {
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            width,
            semaphore: Arc::new(Semaphore::new(width)),
            tx,
            rx,
            submitted: 0,
            progress_callback: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Queue one task. It starts as soon as a worker permit is free.
    pub fn submit<F, E>(&mut self, label: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let label = label.into();
        let semaphore = self.semaphore.clone();
        let tx = self.tx.clone();
        let task_number = self.submitted;
        self.submitted += 1;

        tokio::spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    debug!("Task {} ({}) started", task_number, label);
                    match AssertUnwindSafe(task).catch_unwind().await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err("task panicked".to_string()),
                    }
                }
                Err(_) => Err("worker pool closed".to_string()),
            };
            // The receiver is gone once drain has timed out; late results are dropped.
            let _ = tx.send(Finished { label, result });
        });
    }

    pub fn submit_all<I, F, E>(&mut self, tasks: I)
    where
        I: IntoIterator<Item = (String, F)>,
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        for (label, task) in tasks {
            self.submit(label, task);
        }
    }

    /// Wait until every submitted task has finished or `timeout` elapses.
    pub async fn drain(self, timeout: Duration) -> PoolReport {
        let WorkerPool {
            tx,
            mut rx,
            submitted,
            progress_callback,
            ..
        } = self;
        drop(tx);

        info!("Draining worker pool: {} tasks", submitted);
        let deadline = Instant::now() + timeout;
        let mut report = PoolReport {
            submitted,
            ..Default::default()
        };

        while report.completed < submitted {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(finished)) => {
                    report.completed += 1;
                    if let Err(message) = finished.result {
                        warn!("Task {} failed: {}", finished.label, message);
                        report.failures.push(TaskFailure {
                            label: finished.label.clone(),
                            message,
                        });
                    }
                    if let Some(ref callback) = progress_callback {
                        callback(report.completed, finished.label);
                    }
                }
                Ok(None) => {
                    report.timed_out = submitted - report.completed;
                    break;
                }
                Err(_) => {
                    report.timed_out = submitted - report.completed;
                    warn!(
                        "Worker pool drain timed out after {:?}; {} tasks still running",
                        timeout, report.timed_out
                    );
                    break;
                }
            }
        }

        info!(
            "Worker pool drained: {} completed, {} failed, {} unfinished",
            report.completed,
            report.failed(),
            report.timed_out
        );
        report
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}
