// executor.rs - Bounded parallel execution with per-task timeout
// Purpose: Fan out liveness checks, downloads, fuzz probes and repository
//          scans with controlled parallelism and failure isolation

use crate::error::{ReconError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of one bounded task. Position in the returned vector matches the
/// position of the task that produced it.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    Failed(ReconError),
    TimedOut(Duration),
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }

    /// Converts the outcome into a `Result`, mapping timeouts and
    /// cancellation onto their error variants.
    pub fn into_result(self) -> Result<T> {
        match self {
            TaskOutcome::Completed(value) => Ok(value),
            TaskOutcome::Failed(err) => Err(err),
            TaskOutcome::TimedOut(limit) => Err(ReconError::Timeout(limit)),
            TaskOutcome::Cancelled => Err(ReconError::Cancelled),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BOUNDED EXECUTOR
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug)]
pub struct BoundedExecutor {
    max_parallel: usize,
    /// `None` leaves time limits to the task itself.
    task_timeout: Option<Duration>,
    cancel: CancellationToken,
    progress_label: Option<String>,
}

impl BoundedExecutor {
    pub fn new(max_parallel: usize, task_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            task_timeout: Some(task_timeout),
            cancel,
            progress_label: None,
        }
    }

    /// Show an indicatif progress bar with this label while running.
    pub fn with_progress(mut self, label: impl Into<String>) -> Self {
        self.progress_label = Some(label.into());
        self
    }

    /// Tasks that bound their own steps (and may legitimately wait, e.g. for
    /// an API rate-limit reset) run without the per-task limit.
    pub fn without_task_timeout(mut self) -> Self {
        self.task_timeout = None;
        self
    }

    /// Run every task with at most `max_parallel` in flight. A task that
    /// exceeds the timeout is dropped and reported as `TimedOut`; on
    /// cancellation in-flight and queued tasks report `Cancelled` while
    /// already-finished results are kept.
    pub async fn run<T, F>(&self, tasks: Vec<F>) -> Vec<TaskOutcome<T>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        if tasks.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let bar = self.progress_bar(tasks.len() as u64);
        debug!(
            tasks = tasks.len(),
            max_parallel = self.max_parallel,
            timeout_ms = self.task_timeout.map(|t| t.as_millis() as u64),
            "starting bounded fan-out"
        );

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            let limit = self.task_timeout;
            let bar = bar.clone();

            handles.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return TaskOutcome::Cancelled,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return TaskOutcome::Cancelled,
                    },
                };

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => TaskOutcome::Cancelled,
                    result = bounded(limit, task) => match result {
                        Some(Ok(value)) => TaskOutcome::Completed(value),
                        Some(Err(err)) => TaskOutcome::Failed(err),
                        None => TaskOutcome::TimedOut(limit.unwrap_or_default()),
                    },
                };

                drop(permit);
                bar.inc(1);
                outcome
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) if join_err.is_cancelled() => TaskOutcome::Cancelled,
                Err(join_err) => TaskOutcome::Failed(ReconError::Data(format!("task panicked: {}", join_err))),
            };
            outcomes.push(outcome);
        }

        bar.finish_and_clear();
        outcomes
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        match &self.progress_label {
            Some(label) => {
                let bar = ProgressBar::new(len);
                let style = ProgressStyle::with_template("   {msg} [{bar:40.cyan/blue}] {pos}/{len} ({elapsed})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style.progress_chars("=> "));
                bar.set_message(label.clone());
                bar
            }
            None => ProgressBar::hidden(),
        }
    }
}

/// `None` when `limit` elapsed first.
async fn bounded<T, F>(limit: Option<Duration>, task: F) -> Option<Result<T>>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, task).await.ok(),
        None => Some(task.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn run_bounded<T, F>(
        tasks: Vec<F>,
        max_parallel: usize,
        per_task_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Vec<TaskOutcome<T>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        BoundedExecutor::new(max_parallel, per_task_timeout, cancel.clone())
            .run(tasks)
            .await
    }

    struct InFlight {
        current: Arc<AtomicUsize>,
    }

    impl InFlight {
        fn enter(current: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Self {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            Self {
                current: Arc::clone(current),
            }
        }
    }

    impl Drop for InFlight {
        fn drop(&mut self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_concurrency_with_timeouts() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                async move {
                    let _guard = InFlight::enter(&current, &peak);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, ReconError>(())
                }
            })
            .collect();

        let outcomes = run_bounded(tasks, 3, Duration::from_secs(1), &CancellationToken::new()).await;

        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(|o| matches!(o, TaskOutcome::TimedOut(_))));
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(current.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_siblings() {
        let tasks: Vec<_> = (0..5)
            .map(|i| async move {
                if i == 2 {
                    Err(ReconError::Transient("boom".into()))
                } else {
                    Ok(i * 10)
                }
            })
            .collect();

        let outcomes = run_bounded(tasks, 2, Duration::from_secs(5), &CancellationToken::new()).await;

        assert!(matches!(outcomes[2], TaskOutcome::Failed(_)));
        let values: Vec<_> = outcomes
            .into_iter()
            .filter_map(|o| match o {
                TaskOutcome::Completed(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![0, 10, 30, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_keeps_completed_results() {
        let cancel = CancellationToken::new();
        let tasks: Vec<_> = (0..5u64)
            .map(|i| async move {
                if i >= 2 {
                    tokio::time::sleep(Duration::from_secs(100)).await;
                }
                Ok::<u64, ReconError>(i)
            })
            .collect();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let outcomes = run_bounded(tasks, 5, Duration::from_secs(500), &cancel).await;

        assert!(matches!(outcomes[0], TaskOutcome::Completed(0)));
        assert!(matches!(outcomes[1], TaskOutcome::Completed(1)));
        assert!(outcomes[2..].iter().all(|o| matches!(o, TaskOutcome::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_task_timeout_lets_long_tasks_finish() {
        let tasks: Vec<_> = (0..3u64)
            .map(|i| async move {
                tokio::time::sleep(Duration::from_secs(3600 * (i + 1))).await;
                Ok::<u64, ReconError>(i)
            })
            .collect();

        let outcomes = BoundedExecutor::new(2, Duration::from_secs(1), CancellationToken::new())
            .without_task_timeout()
            .run(tasks)
            .await;

        assert!(outcomes.iter().all(TaskOutcome::is_completed));
    }

    #[tokio::test]
    async fn test_empty_task_list() {
        let tasks: Vec<std::future::Ready<Result<()>>> = Vec::new();
        let outcomes = run_bounded(tasks, 4, Duration::from_secs(1), &CancellationToken::new()).await;
        assert!(outcomes.is_empty());
    }
}
