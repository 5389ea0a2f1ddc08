//! Bounded worker pool for job orchestration.
//!
//! Job ids flow through a bounded mpsc queue. Each job runs in its own task
//! under the configured timeout; the worker awaits that task, so a panic,
//! timeout or run error is turned into a failed job via
//! [`JobRunner::mark_crashed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::orchestrator::{JobOutcome, JobRunner};
use crate::config::WorkerConfig;
use crate::panic_hook::panic_payload_to_string;
use crate::{Error, Result};

/// Producer side of the job queue.
#[derive(Clone)]
pub struct JobSender {
    tx: mpsc::Sender<String>,
}

impl JobSender {
    /// Reserve a queue slot without waiting. A full queue is `Error::QueueFull`.
    pub fn try_reserve(&self) -> Result<mpsc::Permit<'_, String>> {
        self.tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => Error::QueueFull,
            mpsc::error::TrySendError::Closed(()) => {
                Error::Other("worker pool is shut down".to_string())
            }
        })
    }

    /// Enqueue, waiting for a free slot.
    pub async fn send(&self, job_id: String) -> Result<()> {
        self.tx
            .send(job_id)
            .await
            .map_err(|_| Error::Other("worker pool is shut down".to_string()))
    }
}

pub struct WorkerPool {
    max_workers: usize,
    job_timeout: Duration,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    active_jobs: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    /// Create the pool and the sender feeding it.
    pub fn new(config: &WorkerConfig) -> (Self, JobSender) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let pool = Self {
            max_workers: config.max_workers.max(1),
            job_timeout: config.job_timeout(),
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
            active_jobs: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        };
        (pool, JobSender { tx })
    }

    /// Start the workers.
    pub fn start(&self, runner: Arc<dyn JobRunner>) {
        info!("Starting job worker pool with {} workers", self.max_workers);

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!("Worker pool already stopped, not starting");
            return;
        };

        for i in 0..self.max_workers {
            let runner = runner.clone();
            let receiver = self.receiver.clone();
            let active_jobs = self.active_jobs.clone();
            let cancellation_token = self.cancellation_token.clone();
            let job_timeout = self.job_timeout;

            join_set.spawn(async move {
                debug!("Worker {} started", i);

                loop {
                    let job_id = {
                        let mut rx = receiver.lock().await;
                        tokio::select! {
                            _ = cancellation_token.cancelled() => break,
                            msg = rx.recv() => match msg {
                                Some(job_id) => job_id,
                                None => break,
                            },
                        }
                    };

                    debug!(job_id = %job_id, "Worker {} picked up job", i);
                    active_jobs.fetch_add(1, Ordering::SeqCst);
                    supervise(
                        runner.clone(),
                        job_id,
                        job_timeout,
                        cancellation_token.child_token(),
                    )
                    .await;
                    active_jobs.fetch_sub(1, Ordering::SeqCst);
                }

                debug!("Worker {} shutting down", i);
            });
        }
    }

    /// Stop the pool and wait for the workers to exit.
    ///
    /// Running jobs see the cancellation at their next stage boundary.
    pub async fn stop(&self) {
        info!("Stopping job worker pool");
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("Job worker pool stopped");
    }

    pub fn active_count(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

/// Run one job in its own task and turn abnormal endings into a failed job.
async fn supervise(
    runner: Arc<dyn JobRunner>,
    job_id: String,
    job_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut handle = tokio::spawn({
        let runner = runner.clone();
        let job_id = job_id.clone();
        async move { runner.run_job(&job_id, cancel).await }
    });

    let crash_reason = match tokio::time::timeout(job_timeout, &mut handle).await {
        Ok(Ok(Ok(outcome))) => {
            match &outcome {
                JobOutcome::Done {
                    delivery_warning: Some(warning),
                    ..
                } => warn!(job_id = %job_id, warning = %warning, "Job done with delivery warning"),
                other => debug!(job_id = %job_id, outcome = ?other, "Job finished"),
            }
            None
        }
        Ok(Ok(Err(e))) => Some(format!("run error: {}", e)),
        Ok(Err(join_err)) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let message = panic_payload_to_string(payload.as_ref())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Some(format!("panicked: {}", message))
        }
        Ok(Err(join_err)) => Some(format!("task aborted: {}", join_err)),
        Err(_) => {
            handle.abort();
            let _ = handle.await;
            Some(format!("timed out after {}s", job_timeout.as_secs()))
        }
    };

    if let Some(reason) = crash_reason {
        error!(job_id = %job_id, reason = %reason, "Job did not finish normally");
        runner.mark_crashed(&job_id, &reason).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct ScriptedRunner {
        crashed: parking_lot::Mutex<Vec<(String, String)>>,
        finished: parking_lot::Mutex<Vec<String>>,
        notify: Notify,
    }

    #[async_trait]
    impl JobRunner for ScriptedRunner {
        async fn run_job(&self, job_id: &str, _cancel: CancellationToken) -> Result<JobOutcome> {
            match job_id {
                "panic" => panic!("stage exploded"),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    unreachable!()
                }
                "error" => Err(Error::Other("db gone".into())),
                _ => {
                    self.finished.lock().push(job_id.to_string());
                    self.notify.notify_one();
                    Ok(JobOutcome::Skipped {
                        status: crate::database::models::JobStatus::Done,
                    })
                }
            }
        }

        async fn mark_crashed(&self, job_id: &str, reason: &str) {
            self.crashed
                .lock()
                .push((job_id.to_string(), reason.to_string()));
            self.notify.notify_one();
        }
    }

    fn config(queue_capacity: usize) -> WorkerConfig {
        WorkerConfig {
            max_workers: 1,
            queue_capacity,
            job_timeout_secs: 1,
        }
    }

    async fn wait_for(runner: &ScriptedRunner, events: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while runner.crashed.lock().len() + runner.finished.lock().len() < events {
                runner.notify.notified().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_panic_becomes_crash() {
        let runner = Arc::new(ScriptedRunner::default());
        let (pool, sender) = WorkerPool::new(&config(4));
        pool.start(runner.clone());

        sender.send("panic".into()).await.unwrap();
        sender.send("ok".into()).await.unwrap();
        wait_for(&runner, 2).await;

        let crashed = runner.crashed.lock().clone();
        assert_eq!(crashed.len(), 1);
        assert_eq!(crashed[0].0, "panic");
        assert!(crashed[0].1.contains("stage exploded"));
        assert_eq!(*runner.finished.lock(), vec!["ok".to_string()]);

        pool.stop().await;
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn test_timeout_and_error_become_crash() {
        let runner = Arc::new(ScriptedRunner::default());
        let (pool, sender) = WorkerPool::new(&config(4));
        pool.start(runner.clone());

        sender.send("slow".into()).await.unwrap();
        sender.send("error".into()).await.unwrap();
        wait_for(&runner, 2).await;

        let crashed = runner.crashed.lock().clone();
        assert_eq!(crashed[0].0, "slow");
        assert!(crashed[0].1.contains("timed out"));
        assert_eq!(crashed[1].0, "error");
        assert!(crashed[1].1.contains("db gone"));

        pool.stop().await;
    }

    #[tokio::test]
    async fn test_full_queue_rejects_reservation() {
        let (_pool, sender) = WorkerPool::new(&config(1));

        let permit = sender.try_reserve().unwrap();
        permit.send("first".into());

        assert!(matches!(sender.try_reserve(), Err(Error::QueueFull)));
    }
}
