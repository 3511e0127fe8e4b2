//! Worker pool for processing pipeline jobs.
//!
//! A fixed number of worker loops share one queue. Each loop leases one job
//! at a time, runs its handler with periodic heartbeats, and reports the
//! outcome back to the queue:
//!
//! ```text
//! WorkerPool
//!     │
//!     ├─► worker-1 ─┐
//!     ├─► worker-2 ─┼─► dequeue ─► JobRegistry.execute ─► ack / nack / release
//!     └─► worker-N ─┘       ▲                │
//!                           └── heartbeat ───┘
//! ```
//!
//! Shutdown stops new leases immediately and waits up to `drain_timeout` for
//! in-flight jobs. After that the per-job cancellation tokens fire; handlers
//! return `JobError::Interrupted` and the job is released back to the queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::JobError;
use super::job::Job;
use super::queue::{JobQueue, NackOutcome, DEFAULT_QUEUE};
use super::registry::{JobContext, JobRegistry};
use crate::kernel::ServerDeps;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub queue_name: String,
    /// How long an idle worker waits before polling again
    pub poll_interval: Duration,
    /// How often to extend the lease of a running job
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for in-flight jobs before interrupting them
    pub drain_timeout: Duration,
    pub worker_id_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            queue_name: DEFAULT_QUEUE.to_string(),
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(20),
            drain_timeout: Duration::from_secs(30),
            worker_id_prefix: format!("worker-{}", Uuid::now_v7()),
        }
    }
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    registry: Arc<JobRegistry>,
    deps: Arc<ServerDeps>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(registry: Arc<JobRegistry>, deps: Arc<ServerDeps>, config: WorkerPoolConfig) -> Self {
        Self {
            queue: deps.job_queue.clone(),
            registry,
            deps,
            config,
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Run all worker loops until `shutdown` fires, then drain.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let missing = self.registry.missing_kinds();
        if !missing.is_empty() {
            anyhow::bail!("job registry incomplete, no handler for {:?}", missing);
        }

        info!(
            workers = self.config.worker_count,
            queue = %self.config.queue_name,
            "worker pool starting"
        );

        let pool = Arc::new(self);
        let interrupt = CancellationToken::new();

        let handles: Vec<_> = (0..pool.config.worker_count)
            .map(|index| {
                let pool = pool.clone();
                let shutdown = shutdown.clone();
                let interrupt = interrupt.clone();
                let worker_id = format!("{}-{}", pool.config.worker_id_prefix, index);
                tokio::spawn(async move { pool.worker_loop(worker_id, shutdown, interrupt).await })
            })
            .collect();

        shutdown.cancelled().await;
        info!("shutdown requested, draining in-flight jobs");

        let drain = futures::future::join_all(handles);
        tokio::pin!(drain);
        let drained = tokio::time::timeout(pool.config.drain_timeout, &mut drain).await;

        let results = match drained {
            Ok(results) => results,
            Err(_) => {
                warn!(
                    timeout_secs = pool.config.drain_timeout.as_secs(),
                    "drain timeout elapsed, interrupting running jobs"
                );
                interrupt.cancel();
                drain.await
            }
        };

        for result in results {
            if let Err(e) = result {
                error!(error = %e, "worker task panicked");
            }
        }

        info!("worker pool stopped");
        Ok(())
    }

    /// Process jobs on one worker until the queue has nothing eligible.
    ///
    /// Returns the number of jobs processed. Delayed retries that are not yet
    /// eligible are left in the queue.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let worker_id = format!("{}-inline", self.config.worker_id_prefix);
        let interrupt = CancellationToken::new();
        let mut processed = 0;

        while let Some(job) = self.queue.dequeue(&self.config.queue_name, &worker_id).await? {
            self.process_job(job, &worker_id, interrupt.child_token()).await;
            processed += 1;
        }

        Ok(processed)
    }

    async fn worker_loop(
        &self,
        worker_id: String,
        shutdown: CancellationToken,
        interrupt: CancellationToken,
    ) {
        debug!(worker_id = %worker_id, "worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let job = match self.queue.dequeue(&self.config.queue_name, &worker_id).await {
                Ok(job) => job,
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "failed to dequeue job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                    continue;
                }
            };

            match job {
                Some(job) => self.process_job(job, &worker_id, interrupt.child_token()).await,
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.queue.wait_for_work(self.config.poll_interval) => {}
                    }
                }
            }
        }

        debug!(worker_id = %worker_id, "worker stopped");
    }

    /// Run one leased job and settle it with the queue.
    async fn process_job(&self, job: Job, worker_id: &str, cancel: CancellationToken) {
        let job_id = job.id;
        let kind = job.kind;
        let ctx = JobContext::for_job(&job, cancel.clone());

        debug!(job_id = %job_id, kind = %kind, attempt = job.attempts, "processing job");

        let result = self.execute_with_heartbeat(&job, worker_id, ctx).await;

        let settled = match result {
            Ok(()) => {
                debug!(job_id = %job_id, kind = %kind, "job succeeded");
                self.queue
                    .ack(job_id, worker_id)
                    .await
                    .map(|settled| log_lost_lease(job_id, settled))
            }
            Err(JobError::Retryable(message)) => {
                warn!(job_id = %job_id, kind = %kind, error = %message, "job failed, retryable");
                self.queue
                    .nack(job_id, worker_id, true, &message)
                    .await
                    .map(|outcome| log_nack(job_id, outcome))
            }
            Err(JobError::Fatal(message)) => {
                warn!(job_id = %job_id, kind = %kind, error = %message, "job failed permanently");
                self.queue
                    .nack(job_id, worker_id, false, &message)
                    .await
                    .map(|outcome| log_nack(job_id, outcome))
            }
            Err(JobError::Interrupted) => {
                info!(job_id = %job_id, kind = %kind, "job interrupted, releasing");
                self.queue
                    .release(job_id, worker_id)
                    .await
                    .map(|settled| log_lost_lease(job_id, settled))
            }
        };

        if let Err(e) = settled {
            error!(job_id = %job_id, error = %e, "failed to settle job with queue");
        }
    }

    /// Execute a job with periodic lease extensions.
    async fn execute_with_heartbeat(
        &self,
        job: &Job,
        worker_id: &str,
        ctx: JobContext,
    ) -> Result<(), JobError> {
        let job_id = job.id;
        let worker_id = worker_id.to_string();
        let queue = self.queue.clone();
        let heartbeat_interval = self.config.heartbeat_interval;

        let heartbeat_stop = CancellationToken::new();
        let heartbeat_cancel = heartbeat_stop.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await; // first tick is immediate

            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match queue.heartbeat(job_id, &worker_id).await {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!(job_id = %job_id, worker_id = %worker_id, "lease lost, stopping heartbeat");
                                break;
                            }
                            Err(e) => warn!(job_id = %job_id, error = %e, "heartbeat failed"),
                        }
                    }
                }
            }
        });

        let result = self.registry.execute(job, self.deps.clone(), ctx).await;

        heartbeat_stop.cancel();
        let _ = heartbeat_handle.await;

        result
    }
}

fn log_nack(job_id: Uuid, outcome: NackOutcome) {
    match outcome {
        NackOutcome::Retrying { next_eligible_at } => {
            debug!(job_id = %job_id, next_eligible_at = %next_eligible_at, "job scheduled for retry")
        }
        NackOutcome::Failed => warn!(job_id = %job_id, "job marked failed"),
        NackOutcome::LeaseLost => log_lost_lease(job_id, false),
    }
}

fn log_lost_lease(job_id: Uuid, settled: bool) {
    if !settled {
        warn!(job_id = %job_id, "lease was lost before the job settled, outcome discarded");
    }
}
