//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Periodic maintenance that runs independently of the job queue:
//! - Retention purge of finished tasks and queue items (hourly)
//!
//! ```text
//! Scheduler (every hour)
//!     │
//!     └─► run_retention_purge()
//!             ├─► TaskStore::purge_expired(now - retention)
//!             └─► JobQueue::purge_finished(now - retention)
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::kernel::clock::Clock;
use crate::kernel::ServerDeps;

/// Counts removed by one purge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub tasks: u64,
    pub jobs: u64,
}

/// Start all scheduled tasks
pub async fn start_scheduler(deps: Arc<ServerDeps>, retention: chrono::Duration) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let purge_deps = deps.clone();
    let purge_job = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let deps = purge_deps.clone();
        Box::pin(async move {
            if let Err(e) = run_retention_purge(&deps, retention).await {
                tracing::error!("Retention purge failed: {}", e);
            }
        })
    })?;

    scheduler.add(purge_job).await?;
    scheduler.start().await?;

    tracing::info!(
        retention_hours = retention.num_hours(),
        "Scheduled tasks started (retention purge every hour)"
    );
    Ok(scheduler)
}

/// Delete terminal tasks and finished queue items older than `retention`.
///
/// Live tasks and unfinished jobs are never touched.
pub async fn run_retention_purge(deps: &ServerDeps, retention: chrono::Duration) -> Result<PurgeReport> {
    let cutoff = deps.clock.now() - retention;
    tracing::info!(%cutoff, "Running retention purge");

    let tasks = deps.task_store.purge_expired(cutoff).await?;
    let jobs = deps.job_queue.purge_finished(cutoff).await?;

    tracing::info!(tasks, jobs, "Retention purge complete");
    Ok(PurgeReport { tasks, jobs })
}
