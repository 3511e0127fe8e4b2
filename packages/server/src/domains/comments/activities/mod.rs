//! Comment pipeline activities and their job handlers.
//!
//! ```text
//! CollectCommentsJob
//!     created → fetching ─► (page: fetch → upsert → progress)* ─► persisting
//!         ├─ no comments ─► completed
//!         └─► awaiting_analysis ─► enqueue AnalyzeCommentsJob
//!
//! AnalyzeCommentsJob
//!     analyzing ─► (record: analyze → save)* ─► completed | failed
//! ```
//!
//! Activities return [`PipelineError`]; [`settle`] turns that into the task's
//! terminal state (when one applies) and the queue outcome.

mod analyze;
mod collect;

pub use analyze::analyze_comments;
pub use collect::collect_comments;

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::jobs::{AnalyzeCommentsJob, CollectCommentsJob};
use super::pipeline::{PipelineError, CANCELLED_REASON};
use crate::domains::tasks::{PipelineStage, Task, TaskPatch, TaskStatus, TaskStoreError};
use crate::kernel::jobs::{JobContext, JobError, JobResult};
use crate::kernel::ServerDeps;

/// Job handler for [`CollectCommentsJob`].
pub async fn handle_collect(job: CollectCommentsJob, deps: Arc<ServerDeps>, ctx: JobContext) -> JobResult {
    let result = collect_comments(&job, &deps, &ctx).await;
    settle(job.task_id, result, &deps, &ctx).await
}

/// Job handler for [`AnalyzeCommentsJob`].
pub async fn handle_analyze(job: AnalyzeCommentsJob, deps: Arc<ServerDeps>, ctx: JobContext) -> JobResult {
    let result = analyze_comments(&job, &deps, &ctx).await;
    settle(job.task_id, result, &deps, &ctx).await
}

/// Decide task and queue disposition of an activity outcome.
///
/// | outcome                        | task                | queue       |
/// |--------------------------------|---------------------|-------------|
/// | ok                             | (activity decided)  | ack         |
/// | cancelled                      | failed "cancelled"  | ack         |
/// | shutdown                       | untouched           | release     |
/// | client / credentials           | failed              | fatal       |
/// | retries exhausted / storage    | failed on last try  | retry/fatal |
/// | task missing                   | -                   | fatal       |
/// | superseded                     | untouched           | ack         |
pub async fn settle(
    task_id: Uuid,
    result: Result<(), PipelineError>,
    deps: &ServerDeps,
    ctx: &JobContext,
) -> JobResult {
    let error = match result {
        Ok(()) => return Ok(()),
        Err(error) => error,
    };

    match error {
        PipelineError::Cancelled => {
            info!(task_id = %task_id, "task cancelled");
            fail_task(deps, task_id, CANCELLED_REASON)
                .await
                .map_err(|e| JobError::Retryable(e.to_string()))
        }
        PipelineError::Shutdown => Err(JobError::Interrupted),
        PipelineError::TaskMissing(id) => Err(JobError::Fatal(format!("task {} not found", id))),
        PipelineError::Superseded(message) => {
            warn!(task_id = %task_id, reason = %message, "task moved by another writer, dropping job");
            Ok(())
        }
        error if error.is_retriable() && !ctx.is_final_attempt() => {
            warn!(
                task_id = %task_id,
                attempt = ctx.attempt,
                max_attempts = ctx.max_attempts,
                error = %error,
                "pipeline step failed, will retry"
            );
            Err(JobError::Retryable(error.to_string()))
        }
        error => {
            let reason = error.to_string();
            warn!(task_id = %task_id, error = %reason, "pipeline step failed permanently");
            if let Err(e) = fail_task(deps, task_id, &reason).await {
                // Keep the job alive so the failure gets recorded on a later try.
                return Err(JobError::Retryable(format!("{}; recording failure: {}", reason, e)));
            }
            Err(JobError::Fatal(reason))
        }
    }
}

/// Move a live task to `failed` with `reason`. Terminal tasks are left alone.
pub async fn fail_task(
    deps: &ServerDeps,
    task_id: Uuid,
    reason: &str,
) -> Result<(), TaskStoreError> {
    const MAX_TRIES: usize = 3;

    for _ in 0..MAX_TRIES {
        let task = match deps.task_store.get(task_id).await {
            Ok(task) => task,
            Err(TaskStoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if task.is_terminal() {
            return Ok(());
        }

        let patch = TaskPatch::stage(PipelineStage::Failed).with_error(reason);
        match deps
            .task_store
            .transition(task_id, task.status, TaskStatus::Failed, patch)
            .await
        {
            Ok(_) => return Ok(()),
            // Status moved under us; re-read and try again.
            Err(TaskStoreError::Conflict { .. }) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(TaskStoreError::Storage(anyhow::anyhow!(
        "task {} kept changing while recording failure",
        task_id
    )))
}

/// Stop if shutdown fired or the task was cancelled or finished elsewhere.
pub(crate) async fn check_continue(
    deps: &ServerDeps,
    task_id: Uuid,
    ctx: &JobContext,
) -> Result<Task, PipelineError> {
    if ctx.cancel.is_cancelled() {
        return Err(PipelineError::Shutdown);
    }

    let task = deps.task_store.get(task_id).await?;
    if task.cancel_requested {
        return Err(PipelineError::Cancelled);
    }
    if task.is_terminal() {
        return Err(PipelineError::Superseded(format!(
            "task {} is already {}",
            task_id, task.status
        )));
    }
    Ok(task)
}

/// Enter `stage`, moving a pending task to processing.
pub(crate) async fn enter_stage(
    deps: &ServerDeps,
    task: &Task,
    stage: PipelineStage,
) -> Result<Task, PipelineError> {
    let task = deps
        .task_store
        .transition(task.id, task.status, TaskStatus::Processing, TaskPatch::stage(stage))
        .await?;
    Ok(task)
}
