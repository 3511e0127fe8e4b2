//! Task creation action
//!
//! Records the task and enqueues its first job. Collect tasks start with the
//! collect job; analyze tasks resolve the stored comments of their groups and
//! go straight to analysis.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domains::comments::{AnalyzeCommentsJob, CollectCommentsJob};
use crate::domains::tasks::models::{
    PipelineStage, Task, TaskKind, TaskOptions, TaskPatch, TaskProgress, TaskStatus,
};
use crate::kernel::jobs::enqueue_command;
use crate::kernel::ServerDeps;

pub async fn create_task(
    deps: &ServerDeps,
    kind: TaskKind,
    group_refs: Vec<i64>,
    options: TaskOptions,
) -> Result<Uuid> {
    if group_refs.is_empty() {
        anyhow::bail!("a task needs at least one group reference");
    }

    let mut seen = HashSet::new();
    let group_refs: Vec<i64> = group_refs.into_iter().filter(|id| seen.insert(*id)).collect();

    let progress = TaskProgress {
        groups_total: group_refs.len() as i64,
        estimated_comments_per_post: i64::from(options.estimated_comments_per_post),
        ..Default::default()
    };

    match kind {
        TaskKind::Collect => create_collect_task(deps, group_refs, options, progress).await,
        TaskKind::Analyze => create_analyze_task(deps, group_refs, options, progress).await,
    }
}

async fn create_collect_task(
    deps: &ServerDeps,
    group_refs: Vec<i64>,
    options: TaskOptions,
    progress: TaskProgress,
) -> Result<Uuid> {
    let priority = options.priority;
    let task = Task::builder()
        .kind(TaskKind::Collect)
        .group_refs(group_refs)
        .options(options)
        .progress(progress)
        .build();

    let task_id = deps.task_store.create(task).await?;
    let enqueued = match enqueue_command(
        deps.job_queue.as_ref(),
        &CollectCommentsJob::new(task_id, priority),
    )
    .await
    {
        Ok(enqueued) => enqueued,
        Err(e) => {
            let e = e.context("failed to enqueue collect job");
            return Err(fail_unqueued(deps, task_id, e).await);
        }
    };

    info!(task_id = %task_id, job_id = %enqueued.job_id(), "collect task created");
    Ok(task_id)
}

async fn create_analyze_task(
    deps: &ServerDeps,
    group_refs: Vec<i64>,
    options: TaskOptions,
    mut progress: TaskProgress,
) -> Result<Uuid> {
    let comment_ids = deps
        .comment_store
        .ids_for_owners(&group_refs)
        .await
        .context("failed to resolve stored comments")?;

    // Groups resolve from storage, there is nothing to discover.
    progress.groups_processed = progress.groups_total;
    progress.comments_total = comment_ids.len() as i64;

    let priority = options.priority;
    let task = Task::builder()
        .kind(TaskKind::Analyze)
        .group_refs(group_refs)
        .options(options)
        .progress(progress)
        .build();
    let task_id = deps.task_store.create(task).await?;

    if comment_ids.is_empty() {
        deps.task_store
            .transition(
                task_id,
                TaskStatus::Pending,
                TaskStatus::Processing,
                TaskPatch::stage(PipelineStage::Analyzing),
            )
            .await?;
        deps.task_store
            .transition(
                task_id,
                TaskStatus::Processing,
                TaskStatus::Completed,
                TaskPatch::stage(PipelineStage::Completed).with_result(json!({
                    "collected": 0,
                    "analyzed": 0,
                    "failed": 0,
                    "summary": "no stored comments to analyze",
                })),
            )
            .await?;
        info!(task_id = %task_id, "analyze task had no stored comments, completed");
        return Ok(task_id);
    }

    let count = comment_ids.len();
    let enqueued = match enqueue_command(
        deps.job_queue.as_ref(),
        &AnalyzeCommentsJob::new(task_id, comment_ids, priority),
    )
    .await
    {
        Ok(enqueued) => enqueued,
        Err(e) => {
            let e = e.context("failed to enqueue analyze job");
            return Err(fail_unqueued(deps, task_id, e).await);
        }
    };

    info!(task_id = %task_id, job_id = %enqueued.job_id(), comments = count, "analyze task created");
    Ok(task_id)
}

/// A task whose first job never reached the queue would stay pending with
/// nothing to advance it, so fail it with the enqueue error.
async fn fail_unqueued(deps: &ServerDeps, task_id: Uuid, error: anyhow::Error) -> anyhow::Error {
    let patch = TaskPatch::stage(PipelineStage::Failed).with_error(format!("{:#}", error));
    match deps
        .task_store
        .transition(task_id, TaskStatus::Pending, TaskStatus::Failed, patch)
        .await
    {
        Ok(_) => warn!(task_id = %task_id, error = %error, "task failed, first job not enqueued"),
        Err(e) => warn!(task_id = %task_id, error = %e, "could not fail task after enqueue error"),
    }
    error
}
