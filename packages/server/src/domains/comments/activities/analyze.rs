//! Analyze stage: run text analysis over a fixed set of persisted comments.

use std::collections::HashMap;

use serde_json::json;
use tracing::{debug, info, warn};

use super::{check_continue, enter_stage};
use crate::domains::comments::jobs::AnalyzeCommentsJob;
use crate::domains::comments::pipeline::PipelineError;
use crate::domains::tasks::{PipelineStage, ProgressDelta, TaskKind, TaskPatch, TaskStatus};
use crate::kernel::jobs::JobContext;
use crate::kernel::ServerDeps;

/// Analyze every referenced record and finish the task.
///
/// Shutdown and the task's cancel flag are checked before every record.
/// Per-record failures are collected, not raised. The task completes with
/// them listed in `errors` unless their share exceeds the configured
/// threshold, in which case it fails. Records already analyzed since the task
/// started (by an earlier delivery of this job) are not analyzed again.
pub async fn analyze_comments(
    job: &AnalyzeCommentsJob,
    deps: &ServerDeps,
    ctx: &JobContext,
) -> Result<(), PipelineError> {
    let task = deps.task_store.get(job.task_id).await?;
    if task.is_terminal() {
        info!(task_id = %task.id, status = %task.status, "task already finished, skipping analysis");
        return Ok(());
    }
    if task.cancel_requested {
        return Err(PipelineError::Cancelled);
    }

    let task = enter_stage(deps, &task, PipelineStage::Analyzing).await?;
    let counts_progress = task.kind == TaskKind::Analyze;

    let records: HashMap<_, _> = deps
        .comment_store
        .find_by_ids(&job.comment_ids)
        .await
        .map_err(PipelineError::storage)?
        .into_iter()
        .map(|record| (record.id, record))
        .collect();

    info!(
        task_id = %task.id,
        requested = job.comment_ids.len(),
        found = records.len(),
        attempt = ctx.attempt,
        "analyzing comments"
    );

    let batch_size = deps.pipeline.analysis_batch_size.max(1);
    let mut failures: Vec<String> = Vec::new();
    let mut pending_progress: i64 = 0;

    for (index, id) in job.comment_ids.iter().enumerate() {
        check_continue(deps, task.id, ctx).await?;
        if counts_progress && index > 0 && index % batch_size == 0 && pending_progress > 0 {
            deps.task_store
                .increment_progress(task.id, ProgressDelta::comments(pending_progress))
                .await?;
            pending_progress = 0;
        }

        pending_progress += 1;

        let Some(record) = records.get(id) else {
            failures.push(format!("comment {}: record not found", id));
            continue;
        };
        let done_this_run = record
            .analyzed_at
            .zip(task.started_at)
            .is_some_and(|(analyzed, started)| analyzed >= started);
        if done_this_run {
            continue;
        }

        match deps.text_analyzer.analyze(&record.text).await {
            Ok(analysis) => {
                deps.comment_store
                    .save_analysis(record.id, &analysis)
                    .await
                    .map_err(PipelineError::storage)?;
            }
            Err(e) => {
                debug!(task_id = %task.id, comment_id = record.comment_id, error = %e, "analysis failed");
                failures.push(format!(
                    "comment {}/{}/{}: {}",
                    record.owner_id, record.post_id, record.comment_id, e
                ));
            }
        }
    }

    if counts_progress && pending_progress > 0 {
        deps.task_store
            .increment_progress(task.id, ProgressDelta::comments(pending_progress))
            .await?;
    }

    let total = job.comment_ids.len();
    let failed = failures.len();
    let failure_rate = if total == 0 {
        0.0
    } else {
        failed as f64 / total as f64
    };
    let summary = format!("analysis completed with {}/{} records failed", failed, total);
    let result = json!({
        "collected": total,
        "analyzed": total - failed,
        "failed": failed,
        "summary": summary,
    });

    let threshold = deps.pipeline.analysis_failure_threshold;
    if failure_rate > threshold {
        let reason = format!(
            "analysis failure rate {:.2} exceeds threshold {:.2} ({})",
            failure_rate, threshold, summary
        );
        warn!(task_id = %task.id, failed, total, "analysis failure rate over threshold");
        deps.task_store
            .transition(
                task.id,
                TaskStatus::Processing,
                TaskStatus::Failed,
                TaskPatch::stage(PipelineStage::Failed)
                    .with_errors(failures)
                    .with_error(reason)
                    .with_result(result),
            )
            .await?;
        return Ok(());
    }

    deps.task_store
        .transition(
            task.id,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskPatch::stage(PipelineStage::Completed)
                .with_errors(failures)
                .with_comments_total(total as i64)
                .with_result(result),
        )
        .await?;

    info!(task_id = %task.id, failed, total, "analysis completed");
    Ok(())
}
