//! Read-side actions: status with computed progress, and paged listings.

use anyhow::Result;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::common::pagination::{trim_results, Cursor, PaginationArgs};
use crate::domains::tasks::models::{Task, TaskFilter, TaskStatus};
use crate::domains::tasks::progress::{calculate_progress, validate_metrics, ProgressReport};
use crate::domains::tasks::store::TaskStoreError;
use crate::kernel::ServerDeps;

/// A task together with its computed progress.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusView {
    pub task: Task,
    pub progress: ProgressReport,
    /// Counter inconsistencies found while computing progress
    pub warnings: Vec<String>,
}

impl TaskStatusView {
    pub fn from_task(task: Task) -> Self {
        let warnings = validate_metrics(&task.progress);
        let progress = if task.status == TaskStatus::Completed {
            ProgressReport::completed()
        } else {
            calculate_progress(&task.progress)
        };
        Self {
            task,
            progress,
            warnings,
        }
    }
}

pub async fn get_task_status(deps: &ServerDeps, id: Uuid) -> Result<TaskStatusView, TaskStoreError> {
    let task = deps.task_store.get(id).await?;
    let view = TaskStatusView::from_task(task);
    if !view.warnings.is_empty() {
        warn!(task_id = %id, warnings = ?view.warnings, "task progress counters inconsistent");
    }
    Ok(view)
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// List tasks newest first.
pub async fn list_tasks(
    deps: &ServerDeps,
    filter: &TaskFilter,
    args: &PaginationArgs,
) -> Result<TaskPage> {
    let validated = args.validate().map_err(anyhow::Error::msg)?;
    let rows = deps.task_store.list(filter, &validated).await?;
    let (tasks, has_more) = trim_results(rows, validated.limit);
    let next_cursor = if has_more {
        tasks.last().map(|task| Cursor::encode_uuid(task.id))
    } else {
        None
    };

    Ok(TaskPage {
        tasks,
        next_cursor,
        has_more,
    })
}
