use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::domains::comments::CANCELLED_REASON;
use crate::domains::tasks::models::{PipelineStage, TaskPatch, TaskStatus};
use crate::domains::tasks::store::TaskStoreError;
use crate::kernel::ServerDeps;

#[derive(Debug, Error)]
pub enum CancelTaskError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("task {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: TaskStatus },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<TaskStoreError> for CancelTaskError {
    fn from(e: TaskStoreError) -> Self {
        match e {
            TaskStoreError::NotFound(id) => CancelTaskError::NotFound(id),
            TaskStoreError::Storage(e) => CancelTaskError::Storage(e),
            other => CancelTaskError::Storage(other.into()),
        }
    }
}

/// Request cancellation of a task.
///
/// Running work sees the flag at its next page or batch boundary and fails
/// the task with reason `cancelled`. A task no worker has picked up yet is
/// failed right away.
pub async fn cancel_task(deps: &ServerDeps, id: Uuid) -> Result<(), CancelTaskError> {
    if !deps.task_store.request_cancel(id).await? {
        let task = deps.task_store.get(id).await?;
        return Err(CancelTaskError::AlreadyTerminal {
            id,
            status: task.status,
        });
    }

    let task = deps.task_store.get(id).await?;
    if task.status == TaskStatus::Pending {
        let patch = TaskPatch::stage(PipelineStage::Failed).with_error(CANCELLED_REASON);
        match deps
            .task_store
            .transition(id, TaskStatus::Pending, TaskStatus::Failed, patch)
            .await
        {
            Ok(_) => info!(task_id = %id, "pending task cancelled"),
            // A worker claimed it first; it will observe the flag.
            Err(TaskStoreError::Conflict { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    } else {
        info!(task_id = %id, status = %task.status, "cancellation requested");
    }

    Ok(())
}
