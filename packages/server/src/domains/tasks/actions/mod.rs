//! Task operations exposed to callers of the crate.

mod cancel_task;
mod create_task;
mod task_status;

pub use cancel_task::{cancel_task, CancelTaskError};
pub use create_task::create_task;
pub use task_status::{get_task_status, list_tasks, TaskPage, TaskStatusView};
