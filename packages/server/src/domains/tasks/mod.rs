//! Durable harvest tasks: records, status transitions and progress.

pub mod actions;
pub mod models;
pub mod progress;
pub mod store;

pub use actions::{
    cancel_task, create_task, get_task_status, list_tasks, CancelTaskError, TaskPage,
    TaskStatusView,
};
pub use models::*;
pub use progress::{calculate_progress, estimate_total, validate_metrics, ProgressPhase, ProgressReport};
pub use store::{InMemoryTaskStore, PostgresTaskStore, TaskStore, TaskStoreError, TaskStoreResult};
