//! Durable task records.
//!
//! Every status change is a compare-and-swap on the stored status: a writer
//! names the status it expects, and loses with [`TaskStoreError::Conflict`]
//! when another writer moved the task first. There is no lock held across a
//! task's lifetime, only per mutation.

mod memory;
mod postgres;

pub use memory::InMemoryTaskStore;
pub use postgres::PostgresTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::{ProgressDelta, Task, TaskFilter, TaskPatch, TaskStatus};
use crate::common::pagination::ValidatedPaginationArgs;

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("task {id} is {actual}, expected {expected}")]
    Conflict {
        id: Uuid,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("task cannot move from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("task storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<sqlx::Error> for TaskStoreError {
    fn from(e: sqlx::Error) -> Self {
        TaskStoreError::Storage(e.into())
    }
}

pub type TaskStoreResult<T> = Result<T, TaskStoreError>;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: Task) -> TaskStoreResult<Uuid>;

    async fn get(&self, id: Uuid) -> TaskStoreResult<Task>;

    /// Move `id` from `from` to `to` and apply `patch`, atomically.
    ///
    /// Entering `processing` stamps `started_at` once; entering a terminal
    /// status stamps `completed_at` and, unless the patch names one, the
    /// matching terminal stage. Returns the updated task.
    async fn transition(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        patch: TaskPatch,
    ) -> TaskStoreResult<Task>;

    /// Add to the progress counters. Terminal tasks are left untouched.
    async fn increment_progress(&self, id: Uuid, delta: ProgressDelta) -> TaskStoreResult<()>;

    /// Flag a non-terminal task for cancellation.
    ///
    /// Returns `false` if the task is already terminal.
    async fn request_cancel(&self, id: Uuid) -> TaskStoreResult<bool>;

    /// Newest first, starting after `page.cursor`. Returns up to
    /// `page.fetch_limit()` rows so the caller can detect a next page.
    async fn list(
        &self,
        filter: &TaskFilter,
        page: &ValidatedPaginationArgs,
    ) -> TaskStoreResult<Vec<Task>>;

    /// Delete terminal tasks completed before `older_than`.
    async fn purge_expired(&self, older_than: DateTime<Utc>) -> TaskStoreResult<u64>;
}

/// Validate a requested transition before touching storage.
pub(crate) fn check_transition(from: TaskStatus, to: TaskStatus) -> TaskStoreResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(TaskStoreError::InvalidTransition { from, to })
    }
}
