//! Pipeline configuration and error taxonomy.

use social_api_client::SocialApiError;
use thiserror::Error;
use uuid::Uuid;

use crate::domains::tasks::TaskStoreError;

/// Reason recorded on tasks stopped by `cancel_task`.
pub const CANCELLED_REASON: &str = "cancelled";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// A task fails when more than this share of its records fail analysis.
    pub analysis_failure_threshold: f64,
    /// Records analyzed between progress writes.
    pub analysis_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_failure_threshold: 0.5,
            analysis_batch_size: 20,
        }
    }
}

/// Task-level failures of a pipeline stage.
///
/// The job handler maps each variant to a task disposition and a queue
/// outcome; see `activities::settle`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Classified client error: auth, not found, upstream rejection
    #[error("social API error: {0}")]
    Client(SocialApiError),

    /// Throttling/transient failures outlasted the client's retry budget
    #[error("social API unavailable: {0}")]
    RetriesExhausted(SocialApiError),

    #[error("no credential for owner {owner_id}: {message}")]
    Credentials { owner_id: i64, message: String },

    #[error("storage error: {0}")]
    Storage(anyhow::Error),

    /// The task was cancelled by request
    #[error("task cancelled")]
    Cancelled,

    /// The worker pool is shutting down
    #[error("interrupted by shutdown")]
    Shutdown,

    #[error("task {0} not found")]
    TaskMissing(Uuid),

    /// Another writer moved the task first
    #[error("task changed concurrently: {0}")]
    Superseded(String),
}

impl From<SocialApiError> for PipelineError {
    fn from(e: SocialApiError) -> Self {
        match e {
            // The client only sees our shutdown token.
            SocialApiError::Cancelled => PipelineError::Shutdown,
            e if e.is_retriable_later() => PipelineError::RetriesExhausted(e),
            e => PipelineError::Client(e),
        }
    }
}

impl From<TaskStoreError> for PipelineError {
    fn from(e: TaskStoreError) -> Self {
        match e {
            TaskStoreError::NotFound(id) => PipelineError::TaskMissing(id),
            TaskStoreError::Conflict { .. } => PipelineError::Superseded(e.to_string()),
            other => PipelineError::Storage(anyhow::Error::new(other)),
        }
    }
}

impl PipelineError {
    pub fn storage(e: anyhow::Error) -> Self {
        PipelineError::Storage(e)
    }

    /// Worth another delivery of the same job.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PipelineError::RetriesExhausted(_) | PipelineError::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tasks::TaskStatus;

    #[test]
    fn client_cancellation_means_shutdown() {
        assert!(matches!(
            PipelineError::from(SocialApiError::Cancelled),
            PipelineError::Shutdown
        ));
    }

    #[test]
    fn classifies_client_errors() {
        let exhausted = SocialApiError::RetriesExhausted {
            attempts: 5,
            last_status: Some(429),
            last_error: "throttled".into(),
        };
        assert!(PipelineError::from(exhausted).is_retriable());

        let auth = SocialApiError::Auth {
            status: 401,
            message: "bad token".into(),
        };
        let mapped = PipelineError::from(auth);
        assert!(matches!(mapped, PipelineError::Client(_)));
        assert!(!mapped.is_retriable());
    }

    #[test]
    fn classifies_store_errors() {
        let id = Uuid::now_v7();
        assert!(matches!(
            PipelineError::from(TaskStoreError::NotFound(id)),
            PipelineError::TaskMissing(found) if found == id
        ));
        assert!(matches!(
            PipelineError::from(TaskStoreError::Conflict {
                id,
                expected: TaskStatus::Processing,
                actual: TaskStatus::Failed,
            }),
            PipelineError::Superseded(_)
        ));
        assert!(PipelineError::from(TaskStoreError::Storage(anyhow::anyhow!("down"))).is_retriable());
    }
}
