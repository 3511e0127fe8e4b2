//! Job payloads for the comment pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kernel::jobs::{JobCommand, JobKind, JobPriority};

/// Fetch and persist every comment of a collect task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectCommentsJob {
    pub task_id: Uuid,
    #[serde(default)]
    pub priority: JobPriority,
}

impl CollectCommentsJob {
    pub fn new(task_id: Uuid, priority: JobPriority) -> Self {
        Self { task_id, priority }
    }
}

impl JobCommand for CollectCommentsJob {
    const KIND: JobKind = JobKind::CollectComments;

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("collect:{}", self.task_id))
    }

    fn priority(&self) -> JobPriority {
        self.priority
    }
}

/// Analyze a fixed set of persisted comments for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeCommentsJob {
    pub task_id: Uuid,
    pub comment_ids: Vec<Uuid>,
    #[serde(default)]
    pub priority: JobPriority,
}

impl AnalyzeCommentsJob {
    pub fn new(task_id: Uuid, comment_ids: Vec<Uuid>, priority: JobPriority) -> Self {
        Self {
            task_id,
            comment_ids,
            priority,
        }
    }
}

impl JobCommand for AnalyzeCommentsJob {
    const KIND: JobKind = JobKind::AnalyzeComments;

    /// One analyze job per task, however often collect is redelivered.
    fn idempotency_key(&self) -> Option<String> {
        Some(format!("analyze:{}", self.task_id))
    }

    fn priority(&self) -> JobPriority {
        self.priority
    }
}
