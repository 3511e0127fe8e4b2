use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::kernel::jobs::JobPriority;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Fetch comments for a set of groups, then analyze them
    Collect,
    /// Analyze comments already stored for a set of groups
    Analyze,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Status only moves forward. `processing → processing` is allowed so
    /// stage and result patches go through the same compare-and-swap.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained position of a task inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "pipeline_stage", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    Created,
    Fetching,
    Persisting,
    AwaitingAnalysis,
    Analyzing,
    Completed,
    Failed,
}

// ============================================================================
// Progress & options
// ============================================================================

/// Raw progress counters. Never decrease within a task's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TaskProgress {
    pub groups_total: i64,
    pub groups_processed: i64,
    pub posts_total: i64,
    pub posts_processed: i64,
    pub comments_total: i64,
    pub comments_processed: i64,
    pub estimated_comments_per_post: i64,
}

/// Caller-supplied knobs, stored with the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Stop fetching once this many comments were collected
    #[serde(default)]
    pub max_comments: Option<u64>,
    #[serde(default)]
    pub max_posts_per_group: Option<u32>,
    #[serde(default = "default_comments_per_post")]
    pub estimated_comments_per_post: u32,
    #[serde(default)]
    pub priority: JobPriority,
}

fn default_comments_per_post() -> u32 {
    15
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_comments: None,
            max_posts_per_group: None,
            estimated_comments_per_post: default_comments_per_post(),
            priority: JobPriority::Normal,
        }
    }
}

// ============================================================================
// Task Model
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, TypedBuilder)]
pub struct Task {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,
    pub kind: TaskKind,
    #[builder(default)]
    pub status: TaskStatus,
    #[builder(default)]
    pub stage: PipelineStage,

    /// Owner ids of the groups this task covers
    #[builder(default)]
    pub group_refs: Vec<i64>,
    #[sqlx(json)]
    #[builder(default)]
    pub options: TaskOptions,
    #[sqlx(flatten)]
    #[builder(default)]
    pub progress: TaskProgress,

    #[builder(default)]
    pub errors: Vec<String>,
    #[builder(default, setter(strip_option))]
    pub result: Option<serde_json::Value>,
    #[builder(default)]
    pub cancel_requested: bool,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ============================================================================
// Mutations
// ============================================================================

/// Changes applied together with a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub stage: Option<PipelineStage>,
    pub append_errors: Vec<String>,
    pub result: Option<serde_json::Value>,
    /// Totals only ever grow: each is applied as `max(stored, given)`.
    pub groups_total: Option<i64>,
    pub posts_total: Option<i64>,
    pub comments_total: Option<i64>,
}

impl TaskPatch {
    pub fn stage(stage: PipelineStage) -> Self {
        Self {
            stage: Some(stage),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.append_errors.push(error.into());
        self
    }

    pub fn with_errors(mut self, errors: impl IntoIterator<Item = String>) -> Self {
        self.append_errors.extend(errors);
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_comments_total(mut self, total: i64) -> Self {
        self.comments_total = Some(total);
        self
    }

    /// Apply to a task in place (status and timestamps are the store's job).
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(stage) = self.stage {
            task.stage = stage;
        }
        task.errors.extend(self.append_errors.iter().cloned());
        if let Some(result) = &self.result {
            task.result = Some(result.clone());
        }
        if let Some(total) = self.groups_total {
            task.progress.groups_total = task.progress.groups_total.max(total);
        }
        if let Some(total) = self.posts_total {
            task.progress.posts_total = task.progress.posts_total.max(total);
        }
        if let Some(total) = self.comments_total {
            task.progress.comments_total = task.progress.comments_total.max(total);
        }
    }
}

/// Additive counter update. Negative values are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressDelta {
    pub groups_processed: i64,
    pub posts_total: i64,
    pub posts_processed: i64,
    pub comments_processed: i64,
}

impl ProgressDelta {
    pub fn comments(count: i64) -> Self {
        Self {
            comments_processed: count,
            ..Default::default()
        }
    }

    pub fn posts(count: i64) -> Self {
        Self {
            posts_processed: count,
            ..Default::default()
        }
    }

    pub fn posts_discovered(count: i64) -> Self {
        Self {
            posts_total: count,
            ..Default::default()
        }
    }

    pub fn groups(count: i64) -> Self {
        Self {
            groups_processed: count,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups_processed <= 0
            && self.posts_total <= 0
            && self.posts_processed <= 0
            && self.comments_processed <= 0
    }

    pub fn apply_to(&self, progress: &mut TaskProgress) {
        progress.groups_processed += self.groups_processed.max(0);
        progress.posts_total += self.posts_total.max(0);
        progress.posts_processed += self.posts_processed.max(0);
        progress.comments_processed += self.comments_processed.max(0);
    }
}

/// Filter for listing tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub kind: Option<TaskKind>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.kind.map(|kind| task.kind == kind).unwrap_or(true)
            && self.status.map(|status| task.status == status).unwrap_or(true)
    }
}
