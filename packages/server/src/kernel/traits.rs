// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Pipeline logic lives in domain activities that use these traits.
//
// Naming convention: Base* for trait names (e.g., BaseCommentStore, BaseTextAnalyzer)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domains::comments::models::CommentRecord;

// =============================================================================
// Comment Persistence Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseCommentStore: Send + Sync {
    /// Upsert records by natural key `(owner_id, post_id, comment_id)`.
    ///
    /// Returns the stored id of every input record, in input order. A record
    /// whose key already exists keeps its original id.
    async fn upsert_many(&self, records: &[CommentRecord]) -> Result<Vec<Uuid>>;

    /// Records for the given ids; unknown ids are skipped.
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<CommentRecord>>;

    /// Attach (or overwrite) the analysis result of one record.
    async fn save_analysis(&self, id: Uuid, analysis: &TextAnalysis) -> Result<()>;

    /// Ids of every stored comment under the given owners, in natural-key order.
    async fn ids_for_owners(&self, owner_ids: &[i64]) -> Result<Vec<Uuid>>;

    /// Ids of the comments last collected by `task_id`, in natural-key order.
    async fn ids_for_task(&self, task_id: Uuid) -> Result<Vec<Uuid>>;
}

// =============================================================================
// Text Analysis Trait (Infrastructure - morphology/sentiment)
// =============================================================================

/// Output of one text-analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAnalysis {
    pub keywords: Vec<String>,
    /// Polarity in `[-1, 1]`
    pub sentiment: f64,
}

#[async_trait]
pub trait BaseTextAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<TextAnalysis>;
}

// =============================================================================
// Credential Resolution Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseCredentialProvider: Send + Sync {
    /// Bearer credential to use for requests against `owner_id`.
    async fn credential_for(&self, owner_id: i64) -> Result<String>;
}

/// Provider handing out one configured token for every owner.
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl BaseCredentialProvider for StaticCredentials {
    async fn credential_for(&self, _owner_id: i64) -> Result<String> {
        if self.token.is_empty() {
            anyhow::bail!("no API credential configured");
        }
        Ok(self.token.clone())
    }
}
