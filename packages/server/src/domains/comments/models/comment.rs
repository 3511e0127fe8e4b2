use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use social_api_client::Comment;
use sqlx::FromRow;
use uuid::Uuid;

use crate::kernel::TextAnalysis;

/// A persisted comment, unique by `(owner_id, post_id, comment_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CommentRecord {
    pub id: Uuid,
    pub owner_id: i64,
    pub post_id: i64,
    /// Comment id on the external API
    pub comment_id: i64,
    pub author_id: i64,
    pub text: String,
    pub like_count: i64,
    pub created_at: DateTime<Utc>,
    /// Task that last collected this comment
    pub task_id: Option<Uuid>,

    // Analysis results, attached by the analyze stage
    pub keywords: Option<Vec<String>>,
    pub sentiment: Option<f64>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl CommentRecord {
    pub fn from_comment(comment: &Comment, task_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id: comment.owner_id,
            post_id: comment.post_id,
            comment_id: comment.id,
            author_id: comment.from_id,
            text: comment.text.clone(),
            like_count: i64::try_from(comment.like_count()).unwrap_or(i64::MAX),
            created_at: comment.date,
            task_id: Some(task_id),
            keywords: None,
            sentiment: None,
            analyzed_at: None,
        }
    }

    pub fn natural_key(&self) -> (i64, i64, i64) {
        (self.owner_id, self.post_id, self.comment_id)
    }

    pub fn is_analyzed(&self) -> bool {
        self.analyzed_at.is_some()
    }

    pub fn apply_analysis(&mut self, analysis: &TextAnalysis, at: DateTime<Utc>) {
        self.keywords = Some(analysis.keywords.clone());
        self.sentiment = Some(analysis.sentiment);
        self.analyzed_at = Some(at);
    }
}
