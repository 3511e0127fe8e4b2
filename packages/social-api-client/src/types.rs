use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{"count": N}` counters the API attaches to posts and comments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    #[serde(default)]
    pub count: u64,
}

/// A single wall post of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallPost {
    pub id: i64,
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comments: Option<Counter>,
}

impl WallPost {
    /// Comment count reported by the API, if any.
    pub fn comments_count(&self) -> Option<u64> {
        self.comments.map(|c| c.count)
    }
}

/// A single comment under a wall post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    /// Filled from the request when the API omits it.
    #[serde(default)]
    pub owner_id: i64,
    /// Filled from the request when the API omits it.
    #[serde(default)]
    pub post_id: i64,
    #[serde(default)]
    pub from_id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub likes: Option<Counter>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,
}

impl Comment {
    pub fn like_count(&self) -> u64 {
        self.likes.map(|l| l.count).unwrap_or(0)
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque continuation cursor; `None` when the listing is exhausted.
    pub next_cursor: Option<String>,
    /// Total item count reported by the API for the whole listing.
    pub total: Option<u64>,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Envelope wrapping every API response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default = "Option::default")]
    pub response: Option<T>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

/// In-band error object (the API may return it with HTTP 200).
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error_code: i64,
    #[serde(default)]
    pub error_msg: String,
}

/// `{"count": N, "items": [...]}` listing body.
#[derive(Debug, Clone, Deserialize)]
pub struct ListBody<T> {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}
