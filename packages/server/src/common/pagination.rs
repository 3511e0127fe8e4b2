//! Cursor-based pagination for task listings.
//!
//! Listings are newest first. The cursor is the id of the last item on the
//! previous page; V7 UUIDs are time-ordered, so `id < cursor` continues the
//! listing without offsets.
//!
//! # Usage
//!
//! ```rust,ignore
//! let args = PaginationArgs { first: Some(10), after: None };
//! let validated = args.validate()?;
//!
//! let rows = store.list(&filter, &validated).await?;   // fetches limit + 1
//! let (tasks, has_more) = trim_results(rows, validated.limit);
//! let next_cursor = has_more.then(|| Cursor::encode_uuid(tasks.last().unwrap().id));
//! ```

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i32 = 25;
const MAX_PAGE_SIZE: i32 = 100;

/// Opaque cursor for pagination (base64-encoded UUID).
#[derive(Debug, Clone)]
pub struct Cursor(Uuid);

impl Cursor {
    pub fn new(id: Uuid) -> Self {
        Cursor(id)
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    pub fn encode_uuid(id: Uuid) -> String {
        Cursor::new(id).encode()
    }

    pub fn decode(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .context("Invalid cursor: not valid base64")?;
        let uuid = Uuid::from_slice(&bytes).context("Invalid cursor: not a valid UUID")?;
        Ok(Cursor(uuid))
    }

    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

/// Forward pagination input: the first `first` items after `after`.
#[derive(Debug, Clone, Default)]
pub struct PaginationArgs {
    pub first: Option<i32>,
    pub after: Option<String>,
}

impl PaginationArgs {
    pub fn forward(first: i32, after: Option<String>) -> Self {
        PaginationArgs {
            first: Some(first),
            after,
        }
    }

    /// Apply defaults (25), bounds (1-100) and decode the cursor.
    pub fn validate(&self) -> Result<ValidatedPaginationArgs, &'static str> {
        let limit = self
            .first
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let cursor = self
            .after
            .as_deref()
            .map(Cursor::decode)
            .transpose()
            .map_err(|_| "Invalid cursor")?
            .map(Cursor::into_uuid);

        Ok(ValidatedPaginationArgs { limit, cursor })
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedPaginationArgs {
    /// Number of items to return (1-100, default 25).
    pub limit: i32,
    /// Id of the last item already seen.
    pub cursor: Option<Uuid>,
}

impl ValidatedPaginationArgs {
    /// SQL LIMIT value (limit + 1 to detect has_more).
    pub fn fetch_limit(&self) -> i64 {
        (self.limit + 1) as i64
    }
}

/// Trim results to the requested limit and report whether more exist.
///
/// Queries should fetch `limit + 1` items.
pub fn trim_results<T>(results: Vec<T>, limit: i32) -> (Vec<T>, bool) {
    let has_more = results.len() > limit as usize;
    let results = if has_more {
        results.into_iter().take(limit as usize).collect()
    } else {
        results
    };
    (results, has_more)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_encode_decode() {
        let id = Uuid::now_v7();
        let decoded = Cursor::decode(&Cursor::encode_uuid(id)).unwrap();
        assert_eq!(id, decoded.into_uuid());
    }

    #[test]
    fn test_cursor_rejects_garbage() {
        assert!(Cursor::decode("%%%").is_err());
        assert!(Cursor::decode(&URL_SAFE_NO_PAD.encode(b"short")).is_err());
    }

    #[test]
    fn test_pagination_args_validate_defaults() {
        let validated = PaginationArgs::default().validate().unwrap();
        assert_eq!(validated.limit, 25);
        assert!(validated.cursor.is_none());
    }

    #[test]
    fn test_pagination_args_validate_clamps() {
        let validated = PaginationArgs::forward(200, None).validate().unwrap();
        assert_eq!(validated.limit, 100);

        let validated = PaginationArgs::forward(0, None).validate().unwrap();
        assert_eq!(validated.limit, 1);
    }

    #[test]
    fn test_pagination_args_with_cursor() {
        let id = Uuid::now_v7();
        let args = PaginationArgs::forward(10, Some(Cursor::encode_uuid(id)));
        let validated = args.validate().unwrap();
        assert_eq!(validated.cursor, Some(id));
        assert_eq!(validated.fetch_limit(), 11);
    }

    #[test]
    fn test_pagination_args_invalid_cursor() {
        let args = PaginationArgs::forward(10, Some("not-a-cursor".into()));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_trim_results() {
        let items: Vec<i32> = (1..=12).collect();
        let (trimmed, has_more) = trim_results(items, 10);
        assert_eq!(trimmed.len(), 10);
        assert!(has_more);

        let items: Vec<i32> = (1..=5).collect();
        let (trimmed, has_more) = trim_results(items, 10);
        assert_eq!(trimmed.len(), 5);
        assert!(!has_more);
    }
}
