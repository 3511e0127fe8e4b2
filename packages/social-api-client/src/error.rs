//! Error types for the social API client.
//!
//! Every failure leaving the client is already classified: callers decide
//! task-level disposition from the variant alone and never inspect raw
//! status codes.

use thiserror::Error;

/// Result type for social API client operations.
pub type Result<T> = std::result::Result<T, SocialApiError>;

/// Classified client errors.
#[derive(Debug, Error)]
pub enum SocialApiError {
    /// Credential rejected (HTTP 401/403 or API auth code)
    #[error("authentication rejected (status {status}): {message}")]
    Auth { status: u16, message: String },

    /// Owner/post does not exist or is not readable with this credential
    #[error("resource not found (status {status}): {message}")]
    NotFound { status: u16, message: String },

    /// Any other non-retriable upstream failure
    #[error("upstream error (status {status}, code {code:?}): {message}")]
    Upstream {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    /// Throttling or transient failures persisted past the attempt ceiling
    #[error("retries exhausted after {attempts} attempts (last status {last_status:?}): {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_status: Option<u16>,
        last_error: String,
    },

    /// Caller cancelled while waiting on the limiter, in backoff, or in flight
    #[error("request cancelled")]
    Cancelled,

    /// Cursor was not produced by this client
    #[error("invalid pagination cursor: {0}")]
    InvalidCursor(String),

    /// Response body did not match the expected shape
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Non-transient transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SocialApiError {
    /// Auth / not-found / upstream: never worth retrying at any level.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SocialApiError::Auth { .. }
                | SocialApiError::NotFound { .. }
                | SocialApiError::Upstream { .. }
                | SocialApiError::InvalidCursor(_)
                | SocialApiError::Decode(_)
                | SocialApiError::Transport(_)
        )
    }

    /// Worth re-running the whole job later (queue-level redelivery).
    pub fn is_retriable_later(&self) -> bool {
        matches!(self, SocialApiError::RetriesExhausted { .. })
    }
}

/// Errors raised by a [`crate::Transport`] before any HTTP status is known.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Timeouts and connection failures share the throttle backoff path.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Connect(_))
    }
}
