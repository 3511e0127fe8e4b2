//! Rate-limited, retrying client for a paginated social-network wall API.
//!
//! Every request goes through one shared token bucket and one retry path:
//! throttling and transient network failures back off and retry up to the
//! attempt ceiling, everything else is classified and returned immediately.
//!
//! # Example
//!
//! ```rust,ignore
//! use social_api_client::{ClientConfig, SocialApiClient};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = SocialApiClient::new(ClientConfig::default());
//! let cancel = CancellationToken::new();
//!
//! let posts = client.fetch_posts_page(-42, None, "token", &cancel).await?;
//! for post in &posts.items {
//!     let comments = client
//!         .fetch_comments_page(-42, post.id, None, "token", &cancel)
//!         .await?;
//!     println!("{} comments", comments.items.len());
//! }
//! ```

pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod testing;
pub mod transport;
pub mod types;

pub use error::{Result, SocialApiError, TransportError};
pub use rate_limit::{RateLimit, SharedRateLimiter};
pub use retry::BackoffPolicy;
pub use transport::{ApiRequest, HttpTransport, RawResponse, Transport};
pub use types::{Comment, Counter, Page, WallPost};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use types::{ApiEnvelope, ApiErrorBody, ListBody};

const DEFAULT_BASE_URL: &str = "https://api.vk.com";
const DEFAULT_API_VERSION: &str = "5.131";

const METHOD_WALL_GET: &str = "wall.get";
const METHOD_WALL_GET_COMMENTS: &str = "wall.getComments";

/// API error codes signalling throttling rather than failure.
const THROTTLE_CODES: &[i64] = &[6, 9, 29];
const AUTH_CODES: &[i64] = &[5];
const NOT_FOUND_CODES: &[i64] = &[15, 18, 30];

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_version: String,
    pub rate_limit: RateLimit,
    pub backoff: BackoffPolicy,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub posts_page_size: u32,
    pub comments_page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            rate_limit: RateLimit::default(),
            backoff: BackoffPolicy::default(),
            timeout: Duration::from_secs(30),
            posts_page_size: 100,
            comments_page_size: 100,
        }
    }
}

/// Request counters, shared by every clone of the client.
#[derive(Debug, Default)]
pub struct ClientStats {
    requests: AtomicU64,
    throttled: AtomicU64,
    transient: AtomicU64,
    backoff_sleeps: AtomicU64,
    exhausted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStatsSnapshot {
    pub requests: u64,
    pub throttled: u64,
    pub transient: u64,
    pub backoff_sleeps: u64,
    pub exhausted: u64,
}

impl ClientStats {
    pub fn snapshot(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            transient: self.transient.load(Ordering::Relaxed),
            backoff_sleeps: self.backoff_sleeps.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared API client. Cheap to clone; clones share the limiter and stats.
#[derive(Clone)]
pub struct SocialApiClient {
    transport: Arc<dyn Transport>,
    limiter: SharedRateLimiter,
    config: Arc<ClientConfig>,
    stats: Arc<ClientStats>,
}

/// What to do with a completed exchange.
enum Disposition {
    Success(Value),
    Retry { status: Option<u16>, reason: String },
    Fail(SocialApiError),
}

impl SocialApiClient {
    /// Client backed by the reqwest transport.
    pub fn new(config: ClientConfig) -> Self {
        let transport = HttpTransport::new(
            config.base_url.clone(),
            config.api_version.clone(),
            config.timeout,
        );
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            limiter: SharedRateLimiter::new(config.rate_limit),
            config: Arc::new(config),
            stats: Arc::new(ClientStats::default()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        self.stats.snapshot()
    }

    /// One page of wall posts for a group/user.
    pub async fn fetch_posts_page(
        &self,
        owner_id: i64,
        cursor: Option<&str>,
        credential: &str,
        cancel: &CancellationToken,
    ) -> Result<Page<WallPost>> {
        let offset = parse_cursor(cursor)?;
        let page_size = self.config.posts_page_size;
        let request = ApiRequest::new(METHOD_WALL_GET)
            .param("owner_id", owner_id)
            .param("offset", offset)
            .param("count", page_size);

        let body: ListBody<WallPost> = self.execute(&request, credential, cancel).await?;
        let mut page = into_page(body, offset, page_size);
        for post in &mut page.items {
            if post.owner_id == 0 {
                post.owner_id = owner_id;
            }
        }

        debug!(owner_id, offset, items = page.items.len(), "Fetched posts page");
        Ok(page)
    }

    /// One page of comments under a post.
    pub async fn fetch_comments_page(
        &self,
        owner_id: i64,
        post_id: i64,
        cursor: Option<&str>,
        credential: &str,
        cancel: &CancellationToken,
    ) -> Result<Page<Comment>> {
        let offset = parse_cursor(cursor)?;
        let page_size = self.config.comments_page_size;
        let request = ApiRequest::new(METHOD_WALL_GET_COMMENTS)
            .param("owner_id", owner_id)
            .param("post_id", post_id)
            .param("offset", offset)
            .param("count", page_size)
            .param("need_likes", 1);

        let body: ListBody<Comment> = self.execute(&request, credential, cancel).await?;
        let mut page = into_page(body, offset, page_size);
        for comment in &mut page.items {
            if comment.owner_id == 0 {
                comment.owner_id = owner_id;
            }
            if comment.post_id == 0 {
                comment.post_id = post_id;
            }
        }

        debug!(
            owner_id,
            post_id,
            offset,
            items = page.items.len(),
            "Fetched comments page"
        );
        Ok(page)
    }

    /// Acquire, call, classify; back off and retry throttled/transient outcomes.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        credential: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let policy = &self.config.backoff;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.limiter.acquire(cancel).await?;
            ClientStats::bump(&self.stats.requests);

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SocialApiError::Cancelled),
                outcome = self.transport.call(request, credential) => outcome,
            };

            let (status, reason) = match outcome {
                Ok(raw) => match classify(&raw) {
                    Disposition::Success(value) => {
                        return Ok(serde_json::from_value(value)?);
                    }
                    Disposition::Fail(err) => return Err(err),
                    Disposition::Retry { status, reason } => {
                        ClientStats::bump(&self.stats.throttled);
                        (status, reason)
                    }
                },
                Err(err) if err.is_transient() => {
                    ClientStats::bump(&self.stats.transient);
                    (None, err.to_string())
                }
                Err(err) => return Err(err.into()),
            };

            if !policy.allows_retry_after(attempt) {
                ClientStats::bump(&self.stats.exhausted);
                warn!(
                    method = request.method,
                    attempts = attempt,
                    last_status = ?status,
                    "Retries exhausted"
                );
                return Err(SocialApiError::RetriesExhausted {
                    attempts: attempt,
                    last_status: status,
                    last_error: reason,
                });
            }

            let delay = policy.delay_for(attempt);
            warn!(
                method = request.method,
                attempt,
                status = ?status,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Request throttled, backing off"
            );
            ClientStats::bump(&self.stats.backoff_sleeps);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SocialApiError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn parse_cursor(cursor: Option<&str>) -> Result<u64> {
    match cursor {
        None => Ok(0),
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| SocialApiError::InvalidCursor(raw.to_string())),
    }
}

fn into_page<T>(body: ListBody<T>, offset: u64, page_size: u32) -> Page<T> {
    let fetched = body.items.len() as u64;
    let next_offset = offset + fetched;

    let next_cursor = match body.count {
        _ if fetched == 0 => None,
        Some(total) if next_offset < total => Some(next_offset.to_string()),
        Some(_) => None,
        None if fetched >= page_size as u64 => Some(next_offset.to_string()),
        None => None,
    };

    Page {
        items: body.items,
        next_cursor,
        total: body.count,
    }
}

fn classify(raw: &RawResponse) -> Disposition {
    if raw.status == 429 {
        return Disposition::Retry {
            status: Some(429),
            reason: truncate(&raw.body),
        };
    }

    let envelope = serde_json::from_str::<ApiEnvelope<Value>>(&raw.body);

    if let Ok(ApiEnvelope {
        error: Some(ref body),
        ..
    }) = envelope
    {
        return classify_api_error(raw.status, body);
    }

    match raw.status {
        200..=299 => match envelope {
            Ok(envelope) => Disposition::Success(
                envelope
                    .response
                    .unwrap_or_else(|| Value::Object(Default::default())),
            ),
            Err(err) => Disposition::Fail(SocialApiError::Decode(err)),
        },
        401 | 403 => Disposition::Fail(SocialApiError::Auth {
            status: raw.status,
            message: truncate(&raw.body),
        }),
        404 => Disposition::Fail(SocialApiError::NotFound {
            status: raw.status,
            message: truncate(&raw.body),
        }),
        status => Disposition::Fail(SocialApiError::Upstream {
            status,
            code: None,
            message: truncate(&raw.body),
        }),
    }
}

fn classify_api_error(status: u16, body: &ApiErrorBody) -> Disposition {
    let code = body.error_code;
    let message = body.error_msg.clone();

    if THROTTLE_CODES.contains(&code) {
        Disposition::Retry {
            status: Some(status),
            reason: format!("api error {}: {}", code, message),
        }
    } else if AUTH_CODES.contains(&code) {
        Disposition::Fail(SocialApiError::Auth { status, message })
    } else if NOT_FOUND_CODES.contains(&code) {
        Disposition::Fail(SocialApiError::NotFound { status, message })
    } else {
        Disposition::Fail(SocialApiError::Upstream {
            status,
            code: Some(code),
            message,
        })
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 200;
    if body.len() <= LIMIT {
        return body.to_string();
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
