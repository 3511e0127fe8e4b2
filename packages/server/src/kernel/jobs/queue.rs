//! Job queue contract shared by the in-memory and Postgres backends.
//!
//! Delivery is at-least-once: a dequeued job is leased to one worker until
//! ack/nack/release or lease expiry, after which it may be handed out again.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::job::{Job, JobKind, JobPriority};

/// Queue every pipeline job lands on unless a command says otherwise.
pub const DEFAULT_QUEUE: &str = "pipeline";

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Job was enqueued, returns new job ID
    Created(Uuid),
    /// An unfinished job with the same idempotency key exists
    Duplicate(Uuid),
}

impl EnqueueResult {
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct EnqueueOptions {
    #[builder(default)]
    pub priority: JobPriority,
    /// Hold the job back this long before it becomes eligible.
    #[builder(default, setter(strip_option))]
    pub delay: Option<Duration>,
    /// Overrides the queue default.
    #[builder(default, setter(strip_option))]
    pub max_attempts: Option<i32>,
    #[builder(default, setter(strip_option, into))]
    pub idempotency_key: Option<String>,
}

/// What a nack did to the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// Scheduled for redelivery.
    Retrying { next_eligible_at: DateTime<Utc> },
    /// Moved to `failed`; no further delivery.
    Failed,
    /// The caller no longer holds the lease; the job was left untouched.
    LeaseLost,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub lease_duration: Duration,
    pub default_max_attempts: i32,
    /// Retry delay after the first failed attempt; doubles per attempt.
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(60),
            default_max_attempts: 3,
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(300),
        }
    }
}

impl QueueConfig {
    /// `retry_base * 2^(attempts - 1)`, capped at `retry_max`.
    pub fn retry_delay(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 20) as u32;
        self.retry_base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.retry_max)
    }

    pub fn lease_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(60))
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job.
    ///
    /// If an idempotency key is given and an unfinished job with that key
    /// exists, returns `EnqueueResult::Duplicate` with the existing job ID.
    async fn enqueue(
        &self,
        queue_name: &str,
        kind: JobKind,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult>;

    /// Lease the next eligible job: highest priority first, then earliest
    /// `next_eligible_at`, then enqueue order. Expired leases are eligible.
    async fn dequeue(&self, queue_name: &str, worker_id: &str) -> Result<Option<Job>>;

    // ack, nack, release and heartbeat only act on a job that is still
    // active under `worker_id`. A worker whose lease expired and was handed
    // to someone else gets `false` (or `NackOutcome::LeaseLost`) and changes
    // nothing.

    /// Mark an active job completed. A completed job is never redelivered.
    async fn ack(&self, job_id: Uuid, worker_id: &str) -> Result<bool>;

    /// Report a failed attempt. Retriable failures with attempts left are
    /// delayed by the retry backoff; everything else moves to `failed`.
    async fn nack(
        &self,
        job_id: Uuid,
        worker_id: &str,
        retriable: bool,
        error: &str,
    ) -> Result<NackOutcome>;

    /// Return an active job to `waiting` without consuming its attempt.
    async fn release(&self, job_id: Uuid, worker_id: &str) -> Result<bool>;

    /// Extend the lease of an active job.
    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<bool>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Delete completed/failed jobs finished before `older_than`.
    async fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<u64>;

    /// Park an idle worker until new work may be available.
    async fn wait_for_work(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}

/// Typed job payloads.
///
/// Commands provide their kind and optional idempotency key, priority and
/// attempt ceiling; the payload itself is the serialized command.
pub trait JobCommand: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: JobKind;

    fn queue_name(&self) -> &'static str {
        DEFAULT_QUEUE
    }

    /// If provided, ensures only one unfinished job exists with this key.
    fn idempotency_key(&self) -> Option<String> {
        None
    }

    fn priority(&self) -> JobPriority {
        JobPriority::Normal
    }

    fn max_attempts(&self) -> Option<i32> {
        None
    }
}

/// Serialize a command and enqueue it with its own metadata.
pub async fn enqueue_command<C: JobCommand>(queue: &dyn JobQueue, command: &C) -> Result<EnqueueResult> {
    let payload = serde_json::to_value(command)?;
    let options = EnqueueOptions {
        priority: command.priority(),
        delay: None,
        max_attempts: command.max_attempts(),
        idempotency_key: command.idempotency_key(),
    };
    queue
        .enqueue(command.queue_name(), C::KIND, payload, options)
        .await
}
