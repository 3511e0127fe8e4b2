use anyhow::{Context, Result};
use dotenvy::dotenv;
use social_api_client::{BackoffPolicy, ClientConfig, RateLimit};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domains::comments::PipelineConfig;
use crate::kernel::jobs::{QueueConfig, WorkerPoolConfig};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub social_api_base_url: String,
    pub social_api_token: String,
    pub social_api_version: String,
    pub social_api_rate_per_second: f64,
    pub social_api_burst: u32,
    pub social_api_max_attempts: u32,
    pub social_api_timeout_secs: u64,
    pub worker_count: usize,
    pub job_lease_ms: i64,
    pub job_max_attempts: i32,
    pub worker_drain_timeout_secs: u64,
    pub task_retention_hours: i64,
    pub analysis_failure_threshold: f64,
    pub comment_page_size: u32,
    pub post_page_size: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = ClientConfig::default();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            social_api_base_url: env::var("SOCIAL_API_BASE_URL")
                .unwrap_or_else(|_| defaults.base_url.clone()),
            social_api_token: env::var("SOCIAL_API_TOKEN")
                .context("SOCIAL_API_TOKEN must be set")?,
            social_api_version: env::var("SOCIAL_API_VERSION")
                .unwrap_or_else(|_| defaults.api_version.clone()),
            social_api_rate_per_second: parse_or("SOCIAL_API_RATE_PER_SECOND", 3.0)?,
            social_api_burst: parse_or("SOCIAL_API_BURST", 3)?,
            social_api_max_attempts: parse_or("SOCIAL_API_MAX_ATTEMPTS", 5)?,
            social_api_timeout_secs: parse_or("SOCIAL_API_TIMEOUT_SECS", 30)?,
            worker_count: parse_or("WORKER_COUNT", 10)?,
            job_lease_ms: parse_or("JOB_LEASE_MS", 60_000)?,
            job_max_attempts: parse_or("JOB_MAX_ATTEMPTS", 3)?,
            worker_drain_timeout_secs: parse_or("WORKER_DRAIN_TIMEOUT_SECS", 30)?,
            task_retention_hours: parse_or("TASK_RETENTION_HOURS", 168)?,
            analysis_failure_threshold: parse_or("ANALYSIS_FAILURE_THRESHOLD", 0.5)?,
            comment_page_size: parse_or("COMMENT_PAGE_SIZE", 100)?,
            post_page_size: parse_or("POST_PAGE_SIZE", 100)?,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.social_api_base_url.clone(),
            api_version: self.social_api_version.clone(),
            rate_limit: RateLimit {
                capacity: self.social_api_burst,
                refill_per_second: self.social_api_rate_per_second,
            },
            backoff: BackoffPolicy {
                max_attempts: self.social_api_max_attempts.max(1),
                ..Default::default()
            },
            timeout: Duration::from_secs(self.social_api_timeout_secs),
            posts_page_size: self.post_page_size,
            comments_page_size: self.comment_page_size,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            lease_duration: Duration::from_millis(self.job_lease_ms.max(1) as u64),
            default_max_attempts: self.job_max_attempts.max(1),
            ..Default::default()
        }
    }

    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        let lease = Duration::from_millis(self.job_lease_ms.max(1) as u64);
        WorkerPoolConfig {
            worker_count: self.worker_count.max(1),
            heartbeat_interval: lease / 3,
            drain_timeout: Duration::from_secs(self.worker_drain_timeout_secs),
            ..Default::default()
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            analysis_failure_threshold: self.analysis_failure_threshold.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    /// How long terminal tasks and finished queue items are kept.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.task_retention_hours.max(1))
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        Err(_) => Ok(default),
    }
}
