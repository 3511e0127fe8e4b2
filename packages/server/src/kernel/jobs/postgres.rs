//! PostgreSQL-backed job queue.
//!
//! Claims use `FOR UPDATE SKIP LOCKED`, so any number of workers (or
//! processes) can poll the same table without handing one job to two of them.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use super::job::{Job, JobKind, JobStatus};
use super::queue::{EnqueueOptions, EnqueueResult, JobQueue, NackOutcome, QueueConfig};

const JOB_COLUMNS: &str = "id, queue_name, kind, payload, priority, status, attempts, max_attempts, \
     next_eligible_at, lease_expires_at, worker_id, idempotency_key, last_error, \
     created_at, updated_at, finished_at";

pub struct PostgresJobQueue {
    pool: PgPool,
    config: QueueConfig,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    fn lease_ms(&self) -> String {
        self.config.lease_duration.as_millis().to_string()
    }

    async fn find_unfinished_by_key(&self, key: &str) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM jobs
            WHERE idempotency_key = $1
              AND status IN ('waiting', 'active', 'delayed')
            LIMIT 1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(
        &self,
        queue_name: &str,
        kind: JobKind,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult> {
        if let Some(key) = &options.idempotency_key {
            if let Some(existing) = self.find_unfinished_by_key(key).await? {
                return Ok(EnqueueResult::Duplicate(existing));
            }
        }

        let delay_ms = options.delay.map(|d| d.as_millis() as i64).unwrap_or(0);
        let status = if delay_ms > 0 {
            JobStatus::Delayed
        } else {
            JobStatus::Waiting
        };
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.config.default_max_attempts)
            .max(1);

        // The partial unique index on open idempotency keys backs up the check
        // above when two enqueues race.
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO jobs (id, queue_name, kind, payload, priority, status, max_attempts,
                              next_eligible_at, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7,
                    NOW() + ($8 || ' milliseconds')::INTERVAL, $9)
            ON CONFLICT (idempotency_key)
                WHERE idempotency_key IS NOT NULL AND status IN ('waiting', 'active', 'delayed')
                DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(queue_name)
        .bind(kind)
        .bind(&payload)
        .bind(options.priority)
        .bind(status)
        .bind(max_attempts)
        .bind(delay_ms.to_string())
        .bind(&options.idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(id) => {
                debug!(job_id = %id, kind = %kind, "enqueued job");
                Ok(EnqueueResult::Created(id))
            }
            None => {
                let key = options
                    .idempotency_key
                    .as_deref()
                    .ok_or_else(|| anyhow!("insert skipped without an idempotency key"))?;
                let existing = self
                    .find_unfinished_by_key(key)
                    .await?
                    .ok_or_else(|| anyhow!("idempotency conflict on {} but no open job", key))?;
                Ok(EnqueueResult::Duplicate(existing))
            }
        }
    }

    async fn dequeue(&self, queue_name: &str, worker_id: &str) -> Result<Option<Job>> {
        let query = format!(
            r#"
            WITH expired AS (
                UPDATE jobs
                SET status = 'failed',
                    last_error = 'lease expired after final attempt',
                    lease_expires_at = NULL,
                    worker_id = NULL,
                    finished_at = NOW(),
                    updated_at = NOW()
                WHERE queue_name = $1
                  AND status = 'active'
                  AND lease_expires_at < NOW()
                  AND attempts >= max_attempts
                RETURNING id
            ),
            next_job AS (
                SELECT id
                FROM jobs
                WHERE queue_name = $1
                  AND (
                      (status IN ('waiting', 'delayed') AND next_eligible_at <= NOW())
                      OR (status = 'active' AND lease_expires_at < NOW() AND attempts < max_attempts)
                  )
                ORDER BY priority, next_eligible_at, created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'active',
                attempts = attempts + 1,
                lease_expires_at = NOW() + ($2 || ' milliseconds')::INTERVAL,
                worker_id = $3,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}
            "#
        );

        let job = sqlx::query_as::<_, Job>(&query)
            .bind(queue_name)
            .bind(self.lease_ms())
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn ack(&self, job_id: Uuid, worker_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                lease_expires_at = NULL,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND worker_id = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        let settled = result.rows_affected() > 0;
        if !settled {
            warn!(job_id = %job_id, worker_id = %worker_id, "ack without lease, ignoring");
        }
        Ok(settled)
    }

    async fn nack(
        &self,
        job_id: Uuid,
        worker_id: &str,
        retriable: bool,
        error: &str,
    ) -> Result<NackOutcome> {
        let mut tx = self.pool.begin().await?;

        let leased = sqlx::query_as::<_, (i32, i32)>(
            r#"
            SELECT attempts, max_attempts
            FROM jobs
            WHERE id = $1 AND status = 'active' AND worker_id = $2
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((attempts, max_attempts)) = leased else {
            warn!(job_id = %job_id, worker_id = %worker_id, "nack without lease, ignoring");
            return Ok(NackOutcome::LeaseLost);
        };

        let outcome = if retriable && attempts < max_attempts {
            let delay_ms = self.config.retry_delay(attempts).as_millis() as i64;
            let next_eligible_at = sqlx::query_scalar::<_, DateTime<Utc>>(
                r#"
                UPDATE jobs
                SET status = 'delayed',
                    next_eligible_at = NOW() + ($2 || ' milliseconds')::INTERVAL,
                    last_error = $3,
                    lease_expires_at = NULL,
                    worker_id = NULL,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING next_eligible_at
                "#,
            )
            .bind(job_id)
            .bind(delay_ms.to_string())
            .bind(error)
            .fetch_one(&mut *tx)
            .await?;

            NackOutcome::Retrying { next_eligible_at }
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'failed',
                    last_error = $2,
                    lease_expires_at = NULL,
                    worker_id = NULL,
                    finished_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(error)
            .execute(&mut *tx)
            .await?;

            NackOutcome::Failed
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn release(&self, job_id: Uuid, worker_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'waiting',
                attempts = GREATEST(attempts - 1, 0),
                next_eligible_at = NOW(),
                lease_expires_at = NULL,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND worker_id = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $2 AND status = 'active' AND worker_id = $3
            "#,
        )
        .bind(self.lease_ms())
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed')
              AND finished_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
