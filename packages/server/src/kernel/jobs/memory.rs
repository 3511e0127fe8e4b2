//! In-memory job queue for single-process runs and tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use super::job::{Job, JobKind, JobStatus};
use super::queue::{EnqueueOptions, EnqueueResult, JobQueue, NackOutcome, QueueConfig};
use crate::kernel::clock::{Clock, SystemClock};

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Uuid, Job>,
    /// Enqueue order, the final FIFO tie-breaker.
    seq: HashMap<Uuid, u64>,
    next_seq: u64,
}

pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl InMemoryJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Snapshot of every job, in enqueue order.
    pub async fn jobs(&self) -> Vec<Job> {
        let state = self.state.lock().await;
        let mut jobs: Vec<_> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|job| state.seq.get(&job.id).copied().unwrap_or(u64::MAX));
        jobs
    }

    pub async fn jobs_of_kind(&self, kind: JobKind) -> Vec<Job> {
        self.jobs()
            .await
            .into_iter()
            .filter(|job| job.kind == kind)
            .collect()
    }

    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.config.lease_chrono()
    }
}

/// The job if `worker_id` still holds its lease, `None` if the lease moved on.
fn leased_job<'a>(
    state: &'a mut QueueState,
    job_id: Uuid,
    worker_id: &str,
) -> Result<Option<&'a mut Job>> {
    let job = state
        .jobs
        .get_mut(&job_id)
        .ok_or_else(|| anyhow!("job {} not found", job_id))?;

    if !job.is_leased_by(worker_id) {
        warn!(
            job_id = %job_id,
            worker_id = %worker_id,
            status = ?job.status,
            holder = ?job.worker_id,
            "lease no longer held, ignoring"
        );
        return Ok(None);
    }
    Ok(Some(job))
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        queue_name: &str,
        kind: JobKind,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if let Some(key) = &options.idempotency_key {
            let existing = state.jobs.values().find(|job| {
                job.idempotency_key.as_deref() == Some(key.as_str()) && !job.status.is_finished()
            });
            if let Some(existing) = existing {
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
        }

        let (status, next_eligible_at) = match options.delay {
            Some(delay) if !delay.is_zero() => (
                JobStatus::Delayed,
                now + chrono::Duration::from_std(delay)?,
            ),
            _ => (JobStatus::Waiting, now),
        };

        let job = Job {
            id: Uuid::now_v7(),
            queue_name: queue_name.to_string(),
            kind,
            payload,
            priority: options.priority,
            status,
            attempts: 0,
            max_attempts: options
                .max_attempts
                .unwrap_or(self.config.default_max_attempts)
                .max(1),
            next_eligible_at,
            lease_expires_at: None,
            worker_id: None,
            idempotency_key: options.idempotency_key,
            last_error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        let id = job.id;

        let seq = state.next_seq;
        state.next_seq += 1;
        state.seq.insert(id, seq);
        state.jobs.insert(id, job);
        drop(state);

        self.notify.notify_one();
        debug!(job_id = %id, kind = %kind, "enqueued job");
        Ok(EnqueueResult::Created(id))
    }

    async fn dequeue(&self, queue_name: &str, worker_id: &str) -> Result<Option<Job>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let QueueState { jobs, seq, .. } = &mut *state;

        // Expired leases on their final attempt fail instead of redelivering.
        for job in jobs.values_mut() {
            if job.queue_name == queue_name && job.lease_expired(now) && job.attempts_exhausted() {
                warn!(job_id = %job.id, attempts = job.attempts, "lease expired on final attempt");
                job.status = JobStatus::Failed;
                job.last_error = Some("lease expired after final attempt".to_string());
                job.lease_expires_at = None;
                job.worker_id = None;
                job.finished_at = Some(now);
                job.updated_at = now;
            }
        }

        let next = jobs
            .values()
            .filter(|job| job.queue_name == queue_name)
            .filter(|job| job.is_ready(now) || job.lease_expired(now))
            .min_by_key(|job| {
                (
                    job.priority.as_i16(),
                    job.next_eligible_at,
                    seq.get(&job.id).copied().unwrap_or(u64::MAX),
                )
            })
            .map(|job| job.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let lease_until = self.lease_until(now);
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("job {} vanished during dequeue", id))?;

        if job.status == JobStatus::Active {
            debug!(job_id = %id, previous_worker = ?job.worker_id, "redelivering job after lease expiry");
        }

        job.status = JobStatus::Active;
        job.attempts += 1;
        job.lease_expires_at = Some(lease_until);
        job.worker_id = Some(worker_id.to_string());
        job.updated_at = now;

        Ok(Some(job.clone()))
    }

    async fn ack(&self, job_id: Uuid, worker_id: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(job) = leased_job(&mut state, job_id, worker_id)? else {
            return Ok(false);
        };

        job.status = JobStatus::Completed;
        job.lease_expires_at = None;
        job.finished_at = Some(now);
        job.updated_at = now;
        Ok(true)
    }

    async fn nack(
        &self,
        job_id: Uuid,
        worker_id: &str,
        retriable: bool,
        error: &str,
    ) -> Result<NackOutcome> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(job) = leased_job(&mut state, job_id, worker_id)? else {
            return Ok(NackOutcome::LeaseLost);
        };

        job.last_error = Some(error.to_string());
        job.lease_expires_at = None;
        job.worker_id = None;
        job.updated_at = now;

        if retriable && !job.attempts_exhausted() {
            let delay = chrono::Duration::from_std(self.config.retry_delay(job.attempts))?;
            let next_eligible_at = now + delay;
            job.status = JobStatus::Delayed;
            job.next_eligible_at = next_eligible_at;
            drop(state);
            self.notify.notify_one();
            return Ok(NackOutcome::Retrying { next_eligible_at });
        }

        job.status = JobStatus::Failed;
        job.finished_at = Some(now);
        Ok(NackOutcome::Failed)
    }

    async fn release(&self, job_id: Uuid, worker_id: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(job) = leased_job(&mut state, job_id, worker_id)? else {
            return Ok(false);
        };

        job.status = JobStatus::Waiting;
        job.attempts = (job.attempts - 1).max(0);
        job.lease_expires_at = None;
        job.worker_id = None;
        job.next_eligible_at = now;
        job.updated_at = now;
        drop(state);

        self.notify.notify_one();
        Ok(true)
    }

    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<bool> {
        let now = self.clock.now();
        let lease_until = self.lease_until(now);
        let mut state = self.state.lock().await;
        let Some(job) = leased_job(&mut state, job_id, worker_id)? else {
            return Ok(false);
        };

        job.lease_expires_at = Some(lease_until);
        job.updated_at = now;
        Ok(true)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(&job_id).cloned())
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let expired: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|job| job.status.is_finished())
            .filter(|job| job.finished_at.map(|at| at < older_than).unwrap_or(false))
            .map(|job| job.id)
            .collect();

        for id in &expired {
            state.jobs.remove(id);
            state.seq.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn wait_for_work(&self, timeout: Duration) {
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(timeout) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::clock::MockClock;
    use crate::kernel::jobs::JobPriority;
    use serde_json::json;

    const Q: &str = "pipeline";

    fn queue() -> (InMemoryJobQueue, Arc<MockClock>) {
        let clock = Arc::new(MockClock::default());
        let queue = InMemoryJobQueue::with_clock(QueueConfig::default(), clock.clone());
        (queue, clock)
    }

    async fn enqueue(queue: &InMemoryJobQueue, options: EnqueueOptions) -> Uuid {
        queue
            .enqueue(Q, JobKind::CollectComments, json!({}), options)
            .await
            .unwrap()
            .job_id()
    }

    #[tokio::test]
    async fn fifo_within_equal_priority() {
        let (queue, _clock) = queue();
        let first = enqueue(&queue, EnqueueOptions::default()).await;
        let second = enqueue(&queue, EnqueueOptions::default()).await;

        assert_eq!(queue.dequeue(Q, "w").await.unwrap().unwrap().id, first);
        assert_eq!(queue.dequeue(Q, "w").await.unwrap().unwrap().id, second);
        assert!(queue.dequeue(Q, "w").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn higher_priority_dequeued_first() {
        let (queue, _clock) = queue();
        let low = enqueue(&queue, EnqueueOptions::builder().priority(JobPriority::Low).build()).await;
        let critical = enqueue(
            &queue,
            EnqueueOptions::builder().priority(JobPriority::Critical).build(),
        )
        .await;

        assert_eq!(queue.dequeue(Q, "w").await.unwrap().unwrap().id, critical);
        assert_eq!(queue.dequeue(Q, "w").await.unwrap().unwrap().id, low);
    }

    #[tokio::test]
    async fn delayed_job_waits_for_eligibility() {
        let (queue, clock) = queue();
        let id = enqueue(
            &queue,
            EnqueueOptions::builder().delay(Duration::from_secs(30)).build(),
        )
        .await;

        assert_eq!(queue.get(id).await.unwrap().unwrap().status, JobStatus::Delayed);
        assert!(queue.dequeue(Q, "w").await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(queue.dequeue(Q, "w").await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn unacked_job_is_redelivered_after_lease_expiry() {
        let (queue, clock) = queue();
        let id = enqueue(&queue, EnqueueOptions::default()).await;

        let leased = queue.dequeue(Q, "worker-a").await.unwrap().unwrap();
        assert_eq!(leased.attempts, 1);
        assert!(queue.dequeue(Q, "worker-b").await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(61));
        let redelivered = queue.dequeue(Q, "worker-b").await.unwrap().unwrap();
        assert_eq!(redelivered.id, id);
        assert_eq!(redelivered.attempts, 2);
        assert_eq!(redelivered.worker_id.as_deref(), Some("worker-b"));
    }

    #[tokio::test]
    async fn heartbeat_extends_lease() {
        let (queue, clock) = queue();
        let id = enqueue(&queue, EnqueueOptions::default()).await;
        queue.dequeue(Q, "w").await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(50));
        assert!(queue.heartbeat(id, "w").await.unwrap());
        clock.advance(chrono::Duration::seconds(50));

        assert!(queue.dequeue(Q, "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acked_job_is_never_redelivered() {
        let (queue, clock) = queue();
        let id = enqueue(&queue, EnqueueOptions::default()).await;
        queue.dequeue(Q, "w").await.unwrap().unwrap();
        assert!(queue.ack(id, "w").await.unwrap());

        clock.advance(chrono::Duration::hours(1));
        assert!(queue.dequeue(Q, "w").await.unwrap().is_none());
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn stale_nack_after_another_workers_ack_is_ignored() {
        let (queue, clock) = queue();
        let id = enqueue(&queue, EnqueueOptions::default()).await;
        queue.dequeue(Q, "worker-a").await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(61));
        queue.dequeue(Q, "worker-b").await.unwrap().unwrap();
        assert!(queue.ack(id, "worker-b").await.unwrap());

        let outcome = queue.nack(id, "worker-a", true, "late failure").await.unwrap();
        assert_eq!(outcome, NackOutcome::LeaseLost);

        clock.advance(chrono::Duration::seconds(5));
        assert!(queue.dequeue(Q, "worker-c").await.unwrap().is_none());
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.last_error, None);
    }

    #[tokio::test]
    async fn stale_worker_cannot_touch_a_live_lease() {
        let (queue, clock) = queue();
        let id = enqueue(&queue, EnqueueOptions::default()).await;
        queue.dequeue(Q, "worker-a").await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(61));
        queue.dequeue(Q, "worker-b").await.unwrap().unwrap();

        assert_eq!(
            queue.nack(id, "worker-a", true, "late failure").await.unwrap(),
            NackOutcome::LeaseLost
        );
        assert!(!queue.heartbeat(id, "worker-a").await.unwrap());
        assert!(!queue.release(id, "worker-a").await.unwrap());
        assert!(!queue.ack(id, "worker-a").await.unwrap());

        assert!(queue.dequeue(Q, "worker-c").await.unwrap().is_none());
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.worker_id.as_deref(), Some("worker-b"));
        assert_eq!(job.attempts, 2);

        assert!(queue.ack(id, "worker-b").await.unwrap());
    }

    #[tokio::test]
    async fn settling_an_unknown_job_is_an_error() {
        let (queue, _clock) = queue();
        assert!(queue.ack(Uuid::now_v7(), "w").await.is_err());
    }

    #[tokio::test]
    async fn retriable_nack_backs_off_then_fails_at_ceiling() {
        let (queue, clock) = queue();
        let id = enqueue(&queue, EnqueueOptions::builder().max_attempts(2).build()).await;

        queue.dequeue(Q, "w").await.unwrap().unwrap();
        let outcome = queue.nack(id, "w", true, "boom").await.unwrap();
        assert!(matches!(outcome, NackOutcome::Retrying { .. }));
        assert!(queue.dequeue(Q, "w").await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(1));
        let job = queue.dequeue(Q, "w").await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);

        let outcome = queue.nack(id, "w", true, "boom again").await.unwrap();
        assert_eq!(outcome, NackOutcome::Failed);
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("boom again"));
        assert!(job.attempts <= job.max_attempts);
    }

    #[tokio::test]
    async fn non_retriable_nack_fails_immediately() {
        let (queue, _clock) = queue();
        let id = enqueue(&queue, EnqueueOptions::default()).await;
        queue.dequeue(Q, "w").await.unwrap().unwrap();

        assert_eq!(queue.nack(id, "w", false, "bad payload").await.unwrap(), NackOutcome::Failed);
    }

    #[tokio::test]
    async fn release_does_not_consume_an_attempt() {
        let (queue, _clock) = queue();
        let id = enqueue(&queue, EnqueueOptions::default()).await;
        queue.dequeue(Q, "w").await.unwrap().unwrap();
        assert!(queue.release(id, "w").await.unwrap());

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempts, 0);
        assert_eq!(queue.dequeue(Q, "w").await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn expired_lease_on_final_attempt_fails_the_job() {
        let (queue, clock) = queue();
        let id = enqueue(&queue, EnqueueOptions::builder().max_attempts(1).build()).await;
        queue.dequeue(Q, "w").await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(61));
        assert!(queue.dequeue(Q, "w").await.unwrap().is_none());

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn idempotency_key_deduplicates_unfinished_jobs() {
        let (queue, _clock) = queue();
        let options = || EnqueueOptions::builder().idempotency_key("analyze:1").build();

        let first = queue
            .enqueue(Q, JobKind::AnalyzeComments, json!({}), options())
            .await
            .unwrap();
        let second = queue
            .enqueue(Q, JobKind::AnalyzeComments, json!({}), options())
            .await
            .unwrap();

        assert!(first.is_created());
        assert_eq!(second, EnqueueResult::Duplicate(first.job_id()));

        queue.dequeue(Q, "w").await.unwrap().unwrap();
        queue.ack(first.job_id(), "w").await.unwrap();

        let third = queue
            .enqueue(Q, JobKind::AnalyzeComments, json!({}), options())
            .await
            .unwrap();
        assert!(third.is_created());
    }

    #[tokio::test]
    async fn queues_are_isolated_by_name() {
        let (queue, _clock) = queue();
        queue
            .enqueue("other", JobKind::CollectComments, json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        assert!(queue.dequeue(Q, "w").await.unwrap().is_none());
        assert!(queue.dequeue("other", "w").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_removes_only_old_finished_jobs() {
        let (queue, clock) = queue();
        let done = enqueue(&queue, EnqueueOptions::default()).await;
        let pending = enqueue(&queue, EnqueueOptions::default()).await;
        queue.dequeue(Q, "w").await.unwrap().unwrap();
        queue.ack(done, "w").await.unwrap();

        clock.advance(chrono::Duration::hours(2));
        let purged = queue
            .purge_finished(clock.now() - chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(purged, 1);
        assert!(queue.get(done).await.unwrap().is_none());
        assert!(queue.get(pending).await.unwrap().is_some());
    }
}
