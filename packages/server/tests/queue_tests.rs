//! Worker pool and queue delivery tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::*;
use server_core::domains::build_job_registry;
use server_core::domains::comments::CollectCommentsJob;
use server_core::domains::tasks::TaskStatus;
use server_core::kernel::jobs::{
    enqueue_command, JobKind, JobPriority, JobStatus, WorkerPool, DEFAULT_QUEUE,
};
use server_core::kernel::{MockClock, TestDependencies};
use test_context::test_context;
use tokio_util::sync::CancellationToken;

#[test_context(TestHarness)]
#[tokio::test]
async fn worker_pool_runs_tasks_until_shutdown(ctx: &TestHarness) {
    let transport = &ctx.test_deps.transport;
    script_posts(transport, -20, &[(1, 4)]);
    script_comments(transport, 1, 4, 10, friendly_text);

    let pool = WorkerPool::new(
        Arc::new(build_job_registry()),
        ctx.deps.clone(),
        TestHarness::worker_config(),
    );
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(pool.run(shutdown.clone()));

    let task_id = ctx.create_collect_task(vec![-20]).await;
    let task = ctx.wait_for_terminal(task_id, Duration::from_secs(5)).await;
    assert_eq!(task.status, TaskStatus::Completed, "errors: {:?}", task.errors);

    shutdown.cancel();
    let stopped = tokio::time::timeout(Duration::from_secs(5), running).await;
    assert!(matches!(stopped, Ok(Ok(Ok(())))));
}

#[tokio::test]
async fn job_of_crashed_worker_is_redelivered_after_lease_expiry() {
    let clock = Arc::new(MockClock::new(Utc::now()));
    let ctx = TestHarness::with_dependencies(TestDependencies::with_clock(clock.clone()));
    let transport = &ctx.test_deps.transport;
    script_posts(transport, -21, &[(1, 2)]);
    script_comments(transport, 1, 2, 10, friendly_text);

    let task_id = ctx.create_collect_task(vec![-21]).await;

    // A worker leases the job and dies without settling it
    let leased = ctx
        .deps
        .job_queue
        .dequeue(DEFAULT_QUEUE, "crashed-worker")
        .await
        .unwrap()
        .expect("collect job is eligible");
    assert_eq!(ctx.workers.run_until_idle().await.unwrap(), 0);

    clock.advance(chrono::Duration::seconds(31));
    ctx.run_jobs().await;

    ctx.assert_status(task_id, TaskStatus::Completed).await;
    let job = ctx.deps.job_queue.get(leased.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn collect_job_is_enqueued_once_per_task(ctx: &TestHarness) {
    let task_id = ctx.create_collect_task(vec![-22]).await;

    let again = enqueue_command(
        ctx.deps.job_queue.as_ref(),
        &CollectCommentsJob::new(task_id, JobPriority::Normal),
    )
    .await
    .unwrap();

    assert!(!again.is_created());
    assert_eq!(
        ctx.test_deps
            .job_queue
            .jobs_of_kind(JobKind::CollectComments)
            .await
            .len(),
        1
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn task_priority_carries_to_its_jobs(ctx: &TestHarness) {
    let low = ctx
        .create_collect_task_with(
            vec![-23],
            server_core::domains::tasks::TaskOptions {
                priority: JobPriority::Low,
                ..Default::default()
            },
        )
        .await;
    let high = ctx
        .create_collect_task_with(
            vec![-24],
            server_core::domains::tasks::TaskOptions {
                priority: JobPriority::High,
                ..Default::default()
            },
        )
        .await;

    let first = ctx
        .deps
        .job_queue
        .dequeue(DEFAULT_QUEUE, "w")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.payload["task_id"], high.to_string());
    assert_ne!(first.payload["task_id"], low.to_string());
}
