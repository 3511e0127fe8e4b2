//! Pipeline behaviour when a job is delivered more than once.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use common::*;
use server_core::domains::tasks::{PipelineStage, TaskStatus};
use server_core::kernel::jobs::{JobError, JobKind, JobStatus, DEFAULT_QUEUE};
use server_core::kernel::{MockClock, MockTextAnalyzer, TestDependencies};
use tokio_util::sync::CancellationToken;

fn comment_ids_in(payload: &serde_json::Value) -> usize {
    payload["comment_ids"]
        .as_array()
        .map(|ids| ids.len())
        .unwrap_or(0)
}

#[tokio::test]
async fn redelivered_analyze_job_skips_records_analyzed_by_the_first_delivery() {
    let clock = Arc::new(MockClock::new(Utc::now()));
    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    let test_deps = TestDependencies::with_clock(clock.clone()).mock_analyzer(
        MockTextAnalyzer::new().after_call(5, move || {
            let stop = stop.clone();
            async move { stop.cancel() }
        }),
    );
    let ctx = TestHarness::with_dependencies(test_deps);
    let transport = &ctx.test_deps.transport;
    script_posts(transport, -40, &[(1, 15)]);
    script_comments(transport, 1, 15, 10, friendly_text);

    let task_id = ctx.create_collect_task(vec![-40]).await;
    let (collect, result) = ctx.run_unsettled("worker-a", CancellationToken::new()).await;
    assert!(result.is_ok());
    assert!(ctx.deps.job_queue.ack(collect.id, "worker-a").await.unwrap());

    // worker-b is stopped after six records and dies without releasing the job
    let (analyze, result) = ctx.run_unsettled("worker-b", shutdown).await;
    assert_eq!(analyze.kind, JobKind::AnalyzeComments);
    assert!(matches!(result, Err(JobError::Interrupted)));
    assert_eq!(ctx.test_deps.text_analyzer.call_count(), 6);
    assert_eq!(ctx.task(task_id).await.stage, PipelineStage::Analyzing);

    clock.advance(chrono::Duration::seconds(31));
    ctx.run_jobs().await;

    let task = ctx.assert_status(task_id, TaskStatus::Completed).await;
    assert!(task.errors.is_empty(), "errors: {:?}", task.errors);
    assert_eq!(task.progress.comments_total, 15);
    assert_eq!(task.progress.comments_processed, 15);
    assert_eq!(task.progress.posts_processed, 1);

    // Every record analyzed exactly once across both deliveries
    let calls = ctx.test_deps.text_analyzer.calls();
    assert_eq!(calls.len(), 15);
    assert_eq!(calls.iter().collect::<HashSet<_>>().len(), 15);
    let stored = ctx.test_deps.comment_store.all().await;
    assert_eq!(stored.iter().filter(|c| c.is_analyzed()).count(), 15);

    assert_eq!(transport.calls_for(WALL_GET).len(), 1);
    assert_eq!(transport.calls_for(WALL_GET_COMMENTS).len(), 2);

    let job = ctx.deps.job_queue.get(analyze.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn redelivered_collect_job_reuses_its_pending_analyze_job() {
    let clock = Arc::new(MockClock::new(Utc::now()));
    let ctx = TestHarness::with_dependencies(TestDependencies::with_clock(clock.clone()));
    let transport = &ctx.test_deps.transport;
    script_posts(transport, -41, &[(1, 15)]);
    script_comments(transport, 1, 15, 10, friendly_text);

    let task_id = ctx.create_collect_task(vec![-41]).await;

    // worker-a fetches everything, then dies before acking
    let (collect, result) = ctx.run_unsettled("worker-a", CancellationToken::new()).await;
    assert!(result.is_ok());
    assert_eq!(ctx.task(task_id).await.stage, PipelineStage::AwaitingAnalysis);

    clock.advance(chrono::Duration::seconds(31));
    ctx.run_jobs().await;

    let task = ctx.assert_status(task_id, TaskStatus::Completed).await;
    assert_eq!(task.progress.comments_total, 15);
    assert_eq!(task.progress.comments_processed, 15);
    assert_eq!(task.progress.posts_processed, 1);
    assert_eq!(task.progress.groups_processed, 1);

    // Nothing was fetched again
    assert_eq!(transport.calls_for(WALL_GET).len(), 1);
    assert_eq!(transport.calls_for(WALL_GET_COMMENTS).len(), 2);
    assert_eq!(ctx.test_deps.text_analyzer.call_count(), 15);

    let analyze_jobs = ctx.test_deps.job_queue.jobs_of_kind(JobKind::AnalyzeComments).await;
    assert_eq!(analyze_jobs.len(), 1);
    let job = ctx.deps.job_queue.get(collect.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn redelivered_collect_job_reenqueues_a_lost_analyze_job_from_stored_ids() {
    let clock = Arc::new(MockClock::new(Utc::now()));
    let ctx = TestHarness::with_dependencies(TestDependencies::with_clock(clock.clone()));
    let transport = &ctx.test_deps.transport;
    script_posts(transport, -42, &[(1, 15)]);
    script_comments(transport, 1, 15, 10, friendly_text);

    let task_id = ctx.create_collect_task(vec![-42]).await;
    let (collect, result) = ctx.run_unsettled("worker-a", CancellationToken::new()).await;
    assert!(result.is_ok());

    // The hand-off is lost before anyone analyzes it
    let handoff = ctx
        .deps
        .job_queue
        .dequeue(DEFAULT_QUEUE, "worker-b")
        .await
        .unwrap()
        .expect("analyze job is eligible");
    assert_eq!(handoff.kind, JobKind::AnalyzeComments);
    ctx.deps
        .job_queue
        .nack(handoff.id, "worker-b", false, "dropped")
        .await
        .unwrap();
    assert_eq!(ctx.test_deps.text_analyzer.call_count(), 0);

    clock.advance(chrono::Duration::seconds(31));
    ctx.run_jobs().await;

    let task = ctx.assert_status(task_id, TaskStatus::Completed).await;
    assert_eq!(task.progress.comments_total, 15);
    assert_eq!(task.progress.comments_processed, 15);
    assert_eq!(task.progress.posts_processed, 1);

    assert_eq!(transport.calls_for(WALL_GET).len(), 1);
    assert_eq!(transport.calls_for(WALL_GET_COMMENTS).len(), 2);
    assert_eq!(ctx.test_deps.text_analyzer.call_count(), 15);

    let analyze_jobs = ctx.test_deps.job_queue.jobs_of_kind(JobKind::AnalyzeComments).await;
    assert_eq!(analyze_jobs.len(), 2);
    assert_eq!(analyze_jobs[0].status, JobStatus::Failed);
    assert_eq!(analyze_jobs[1].status, JobStatus::Completed);
    assert_eq!(comment_ids_in(&analyze_jobs[1].payload), 15);

    let job = ctx.deps.job_queue.get(collect.id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 2);
}
