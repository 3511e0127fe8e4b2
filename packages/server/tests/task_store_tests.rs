//! Task store concurrency and listing tests.

mod common;

use std::sync::Arc;

use common::*;
use server_core::common::pagination::PaginationArgs;
use server_core::domains::tasks::{
    list_tasks, InMemoryTaskStore, PipelineStage, Task, TaskFilter, TaskKind, TaskPatch, TaskStatus,
    TaskStore, TaskStoreError,
};
use test_context::test_context;

fn collect_task() -> Task {
    Task::builder().kind(TaskKind::Collect).group_refs(vec![-1]).build()
}

#[tokio::test]
async fn concurrent_transitions_have_exactly_one_winner() {
    let store = Arc::new(InMemoryTaskStore::new());
    let id = store.create(collect_task()).await.unwrap();

    let attempts = (0..8).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .transition(id, TaskStatus::Pending, TaskStatus::Processing, TaskPatch::stage(PipelineStage::Fetching))
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;

    let winners = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(TaskStoreError::Conflict { .. }))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn racing_completions_have_exactly_one_winner() {
    let store = Arc::new(InMemoryTaskStore::new());
    let id = store.create(collect_task()).await.unwrap();
    store
        .transition(id, TaskStatus::Pending, TaskStatus::Processing, TaskPatch::stage(PipelineStage::Analyzing))
        .await
        .unwrap();

    let complete = |store: Arc<InMemoryTaskStore>| async move {
        store
            .transition(id, TaskStatus::Processing, TaskStatus::Completed, TaskPatch::default())
            .await
    };
    let (a, b) = tokio::join!(complete(store.clone()), complete(store.clone()));

    assert!(a.is_ok() != b.is_ok());
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(
        loser,
        Err(TaskStoreError::Conflict { actual: TaskStatus::Completed, .. })
    ));
}

#[tokio::test]
async fn terminal_tasks_reject_further_transitions() {
    let store = InMemoryTaskStore::new();
    let id = store.create(collect_task()).await.unwrap();
    store
        .transition(id, TaskStatus::Pending, TaskStatus::Failed, TaskPatch::stage(PipelineStage::Failed))
        .await
        .unwrap();

    let result = store
        .transition(id, TaskStatus::Failed, TaskStatus::Processing, TaskPatch::default())
        .await;
    assert!(matches!(result, Err(TaskStoreError::InvalidTransition { .. })));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn list_tasks_pages_newest_first(ctx: &TestHarness) {
    let mut ids = Vec::new();
    for group in 0..5 {
        ids.push(ctx.create_collect_task(vec![-100 - group]).await);
        // v7 ids order by millisecond
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let first = list_tasks(&ctx.deps, &TaskFilter::default(), &PaginationArgs::forward(2, None))
        .await
        .unwrap();
    assert_eq!(first.tasks.len(), 2);
    assert!(first.has_more);
    assert_eq!(first.tasks[0].id, ids[4]);
    assert_eq!(first.tasks[1].id, ids[3]);

    let second = list_tasks(
        &ctx.deps,
        &TaskFilter::default(),
        &PaginationArgs::forward(10, first.next_cursor.clone()),
    )
    .await
    .unwrap();
    assert_eq!(second.tasks.len(), 3);
    assert!(!second.has_more);
    assert!(second.next_cursor.is_none());
    assert_eq!(second.tasks[2].id, ids[0]);

    let failed_only = TaskFilter {
        status: Some(TaskStatus::Failed),
        ..Default::default()
    };
    let none = list_tasks(&ctx.deps, &failed_only, &PaginationArgs::forward(10, None))
        .await
        .unwrap();
    assert!(none.tasks.is_empty());
}
