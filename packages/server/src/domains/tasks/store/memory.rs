use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{check_transition, TaskStore, TaskStoreError, TaskStoreResult};
use crate::common::pagination::ValidatedPaginationArgs;
use crate::domains::tasks::models::{
    PipelineStage, ProgressDelta, Task, TaskFilter, TaskPatch, TaskStatus,
};
use crate::kernel::clock::{Clock, SystemClock};

/// Task store for single-process runs and tests.
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Snapshot of every task, newest first.
    pub async fn all(&self) -> Vec<Task> {
        let mut tasks: Vec<_> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| b.id.cmp(&a.id));
        tasks
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, mut task: Task) -> TaskStoreResult<Uuid> {
        let now = self.clock.now();
        task.created_at = now;
        task.updated_at = now;

        let id = task.id;
        self.tasks.write().await.insert(id, task);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> TaskStoreResult<Task> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(TaskStoreError::NotFound(id))
    }

    async fn transition(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        patch: TaskPatch,
    ) -> TaskStoreResult<Task> {
        check_transition(from, to)?;

        let now = self.clock.now();
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(TaskStoreError::NotFound(id))?;

        if task.status != from {
            return Err(TaskStoreError::Conflict {
                id,
                expected: from,
                actual: task.status,
            });
        }

        patch.apply_to(task);
        task.status = to;
        task.updated_at = now;

        if to == TaskStatus::Processing && task.started_at.is_none() {
            task.started_at = Some(now);
        }
        if to.is_terminal() {
            task.completed_at = Some(now);
            if patch.stage.is_none() {
                task.stage = match to {
                    TaskStatus::Completed => PipelineStage::Completed,
                    _ => PipelineStage::Failed,
                };
            }
        }

        Ok(task.clone())
    }

    async fn increment_progress(&self, id: Uuid, delta: ProgressDelta) -> TaskStoreResult<()> {
        let now = self.clock.now();
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(TaskStoreError::NotFound(id))?;

        if task.is_terminal() || delta.is_empty() {
            return Ok(());
        }

        delta.apply_to(&mut task.progress);
        task.updated_at = now;
        Ok(())
    }

    async fn request_cancel(&self, id: Uuid) -> TaskStoreResult<bool> {
        let now = self.clock.now();
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(TaskStoreError::NotFound(id))?;

        if task.is_terminal() {
            return Ok(false);
        }

        task.cancel_requested = true;
        task.updated_at = now;
        Ok(true)
    }

    async fn list(
        &self,
        filter: &TaskFilter,
        page: &ValidatedPaginationArgs,
    ) -> TaskStoreResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|task| filter.matches(task))
            .filter(|task| page.cursor.map(|cursor| task.id < cursor).unwrap_or(true))
            .cloned()
            .collect();

        // v7 ids sort by creation time
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        matching.truncate(page.fetch_limit() as usize);
        Ok(matching)
    }

    async fn purge_expired(&self, older_than: DateTime<Utc>) -> TaskStoreResult<u64> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| {
            !(task.is_terminal() && task.completed_at.map(|at| at < older_than).unwrap_or(false))
        });
        Ok((before - tasks.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::pagination::PaginationArgs;
    use crate::domains::tasks::models::TaskKind;
    use crate::kernel::clock::MockClock;

    fn store() -> (InMemoryTaskStore, Arc<MockClock>) {
        let clock = Arc::new(MockClock::default());
        (InMemoryTaskStore::with_clock(clock.clone()), clock)
    }

    async fn create(store: &InMemoryTaskStore) -> Uuid {
        store
            .create(Task::builder().kind(TaskKind::Collect).group_refs(vec![-1]).build())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn get_unknown_task_is_not_found() {
        let (store, _) = store();
        let id = Uuid::now_v7();
        assert!(matches!(store.get(id).await, Err(TaskStoreError::NotFound(found)) if found == id));
    }

    #[tokio::test]
    async fn transition_stamps_started_and_completed() {
        let (store, clock) = store();
        let id = create(&store).await;

        let task = store
            .transition(id, TaskStatus::Pending, TaskStatus::Processing, TaskPatch::default())
            .await
            .unwrap();
        let started = task.started_at.unwrap();
        assert!(task.completed_at.is_none());

        clock.advance(chrono::Duration::seconds(5));
        let task = store
            .transition(id, TaskStatus::Processing, TaskStatus::Completed, TaskPatch::default())
            .await
            .unwrap();

        assert_eq!(task.started_at, Some(started));
        assert_eq!(task.completed_at, Some(started + chrono::Duration::seconds(5)));
        assert_eq!(task.stage, PipelineStage::Completed);
    }

    #[tokio::test]
    async fn stale_expected_status_conflicts() {
        let (store, _) = store();
        let id = create(&store).await;
        store
            .transition(id, TaskStatus::Pending, TaskStatus::Processing, TaskPatch::default())
            .await
            .unwrap();

        let err = store
            .transition(id, TaskStatus::Pending, TaskStatus::Failed, TaskPatch::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TaskStoreError::Conflict {
                expected: TaskStatus::Pending,
                actual: TaskStatus::Processing,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn backwards_transition_is_rejected_before_storage() {
        let (store, _) = store();
        let id = create(&store).await;

        let err = store
            .transition(id, TaskStatus::Completed, TaskStatus::Processing, TaskPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskStoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn progress_is_frozen_once_terminal() {
        let (store, _) = store();
        let id = create(&store).await;
        store
            .transition(id, TaskStatus::Pending, TaskStatus::Processing, TaskPatch::default())
            .await
            .unwrap();
        store.increment_progress(id, ProgressDelta::comments(10)).await.unwrap();
        store
            .transition(id, TaskStatus::Processing, TaskStatus::Failed, TaskPatch::default())
            .await
            .unwrap();
        store.increment_progress(id, ProgressDelta::comments(10)).await.unwrap();

        assert_eq!(store.get(id).await.unwrap().progress.comments_processed, 10);
    }

    #[tokio::test]
    async fn cancel_flag_only_for_live_tasks() {
        let (store, _) = store();
        let id = create(&store).await;
        assert!(store.request_cancel(id).await.unwrap());
        assert!(store.get(id).await.unwrap().cancel_requested);

        store
            .transition(id, TaskStatus::Pending, TaskStatus::Failed, TaskPatch::default())
            .await
            .unwrap();
        assert!(!store.request_cancel(id).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_newest_first_with_cursor() {
        let (store, _) = store();
        let mut ids = Vec::new();
        for n in 1..=3u128 {
            let task = Task::builder()
                .id(Uuid::from_u128(n))
                .kind(TaskKind::Collect)
                .build();
            ids.push(store.create(task).await.unwrap());
        }
        let (first, second, third) = (ids[0], ids[1], ids[2]);

        let page = PaginationArgs::forward(2, None).validate().unwrap();
        let tasks = store.list(&TaskFilter::default(), &page).await.unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![third, second, first]);

        let page = ValidatedPaginationArgs {
            limit: 2,
            cursor: Some(second),
        };
        let tasks = store.list(&TaskFilter::default(), &page).await.unwrap();
        assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![first]);
    }

    #[tokio::test]
    async fn purge_removes_old_terminal_tasks_only() {
        let (store, clock) = store();
        let done = create(&store).await;
        let live = create(&store).await;
        store
            .transition(done, TaskStatus::Pending, TaskStatus::Failed, TaskPatch::default())
            .await
            .unwrap();

        clock.advance(chrono::Duration::hours(3));
        let purged = store
            .purge_expired(clock.now() - chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(purged, 1);
        assert!(store.get(done).await.is_err());
        assert!(store.get(live).await.is_ok());
    }
}
