use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{check_transition, TaskStore, TaskStoreError, TaskStoreResult};
use crate::common::pagination::ValidatedPaginationArgs;
use crate::domains::tasks::models::{ProgressDelta, Task, TaskFilter, TaskPatch, TaskStatus};

pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, id: Uuid) -> TaskStoreResult<TaskStatus> {
        sqlx::query_scalar::<_, TaskStatus>("SELECT status FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TaskStoreError::NotFound(id))
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn create(&self, task: Task) -> TaskStoreResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO tasks (
                id, kind, status, stage, group_refs, options,
                groups_total, groups_processed, posts_total, posts_processed,
                comments_total, comments_processed, estimated_comments_per_post,
                errors, result, cancel_requested
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING id
            "#,
        )
        .bind(task.id)
        .bind(task.kind)
        .bind(task.status)
        .bind(task.stage)
        .bind(&task.group_refs)
        .bind(Json(&task.options))
        .bind(task.progress.groups_total)
        .bind(task.progress.groups_processed)
        .bind(task.progress.posts_total)
        .bind(task.progress.posts_processed)
        .bind(task.progress.comments_total)
        .bind(task.progress.comments_processed)
        .bind(task.progress.estimated_comments_per_post)
        .bind(&task.errors)
        .bind(&task.result)
        .bind(task.cancel_requested)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get(&self, id: Uuid) -> TaskStoreResult<Task> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
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

        // The status predicate is the compare-and-swap.
        let updated = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET status = $3,
                stage = COALESCE(
                    $4,
                    CASE $3
                        WHEN 'completed'::task_status THEN 'completed'::pipeline_stage
                        WHEN 'failed'::task_status THEN 'failed'::pipeline_stage
                        ELSE stage
                    END
                ),
                errors = errors || $5,
                result = COALESCE($6, result),
                groups_total = GREATEST(groups_total, COALESCE($7, groups_total)),
                posts_total = GREATEST(posts_total, COALESCE($8, posts_total)),
                comments_total = GREATEST(comments_total, COALESCE($9, comments_total)),
                started_at = CASE
                    WHEN $3 = 'processing'::task_status THEN COALESCE(started_at, NOW())
                    ELSE started_at
                END,
                completed_at = CASE
                    WHEN $3 IN ('completed'::task_status, 'failed'::task_status) THEN NOW()
                    ELSE completed_at
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(patch.stage)
        .bind(&patch.append_errors)
        .bind(&patch.result)
        .bind(patch.groups_total)
        .bind(patch.posts_total)
        .bind(patch.comments_total)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(task) => Ok(task),
            None => {
                let actual = self.current_status(id).await?;
                Err(TaskStoreError::Conflict {
                    id,
                    expected: from,
                    actual,
                })
            }
        }
    }

    async fn increment_progress(&self, id: Uuid, delta: ProgressDelta) -> TaskStoreResult<()> {
        if delta.is_empty() {
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET groups_processed = groups_processed + $2,
                posts_total = posts_total + $3,
                posts_processed = posts_processed + $4,
                comments_processed = comments_processed + $5,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .bind(delta.groups_processed.max(0))
        .bind(delta.posts_total.max(0))
        .bind(delta.posts_processed.max(0))
        .bind(delta.comments_processed.max(0))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Terminal tasks are frozen; only a missing row is an error.
            self.current_status(id).await?;
        }
        Ok(())
    }

    async fn request_cancel(&self, id: Uuid) -> TaskStoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET cancel_requested = TRUE, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.current_status(id).await?;
        Ok(false)
    }

    async fn list(
        &self,
        filter: &TaskFilter,
        page: &ValidatedPaginationArgs,
    ) -> TaskStoreResult<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT *
            FROM tasks
            WHERE ($1::task_kind IS NULL OR kind = $1)
              AND ($2::task_status IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR id < $3)
            ORDER BY id DESC
            LIMIT $4
            "#,
        )
        .bind(filter.kind)
        .bind(filter.status)
        .bind(page.cursor)
        .bind(page.fetch_limit())
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    async fn purge_expired(&self, older_than: DateTime<Utc>) -> TaskStoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE status IN ('completed', 'failed')
              AND completed_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
