use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domains::comments::models::CommentRecord;
use crate::kernel::{BaseCommentStore, TextAnalysis};

pub struct PostgresCommentStore {
    pool: PgPool,
}

impl PostgresCommentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseCommentStore for PostgresCommentStore {
    async fn upsert_many(&self, records: &[CommentRecord]) -> Result<Vec<Uuid>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        // ON CONFLICT cannot touch one row twice per statement, so collapse
        // repeated keys (last write wins) before building the batch.
        let mut latest: HashMap<(i64, i64, i64), &CommentRecord> = HashMap::new();
        for record in records {
            latest.insert(record.natural_key(), record);
        }
        let batch: Vec<&CommentRecord> = latest.values().copied().collect();

        let ids: Vec<Uuid> = batch.iter().map(|r| r.id).collect();
        let owner_ids: Vec<i64> = batch.iter().map(|r| r.owner_id).collect();
        let post_ids: Vec<i64> = batch.iter().map(|r| r.post_id).collect();
        let comment_ids: Vec<i64> = batch.iter().map(|r| r.comment_id).collect();
        let author_ids: Vec<i64> = batch.iter().map(|r| r.author_id).collect();
        let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
        let like_counts: Vec<i64> = batch.iter().map(|r| r.like_count).collect();
        let created_ats: Vec<DateTime<Utc>> = batch.iter().map(|r| r.created_at).collect();
        let task_ids: Vec<Option<Uuid>> = batch.iter().map(|r| r.task_id).collect();

        let rows = sqlx::query_as::<_, (Uuid, i64, i64, i64)>(
            r#"
            INSERT INTO comments (id, owner_id, post_id, comment_id, author_id, text,
                                  like_count, created_at, task_id)
            SELECT * FROM UNNEST(
                $1::uuid[], $2::bigint[], $3::bigint[], $4::bigint[], $5::bigint[],
                $6::text[], $7::bigint[], $8::timestamptz[], $9::uuid[]
            )
            ON CONFLICT (owner_id, post_id, comment_id) DO UPDATE
            SET author_id = EXCLUDED.author_id,
                text = EXCLUDED.text,
                like_count = EXCLUDED.like_count,
                task_id = COALESCE(EXCLUDED.task_id, comments.task_id),
                updated_at = NOW()
            RETURNING id, owner_id, post_id, comment_id
            "#,
        )
        .bind(&ids)
        .bind(&owner_ids)
        .bind(&post_ids)
        .bind(&comment_ids)
        .bind(&author_ids)
        .bind(&texts)
        .bind(&like_counts)
        .bind(&created_ats)
        .bind(&task_ids)
        .fetch_all(&self.pool)
        .await?;

        let stored: HashMap<(i64, i64, i64), Uuid> = rows
            .into_iter()
            .map(|(id, owner_id, post_id, comment_id)| ((owner_id, post_id, comment_id), id))
            .collect();

        records
            .iter()
            .map(|record| {
                stored
                    .get(&record.natural_key())
                    .copied()
                    .ok_or_else(|| anyhow!("upsert returned no row for {:?}", record.natural_key()))
            })
            .collect()
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<CommentRecord>> {
        let records = sqlx::query_as::<_, CommentRecord>(
            r#"
            SELECT id, owner_id, post_id, comment_id, author_id, text, like_count,
                   created_at, task_id, keywords, sentiment, analyzed_at
            FROM comments
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn save_analysis(&self, id: Uuid, analysis: &TextAnalysis) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE comments
            SET keywords = $2,
                sentiment = $3,
                analyzed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&analysis.keywords)
        .bind(analysis.sentiment)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("comment {} not found", id);
        }
        Ok(())
    }

    async fn ids_for_owners(&self, owner_ids: &[i64]) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM comments
            WHERE owner_id = ANY($1)
            ORDER BY owner_id, post_id, comment_id
            "#,
        )
        .bind(owner_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn ids_for_task(&self, task_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM comments
            WHERE task_id = $1
            ORDER BY owner_id, post_id, comment_id
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
