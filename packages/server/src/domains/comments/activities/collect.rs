//! Collect stage: page through posts and comments, persisting as we go.

use std::collections::HashSet;

use serde_json::json;
use social_api_client::WallPost;
use tracing::{debug, info};
use uuid::Uuid;

use super::{check_continue, enter_stage};
use crate::domains::comments::jobs::{AnalyzeCommentsJob, CollectCommentsJob};
use crate::domains::comments::models::CommentRecord;
use crate::domains::comments::pipeline::PipelineError;
use crate::domains::tasks::{PipelineStage, ProgressDelta, Task, TaskPatch, TaskStatus};
use crate::kernel::jobs::{enqueue_command, JobContext};
use crate::kernel::ServerDeps;

/// Run the fetch → persist → enqueue-analyze part of a collect task.
///
/// Safe to re-run: comments are upserted by natural key and the analyze job
/// is enqueued under a per-task idempotency key.
pub async fn collect_comments(
    job: &CollectCommentsJob,
    deps: &ServerDeps,
    ctx: &JobContext,
) -> Result<(), PipelineError> {
    let task = deps.task_store.get(job.task_id).await?;
    if task.is_terminal() {
        info!(task_id = %task.id, status = %task.status, "task already finished, skipping collect");
        return Ok(());
    }
    if task.cancel_requested {
        return Err(PipelineError::Cancelled);
    }
    if ctx.cancel.is_cancelled() {
        return Err(PipelineError::Shutdown);
    }

    match task.stage {
        PipelineStage::Analyzing => {
            info!(task_id = %task.id, "analysis already running, nothing to collect");
            return Ok(());
        }
        PipelineStage::AwaitingAnalysis => {
            // A previous delivery finished fetching; only the hand-off may be missing.
            let ids = deps
                .comment_store
                .ids_for_task(task.id)
                .await
                .map_err(PipelineError::storage)?;
            return hand_off(deps, &task, ids).await;
        }
        _ => {}
    }

    let task = enter_stage(deps, &task, PipelineStage::Fetching).await?;
    info!(
        task_id = %task.id,
        groups = task.group_refs.len(),
        attempt = ctx.attempt,
        "collecting comments"
    );

    let mut collector = Collector::new(deps, ctx, &task);
    for &owner_id in &task.group_refs {
        collector.collect_group(owner_id).await?;
        if collector.cap_reached() {
            info!(task_id = %task.id, collected = collector.ids.len(), "comment cap reached");
            break;
        }
    }

    let ids = collector.ids;
    let task = deps
        .task_store
        .transition(
            task.id,
            TaskStatus::Processing,
            TaskStatus::Processing,
            TaskPatch::stage(PipelineStage::Persisting).with_comments_total(ids.len() as i64),
        )
        .await?;

    hand_off(deps, &task, ids).await
}

/// Complete an empty task, or record `awaiting_analysis` and enqueue analysis.
async fn hand_off(deps: &ServerDeps, task: &Task, ids: Vec<Uuid>) -> Result<(), PipelineError> {
    if ids.is_empty() {
        let result = json!({
            "collected": 0,
            "analyzed": 0,
            "failed": 0,
            "summary": "no comments collected",
        });
        deps.task_store
            .transition(
                task.id,
                TaskStatus::Processing,
                TaskStatus::Completed,
                TaskPatch::stage(PipelineStage::Completed).with_result(result),
            )
            .await?;
        info!(task_id = %task.id, "no comments collected, task completed");
        return Ok(());
    }

    // Stage first: once the job exists, analysis may start at any moment.
    if task.stage != PipelineStage::AwaitingAnalysis {
        deps.task_store
            .transition(
                task.id,
                TaskStatus::Processing,
                TaskStatus::Processing,
                TaskPatch::stage(PipelineStage::AwaitingAnalysis),
            )
            .await?;
    }

    let count = ids.len();
    let command = AnalyzeCommentsJob::new(task.id, ids, task.options.priority);
    let enqueued = enqueue_command(deps.job_queue.as_ref(), &command)
        .await
        .map_err(PipelineError::storage)?;

    info!(
        task_id = %task.id,
        job_id = %enqueued.job_id(),
        comments = count,
        created = enqueued.is_created(),
        "analysis enqueued"
    );
    Ok(())
}

/// Per-run fetch state of one collect task.
struct Collector<'a> {
    deps: &'a ServerDeps,
    ctx: &'a JobContext,
    task_id: Uuid,
    max_comments: Option<u64>,
    max_posts_per_group: Option<u64>,
    /// Persisted ids in fetch order, without repeats
    ids: Vec<Uuid>,
    seen: HashSet<Uuid>,
}

impl<'a> Collector<'a> {
    fn new(deps: &'a ServerDeps, ctx: &'a JobContext, task: &Task) -> Self {
        Self {
            deps,
            ctx,
            task_id: task.id,
            max_comments: task.options.max_comments,
            max_posts_per_group: task.options.max_posts_per_group.map(u64::from),
            ids: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn cap_reached(&self) -> bool {
        self.max_comments
            .map(|cap| self.ids.len() as u64 >= cap)
            .unwrap_or(false)
    }

    fn remaining_capacity(&self) -> Option<usize> {
        self.max_comments
            .map(|cap| cap.saturating_sub(self.ids.len() as u64) as usize)
    }

    async fn progress(&self, delta: ProgressDelta) -> Result<(), PipelineError> {
        self.deps
            .task_store
            .increment_progress(self.task_id, delta)
            .await?;
        Ok(())
    }

    async fn collect_group(&mut self, owner_id: i64) -> Result<(), PipelineError> {
        let credential = self
            .deps
            .credentials
            .credential_for(owner_id)
            .await
            .map_err(|e| PipelineError::Credentials {
                owner_id,
                message: e.to_string(),
            })?;

        let mut cursor: Option<String> = None;
        let mut posts_seen: u64 = 0;
        let mut posts_counted = false;

        loop {
            check_continue(self.deps, self.task_id, self.ctx).await?;

            let page = self
                .deps
                .social_client
                .fetch_posts_page(owner_id, cursor.as_deref(), &credential, &self.ctx.cancel)
                .await?;

            let room = self
                .max_posts_per_group
                .map(|limit| limit.saturating_sub(posts_seen) as usize)
                .unwrap_or(usize::MAX);
            let posts: Vec<&WallPost> = page.items.iter().take(room).collect();

            let discovered = match (posts_counted, page.total) {
                (false, Some(total)) => {
                    posts_counted = true;
                    self.max_posts_per_group
                        .map_or(total, |limit| total.min(limit))
                }
                (false, None) => posts.len() as u64,
                (true, _) => 0,
            };
            self.progress(ProgressDelta::posts_discovered(discovered as i64))
                .await?;

            for post in posts {
                self.collect_post(owner_id, post, &credential).await?;
                posts_seen += 1;
                self.progress(ProgressDelta::posts(1)).await?;
                if self.cap_reached() {
                    break;
                }
            }

            let post_limit_hit = self
                .max_posts_per_group
                .map(|limit| posts_seen >= limit)
                .unwrap_or(false);
            if self.cap_reached() || post_limit_hit || page.is_last() {
                break;
            }
            cursor = page.next_cursor;
        }

        self.progress(ProgressDelta::groups(1)).await?;
        debug!(task_id = %self.task_id, owner_id, posts = posts_seen, "group collected");
        Ok(())
    }

    async fn collect_post(
        &mut self,
        owner_id: i64,
        post: &WallPost,
        credential: &str,
    ) -> Result<(), PipelineError> {
        if post.comments_count() == Some(0) {
            return Ok(());
        }

        let mut cursor: Option<String> = None;
        loop {
            check_continue(self.deps, self.task_id, self.ctx).await?;

            let page = self
                .deps
                .social_client
                .fetch_comments_page(owner_id, post.id, cursor.as_deref(), credential, &self.ctx.cancel)
                .await?;

            let mut records: Vec<CommentRecord> = page
                .items
                .iter()
                .map(|comment| CommentRecord::from_comment(comment, self.task_id))
                .collect();
            if let Some(room) = self.remaining_capacity() {
                records.truncate(room);
            }

            if !records.is_empty() {
                let stored = self
                    .deps
                    .comment_store
                    .upsert_many(&records)
                    .await
                    .map_err(PipelineError::storage)?;

                let fresh: Vec<Uuid> = stored
                    .into_iter()
                    .filter(|id| self.seen.insert(*id))
                    .collect();
                self.progress(ProgressDelta::comments(fresh.len() as i64))
                    .await?;

                debug!(
                    task_id = %self.task_id,
                    owner_id,
                    post_id = post.id,
                    persisted = fresh.len(),
                    "comment page persisted"
                );
                self.ids.extend(fresh);
            }

            if self.cap_reached() || page.is_last() {
                break;
            }
            cursor = page.next_cursor;
        }

        Ok(())
    }
}
