//! Job registry mapping job kinds to handlers.
//!
//! Each [`JobKind`] has exactly one handler, registered once at startup in a
//! single place (`domains::build_job_registry`). The worker pool looks the
//! handler up by the kind stored on the job row and hands it the raw payload.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::{JobError, JobResult};
use super::job::{Job, JobKind};
use super::queue::JobCommand;
use crate::kernel::ServerDeps;

/// Per-delivery information handed to a handler.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    /// 1-indexed delivery count, including this one.
    pub attempt: i32,
    pub max_attempts: i32,
    /// Fires when the worker pool stops waiting for in-flight jobs.
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn for_job(job: &Job, cancel: CancellationToken) -> Self {
        Self {
            job_id: job.id,
            attempt: job.attempts,
            max_attempts: job.max_attempts,
            cancel,
        }
    }

    /// A retryable failure now would not be redelivered.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

type BoxedHandler = Box<
    dyn Fn(serde_json::Value, Arc<ServerDeps>, JobContext) -> Pin<Box<dyn Future<Output = JobResult> + Send>>
        + Send
        + Sync,
>;

#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<JobKind, BoxedHandler>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for `J::KIND`, replacing any previous one.
    ///
    /// # Example
    ///
    /// ```ignore
    /// registry.register::<CollectCommentsJob, _, _>(|job, deps, ctx| async move {
    ///     collect_comments(job, &deps, &ctx).await
    /// });
    /// ```
    pub fn register<J, F, Fut>(&mut self, handler: F)
    where
        J: JobCommand,
        F: Fn(J, Arc<ServerDeps>, JobContext) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |value, deps, ctx| {
            let handler = handler.clone();
            Box::pin(async move {
                let job: J = serde_json::from_value(value).map_err(|e| {
                    JobError::Fatal(format!("failed to deserialize {}: {}", J::KIND, e))
                })?;
                handler(job, deps, ctx).await
            })
        });

        self.handlers.insert(J::KIND, boxed);
    }

    /// Run the registered handler for a leased job.
    pub async fn execute(&self, job: &Job, deps: Arc<ServerDeps>, ctx: JobContext) -> JobResult {
        let handler = self
            .handlers
            .get(&job.kind)
            .ok_or_else(|| JobError::Fatal(format!("no handler registered for {}", job.kind)))?;

        handler(job.payload.clone(), deps, ctx).await
    }

    pub fn is_registered(&self, kind: JobKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Kinds without a handler; empty for a complete registry.
    pub fn missing_kinds(&self) -> Vec<JobKind> {
        JobKind::ALL
            .into_iter()
            .filter(|kind| !self.is_registered(*kind))
            .collect()
    }
}
