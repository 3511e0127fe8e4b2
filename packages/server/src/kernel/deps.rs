//! Server dependencies for pipeline activities (using traits for testability)
//!
//! This module provides the central dependency container used by all job
//! handlers and task actions. Every store and external service sits behind a
//! trait so tests can swap in in-memory or scripted implementations.

use std::sync::Arc;

use social_api_client::SocialApiClient;

use crate::domains::comments::PipelineConfig;
use crate::domains::tasks::TaskStore;
use crate::kernel::clock::Clock;
use crate::kernel::jobs::JobQueue;
use crate::kernel::{BaseCommentStore, BaseCredentialProvider, BaseTextAnalyzer};

/// Server dependencies accessible to job handlers and actions
#[derive(Clone)]
pub struct ServerDeps {
    pub task_store: Arc<dyn TaskStore>,
    pub job_queue: Arc<dyn JobQueue>,
    pub comment_store: Arc<dyn BaseCommentStore>,
    /// Shared by every worker; clones share one rate limiter
    pub social_client: SocialApiClient,
    pub credentials: Arc<dyn BaseCredentialProvider>,
    pub text_analyzer: Arc<dyn BaseTextAnalyzer>,
    pub pipeline: PipelineConfig,
    pub clock: Arc<dyn Clock>,
}

impl ServerDeps {
    /// Create new ServerDeps with the given dependencies
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        job_queue: Arc<dyn JobQueue>,
        comment_store: Arc<dyn BaseCommentStore>,
        social_client: SocialApiClient,
        credentials: Arc<dyn BaseCredentialProvider>,
        text_analyzer: Arc<dyn BaseTextAnalyzer>,
        pipeline: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            task_store,
            job_queue,
            comment_store,
            social_client,
            credentials,
            text_analyzer,
            pipeline,
            clock,
        }
    }
}
