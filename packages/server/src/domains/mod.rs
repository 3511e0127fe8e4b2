// Business domains
pub mod comments;
pub mod tasks;

use crate::kernel::jobs::JobRegistry;

use comments::activities::{handle_analyze, handle_collect};
use comments::{AnalyzeCommentsJob, CollectCommentsJob};

/// Registry with a handler for every job kind the pipeline enqueues.
pub fn build_job_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register::<CollectCommentsJob, _, _>(handle_collect);
    registry.register::<AnalyzeCommentsJob, _, _>(handle_analyze);
    registry
}
