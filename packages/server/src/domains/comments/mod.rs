//! Comment harvesting: collection from the social API, persistence and
//! text analysis.

pub mod activities;
pub mod analyzer;
pub mod jobs;
pub mod models;
pub mod pipeline;
pub mod store;

pub use analyzer::LexiconAnalyzer;
pub use jobs::{AnalyzeCommentsJob, CollectCommentsJob};
pub use models::CommentRecord;
pub use pipeline::{PipelineConfig, PipelineError, CANCELLED_REASON};
pub use store::{InMemoryCommentStore, PostgresCommentStore};
