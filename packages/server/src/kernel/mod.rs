//! Kernel module - server infrastructure and dependencies.

pub mod clock;
pub mod deps;
pub mod jobs;
pub mod scheduled_tasks;
pub mod test_dependencies;
pub mod traits;

pub use clock::{Clock, MockClock, SystemClock};
pub use deps::ServerDeps;
pub use scheduled_tasks::{run_retention_purge, start_scheduler, PurgeReport};
pub use test_dependencies::{MockTextAnalyzer, TestDependencies};
pub use traits::*;
