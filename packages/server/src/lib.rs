// Comment Harvester - pipeline core
//
// Collects comments from a rate-limited social API, persists them and runs
// text analysis, as durable tasks driven by a lease-based job queue.
//
// Pipeline stages live in domains/comments/activities/; task bookkeeping in
// domains/tasks/.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
