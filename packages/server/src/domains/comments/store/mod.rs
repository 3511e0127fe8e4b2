//! Comment persistence backends. Both upsert by natural key.

mod memory;
mod postgres;

pub use memory::InMemoryCommentStore;
pub use postgres::PostgresCommentStore;
