//! Artifact search indexes.
//!
//! Every repository gets its own tantivy index built from coordinate
//! records. Locals are scanned, remotes prefer the pack their upstream
//! publishes, virtuals merge their members. The [`scheduler`] runs the
//! recurring passes and keeps them from overlapping with storage
//! maintenance.

pub mod context;
pub mod manager;
pub mod pack;
pub mod schema;
pub mod scheduler;

pub use context::SearchHit;
pub use manager::IndexManager;
pub use pack::IndexRecord;
pub use scheduler::{Job, JobFn, JobScheduler};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] quarry_store::Error),

    #[error(transparent)]
    Index(#[from] tantivy::TantivyError),

    #[error("bad query: {0}")]
    Query(#[from] tantivy::query::QueryParserError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
