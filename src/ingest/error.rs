use rocket_db_pools::sqlx;
use thiserror::Error;

/// Fatal errors for a single ingest run.
///
/// Row-level validation failures never show up here; they only move the
/// dropped counter (see [`crate::ingest::record::DropReason`]).
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("file type not supported: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt archive {file}: {reason}")]
    CorruptArchive { file: String, reason: String },
    #[error("input file {0} doesn't exist in the object cache")]
    ObjectNotFound(String),
    #[error("object cache error: {0}")]
    ObjectCache(String),
    #[error("failed inserting batch into {table}: {source}")]
    BulkLoad {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("ingest run cancelled")]
    Cancelled,
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl IngestError {
    pub fn corrupt(file: &str, reason: impl std::fmt::Display) -> Self {
        IngestError::CorruptArchive {
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<redis::RedisError> for IngestError {
    fn from(err: redis::RedisError) -> Self {
        IngestError::ObjectCache(err.to_string())
    }
}
