use shared::{DatabaseError, StorageError};
use thiserror::Error;

/// Rejection of an upload before anything is stored
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{file_name} is {size} bytes, the limit is {limit} bytes")]
    TooLarge {
        file_name: String,
        size: u64,
        limit: u64,
    },
    #[error("{file_name} has an unsupported file type {extension:?}")]
    UnsupportedExtension {
        file_name: String,
        extension: String,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode image: {0}")]
    Encode(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },
    #[error("Processing queue is full")]
    QueueFull,
    #[error("Processing queue is closed")]
    QueueClosed,
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        PipelineError::Task(e.to_string())
    }
}
