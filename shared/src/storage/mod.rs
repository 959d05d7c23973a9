pub mod factory;
pub mod fallback;
pub mod local;
pub mod s3;

use async_trait::async_trait;
use thiserror::Error;

pub use factory::{create_media_storage, StorageSettings, StorageStack};
pub use fallback::{FallbackStorage, StoredObject};
pub use local::LocalStorage;
pub use s3::S3Storage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Backend(String),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid object name: {0}")]
    InvalidName(String),
    #[error("All storage backends failed for {name} (durable: {durable}; local: {local})")]
    Unavailable {
        name: String,
        durable: String,
        local: String,
    },
}

/// A blob store addressed by object name.
///
/// Backends store objects under exactly the name they are given; generating
/// unique names is the job of [`FallbackStorage`].
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Short backend identifier used in log fields
    fn backend_name(&self) -> &'static str;

    /// Store content under `name` and return the locator to read it back with
    async fn put(
        &self,
        content: &[u8],
        name: &str,
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// Retrieve content by locator
    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Delete content by locator. Returns `false` if nothing was stored under it.
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;

    /// Public URL for a locator
    fn url_of(&self, name: &str) -> Result<String, StorageError>;

    /// Inverse of [`ObjectStorage::url_of`] for URLs this backend produced
    fn name_for_url(&self, url: &str) -> Option<String>;
}

/// Stand-in for the durable store when no bucket is configured.
///
/// Every operation fails, which routes all traffic to the local fallback.
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredStorage;

#[async_trait]
impl ObjectStorage for UnconfiguredStorage {
    fn backend_name(&self) -> &'static str {
        "unconfigured"
    }

    async fn put(&self, _: &[u8], _: &str, _: &str) -> Result<String, StorageError> {
        Err(Self::error())
    }

    async fn get(&self, _: &str) -> Result<Vec<u8>, StorageError> {
        Err(Self::error())
    }

    async fn delete(&self, _: &str) -> Result<bool, StorageError> {
        Err(Self::error())
    }

    fn url_of(&self, _: &str) -> Result<String, StorageError> {
        Err(Self::error())
    }

    fn name_for_url(&self, _: &str) -> Option<String> {
        None
    }
}

impl UnconfiguredStorage {
    fn error() -> StorageError {
        StorageError::Config("durable object store is not configured".to_string())
    }
}
