use super::{ObjectStorage, StorageError};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

/// Result of a successful [`FallbackStorage::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Opaque locator for later `get`/`delete` calls
    pub name: String,
    /// URL assigned by whichever backend accepted the write
    pub url: String,
}

/// Storage facade: every operation goes to the durable store first and is
/// replayed against the local store when the durable store fails.
///
/// Callers never learn which backend served a request. Only when both
/// backends fail does an operation return [`StorageError::Unavailable`].
#[derive(Clone)]
pub struct FallbackStorage {
    durable: Arc<dyn ObjectStorage>,
    local: Arc<dyn ObjectStorage>,
}

impl FallbackStorage {
    pub fn new(durable: Arc<dyn ObjectStorage>, local: Arc<dyn ObjectStorage>) -> Self {
        Self { durable, local }
    }

    pub fn durable(&self) -> &Arc<dyn ObjectStorage> {
        &self.durable
    }

    pub fn local(&self) -> &Arc<dyn ObjectStorage> {
        &self.local
    }

    /// Store content under a fresh unique name derived from `file_name`.
    ///
    /// The same name is used on both backends so objects never collide
    /// across them.
    pub async fn put(
        &self,
        content: &[u8],
        file_name: &str,
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let name = unique_object_name(file_name);

        let durable_err = match self.durable.put(content, &name, content_type).await {
            Ok(locator) => match self.durable.url_of(&locator) {
                Ok(url) => return Ok(StoredObject { name: locator, url }),
                Err(e) => {
                    // Unreachable by URL, so remove it before writing the local copy
                    if let Err(cleanup) = self.durable.delete(&locator).await {
                        warn!(name = %locator, "Failed to remove unaddressable durable object: {}", cleanup);
                    }
                    e
                }
            },
            Err(e) => e,
        };

        warn!(
            name = %name,
            backend = self.durable.backend_name(),
            "Durable store rejected upload, falling back to local storage: {}",
            durable_err
        );

        let local_result = match self.local.put(content, &name, content_type).await {
            Ok(locator) => self
                .local
                .url_of(&locator)
                .map(|url| StoredObject { name: locator, url }),
            Err(e) => Err(e),
        };

        local_result.map_err(|local_err| both_failed(&name, durable_err, local_err))
    }

    pub async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let durable_err = match self.durable.get(name).await {
            Ok(content) => return Ok(content),
            Err(e) => e,
        };

        warn!(
            name = %name,
            backend = self.durable.backend_name(),
            "Durable store read failed, trying local storage: {}",
            durable_err
        );

        self.local
            .get(name)
            .await
            .map_err(|local_err| both_failed(name, durable_err, local_err))
    }

    /// Delete an object wherever it lives.
    ///
    /// A durable miss still checks the local store, since the object may have
    /// been written there while the durable store was down.
    pub async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        match self.durable.delete(name).await {
            Ok(true) => Ok(true),
            Ok(false) => self.local.delete(name).await.map_err(|e| {
                warn!(name = %name, "Local delete failed after durable miss: {}", e);
                e
            }),
            Err(durable_err) => {
                warn!(
                    name = %name,
                    backend = self.durable.backend_name(),
                    "Durable store delete failed, trying local storage: {}",
                    durable_err
                );
                self.local
                    .delete(name)
                    .await
                    .map_err(|local_err| both_failed(name, durable_err, local_err))
            }
        }
    }

    /// URL for a locator. Prefer the URL returned by `put`, which reflects
    /// the backend that actually holds the object.
    pub fn url_of(&self, name: &str) -> Result<String, StorageError> {
        match self.durable.url_of(name) {
            Ok(url) => Ok(url),
            Err(durable_err) => self
                .local
                .url_of(name)
                .map_err(|local_err| both_failed(name, durable_err, local_err)),
        }
    }

    /// Map a URL produced by either backend back to its locator
    pub fn locator_for_url(&self, url: &str) -> Option<String> {
        self.durable
            .name_for_url(url)
            .or_else(|| self.local.name_for_url(url))
    }

    /// Whether a URL points into the local fallback store
    pub fn is_local_url(&self, url: &str) -> bool {
        self.local.name_for_url(url).is_some()
    }
}

fn both_failed(name: &str, durable: StorageError, local: StorageError) -> StorageError {
    error!(
        name = %name,
        "Both storage backends failed: durable={}, local={}",
        durable, local
    );
    StorageError::Unavailable {
        name: name.to_string(),
        durable: durable.to_string(),
        local: local.to_string(),
    }
}

/// `{uuid}_{file name}` with the file name reduced to a safe single segment.
pub fn unique_object_name(file_name: &str) -> String {
    format!("{}_{}", Uuid::new_v4(), sanitize_file_name(file_name))
}

fn sanitize_file_name(file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
