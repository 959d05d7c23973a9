use super::{ObjectStorage, StorageError};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Filesystem-backed object store used when the durable store is unavailable.
///
/// Objects live at `{root}/{name}` and are served by a static-file collaborator
/// under `url_prefix`. The root directory is created lazily on first write.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    url_prefix: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        let url_prefix = url_prefix.into();
        Self {
            root: root.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub async fn root_exists(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Resolve an object name to its path under the root.
    ///
    /// Only plain relative names are accepted; `..`, absolute paths and
    /// empty names are rejected.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(name);
        let plain = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !plain {
            return Err(StorageError::InvalidName(name.to_string()));
        }

        Ok(self.root.join(relative))
    }

    /// Whether an object is present on disk
    pub async fn contains(&self, name: &str) -> bool {
        match self.path_for(name) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn put(
        &self,
        content: &[u8],
        name: &str,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let path = self.path_for(name)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a temp sibling first, then rename into place
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        if let Err(e) = tokio::fs::write(&temp_path, content).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        info!(
            "Stored object locally: path={}, size={}",
            path.display(),
            content.len()
        );

        Ok(name.to_string())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(name)?;

        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(name.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.path_for(name)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted local object: {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn url_of(&self, name: &str) -> Result<String, StorageError> {
        Ok(format!("{}/{}", self.url_prefix, name))
    }

    fn name_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.url_prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}
