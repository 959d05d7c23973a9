use super::{FallbackStorage, LocalStorage, ObjectStorage, S3Storage, StorageError, UnconfiguredStorage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Everything needed to build the media storage stack
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub local_root: PathBuf,
    pub local_url_prefix: String,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub public_base_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            local_root: PathBuf::from("local-blobs"),
            local_url_prefix: "/local-blobs".to_string(),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            public_base_url: None,
        }
    }
}

/// The storage facade plus direct handles on its two backends, which the
/// reconciliation sweeper addresses individually.
#[derive(Clone)]
pub struct StorageStack {
    pub facade: FallbackStorage,
    pub durable: Arc<dyn ObjectStorage>,
    pub local: Arc<LocalStorage>,
}

pub async fn create_media_storage(
    settings: &StorageSettings,
) -> Result<StorageStack, StorageError> {
    let local = Arc::new(LocalStorage::new(
        settings.local_root.clone(),
        settings.local_url_prefix.clone(),
    ));

    let durable: Arc<dyn ObjectStorage> = match &settings.s3_bucket {
        Some(bucket) => Arc::new(
            S3Storage::new(
                bucket.clone(),
                settings.s3_region.clone(),
                settings.s3_endpoint.clone(),
                settings.public_base_url.clone(),
            )
            .await?,
        ),
        None => {
            warn!("No S3 bucket configured, media will be stored on local disk only");
            Arc::new(UnconfiguredStorage)
        }
    };

    Ok(StorageStack {
        facade: FallbackStorage::new(durable.clone(), local.clone()),
        durable,
        local,
    })
}
