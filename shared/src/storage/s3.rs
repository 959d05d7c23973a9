use super::{ObjectStorage, StorageError};
use async_trait::async_trait;
use aws_sdk_s3::{
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
    Client as S3Client,
};
use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const DEFAULT_REGION: &str = "us-east-1";

/// Durable object store backed by an S3-compatible bucket.
#[derive(Debug)]
pub struct S3Storage {
    client: S3Client,
    bucket: String,
    region: String,
    public_base_url: String,
    bucket_ready: OnceCell<()>,
}

impl S3Storage {
    pub async fn new(
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        public_base_url: Option<String>,
    ) -> Result<Self, StorageError> {
        if bucket.trim().is_empty() {
            return Err(StorageError::Config("S3 bucket name is empty".to_string()));
        }

        let mut config_loader = aws_config::from_env();

        if let Some(region) = region {
            config_loader = config_loader.region(aws_config::Region::new(region));
        }

        let config = config_loader.load().await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let public_base_url = match (public_base_url, endpoint.as_deref()) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Some(endpoint_url)) => {
                format!("{}/{}", endpoint_url.trim_end_matches('/'), bucket)
            }
            (None, None) => format!("https://{}.s3.{}.amazonaws.com", bucket, region),
        };

        // Support custom endpoint for LocalStack/MinIO
        let client = match endpoint {
            Some(endpoint_url) => {
                let s3_config = aws_sdk_s3::config::Builder::from(&config)
                    .endpoint_url(endpoint_url)
                    .force_path_style(true)
                    .build();
                S3Client::from_conf(s3_config)
            }
            None => S3Client::new(&config),
        };

        info!(
            "Configured S3 durable storage: bucket={}, region={}, public_base_url={}",
            bucket, region, public_base_url
        );

        Ok(Self {
            client,
            bucket,
            region,
            public_base_url,
            bucket_ready: OnceCell::new(),
        })
    }

    /// Create the bucket on first use. A failed attempt is retried on the next call.
    async fn ensure_bucket(&self) -> Result<(), StorageError> {
        self.bucket_ready
            .get_or_try_init(|| async {
                if self
                    .client
                    .head_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .is_ok()
                {
                    return Ok(());
                }

                let mut request = self.client.create_bucket().bucket(&self.bucket);
                if self.region != DEFAULT_REGION {
                    request = request.create_bucket_configuration(
                        CreateBucketConfiguration::builder()
                            .location_constraint(BucketLocationConstraint::from(
                                self.region.as_str(),
                            ))
                            .build(),
                    );
                }

                match request.send().await {
                    Ok(_) => {
                        info!("Created S3 bucket {}", self.bucket);
                        Ok(())
                    }
                    Err(e) => {
                        let already_there = e.as_service_error().is_some_and(|se| {
                            se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists()
                        });
                        if already_there {
                            Ok(())
                        } else {
                            Err(StorageError::Backend(format!(
                                "Failed to provision bucket {}: {}",
                                self.bucket,
                                DisplayErrorContext(&e)
                            )))
                        }
                    }
                }
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn put(
        &self,
        content: &[u8],
        name: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.ensure_bucket().await?;

        let byte_stream = ByteStream::from(Bytes::copy_from_slice(content));

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .body(byte_stream)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(format!(
                    "Failed to upload {} to S3: {}",
                    name,
                    DisplayErrorContext(&e)
                ))
            })?;

        debug!(
            "Stored object in S3: bucket={}, key={}, size={}",
            self.bucket,
            name,
            content.len()
        );

        Ok(name.to_string())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.ensure_bucket().await?;

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(name.to_string())
                } else {
                    StorageError::Backend(format!(
                        "Failed to get {} from S3: {}",
                        name,
                        DisplayErrorContext(&e)
                    ))
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to read S3 response body: {}", e)))?
            .into_bytes();

        Ok(bytes.to_vec())
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        self.ensure_bucket().await?;

        // S3 deletes are idempotent, so existence has to be checked up front
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
        {
            Ok(_) => {}
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                return Ok(false);
            }
            Err(e) => {
                return Err(StorageError::Backend(format!(
                    "Failed to look up {} in S3: {}",
                    name,
                    DisplayErrorContext(&e)
                )));
            }
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(format!(
                    "Failed to delete {} from S3: {}",
                    name,
                    DisplayErrorContext(&e)
                ))
            })?;

        debug!("Deleted object from S3: bucket={}, key={}", self.bucket, name);

        Ok(true)
    }

    fn url_of(&self, name: &str) -> Result<String, StorageError> {
        Ok(format!("{}/{}", self.public_base_url, name))
    }

    fn name_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.public_base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running S3-compatible service (LocalStack, MinIO, etc.)
    // To run these tests:
    // 1. Start LocalStack: docker run -d -p 4566:4566 localstack/localstack
    // 2. Set environment variables: S3_ENDPOINT=http://localhost:4566 AWS_ACCESS_KEY_ID=test AWS_SECRET_ACCESS_KEY=test
    // 3. Run tests: cargo test --package shared --lib storage::s3

    async fn create_test_storage() -> Option<S3Storage> {
        let endpoint = std::env::var("S3_ENDPOINT").ok()?;

        S3Storage::new(
            "test-microblog-media".to_string(),
            Some("us-east-1".to_string()),
            Some(endpoint),
            None,
        )
        .await
        .ok()
    }

    #[tokio::test]
    async fn test_s3_put_get_delete() {
        let Some(storage) = create_test_storage().await else {
            println!("Skipping S3 test - no LocalStack/MinIO available");
            return;
        };

        let name = format!("test-{}.txt", uuid::Uuid::new_v4());
        let locator = storage
            .put(b"Hello, S3!", &name, "text/plain")
            .await
            .unwrap();
        assert_eq!(locator, name);

        let retrieved = storage.get(&locator).await.unwrap();
        assert_eq!(retrieved, b"Hello, S3!");

        assert!(storage.delete(&locator).await.unwrap());
        assert!(!storage.delete(&locator).await.unwrap());
        assert!(matches!(
            storage.get(&locator).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_s3_url_round_trip() {
        let storage = S3Storage::new(
            "media".to_string(),
            Some("eu-west-1".to_string()),
            None,
            Some("https://cdn.example.com/media/".to_string()),
        )
        .await
        .unwrap();

        let url = storage.url_of("abc_photo.jpg").unwrap();
        assert_eq!(url, "https://cdn.example.com/media/abc_photo.jpg");
        assert_eq!(
            storage.name_for_url(&url).as_deref(),
            Some("abc_photo.jpg")
        );
        assert_eq!(storage.name_for_url("/local-blobs/abc_photo.jpg"), None);
    }

    #[tokio::test]
    async fn test_s3_default_public_url_uses_bucket_and_region() {
        let storage = S3Storage::new(
            "media".to_string(),
            Some("eu-west-1".to_string()),
            None,
            None,
        )
        .await
        .unwrap();

        assert_eq!(
            storage.url_of("a/b.webp").unwrap(),
            "https://media.s3.eu-west-1.amazonaws.com/a/b.webp"
        );
    }
}
