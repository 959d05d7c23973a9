#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use media_processor::{MediaConfig, MediaPipeline, ProcessingJob, ProcessingQueue, ReconciliationSweeper};
use shared::db::repositories::{InMemoryMediaRecordStore, MediaRecordStore};
use shared::storage::{FallbackStorage, LocalStorage, ObjectStorage, StorageError};
use shared::MediaRecord;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const DURABLE_BASE_URL: &str = "https://durable.test/media/";

#[derive(Debug, Clone)]
pub struct DurableObject {
    pub content: Vec<u8>,
    pub content_type: String,
}

/// In-memory durable store that can be switched off, made to reject
/// names containing a given fragment, or made to stall on such writes.
#[derive(Default)]
pub struct FakeDurable {
    objects: Mutex<HashMap<String, DurableObject>>,
    down: AtomicBool,
    reject_fragment: Mutex<Option<String>>,
    put_delay: Mutex<Option<(String, Duration)>>,
}

impl FakeDurable {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn reject_names_containing(&self, fragment: &str) {
        *self.reject_fragment.lock().unwrap() = Some(fragment.to_string());
    }

    /// Writes of names containing `fragment` sleep for `delay` first
    pub fn delay_puts_containing(&self, fragment: &str, delay: Duration) {
        *self.put_delay.lock().unwrap() = Some((fragment.to_string(), delay));
    }

    pub fn object(&self, name: &str) -> Option<DurableObject> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    fn check(&self, name: &str) -> Result<(), StorageError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("connection refused".to_string()));
        }
        if let Some(fragment) = self.reject_fragment.lock().unwrap().as_deref() {
            if name.contains(fragment) {
                return Err(StorageError::Backend(format!("rejected {}", name)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for FakeDurable {
    fn backend_name(&self) -> &'static str {
        "fake-durable"
    }

    async fn put(&self, content: &[u8], name: &str, content_type: &str) -> Result<String, StorageError> {
        let delay = self
            .put_delay
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(fragment, _)| name.contains(fragment.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.check(name)?;
        self.objects.lock().unwrap().insert(
            name.to_string(),
            DurableObject {
                content: content.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(name.to_string())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.check(name)?;
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .map(|o| o.content.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        self.check(name)?;
        Ok(self.objects.lock().unwrap().remove(name).is_some())
    }

    fn url_of(&self, name: &str) -> Result<String, StorageError> {
        Ok(format!("{}{}", DURABLE_BASE_URL, name))
    }

    fn name_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(DURABLE_BASE_URL).map(str::to_string)
    }
}

/// Local store wrapper whose writes fail for names containing a fragment
pub struct SelectiveLocal {
    inner: Arc<LocalStorage>,
    reject_fragment: Option<String>,
}

#[async_trait]
impl ObjectStorage for SelectiveLocal {
    fn backend_name(&self) -> &'static str {
        "selective-local"
    }

    async fn put(&self, content: &[u8], name: &str, content_type: &str) -> Result<String, StorageError> {
        if let Some(fragment) = &self.reject_fragment {
            if name.contains(fragment.as_str()) {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "no space left on device",
                )));
            }
        }
        self.inner.put(content, name, content_type).await
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        self.inner.delete(name).await
    }

    fn url_of(&self, name: &str) -> Result<String, StorageError> {
        self.inner.url_of(name)
    }

    fn name_for_url(&self, url: &str) -> Option<String> {
        self.inner.name_for_url(url)
    }
}

pub struct TestContext {
    pub dir: TempDir,
    pub config: Arc<MediaConfig>,
    pub durable: Arc<FakeDurable>,
    pub local: Arc<LocalStorage>,
    pub records: Arc<InMemoryMediaRecordStore>,
    pub pipeline: Arc<MediaPipeline>,
    pub receiver: Option<mpsc::Receiver<ProcessingJob>>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::build(MediaConfig::default(), None)
    }

    pub fn with_config(config: MediaConfig) -> Self {
        Self::build(config, None)
    }

    /// Local writes of names containing `fragment` fail
    pub fn with_failing_local(fragment: &str) -> Self {
        Self::build(MediaConfig::default(), Some(fragment))
    }

    fn build(mut config: MediaConfig, local_reject: Option<&str>) -> Self {
        let dir = TempDir::new().unwrap();
        config.storage.local_root = dir.path().join("local-blobs");
        let config = Arc::new(config);

        let durable = Arc::new(FakeDurable::default());
        let local = Arc::new(LocalStorage::new(
            config.storage.local_root.clone(),
            config.storage.local_url_prefix.clone(),
        ));
        let facade_local: Arc<dyn ObjectStorage> = Arc::new(SelectiveLocal {
            inner: local.clone(),
            reject_fragment: local_reject.map(str::to_string),
        });
        let storage = FallbackStorage::new(durable.clone(), facade_local);

        let records = Arc::new(InMemoryMediaRecordStore::new());
        let (queue, receiver) = ProcessingQueue::channel(config.queue_capacity);
        let pipeline = Arc::new(MediaPipeline::new(
            config.clone(),
            storage,
            records.clone(),
            queue,
        ));

        Self {
            dir,
            config,
            durable,
            local,
            records,
            pipeline,
            receiver: Some(receiver),
        }
    }

    pub fn sweeper(&self, batch_size: i64) -> ReconciliationSweeper {
        self.sweeper_with_timeout(batch_size, Duration::from_secs(30))
    }

    pub fn sweeper_with_timeout(&self, batch_size: i64, timeout: Duration) -> ReconciliationSweeper {
        ReconciliationSweeper::new(
            self.records.clone(),
            self.durable.clone(),
            self.local.clone(),
            batch_size,
            timeout,
        )
    }

    pub async fn record(&self, id: &str) -> MediaRecord {
        self.records
            .get(id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("record {} missing", id))
    }
}

/// A smooth gradient encoded in the given format
pub fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 96])
    });

    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    encoded_image(width, height, ImageFormat::Jpeg)
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    encoded_image(width, height, ImageFormat::Png)
}
