use crate::config::{MediaConfig, TargetSize};
use crate::error::{PipelineError, ValidationError};
use crate::queue_processor::{ProcessingJob, ProcessingQueue};
use crate::validator::{ImageValidator, UploadedFile};
use crate::variants::{VariantGenerator, VARIANT_CONTENT_TYPE, VARIANT_FORMAT};
use image::DynamicImage;
use shared::db::repositories::MediaRecordStore;
use shared::{DatabaseError, FallbackStorage, MediaRecord, MediaVariant, NewMediaRecord};
use std::path::Path;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// What the synchronous upload path did with a valid file
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Original stored and variant generation queued
    Scheduled(MediaRecord),
    /// Record created, but no processing is queued for it. Either the
    /// original could not be stored anywhere or the queue refused the job.
    Unscheduled(MediaRecord),
    /// The record store rejected the new record
    NotRecorded,
}

impl IngestOutcome {
    pub fn record(&self) -> Option<&MediaRecord> {
        match self {
            IngestOutcome::Scheduled(record) | IngestOutcome::Unscheduled(record) => Some(record),
            IngestOutcome::NotRecorded => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Variants committed and the record marked complete
    Completed {
        stored: usize,
        failed: Vec<TargetSize>,
    },
    AlreadyComplete,
    /// The record was deleted before or during processing
    RecordMissing,
    /// The record has no stored original to work from
    NoOriginal,
}

/// Ties validation, storage, the record store and variant generation together.
pub struct MediaPipeline {
    config: Arc<MediaConfig>,
    validator: ImageValidator,
    generator: VariantGenerator,
    storage: FallbackStorage,
    records: Arc<dyn MediaRecordStore>,
    queue: ProcessingQueue,
}

impl MediaPipeline {
    pub fn new(
        config: Arc<MediaConfig>,
        storage: FallbackStorage,
        records: Arc<dyn MediaRecordStore>,
        queue: ProcessingQueue,
    ) -> Self {
        Self {
            validator: ImageValidator::new(&config),
            generator: VariantGenerator::new(config.webp_quality),
            config,
            storage,
            records,
            queue,
        }
    }

    pub fn validator(&self) -> &ImageValidator {
        &self.validator
    }

    pub fn storage(&self) -> &FallbackStorage {
        &self.storage
    }

    /// Validate, store and record an upload, then queue variant generation.
    ///
    /// Validation is the only failure a caller sees. Storage and scheduling
    /// problems are logged and reflected in the returned outcome.
    #[instrument(skip(self, owner_id, file), fields(owner_id = %owner_id, file_name = %file.file_name, size = file.size()))]
    pub async fn ingest(
        &self,
        owner_id: &str,
        file: UploadedFile,
    ) -> Result<IngestOutcome, ValidationError> {
        if let Err(e) = self.validator.validate(&file) {
            warn!("Rejected upload: {}", e);
            return Err(e);
        }

        let stored = match self
            .storage
            .put(&file.bytes, &file.file_name, &file.content_type)
            .await
        {
            Ok(stored) => Some(stored),
            Err(e) => {
                error!("Could not store original, recording upload without an image: {}", e);
                None
            }
        };

        let original_url = stored.as_ref().map(|s| s.url.clone());
        let durable_url = original_url
            .clone()
            .filter(|url| !self.storage.is_local_url(url));

        let record = match self
            .records
            .create(NewMediaRecord {
                owner_id: owner_id.to_string(),
                original_name: file.file_name.clone(),
                content_type: file.content_type.clone(),
                original_url,
                durable_url,
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to create media record: {}", e);
                if let Some(stored) = stored {
                    if let Err(e) = self.storage.delete(&stored.name).await {
                        warn!("Failed to remove orphaned original {}: {}", stored.name, e);
                    }
                }
                return Ok(IngestOutcome::NotRecorded);
            }
        };

        if record.original_url.is_none() {
            return Ok(IngestOutcome::Unscheduled(record));
        }

        match self.queue.enqueue(ProcessingJob::new(&record.id)) {
            Ok(()) => {
                info!("Accepted upload as record {}", record.id);
                Ok(IngestOutcome::Scheduled(record))
            }
            Err(e) => {
                error!("Failed to schedule processing for record {}: {}", record.id, e);
                Ok(IngestOutcome::Unscheduled(record))
            }
        }
    }

    /// Generate, store and attach every configured variant of a record.
    ///
    /// Per-size failures are logged and skipped; the record is still marked
    /// complete with whatever succeeded. Failing to fetch or decode the
    /// original leaves the record incomplete.
    #[instrument(skip(self, record_id), fields(record_id = %record_id, file_name = tracing::field::Empty))]
    pub async fn process(&self, record_id: &str) -> Result<ProcessOutcome, PipelineError> {
        let Some(record) = self.records.get(record_id).await? else {
            warn!("Media record no longer exists, nothing to process");
            return Ok(ProcessOutcome::RecordMissing);
        };
        tracing::Span::current().record("file_name", record.original_name.as_str());

        if record.processing_complete {
            debug!("Record already processed");
            return Ok(ProcessOutcome::AlreadyComplete);
        }

        let Some(original_url) = record.original_url.as_deref() else {
            warn!("Record has no stored original");
            return Ok(ProcessOutcome::NoOriginal);
        };

        let locator = self.storage.locator_for_url(original_url).ok_or_else(|| {
            error!("No storage backend recognizes original URL {}", original_url);
            PipelineError::NotFound(original_url.to_string())
        })?;

        let original = self.storage.get(&locator).await.map_err(|e| {
            error!("Failed to fetch original: {}", e);
            PipelineError::from(e)
        })?;

        let image = tokio::task::spawn_blocking(move || VariantGenerator::decode(&original))
            .await?
            .map_err(|e| {
                error!("Original could not be decoded, leaving record incomplete: {}", e);
                e
            })?;
        let image = Arc::new(image);
        let stem = file_stem(&record.original_name);

        let mut variants = Vec::with_capacity(self.config.variant_sizes.len());
        let mut failed = Vec::new();

        for target in &self.config.variant_sizes {
            let result = timeout(
                self.config.variant_timeout,
                self.produce_variant(image.clone(), *target, &stem),
            )
            .await
            .unwrap_or_else(|_| {
                Err(PipelineError::Timeout {
                    operation: format!("{} variant", target),
                    seconds: self.config.variant_timeout.as_secs(),
                })
            });

            match result {
                Ok(variant) => variants.push(variant),
                Err(e) => {
                    warn!(
                        width = target.width,
                        height = target.height,
                        "Variant failed: {}",
                        e
                    );
                    failed.push(*target);
                }
            }
        }

        match self.records.finish_processing(record_id, &variants).await {
            Ok(()) => {}
            Err(DatabaseError::NotFound(_)) => {
                warn!("Record was deleted while processing, discarding variants");
                return Ok(ProcessOutcome::RecordMissing);
            }
            Err(e) => {
                error!("Failed to attach variants: {}", e);
                return Err(e.into());
            }
        }

        info!(
            "Processing complete: {} variants stored, {} failed",
            variants.len(),
            failed.len()
        );

        Ok(ProcessOutcome::Completed {
            stored: variants.len(),
            failed,
        })
    }

    async fn produce_variant(
        &self,
        image: Arc<DynamicImage>,
        target: TargetSize,
        stem: &str,
    ) -> Result<MediaVariant, PipelineError> {
        let generator = self.generator.clone();
        let encoded = tokio::task::spawn_blocking(move || generator.render(&image, target)).await??;

        let name = format!("{}_{}x{}.{}", stem, target.width, target.height, VARIANT_FORMAT);
        let stored = self
            .storage
            .put(&encoded.bytes, &name, VARIANT_CONTENT_TYPE)
            .await?;

        Ok(MediaVariant {
            width: encoded.width,
            height: encoded.height,
            target_width: target.width,
            target_height: target.height,
            format: VARIANT_FORMAT.to_string(),
            url: stored.url,
        })
    }
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string())
}
