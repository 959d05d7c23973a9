use shared::db::repositories::MediaRecordStore;
use shared::{DatabaseError, LocalStorage, MediaRecord, ObjectStorage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PROBE_CONTENT: &[u8] = b"Blob storage connection test";

/// Counters for one sweep pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub migrated: usize,
    pub skipped_missing: usize,
    pub failed: usize,
}

/// Copies originals that only exist on local disk into the durable store and
/// records the durable URL.
///
/// A pass does nothing unless a probe write to the durable store succeeds.
/// Records are processed one at a time; a failure on one never stops the
/// rest of the batch.
pub struct ReconciliationSweeper {
    records: Arc<dyn MediaRecordStore>,
    durable: Arc<dyn ObjectStorage>,
    local: Arc<LocalStorage>,
    batch_size: i64,
    timeout: Duration,
}

impl ReconciliationSweeper {
    pub fn new(
        records: Arc<dyn MediaRecordStore>,
        durable: Arc<dyn ObjectStorage>,
        local: Arc<LocalStorage>,
        batch_size: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            records,
            durable,
            local,
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    /// Run one pass and return how many records were migrated
    pub async fn sweep_once(&self) -> usize {
        self.sweep().await.migrated
    }

    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        if tokio::time::timeout(self.timeout, self.run_pass(&mut report))
            .await
            .is_err()
        {
            warn!(
                "Sweep stopped after {}s, remaining records wait for the next pass",
                self.timeout.as_secs()
            );
        }

        if report.migrated + report.skipped_missing + report.failed > 0 {
            info!(
                "Sweep finished: migrated={}, skipped_missing={}, failed={}",
                report.migrated, report.skipped_missing, report.failed
            );
        }

        report
    }

    async fn run_pass(&self, report: &mut SweepReport) {
        if !self.durable_reachable().await {
            return;
        }

        if !self.local.root_exists().await {
            debug!("Local media directory {} does not exist", self.local.root().display());
            return;
        }

        let prefix = format!("{}/", self.local.url_prefix());
        let mut after: Option<String> = None;

        loop {
            let batch = match self
                .records
                .find_needing_migration(&prefix, after.as_deref(), self.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Failed to load records awaiting migration: {}", e);
                    return;
                }
            };

            let Some(last) = batch.last() else {
                return;
            };
            after = Some(last.id.clone());
            debug!("Migrating batch of {} records", batch.len());

            for record in &batch {
                self.migrate(record, report).await;
            }

            if (batch.len() as i64) < self.batch_size {
                return;
            }
        }
    }

    /// Write and delete a throwaway object
    async fn durable_reachable(&self) -> bool {
        let name = format!("healthcheck/test-connection-{}.txt", Uuid::new_v4());

        let locator = match self.durable.put(PROBE_CONTENT, &name, "text/plain").await {
            Ok(locator) => locator,
            Err(e) => {
                warn!(
                    backend = self.durable.backend_name(),
                    "Durable store unreachable, skipping sweep: {}", e
                );
                return false;
            }
        };

        match self.durable.delete(&locator).await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    backend = self.durable.backend_name(),
                    "Durable store probe cleanup failed, skipping sweep: {}", e
                );
                false
            }
        }
    }

    async fn migrate(&self, record: &MediaRecord, report: &mut SweepReport) {
        let Some(name) = record
            .original_url
            .as_deref()
            .and_then(|url| self.local.name_for_url(url))
        else {
            debug!("Record {} has no local original", record.id);
            return;
        };

        if !self.local.contains(&name).await {
            warn!(record_id = %record.id, "Local original {} is missing", name);
            report.skipped_missing += 1;
            return;
        }

        let content = match self.local.get(&name).await {
            Ok(content) => content,
            Err(e) => {
                error!(record_id = %record.id, "Failed to read local original {}: {}", name, e);
                report.failed += 1;
                return;
            }
        };

        let key = format!("media-{}/{}", record.id, name);
        let url = match self.durable.put(&content, &key, &record.content_type).await {
            Ok(locator) => self.durable.url_of(&locator),
            Err(e) => Err(e),
        };
        let url = match url {
            Ok(url) => url,
            Err(e) => {
                error!(record_id = %record.id, "Failed to upload {} to durable store: {}", name, e);
                report.failed += 1;
                return;
            }
        };

        match self.records.set_durable_url(&record.id, &url).await {
            Ok(true) => {
                info!(record_id = %record.id, "Migrated {} to {}", name, url);
                report.migrated += 1;
            }
            Ok(false) => {
                debug!(record_id = %record.id, "Durable URL already set, keeping existing");
            }
            Err(DatabaseError::NotFound(_)) => {
                debug!(record_id = %record.id, "Record deleted during sweep");
            }
            Err(e) => {
                error!(record_id = %record.id, "Failed to record durable URL: {}", e);
                report.failed += 1;
            }
        }
    }
}
