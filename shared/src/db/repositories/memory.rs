use super::MediaRecordStore;
use crate::db::error::DatabaseError;
use crate::models::{MediaRecord, MediaVariant, NewMediaRecord};
use crate::utils::generate_ulid;
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Process-local record store for tests and single-node development runs.
#[derive(Debug, Default)]
pub struct InMemoryMediaRecordStore {
    records: RwLock<HashMap<String, MediaRecord>>,
}

impl InMemoryMediaRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a record, as the owning post's deletion would
    pub async fn remove(&self, id: &str) -> Option<MediaRecord> {
        self.records.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn push_unique(record: &mut MediaRecord, variant: &MediaVariant) -> bool {
    if record.has_variant(variant.target_width, variant.target_height) {
        return false;
    }
    record.variants.push(variant.clone());
    true
}

#[async_trait]
impl MediaRecordStore for InMemoryMediaRecordStore {
    async fn create(&self, record: NewMediaRecord) -> Result<MediaRecord, DatabaseError> {
        let now = OffsetDateTime::now_utc();
        let created = MediaRecord {
            id: generate_ulid(),
            owner_id: record.owner_id,
            original_name: record.original_name,
            content_type: record.content_type,
            original_url: record.original_url,
            durable_url: record.durable_url,
            variants: Vec::new(),
            processing_complete: false,
            created_at: now,
            updated_at: now,
        };

        self.records
            .write()
            .await
            .insert(created.id.clone(), created.clone());

        Ok(created)
    }

    async fn get(&self, id: &str) -> Result<Option<MediaRecord>, DatabaseError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn append_variant(
        &self,
        id: &str,
        variant: &MediaVariant,
    ) -> Result<bool, DatabaseError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;

        let inserted = push_unique(record, variant);
        record.updated_at = OffsetDateTime::now_utc();
        Ok(inserted)
    }

    async fn mark_complete(&self, id: &str) -> Result<(), DatabaseError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;

        record.processing_complete = true;
        record.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn set_durable_url(&self, id: &str, url: &str) -> Result<bool, DatabaseError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;

        if record.has_durable_copy() {
            return Ok(false);
        }

        record.durable_url = Some(url.to_string());
        record.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn find_needing_migration(
        &self,
        local_url_prefix: &str,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MediaRecord>, DatabaseError> {
        let records = self.records.read().await;

        let mut candidates: Vec<MediaRecord> = records
            .values()
            .filter(|r| r.needs_migration(local_url_prefix))
            .filter(|r| after.map_or(true, |after| r.id.as_str() > after))
            .cloned()
            .collect();

        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        candidates.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(candidates)
    }

    async fn finish_processing(
        &self,
        id: &str,
        variants: &[MediaVariant],
    ) -> Result<(), DatabaseError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;

        for variant in variants {
            push_unique(record, variant);
        }
        record.processing_complete = true;
        record.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(original_url: Option<&str>) -> NewMediaRecord {
        NewMediaRecord {
            owner_id: "post-1".to_string(),
            original_name: "cat.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            original_url: original_url.map(str::to_string),
            durable_url: None,
        }
    }

    fn variant(width: u32, height: u32) -> MediaVariant {
        MediaVariant {
            width,
            height,
            target_width: width,
            target_height: height,
            format: "webp".to_string(),
            url: format!("/local-blobs/x_{}x{}.webp", width, height),
        }
    }

    #[tokio::test]
    async fn test_create_starts_incomplete_without_variants() {
        let store = InMemoryMediaRecordStore::new();
        let record = store
            .create(new_record(Some("/local-blobs/a_cat.jpg")))
            .await
            .unwrap();

        assert!(!record.processing_complete);
        assert!(record.variants.is_empty());
        assert_eq!(store.get(&record.id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_append_variant_is_unique_by_dimensions() {
        let store = InMemoryMediaRecordStore::new();
        let record = store.create(new_record(None)).await.unwrap();

        assert!(store.append_variant(&record.id, &variant(320, 213)).await.unwrap());
        assert!(!store.append_variant(&record.id, &variant(320, 213)).await.unwrap());
        assert!(store.append_variant(&record.id, &variant(640, 427)).await.unwrap());

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.variants.len(), 2);
    }

    #[tokio::test]
    async fn test_mutations_on_missing_record_are_not_found() {
        let store = InMemoryMediaRecordStore::new();

        assert!(matches!(
            store.mark_complete("missing").await,
            Err(DatabaseError::NotFound(_))
        ));
        assert!(matches!(
            store.append_variant("missing", &variant(1, 1)).await,
            Err(DatabaseError::NotFound(_))
        ));
        assert!(matches!(
            store.set_durable_url("missing", "https://x").await,
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_durable_url_only_writes_once() {
        let store = InMemoryMediaRecordStore::new();
        let record = store
            .create(new_record(Some("/local-blobs/a_cat.jpg")))
            .await
            .unwrap();

        assert!(store.set_durable_url(&record.id, "https://s3/first").await.unwrap());
        assert!(!store.set_durable_url(&record.id, "https://s3/second").await.unwrap());

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.durable_url.as_deref(), Some("https://s3/first"));
    }

    #[tokio::test]
    async fn test_find_needing_migration_filters_and_pages() {
        let store = InMemoryMediaRecordStore::new();
        let mut local_ids = Vec::new();
        for _ in 0..3 {
            let r = store
                .create(new_record(Some("/local-blobs/a_cat.jpg")))
                .await
                .unwrap();
            local_ids.push(r.id);
        }
        store
            .create(new_record(Some("https://bucket.s3/a_cat.jpg")))
            .await
            .unwrap();
        store.create(new_record(None)).await.unwrap();
        local_ids.sort();

        let first = store
            .find_needing_migration("/local-blobs", None, 2)
            .await
            .unwrap();
        assert_eq!(
            first.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
            local_ids[..2].to_vec()
        );

        let rest = store
            .find_needing_migration("/local-blobs", Some(&first[1].id), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, local_ids[2]);
    }

    #[tokio::test]
    async fn test_finish_processing_attaches_all_and_completes() {
        let store = InMemoryMediaRecordStore::new();
        let record = store.create(new_record(None)).await.unwrap();

        store
            .finish_processing(&record.id, &[variant(320, 213), variant(640, 427)])
            .await
            .unwrap();

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert!(stored.processing_complete);
        assert_eq!(stored.variants.len(), 2);
    }
}
