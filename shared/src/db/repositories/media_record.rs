use crate::db::error::DatabaseError;
use crate::models::{MediaRecord, MediaVariant, NewMediaRecord};
use crate::utils::generate_ulid;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Persistence operations the media pipeline needs from the record store.
///
/// Every mutation is a single read-modify-write of one record. Mutating a
/// record that does not exist returns [`DatabaseError::NotFound`].
#[async_trait]
pub trait MediaRecordStore: Send + Sync {
    async fn create(&self, record: NewMediaRecord) -> Result<MediaRecord, DatabaseError>;

    async fn get(&self, id: &str) -> Result<Option<MediaRecord>, DatabaseError>;

    /// Append one variant. Returns `false` if a variant for the same target
    /// box is already attached.
    async fn append_variant(&self, id: &str, variant: &MediaVariant)
        -> Result<bool, DatabaseError>;

    async fn mark_complete(&self, id: &str) -> Result<(), DatabaseError>;

    /// Set the durable pointer if it is still empty. Returns whether it wrote.
    async fn set_durable_url(&self, id: &str, url: &str) -> Result<bool, DatabaseError>;

    /// Records whose original lives only under `local_url_prefix`, ordered by
    /// id, starting strictly after `after`.
    async fn find_needing_migration(
        &self,
        local_url_prefix: &str,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MediaRecord>, DatabaseError>;

    /// Attach all variants of one processing pass and mark the record
    /// complete, so readers see either none or all of them.
    async fn finish_processing(
        &self,
        id: &str,
        variants: &[MediaVariant],
    ) -> Result<(), DatabaseError> {
        for variant in variants {
            self.append_variant(id, variant).await?;
        }
        self.mark_complete(id).await
    }
}

#[derive(Debug, FromRow)]
struct MediaRecordRow {
    id: String,
    owner_id: String,
    original_name: String,
    content_type: String,
    original_url: Option<String>,
    durable_url: Option<String>,
    processing_complete: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
struct MediaVariantRow {
    record_id: String,
    width: i32,
    height: i32,
    target_width: i32,
    target_height: i32,
    format: String,
    url: String,
}

impl MediaRecordRow {
    fn into_record(self, variants: Vec<MediaVariant>) -> MediaRecord {
        MediaRecord {
            id: self.id,
            owner_id: self.owner_id,
            original_name: self.original_name,
            content_type: self.content_type,
            original_url: self.original_url,
            durable_url: self.durable_url,
            variants,
            processing_complete: self.processing_complete,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl TryFrom<MediaVariantRow> for MediaVariant {
    type Error = DatabaseError;

    fn try_from(row: MediaVariantRow) -> Result<Self, Self::Error> {
        let dimension = |value: i32, what: &str| {
            u32::try_from(value)
                .map_err(|_| DatabaseError::InvalidData(format!("negative {} {}", what, value)))
        };

        Ok(MediaVariant {
            width: dimension(row.width, "width")?,
            height: dimension(row.height, "height")?,
            target_width: dimension(row.target_width, "target width")?,
            target_height: dimension(row.target_height, "target height")?,
            format: row.format,
            url: row.url,
        })
    }
}

const RECORD_COLUMNS: &str = r#"
    id, owner_id, original_name, content_type, original_url, durable_url,
    processing_complete, created_at, updated_at
"#;

pub struct PgMediaRecordRepository {
    pool: PgPool,
}

impl PgMediaRecordRepository {
    pub fn new(pool: &PgPool) -> Self {
        Self { pool: pool.clone() }
    }

    async fn load_variants(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<MediaVariant>>, DatabaseError> {
        let rows = sqlx::query_as::<_, MediaVariantRow>(
            r#"
            SELECT record_id, width, height, target_width, target_height, format, url
            FROM media_variants
            WHERE record_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_record: HashMap<String, Vec<MediaVariant>> = HashMap::new();
        for row in rows {
            by_record
                .entry(row.record_id.clone())
                .or_default()
                .push(MediaVariant::try_from(row)?);
        }

        Ok(by_record)
    }

    async fn attach_variants(
        &self,
        rows: Vec<MediaRecordRow>,
    ) -> Result<Vec<MediaRecord>, DatabaseError> {
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut variants = self.load_variants(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let row_variants = variants.remove(&row.id).unwrap_or_default();
                row.into_record(row_variants)
            })
            .collect())
    }

    /// Lock the record row for the rest of the transaction
    async fn lock_record(
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
    ) -> Result<(), DatabaseError> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT id FROM media_records WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;

        found
            .map(|_| ())
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))
    }

    async fn insert_variant(
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
        variant: &MediaVariant,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO media_variants
                (record_id, width, height, target_width, target_height, format, url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (record_id, target_width, target_height) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(variant.width as i32)
        .bind(variant.height as i32)
        .bind(variant.target_width as i32)
        .bind(variant.target_height as i32)
        .bind(&variant.format)
        .bind(&variant.url)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl MediaRecordStore for PgMediaRecordRepository {
    async fn create(&self, record: NewMediaRecord) -> Result<MediaRecord, DatabaseError> {
        let id = generate_ulid();
        let now = OffsetDateTime::now_utc();

        let row = sqlx::query_as::<_, MediaRecordRow>(&format!(
            r#"
            INSERT INTO media_records
                (id, owner_id, original_name, content_type, original_url, durable_url,
                 processing_complete, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $7)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&record.owner_id)
        .bind(&record.original_name)
        .bind(&record.content_type)
        .bind(&record.original_url)
        .bind(&record.durable_url)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_record(Vec::new()))
    }

    async fn get(&self, id: &str) -> Result<Option<MediaRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, MediaRecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM media_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.attach_variants(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn append_variant(
        &self,
        id: &str,
        variant: &MediaVariant,
    ) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_record(&mut tx, id).await?;
        let inserted = Self::insert_variant(&mut tx, id, variant).await?;
        sqlx::query("UPDATE media_records SET updated_at = CURRENT_TIMESTAMP WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(inserted)
    }

    async fn mark_complete(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE media_records
            SET processing_complete = TRUE, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn set_durable_url(&self, id: &str, url: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE media_records
            SET durable_url = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            AND (durable_url IS NULL OR durable_url = '')
            "#,
        )
        .bind(id)
        .bind(url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM media_records WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;

        if exists {
            Ok(false)
        } else {
            Err(DatabaseError::NotFound(id.to_string()))
        }
    }

    async fn find_needing_migration(
        &self,
        local_url_prefix: &str,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MediaRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, MediaRecordRow>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM media_records
            WHERE original_url IS NOT NULL
            AND left(original_url, length($1)) = $1
            AND (durable_url IS NULL OR durable_url = '')
            AND ($2::TEXT IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#
        ))
        .bind(local_url_prefix)
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        self.attach_variants(rows).await
    }

    async fn finish_processing(
        &self,
        id: &str,
        variants: &[MediaVariant],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_record(&mut tx, id).await?;

        for variant in variants {
            Self::insert_variant(&mut tx, id, variant).await?;
        }

        sqlx::query(
            r#"
            UPDATE media_records
            SET processing_complete = TRUE, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
