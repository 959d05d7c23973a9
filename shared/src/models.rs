use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One resized, re-encoded derivative of an uploaded image.
///
/// `width`/`height` are the encoded dimensions; the target box identifies the
/// variant, since small originals produce identical dimensions for every box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaVariant {
    pub width: u32,
    pub height: u32,
    pub target_width: u32,
    pub target_height: u32,
    pub format: String,
    pub url: String,
}

/// Metadata for a single uploaded image, owned by a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: String,
    pub owner_id: String,
    pub original_name: String,
    pub content_type: String,
    /// `None` when the original could not be stored in any backend
    pub original_url: Option<String>,
    /// Set once the original is known to live in the durable store
    pub durable_url: Option<String>,
    pub variants: Vec<MediaVariant>,
    pub processing_complete: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl MediaRecord {
    /// Whether a variant for the given target box is attached
    pub fn has_variant(&self, target_width: u32, target_height: u32) -> bool {
        self.variants
            .iter()
            .any(|v| v.target_width == target_width && v.target_height == target_height)
    }

    pub fn has_durable_copy(&self) -> bool {
        self.durable_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    /// Local-only originals that the reconciliation sweep should pick up
    pub fn needs_migration(&self, local_url_prefix: &str) -> bool {
        !self.has_durable_copy()
            && self
                .original_url
                .as_deref()
                .is_some_and(|url| url.starts_with(local_url_prefix))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMediaRecord {
    pub owner_id: String,
    pub original_name: String,
    pub content_type: String,
    pub original_url: Option<String>,
    pub durable_url: Option<String>,
}
