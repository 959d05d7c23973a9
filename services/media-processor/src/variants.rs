use crate::config::TargetSize;
use crate::error::PipelineError;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::{debug, warn};

pub const VARIANT_FORMAT: &str = "webp";
pub const VARIANT_CONTENT_TYPE: &str = "image/webp";

/// One re-encoded derivative, not yet stored
#[derive(Debug, Clone)]
pub struct EncodedVariant {
    pub target: TargetSize,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Largest size with the source aspect ratio that fits inside the box.
/// Sources already inside the box keep their size.
pub fn fit_within(width: u32, height: u32, target: TargetSize) -> (u32, u32) {
    if width <= target.width && height <= target.height {
        return (width, height);
    }

    let ratio = f64::min(
        target.width as f64 / width as f64,
        target.height as f64 / height as f64,
    );
    let scaled = |side: u32, bound: u32| ((side as f64 * ratio).round() as u32).clamp(1, bound);

    (scaled(width, target.width), scaled(height, target.height))
}

/// Resizes decoded images and encodes them as lossy WebP.
///
/// Everything here is CPU-bound; async callers should run it on the
/// blocking pool.
#[derive(Debug, Clone)]
pub struct VariantGenerator {
    quality: f32,
}

impl VariantGenerator {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: f32::from(quality.min(100)),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
        image::load_from_memory(bytes).map_err(|e| PipelineError::Decode(e.to_string()))
    }

    pub fn render(
        &self,
        image: &DynamicImage,
        target: TargetSize,
    ) -> Result<EncodedVariant, PipelineError> {
        let (width, height) = fit_within(image.width(), image.height(), target);

        let rgba = if (width, height) == (image.width(), image.height()) {
            image.to_rgba8()
        } else {
            image
                .resize_exact(width, height, FilterType::Lanczos3)
                .to_rgba8()
        };

        let encoded = webp::Encoder::from_rgba(rgba.as_raw(), width, height)
            .encode_simple(false, self.quality)
            .map_err(|e| PipelineError::Encode(format!("{:?}", e)))?;

        debug!(
            "Rendered {} variant at {}x{} ({} bytes)",
            target,
            width,
            height,
            encoded.len()
        );

        Ok(EncodedVariant {
            target,
            width,
            height,
            bytes: encoded.to_vec(),
        })
    }

    /// Render every target, skipping the ones that fail
    pub fn generate(&self, image: &DynamicImage, targets: &[TargetSize]) -> Vec<EncodedVariant> {
        targets
            .iter()
            .filter_map(|target| match self.render(image, *target) {
                Ok(variant) => Some(variant),
                Err(e) => {
                    warn!("Skipping {} variant: {}", target, e);
                    None
                }
            })
            .collect()
    }
}
