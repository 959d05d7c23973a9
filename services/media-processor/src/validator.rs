use crate::config::MediaConfig;
use crate::error::{PipelineError, ValidationError};
use bytes::Bytes;
use std::path::Path;

/// An upload as received from the caller
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lower-cased extension with its leading dot, or empty if there is none
    pub fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default()
    }
}

/// Cheap upload checks that run before any bytes are stored.
///
/// Only size and extension are checked here; content is not sniffed, so a
/// renamed non-image passes and fails later at decode time.
#[derive(Debug, Clone)]
pub struct ImageValidator {
    max_bytes: u64,
    allowed_extensions: Vec<String>,
}

impl ImageValidator {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            max_bytes: config.max_upload_bytes,
            allowed_extensions: config.allowed_extensions.clone(),
        }
    }

    pub fn validate(&self, file: &UploadedFile) -> Result<(), ValidationError> {
        if file.size() > self.max_bytes {
            return Err(ValidationError::TooLarge {
                file_name: file.file_name.clone(),
                size: file.size(),
                limit: self.max_bytes,
            });
        }

        let extension = file.extension();
        if !self.allowed_extensions.iter().any(|e| *e == extension) {
            return Err(ValidationError::UnsupportedExtension {
                file_name: file.file_name.clone(),
                extension,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self, file: &UploadedFile) -> bool {
        self.validate(file).is_ok()
    }

    /// Decode the whole image to read its pixel dimensions
    pub fn dimensions_of(&self, file: &UploadedFile) -> Result<(u32, u32), PipelineError> {
        let image = image::load_from_memory(&file.bytes)
            .map_err(|e| PipelineError::Decode(format!("{}: {}", file.file_name, e)))?;
        Ok((image.width(), image.height()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn validator() -> ImageValidator {
        ImageValidator::new(&MediaConfig::default())
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        RgbImage::new(width, height)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_accepts_allowed_extensions_case_insensitively() {
        let v = validator();
        for name in ["a.jpg", "b.JPEG", "c.Png", "d.webp"] {
            assert!(v.is_valid(&UploadedFile::new(name, "image/jpeg", vec![1u8; 10])), "{}", name);
        }
    }

    #[test]
    fn test_rejects_unknown_or_missing_extension() {
        let v = validator();

        let err = v
            .validate(&UploadedFile::new("doc.pdf", "application/pdf", vec![1u8]))
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedExtension { ref extension, .. } if extension == ".pdf"));

        assert!(!v.is_valid(&UploadedFile::new("noextension", "image/png", vec![1u8])));
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        let v = validator();
        let limit = MediaConfig::default().max_upload_bytes as usize;

        assert!(v.is_valid(&UploadedFile::new("a.png", "image/png", vec![0u8; limit])));
        let err = v
            .validate(&UploadedFile::new("a.png", "image/png", vec![0u8; limit + 1]))
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { size, .. } if size == limit as u64 + 1));
    }

    #[test]
    fn test_empty_file_passes_validation() {
        assert!(validator().is_valid(&UploadedFile::new("empty.jpg", "image/jpeg", Vec::new())));
    }

    #[test]
    fn test_dimensions_of_decodes_image() {
        let v = validator();
        let file = UploadedFile::new("a.png", "image/png", png(40, 30));
        assert_eq!(v.dimensions_of(&file).unwrap(), (40, 30));

        let garbage = UploadedFile::new("a.png", "image/png", b"not an image".to_vec());
        assert!(matches!(v.dimensions_of(&garbage), Err(PipelineError::Decode(_))));
    }
}
