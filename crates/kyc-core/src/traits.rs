//! Capability traits the pipeline depends on.
//!
//! Each trait has one production implementation; tests substitute fakes that
//! return canned content types or text.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::Result;

// =============================================================================
// CONTENT SNIFFING
// =============================================================================

/// Detects the actual content type of a file from its leading bytes.
pub trait ContentSniffer: Send + Sync {
    /// Returns the detected MIME type, or `None` when the bytes match no known
    /// signature. An `Err` means the detector itself failed.
    fn sniff(&self, head: &[u8]) -> Result<Option<String>>;

    /// Human-readable name of this sniffer.
    fn name(&self) -> &str;
}

// =============================================================================
// TEXT RECOGNITION
// =============================================================================

/// Recognition parameters passed to every backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionOptions {
    /// Recognition language codes, tried jointly.
    pub languages: Vec<String>,
    /// Page segmentation mode.
    pub page_seg_mode: u8,
    /// Upper bound for one backend invocation.
    pub timeout_secs: u64,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            languages: crate::defaults::OCR_LANGUAGES
                .iter()
                .map(|l| l.to_string())
                .collect(),
            page_seg_mode: crate::defaults::OCR_PAGE_SEG_MODE,
            timeout_secs: crate::defaults::OCR_CMD_TIMEOUT_SECS,
        }
    }
}

/// Optical text recognition over raster images, plus rasterization of
/// paginated documents into page images.
#[async_trait]
pub trait TextRecognitionBackend: Send + Sync {
    /// Recognize text in a single raster image.
    async fn recognize(&self, image: &Path, options: &RecognitionOptions) -> Result<String>;

    /// Render each page of a paginated document into `out_dir`, returning the
    /// page images in page order.
    async fn rasterize(&self, document: &Path, dpi: u32, out_dir: &Path) -> Result<Vec<PathBuf>>;

    /// Check if the backend's external dependencies are available.
    async fn health_check(&self) -> Result<bool>;

    /// Human-readable name of this backend.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_recognition_options() {
        let options = RecognitionOptions::default();
        assert_eq!(options.languages, vec!["eng".to_string()]);
        assert_eq!(options.page_seg_mode, 6);
        assert!(options.timeout_secs > 0);
    }
}
