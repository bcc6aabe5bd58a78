//! TextExtractor: turns a stored image or PDF into recognized text.
//!
//! Images go through [`crate::preprocess`] and a single recognition call.
//! PDFs are rasterized by the backend and every page is pre-processed and
//! recognized in order; page texts are joined with a blank line. Errors never
//! escape: they come back as empty text plus a note.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use kyc_core::config::OcrConfig;
use kyc_core::{Error, RecognitionOptions, Result, TextRecognitionBackend};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::preprocess;

/// Separator between recognized pages.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// Recognized text for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextExtraction {
    /// Trimmed text with `\n` line endings; may be empty.
    pub text: String,
    /// Why text is missing or partial.
    pub error: Option<String>,
    /// Pages (or images) successfully recognized.
    pub pages: usize,
}

impl TextExtraction {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            error: Some(error.into()),
            pages: 0,
        }
    }
}

/// What the extractor does with a content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Image,
    Pdf,
    Unsupported,
}

impl SourceKind {
    pub fn of(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();
        if essence == "application/pdf" {
            Self::Pdf
        } else if essence.starts_with("image/") && essence != "image/svg+xml" {
            Self::Image
        } else {
            Self::Unsupported
        }
    }
}

/// Line endings to `\n`, outer whitespace (including form feeds) trimmed.
pub fn clean_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Drives a [`TextRecognitionBackend`] over stored documents.
#[derive(Clone)]
pub struct TextExtractor {
    backend: Arc<dyn TextRecognitionBackend>,
    options: RecognitionOptions,
    min_image_dimension: u32,
    dpi: u32,
    work_dir: Option<PathBuf>,
}

impl std::fmt::Debug for TextExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextExtractor")
            .field("backend", &self.backend.name())
            .field("options", &self.options)
            .field("min_image_dimension", &self.min_image_dimension)
            .field("dpi", &self.dpi)
            .field("work_dir", &self.work_dir)
            .finish()
    }
}

impl TextExtractor {
    pub fn new(backend: Arc<dyn TextRecognitionBackend>, config: &OcrConfig) -> Self {
        Self {
            backend,
            options: config.recognition_options(),
            min_image_dimension: config.min_image_dimension,
            dpi: config.dpi,
            work_dir: None,
        }
    }

    /// Parent directory for per-extraction scratch space (system temp otherwise).
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn backend(&self) -> &Arc<dyn TextRecognitionBackend> {
        &self.backend
    }

    /// Recognize the text of `path`, interpreting it as `content_type`.
    #[instrument(skip(self), fields(subsystem = "ocr", op = "extract", backend = self.backend.name()))]
    pub async fn extract(&self, path: &Path, content_type: &str) -> TextExtraction {
        let start = Instant::now();
        let kind = SourceKind::of(content_type);

        let result = match kind {
            SourceKind::Image => self.extract_image(path).await,
            SourceKind::Pdf => self.extract_pdf(path).await,
            SourceKind::Unsupported => {
                debug!("No recognition route for content type");
                return TextExtraction::failed(format!(
                    "unsupported content type for text recognition: {}",
                    content_type
                ));
            }
        };

        match result {
            Ok(extraction) => {
                info!(
                    pages = extraction.pages,
                    chars = extraction.text.chars().count(),
                    partial = extraction.error.is_some(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Text extraction finished"
                );
                extraction
            }
            Err(e) => {
                warn!(error = %e, duration_ms = start.elapsed().as_millis() as u64, "Text extraction failed");
                TextExtraction::failed(e.to_string())
            }
        }
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("kyc-ocr-");
        let dir = match &self.work_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        };
        dir.map_err(|e| Error::Extraction(format!("create scratch dir: {}", e)))
    }

    async fn recognize_image(&self, image: &Path, scratch: &Path) -> Result<String> {
        let prepared =
            preprocess::prepare(image.to_path_buf(), self.min_image_dimension, scratch.to_path_buf())
                .await?;
        let text = self.backend.recognize(prepared.path(), &self.options).await?;
        Ok(clean_text(&text))
    }

    async fn extract_image(&self, path: &Path) -> Result<TextExtraction> {
        let scratch = self.scratch_dir()?;
        let text = self.recognize_image(path, scratch.path()).await?;
        Ok(TextExtraction {
            text,
            error: None,
            pages: 1,
        })
    }

    async fn extract_pdf(&self, path: &Path) -> Result<TextExtraction> {
        let scratch = self.scratch_dir()?;
        let pages = self.backend.rasterize(path, self.dpi, scratch.path()).await?;
        if pages.is_empty() {
            return Ok(TextExtraction::failed("no pages rendered from document"));
        }

        let mut texts = Vec::with_capacity(pages.len());
        let mut failures = Vec::new();
        for (i, page) in pages.iter().enumerate() {
            match self.recognize_image(page, scratch.path()).await {
                Ok(text) => {
                    if !text.is_empty() {
                        texts.push(text);
                    }
                }
                Err(e) => {
                    warn!(page = i + 1, error = %e, "Recognition failed for page, skipping");
                    failures.push(format!("page {}: {}", i + 1, e));
                }
            }
        }

        if failures.len() == pages.len() {
            return Err(Error::Extraction(failures.join("; ")));
        }

        Ok(TextExtraction {
            text: texts.join(PAGE_SEPARATOR),
            error: (!failures.is_empty()).then(|| failures.join("; ")),
            pages: pages.len() - failures.len(),
        })
    }
}
