//! TesseractBackend: recognizes images with the tesseract CLI and rasterizes
//! PDFs with pdftoppm.
//!
//! Pipeline for paginated input: PDF → pdftoppm (pages to PNG) → tesseract per page.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use kyc_core::config::OcrConfig;
use kyc_core::defaults::{OCR_CMD_TIMEOUT_SECS, PDFTOPPM_BIN, TESSERACT_BIN};
use kyc_core::{Error, RecognitionOptions, Result, TextRecognitionBackend};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Run a command with a timeout, returning stdout as a string.
async fn run_cmd_with_timeout(cmd: &mut Command, timeout_secs: u64) -> Result<String> {
    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| {
            Error::Extraction(format!(
                "External command timed out after {}s",
                timeout_secs
            ))
        })?
        .map_err(|e| Error::Extraction(format!("Failed to execute command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Extraction(format!(
            "Command failed (exit {}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Production recognition backend shelling out to tesseract and pdftoppm.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    tesseract_bin: String,
    pdftoppm_bin: String,
    timeout_secs: u64,
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self {
            tesseract_bin: TESSERACT_BIN.to_string(),
            pdftoppm_bin: PDFTOPPM_BIN.to_string(),
            timeout_secs: OCR_CMD_TIMEOUT_SECS,
        }
    }
}

impl TesseractBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            tesseract_bin: config.tesseract_bin.clone(),
            pdftoppm_bin: config.pdftoppm_bin.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    /// `-l` argument: languages joined with `+`, `eng` when none are set.
    fn language_arg(options: &RecognitionOptions) -> String {
        if options.languages.is_empty() {
            "eng".to_string()
        } else {
            options.languages.join("+")
        }
    }
}

#[async_trait]
impl TextRecognitionBackend for TesseractBackend {
    #[instrument(skip(self, options), fields(subsystem = "ocr", component = "tesseract", op = "recognize"))]
    async fn recognize(&self, image: &Path, options: &RecognitionOptions) -> Result<String> {
        let language = Self::language_arg(options);
        debug!(image = %image.display(), language = %language, psm = options.page_seg_mode, "Running tesseract");

        // tesseract INPUT stdout -l LANG --psm N
        run_cmd_with_timeout(
            Command::new(&self.tesseract_bin)
                .arg(image)
                .arg("stdout")
                .arg("-l")
                .arg(&language)
                .arg("--psm")
                .arg(options.page_seg_mode.to_string()),
            options.timeout_secs,
        )
        .await
    }

    #[instrument(skip(self), fields(subsystem = "ocr", component = "pdftoppm", op = "rasterize"))]
    async fn rasterize(&self, document: &Path, dpi: u32, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let prefix = out_dir.join("page");

        run_cmd_with_timeout(
            Command::new(&self.pdftoppm_bin)
                .arg("-png")
                .arg("-r")
                .arg(dpi.to_string())
                .arg(document)
                .arg(&prefix),
            self.timeout_secs * 3, // Allow more time for rendering
        )
        .await?;

        // pdftoppm zero-pads page numbers, so name order is page order
        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir)
            .await
            .map_err(|e| Error::Extraction(format!("Failed to read page dir: {}", e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Extraction(format!("Failed to read dir entry: {}", e)))?
        {
            let path = entry.path();
            let is_page = path.extension().and_then(|e| e.to_str()) == Some("png")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("page"));
            if is_page {
                pages.push(path);
            }
        }
        pages.sort();

        debug!(pages = pages.len(), "Rasterized document");
        Ok(pages)
    }

    async fn health_check(&self) -> Result<bool> {
        // pdftoppm -v exits 99 on older poppler builds
        let pdftoppm_ok = match Command::new(&self.pdftoppm_bin).arg("-v").output().await {
            Ok(output) => output.status.success() || output.status.code() == Some(99),
            Err(_) => false,
        };
        let tesseract_ok = match Command::new(&self.tesseract_bin).arg("--version").output().await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        };
        Ok(pdftoppm_ok && tesseract_ok)
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}
