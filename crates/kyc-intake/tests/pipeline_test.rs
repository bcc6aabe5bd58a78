//! End-to-end pipeline runs through DocumentIntake with fake sniffers and
//! recognition backends over a temporary storage root.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use kyc_core::{
    ContentSniffer, Error, ExtractionStatus, InferSniffer, IntakeConfig, LifecycleState,
    RecognitionOptions, Result, TextRecognitionBackend, UploadCandidate, ValidationErrorKind,
};
use kyc_intake::DocumentIntake;
use tempfile::TempDir;

const NATIONAL_ID_TEXT: &str = "ID No: AB1234567\nName: JANE DOE\nDOB: 05/11/1990";

struct StaticSniffer(&'static str);

impl ContentSniffer for StaticSniffer {
    fn sniff(&self, _head: &[u8]) -> Result<Option<String>> {
        Ok(Some(self.0.to_string()))
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Returns the same text for every image and renders `pages` blank pages.
struct CannedBackend {
    text: &'static str,
    pages: usize,
}

#[async_trait]
impl TextRecognitionBackend for CannedBackend {
    async fn recognize(&self, _image: &Path, _options: &RecognitionOptions) -> Result<String> {
        Ok(self.text.to_string())
    }

    async fn rasterize(&self, _document: &Path, _dpi: u32, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut pages = Vec::new();
        for i in 1..=self.pages {
            let path = out_dir.join(format!("page-{}.png", i));
            RgbImage::from_pixel(20, 20, Rgb([255, 255, 255]))
                .save(&path)
                .map_err(|e| Error::Extraction(e.to_string()))?;
            pages.push(path);
        }
        Ok(pages)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "canned"
    }
}

struct FailingBackend;

#[async_trait]
impl TextRecognitionBackend for FailingBackend {
    async fn recognize(&self, _image: &Path, _options: &RecognitionOptions) -> Result<String> {
        Err(Error::Extraction("tesseract exited 1".into()))
    }

    async fn rasterize(&self, _document: &Path, _dpi: u32, _out_dir: &Path) -> Result<Vec<PathBuf>> {
        Err(Error::Extraction("pdftoppm exited 1".into()))
    }

    async fn health_check(&self) -> Result<bool> {
        Err(Error::Extraction("tesseract not found".into()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

fn test_config(root: &Path) -> Arc<IntakeConfig> {
    let mut config = IntakeConfig::default();
    config.storage.root = root.to_path_buf();
    config.ocr.min_image_dimension = 10;
    Arc::new(config)
}

fn intake_with(
    root: &Path,
    sniffer: Arc<dyn ContentSniffer>,
    backend: Arc<dyn TextRecognitionBackend>,
) -> DocumentIntake {
    DocumentIntake::with_components(test_config(root), sniffer, backend)
}

fn png_bytes() -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([250, 250, 250])))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn count_files(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    let mut count = 0;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                count += 1;
            }
        }
    }
    count
}

#[tokio::test]
async fn test_process_national_id_scan() {
    let root = TempDir::new().unwrap();
    let intake = intake_with(
        root.path(),
        Arc::new(InferSniffer),
        Arc::new(CannedBackend { text: NATIONAL_ID_TEXT, pages: 0 }),
    );
    intake.initialize().await.unwrap();

    let candidate = UploadCandidate::from_bytes("front.PNG", png_bytes());
    let outcome = intake
        .process(candidate, "cust-42", "identity", "national_id", None)
        .await;

    assert!(outcome.is_completed(), "{:?}", outcome.result.error);
    let document = outcome.document.unwrap();
    assert_eq!(document.detected_content_type.as_deref(), Some("image/png"));
    assert_eq!(document.lifecycle_state, LifecycleState::Uploaded);
    assert!(document.relative_path.starts_with("documents/cust-42/identity/"));
    assert!(document.stored_filename.ends_with(".png"));

    let result = outcome.result;
    assert_eq!(result.stored_path.as_deref(), Some(document.relative_path.as_str()));
    assert_eq!(result.raw_text, NATIONAL_ID_TEXT);
    assert_eq!(result.extracted_fields.len(), 3);
    assert_eq!(result.extracted_fields["id_number"], "AB1234567");
    assert_eq!(result.extracted_fields["full_name"], "Jane Doe");
    assert_eq!(result.extracted_fields["date_of_birth"], "1990-11-05");
    assert!(result.confidence > 0.0);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_empty_text_completes_with_zero_confidence() {
    let root = TempDir::new().unwrap();
    let intake = intake_with(
        root.path(),
        Arc::new(InferSniffer),
        Arc::new(CannedBackend { text: "  \n", pages: 0 }),
    );

    let outcome = intake
        .process(
            UploadCandidate::from_bytes("blank.png", png_bytes()),
            "cust-1",
            "identity",
            "passport",
            None,
        )
        .await;

    assert_eq!(outcome.result.status, ExtractionStatus::Completed);
    assert!(outcome.result.extracted_fields.is_empty());
    assert_eq!(outcome.result.confidence, 0.0);
    assert_eq!(outcome.result.raw_text, "");
}

#[tokio::test]
async fn test_pdf_sniffed_as_jpeg_is_rejected_before_storage() {
    let root = TempDir::new().unwrap();
    let intake = intake_with(
        root.path(),
        Arc::new(StaticSniffer("image/jpeg")),
        Arc::new(CannedBackend { text: "x", pages: 1 }),
    );

    let candidate = UploadCandidate::from_bytes("statement.pdf", b"\xFF\xD8\xFF\xE0 jfif".to_vec());
    let err = intake
        .upload(candidate, "cust-1", "address", None)
        .await
        .unwrap_err();

    match err {
        Error::Validation(e) => assert_eq!(e.kind, ValidationErrorKind::ContentTypeMismatch),
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(count_files(&root.path().join("documents")), 0);
    assert_eq!(intake.storage_stats().await.file_count, 0);
}

#[tokio::test]
async fn test_oversized_upload_fails_at_validating() {
    let root = TempDir::new().unwrap();
    let mut config = IntakeConfig::default();
    config.storage.root = root.path().to_path_buf();
    config.upload.max_size_bytes = 16;
    let intake = DocumentIntake::with_components(
        Arc::new(config),
        Arc::new(InferSniffer),
        Arc::new(CannedBackend { text: "x", pages: 0 }),
    );

    let outcome = intake
        .process(
            UploadCandidate::from_bytes("front.png", png_bytes()),
            "cust-1",
            "identity",
            "national_id",
            None,
        )
        .await;

    assert_eq!(outcome.result.status, ExtractionStatus::Failed);
    assert!(outcome.document.is_none());
    let error = outcome.result.error.unwrap();
    assert!(error.starts_with("validating: "), "{}", error);
    assert!(error.contains("file_too_large"));
    assert_eq!(count_files(&root.path().join("documents")), 0);
}

#[tokio::test]
async fn test_unsafe_subject_fails_at_storing() {
    let root = TempDir::new().unwrap();
    let intake = intake_with(
        root.path(),
        Arc::new(InferSniffer),
        Arc::new(CannedBackend { text: "x", pages: 0 }),
    );

    let outcome = intake
        .process(
            UploadCandidate::from_bytes("front.png", png_bytes()),
            "../etc",
            "identity",
            "national_id",
            None,
        )
        .await;

    assert!(!outcome.is_completed());
    assert!(outcome.result.error.unwrap().starts_with("storing: "));
}

#[tokio::test]
async fn test_backend_failure_keeps_document_and_fails_result() {
    let root = TempDir::new().unwrap();
    let intake = intake_with(root.path(), Arc::new(InferSniffer), Arc::new(FailingBackend));

    let outcome = intake
        .process(
            UploadCandidate::from_bytes("front.png", png_bytes()),
            "cust-7",
            "identity",
            "national_id",
            None,
        )
        .await;

    assert_eq!(outcome.result.status, ExtractionStatus::Failed);
    assert_eq!(outcome.result.confidence, 0.0);
    let error = outcome.result.error.clone().unwrap();
    assert!(error.starts_with("extracting: "), "{}", error);
    assert!(error.contains("tesseract exited 1"));

    let document = outcome.document.unwrap();
    assert!(intake.info(&document.relative_path).await.is_some());
}

#[tokio::test]
async fn test_extract_from_stored_pdf() {
    let root = TempDir::new().unwrap();
    let intake = intake_with(
        root.path(),
        Arc::new(InferSniffer),
        Arc::new(CannedBackend {
            text: "Passport No: P12345O7\nSurname: DOE\nGiven Names: JANE",
            pages: 2,
        }),
    );

    let document = intake
        .upload(
            UploadCandidate::from_bytes("passport.pdf", b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec()),
            "cust-9",
            "identity",
            Some(uuid::Uuid::now_v7()),
        )
        .await
        .unwrap();
    assert_eq!(document.detected_content_type.as_deref(), Some("application/pdf"));

    let result = intake.extract(&document.relative_path, "passport").await;
    assert!(result.is_completed(), "{:?}", result.error);
    assert_eq!(result.extracted_fields["passport_number"], "P1234507");
    assert_eq!(result.extracted_fields["full_name"], "Doe");
    assert_eq!(result.extracted_fields["given_names"], "Jane");
    assert!(!result.extracted_fields.contains_key("surname"));
    // both pages recognized and joined
    assert_eq!(result.raw_text.matches("Passport No").count(), 2);
}

#[tokio::test]
async fn test_extract_rejects_archived_and_missing_paths() {
    let root = TempDir::new().unwrap();
    let intake = intake_with(
        root.path(),
        Arc::new(InferSniffer),
        Arc::new(CannedBackend { text: NATIONAL_ID_TEXT, pages: 0 }),
    );
    let document = intake
        .upload(UploadCandidate::from_bytes("id.png", png_bytes()), "cust-3", "identity", None)
        .await
        .unwrap();

    let processed = intake.move_to_processed(&document.relative_path).await.unwrap();
    assert!(processed.starts_with("processed/cust-3/identity/"));
    assert!(intake.extract(&processed, "national_id").await.is_completed());

    assert!(intake.archive(&processed).await);
    let archived = intake.extract(&processed, "national_id").await;
    assert_eq!(archived.status, ExtractionStatus::Failed);
    assert!(archived.error.unwrap().starts_with("extracting: "));

    let missing = intake
        .extract("documents/cust-3/identity/0190a5f2-0000-7000-8000-000000000000.png", "national_id")
        .await;
    assert_eq!(missing.status, ExtractionStatus::Failed);

    let escaping = intake.extract("documents/../../etc/passwd", "national_id").await;
    assert_eq!(escaping.status, ExtractionStatus::Failed);

    // archived documents are never handed out for processing
    let archived_dir = root.path().join("archived/cust-3/identity");
    let archived_name = std::fs::read_dir(&archived_dir)
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .file_name()
        .into_string()
        .unwrap();
    let archived_path = format!("archived/cust-3/identity/{}", archived_name);
    assert_eq!(
        intake.extract(&archived_path, "national_id").await.status,
        ExtractionStatus::Failed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_double_archive() {
    let root = TempDir::new().unwrap();
    let intake = Arc::new(intake_with(
        root.path(),
        Arc::new(InferSniffer),
        Arc::new(CannedBackend { text: "", pages: 0 }),
    ));
    let document = intake
        .upload(UploadCandidate::from_bytes("id.png", png_bytes()), "cust-5", "identity", None)
        .await
        .unwrap();

    let first = {
        let intake = intake.clone();
        let path = document.relative_path.clone();
        tokio::spawn(async move { intake.archive(&path).await })
    };
    let second = {
        let intake = intake.clone();
        let path = document.relative_path.clone();
        tokio::spawn(async move { intake.archive(&path).await })
    };
    let (first, second) = tokio::join!(first, second);
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(outcomes.iter().filter(|archived| **archived).count(), 1);
    assert_eq!(count_files(&root.path().join("archived")), 1);
    assert_eq!(count_files(&root.path().join("documents")), 0);
}

#[tokio::test]
async fn test_delete_and_stats_report() {
    let root = TempDir::new().unwrap();
    let intake = intake_with(
        root.path(),
        Arc::new(InferSniffer),
        Arc::new(CannedBackend { text: "", pages: 0 }),
    );
    let bytes = png_bytes();
    let size = bytes.len() as u64;
    let kept = intake
        .upload(UploadCandidate::from_bytes("a.png", bytes.clone()), "cust-8", "identity", None)
        .await
        .unwrap();
    let removed = intake
        .upload(UploadCandidate::from_bytes("b.png", bytes), "cust-8", "identity", None)
        .await
        .unwrap();
    assert_eq!(kept.integrity_digest, removed.integrity_digest);

    let report = intake.storage_stats().await;
    assert_eq!(report.file_count, 2);
    assert_eq!(report.total_bytes, size * 2);
    assert!(report.limits.allowed_extensions.contains(&"pdf".to_string()));
    assert_eq!(report.limits.max_upload_bytes, IntakeConfig::default().upload.max_size_bytes);

    assert!(intake.delete(&removed.relative_path, false).await);
    assert!(!intake.delete(&removed.relative_path, false).await);
    assert_eq!(intake.storage_stats().await.file_count, 1);
    assert_eq!(count_files(&root.path().join("archived")), 0);

    let info = intake.info(&kept.relative_path).await.unwrap();
    assert_eq!(info.id, kept.id);
    assert_eq!(info.integrity_digest, kept.integrity_digest);
}

#[tokio::test]
async fn test_health_reports_backend_state() {
    let root = TempDir::new().unwrap();
    let healthy = intake_with(
        root.path(),
        Arc::new(InferSniffer),
        Arc::new(CannedBackend { text: "", pages: 0 }),
    );
    let report = healthy.health().await;
    assert!(report.storage_ok);
    assert!(report.backend_ok);
    assert_eq!(report.backend, "canned");
    assert!(report.is_healthy());

    let degraded = intake_with(root.path(), Arc::new(InferSniffer), Arc::new(FailingBackend));
    let report = degraded.health().await;
    assert!(report.storage_ok);
    assert!(!report.backend_ok);
    assert!(!report.is_healthy());
}
