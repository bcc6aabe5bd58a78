//! DocumentIntake: the collaborator-facing surface of the pipeline.
//!
//! HTTP handlers, job workers and the CLI call these methods with an already
//! authenticated subject id. Every call that starts work runs inside a span
//! carrying the caller's correlation id (or a fresh one).

use std::sync::Arc;

use kyc_core::{
    ContentSniffer, ExtractionResult, InferSniffer, IntakeConfig, Result, StoredDocument,
    TextRecognitionBackend, UploadCandidate,
};
use kyc_ocr::TesseractBackend;
use serde::Serialize;
use tracing::{info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::orchestrator::{ExtractionOrchestrator, ProcessOutcome};

/// Upload limits reported alongside storage usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageLimits {
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageReport {
    pub file_count: u64,
    pub total_bytes: u64,
    pub limits: StorageLimits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub storage_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_error: Option<String>,
    pub backend: String,
    pub backend_ok: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.storage_ok && self.backend_ok
    }
}

#[derive(Debug)]
pub struct DocumentIntake {
    config: Arc<IntakeConfig>,
    orchestrator: ExtractionOrchestrator,
}

impl DocumentIntake {
    /// Production wiring: `infer` sniffing and the tesseract backend.
    pub fn from_config(config: Arc<IntakeConfig>) -> Self {
        let backend = Arc::new(TesseractBackend::from_config(&config.ocr));
        Self::with_components(config, Arc::new(InferSniffer), backend)
    }

    pub fn with_components(
        config: Arc<IntakeConfig>,
        sniffer: Arc<dyn ContentSniffer>,
        backend: Arc<dyn TextRecognitionBackend>,
    ) -> Self {
        let orchestrator = ExtractionOrchestrator::new(&config, sniffer, backend);
        Self {
            config,
            orchestrator,
        }
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &ExtractionOrchestrator {
        &self.orchestrator
    }

    /// Create the storage partitions.
    pub async fn initialize(&self) -> Result<()> {
        self.orchestrator.store().ensure_layout().await
    }

    /// Validate and store a candidate. Validation failures come back as
    /// [`kyc_core::Error::Validation`] and leave nothing on disk.
    pub async fn upload(
        &self,
        candidate: UploadCandidate,
        subject_id: &str,
        category: &str,
        correlation_id: Option<Uuid>,
    ) -> Result<StoredDocument> {
        let span = request_span("upload", correlation_id, subject_id, category);
        async {
            let result = self.orchestrator.upload(candidate, subject_id, category).await;
            match &result {
                Ok(document) => info!(stored_path = %document.relative_path, "Upload accepted"),
                Err(e) if e.is_client_error() => info!(error = %e, "Upload rejected"),
                Err(e) => warn!(error = %e, "Upload failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    pub async fn extract(&self, stored_path: &str, document_type: &str) -> ExtractionResult {
        self.orchestrator.extract(stored_path, document_type).await
    }

    /// Upload then extract in one run.
    pub async fn process(
        &self,
        candidate: UploadCandidate,
        subject_id: &str,
        category: &str,
        document_type: &str,
        correlation_id: Option<Uuid>,
    ) -> ProcessOutcome {
        let span = request_span("process", correlation_id, subject_id, category);
        self.orchestrator
            .run(candidate, subject_id, category, document_type)
            .instrument(span)
            .await
    }

    pub async fn archive(&self, stored_path: &str) -> bool {
        self.orchestrator.store().archive(stored_path).await.is_some()
    }

    pub async fn move_to_processed(&self, stored_path: &str) -> Option<String> {
        self.orchestrator.store().move_to_processed(stored_path).await
    }

    pub async fn delete(&self, stored_path: &str, archive: bool) -> bool {
        self.orchestrator.store().delete(stored_path, archive).await
    }

    pub async fn info(&self, stored_path: &str) -> Option<StoredDocument> {
        self.orchestrator.store().info(stored_path).await
    }

    pub async fn storage_stats(&self) -> StorageReport {
        let stats = self.orchestrator.store().stats().await;
        let mut allowed_extensions = self.config.upload.allowed_extensions.clone();
        allowed_extensions.sort();
        StorageReport {
            file_count: stats.file_count,
            total_bytes: stats.total_bytes,
            limits: StorageLimits {
                max_upload_bytes: self.config.upload.max_size_bytes,
                allowed_extensions,
            },
        }
    }

    #[instrument(skip(self), fields(subsystem = "intake", op = "health"))]
    pub async fn health(&self) -> HealthReport {
        let storage = self.orchestrator.store().validate().await;
        if let Err(e) = &storage {
            warn!(error = %e, "Storage health probe failed");
        }

        let backend = self.orchestrator.extractor().backend();
        let backend_ok = match backend.health_check().await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(backend = backend.name(), error = %e, "Backend health check failed");
                false
            }
        };

        HealthReport {
            storage_ok: storage.is_ok(),
            storage_error: storage.err(),
            backend: backend.name().to_string(),
            backend_ok,
        }
    }
}

fn request_span(
    op: &'static str,
    correlation_id: Option<Uuid>,
    subject_id: &str,
    category: &str,
) -> tracing::Span {
    let request_id = correlation_id.unwrap_or_else(Uuid::now_v7);
    info_span!(
        "intake_request",
        subsystem = "intake",
        op,
        request_id = %request_id,
        subject_id,
        category
    )
}
