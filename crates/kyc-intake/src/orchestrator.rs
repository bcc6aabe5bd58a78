//! ExtractionOrchestrator: sequences the intake pipeline.
//!
//! ```text
//! Validating → Storing → Extracting → Matching → Normalizing → Scoring → Completed
//!      └──────────┴───────────┴──────────→ Failed
//! ```
//!
//! Stage errors never escape: each is logged with the stage name and turned
//! into a failed [`ExtractionResult`] whose error reads `"<stage>: <reason>"`.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use kyc_core::defaults::{SNIFF_HEAD_BYTES, TEMP_DIR};
use kyc_core::file_safety::UNKNOWN_CONTENT_TYPE;
use kyc_core::{
    extension_of, ContentSniffer, ContentValidator, Error, ExtractionResult, FieldMap,
    IntakeConfig, LifecycleState, PipelineStage, Result, StoredDocument, TextRecognitionBackend,
    UploadCandidate, ValidationRules,
};
use kyc_ocr::{
    correct_identifier_noise, ConfidenceScorer, FieldPatternMatcher, TextExtractor, ValueNormalizer,
};
use kyc_store::{ContentAddressedStore, ManagedPath};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

/// A full pipeline run: the stored document (when storing succeeded) and
/// the extraction result.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<StoredDocument>,
    pub result: ExtractionResult,
}

impl ProcessOutcome {
    pub fn is_completed(&self) -> bool {
        self.result.is_completed()
    }
}

pub struct ExtractionOrchestrator {
    validator: ContentValidator,
    store: ContentAddressedStore,
    extractor: TextExtractor,
    sniffer: Arc<dyn ContentSniffer>,
    matcher: FieldPatternMatcher,
    normalizer: ValueNormalizer,
    scorer: ConfidenceScorer,
}

impl std::fmt::Debug for ExtractionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionOrchestrator")
            .field("validator", &self.validator)
            .field("store", &self.store)
            .field("extractor", &self.extractor)
            .field("sniffer", &self.sniffer.name())
            .finish()
    }
}

impl ExtractionOrchestrator {
    /// Wire the pipeline from configuration and the two capability seams.
    pub fn new(
        config: &IntakeConfig,
        sniffer: Arc<dyn ContentSniffer>,
        backend: Arc<dyn TextRecognitionBackend>,
    ) -> Self {
        let validator = ContentValidator::new(ValidationRules::from(&config.upload), sniffer.clone());
        let store = ContentAddressedStore::from_config(config);
        let extractor = TextExtractor::new(backend, &config.ocr)
            .with_work_dir(config.storage.root.join(TEMP_DIR));
        Self {
            validator,
            store,
            extractor,
            sniffer,
            matcher: FieldPatternMatcher::new(),
            normalizer: ValueNormalizer::new(),
            scorer: ConfidenceScorer::new(),
        }
    }

    pub fn store(&self) -> &ContentAddressedStore {
        &self.store
    }

    pub fn validator(&self) -> &ContentValidator {
        &self.validator
    }

    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }

    /// Validate and persist a candidate (the Validating and Storing stages).
    pub async fn upload(
        &self,
        candidate: UploadCandidate,
        subject_id: &str,
        category: &str,
    ) -> Result<StoredDocument> {
        self.admit(candidate, subject_id, category)
            .await
            .map_err(|(_, e)| e)
    }

    /// Run every stage for a fresh upload.
    #[instrument(
        skip(self, candidate),
        fields(subsystem = "intake", op = "run", filename = candidate.filename().unwrap_or_default())
    )]
    pub async fn run(
        &self,
        candidate: UploadCandidate,
        subject_id: &str,
        category: &str,
        document_type: &str,
    ) -> ProcessOutcome {
        let start = Instant::now();
        let document = match self.admit(candidate, subject_id, category).await {
            Ok(document) => document,
            Err((stage, e)) => {
                return ProcessOutcome {
                    document: None,
                    result: stage_failed(stage, document_type, None, String::new(), e.to_string()),
                }
            }
        };

        let content_type = document
            .detected_content_type
            .clone()
            .filter(|t| t != UNKNOWN_CONTENT_TYPE)
            .unwrap_or_else(|| document.declared_content_type.clone());

        let result = match self.store.resolve(&document.relative_path) {
            Some(full_path) => {
                self.recognize(&full_path, &document.relative_path, &content_type, document_type)
                    .await
            }
            None => stage_failed(
                PipelineStage::Extracting,
                document_type,
                Some(document.relative_path.clone()),
                String::new(),
                format!("unresolvable stored path {}", document.relative_path),
            ),
        };

        info!(
            stored_path = %document.relative_path,
            status = %result.status,
            confidence = result.confidence,
            duration_ms = start.elapsed().as_millis() as u64,
            "Pipeline run finished"
        );
        ProcessOutcome {
            document: Some(document),
            result,
        }
    }

    /// Run the pipeline from `Extracting` for an already stored document.
    ///
    /// Missing, malformed and archived paths yield failed results.
    #[instrument(skip(self), fields(subsystem = "intake", op = "extract"))]
    pub async fn extract(&self, stored_path: &str, document_type: &str) -> ExtractionResult {
        let stage = PipelineStage::Extracting;
        let failed = |reason: String| {
            stage_failed(stage, document_type, Some(stored_path.to_string()), String::new(), reason)
        };

        let location = match ManagedPath::parse(stored_path) {
            Ok(location) => location,
            Err(reason) => return failed(format!("invalid stored path: {}", reason)),
        };
        if location.state == LifecycleState::Archived {
            return failed("document is archived".to_string());
        }
        let Some(full_path) = self.store.resolve(stored_path) else {
            return failed(format!("invalid stored path: {}", stored_path));
        };
        match tokio::fs::metadata(&full_path).await {
            Ok(metadata) if metadata.is_file() => {}
            _ => return failed(Error::NotFound(stored_path.to_string()).to_string()),
        }

        let content_type = self.stored_content_type(&full_path, &location.file_name).await;
        self.recognize(&full_path, stored_path, &content_type, document_type)
            .await
    }

    async fn admit(
        &self,
        mut candidate: UploadCandidate,
        subject_id: &str,
        category: &str,
    ) -> std::result::Result<StoredDocument, (PipelineStage, Error)> {
        let mut stage = PipelineStage::Validating;
        debug!(stage = %stage, "Pipeline stage entered");

        let outcome = self
            .validator
            .validate_candidate(&mut candidate)
            .await
            .and_then(|outcome| outcome.into_result().map_err(Error::from))
            .map_err(|e| (stage, e))?;
        if let Some(warning) = &outcome.warning {
            warn!(warning = %warning, "Upload accepted with warning");
        }

        advance(&mut stage);
        let mut document = self
            .store
            .save(candidate, subject_id, category)
            .await
            .map_err(|e| (stage, e))?;
        document.detected_content_type = outcome.detected_type;
        Ok(document)
    }

    /// Sniffed type of the stored bytes, else the type implied by the extension.
    async fn stored_content_type(&self, full_path: &Path, file_name: &str) -> String {
        let sniffed = match read_head(full_path).await {
            Ok(head) => match self.sniffer.sniff(&head) {
                Ok(detected) => detected,
                Err(e) => {
                    warn!(error = %e, "Content sniffing failed, using extension");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Reading stored head failed, using extension");
                None
            }
        };
        sniffed.unwrap_or_else(|| {
            extension_of(file_name)
                .and_then(|ext| self.validator.rules().expected_type(&ext).map(str::to_string))
                .unwrap_or_else(|| UNKNOWN_CONTENT_TYPE.to_string())
        })
    }

    /// Extracting → Matching → Normalizing → Scoring.
    async fn recognize(
        &self,
        full_path: &Path,
        stored_path: &str,
        content_type: &str,
        document_type: &str,
    ) -> ExtractionResult {
        let mut stage = PipelineStage::Extracting;
        debug!(stage = %stage, content_type, "Pipeline stage entered");
        let stored_path = Some(stored_path.to_string());

        let extraction = self.extractor.extract(full_path, content_type).await;
        if extraction.text.is_empty() {
            return match extraction.error {
                Some(reason) => {
                    stage_failed(stage, document_type, stored_path, String::new(), reason)
                }
                None => ExtractionResult::completed(
                    document_type,
                    stored_path,
                    String::new(),
                    FieldMap::new(),
                    0.0,
                    None,
                ),
            };
        }

        advance(&mut stage);
        if !self.matcher.supports(document_type) {
            debug!(document_type, "No pattern rules for document type");
        }
        let corrected = correct_identifier_noise(&extraction.text);
        let matched = self.matcher.match_fields(document_type, &corrected);

        advance(&mut stage);
        let fields = self.normalizer.normalize(&matched);

        advance(&mut stage);
        let confidence = self.scorer.score(&extraction.text, fields.len());

        debug!(
            matched = matched.len(),
            kept = fields.len(),
            confidence,
            "Extraction scored"
        );
        ExtractionResult::completed(
            document_type,
            stored_path,
            extraction.text,
            fields,
            confidence,
            extraction.error,
        )
    }
}

fn advance(stage: &mut PipelineStage) {
    *stage = stage.next();
    debug!(stage = %stage, "Pipeline stage entered");
}

fn stage_failed(
    stage: PipelineStage,
    document_type: &str,
    stored_path: Option<String>,
    raw_text: String,
    reason: String,
) -> ExtractionResult {
    warn!(stage = %stage, error = %reason, "Pipeline stage failed");
    ExtractionResult::failed(document_type, stored_path, raw_text, format!("{}: {}", stage, reason))
}

async fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_HEAD_BYTES);
    file.take(SNIFF_HEAD_BYTES as u64).read_to_end(&mut head).await?;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyc_core::ExtractionStatus;

    #[test]
    fn test_stage_failed_prefixes_stage_name() {
        let result = stage_failed(
            PipelineStage::Storing,
            "passport",
            None,
            String::new(),
            "disk full".to_string(),
        );
        assert_eq!(result.status, ExtractionStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("storing: disk full"));
        assert_eq!(result.confidence, 0.0);
        assert!(result.extracted_fields.is_empty());
    }

    #[test]
    fn test_advance_walks_stages() {
        let mut stage = PipelineStage::Extracting;
        advance(&mut stage);
        assert_eq!(stage, PipelineStage::Matching);
        advance(&mut stage);
        advance(&mut stage);
        assert_eq!(stage, PipelineStage::Scoring);
    }

    #[tokio::test]
    async fn test_read_head_is_bounded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![7u8; SNIFF_HEAD_BYTES * 3]).unwrap();
        assert_eq!(read_head(&path).await.unwrap().len(), SNIFF_HEAD_BYTES);
    }
}
