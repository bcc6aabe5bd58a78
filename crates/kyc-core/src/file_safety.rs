//! Upload validation for identity documents.
//!
//! Checks run in a fixed order and stop at the first failure:
//! 1. Declared size against the configured limit
//! 2. Filename presence
//! 3. Extension allow-list
//! 4. Magic byte sniffing against the type expected for the extension
//!
//! Nothing here touches storage; a failing candidate leaves no artifact.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::UploadConfig;
use crate::error::{ValidationError, ValidationErrorKind};
use crate::models::UploadCandidate;
use crate::traits::ContentSniffer;
use crate::Result;

/// Reported as the detected type when sniffing recognises nothing.
pub const UNKNOWN_CONTENT_TYPE: &str = "application/octet-stream";

/// Production sniffer backed by `infer` magic byte tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct InferSniffer;

impl ContentSniffer for InferSniffer {
    fn sniff(&self, head: &[u8]) -> Result<Option<String>> {
        Ok(infer::get(head).map(|kind| kind.mime_type().to_string()))
    }

    fn name(&self) -> &str {
        "infer"
    }
}

/// Limits the validator enforces, snapshotted from [`UploadConfig`].
#[derive(Debug, Clone)]
pub struct ValidationRules {
    pub max_size_bytes: u64,
    pub allowed_extensions: HashSet<String>,
    pub content_types: BTreeMap<String, String>,
    pub compatible_types: BTreeMap<String, Vec<String>>,
}

impl From<&UploadConfig> for ValidationRules {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_size_bytes: config.max_size_bytes,
            allowed_extensions: config.extension_set(),
            content_types: config.content_types.clone(),
            compatible_types: config.compatible_types.clone(),
        }
    }
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl ValidationRules {
    /// Content type implied by an (already lower-cased) extension.
    pub fn expected_type(&self, extension: &str) -> Option<&str> {
        self.content_types.get(extension).map(String::as_str)
    }

    fn accepts(&self, extension: &str, detected: &str) -> bool {
        let detected = essence(detected);
        if self
            .expected_type(extension)
            .is_some_and(|expected| essence(expected) == detected)
        {
            return true;
        }
        self.compatible_types
            .get(extension)
            .is_some_and(|types| types.iter().any(|t| essence(t) == detected))
    }
}

/// Result of validating one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub reason: Option<String>,
    pub kind: Option<ValidationErrorKind>,
    /// Lower-cased extension, once the filename check has passed.
    pub extension: Option<String>,
    /// Content type implied by the extension.
    pub expected_type: Option<String>,
    pub detected_type: Option<String>,
    /// Non-fatal note, e.g. the sniffer failed and content was not checked.
    pub warning: Option<String>,
}

impl ValidationOutcome {
    fn passed(
        extension: String,
        expected_type: Option<String>,
        detected_type: Option<String>,
        warning: Option<String>,
    ) -> Self {
        Self {
            valid: true,
            reason: None,
            kind: None,
            extension: Some(extension),
            expected_type,
            detected_type,
            warning,
        }
    }

    fn rejected(kind: ValidationErrorKind, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            kind: Some(kind),
            extension: None,
            expected_type: None,
            detected_type: None,
            warning: None,
        }
    }

    /// Convert into a `Result`, keeping the outcome on success.
    pub fn into_result(self) -> std::result::Result<Self, ValidationError> {
        match (self.valid, self.kind) {
            (true, _) => Ok(self),
            (false, Some(kind)) => Err(ValidationError::new(
                kind,
                self.reason.unwrap_or_else(|| kind.to_string()),
            )),
            (false, None) => Err(ValidationError::new(
                ValidationErrorKind::ContentTypeMismatch,
                self.reason.unwrap_or_else(|| "rejected".to_string()),
            )),
        }
    }
}

/// Validates upload candidates before any bytes are persisted.
#[derive(Clone)]
pub struct ContentValidator {
    rules: ValidationRules,
    sniffer: Arc<dyn ContentSniffer>,
}

impl std::fmt::Debug for ContentValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentValidator")
            .field("rules", &self.rules)
            .field("sniffer", &self.sniffer.name())
            .finish()
    }
}

impl ContentValidator {
    pub fn new(rules: ValidationRules, sniffer: Arc<dyn ContentSniffer>) -> Self {
        Self { rules, sniffer }
    }

    /// Validator over the given upload config with the `infer` sniffer.
    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(ValidationRules::from(config), Arc::new(InferSniffer))
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Validate declared metadata plus the first bytes of the upload.
    pub fn validate(&self, filename: Option<&str>, declared_size: u64, head: &[u8]) -> ValidationOutcome {
        let extension = match self.check_metadata(filename, declared_size) {
            Ok(ext) => ext,
            Err(outcome) => return outcome,
        };
        self.check_content(extension, head)
    }

    /// Validate a candidate, reading its head only once the metadata checks pass.
    pub async fn validate_candidate(&self, candidate: &mut UploadCandidate) -> Result<ValidationOutcome> {
        let extension = match self.check_metadata(candidate.filename(), candidate.declared_size()) {
            Ok(ext) => ext,
            Err(outcome) => return Ok(outcome),
        };
        let head = candidate.load_head().await?;
        Ok(self.check_content(extension, head))
    }

    fn check_metadata(
        &self,
        filename: Option<&str>,
        declared_size: u64,
    ) -> std::result::Result<String, ValidationOutcome> {
        if declared_size > self.rules.max_size_bytes {
            return Err(ValidationOutcome::rejected(
                ValidationErrorKind::FileTooLarge,
                format!(
                    "File exceeds maximum size of {} bytes",
                    self.rules.max_size_bytes
                ),
            ));
        }

        let filename = match filename.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => {
                return Err(ValidationOutcome::rejected(
                    ValidationErrorKind::MissingFilename,
                    "No filename provided",
                ))
            }
        };

        match extension_of(filename) {
            Some(ext) if self.rules.allowed_extensions.contains(&ext) => Ok(ext),
            Some(ext) => Err(ValidationOutcome::rejected(
                ValidationErrorKind::UnsupportedExtension,
                format!("File extension .{} is not allowed", ext),
            )),
            None => Err(ValidationOutcome::rejected(
                ValidationErrorKind::UnsupportedExtension,
                "File has no extension",
            )),
        }
    }

    fn check_content(&self, extension: String, head: &[u8]) -> ValidationOutcome {
        let expected = self.rules.expected_type(&extension).map(str::to_string);

        let detected = match self.sniffer.sniff(head) {
            Ok(detected) => detected,
            Err(e) => {
                warn!(
                    sniffer = self.sniffer.name(),
                    extension = %extension,
                    error = %e,
                    "Content sniffing failed, accepting upload unchecked"
                );
                return ValidationOutcome::passed(
                    extension,
                    expected,
                    None,
                    Some(format!("content type not verified: {}", e)),
                );
            }
        };

        match detected {
            Some(detected) if self.rules.accepts(&extension, &detected) => {
                debug!(extension = %extension, detected = %detected, "Content type matches extension");
                ValidationOutcome::passed(extension, expected, Some(detected), None)
            }
            Some(detected) => {
                let mut outcome = ValidationOutcome::rejected(
                    ValidationErrorKind::ContentTypeMismatch,
                    format!(
                        "File content ({}) does not match extension .{}",
                        detected, extension
                    ),
                );
                outcome.extension = Some(extension);
                outcome.expected_type = expected;
                outcome.detected_type = Some(detected);
                outcome
            }
            // Formats with magic bytes must be recognised; text-like ones never are.
            None if expected.as_deref().map(is_binary_type).unwrap_or(true) => {
                let mut outcome = ValidationOutcome::rejected(
                    ValidationErrorKind::ContentTypeMismatch,
                    format!(
                        "File content is not recognisable as .{}",
                        extension
                    ),
                );
                outcome.extension = Some(extension);
                outcome.expected_type = expected;
                outcome.detected_type = Some(UNKNOWN_CONTENT_TYPE.to_string());
                outcome
            }
            None => ValidationOutcome::passed(extension, expected, None, None),
        }
    }
}

/// Lower-cased extension of a filename, without the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => Some(ext.to_lowercase()),
        _ => None,
    }
}

/// MIME type without parameters, lower-cased.
fn essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or(mime).trim().to_lowercase()
}

/// Whether a MIME type is a format with recognisable magic bytes.
fn is_binary_type(mime: &str) -> bool {
    let mime = essence(mime);
    if mime.starts_with("image/") || mime.starts_with("audio/") || mime.starts_with("video/") {
        return mime != "image/svg+xml";
    }
    matches!(
        mime.as_str(),
        "application/pdf"
            | "application/zip"
            | "application/msword"
            | "application/x-ole-storage"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    )
}

/// Sanitize a client-supplied filename for recording (never for building paths).
pub fn sanitize_filename(filename: &str) -> String {
    // Drop any directory part
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let sanitized = sanitized.trim();
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return "unnamed_file".to_string();
    }

    // Truncate on a char boundary, keeping the extension
    if sanitized.chars().count() > 255 {
        let ext = sanitized
            .rfind('.')
            .map(|pos| &sanitized[pos..])
            .filter(|ext| ext.chars().count() < 16)
            .unwrap_or("");
        let keep = 255 - ext.chars().count();
        let stem: String = sanitized.chars().take(keep).collect();
        return format!("{}{}", stem, ext);
    }

    sanitized.to_string()
}

/// Check that a subject id or category is a safe single path component.
pub fn sanitize_path_component(value: &str) -> std::result::Result<&str, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("path component cannot be empty".to_string());
    }
    if value.len() > crate::defaults::MAX_PATH_COMPONENT_LEN {
        return Err(format!(
            "path component exceeds {} characters",
            crate::defaults::MAX_PATH_COMPONENT_LEN
        ));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!(
            "path component '{}' may only contain letters, digits, '_' and '-'",
            value
        ));
    }
    Ok(value)
}
