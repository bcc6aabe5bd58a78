//! Error types for kyc-intake.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using kyc-intake's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for kyc-intake operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Upload rejected before any bytes were persisted (client-correctable)
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Persisting an upload failed (retryable by the caller)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Text recognition or parsing failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors the client can correct by resubmitting a different file.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::InvalidInput(_))
    }
}

/// Why an upload candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    FileTooLarge,
    MissingFilename,
    UnsupportedExtension,
    ContentTypeMismatch,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileTooLarge => write!(f, "file_too_large"),
            Self::MissingFilename => write!(f, "missing_filename"),
            Self::UnsupportedExtension => write!(f, "unsupported_extension"),
            Self::ContentTypeMismatch => write!(f, "content_type_mismatch"),
        }
    }
}

/// A rejected upload: the failing check plus a message safe to show the client.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {reason}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub reason: String,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("documents/c1/passport/x.pdf".to_string());
        assert_eq!(err.to_string(), "Not found: documents/c1/passport/x.pdf");
    }

    #[test]
    fn test_error_display_storage() {
        let err = Error::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "Storage error: disk full");
    }

    #[test]
    fn test_error_display_extraction() {
        let err = Error::Extraction("tesseract exited 1".to_string());
        assert_eq!(err.to_string(), "Extraction error: tesseract exited 1");
    }

    #[test]
    fn test_error_display_validation() {
        let err: Error =
            ValidationError::new(ValidationErrorKind::FileTooLarge, "File exceeds 10 bytes").into();
        assert_eq!(
            err.to_string(),
            "Validation failed: file_too_large: File exceeds 10 bytes"
        );
    }

    #[test]
    fn test_validation_is_client_error() {
        let err: Error =
            ValidationError::new(ValidationErrorKind::MissingFilename, "No filename").into();
        assert!(err.is_client_error());
        assert!(!Error::Storage("x".into()).is_client_error());
        assert!(!Error::Internal("x".into()).is_client_error());
    }

    #[test]
    fn test_validation_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ValidationErrorKind::ContentTypeMismatch).unwrap();
        assert_eq!(json, "\"content_type_mismatch\"");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        match err {
            Error::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
