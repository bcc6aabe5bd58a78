//! # kyc-core
//!
//! Core types, traits, configuration and upload validation for the kyc-intake
//! document pipeline.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the storage, recognition and intake crates depend on.
//!
//! ## Log levels
//!
//! - `WARN`: recoverable failure with a fallback (sniffer error, failed lifecycle move)
//! - `INFO`: operation completions (document stored, extraction finished)
//! - `DEBUG`: decision points (content type accepted, pattern alternative matched)
//! - `TRACE`: per-chunk and per-page detail

pub mod config;
pub mod defaults;
pub mod error;
pub mod file_safety;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{ConfigError, ConfigResult, IntakeConfig, OcrConfig, StorageConfig, UploadConfig};
pub use error::{Error, Result, ValidationError, ValidationErrorKind};
pub use file_safety::{
    extension_of, sanitize_filename, sanitize_path_component, ContentValidator, InferSniffer,
    ValidationOutcome, ValidationRules,
};
pub use models::*;
pub use traits::*;
