//! # kyc-ocr
//!
//! Text recognition and field extraction for identity documents.
//!
//! - [`TextExtractor`] pre-processes images, rasterizes PDFs and drives a
//!   [`TextRecognitionBackend`](kyc_core::TextRecognitionBackend)
//! - [`TesseractBackend`] is the production backend (tesseract + pdftoppm CLIs)
//! - [`FieldPatternMatcher`] applies the per-document-type regex table
//! - [`ValueNormalizer`] canonicalizes extracted values
//! - [`ConfidenceScorer`] rates the result

pub mod backend;
pub mod extractor;
pub mod noise;
pub mod normalize;
pub mod patterns;
pub mod preprocess;
pub mod scoring;

pub use backend::TesseractBackend;
pub use extractor::{SourceKind, TextExtraction, TextExtractor};
pub use noise::correct_identifier_noise;
pub use normalize::{FieldKind, ValueNormalizer};
pub use patterns::{FieldPatternMatcher, FieldPatternRule, FIELD_PATTERN_RULES};
pub use scoring::ConfidenceScorer;
