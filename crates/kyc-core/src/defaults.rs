//! Centralized default constants for kyc-intake.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration falls back to these when neither a config file nor an
//! environment variable supplies a value.

// =============================================================================
// UPLOAD VALIDATION
// =============================================================================

/// Maximum accepted upload size in bytes (10 MB).
pub const MAX_UPLOAD_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Number of leading bytes inspected for content sniffing.
pub const SNIFF_HEAD_BYTES: usize = 1024;

/// Extensions accepted for identity documents (lower-case, without dot).
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png", "tif", "tiff", "bmp", "doc", "docx"];

/// Expected sniffed content type per extension.
pub const EXPECTED_CONTENT_TYPES: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("bmp", "image/bmp"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
];

/// Additional sniffed types accepted for an extension.
///
/// OOXML documents are zip containers, and the first KiB rarely carries enough
/// of the archive directory to tell them apart from a plain zip.
pub const COMPATIBLE_CONTENT_TYPES: &[(&str, &str)] = &[
    ("docx", "application/zip"),
    ("doc", "application/x-ole-storage"),
];

// =============================================================================
// STORAGE
// =============================================================================

/// Default storage root directory.
pub const STORAGE_ROOT: &str = "./storage";

/// Partition for active (uploaded) documents.
pub const DOCUMENTS_DIR: &str = "documents";

/// Partition for in-flight part-files.
pub const TEMP_DIR: &str = "temp";

/// Partition for documents whose extraction succeeded.
pub const PROCESSED_DIR: &str = "processed";

/// Partition for archived documents.
pub const ARCHIVED_DIR: &str = "archived";

/// Chunk size for streamed writes and hashing (64 KiB).
pub const STORAGE_CHUNK_BYTES: usize = 64 * 1024;

/// Maximum length of a subject or category path component.
pub const MAX_PATH_COMPONENT_LEN: usize = 128;

// =============================================================================
// TEXT RECOGNITION
// =============================================================================

/// Default recognition languages (tesseract codes).
pub const OCR_LANGUAGES: &[&str] = &["eng"];

/// Images whose shorter side is below this many pixels are upscaled before OCR.
pub const MIN_IMAGE_DIMENSION: u32 = 1000;

/// Largest pre-processed image (in pixels) handed to recognition. Upscaling
/// beyond this is refused rather than allocated.
pub const MAX_PREPROCESS_PIXELS: u64 = 40_000_000;

/// Rasterization resolution for paginated documents.
pub const OCR_DPI: u32 = 300;

/// Tesseract page segmentation mode: assume a single uniform block of text.
pub const OCR_PAGE_SEG_MODE: u8 = 6;

/// Per-command timeout for external recognition tools (seconds).
pub const OCR_CMD_TIMEOUT_SECS: u64 = 60;

/// Default tesseract executable.
pub const TESSERACT_BIN: &str = "tesseract";

/// Default pdftoppm executable.
pub const PDFTOPPM_BIN: &str = "pdftoppm";

// =============================================================================
// CONFIDENCE SCORING
// =============================================================================

/// Raw text length (chars) at which the length factor saturates.
pub const SCORE_TEXT_LENGTH_SATURATION: f64 = 500.0;

/// Extracted field count at which the coverage factor saturates.
pub const SCORE_FIELD_SATURATION: f64 = 5.0;

/// Weight of the text length factor.
pub const SCORE_WEIGHT_TEXT_LENGTH: f64 = 0.3;

/// Weight of the field coverage factor.
pub const SCORE_WEIGHT_FIELD_COVERAGE: f64 = 0.4;

/// Weight of the text quality factor.
pub const SCORE_WEIGHT_TEXT_QUALITY: f64 = 0.3;

// =============================================================================
// CONFIG
// =============================================================================

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "KYC_CONFIG";

/// Config file looked up in the working directory when `KYC_CONFIG` is unset.
pub const CONFIG_FILE_NAME: &str = "kyc-intake.toml";
