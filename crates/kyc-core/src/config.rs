//! Intake configuration.
//!
//! Configuration can be loaded from:
//! - a TOML file (`$KYC_CONFIG`, else `./kyc-intake.toml` when present)
//! - environment variables (`KYC_*` prefixed)
//!
//! Built once at startup and shared read-only (`Arc<IntakeConfig>`) by every
//! component.
//!
//! # Example
//!
//! ```rust,no_run
//! use kyc_core::config::IntakeConfig;
//!
//! let config = IntakeConfig::load().expect("Failed to load config");
//! config.validate().expect("Invalid config");
//! ```
//!
//! ```toml
//! [upload]
//! max_size_bytes = 5242880
//! allowed_extensions = ["pdf", "jpg", "png"]
//!
//! [storage]
//! root = "${KYC_DATA_DIR}/storage"
//!
//! [ocr]
//! languages = ["eng", "fra"]
//! min_image_dimension = 1200
//! ```

use std::collections::{BTreeMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::defaults;
use crate::traits::RecognitionOptions;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

static ENV_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid placeholder regex"));

/// Upload validation limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted upload in bytes.
    pub max_size_bytes: u64,
    /// Accepted lower-case extensions, without the dot.
    pub allowed_extensions: Vec<String>,
    /// Expected sniffed content type per extension.
    pub content_types: BTreeMap<String, String>,
    /// Additional sniffed types accepted per extension.
    pub compatible_types: BTreeMap<String, Vec<String>>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        let mut compatible_types: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (ext, mime) in defaults::COMPATIBLE_CONTENT_TYPES {
            compatible_types
                .entry(ext.to_string())
                .or_default()
                .push(mime.to_string());
        }
        Self {
            max_size_bytes: defaults::MAX_UPLOAD_SIZE_BYTES,
            allowed_extensions: defaults::ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            content_types: defaults::EXPECTED_CONTENT_TYPES
                .iter()
                .map(|(e, m)| (e.to_string(), m.to_string()))
                .collect(),
            compatible_types,
        }
    }
}

impl UploadConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_size_bytes == 0 {
            return Err(ConfigError::Validation(
                "upload max_size_bytes must be greater than zero".to_string(),
            ));
        }
        if self.allowed_extensions.is_empty() {
            return Err(ConfigError::Validation(
                "upload allowed_extensions cannot be empty".to_string(),
            ));
        }
        for ext in &self.allowed_extensions {
            if ext.is_empty() || ext.starts_with('.') || ext.to_lowercase() != *ext {
                return Err(ConfigError::Validation(format!(
                    "extension '{}' must be lower-case and given without a leading dot",
                    ext
                )));
            }
            if !self.content_types.contains_key(ext) {
                return Err(ConfigError::Validation(format!(
                    "extension '{}' has no expected content type",
                    ext
                )));
            }
        }
        Ok(())
    }

    /// Allowed extensions as a set.
    pub fn extension_set(&self) -> HashSet<String> {
        self.allowed_extensions.iter().cloned().collect()
    }
}

/// Storage layout settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root holding the `documents/ temp/ processed/ archived/` partitions.
    pub root: PathBuf,
    /// Chunk size for streamed writes.
    pub chunk_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(defaults::STORAGE_ROOT),
            chunk_bytes: defaults::STORAGE_CHUNK_BYTES,
        }
    }
}

impl StorageConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "storage root cannot be empty".to_string(),
            ));
        }
        if self.chunk_bytes == 0 {
            return Err(ConfigError::Validation(
                "storage chunk_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Text recognition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Recognition language codes (tesseract traineddata names).
    pub languages: Vec<String>,
    /// Images with a shorter side below this are upscaled before recognition.
    pub min_image_dimension: u32,
    /// Rasterization resolution for PDFs.
    pub dpi: u32,
    /// Page segmentation mode.
    pub page_seg_mode: u8,
    /// Per-command timeout in seconds.
    pub timeout_secs: u64,
    pub tesseract_bin: String,
    pub pdftoppm_bin: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: defaults::OCR_LANGUAGES
                .iter()
                .map(|l| l.to_string())
                .collect(),
            min_image_dimension: defaults::MIN_IMAGE_DIMENSION,
            dpi: defaults::OCR_DPI,
            page_seg_mode: defaults::OCR_PAGE_SEG_MODE,
            timeout_secs: defaults::OCR_CMD_TIMEOUT_SECS,
            tesseract_bin: defaults::TESSERACT_BIN.to_string(),
            pdftoppm_bin: defaults::PDFTOPPM_BIN.to_string(),
        }
    }
}

impl OcrConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.languages.is_empty() {
            return Err(ConfigError::Validation(
                "ocr languages cannot be empty".to_string(),
            ));
        }
        for lang in &self.languages {
            if !is_language_code(lang) {
                return Err(ConfigError::Validation(format!(
                    "invalid ocr language code '{}'",
                    lang
                )));
            }
        }
        if self.min_image_dimension == 0 {
            return Err(ConfigError::Validation(
                "ocr min_image_dimension must be greater than zero".to_string(),
            ));
        }
        if !(72..=1200).contains(&self.dpi) {
            return Err(ConfigError::Validation(format!(
                "ocr dpi must be between 72 and 1200, got {}",
                self.dpi
            )));
        }
        if self.page_seg_mode > 13 {
            return Err(ConfigError::Validation(format!(
                "ocr page_seg_mode must be 0-13, got {}",
                self.page_seg_mode
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "ocr timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.tesseract_bin.is_empty() || self.pdftoppm_bin.is_empty() {
            return Err(ConfigError::Validation(
                "ocr tool paths cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Options handed to the recognition backend on every call.
    pub fn recognition_options(&self) -> RecognitionOptions {
        RecognitionOptions {
            languages: self.languages.clone(),
            page_seg_mode: self.page_seg_mode,
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Tesseract traineddata names: three lower-case letters, optionally followed
/// by `_script` (e.g. `eng`, `chi_sim`).
fn is_language_code(code: &str) -> bool {
    let (base, script) = match code.split_once('_') {
        Some((base, script)) => (base, Some(script)),
        None => (code, None),
    };
    let base_ok = base.len() == 3 && base.chars().all(|c| c.is_ascii_lowercase());
    let script_ok = script
        .map(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase()))
        .unwrap_or(true);
    base_ok && script_ok
}

/// Complete process-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeConfig {
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

impl IntakeConfig {
    /// Config file path: `$KYC_CONFIG`, else `./kyc-intake.toml`.
    pub fn default_config_path() -> PathBuf {
        env::var(defaults::CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(defaults::CONFIG_FILE_NAME))
    }

    /// Load configuration from the default path, falling back to environment variables.
    pub fn load() -> ConfigResult<Self> {
        let path = Self::default_config_path();

        if path.exists() {
            info!("Loading intake config from: {}", path.display());
            Self::from_file(&path)
        } else {
            debug!(
                "Config file not found at {}, using environment variables",
                path.display()
            );
            Ok(Self::from_env())
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text, substituting `${VAR}` placeholders.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let content = Self::substitute_env_vars(content);
        Ok(toml::from_str(&content)?)
    }

    /// Build configuration from `KYC_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(max) = env_parse::<u64>("KYC_MAX_UPLOAD_BYTES") {
            config.upload.max_size_bytes = max;
        }
        if let Ok(list) = env::var("KYC_ALLOWED_EXTENSIONS") {
            let extensions = split_list(&list)
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect::<Vec<_>>();
            if !extensions.is_empty() {
                config.upload.allowed_extensions = extensions;
            }
        }
        if let Ok(root) = env::var("KYC_STORAGE_ROOT") {
            config.storage.root = PathBuf::from(root);
        }
        if let Ok(list) = env::var("KYC_OCR_LANGUAGES") {
            let languages = split_list(&list);
            if !languages.is_empty() {
                config.ocr.languages = languages;
            }
        }
        if let Some(min) = env_parse::<u32>("KYC_MIN_IMAGE_DIMENSION") {
            config.ocr.min_image_dimension = min;
        }
        if let Some(dpi) = env_parse::<u32>("KYC_OCR_DPI") {
            config.ocr.dpi = dpi;
        }
        if let Some(psm) = env_parse::<u8>("KYC_OCR_PSM") {
            config.ocr.page_seg_mode = psm;
        }
        if let Some(timeout) = env_parse::<u64>("KYC_OCR_TIMEOUT_SECS") {
            config.ocr.timeout_secs = timeout;
        }
        if let Ok(bin) = env::var("KYC_TESSERACT_BIN") {
            config.ocr.tesseract_bin = bin;
        }
        if let Ok(bin) = env::var("KYC_PDFTOPPM_BIN") {
            config.ocr.pdftoppm_bin = bin;
        }

        config
    }

    /// Validate every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.upload.validate()?;
        self.storage.validate()?;
        self.ocr.validate()?;
        Ok(())
    }

    fn substitute_env_vars(content: &str) -> String {
        ENV_PLACEHOLDER
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Split a `,` or `+` separated list, dropping blanks.
fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', '+'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
