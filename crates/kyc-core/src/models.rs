//! Domain models shared by the intake pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::defaults::SNIFF_HEAD_BYTES;

/// Extracted field name → normalized value.
pub type FieldMap = BTreeMap<String, String>;

// =============================================================================
// UPLOAD CANDIDATE
// =============================================================================

/// An incoming upload before validation: declared metadata plus a byte stream.
///
/// The first [`SNIFF_HEAD_BYTES`] are buffered by [`load_head`](Self::load_head)
/// for content sniffing and replayed in front of the body by
/// [`into_reader`](Self::into_reader), so the stream is consumed exactly once.
pub struct UploadCandidate {
    filename: Option<String>,
    declared_size: u64,
    head: Vec<u8>,
    head_loaded: bool,
    body: Box<dyn AsyncRead + Send + Unpin>,
}

impl UploadCandidate {
    pub fn new(
        filename: Option<String>,
        declared_size: u64,
        body: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            filename,
            declared_size,
            head: Vec::new(),
            head_loaded: false,
            body: Box::new(body),
        }
    }

    /// Candidate over an in-memory buffer; the declared size is the buffer length.
    pub fn from_bytes(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self::new(Some(filename.into()), size, Cursor::new(data))
    }

    /// Candidate over a local file, named after the file and sized by its metadata.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(Self::new(filename, size, file))
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Buffer up to [`SNIFF_HEAD_BYTES`] from the stream (idempotent).
    pub async fn load_head(&mut self) -> std::io::Result<&[u8]> {
        if !self.head_loaded {
            let mut buf = vec![0u8; SNIFF_HEAD_BYTES];
            let mut filled = 0;
            while filled < buf.len() {
                let n = self.body.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);
            self.head = buf;
            self.head_loaded = true;
        }
        Ok(&self.head)
    }

    /// Bytes buffered so far by [`load_head`](Self::load_head).
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// The full byte stream: buffered head followed by the unread body.
    pub fn into_reader(self) -> impl AsyncRead + Send + Unpin {
        Cursor::new(self.head).chain(self.body)
    }
}

impl fmt::Debug for UploadCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCandidate")
            .field("filename", &self.filename)
            .field("declared_size", &self.declared_size)
            .field("head_len", &self.head.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// STORED DOCUMENT
// =============================================================================

/// Where a stored document sits in its one-way lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Uploaded,
    Processed,
    Archived,
}

impl LifecycleState {
    /// Storage partition directory holding documents in this state.
    pub fn partition(&self) -> &'static str {
        match self {
            Self::Uploaded => crate::defaults::DOCUMENTS_DIR,
            Self::Processed => crate::defaults::PROCESSED_DIR,
            Self::Archived => crate::defaults::ARCHIVED_DIR,
        }
    }

    /// Lifecycle state implied by a partition directory name.
    pub fn from_partition(dir: &str) -> Option<Self> {
        match dir {
            crate::defaults::DOCUMENTS_DIR => Some(Self::Uploaded),
            crate::defaults::PROCESSED_DIR => Some(Self::Processed),
            crate::defaults::ARCHIVED_DIR => Some(Self::Archived),
            _ => None,
        }
    }

    /// Transitions only move forward: uploaded → processed → archived.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (Self::Uploaded, Self::Processed)
                | (Self::Uploaded, Self::Archived)
                | (Self::Processed, Self::Archived)
        )
    }

    /// Whether documents in this state may enter new processing.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Archived)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uploaded => write!(f, "uploaded"),
            Self::Processed => write!(f, "processed"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uploaded" => Ok(Self::Uploaded),
            "processed" => Ok(Self::Processed),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid lifecycle state: {}", s)),
        }
    }
}

/// A document persisted by the content-addressed store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: Uuid,
    pub subject_id: String,
    pub category: String,
    /// Client-supplied name, sanitized; never used to build storage paths.
    pub original_filename: String,
    pub stored_filename: String,
    /// Path relative to the storage root, `/`-separated.
    pub relative_path: String,
    pub byte_size: u64,
    /// Content type implied by the validated extension.
    pub declared_content_type: String,
    /// Content type sniffed from the file head, when recognised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_content_type: Option<String>,
    /// `blake3:{64-char-hex}` over the stored bytes.
    pub integrity_digest: String,
    pub upload_timestamp: DateTime<Utc>,
    pub lifecycle_state: LifecycleState,
}

/// Aggregate size of the active documents partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub file_count: u64,
    pub total_bytes: u64,
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// Terminal status of one extraction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Completed,
    Failed,
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Stages of the intake pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Validating,
    Storing,
    Extracting,
    Matching,
    Normalizing,
    Scoring,
    Completed,
    Failed,
}

impl PipelineStage {
    /// The stage that follows a successful run of this one.
    pub fn next(&self) -> PipelineStage {
        match self {
            Self::Validating => Self::Storing,
            Self::Storing => Self::Extracting,
            Self::Extracting => Self::Matching,
            Self::Matching => Self::Normalizing,
            Self::Normalizing => Self::Scoring,
            Self::Scoring | Self::Completed => Self::Completed,
            Self::Failed => Self::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::Storing => "storing",
            Self::Extracting => "extracting",
            Self::Matching => "matching",
            Self::Normalizing => "normalizing",
            Self::Scoring => "scoring",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one extraction attempt. Never updated in place; re-running
/// produces a new result with a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<String>,
    pub document_type: String,
    pub status: ExtractionStatus,
    pub raw_text: String,
    pub extracted_fields: FieldMap,
    /// Heuristic score in `[0, 100]`.
    pub confidence: f64,
    /// Failure reason, or a non-fatal note on completed results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExtractionResult {
    pub fn completed(
        document_type: impl Into<String>,
        stored_path: Option<String>,
        raw_text: String,
        extracted_fields: FieldMap,
        confidence: f64,
        note: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            stored_path,
            document_type: document_type.into(),
            status: ExtractionStatus::Completed,
            raw_text,
            extracted_fields,
            confidence: confidence.clamp(0.0, 100.0),
            error: note,
            created_at: Utc::now(),
        }
    }

    pub fn failed(
        document_type: impl Into<String>,
        stored_path: Option<String>,
        raw_text: String,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            stored_path,
            document_type: document_type.into(),
            status: ExtractionStatus::Failed,
            raw_text,
            extracted_fields: FieldMap::new(),
            confidence: 0.0,
            error: Some(error.into()),
            created_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExtractionStatus::Completed
    }
}
