//! Content-addressed document storage on the local filesystem.
//!
//! Layout under the storage root:
//!
//! ```text
//! {root}/documents/{subject_id}/{category}/{uuidv7}.{ext}   active uploads
//! {root}/processed/{subject_id}/{category}/{uuidv7}.{ext}   extraction succeeded
//! {root}/archived/{subject_id}/{category}/{ts}_{uuidv7}.{ext}
//! {root}/temp/{uuidv7}.{ext}.part                           in-flight writes
//! ```
//!
//! Uploads are streamed in fixed-size chunks into a part file, hashed with
//! BLAKE3 in the same pass, fsynced and renamed into place. Lifecycle moves are
//! a single `rename`, so concurrent movers of one path resolve to exactly one
//! winner.
//!
//! ## Example
//!
//! ```rust,ignore
//! use kyc_store::ContentAddressedStore;
//!
//! let store = ContentAddressedStore::new("/var/lib/kyc/storage");
//! store.ensure_layout().await?;
//!
//! let doc = store.save(candidate, "cust-42", "passport").await?;
//! let archived = store.archive(&doc.relative_path).await;
//! ```

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kyc_core::defaults::{
    ARCHIVED_DIR, DOCUMENTS_DIR, MAX_UPLOAD_SIZE_BYTES, PROCESSED_DIR, STORAGE_CHUNK_BYTES,
    TEMP_DIR,
};
use kyc_core::{
    extension_of, sanitize_filename, sanitize_path_component, Error, IntakeConfig, LifecycleState,
    Result, StorageStats, StoredDocument, UploadCandidate, ValidationError, ValidationErrorKind,
};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

/// Content type recorded when the extension has no configured mapping.
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Timestamp prefix format for archived file names.
const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%6f";

/// Compute BLAKE3 hash of data with "blake3:" prefix.
///
/// Returns a string in the format: `blake3:{64-char-hex}`
pub fn compute_content_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("blake3:{}", hash.to_hex())
}

/// A validated relative path inside one of the managed partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPath {
    pub state: LifecycleState,
    pub subject_id: String,
    pub category: String,
    pub file_name: String,
}

impl ManagedPath {
    /// Parse `{partition}/{subject}/{category}/{name}`.
    ///
    /// Rejects absolute paths, `..`, unknown partitions and unsafe components.
    pub fn parse(relative: &str) -> std::result::Result<Self, String> {
        if relative.starts_with('/') || relative.starts_with('\\') {
            return Err("absolute paths are not accepted".to_string());
        }
        let parts: Vec<&str> = relative.split('/').collect();
        if parts.iter().any(|p| *p == ".." || *p == ".") {
            return Err("path traversal is not allowed".to_string());
        }
        let [partition, subject, category, name] = parts.as_slice() else {
            return Err(format!(
                "expected partition/subject/category/file, got '{}'",
                relative
            ));
        };
        let state = LifecycleState::from_partition(partition)
            .ok_or_else(|| format!("'{}' is not a managed partition", partition))?;
        let subject = sanitize_path_component(subject)?;
        let category = sanitize_path_component(category)?;
        if !is_safe_file_name(name) {
            return Err(format!("unsafe stored file name '{}'", name));
        }
        Ok(Self {
            state,
            subject_id: subject.to_string(),
            category: category.to_string(),
            file_name: name.to_string(),
        })
    }

    /// `/`-separated path relative to the storage root.
    pub fn relative(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.state.partition(),
            self.subject_id,
            self.category,
            self.file_name
        )
    }

    /// Same subject, category and name in another partition.
    fn moved_to(&self, state: LifecycleState, file_name: String) -> Self {
        Self {
            state,
            subject_id: self.subject_id.clone(),
            category: self.category.clone(),
            file_name,
        }
    }

    /// Document id encoded in the stored name, ignoring any archive prefix.
    fn document_id(&self) -> Uuid {
        let stem = self
            .file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.file_name);
        let id = stem.rsplit('_').next().unwrap_or(stem);
        Uuid::parse_str(id).unwrap_or(Uuid::nil())
    }
}

fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Filesystem store for validated identity documents.
#[derive(Debug, Clone)]
pub struct ContentAddressedStore {
    root: PathBuf,
    chunk_bytes: usize,
    max_size_bytes: u64,
    content_types: BTreeMap<String, String>,
}

impl ContentAddressedStore {
    /// Create a store rooted at `root` with default limits.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let upload = kyc_core::UploadConfig::default();
        Self {
            root: root.into(),
            chunk_bytes: STORAGE_CHUNK_BYTES,
            max_size_bytes: MAX_UPLOAD_SIZE_BYTES,
            content_types: upload.content_types,
        }
    }

    pub fn from_config(config: &IntakeConfig) -> Self {
        Self {
            root: config.storage.root.clone(),
            chunk_bytes: config.storage.chunk_bytes.max(1),
            max_size_bytes: config.upload.max_size_bytes,
            content_types: config.upload.content_types.clone(),
        }
    }

    /// Override the streamed size limit (bytes actually written).
    pub fn with_max_size(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn with_chunk_size(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &ManagedPath) -> PathBuf {
        self.root
            .join(path.state.partition())
            .join(&path.subject_id)
            .join(&path.category)
            .join(&path.file_name)
    }

    fn content_type_for(&self, extension: &str) -> String {
        self.content_types
            .get(extension)
            .cloned()
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
    }

    /// Create the partition directories.
    pub async fn ensure_layout(&self) -> Result<()> {
        for dir in [DOCUMENTS_DIR, TEMP_DIR, PROCESSED_DIR, ARCHIVED_DIR] {
            let path = self.root.join(dir);
            fs::create_dir_all(&path).await.map_err(|e| {
                warn!(path = %path.display(), error = %e, "file_storage: create_dir_all failed");
                Error::Storage(format!("create {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }

    /// Validate that the storage root can write, read, and delete files.
    ///
    /// Performs a full round-trip at startup to catch permission errors and
    /// missing mounts early.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let test_dir = self.root.join(TEMP_DIR).join(".health-check");
        let test_file = test_dir.join("probe.bin");

        fs::create_dir_all(&test_dir)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", test_dir, e))?;

        let data = b"storage-health-check";
        fs::write(&test_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", test_file, e))?;

        let read_data = fs::read(&test_file)
            .await
            .map_err(|e| format!("read({:?}): {}", test_file, e))?;
        if read_data != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", test_file, e))?;
        let _ = fs::remove_dir(&test_dir).await; // Best-effort cleanup

        Ok(())
    }

    /// Persist a validated candidate under `documents/{subject_id}/{category}/`.
    ///
    /// The stored name is a fresh UUIDv7 plus the candidate's lower-cased
    /// extension. Bytes beyond the configured maximum abort the write with
    /// `FileTooLarge`; any failure removes the part file before returning.
    #[instrument(skip(self, candidate), fields(subsystem = "storage", op = "save"))]
    pub async fn save(
        &self,
        candidate: UploadCandidate,
        subject_id: &str,
        category: &str,
    ) -> Result<StoredDocument> {
        let subject_id = sanitize_path_component(subject_id).map_err(Error::InvalidInput)?;
        let category = sanitize_path_component(category).map_err(Error::InvalidInput)?;

        let client_name = candidate.filename().unwrap_or_default().to_string();
        let extension = extension_of(&client_name)
            .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .ok_or_else(|| {
                Error::InvalidInput(format!("'{}' has no usable extension", client_name))
            })?;

        let id = Uuid::now_v7();
        let location = ManagedPath {
            state: LifecycleState::Uploaded,
            subject_id: subject_id.to_string(),
            category: category.to_string(),
            file_name: format!("{}.{}", id, extension),
        };
        let final_path = self.full_path(&location);
        let temp_dir = self.root.join(TEMP_DIR);
        let part_path = temp_dir.join(format!("{}.part", location.file_name));

        for dir in [Some(temp_dir.as_path()), final_path.parent()].into_iter().flatten() {
            fs::create_dir_all(dir).await.map_err(|e| {
                warn!(dir = %dir.display(), error = %e, "file_storage: create_dir_all failed");
                Error::Storage(format!("create {}: {}", dir.display(), e))
            })?;
        }

        let (byte_size, integrity_digest) =
            match self.write_part(candidate.into_reader(), &part_path).await {
                Ok(written) => written,
                Err(e) => {
                    remove_part(&part_path).await;
                    return Err(e);
                }
            };

        if let Err(e) = fs::rename(&part_path, &final_path).await {
            warn!(from = %part_path.display(), to = %final_path.display(), error = %e, "file_storage: rename failed");
            remove_part(&part_path).await;
            return Err(Error::Storage(format!("rename into place: {}", e)));
        }

        // Set permissions to 0644 (rw-r--r--, no execute)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                fs::set_permissions(&final_path, std::fs::Permissions::from_mode(0o644)).await
            {
                warn!(path = %final_path.display(), error = %e, "file_storage: set_permissions failed");
                let _ = fs::remove_file(&final_path).await;
                return Err(Error::Storage(format!("set permissions: {}", e)));
            }
        }

        let relative_path = location.relative();
        info!(
            stored_path = %relative_path,
            byte_size,
            digest = %integrity_digest,
            "Document stored"
        );

        Ok(StoredDocument {
            id,
            subject_id: location.subject_id.clone(),
            category: location.category.clone(),
            original_filename: sanitize_filename(&client_name),
            stored_filename: location.file_name.clone(),
            relative_path,
            byte_size,
            declared_content_type: self.content_type_for(&extension),
            detected_content_type: None,
            integrity_digest,
            upload_timestamp: Utc::now(),
            lifecycle_state: LifecycleState::Uploaded,
        })
    }

    /// Stream `reader` into `part_path`, hashing each chunk as it is written.
    async fn write_part(
        &self,
        mut reader: impl AsyncRead + Unpin,
        part_path: &Path,
    ) -> Result<(u64, String)> {
        let mut file = fs::File::create(part_path).await.map_err(|e| {
            warn!(part_path = %part_path.display(), error = %e, "file_storage: File::create failed");
            Error::Storage(format!("create part file: {}", e))
        })?;

        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; self.chunk_bytes];
        let mut total: u64 = 0;

        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| Error::Storage(format!("read upload stream: {}", e)))?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > self.max_size_bytes {
                debug!(max = self.max_size_bytes, "file_storage: stream exceeded size limit");
                return Err(ValidationError::new(
                    ValidationErrorKind::FileTooLarge,
                    format!("File exceeds maximum size of {} bytes", self.max_size_bytes),
                )
                .into());
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await.map_err(|e| {
                warn!(error = %e, "file_storage: write_all failed");
                Error::Storage(format!("write part file: {}", e))
            })?;
            trace!(chunk = n, total, "file_storage: chunk written");
        }

        file.flush()
            .await
            .map_err(|e| Error::Storage(format!("flush part file: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| Error::Storage(format!("sync part file: {}", e)))?;

        Ok((total, format!("blake3:{}", hasher.finalize().to_hex())))
    }

    /// Reconstruct the record for an existing stored path.
    ///
    /// Returns `None` for missing files and paths outside the managed
    /// partitions. The original client filename is not recoverable from disk;
    /// the stored name stands in for it.
    #[instrument(skip(self), fields(subsystem = "storage", op = "info"))]
    pub async fn info(&self, relative_path: &str) -> Option<StoredDocument> {
        let location = match ManagedPath::parse(relative_path) {
            Ok(location) => location,
            Err(reason) => {
                debug!(reason = %reason, "file_storage: rejected path");
                return None;
            }
        };
        let full_path = self.full_path(&location);

        let metadata = match fs::metadata(&full_path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return None,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %full_path.display(), error = %e, "file_storage: metadata failed");
                return None;
            }
        };

        let (byte_size, integrity_digest) = match hash_file(&full_path, self.chunk_bytes).await {
            Ok(hashed) => hashed,
            Err(e) => {
                warn!(path = %full_path.display(), error = %e, "file_storage: hashing failed");
                return None;
            }
        };

        let id = location.document_id();
        let upload_timestamp = id
            .get_timestamp()
            .and_then(|ts| {
                let (secs, nanos) = ts.to_unix();
                DateTime::from_timestamp(secs as i64, nanos)
            })
            .or_else(|| metadata.modified().ok().map(DateTime::<Utc>::from))
            .unwrap_or_else(Utc::now);

        let extension = extension_of(&location.file_name).unwrap_or_default();

        Some(StoredDocument {
            id,
            subject_id: location.subject_id.clone(),
            category: location.category.clone(),
            original_filename: location.file_name.clone(),
            stored_filename: location.file_name.clone(),
            relative_path: location.relative(),
            byte_size,
            declared_content_type: self.content_type_for(&extension),
            detected_content_type: None,
            integrity_digest,
            upload_timestamp,
            lifecycle_state: location.state,
        })
    }

    /// Absolute filesystem path for a managed relative path.
    pub fn resolve(&self, relative_path: &str) -> Option<PathBuf> {
        ManagedPath::parse(relative_path)
            .ok()
            .map(|location| self.full_path(&location))
    }

    /// Whether the stored bytes still hash to `expected_digest`.
    pub async fn verify(&self, relative_path: &str, expected_digest: &str) -> bool {
        let Some(full_path) = self.resolve(relative_path) else {
            return false;
        };
        match hash_file(&full_path, self.chunk_bytes).await {
            Ok((_, digest)) => {
                let matches = digest == expected_digest;
                if !matches {
                    warn!(stored_path = %relative_path, "file_storage: integrity digest mismatch");
                }
                matches
            }
            Err(e) => {
                debug!(stored_path = %relative_path, error = %e, "file_storage: verify read failed");
                false
            }
        }
    }

    /// Move a document into `archived/`, prefixing its name with a timestamp.
    ///
    /// Returns the new relative path, or `None` when the source is missing,
    /// already archived, or another caller moved it first.
    #[instrument(skip(self), fields(subsystem = "storage", op = "archive"))]
    pub async fn archive(&self, relative_path: &str) -> Option<String> {
        let source = self.movable(relative_path, LifecycleState::Archived)?;
        let stamp = Utc::now().format(ARCHIVE_TIMESTAMP_FORMAT);
        let target = source.moved_to(
            LifecycleState::Archived,
            format!("{}_{}", stamp, source.file_name),
        );
        self.rename(&source, &target).await
    }

    /// Move an uploaded document into `processed/`, keeping its name.
    #[instrument(skip(self), fields(subsystem = "storage", op = "move_to_processed"))]
    pub async fn move_to_processed(&self, relative_path: &str) -> Option<String> {
        let source = self.movable(relative_path, LifecycleState::Processed)?;
        let target = source.moved_to(LifecycleState::Processed, source.file_name.clone());
        self.rename(&source, &target).await
    }

    /// Archive (`archive = true`) or permanently remove a stored document.
    #[instrument(skip(self), fields(subsystem = "storage", op = "delete"))]
    pub async fn delete(&self, relative_path: &str, archive: bool) -> bool {
        if archive {
            return self.archive(relative_path).await.is_some();
        }
        let location = match ManagedPath::parse(relative_path) {
            Ok(location) => location,
            Err(reason) => {
                warn!(reason = %reason, "file_storage: delete rejected");
                return false;
            }
        };
        let full_path = self.full_path(&location);
        match fs::remove_file(&full_path).await {
            Ok(()) => {
                info!(stored_path = %relative_path, "Document deleted");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(stored_path = %relative_path, "file_storage: nothing to delete");
                false
            }
            Err(e) => {
                warn!(stored_path = %relative_path, error = %e, "file_storage: remove_file failed");
                false
            }
        }
    }

    /// File count and total bytes under `documents/`.
    pub async fn stats(&self) -> StorageStats {
        let mut stats = StorageStats::default();
        let mut pending = vec![self.root.join(DOCUMENTS_DIR)];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "file_storage: read_dir failed");
                    continue;
                }
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "file_storage: next_entry failed");
                        break;
                    }
                };
                match entry.metadata().await {
                    Ok(metadata) if metadata.is_dir() => pending.push(entry.path()),
                    Ok(metadata) if metadata.is_file() => {
                        stats.file_count += 1;
                        stats.total_bytes += metadata.len();
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "file_storage: metadata failed");
                    }
                }
            }
        }

        stats
    }

    /// Parse a move source and check the lifecycle allows moving it to `next`.
    fn movable(&self, relative_path: &str, next: LifecycleState) -> Option<ManagedPath> {
        let source = match ManagedPath::parse(relative_path) {
            Ok(source) => source,
            Err(reason) => {
                warn!(reason = %reason, "file_storage: move rejected");
                return None;
            }
        };
        if !source.state.can_transition_to(next) {
            warn!(
                stored_path = %relative_path,
                from = %source.state,
                to = %next,
                "file_storage: lifecycle transition not allowed"
            );
            return None;
        }
        Some(source)
    }

    /// The rename is the only gate: a concurrent mover that loses sees NotFound.
    async fn rename(&self, source: &ManagedPath, target: &ManagedPath) -> Option<String> {
        let from = self.full_path(source);
        let to = self.full_path(target);

        if let Some(parent) = to.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                warn!(parent = %parent.display(), error = %e, "file_storage: create_dir_all failed");
                return None;
            }
        }

        match fs::rename(&from, &to).await {
            Ok(()) => {
                let relative = target.relative();
                info!(from = %source.relative(), to = %relative, state = %target.state, "Document moved");
                Some(relative)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(stored_path = %source.relative(), "file_storage: source already moved or missing");
                None
            }
            Err(e) => {
                warn!(from = %from.display(), to = %to.display(), error = %e, "file_storage: rename failed");
                None
            }
        }
    }
}

/// Stream a file through BLAKE3, returning its size and `blake3:` digest.
pub async fn hash_file(path: &Path, chunk_bytes: usize) -> std::io::Result<(u64, String)> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; chunk_bytes.max(1)];
    let mut total: u64 = 0;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, format!("blake3:{}", hasher.finalize().to_hex())))
}

async fn remove_part(part_path: &Path) {
    if let Err(e) = fs::remove_file(part_path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(part_path = %part_path.display(), error = %e, "file_storage: part file cleanup failed");
        }
    }
}
