use async_trait::async_trait;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use thiserror::Error;
use uuid::Uuid;

/// Directory (under the upload root) holding files that are not yet committed.
pub const STAGING_DIR: &str = ".staging";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// StagedUpload
///
/// A file written to a temporary location that is not publicly reachable yet.
/// `StorageService::commit` moves it into place. A staged upload dropped without being
/// committed deletes its temporary file, including when the request future is
/// cancelled by a timeout.
#[derive(Debug)]
pub struct StagedUpload {
    file_name: String,
    staging_path: Option<PathBuf>,
}

impl StagedUpload {
    /// The name the file will have in the upload root once committed.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Public URL path the file is served under once committed.
    pub fn public_path(&self) -> String {
        format!("{}{}", crate::resolver::UPLOADS_ROOT, self.file_name)
    }

    fn into_staging_path(mut self) -> Option<PathBuf> {
        self.staging_path.take()
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Some(path) = self.staging_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to discard staged upload");
            }
        }
    }
}

/// StorageService
///
/// Contract for the upload store. Uploads are written in two steps: `stage` writes
/// the bytes somewhere private, `commit` publishes them under their final name.
/// Callers record metadata between the two, so a failed record never leaves a
/// public file behind.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the upload root and clears staged files left by a previous crash.
    async fn ensure_root(&self) -> Result<(), StorageError>;

    /// Writes `bytes` to a private staging location under a fresh, collision-free
    /// name ending in `.{extension}`.
    async fn stage(&self, bytes: &[u8], extension: &str) -> Result<StagedUpload, StorageError>;

    /// Publishes a staged upload. Returns the stored file name.
    async fn commit(&self, staged: StagedUpload) -> Result<String, StorageError>;

    /// Reads a stored file by its path relative to the upload root.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Deletes a stored file by its public path or relative key. Missing files are not
    /// an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Builds a unique stored name: millisecond timestamp plus a random suffix.
fn unique_file_name(extension: &str) -> String {
    format!(
        "{}-{}.{}",
        chrono::Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        extension
    )
}

/// sanitize_key
///
/// Strips directory navigation components (`..`, `.`) and empty segments from a
/// user-provided key so it cannot escape the upload root.
pub fn sanitize_key(key: &str) -> String {
    key.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Turns a public path (`/uploads/x.png`) or a bare key into a sanitized relative key.
fn relative_key(key: &str) -> String {
    let trimmed = key.trim_start_matches('/');
    let trimmed = trimmed.strip_prefix("uploads/").unwrap_or(trimmed);
    sanitize_key(trimmed)
}

// 1. The Real Implementation (local filesystem)
/// LocalStorage
///
/// Stores uploads as files under a single root directory. Staged files live in
/// `<root>/.staging/` on the same filesystem, so commit is an atomic rename.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }
}

#[async_trait]
impl StorageService for LocalStorage {
    async fn ensure_root(&self) -> Result<(), StorageError> {
        let staging = self.staging_dir();
        match tokio::fs::remove_dir_all(&staging).await {
            Ok(()) => tracing::info!(dir = %staging.display(), "cleared leftover staged uploads"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&staging).await?;
        Ok(())
    }

    async fn stage(&self, bytes: &[u8], extension: &str) -> Result<StagedUpload, StorageError> {
        let staging = self.staging_dir();
        tokio::fs::create_dir_all(&staging).await?;

        let file_name = unique_file_name(extension);
        let path = staging.join(&file_name);
        tokio::fs::write(&path, bytes).await?;

        Ok(StagedUpload {
            file_name,
            staging_path: Some(path),
        })
    }

    async fn commit(&self, staged: StagedUpload) -> Result<String, StorageError> {
        let file_name = staged.file_name.clone();
        let destination = self.root.join(&file_name);

        // Take the path only after the rename succeeds, so a failed rename still
        // discards the staged file on drop.
        let source = staged
            .staging_path
            .clone()
            .ok_or_else(|| StorageError::Unavailable("upload already committed".to_string()))?;
        tokio::fs::rename(&source, &destination).await?;
        let _ = staged.into_staging_path();

        tracing::debug!(file = %file_name, "committed upload");
        Ok(file_name)
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = relative_key(key);
        if key.is_empty() || key.starts_with(STAGING_DIR) {
            return Ok(None);
        }
        match tokio::fs::read(self.root.join(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            // A directory or similar is not an image.
            Err(e) if e.kind() == std::io::ErrorKind::IsADirectory => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let key = relative_key(key);
        if key.is_empty() {
            return Ok(());
        }
        match tokio::fs::remove_file(self.root.join(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// 2. The Mock Implementation (For Tests)
/// MockStorageService
///
/// In-memory `StorageService` with failure injection, used to exercise the
/// compensation paths of the upload flow without touching the filesystem.
#[derive(Clone, Default)]
pub struct MockStorageService {
    /// When true, `stage` fails.
    pub fail_stage: bool,
    /// When true, `commit` fails after staging succeeded.
    pub fail_commit: bool,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    staged: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing_commit() -> Self {
        Self {
            fail_commit: true,
            ..Self::default()
        }
    }

    /// Names of committed files, sorted.
    pub fn stored_files(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .lock()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Number of `stage` calls that wrote bytes.
    pub fn staged_count(&self) -> usize {
        self.staged.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_root(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn stage(&self, bytes: &[u8], extension: &str) -> Result<StagedUpload, StorageError> {
        if self.fail_stage {
            return Err(StorageError::Unavailable("mock stage failure".to_string()));
        }
        let file_name = unique_file_name(extension);
        if let Ok(mut staged) = self.staged.lock() {
            staged.insert(file_name.clone(), bytes.to_vec());
        }
        Ok(StagedUpload {
            file_name,
            staging_path: None,
        })
    }

    async fn commit(&self, staged: StagedUpload) -> Result<String, StorageError> {
        if self.fail_commit {
            return Err(StorageError::Unavailable("mock commit failure".to_string()));
        }
        let bytes = self
            .staged
            .lock()
            .ok()
            .and_then(|s| s.get(staged.file_name()).cloned())
            .unwrap_or_default();
        if let Ok(mut files) = self.files.lock() {
            files.insert(staged.file_name().to_string(), bytes);
        }
        Ok(staged.file_name().to_string())
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = relative_key(key);
        Ok(self.files.lock().ok().and_then(|f| f.get(&key).cloned()))
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let key = relative_key(key);
        if let Ok(mut files) = self.files.lock() {
            files.remove(&key);
        }
        Ok(())
    }
}

/// StorageState
///
/// The concrete type used to share the storage service across the application state.
pub type StorageState = Arc<dyn StorageService>;
