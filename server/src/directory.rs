//! On-disk layout of upload sessions.
//!
//! ```text
//! <upload_root>/<session_token>/<file_name>
//! <upload_root>/<session_token>/<chunk_subdir>/<file_name>.part<N>
//! ```
//!
//! Sessions never share a subtree, so the session token is the only
//! partitioning needed between concurrent requests.

use std::io;
use std::path::PathBuf;

use anyhow::anyhow;
use tokio::fs;

use crate::error::{ServerError, ServerResult};
use csvgate::session::{FileName, SessionToken};

/// Outcome of removing a session directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The directory existed and was removed.
    Removed,

    /// There was nothing to remove.
    AlreadyAbsent,
}

/// The upload directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    chunk_subdir: String,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>, chunk_subdir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            chunk_subdir: chunk_subdir.into(),
        }
    }

    /// Returns whether a file name would clash with the chunk directory.
    pub fn is_reserved(&self, file: &FileName) -> bool {
        file.as_str() == self.chunk_subdir
    }

    pub fn session_dir(&self, token: &SessionToken) -> PathBuf {
        self.root.join(token.as_str())
    }

    pub fn chunk_dir(&self, token: &SessionToken) -> PathBuf {
        self.session_dir(token).join(&self.chunk_subdir)
    }

    pub fn file_path(&self, token: &SessionToken, file: &FileName) -> PathBuf {
        self.session_dir(token).join(file.as_str())
    }

    pub fn chunk_path(&self, token: &SessionToken, file: &FileName, index: u32) -> PathBuf {
        self.chunk_dir(token).join(file.chunk_name(index))
    }

    /// Creates the upload root if it is missing.
    pub async fn ensure_root(&self) -> ServerResult<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            ServerError::storage_error(anyhow!(
                "Failed to create upload root {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Creates the session directory and its chunk directory.
    pub async fn create_session(&self, token: &SessionToken) -> ServerResult<()> {
        let chunk_dir = self.chunk_dir(token);
        fs::create_dir_all(&chunk_dir).await.map_err(|e| {
            ServerError::storage_error(anyhow!(
                "Failed to create {}: {}",
                chunk_dir.display(),
                e
            ))
        })
    }

    pub async fn session_exists(&self, token: &SessionToken) -> ServerResult<bool> {
        match fs::metadata(self.session_dir(token)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ServerError::storage_error(e)),
        }
    }

    /// Recursively removes a session directory.
    ///
    /// A directory that does not exist counts as removed, which makes
    /// reclamation idempotent across cycles.
    pub async fn remove_session(&self, token: &SessionToken) -> ServerResult<Removal> {
        let path = self.session_dir(token);

        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(Removal::Removed),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Removal::AlreadyAbsent),
            Err(e) => Err(ServerError::storage_error(anyhow!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Lists regular files directly inside the session directory whose
    /// names end with `suffix`, sorted by name.
    pub async fn list_files(&self, token: &SessionToken, suffix: &str) -> ServerResult<Vec<String>> {
        let dir = self.session_dir(token);
        let mut entries = fs::read_dir(&dir).await.map_err(|e| {
            ServerError::storage_error(anyhow!("Failed to list {}: {}", dir.display(), e))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(ServerError::storage_error)?
        {
            let file_type = entry.file_type().await.map_err(ServerError::storage_error)?;
            if !file_type.is_file() {
                continue;
            }

            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(suffix) {
                    files.push(name.to_owned());
                }
            }
        }

        files.sort();
        Ok(files)
    }
}
