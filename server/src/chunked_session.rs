//! Chunked upload sessions.
//!
//! Chunks are written to `<session>/<chunk_subdir>/<file>.part<N>` as they
//! arrive, in any order. Finalizing a file concatenates chunks `1..=N` in
//! index order into `<session>/<file>` and deletes each chunk once it has
//! been appended.
//!
//! A finalize runs on its own task and completes even if the caller goes
//! away. Finalizing a file whose chunks are all consumed and whose merged
//! file exists only records the end of the session again, so a finalize
//! that failed on the log write can be retried.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::ChunkedUploadConfig;
use crate::directory::DirectoryStore;
use crate::error::{ErrorKind, ServerError, ServerResult};
use crate::log_store::LogStore;
use csvgate::session::{FileName, SessionToken};

type FileKey = (SessionToken, FileName);

/// Manages chunked upload sessions.
#[derive(Debug, Clone)]
pub struct ChunkedSessionManager {
    directories: DirectoryStore,
    log_store: Arc<dyn LogStore>,
    config: ChunkedUploadConfig,

    /// Serializes finalize calls for the same file of a session.
    finalize_locks: Arc<Mutex<HashMap<FileKey, Arc<Mutex<()>>>>>,
}

impl ChunkedSessionManager {
    /// Creates a new session manager.
    pub fn new(
        directories: DirectoryStore,
        log_store: Arc<dyn LogStore>,
        config: ChunkedUploadConfig,
    ) -> Self {
        Self {
            directories,
            log_store,
            config,
            finalize_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates a new upload session.
    ///
    /// The session directory and its chunk directory are created, `data`
    /// is stored as `filename`, and the start of the session is logged.
    /// If logging fails the directory is left in place.
    pub async fn create_session<R>(&self, filename: &FileName, data: R) -> ServerResult<SessionToken>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.check_file_name(filename)?;

        let token = SessionToken::generate();
        self.directories.create_session(&token).await?;

        let path = self.directories.file_path(&token, filename);
        let size = write_limited(data, &path, self.config.max_chunk_size).await?;

        self.log_store.record_session_start(&token).await?;

        tracing::info!(session = %token, filename = %filename, size, "Created upload session");
        Ok(token)
    }

    /// Writes a chunk to a session.
    ///
    /// A chunk uploaded twice with the same index replaces the earlier one.
    /// Returns the number of bytes written.
    pub async fn write_chunk<R>(
        &self,
        token: &SessionToken,
        filename: &FileName,
        chunk_index: u32,
        total_chunks: u32,
        data: R,
    ) -> ServerResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.check_file_name(filename)?;

        if total_chunks == 0 {
            return Err(ServerError::request_error(anyhow!(
                "Total chunks must be at least 1"
            )));
        }

        if chunk_index == 0 || chunk_index > total_chunks {
            return Err(ServerError::request_error(anyhow!(
                "Chunk index {} is outside 1..={}",
                chunk_index,
                total_chunks
            )));
        }

        self.require_session(token).await?;

        let chunk_dir = self.directories.chunk_dir(token);
        fs::create_dir_all(&chunk_dir)
            .await
            .map_err(ServerError::storage_error)?;

        // Stage under a unique name so that a chunk path only ever holds a
        // complete upload. Concurrent writers of one index race on the rename.
        let staging = chunk_dir.join(format!(
            ".{}.{}.upload",
            filename.chunk_name(chunk_index),
            Uuid::new_v4()
        ));
        let bytes = write_limited(data, &staging, self.config.max_chunk_size).await?;

        let target = self.directories.chunk_path(token, filename, chunk_index);
        if let Err(e) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(ServerError::storage_error(e));
        }

        tracing::debug!(
            session = %token,
            filename = %filename,
            chunk = chunk_index,
            total = total_chunks,
            bytes,
            "Received chunk"
        );

        Ok(bytes)
    }

    /// Merges chunks `1..=total_chunks` of a file and records the end of
    /// the session.
    ///
    /// Fails with `MissingChunkError` naming the lowest absent index before
    /// anything is written. If assembly fails midway, the partially written
    /// file is left in place and chunks already appended stay deleted.
    /// Returns the size of the merged file.
    pub async fn finalize_session(
        &self,
        token: &SessionToken,
        filename: &FileName,
        total_chunks: u32,
    ) -> ServerResult<u64> {
        let manager = self.clone();
        let token = token.clone();
        let filename = filename.clone();

        tokio::spawn(async move {
            manager
                .finalize_detached(&token, &filename, total_chunks)
                .await
        })
        .await
        .map_err(|e| ServerError::storage_error(anyhow!("Finalize task failed: {}", e)))?
    }

    async fn finalize_detached(
        &self,
        token: &SessionToken,
        filename: &FileName,
        total_chunks: u32,
    ) -> ServerResult<u64> {
        self.check_file_name(filename)?;

        if total_chunks == 0 {
            return Err(ServerError::request_error(anyhow!(
                "Total chunks must be at least 1"
            )));
        }

        self.require_session(token).await?;

        let key = (token.clone(), filename.clone());
        let lock = {
            let mut locks = self.finalize_locks.lock().await;
            locks.entry(key.clone()).or_default().clone()
        };

        let result = {
            let _guard = lock.lock().await;
            self.assemble(token, filename, total_chunks).await
        };

        drop(lock);
        self.release_lock(&key).await;

        let size = result?;
        self.log_store.record_session_end(token).await?;

        tracing::info!(
            session = %token,
            filename = %filename,
            chunks = total_chunks,
            size,
            "Merged upload"
        );

        Ok(size)
    }

    async fn assemble(
        &self,
        token: &SessionToken,
        filename: &FileName,
        total_chunks: u32,
    ) -> ServerResult<u64> {
        let final_path = self.directories.file_path(token, filename);

        let mut first_missing = None;
        let mut present = 0;
        for i in 1..=total_chunks {
            let path = self.directories.chunk_path(token, filename, i);
            let exists = fs::try_exists(&path)
                .await
                .map_err(ServerError::storage_error)?;

            if exists {
                present += 1;
            } else if first_missing.is_none() {
                first_missing = Some(i);
            }
        }

        if let Some(i) = first_missing {
            if present == 0 {
                if let Some(size) = merged_size(&final_path).await? {
                    tracing::debug!(session = %token, filename = %filename, "Already merged");
                    return Ok(size);
                }
            }

            tracing::warn!(session = %token, filename = %filename, chunk = i, "Missing chunk");
            return Err(ErrorKind::MissingChunkError(i).into());
        }

        let mut output = File::create(&final_path).await.map_err(|e| {
            ServerError::storage_error(anyhow!(
                "Failed to create {}: {}",
                final_path.display(),
                e
            ))
        })?;

        let mut size = 0;
        for i in 1..=total_chunks {
            let path = self.directories.chunk_path(token, filename, i);
            let mut chunk = match File::open(&path).await {
                Ok(chunk) => chunk,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(ErrorKind::MissingChunkError(i).into());
                }
                Err(e) => return Err(ServerError::storage_error(e)),
            };

            size += tokio::io::copy(&mut chunk, &mut output)
                .await
                .map_err(|e| {
                    ServerError::storage_error(anyhow!(
                        "Failed to append chunk {} of {}: {}",
                        i,
                        filename,
                        e
                    ))
                })?;

            drop(chunk);
            fs::remove_file(&path)
                .await
                .map_err(ServerError::storage_error)?;
        }

        output.flush().await.map_err(ServerError::storage_error)?;
        output.sync_all().await.map_err(ServerError::storage_error)?;

        Ok(size)
    }

    /// Drops the lock entry of a file once nobody else holds it.
    async fn release_lock(&self, key: &FileKey) {
        let mut locks = self.finalize_locks.lock().await;
        if let Some(lock) = locks.get(key) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(key);
            }
        }
    }

    async fn require_session(&self, token: &SessionToken) -> ServerResult<()> {
        if self.directories.session_exists(token).await? {
            Ok(())
        } else {
            Err(ErrorKind::NoSuchSession.into())
        }
    }

    fn check_file_name(&self, filename: &FileName) -> ServerResult<()> {
        if self.directories.is_reserved(filename) {
            return Err(ServerError::request_error(anyhow!(
                "File name {} is reserved",
                filename
            )));
        }
        Ok(())
    }
}

/// Returns the size of an already merged file, if there is one.
async fn merged_size(path: &Path) -> ServerResult<Option<u64>> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ServerError::storage_error(e)),
    }
}

/// Streams `data` into a new file at `path`, refusing more than `limit` bytes.
async fn write_limited<R>(data: R, path: &Path, limit: u64) -> ServerResult<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let mut file = File::create(path).await.map_err(|e| {
        ServerError::storage_error(anyhow!("Failed to create {}: {}", path.display(), e))
    })?;

    let mut limited = data.take(limit.saturating_add(1));
    let written = match tokio::io::copy(&mut limited, &mut file).await {
        Ok(written) => written,
        Err(e) => {
            drop(file);
            let _ = fs::remove_file(path).await;
            return Err(ServerError::storage_error(e));
        }
    };

    if written > limit {
        drop(file);
        let _ = fs::remove_file(path).await;
        return Err(ServerError::request_error(anyhow!(
            "Upload exceeds the maximum size of {} bytes",
            limit
        )));
    }

    file.flush().await.map_err(ServerError::storage_error)?;
    Ok(written)
}
