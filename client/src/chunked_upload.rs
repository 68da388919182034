//! Chunked file uploads.
//!
//! A file no larger than one chunk is sent whole. Anything larger is cut
//! into fixed-size chunks numbered from 1, uploaded concurrently in any
//! order, then merged on the server by a finalize request.

use std::fmt::Write;
use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressState, ProgressStyle};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::api::ApiClient;
use csvgate::api::v1::upload_chunk::FinalizeUploadRequest;
use csvgate::session::{FileName, SessionToken};

/// Default chunk size: 8 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Default number of chunks in flight.
pub const DEFAULT_JOBS: usize = 4;

/// Configuration for uploading a file.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Size of each chunk, and the largest file sent in one request.
    pub chunk_size: u64,

    /// Number of chunks uploaded at once.
    pub jobs: usize,

    /// Retries per chunk before giving up.
    pub max_retries: u32,
}

/// One chunk of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    /// 1-based chunk index.
    pub index: u32,
    pub offset: u64,
    pub len: u64,
}

/// A finished upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub session_token: SessionToken,
    pub filename: FileName,
    pub size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            jobs: DEFAULT_JOBS,
            max_retries: 3,
        }
    }
}

/// Splits a file of `file_size` bytes into chunks of at most `chunk_size`.
pub fn plan_chunks(file_size: u64, chunk_size: u64) -> Result<Vec<ChunkSpec>> {
    if chunk_size == 0 {
        return Err(anyhow!("Chunk size must be at least one byte"));
    }

    let total = file_size.div_ceil(chunk_size);
    let total = u32::try_from(total)
        .map_err(|_| anyhow!("{} chunks are too many; use a larger chunk size", total))?;

    Ok((0..total)
        .map(|i| {
            let offset = i as u64 * chunk_size;
            ChunkSpec {
                index: i + 1,
                offset,
                len: chunk_size.min(file_size - offset),
            }
        })
        .collect())
}

/// Returns the name a local file is uploaded under.
pub fn upload_name(path: &Path) -> Result<FileName> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?;

    Ok(FileName::new(name.to_owned())?)
}

/// Uploads a file.
///
/// Without a session a new one is created. Small files then travel in the
/// session creation request itself.
pub async fn upload_file(
    api: &ApiClient,
    path: &Path,
    session: Option<&SessionToken>,
    config: &UploadConfig,
    pb: &ProgressBar,
) -> Result<UploadOutcome> {
    let filename = upload_name(path)?;
    let size = tokio::fs::metadata(path).await?.len();
    pb.set_length(size);

    if session.is_none() && size <= config.chunk_size {
        let data = tokio::fs::read(path).await?;
        let session_token = api.create_session(&filename, Bytes::from(data)).await?;
        pb.inc(size);

        return Ok(UploadOutcome {
            session_token,
            filename,
            size,
        });
    }

    let session_token = match session {
        Some(token) => token.clone(),
        None => api.create_session(&filename, Bytes::new()).await?,
    };

    // An empty file still needs one (empty) chunk to be merged.
    let mut chunks = plan_chunks(size, config.chunk_size)?;
    if chunks.is_empty() {
        chunks.push(ChunkSpec {
            index: 1,
            offset: 0,
            len: 0,
        });
    }
    let total_chunks = chunks.len() as u32;

    stream::iter(chunks)
        .map(|chunk| {
            let session_token = &session_token;
            let filename = &filename;
            async move {
                let data = read_chunk(path, &chunk).await?;
                upload_chunk_with_retry(
                    api,
                    session_token,
                    filename,
                    chunk.index,
                    total_chunks,
                    data,
                    config.max_retries,
                )
                .await?;
                pb.inc(chunk.len);
                Ok::<(), anyhow::Error>(())
            }
        })
        .buffer_unordered(config.jobs.max(1))
        .try_collect::<()>()
        .await?;

    let response = api
        .finalize_upload(&FinalizeUploadRequest {
            session_token: session_token.clone(),
            filename: filename.clone(),
            total_chunks,
        })
        .await?;

    if response.size != size {
        return Err(anyhow!(
            "Server assembled {} bytes of {}, expected {}",
            response.size,
            filename,
            size
        ));
    }

    Ok(UploadOutcome {
        session_token,
        filename,
        size,
    })
}

/// Reads one chunk of a file.
pub async fn read_chunk(path: &Path, chunk: &ChunkSpec) -> Result<Bytes> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(chunk.offset)).await?;

    let mut data = Vec::with_capacity(chunk.len as usize);
    file.take(chunk.len).read_to_end(&mut data).await?;

    if data.len() as u64 != chunk.len {
        return Err(anyhow!(
            "{} changed while uploading: chunk {} is short",
            path.display(),
            chunk.index
        ));
    }

    Ok(Bytes::from(data))
}

/// Uploads a single chunk with retry logic.
async fn upload_chunk_with_retry(
    api: &ApiClient,
    session_token: &SessionToken,
    filename: &FileName,
    chunk_index: u32,
    total_chunks: u32,
    data: Bytes,
    max_retries: u32,
) -> Result<()> {
    let mut attempt = 0;

    loop {
        match api
            .upload_chunk(
                session_token,
                filename,
                chunk_index,
                total_chunks,
                data.clone(),
            )
            .await
        {
            Ok(_) => return Ok(()),
            Err(_e) if attempt < max_retries => {
                attempt += 1;
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
            Err(e) => {
                return Err(e.context(format!("Failed to upload chunk {} of {}", chunk_index, filename)))
            }
        }
    }
}

/// Creates a progress bar for a file.
pub fn make_progress_bar(mp: &MultiProgress, name: &str) -> Result<ProgressBar> {
    let pb = mp.add(ProgressBar::new(0));
    let template = format!(
        "{{spinner}} {: <20.20} {{bar:40.green/blue}} {{human_bytes:10}} ({{average_speed}})",
        name,
    );
    let style = ProgressStyle::with_template(&template)?
        .tick_chars("🕛🕐🕑🕒🕓🕔🕕🕖🕗🕘🕙🕚✅")
        .progress_chars("██ ")
        .with_key("human_bytes", |state: &ProgressState, w: &mut dyn Write| {
            let _ = write!(w, "{}", HumanBytes(state.pos()));
        })
        .with_key(
            "average_speed",
            |state: &ProgressState, w: &mut dyn Write| match (state.pos(), state.elapsed()) {
                (pos, elapsed) if elapsed > Duration::ZERO => {
                    let bytes_per_sec = pos as f64 / elapsed.as_secs_f64();
                    let _ = write!(w, "{}/s", HumanBytes(bytes_per_sec as u64));
                }
                _ => {
                    let _ = write!(w, "-");
                }
            },
        );
    pb.set_style(style);

    Ok(pb)
}
