use serde::{Deserialize, Serialize};

use crate::session::{FileName, SessionToken};

/// Header containing the session token.
pub const CSVGATE_SESSION_TOKEN: &str = "X-Csvgate-Session-Token";

/// Header containing the 1-based index of the chunk.
pub const CSVGATE_CHUNK_INDEX: &str = "X-Csvgate-Chunk-Index";

/// Header containing the total number of chunks of the file.
pub const CSVGATE_CHUNK_TOTAL: &str = "X-Csvgate-Chunk-Total";

/// Response from uploading a chunk.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadChunkResponse {
    /// The index of the chunk that was stored.
    pub chunk_index: u32,

    /// The total number of chunks announced by the client.
    pub total_chunks: u32,

    /// The number of bytes written.
    pub bytes: u64,
}

/// Request to merge the chunks of a file.
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeUploadRequest {
    /// The session the chunks were uploaded to.
    pub session_token: SessionToken,

    /// The file to assemble.
    pub filename: FileName,

    /// The number of chunks making up the file.
    ///
    /// Chunks `1..=total_chunks` must all be present.
    pub total_chunks: u32,
}

/// Response from finalizing an upload.
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeUploadResponse {
    /// The file that was assembled.
    pub filename: FileName,

    /// The size of the assembled file.
    pub size: u64,
}
