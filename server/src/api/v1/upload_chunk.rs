use axum::{
    body::Body,
    extract::{Extension, Json},
    http::HeaderMap,
};
use tracing::instrument;

use super::{body_reader, parse_header};
use crate::error::ServerResult;
use crate::State;
use csvgate::api::v1::upload_chunk::{
    FinalizeUploadRequest, FinalizeUploadResponse, UploadChunkResponse, CSVGATE_CHUNK_INDEX,
    CSVGATE_CHUNK_TOTAL, CSVGATE_SESSION_TOKEN,
};
use csvgate::api::v1::upload_session::CSVGATE_FILENAME;
use csvgate::session::{FileName, SessionToken};

/// Uploads a single chunk.
///
/// The session, file and chunk position are provided via headers.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn upload_chunk(
    Extension(state): Extension<State>,
    headers: HeaderMap,
    body: Body,
) -> ServerResult<Json<UploadChunkResponse>> {
    let session_token: SessionToken = parse_header(&headers, CSVGATE_SESSION_TOKEN)?;
    let filename: FileName = parse_header(&headers, CSVGATE_FILENAME)?;
    let chunk_index: u32 = parse_header(&headers, CSVGATE_CHUNK_INDEX)?;
    let total_chunks: u32 = parse_header(&headers, CSVGATE_CHUNK_TOTAL)?;

    let bytes = state
        .sessions
        .write_chunk(
            &session_token,
            &filename,
            chunk_index,
            total_chunks,
            body_reader(body),
        )
        .await?;

    Ok(Json(UploadChunkResponse {
        chunk_index,
        total_chunks,
        bytes,
    }))
}

/// Merges the chunks of a file into the session directory.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn finalize_upload(
    Extension(state): Extension<State>,
    Json(payload): Json<FinalizeUploadRequest>,
) -> ServerResult<Json<FinalizeUploadResponse>> {
    let size = state
        .sessions
        .finalize_session(
            &payload.session_token,
            &payload.filename,
            payload.total_chunks,
        )
        .await?;

    Ok(Json(FinalizeUploadResponse {
        filename: payload.filename,
        size,
    }))
}
