use axum::{
    body::Body,
    extract::{Extension, Json},
    http::HeaderMap,
};
use tracing::instrument;

use super::{body_reader, parse_header};
use crate::error::ServerResult;
use crate::State;
use csvgate::api::v1::upload_session::{CreateSessionResponse, CSVGATE_FILENAME};
use csvgate::session::FileName;

/// Creates an upload session.
///
/// The body is stored as the file named by the filename header. It may be
/// empty when the file is going to be uploaded in chunks.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn create_session(
    Extension(state): Extension<State>,
    headers: HeaderMap,
    body: Body,
) -> ServerResult<Json<CreateSessionResponse>> {
    let filename: FileName = parse_header(&headers, CSVGATE_FILENAME)?;

    let session_token = state
        .sessions
        .create_session(&filename, body_reader(body))
        .await?;

    Ok(Json(CreateSessionResponse { session_token }))
}
