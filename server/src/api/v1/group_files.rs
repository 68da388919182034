use axum::extract::{Extension, Json, Path};
use tracing::instrument;

use crate::error::ServerResult;
use crate::State;
use csvgate::api::v1::group_files::GroupFilesResponse;
use csvgate::session::SessionToken;

/// Groups the files of a session by header row.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn group_files(
    Extension(state): Extension<State>,
    Path(session_token): Path<String>,
) -> ServerResult<Json<GroupFilesResponse>> {
    let token = SessionToken::new(session_token)?;
    let response = state.grouping.group_files(&token).await?;

    Ok(Json(response))
}
