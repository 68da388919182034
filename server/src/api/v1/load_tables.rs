use anyhow::anyhow;
use axum::extract::{Extension, Json};
use tracing::instrument;

use crate::error::{ServerError, ServerResult};
use crate::provision;
use crate::State;
use csvgate::api::v1::load_tables::{LoadTablesRequest, LoadTablesResponse};

/// Creates a table per group and loads the group's files into it.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn load_tables(
    Extension(state): Extension<State>,
    Json(payload): Json<LoadTablesRequest>,
) -> ServerResult<Json<LoadTablesResponse>> {
    let provisioner = state.provisioner.as_ref().ok_or_else(|| {
        ServerError::request_error(anyhow!("Table provisioning is not configured"))
    })?;

    let response = provision::load_tables(
        &state.directories,
        provisioner,
        &state.log_store,
        &payload.session_token,
        &payload.groups,
    )
    .await?;

    Ok(Json(response))
}
