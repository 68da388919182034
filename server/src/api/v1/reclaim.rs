use axum::extract::{Extension, Json};
use tracing::instrument;

use crate::error::ServerResult;
use crate::State;
use csvgate::api::v1::reclaim::ReclaimResponse;

/// Runs a reclamation cycle now.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn reclaim(
    Extension(state): Extension<State>,
) -> ServerResult<Json<ReclaimResponse>> {
    let report = state.reclaimer.clone().spawn_cycle().await?;
    Ok(Json(report))
}
