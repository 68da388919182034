//! HTTP API.

mod v1;

use axum::{http::Uri, Router};

use crate::error::{ErrorKind, ServerResult};

async fn fallback(_: Uri) -> ServerResult<()> {
    Err(ErrorKind::NotFound.into())
}

pub(crate) fn get_router() -> Router {
    Router::new().merge(v1::get_router()).fallback(fallback)
}
