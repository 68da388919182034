mod group_files;
mod load_tables;
mod reclaim;
mod upload_chunk;
mod upload_session;

use std::io;
use std::str::FromStr;

use anyhow::anyhow;
use axum::{
    body::Body,
    http::HeaderMap,
    routing::{get, post, put},
    Router,
};
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::error::{ServerError, ServerResult};

pub(crate) fn get_router() -> Router {
    Router::new()
        .route(
            "/_api/v1/upload-session",
            post(upload_session::create_session),
        )
        .route("/_api/v1/upload-chunk", put(upload_chunk::upload_chunk))
        .route(
            "/_api/v1/finalize-upload",
            post(upload_chunk::finalize_upload),
        )
        .route(
            "/_api/v1/group-files/:session_token",
            get(group_files::group_files),
        )
        .route("/_api/v1/load-tables", post(load_tables::load_tables))
        .route("/_api/v1/reclaim", post(reclaim::reclaim))
}

/// Turns a request body into a reader.
fn body_reader(body: Body) -> impl AsyncRead + Unpin + Send {
    let stream = body.into_data_stream();
    StreamReader::new(
        stream.map(|r| r.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))),
    )
}

/// Parses a required request header.
fn parse_header<T>(headers: &HeaderMap, name: &str) -> ServerResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = headers
        .get(name)
        .ok_or_else(|| ServerError::request_error(anyhow!("Missing {} header", name)))?
        .to_str()
        .map_err(|_| ServerError::request_error(anyhow!("Invalid {} header", name)))?;

    value
        .parse()
        .map_err(|e| ServerError::request_error(anyhow!("Invalid {} header: {}", name, e)))
}
