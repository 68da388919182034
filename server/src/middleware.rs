use axum::{
    extract::{Extension, Request},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

use crate::error::{ErrorKind, ServerResult};
use crate::State;

/// Rejects requests without the configured bearer token.
///
/// Tokens are compared by their SHA-256 digests so the comparison does not
/// depend on how much of the token matches.
pub async fn require_api_token(
    Extension(state): Extension<State>,
    req: Request,
    next: Next,
) -> ServerResult<Response> {
    let authorized = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .is_some_and(|token| token_matches(token, &state.config.api_token));

    if !authorized {
        tracing::debug!(uri = %req.uri(), "Rejected unauthenticated request");
        return Err(ErrorKind::Unauthorized.into());
    }

    Ok(next.run(req).await)
}

/// Extracts the credentials of a `Bearer` authorization header.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}

fn token_matches(provided: &str, expected: &str) -> bool {
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}
