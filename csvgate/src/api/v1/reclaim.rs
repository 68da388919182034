use serde::{Deserialize, Serialize};

use crate::session::SessionToken;

/// Result of a reclamation cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReclaimResponse {
    /// Sessions whose directory was removed.
    pub deleted: Vec<SessionToken>,

    /// Sessions whose directory was already gone.
    pub already_absent: Vec<SessionToken>,

    /// Sessions that could not be reclaimed and will be retried.
    pub failed: Vec<ReclaimFailure>,

    /// Set when the stale session query itself failed.
    pub query_failed: Option<String>,
}

/// A session that could not be reclaimed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimFailure {
    /// The token as returned by the log store.
    pub session_token: String,
    pub error: String,
}
