use serde::{Deserialize, Serialize};

use crate::session::SessionToken;

/// Header containing the name of the file being uploaded.
pub const CSVGATE_FILENAME: &str = "X-Csvgate-Filename";

/// Response from initializing an upload session.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    /// The token of the new session.
    ///
    /// Subsequent chunk uploads and the finalize call must carry it.
    pub session_token: SessionToken,
}
