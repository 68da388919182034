//! Error handling.

use std::error::Error as StdError;

use displaydoc::Display;

pub type CsvgateResult<T> = Result<T, CsvgateError>;

/// An error.
#[derive(Debug, Display)]
pub enum CsvgateError {
    /// Invalid session token "{token}": {reason}
    InvalidSessionToken { token: String, reason: &'static str },

    /// Invalid file name "{name}": {reason}
    InvalidFileName { name: String, reason: &'static str },
}

impl StdError for CsvgateError {}
