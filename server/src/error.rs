//! Error handling.

use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use displaydoc::Display;
use serde::Serialize;

use csvgate::error::CsvgateError;

pub type ServerResult<T> = Result<T, ServerError>;

/// An error.
#[derive(Debug)]
pub struct ServerError {
    kind: ErrorKind,
}

/// The kind of an error.
#[derive(Debug, Display)]
pub enum ErrorKind {
    // Generic responses
    /// The URL you requested was not found.
    NotFound,

    /// Unauthorized.
    Unauthorized,

    /// The requested session does not exist.
    NoSuchSession,

    /// Chunk {0} is missing.
    MissingChunkError(u32),

    /// No files found: {0}
    NoFilesFoundError(String),

    /// Invalid request: {0}
    RequestError(AnyError),

    /// Invalid configuration: {0}
    ConfigurationError(AnyError),

    /// Storage error: {0}
    StorageError(AnyError),

    /// Log store error: {0}
    LogStoreError(AnyError),

    /// Table provisioning error: {0}
    ProvisioningError(AnyError),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    error: String,
    message: String,
}

impl ServerError {
    pub fn storage_error(error: impl Into<AnyError>) -> Self {
        ErrorKind::StorageError(error.into()).into()
    }

    pub fn log_store_error(error: impl Into<AnyError>) -> Self {
        ErrorKind::LogStoreError(error.into()).into()
    }

    pub fn database_error(error: sea_orm::DbErr) -> Self {
        ErrorKind::LogStoreError(AnyError::new(error)).into()
    }

    pub fn request_error(error: impl Into<AnyError>) -> Self {
        ErrorKind::RequestError(error.into()).into()
    }

    pub fn configuration_error(error: impl Into<AnyError>) -> Self {
        ErrorKind::ConfigurationError(error.into()).into()
    }

    pub fn provisioning_error(error: impl Into<AnyError>) -> Self {
        ErrorKind::ProvisioningError(error.into()).into()
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl StdError for ServerError {}

impl From<ErrorKind> for ServerError {
    fn from(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

impl From<CsvgateError> for ServerError {
    fn from(error: CsvgateError) -> Self {
        ErrorKind::RequestError(error.into()).into()
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if self.kind.is_internal() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("{}", self);
        }

        let status = self.kind.http_status_code();
        let body = ErrorResponse {
            code: status.as_u16(),
            error: self.kind.name().to_string(),
            message: self.kind.client_message(),
        };

        (status, Json(body)).into_response()
    }
}

impl ErrorKind {
    fn name(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::Unauthorized => "Unauthorized",
            Self::NoSuchSession => "NoSuchSession",
            Self::MissingChunkError(_) => "MissingChunkError",
            Self::NoFilesFoundError(_) => "NoFilesFoundError",
            Self::RequestError(_) => "RequestError",
            Self::ConfigurationError(_) => "ConfigurationError",
            Self::StorageError(_) => "StorageError",
            Self::LogStoreError(_) => "LogStoreError",
            Self::ProvisioningError(_) => "ProvisioningError",
        }
    }

    /// Returns whether the details of the error stay server-side.
    fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError(_)
                | Self::StorageError(_)
                | Self::LogStoreError(_)
                | Self::ProvisioningError(_)
        )
    }

    fn client_message(&self) -> String {
        if self.is_internal() {
            format!("{} (see server logs)", self.name())
        } else {
            self.to_string()
        }
    }

    pub fn http_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound | Self::NoSuchSession | Self::NoFilesFoundError(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MissingChunkError(_) | Self::RequestError(_) => StatusCode::BAD_REQUEST,
            Self::ConfigurationError(_)
            | Self::StorageError(_)
            | Self::LogStoreError(_)
            | Self::ProvisioningError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::anyhow;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ErrorKind::MissingChunkError(3).http_status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorKind::NoFilesFoundError("x".into()).http_status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ErrorKind::Unauthorized.http_status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorKind::LogStoreError(anyhow!("down")).http_status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let kind = ErrorKind::StorageError(anyhow!("/srv/uploads: permission denied"));
        assert!(!kind.client_message().contains("/srv/uploads"));

        let kind = ErrorKind::MissingChunkError(2);
        assert!(kind.client_message().starts_with("Chunk 2 is missing"));
    }
}
