//! Error types surfaced to callers of the API client

use booking_auth::truncate_body;
use reqwest::StatusCode;

use crate::session::SessionErrorKind;

/// Errors from authenticated requests.
///
/// Only `AuthExpired` is ever handled inside this crate (once, by the refresh
/// coordinator). Everything else reaches the caller with the original status
/// and body.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("unauthorized - session expired: {body}")]
    AuthExpired { body: String },

    #[error("validation failed ({status}): {body}")]
    Validation { status: u16, body: String },

    #[error("request failed ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("credential store error: {0}")]
    Storage(String),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classify a non-2xx response.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body = truncate_body(body);
        match status.as_u16() {
            401 => Error::AuthExpired { body },
            400 | 422 => Error::Validation {
                status: status.as_u16(),
                body,
            },
            code => Error::Status { status: code, body },
        }
    }

    /// Kind recorded on the session when this error ends it.
    pub fn kind(&self) -> SessionErrorKind {
        match self {
            Error::AuthExpired { .. } => SessionErrorKind::AuthExpired,
            Error::Network(_) => SessionErrorKind::Network,
            Error::Storage(_) => SessionErrorKind::Storage,
            Error::Validation { .. } | Error::Status { .. } | Error::InvalidResponse(_) => {
                SessionErrorKind::InvalidResponse
            }
        }
    }
}

impl From<booking_auth::Error> for Error {
    fn from(err: booking_auth::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
