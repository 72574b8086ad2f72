//! # HTTP Adapters
//!
//! Thin axum glue around [`crate::storage::Storage`]: multipart uploads are
//! materialized to disk ([`upload`]), turned into storage items
//! ([`incoming`]), stored objects are relayed back ([`response`]) and
//! failures are rendered by their kind.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use filestream::{
//!     config::UploadConfig,
//!     controller,
//!     storage::{drivers::local, Storage, UnpipeOptions},
//! };
//!
//! let storage = Storage::new(local::new("uploads")).with_unpipe(UnpipeOptions::unlink("path"));
//! let router: axum::Router = controller::routes(Arc::new(storage), UploadConfig::default());
//! ```
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::{Error, ErrorKind};

pub mod incoming;
pub mod response;
mod routes;
pub mod upload;

pub use routes::routes;

#[derive(Debug, Serialize)]
/// Structure representing details about an error.
pub struct ErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ErrorDetail {
    /// Create a new `ErrorDetail` with the specified error and description.
    #[must_use]
    pub fn new<T: Into<String>>(error: T, description: T) -> Self {
        Self {
            error: Some(error.into()),
            description: Some(description.into()),
        }
    }
}

impl IntoResponse for Error {
    /// Convert an `Error` into an HTTP response.
    fn into_response(self) -> Response {
        let kind = self.kind();
        match kind {
            ErrorKind::Generic => tracing::error!(
                error.msg = %self,
                error.details = ?self,
                "controller_error"
            ),
            _ => tracing::debug!(error.msg = %self, "controller_error"),
        }

        match kind {
            ErrorKind::NotFound => json_error_response(
                StatusCode::NOT_FOUND,
                ErrorDetail::new("not_found", &self.to_string()),
            ),
            ErrorKind::Validation => json_error_response(
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("bad_request", &self.to_string()),
            ),
            ErrorKind::Generic => json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("internal_server_error", "Internal Server Error"),
            ),
        }
    }
}

/// Create a JSON error response with the specified status code and error
/// detail.
fn json_error_response(status_code: StatusCode, detail: ErrorDetail) -> Response {
    (status_code, Json(detail)).into_response()
}
