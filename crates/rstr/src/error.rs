//! HTTP error responses.
//!
//! Every failure leaves the server as `{"error": <kind>, "message": <text>}`.
//! Storage faults are logged here and reported with a generic message, so
//! filesystem paths never reach a client.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use cas::CasError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    /// Blob size to report in `Content-Range: bytes */size` on 416.
    unsatisfied_size: Option<u64>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            unsatisfied_size: None,
        }
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "IO", "internal storage error")
    }

    pub fn range_not_satisfiable(size: u64) -> Self {
        Self {
            unsatisfied_size: Some(size),
            ..Self::new(
                StatusCode::RANGE_NOT_SATISFIABLE,
                "RangeNotSatisfiable",
                format!("requested range is outside the blob ({} bytes)", size),
            )
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl From<CasError> for ApiError {
    fn from(err: CasError) -> Self {
        if !err.is_client_error() {
            tracing::error!(error = %err, "storage failure");
            return Self::internal();
        }
        tracing::debug!(error = %err, "request rejected");

        match err {
            CasError::NotFound(hash) => Self::new(
                StatusCode::NOT_FOUND,
                "BlobNotFound",
                format!("blob {} not found", hash),
            ),
            CasError::MalformedDigest(e) => {
                Self::new(StatusCode::BAD_REQUEST, "InvalidReference", e.to_string())
            }
            e @ CasError::DigestMismatch { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "DigestMismatch", e.to_string())
            }
            CasError::RangeNotSatisfiable { size, .. } => Self::range_not_satisfiable(size),
            e @ CasError::ReadOnly => Self::new(StatusCode::FORBIDDEN, "ReadOnly", e.to_string()),
            CasError::InvalidConfig(_) | CasError::Io { .. } => Self::internal(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind,
            message: &self.message,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(size) = self.unsatisfied_size {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}
