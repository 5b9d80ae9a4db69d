//! Relay error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors produced while relaying a request.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The request carried no `SalesforceProxy-Endpoint` header.
    #[error("ERROR: SALESFORCEPROXY-ENDPOINT NOT SPECIFIED")]
    MissingEndpoint,

    /// The endpoint header is not an absolute http(s) URL.
    #[error("ERROR: invalid SALESFORCEPROXY-ENDPOINT: {reason}")]
    InvalidEndpoint { reason: String },

    /// The endpoint host is outside the allow-list.
    #[error("ERROR: host `{host}` is not allowed")]
    ForbiddenHost { host: String },

    /// The request body could not be read.
    #[error("ERROR: could not read request body: {reason}")]
    Body { reason: String },

    /// The request body exceeds `max_body_bytes`.
    #[error("ERROR: request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The upstream response body exceeds `max_response_bytes`.
    #[error("relay error: upstream response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    /// The upstream call failed.
    #[error("relay error: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Configuration is invalid.
    #[error("invalid relay configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Binding or serving failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// HTTP status the relay answers with for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingEndpoint | Self::InvalidEndpoint { .. } | Self::Body { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::ForbiddenHost { .. } => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ResponseTooLarge { .. } => StatusCode::BAD_GATEWAY,
            Self::Upstream(_) | Self::InvalidConfig { .. } | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "relay request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "relay request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, RelayError>;
