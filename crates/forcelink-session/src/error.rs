//! Error types for the session crate.
//!
//! Every operation surfaces failures through [`SessionError`]. Upstream
//! errors keep the structured body the REST API sent ([`ApiError`]) so callers
//! can branch on the error code without parsing strings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Upstream error code that marks an expired or revoked access credential.
pub const EXPIRED_SESSION_CODE: &str = "INVALID_SESSION_ID";

/// A structured error returned by the REST API or the OAuth token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Machine-readable code, e.g. `MALFORMED_QUERY` or `invalid_grant`.
    pub error_code: String,

    /// Human-readable message from the server.
    #[serde(default)]
    pub message: String,

    /// Fields the error refers to, when the API reports them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,

    /// HTTP status of the response that carried the error.
    #[serde(skip)]
    pub status: u16,
}

/// The two error shapes we accept: the REST array envelope and the OAuth
/// token endpoint's `{error, error_description}` object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorEnvelope {
    Rest(Vec<ApiError>),
    OAuth {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    },
}

impl ApiError {
    /// Whether this is the expired-session error that triggers a refresh.
    pub fn is_expired_session(&self) -> bool {
        self.error_code == EXPIRED_SESSION_CODE
    }

    /// Parse a non-2xx response body into a structured error.
    ///
    /// Only the first element of the REST envelope is kept.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MalformedResponse`] when the body matches
    /// neither envelope.
    pub fn from_body(status: u16, body: &[u8]) -> Result<Self> {
        let envelope: ErrorEnvelope =
            serde_json::from_slice(body).map_err(|e| SessionError::MalformedResponse {
                status,
                reason: format!("unrecognised error body: {e}"),
            })?;

        let mut error = match envelope {
            ErrorEnvelope::Rest(errors) => errors.into_iter().next().ok_or_else(|| {
                SessionError::MalformedResponse {
                    status,
                    reason: "empty error envelope".to_string(),
                }
            })?,
            ErrorEnvelope::OAuth {
                error,
                error_description,
            } => ApiError {
                message: error_description.unwrap_or_default(),
                error_code: error,
                fields: Vec::new(),
                status: 0,
            },
        };
        error.status = status;
        Ok(error)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{} (HTTP {})", self.error_code, self.status)
        } else {
            write!(f, "{}: {} (HTTP {})", self.error_code, self.message, self.status)
        }
    }
}

/// Unified error type for the session manager and dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A request was attempted before any credential was available.
    #[error("there is no session id on this client, please login first")]
    NoSessionId,

    /// A refresh was attempted but the session carries no refresh token.
    #[error("there is no refresh token on this client to refresh with")]
    NoRefreshToken,

    /// The session was refreshed once and the retried call still came back
    /// expired.
    #[error("session expired after refresh: {0}")]
    ExpiredSession(ApiError),

    /// Any other structured error from the REST API or the token endpoint.
    #[error("{0}")]
    Api(ApiError),

    /// The HTTP call itself failed (connect, TLS, timeout, body read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered but the body could not be understood.
    #[error("malformed response (HTTP {status}): {reason}")]
    MalformedResponse {
        /// HTTP status of the offending response.
        status: u16,
        /// What could not be parsed.
        reason: String,
    },

    /// The identity provider redirected back with an error instead of a
    /// token, e.g. `access_denied`.
    #[error("login failed: {error}: {description}")]
    LoginFailed {
        /// OAuth error code from the redirect fragment.
        error: String,
        /// Provider-supplied description (may be empty).
        description: String,
    },

    /// A configured login timeout elapsed before the redirect arrived.
    #[error("login timed out after {timeout_secs} seconds")]
    LoginTimeout {
        /// How long we waited.
        timeout_secs: u64,
    },

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// JSON serialization of a request payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// I/O error (reading a configuration file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// The string code for this error.
    ///
    /// Upstream errors report their own code verbatim. Local failures use
    /// codes in the same `UPPER_SNAKE` style.
    pub fn error_code(&self) -> &str {
        match self {
            Self::NoSessionId => "NO_SESSION_ID",
            Self::NoRefreshToken => "NO_REFRESH_TOKEN",
            Self::ExpiredSession(e) | Self::Api(e) => &e.error_code,
            Self::Transport(_) | Self::MalformedResponse { .. } => "TRANSPORT_ERROR",
            Self::LoginFailed { .. } => "LOGIN_FAILED",
            Self::LoginTimeout { .. } => "LOGIN_TIMEOUT",
            Self::InvalidConfig { .. } | Self::ConfigParse(_) => "INVALID_CONFIG",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::UrlParse(_) => "INVALID_URL",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// The structured upstream error, if this failure carries one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::ExpiredSession(e) | Self::Api(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the failure happened below the API layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::MalformedResponse { .. })
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SessionError>;
