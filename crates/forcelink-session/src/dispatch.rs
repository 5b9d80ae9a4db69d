//! Request dispatch with one retry on session expiry.
//!
//! Every REST call goes through [`Dispatcher::send`]. A call that comes back
//! with `INVALID_SESSION_ID` triggers one refresh and is re-issued once; a
//! second expiry is returned as [`SessionError::ExpiredSession`].
//!
//! When the session has a relay configured, requests go to the relay with the
//! real target in [`PROXY_ENDPOINT_HEADER`] and the credential in
//! [`PROXY_AUTHORIZATION_HEADER`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ApiError, Result, SessionError};
use crate::refresh::TokenRefresher;
use crate::session::SessionHandle;
use crate::usage::{LIMIT_INFO_HEADER, UsageTracker};

/// Header carrying the real target URL when a request goes through a relay.
pub const PROXY_ENDPOINT_HEADER: &str = "SalesforceProxy-Endpoint";

/// Header carrying the bearer credential when a request goes through a relay.
pub const PROXY_AUTHORIZATION_HEADER: &str = "X-Authorization";

/// Path prefix every request path is relative to.
pub const DATA_ROOT: &str = "/services/data/";

/// Build a request to `target`, or to `proxy_url` with `target` in the
/// endpoint header.
pub(crate) fn route_request(
    http: &reqwest::Client,
    method: Method,
    target: &str,
    proxy_url: Option<&str>,
    bearer: Option<&str>,
) -> reqwest::RequestBuilder {
    match proxy_url {
        Some(proxy) => {
            let request = http
                .request(method, proxy)
                .header(PROXY_ENDPOINT_HEADER, target);
            match bearer {
                Some(token) => request.header(PROXY_AUTHORIZATION_HEADER, format!("Bearer {token}")),
                None => request,
            }
        }
        None => {
            let request = http.request(method, target);
            match bearer {
                Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
                None => request,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// How to treat a successful response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    /// Parse as JSON; an empty body becomes `null`.
    #[default]
    Json,
    /// Return status, headers, and bytes untouched (attachments, blobs).
    Raw,
}

/// A REST call relative to `/services/data/`.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    payload: Option<Value>,
    response_type: ResponseType,
    headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            payload: None,
            response_type: ResponseType::Json,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::POST, path).with_payload(payload)
    }

    pub fn patch(path: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::PATCH, path).with_payload(payload)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Ask for the response unparsed.
    pub fn raw(mut self) -> Self {
        self.response_type = ResponseType::Raw;
        self
    }

    /// Add an extra request header, e.g. `Sforce-Query-Options`.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }
}

/// An unparsed successful response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    /// The body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A successful response.
#[derive(Debug, Clone)]
pub enum ApiResponse {
    Json(Value),
    Raw(RawResponse),
}

impl ApiResponse {
    /// The JSON body, if this was a JSON request.
    pub fn json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// The body as JSON. Raw bodies are parsed on demand.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MalformedResponse`] if a raw body is not JSON.
    pub fn into_json(self) -> Result<Value> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Raw(raw) => parse_json_body(raw.status, &raw.body),
        }
    }

    /// Deserialize the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MalformedResponse`] if the body does not match `T`.
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.into_json()?;
        serde_json::from_value(value).map_err(|e| SessionError::MalformedResponse {
            status: 200,
            reason: format!("unexpected response shape: {e}"),
        })
    }

    pub fn into_raw(self) -> Option<RawResponse> {
        match self {
            Self::Raw(raw) => Some(raw),
            Self::Json(_) => None,
        }
    }
}

fn parse_json_body(status: u16, body: &[u8]) -> Result<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| SessionError::MalformedResponse {
        status,
        reason: format!("invalid JSON body: {e}"),
    })
}

/// Outcome of a single attempt, before the retry policy is applied.
enum Attempt {
    Done(ApiResponse),
    /// The server rejected `session_id` as expired.
    SessionExpired { error: ApiError, session_id: String },
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Sends [`ApiRequest`]s bound to a shared session.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    http: reqwest::Client,
    session: SessionHandle,
    usage: Arc<UsageTracker>,
    refresher: Arc<TokenRefresher>,
    request_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        http: reqwest::Client,
        session: SessionHandle,
        usage: Arc<UsageTracker>,
        refresher: Arc<TokenRefresher>,
    ) -> Self {
        Self {
            http,
            session,
            usage,
            refresher,
            request_timeout: None,
        }
    }

    /// Apply a per-request timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Send `request`, refreshing and retrying once if the session expired.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NoSessionId`] before any network call if there is no
    ///   credential.
    /// - The refresher's error if the refresh fails.
    /// - [`SessionError::ExpiredSession`] if the retry also expires.
    /// - [`SessionError::Api`] for any other upstream error.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let (error, stale) = match self.attempt(request, false).await? {
            Attempt::Done(response) => return Ok(response),
            Attempt::SessionExpired { error, session_id } => (error, session_id),
        };

        tracing::info!(
            method = %request.method,
            path = %request.path,
            status = error.status,
            "session expired, refreshing before retry"
        );
        self.refresher.refresh_expired(&self.session, &stale).await?;

        match self.attempt(request, true).await? {
            Attempt::Done(response) => Ok(response),
            Attempt::SessionExpired { error, .. } => {
                tracing::warn!(path = %request.path, "session still expired after refresh");
                Err(SessionError::ExpiredSession(error))
            }
        }
    }

    async fn attempt(&self, request: &ApiRequest, retried: bool) -> Result<Attempt> {
        let session = self.session.snapshot().await;
        let (Some(session_id), Some(instance_url)) = (session.session_id(), session.instance_url())
        else {
            return Err(SessionError::NoSessionId);
        };

        let target = format!(
            "{}{DATA_ROOT}{}",
            instance_url.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );

        tracing::debug!(
            method = %request.method,
            url = %target,
            proxied = session.proxy_url().is_some(),
            retried,
            "dispatching request"
        );

        let mut builder = route_request(
            &self.http,
            request.method.clone(),
            &target,
            session.proxy_url(),
            Some(session_id),
        )
        .header(CONTENT_TYPE, "application/json");

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref payload) = request.payload {
            builder = builder.body(serde_json::to_vec(payload)?);
        }
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if status.is_success() {
            self.usage.record(
                headers
                    .get(LIMIT_INFO_HEADER)
                    .and_then(|v| v.to_str().ok()),
            );
            let response = match request.response_type {
                ResponseType::Json => ApiResponse::Json(parse_json_body(status.as_u16(), &body)?),
                ResponseType::Raw => ApiResponse::Raw(RawResponse {
                    status: status.as_u16(),
                    headers,
                    body,
                }),
            };
            return Ok(Attempt::Done(response));
        }

        let error = ApiError::from_body(status.as_u16(), &body)?;
        if error.is_expired_session() {
            return Ok(Attempt::SessionExpired {
                error,
                session_id: session_id.to_string(),
            });
        }

        tracing::debug!(
            status = status.as_u16(),
            error_code = %error.error_code,
            "request failed"
        );
        Err(SessionError::Api(error))
    }
}
