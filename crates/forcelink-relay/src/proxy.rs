//! The relay handler.
//!
//! Request headers are forwarded from a fixed list and response headers are
//! filtered through a fixed allow-list. Nothing else crosses the relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use url::Url;

use crate::RelayConfig;
use crate::error::{RelayError, Result};

/// Header carrying the real target URL.
pub const ENDPOINT_HEADER: &str = "salesforceproxy-endpoint";

/// Header carrying the bearer credential, replayed as `Authorization`.
pub const AUTHORIZATION_HEADER: &str = "x-authorization";

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Request headers replayed upstream under the same name.
const FORWARDED_HEADERS: &[&str] = &[
    "content-type",
    "soapaction",
    "sforce-query-options",
    "user-agent",
    "x-user-agent",
];

/// Response headers returned to the caller.
const RETURNED_HEADERS: &[&str] = &[
    "content-type",
    "content-language",
    "set-cookie",
    "sforce-limit-info",
];

/// Shared state for the relay handler.
#[derive(Debug, Clone)]
pub struct RelayState {
    pub(crate) http: reqwest::Client,
    pub(crate) config: RelayConfig,
}

impl RelayState {
    /// Build the upstream client for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Upstream`] if the HTTP client cannot be built.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            http: builder.build()?,
            config,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

/// Relay any request to the URL in its endpoint header.
pub async fn relay(State(state): State<Arc<RelayState>>, request: Request) -> Response {
    match forward(&state, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn forward(state: &RelayState, request: Request) -> Result<Response> {
    if request.method() == Method::OPTIONS {
        return Ok(StatusCode::OK.into_response());
    }

    let endpoint = target(state, request.headers())?;
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    let (parts, body) = request.into_parts();
    let limit = state.config.max_body_bytes;
    if declared_length(&parts.headers).is_some_and(|len| len > limit as u64) {
        return Err(RelayError::PayloadTooLarge { limit });
    }
    let body = collect_limited(body.into_data_stream(), limit)
        .await
        .map_err(|e| RelayError::Body {
            reason: e.to_string(),
        })?
        .ok_or(RelayError::PayloadTooLarge { limit })?;

    tracing::debug!(
        method = %parts.method,
        host = endpoint.host_str().unwrap_or_default(),
        path = endpoint.path(),
        "relaying request"
    );

    let mut upstream = state
        .http
        .request(parts.method.clone(), endpoint)
        .headers(upstream_headers(&parts.headers, peer.as_deref()));
    if !body.is_empty() {
        upstream = upstream.body(body);
    }

    let response = upstream.send().await?;
    let status = response.status();
    let headers = returned_headers(response.headers());
    let limit = state.config.max_response_bytes;
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(RelayError::ResponseTooLarge { limit });
    }
    let body = collect_limited(response.bytes_stream(), limit)
        .await?
        .ok_or(RelayError::ResponseTooLarge { limit })?;

    tracing::debug!(status = status.as_u16(), bytes = body.len(), "upstream responded");

    let mut reply = Response::new(Body::from(body));
    *reply.status_mut() = status;
    reply.headers_mut().extend(headers);
    Ok(reply)
}

/// The request's `Content-Length`, when present and well formed.
fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Collect a body stream, or `None` once it grows past `limit` bytes.
async fn collect_limited<S, E>(stream: S, limit: usize) -> std::result::Result<Option<Vec<u8>>, E>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if collected.len() + chunk.len() > limit {
            return Ok(None);
        }
        collected.extend_from_slice(&chunk);
    }
    Ok(Some(collected))
}

/// Parse and authorise the endpoint header.
fn target(state: &RelayState, headers: &HeaderMap) -> Result<Url> {
    let raw = headers
        .get(ENDPOINT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(RelayError::MissingEndpoint)?;

    let url = Url::parse(raw).map_err(|e| RelayError::InvalidEndpoint {
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RelayError::InvalidEndpoint {
            reason: format!("unsupported scheme `{}`", url.scheme()),
        });
    }
    let host = url.host_str().ok_or_else(|| RelayError::InvalidEndpoint {
        reason: "endpoint has no host".into(),
    })?;
    if !state.config.allows_host(host) {
        return Err(RelayError::ForbiddenHost {
            host: host.to_string(),
        });
    }
    Ok(url)
}

/// Headers to send upstream.
fn upstream_headers(incoming: &HeaderMap, peer: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(auth) = incoming.get(AUTHORIZATION_HEADER) {
        headers.insert(AUTHORIZATION, auth.clone());
    }
    for name in FORWARDED_HEADERS {
        if let Some(value) = incoming.get(*name) {
            headers.insert(HeaderName::from_static(*name), value.clone());
        }
    }

    match (incoming.get(X_FORWARDED_FOR), peer) {
        (Some(value), _) => {
            headers.insert(X_FORWARDED_FOR, value.clone());
        }
        (None, Some(peer)) => {
            if let Ok(value) = peer.parse() {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }
        (None, None) => {}
    }

    headers
}

/// Allow-listed upstream response headers. `Set-Cookie` may repeat.
fn returned_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in RETURNED_HEADERS {
        for value in upstream.get_all(*name) {
            headers.append(HeaderName::from_static(*name), value.clone());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use axum::http::header::{CONTENT_TYPE, SET_COOKIE};

    use super::*;

    fn state(config: RelayConfig) -> RelayState {
        RelayState::new(config).unwrap()
    }

    fn with_endpoint(endpoint: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ENDPOINT_HEADER, HeaderValue::from_str(endpoint).unwrap());
        headers
    }

    #[test]
    fn missing_endpoint() {
        let err = target(&state(RelayConfig::default()), &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, RelayError::MissingEndpoint));
    }

    #[test]
    fn relative_endpoint_is_invalid() {
        let err = target(
            &state(RelayConfig::default()),
            &with_endpoint("/services/data/v35.0/"),
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::InvalidEndpoint { .. }));
    }

    #[test]
    fn non_http_scheme_is_invalid() {
        let err = target(
            &state(RelayConfig::default()),
            &with_endpoint("file:///etc/passwd"),
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::InvalidEndpoint { .. }));
    }

    #[test]
    fn foreign_host_is_forbidden() {
        let err = target(
            &state(RelayConfig::default()),
            &with_endpoint("https://example.org/services/data/"),
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::ForbiddenHost { ref host } if host == "example.org"));
    }

    #[test]
    fn org_host_is_accepted() {
        let url = target(
            &state(RelayConfig::default()),
            &with_endpoint("https://na1.salesforce.com/services/data/v35.0/limits"),
        )
        .unwrap();
        assert_eq!(url.path(), "/services/data/v35.0/limits");
    }

    #[test]
    fn authorization_is_renamed() {
        let mut incoming = HeaderMap::new();
        incoming.insert(AUTHORIZATION_HEADER, HeaderValue::from_static("Bearer abc"));
        incoming.insert("content-type", HeaderValue::from_static("application/json"));
        incoming.insert("cookie", HeaderValue::from_static("sid=leak"));
        incoming.insert("sforce-query-options", HeaderValue::from_static("batchSize=200"));
        incoming.insert("user-agent", HeaderValue::from_static("Mozilla/5.0"));

        let headers = upstream_headers(&incoming, Some("10.0.0.7"));
        assert_eq!(headers[AUTHORIZATION], "Bearer abc");
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["sforce-query-options"], "batchSize=200");
        assert_eq!(headers["user-agent"], "Mozilla/5.0");
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.7");
        assert!(headers.get("cookie").is_none());
        assert!(headers.get(AUTHORIZATION_HEADER).is_none());
    }

    #[test]
    fn existing_forwarded_for_is_kept() {
        let mut incoming = HeaderMap::new();
        incoming.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.9"));
        let headers = upstream_headers(&incoming, Some("10.0.0.7"));
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.9");
    }

    #[test]
    fn response_headers_are_filtered() {
        let mut upstream = HeaderMap::new();
        upstream.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        upstream.insert("sforce-limit-info", HeaderValue::from_static("api-usage=1/100"));
        upstream.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        upstream.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        upstream.insert("x-internal", HeaderValue::from_static("secret"));

        let headers = returned_headers(&upstream);
        assert_eq!(headers["sforce-limit-info"], "api-usage=1/100");
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 2);
        assert!(headers.get("x-internal").is_none());
    }

    #[tokio::test]
    async fn collect_stops_past_limit() {
        let chunks = || {
            futures::stream::iter(vec![
                Ok::<_, std::io::Error>(Bytes::from_static(b"0123")),
                Ok(Bytes::from_static(b"4567")),
            ])
        };
        assert_eq!(
            collect_limited(chunks(), 8).await.unwrap().as_deref(),
            Some(&b"01234567"[..])
        );
        assert!(collect_limited(chunks(), 7).await.unwrap().is_none());
    }

    #[test]
    fn declared_length_parses_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_length(&headers), None);
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        assert_eq!(declared_length(&headers), Some(42));
    }
}
