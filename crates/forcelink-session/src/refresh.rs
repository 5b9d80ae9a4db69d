//! Refresh-token exchange.
//!
//! [`TokenRefresher`] posts the `refresh_token` grant to the OAuth token
//! endpoint and writes the new access token into the shared session. Only the
//! access token (and the session id derived from it) changes; the instance URL
//! and refresh token are left alone.
//!
//! Refreshes are single-flight: concurrent callers queue on one guard, and a
//! caller whose expired session id has already been replaced returns without
//! another network round trip.

use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use crate::dispatch::route_request;
use crate::error::{ApiError, Result, SessionError};
use crate::session::SessionHandle;

/// Successful token endpoint response. Other fields are ignored.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchanges a session's refresh token for a new access token.
#[derive(Debug)]
pub struct TokenRefresher {
    http: reqwest::Client,
    token_url: Url,
    consumer_key: String,
    request_timeout: Option<Duration>,
    in_flight: Mutex<()>,
}

impl TokenRefresher {
    pub fn new(http: reqwest::Client, token_url: Url, consumer_key: impl Into<String>) -> Self {
        Self {
            http,
            token_url,
            consumer_key: consumer_key.into(),
            request_timeout: None,
            in_flight: Mutex::new(()),
        }
    }

    /// Apply a per-request timeout to token endpoint calls.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The token endpoint this refresher posts to.
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Refresh unconditionally.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NoRefreshToken`] if the session has no refresh token;
    ///   no request is made.
    /// - [`SessionError::Api`] with the provider's error if the exchange is
    ///   rejected; the session is not modified.
    pub async fn refresh(&self, session: &SessionHandle) -> Result<()> {
        let _guard = self.in_flight.lock().await;
        self.refresh_locked(session).await
    }

    /// Refresh after a request failed with `stale_session_id`.
    ///
    /// If another caller already replaced that session id while we waited for
    /// the guard, this returns immediately so the caller can retry with the
    /// new credential.
    pub async fn refresh_expired(&self, session: &SessionHandle, stale_session_id: &str) -> Result<()> {
        let _guard = self.in_flight.lock().await;

        if session.session_id().await.as_deref() != Some(stale_session_id) {
            tracing::debug!("session already refreshed by a concurrent request");
            return Ok(());
        }
        self.refresh_locked(session).await
    }

    async fn refresh_locked(&self, session: &SessionHandle) -> Result<()> {
        let snapshot = session.snapshot().await;
        let refresh_token = snapshot
            .refresh_token()
            .ok_or(SessionError::NoRefreshToken)?;

        tracing::debug!(
            token_url = %self.token_url,
            proxied = snapshot.proxy_url().is_some(),
            "refreshing access token"
        );

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.consumer_key.as_str()),
            ("refresh_token", refresh_token),
        ];
        let mut request = route_request(
            &self.http,
            Method::POST,
            self.token_url.as_str(),
            snapshot.proxy_url(),
            None,
        )
        .form(&form);
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let error = ApiError::from_body(status.as_u16(), &body)?;
            tracing::warn!(
                status = status.as_u16(),
                error_code = %error.error_code,
                "token refresh rejected"
            );
            return Err(SessionError::Api(error));
        }

        let token: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| SessionError::MalformedResponse {
                status: status.as_u16(),
                reason: format!("token response: {e}"),
            })?;

        let mut current = session.write().await;
        if current.refresh_token() != Some(refresh_token) {
            tracing::info!("session replaced during refresh, discarding new access token");
            return Ok(());
        }
        current.set_access_token(token.access_token);
        tracing::info!("access token refreshed");
        Ok(())
    }
}
