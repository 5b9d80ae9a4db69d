//! The session record and the shared handle every component works through.
//!
//! A [`Session`] holds the current access token and the instance it is valid
//! for. Its `session_id` is always the decoded access token: every mutator
//! recomputes it, and deserialization rebuilds it rather than trusting stored
//! data.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::extract::{Credentials, percent_decode};

/// Authentication state for one client.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SessionRecord")]
pub struct Session {
    access_token: Option<String>,
    #[serde(skip_serializing)]
    session_id: Option<String>,
    instance_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    issued_at: Option<DateTime<Utc>>,
}

/// On-disk shape of a [`Session`]; `session_id` is derived, not stored.
#[derive(Deserialize)]
struct SessionRecord {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    instance_url: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    proxy_url: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    identity_url: Option<String>,
    #[serde(default)]
    issued_at: Option<DateTime<Utc>>,
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        let mut session = Session {
            instance_url: record.instance_url,
            refresh_token: record.refresh_token,
            proxy_url: record.proxy_url,
            email: record.email,
            identity_url: record.identity_url,
            issued_at: record.issued_at,
            ..Session::default()
        };
        if let Some(token) = record.access_token {
            session.set_access_token(token);
        }
        session
    }
}

impl Session {
    /// An empty, unauthenticated session.
    pub fn new() -> Self {
        Self::default()
    }

    /// A session bootstrapped from an existing access token.
    pub fn from_access_token(
        access_token: impl Into<String>,
        instance_url: impl Into<String>,
    ) -> Self {
        let mut session = Self {
            instance_url: Some(instance_url.into()),
            ..Self::default()
        };
        session.set_access_token(access_token);
        session
    }

    /// Attach a refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Route this session's requests through a relay.
    pub fn with_proxy_url(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    /// Attach the user's email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Build the session produced by a completed login.
    ///
    /// All login fields are set together; `proxy_url` comes from configuration.
    pub fn from_credentials(credentials: Credentials, proxy_url: Option<String>) -> Self {
        Self {
            access_token: Some(credentials.access_token),
            session_id: Some(credentials.session_id),
            instance_url: Some(credentials.instance_url),
            refresh_token: credentials.refresh_token,
            proxy_url,
            email: None,
            identity_url: credentials.identity_url,
            issued_at: credentials.issued_at,
        }
    }

    /// Replace the access token and recompute the session id.
    ///
    /// This is the only in-place mutation a refresh performs.
    pub fn set_access_token(&mut self, access_token: impl Into<String>) {
        let token = access_token.into();
        self.session_id = Some(percent_decode(&token));
        self.access_token = Some(token);
    }

    pub(crate) fn set_email(&mut self, email: Option<String>) {
        self.email = email;
    }

    pub(crate) fn set_proxy_url(&mut self, proxy_url: Option<String>) {
        self.proxy_url = proxy_url;
    }

    /// Whether a request can be sent with this session.
    pub fn is_authenticated(&self) -> bool {
        self.session_id.is_some() && self.instance_url.is_some()
    }

    /// The access token as issued.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// The decoded access token sent as the bearer credential.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Base URL for API calls.
    pub fn instance_url(&self) -> Option<&str> {
        self.instance_url.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Identity URL from the login redirect (`id`).
    pub fn identity_url(&self) -> Option<&str> {
        self.identity_url.as_deref()
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Session")
            .field("access_token", &redact(&self.access_token))
            .field("instance_url", &self.instance_url)
            .field("refresh_token", &redact(&self.refresh_token))
            .field("proxy_url", &self.proxy_url)
            .field("email", &self.email)
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// A cloneable, shared reference to one client's [`Session`].
///
/// The dispatcher and the refresher hold clones of the same handle, so a
/// refresh is visible to every in-flight and future request.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<Session>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(RwLock::new(session)),
        }
    }

    /// A copy of the current session.
    pub async fn snapshot(&self) -> Session {
        self.inner.read().await.clone()
    }

    /// The current session id, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.inner.read().await.session_id.clone()
    }

    /// Swap in a whole new session.
    pub async fn replace(&self, session: Session) {
        *self.inner.write().await = session;
    }

    /// Exclusive access for in-place mutation.
    pub async fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.inner.write().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Extraction, extract};

    #[test]
    fn new_session_is_empty() {
        let session = Session::new();
        assert!(!session.is_authenticated());
        assert!(session.session_id().is_none());
        assert!(session.refresh_token().is_none());
    }

    #[test]
    fn session_id_tracks_access_token() {
        let mut session = Session::from_access_token("00D%21AQ", "https://na1.salesforce.com");
        assert_eq!(session.session_id(), Some("00D!AQ"));
        assert!(session.is_authenticated());

        session.set_access_token("new%20token");
        assert_eq!(session.access_token(), Some("new%20token"));
        assert_eq!(session.session_id(), Some("new token"));
        assert_eq!(session.instance_url(), Some("https://na1.salesforce.com"));
    }

    #[test]
    fn from_credentials_populates_all_fields() {
        let Extraction::Credentials(creds) = extract(
            "https://app/cb#access_token=AB%20C&instance_url=https%3A%2F%2Fx&refresh_token=r1&id=https%3A%2F%2Fid",
            "https://app/cb",
        ) else {
            panic!("expected credentials");
        };
        let session = Session::from_credentials(creds, Some("https://relay/".to_string()));
        assert_eq!(session.session_id(), Some("AB C"));
        assert_eq!(session.instance_url(), Some("https://x"));
        assert_eq!(session.refresh_token(), Some("r1"));
        assert_eq!(session.identity_url(), Some("https://id"));
        assert_eq!(session.proxy_url(), Some("https://relay/"));
    }

    #[test]
    fn serde_roundtrip_rebuilds_session_id() {
        let session = Session::from_access_token("a%2Bb", "https://x")
            .with_refresh_token("r")
            .with_email("user@example.com");
        let json = serde_json::to_string(&session).unwrap();
        assert!(!json.contains("session_id"));

        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, session);
        assert_eq!(restored.session_id(), Some("a+b"));
    }

    #[test]
    fn stored_session_id_is_ignored() {
        let restored: Session = serde_json::from_str(
            r#"{"access_token":"real","session_id":"forged","instance_url":"https://x"}"#,
        )
        .unwrap();
        assert_eq!(restored.session_id(), Some("real"));
    }

    #[test]
    fn debug_redacts_tokens() {
        let session = Session::from_access_token("secret", "https://x").with_refresh_token("refresh");
        let debug = format!("{session:?}");
        assert!(!debug.contains("secret"));
        assert!(!debug.contains("refresh\""));
    }

    #[tokio::test]
    async fn handle_shares_mutations() {
        let handle = SessionHandle::new(Session::from_access_token("one", "https://x"));
        let other = handle.clone();

        other.write().await.set_access_token("two");
        assert_eq!(handle.session_id().await.as_deref(), Some("two"));

        handle.replace(Session::new()).await;
        assert!(!other.snapshot().await.is_authenticated());
    }

    #[test]
    fn handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SessionHandle>();
        assert_send_sync::<Session>();
    }
}
