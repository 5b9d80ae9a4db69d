//! Watching a login surface until the implicit-grant redirect arrives.
//!
//! The user logs in on a surface the caller owns: a browser popup, an
//! embedded webview, or anything else that can report where it navigated.
//! [`LoginWatcher`] observes it through the [`LoginSurface`] trait and hands
//! back the credentials from the callback URL's fragment.
//!
//! Two styles of surface are supported:
//!
//! - **Polled** surfaces implement only [`LoginSurface::navigation`]. The
//!   watcher asks for the current location every poll interval. A location
//!   that cannot be read yet (for example a cross-origin page) is reported as
//!   [`Navigation::Pending`].
//! - **Event-driven** surfaces override [`LoginSurface::next_navigation`] and
//!   resolve as soon as a navigation happens. [`ChannelSurface`] is one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::dispatch::route_request;
use crate::error::{Result, SessionError};
use crate::extract::{Credentials, Extraction, extract};
use crate::session::Session;

/// What a login surface currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Location unknown or unreadable. Keep waiting.
    Pending,
    /// The surface is at this URL.
    At(String),
    /// The user closed the surface.
    Closed,
}

/// A UI surface the user logs in on.
#[async_trait]
pub trait LoginSurface: Send {
    /// The surface's current location.
    async fn navigation(&mut self) -> Navigation;

    /// Close the surface. Called once the callback has been reached.
    async fn close(&mut self);

    /// Wait for the next location to inspect.
    ///
    /// The default sleeps for `poll_interval` and then polls
    /// [`navigation`](Self::navigation). Event-driven surfaces override this
    /// and ignore the interval.
    async fn next_navigation(&mut self, poll_interval: Duration) -> Navigation {
        tokio::time::sleep(poll_interval).await;
        self.navigation().await
    }
}

// ---------------------------------------------------------------------------
// Channel-backed surface
// ---------------------------------------------------------------------------

/// An event-driven surface fed through a channel.
///
/// Whoever owns the real surface (a webview's navigation callback, a CLI
/// reading a pasted URL) pushes locations through the paired
/// [`NavigationSender`]. Dropping every sender reads as the user closing the
/// surface.
#[derive(Debug)]
pub struct ChannelSurface {
    rx: mpsc::UnboundedReceiver<String>,
}

/// Sending half of a [`ChannelSurface`].
#[derive(Debug, Clone)]
pub struct NavigationSender {
    tx: mpsc::UnboundedSender<String>,
}

impl NavigationSender {
    /// Report a navigation. Returns `false` once the watcher has closed the
    /// surface.
    pub fn navigate(&self, url: impl Into<String>) -> bool {
        self.tx.send(url.into()).is_ok()
    }

    /// Whether the watcher has closed the surface.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a connected sender and surface.
pub fn channel_surface() -> (NavigationSender, ChannelSurface) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NavigationSender { tx }, ChannelSurface { rx })
}

#[async_trait]
impl LoginSurface for ChannelSurface {
    async fn navigation(&mut self) -> Navigation {
        match self.rx.try_recv() {
            Ok(url) => Navigation::At(url),
            Err(mpsc::error::TryRecvError::Empty) => Navigation::Pending,
            Err(mpsc::error::TryRecvError::Disconnected) => Navigation::Closed,
        }
    }

    async fn close(&mut self) {
        self.rx.close();
    }

    async fn next_navigation(&mut self, _poll_interval: Duration) -> Navigation {
        match self.rx.recv().await {
            Some(url) => Navigation::At(url),
            None => Navigation::Closed,
        }
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

/// How a watch ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// The callback was reached with credentials.
    Credentials(Credentials),
    /// The user closed the surface first.
    Abandoned,
}

/// Result of a completed login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The session now in effect.
    Authenticated(Session),
    /// The user closed the surface. The previous session is untouched.
    Abandoned,
}

impl LoginOutcome {
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated(session) => Some(session),
            Self::Abandoned => None,
        }
    }
}

/// Watches a [`LoginSurface`] for the callback redirect.
#[derive(Debug, Clone)]
pub struct LoginWatcher {
    callback_url: String,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl LoginWatcher {
    pub fn new(callback_url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            callback_url: callback_url.into(),
            poll_interval,
            timeout: None,
        }
    }

    /// Give up after `timeout`. Without one the watch only ends at the
    /// callback or when the surface closes.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Watch `surface` until the callback, a close, or the timeout.
    ///
    /// The surface is closed before returning credentials or an error.
    ///
    /// # Errors
    ///
    /// - [`SessionError::LoginFailed`] if the provider redirected with an
    ///   OAuth error.
    /// - [`SessionError::LoginTimeout`] if a timeout is set and elapses.
    pub async fn watch(&self, surface: &mut dyn LoginSurface) -> Result<Redirect> {
        let Some(timeout) = self.timeout else {
            return self.watch_until_redirect(surface).await;
        };

        match tokio::time::timeout(timeout, self.watch_until_redirect(&mut *surface)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "login timed out");
                surface.close().await;
                Err(SessionError::LoginTimeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    async fn watch_until_redirect(&self, surface: &mut dyn LoginSurface) -> Result<Redirect> {
        loop {
            let url = match surface.next_navigation(self.poll_interval).await {
                Navigation::Pending => continue,
                Navigation::Closed => {
                    tracing::debug!("login surface closed before the callback");
                    return Ok(Redirect::Abandoned);
                }
                Navigation::At(url) => url,
            };

            match extract(&url, &self.callback_url) {
                Extraction::NotReady => continue,
                Extraction::Credentials(credentials) => {
                    surface.close().await;
                    tracing::info!(instance_url = %credentials.instance_url, "login redirect received");
                    return Ok(Redirect::Credentials(credentials));
                }
                Extraction::Denied { error, description } => {
                    surface.close().await;
                    tracing::warn!(error = %error, "login rejected by identity provider");
                    return Err(SessionError::LoginFailed { error, description });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Identity enrichment
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Identity {
    #[serde(default)]
    email: Option<String>,
}

/// Fetch the user's email from the session's identity URL.
///
/// Returns `Ok(None)` when the session has no identity URL.
///
/// # Errors
///
/// Returns a transport or API error if the identity service rejects the call.
pub async fn fetch_identity_email(
    http: &reqwest::Client,
    session: &Session,
    timeout: Option<Duration>,
) -> Result<Option<String>> {
    let (Some(identity_url), Some(session_id)) = (session.identity_url(), session.session_id())
    else {
        return Ok(None);
    };

    let mut request = route_request(
        http,
        Method::GET,
        identity_url,
        session.proxy_url(),
        Some(session_id),
    );
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await?;
    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        return Err(SessionError::Api(crate::error::ApiError::from_body(
            status.as_u16(),
            &body,
        )?));
    }

    let identity: Identity =
        serde_json::from_slice(&body).map_err(|e| SessionError::MalformedResponse {
            status: status.as_u16(),
            reason: format!("identity response: {e}"),
        })?;
    Ok(identity.email)
}
