//! The client every caller starts from.
//!
//! A [`ForceClient`] owns one session, one usage counter, and the refresher
//! and dispatcher bound to them. Two clients never share state.

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::config::ClientConfig;
use crate::dispatch::{ApiRequest, ApiResponse, Dispatcher};
use crate::error::Result;
use crate::login::{LoginOutcome, LoginSurface, LoginWatcher, Redirect, fetch_identity_email};
use crate::refresh::TokenRefresher;
use crate::session::{Session, SessionHandle};
use crate::usage::{Usage, UsageTracker};

/// User agent sent on every request.
const USER_AGENT: &str = concat!("forcelink/", env!("CARGO_PKG_VERSION"));

/// A REST API client with its own session.
#[derive(Debug)]
pub struct ForceClient {
    config: ClientConfig,
    http: reqwest::Client,
    session: SessionHandle,
    usage: Arc<UsageTracker>,
    refresher: Arc<TokenRefresher>,
    dispatcher: Dispatcher,
}

impl ForceClient {
    /// Create a client with an empty session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`](crate::SessionError::InvalidConfig)
    /// if the configuration does not validate, or a transport error if the
    /// HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Self::with_http_client(config, http)
    }

    /// Create a client on a caller-supplied HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`](crate::SessionError::InvalidConfig)
    /// if the configuration does not validate.
    pub fn with_http_client(config: ClientConfig, http: reqwest::Client) -> Result<Self> {
        config.validate()?;

        let session = SessionHandle::default();
        let usage = Arc::new(UsageTracker::new());
        let refresher = Arc::new(
            TokenRefresher::new(http.clone(), config.token_url()?, config.consumer_key.clone())
                .with_timeout(config.request_timeout()),
        );
        let dispatcher = Dispatcher::new(
            http.clone(),
            session.clone(),
            Arc::clone(&usage),
            Arc::clone(&refresher),
        )
        .with_timeout(config.request_timeout());

        tracing::debug!(
            login_url = %config.login_url,
            api_version = %config.api_version,
            proxied = config.proxy_url.is_some(),
            "client created"
        );

        Ok(Self {
            config,
            http,
            session,
            usage,
            refresher,
            dispatcher,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A copy of the current session.
    pub async fn session(&self) -> Session {
        self.session.snapshot().await
    }

    /// The shared handle the dispatcher and refresher work through.
    pub fn session_handle(&self) -> &SessionHandle {
        &self.session
    }

    /// API usage from the last response that reported it.
    pub fn usage(&self) -> Usage {
        self.usage.usage()
    }

    /// The URL to open in a login surface.
    ///
    /// # Errors
    ///
    /// Returns an error if the login URL cannot be joined.
    pub fn authorize_url(&self) -> Result<Url> {
        self.config.authorize_url()
    }

    /// Watch `surface` through an implicit-grant login and install the
    /// resulting session.
    ///
    /// The caller opens the surface at [`authorize_url`](Self::authorize_url).
    /// Only one login should run per client at a time. If the user closes
    /// the surface the existing session is kept and
    /// [`LoginOutcome::Abandoned`] is returned.
    ///
    /// # Errors
    ///
    /// - [`SessionError::LoginFailed`](crate::SessionError::LoginFailed) if the
    ///   provider redirected with an error.
    /// - [`SessionError::LoginTimeout`](crate::SessionError::LoginTimeout) if a
    ///   login timeout is configured and elapses.
    pub async fn login(&self, surface: &mut dyn LoginSurface) -> Result<LoginOutcome> {
        let watcher = LoginWatcher::new(&self.config.callback_url, self.config.poll_interval())
            .with_timeout(self.config.login_timeout());

        let credentials = match watcher.watch(surface).await? {
            Redirect::Abandoned => {
                tracing::info!("login abandoned");
                return Ok(LoginOutcome::Abandoned);
            }
            Redirect::Credentials(credentials) => credentials,
        };

        let mut session = Session::from_credentials(credentials, self.config.proxy_url.clone());

        if self.config.fetch_identity {
            match fetch_identity_email(&self.http, &session, self.config.request_timeout()).await {
                Ok(email) => session.set_email(email),
                Err(e) => {
                    tracing::warn!(error = %e, "identity lookup failed, continuing without email")
                }
            }
        }

        self.session.replace(session.clone()).await;
        tracing::info!(
            instance_url = session.instance_url().unwrap_or_default(),
            refreshable = session.refresh_token().is_some(),
            "login complete"
        );
        Ok(LoginOutcome::Authenticated(session))
    }

    /// Install a session id obtained elsewhere, e.g. from a host page that
    /// already holds one.
    pub async fn inject_session_id(&self, session_id: impl Into<String>, instance_url: impl Into<String>) {
        let mut session = Session::from_access_token(session_id, instance_url);
        session.set_proxy_url(self.config.proxy_url.clone());
        self.session.replace(session).await;
        tracing::debug!("session id injected");
    }

    /// Install a previously saved session.
    ///
    /// The configured relay is applied when the saved session has none.
    pub async fn restore(&self, mut session: Session) {
        if session.proxy_url().is_none() {
            session.set_proxy_url(self.config.proxy_url.clone());
        }
        self.session.replace(session).await;
        tracing::debug!("session restored");
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NoRefreshToken`](crate::SessionError::NoRefreshToken)
    ///   without a network call if the session has no refresh token.
    /// - The provider's error if the exchange is rejected.
    pub async fn refresh(&self) -> Result<Session> {
        self.refresher.refresh(&self.session).await?;
        Ok(self.session.snapshot().await)
    }

    /// Send a request through the dispatcher.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::send`].
    pub async fn request(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.dispatcher.send(request).await
    }

    /// Send an arbitrary call relative to `/services/data/` and return its
    /// JSON body.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::send`].
    pub async fn raw(&self, method: Method, path: &str, payload: Option<Value>) -> Result<Value> {
        let mut request = ApiRequest::new(method, path);
        if let Some(payload) = payload {
            request = request.with_payload(payload);
        }
        self.request(&request).await?.into_json()
    }
}
