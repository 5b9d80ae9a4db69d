//! Client configuration.
//!
//! A [`ClientConfig`] can be built in code, parsed from TOML, and then
//! overridden from `FORCELINK_*` environment variables. Only the consumer key
//! and callback URL are required; everything else has a default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SessionError};

/// Default identity provider.
pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com/";

/// Default REST API version prefix.
pub const DEFAULT_API_VERSION: &str = "v35.0";

/// Default interval between login surface polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "FORCELINK_";

fn default_login_url() -> String {
    DEFAULT_LOGIN_URL.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_display() -> String {
    "popup".to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Configuration for a [`ForceClient`](crate::ForceClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// The connected app's consumer key (OAuth client id).
    pub consumer_key: String,

    /// The connected app's redirect URL.
    pub callback_url: String,

    /// Login host serving `services/oauth2/authorize` and `services/oauth2/token`.
    #[serde(default = "default_login_url")]
    pub login_url: String,

    /// REST API version used by the resource helpers, e.g. `v35.0`.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Same-origin relay. When set, every request is sent here instead.
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// `display` parameter for the authorize page.
    #[serde(default = "default_display")]
    pub popup_display: String,

    /// How often a polled login surface is checked.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up on a login after this many seconds. Unset means wait forever.
    #[serde(default)]
    pub login_timeout_secs: Option<u64>,

    /// Per-request timeout. Unset means no timeout.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Fetch the user's email from the identity URL after login.
    #[serde(default)]
    pub fetch_identity: bool,

    /// Sent as `Sforce-Query-Options: batchSize=N` on queries.
    #[serde(default)]
    pub query_batch_size: Option<u32>,
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the two
    /// required fields.
    pub fn new(consumer_key: impl Into<String>, callback_url: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            callback_url: callback_url.into(),
            login_url: default_login_url(),
            api_version: default_api_version(),
            proxy_url: None,
            popup_display: default_display(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            login_timeout_secs: None,
            request_timeout_secs: None,
            fetch_identity: false,
            query_batch_size: None,
        }
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConfigParse`] if the document is invalid.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the file cannot be read, or
    /// [`SessionError::ConfigParse`] if it is not valid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Apply `FORCELINK_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` to resolve variable names.
    ///
    /// Numeric values that fail to parse are logged and ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("CONSUMER_KEY") {
            self.consumer_key = v;
        }
        if let Some(v) = var("CALLBACK_URL") {
            self.callback_url = v;
        }
        if let Some(v) = var("LOGIN_URL") {
            self.login_url = v;
        }
        if let Some(v) = var("API_VERSION") {
            self.api_version = v;
        }
        if let Some(v) = var("PROXY_URL") {
            self.proxy_url = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = var("POLL_INTERVAL_MS") {
            match v.parse() {
                Ok(ms) => self.poll_interval_ms = ms,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid FORCELINK_POLL_INTERVAL_MS"),
            }
        }
        if let Some(v) = var("LOGIN_TIMEOUT_SECS") {
            match v.parse() {
                Ok(secs) => self.login_timeout_secs = Some(secs),
                Err(_) => tracing::warn!(value = %v, "ignoring invalid FORCELINK_LOGIN_TIMEOUT_SECS"),
            }
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
            match v.parse() {
                Ok(secs) => self.request_timeout_secs = Some(secs),
                Err(_) => {
                    tracing::warn!(value = %v, "ignoring invalid FORCELINK_REQUEST_TIMEOUT_SECS")
                }
            }
        }
        if let Some(v) = var("FETCH_IDENTITY") {
            self.fetch_identity = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = var("QUERY_BATCH_SIZE") {
            match v.parse() {
                Ok(n) => self.query_batch_size = Some(n),
                Err(_) => tracing::warn!(value = %v, "ignoring invalid FORCELINK_QUERY_BATCH_SIZE"),
            }
        }
    }

    /// Check that the configuration can drive a login and a refresh.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.consumer_key.trim().is_empty() {
            return Err(SessionError::InvalidConfig {
                reason: "consumer_key is empty".to_string(),
            });
        }
        if self.callback_url.trim().is_empty() {
            return Err(SessionError::InvalidConfig {
                reason: "callback_url is empty".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(SessionError::InvalidConfig {
                reason: "poll_interval_ms must be greater than zero".to_string(),
            });
        }
        self.login_base()?;
        if let Some(ref proxy) = self.proxy_url {
            Url::parse(proxy).map_err(|e| SessionError::InvalidConfig {
                reason: format!("proxy_url `{proxy}` is not a valid URL: {e}"),
            })?;
        }
        Ok(())
    }

    /// Interval between login surface polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Login timeout, if one is configured.
    pub fn login_timeout(&self) -> Option<Duration> {
        self.login_timeout_secs.map(Duration::from_secs)
    }

    /// Per-request timeout, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// The implicit-grant authorize URL to open in the login surface.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] if `login_url` is not a URL.
    pub fn authorize_url(&self) -> Result<Url> {
        let mut url = self.login_base()?.join("services/oauth2/authorize")?;
        url.query_pairs_mut()
            .append_pair("display", &self.popup_display)
            .append_pair("response_type", "token")
            .append_pair("client_id", &self.consumer_key)
            .append_pair("redirect_uri", &self.callback_url);
        Ok(url)
    }

    /// The OAuth token endpoint used for refreshes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] if `login_url` is not a URL.
    pub fn token_url(&self) -> Result<Url> {
        Ok(self.login_base()?.join("services/oauth2/token")?)
    }

    /// `login_url` parsed, with a trailing slash so joins keep its path.
    fn login_base(&self) -> Result<Url> {
        let mut raw = self.login_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| SessionError::InvalidConfig {
            reason: format!("login_url `{}` is not a valid URL: {e}", self.login_url),
        })
    }
}
