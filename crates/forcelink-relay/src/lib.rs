//! Same-origin relay for browser clients of the Force.com REST API.
//!
//! Pages served from their own origin cannot call the REST API directly, so
//! they send every request to this relay instead. The real target travels in
//! the `SalesforceProxy-Endpoint` header and the bearer credential in
//! `X-Authorization`. The relay replays the request upstream and echoes the
//! status, an allow-listed set of headers, and the body.

pub mod error;
pub mod proxy;
pub mod server;

pub use error::{RelayError, Result};
pub use server::RelayServer;

use serde::{Deserialize, Serialize};

/// Hosts the relay forwards to unless configured otherwise.
pub const DEFAULT_ALLOWED_HOST_SUFFIXES: &[&str] = &[
    "salesforce.com",
    "force.com",
    "cloudforce.com",
    "database.com",
];

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
    /// Path the relay answers on.
    pub mount_path: String,
    /// Endpoint hosts must equal or end with one of these. Empty allows any
    /// host.
    pub allowed_host_suffixes: Vec<String>,
    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,
    /// Largest upstream response body relayed back, in bytes.
    pub max_response_bytes: usize,
    /// Timeout for the upstream call. Unset means none.
    pub request_timeout_secs: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 8200,
            mount_path: "/proxy".into(),
            allowed_host_suffixes: DEFAULT_ALLOWED_HOST_SUFFIXES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            max_body_bytes: 32 * 1024 * 1024,
            max_response_bytes: 64 * 1024 * 1024,
            request_timeout_secs: None,
        }
    }
}

impl RelayConfig {
    /// Check that the configuration can be served.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if !self.mount_path.starts_with('/') {
            return Err(RelayError::InvalidConfig {
                reason: format!("mount_path `{}` must start with '/'", self.mount_path),
            });
        }
        if self.max_body_bytes == 0 {
            return Err(RelayError::InvalidConfig {
                reason: "max_body_bytes must be greater than zero".into(),
            });
        }
        if self.max_response_bytes == 0 {
            return Err(RelayError::InvalidConfig {
                reason: "max_response_bytes must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Whether requests may be forwarded to `host`.
    pub fn allows_host(&self, host: &str) -> bool {
        if self.allowed_host_suffixes.is_empty() {
            return true;
        }
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.allowed_host_suffixes.iter().any(|suffix| {
            let suffix = suffix.trim_start_matches('.').to_ascii_lowercase();
            host == suffix || host.ends_with(&format!(".{suffix}"))
        })
    }
}
