//! Session manager and request dispatcher for the Force.com REST API.
//!
//! This crate handles the lifecycle of an OAuth 2.0 implicit-grant session:
//!
//! - **Login**: watch a popup or webview until the provider redirects to the
//!   callback URL, then extract the credentials from the fragment.
//! - **Dispatch**: send REST calls bound to the current session, directly or
//!   through a same-origin relay.
//! - **Refresh**: when a call comes back `INVALID_SESSION_ID`, exchange the
//!   refresh token once and retry the call once. Concurrent expiries share a
//!   single refresh.
//! - **Usage**: record the `Sforce-Limit-Info` counter from each response.
//!
//! # Architecture
//!
//! ```text
//! ForceClient
//! ├── LoginWatcher    (LoginSurface → Credentials)
//! ├── SessionHandle   (Arc<RwLock<Session>>, shared)
//! ├── Dispatcher      (one retry on expiry)
//! ├── TokenRefresher  (single-flight refresh_token grant)
//! └── UsageTracker    (last Sforce-Limit-Info)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use forcelink_session::{ClientConfig, ForceClient, LoginOutcome, channel_surface};
//!
//! # async fn example() -> forcelink_session::Result<()> {
//! let config = ClientConfig::new("3MVG9...", "https://app.example.com/oauth/callback");
//! let client = ForceClient::new(config)?;
//!
//! // Open client.authorize_url() in a webview and forward its navigations.
//! let (navigations, mut surface) = channel_surface();
//! # navigations.navigate("https://app.example.com/oauth/callback#access_token=x&instance_url=https%3A%2F%2Fna1.salesforce.com");
//! if let LoginOutcome::Authenticated(_) = client.login(&mut surface).await? {
//!     let accounts = client.query_all("SELECT Id, Name FROM Account").await?;
//!     println!("{} accounts, usage {:?}", accounts.len(), client.usage());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod login;
pub mod refresh;
pub mod resources;
pub mod session;
pub mod usage;

// Re-export key types at the crate root for convenience.
pub use client::ForceClient;
pub use config::ClientConfig;
pub use dispatch::{
    ApiRequest, ApiResponse, Dispatcher, PROXY_AUTHORIZATION_HEADER, PROXY_ENDPOINT_HEADER,
    RawResponse, ResponseType,
};
pub use error::{ApiError, EXPIRED_SESSION_CODE, Result, SessionError};
pub use extract::{Credentials, Extraction, extract};
pub use login::{
    ChannelSurface, LoginOutcome, LoginSurface, LoginWatcher, Navigation, NavigationSender,
    Redirect, channel_surface,
};
pub use refresh::TokenRefresher;
pub use resources::{CreateResult, QueryPage};
pub use session::{Session, SessionHandle};
pub use usage::{LIMIT_INFO_HEADER, Usage, UsageTracker};

pub use reqwest::Method;
