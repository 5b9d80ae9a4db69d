//! Relay server setup and startup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::any;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, CorsLayer};

use crate::RelayConfig;
use crate::error::Result;
use crate::proxy::{self, RelayState};

/// The relay HTTP server.
pub struct RelayServer {
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Create a relay server.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfig`](crate::RelayError::InvalidConfig)
    /// if the configuration does not validate.
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: Arc::new(RelayState::new(config)?),
        })
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        let config = self.state.config();
        format!("{}:{}", config.bind_addr, config.port)
    }

    /// Build the Axum router with the relay mounted.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(HeaderValue::from_static("*"))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::HEAD,
                Method::OPTIONS,
            ])
            .allow_headers(AllowHeaders::mirror_request())
            .expose_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static("sforce-limit-info"),
            ]);

        Router::new()
            .route(&self.state.config().mount_path, any(proxy::relay))
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Serve on an already bound listener until the task is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails while running.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let router = self.router();
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// Bind the configured address and serve.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> Result<()> {
        let addr = self.addr();
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!(
            addr = %addr,
            mount_path = %self.state.config().mount_path,
            "starting relay"
        );

        self.serve(listener).await
    }
}
