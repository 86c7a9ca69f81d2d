//! HTTP interception server
//!
//! A single-connection HTTP server/proxy engine: each accepted connection
//! runs an authentication state machine and, once authenticated, is either
//! answered locally (credential-stealer mode) or relayed to the real origin
//! (proxy mode), including CONNECT tunnels and keep-alive request chains.

pub mod auth;
pub mod config;
pub mod dial;
pub mod error;
pub mod http;
pub mod session;

pub use config::ServerConfig;
pub use error::{ProxyError, Result};
pub use http::HttpHandler;
pub use session::Session;

use crate::dial::TcpDialer;
use crate::http::forward::Passthrough;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Listener front-end: accepts connections and hands each one to the
/// connection handler on its own task.
pub struct Server {
    config: Arc<ServerConfig>,
    handler: HttpHandler,
}

impl Server {
    /// Build a server from configuration. Authentication configuration is
    /// resolved here, before any connection is served; an unsupported
    /// mechanism never makes it past deserialization.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.bind_address()?;
        let auth = auth::build_strategy(&config.auth, config.is_proxy());
        let config = Arc::new(config);
        let handler = HttpHandler::new(
            config.clone(),
            auth,
            Arc::new(TcpDialer),
            Arc::new(Passthrough),
        );
        Ok(Self { config, handler })
    }

    pub async fn run(&self) -> Result<()> {
        let addr = self.config.bind_address()?;
        info!(
            "starting http interception server on {} ({} mode, {} auth)",
            addr,
            self.config.mode,
            self.config.auth.mechanism
        );

        let listener = TcpListener::bind(addr).await?;
        loop {
            let (socket, peer) = listener.accept().await?;
            let handler = self.handler.clone();
            tokio::spawn(async move {
                let (reader, writer) = socket.into_split();
                // failures are logged at the connection boundary and stay
                // inside this connection's task
                let _ = handler
                    .handle_connection(reader, writer, &peer.to_string())
                    .await;
            });
        }
    }
}
