//! Interception server configuration

use serde::{Deserialize, Serialize};
use snare_types::{AuthMechanism, ServerMode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,

    /// Operating mode for authenticated traffic
    pub mode: ServerMode,

    /// Experimental CONNECT interception. The plain tunnel path never
    /// depends on this being implemented.
    pub ssl_intercept: bool,

    /// Log parsed requests and session state at debug level
    pub log_wire: bool,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// Timeout settings
    pub timeouts: TimeoutConfig,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Mechanism to drive the per-connection auth state machine
    pub mechanism: AuthMechanism,

    /// Mechanism-specific settings, passed through to the strategy
    pub settings: HashMap<String, String>,

    /// Credential verification data (username -> password). An empty map
    /// means capture-only: any well-formed credential authenticates.
    pub credentials: HashMap<String, String>,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Remote connect timeout
    pub connect: Duration,

    /// Upstream response wait in relay mode
    pub response: Duration,

    /// Drain timeout for bounded writes
    pub drain: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            mode: ServerMode::CredStealer,
            ssl_intercept: false,
            log_wire: false,
            auth: AuthConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mechanism: AuthMechanism::Basic,
            settings: HashMap::new(),
            credentials: HashMap::new(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(1),
            response: Duration::from_secs(5),
            drain: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Get the listen address
    pub fn bind_address(&self) -> crate::Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| crate::ProxyError::config(format!("Invalid bind address: {}", e)))
    }

    /// Whether this instance behaves as an HTTP proxy, which decides the
    /// header the auth strategies validate.
    pub fn is_proxy(&self) -> bool {
        self.mode == ServerMode::Proxy
    }

    /// Load configuration from file
    pub async fn load_from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        toml::from_str(&content)
            .map_err(|e| crate::ProxyError::config(format!("Failed to parse config: {}", e)))
    }
}
