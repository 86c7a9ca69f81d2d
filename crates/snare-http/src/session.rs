//! Per-connection session state

use crate::auth::AuthStrategy;
use crate::config::ServerConfig;
use snare_types::{AuthState, ServerMode};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Mutable state of one accepted connection
///
/// Created on accept, dropped on close, never shared across connections.
/// All tasks of the connection share `close`; a CONNECT tunnel additionally
/// shares `tunnel_closed`.
pub struct Session {
    state: AuthState,
    pub mode: ServerMode,
    pub auth: Option<Arc<dyn AuthStrategy>>,
    pub is_proxy: bool,
    pub ssl_intercept: bool,

    /// Negotiated wire details, carried for diagnostics
    pub version: String,
    pub content_encoding: String,
    pub charset: String,

    /// Cancellation shared by every task of this connection. Monotonic:
    /// once cancelled it is never reset.
    pub close: CancellationToken,
    /// Completion signal for a CONNECT tunnel, distinct from `close`.
    pub tunnel_closed: CancellationToken,
}

impl Session {
    pub fn new(config: &ServerConfig, auth: Option<Arc<dyn AuthStrategy>>) -> Self {
        Self {
            state: AuthState::Unauthenticated,
            mode: config.mode,
            auth,
            is_proxy: config.is_proxy(),
            ssl_intercept: config.ssl_intercept,
            version: "HTTP/1.1".to_string(),
            content_encoding: "identity".to_string(),
            charset: "utf-8".to_string(),
            close: CancellationToken::new(),
            tunnel_closed: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Advance the authentication state. Terminal states are stable: a
    /// transition attempt out of Authenticated or AuthFailed is ignored.
    pub fn set_state(&mut self, next: AuthState) {
        if self.state == AuthState::Unauthenticated {
            self.state = next;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field(
                "auth",
                &self.auth.as_ref().map(|a| a.mechanism().as_str()).unwrap_or("none"),
            )
            .field("is_proxy", &self.is_proxy)
            .field("ssl_intercept", &self.ssl_intercept)
            .field("version", &self.version)
            .field("content_encoding", &self.content_encoding)
            .field("charset", &self.charset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_are_stable() {
        let config = ServerConfig::default();
        let mut session = Session::new(&config, None);
        assert_eq!(session.state(), AuthState::Unauthenticated);

        session.set_state(AuthState::Authenticated);
        assert_eq!(session.state(), AuthState::Authenticated);

        // no re-authentication mid-connection
        session.set_state(AuthState::AuthFailed);
        assert_eq!(session.state(), AuthState::Authenticated);

        let mut failed = Session::new(&config, None);
        failed.set_state(AuthState::AuthFailed);
        failed.set_state(AuthState::Authenticated);
        assert_eq!(failed.state(), AuthState::AuthFailed);
    }

    #[test]
    fn test_close_token_is_monotonic() {
        let config = ServerConfig::default();
        let session = Session::new(&config, None);
        assert!(!session.close.is_cancelled());
        session.close.cancel();
        assert!(session.close.is_cancelled());
        // cancelling again is a no-op, the flag never clears
        session.close.cancel();
        assert!(session.close.is_cancelled());
    }
}
