//! Protocol types shared across crates

use serde::{Deserialize, Serialize};

/// Operating mode of the HTTP interception server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Relay authenticated traffic to the real origin server
    Proxy,
    /// Authenticate the client but answer locally, harvesting credentials
    CredStealer,
}

impl ServerMode {
    /// Get mode as string
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerMode::Proxy => "proxy",
            ServerMode::CredStealer => "credstealer",
        }
    }
}

impl std::fmt::Display for ServerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ServerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "proxy" => Ok(ServerMode::Proxy),
            "credstealer" | "cred-stealer" => Ok(ServerMode::CredStealer),
            _ => Err(format!("Unknown server mode: {}", s)),
        }
    }
}

/// Authentication mechanisms the server can be configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMechanism {
    /// No authentication, every request is accepted
    None,
    /// HTTP Basic authentication
    Basic,
    /// NTLM challenge-response authentication
    Ntlm,
}

impl AuthMechanism {
    /// Get mechanism as string
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMechanism::None => "none",
            AuthMechanism::Basic => "basic",
            AuthMechanism::Ntlm => "ntlm",
        }
    }
}

impl std::fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AuthMechanism {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(AuthMechanism::None),
            "basic" => Ok(AuthMechanism::Basic),
            "ntlm" => Ok(AuthMechanism::Ntlm),
            _ => Err(format!("Unsupported authentication mechanism: {}", s)),
        }
    }
}

/// Authentication state of one connection
///
/// `Unauthenticated` is the only state with outgoing transitions; the two
/// terminal states are stable for the lifetime of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    AuthFailed,
}

impl AuthState {
    /// Check whether this state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuthState::Unauthenticated)
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticated => "authenticated",
            AuthState::AuthFailed => "authfailed",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(ServerMode::from_str("proxy").unwrap(), ServerMode::Proxy);
        assert_eq!(
            ServerMode::from_str("CREDSTEALER").unwrap(),
            ServerMode::CredStealer
        );
        assert!(ServerMode::from_str("mitm").is_err());
    }

    #[test]
    fn test_mechanism_parsing() {
        assert_eq!(AuthMechanism::from_str("NTLM").unwrap(), AuthMechanism::Ntlm);
        assert_eq!(
            AuthMechanism::from_str("basic").unwrap(),
            AuthMechanism::Basic
        );
        // anything outside the closed set is a configuration error
        assert!(AuthMechanism::from_str("digest").is_err());
        assert!(AuthMechanism::from_str("").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!AuthState::Unauthenticated.is_terminal());
        assert!(AuthState::Authenticated.is_terminal());
        assert!(AuthState::AuthFailed.is_terminal());
    }
}
