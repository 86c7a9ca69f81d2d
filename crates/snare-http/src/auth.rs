//! Authentication strategies
//!
//! One strategy instance is built at server configuration time and shared
//! read-mostly across every session of that server. A strategy evaluates one
//! inbound request against the session, advancing `session.state`; when the
//! mechanism needs another round it returns the challenge response to send
//! while the state stays unauthenticated.

use crate::config::AuthConfig;
use crate::error::Result;
use crate::http::{HttpRequest, HttpResponse};
use crate::session::Session;
use base64::{engine::general_purpose, Engine as _};
use snare_types::{AuthMechanism, AuthState};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Pluggable per-request authentication policy
pub trait AuthStrategy: Send + Sync {
    fn mechanism(&self) -> AuthMechanism;

    /// Evaluate one request, side-effecting `session` state. A returned
    /// response is a challenge the caller must write before reading the
    /// next request.
    fn evaluate(&self, request: &HttpRequest, session: &mut Session)
        -> Result<Option<HttpResponse>>;
}

/// Resolve the configured mechanism to a concrete strategy.
/// `None` means no auth required; the server loop short-circuits straight
/// to authenticated without ever invoking a strategy.
pub fn build_strategy(config: &AuthConfig, is_proxy: bool) -> Option<Arc<dyn AuthStrategy>> {
    match config.mechanism {
        AuthMechanism::None => None,
        AuthMechanism::Basic => Some(Arc::new(BasicAuth::new(
            is_proxy,
            config.credentials.clone(),
        ))),
        AuthMechanism::Ntlm => Some(Arc::new(NtlmAuth::new(
            is_proxy,
            Arc::new(HarvestVerifier::from_settings(&config.settings)),
        ))),
    }
}

fn credential_header(request: &HttpRequest, is_proxy: bool) -> Option<&str> {
    if is_proxy {
        request.header("proxy-authorization")
    } else {
        request.header("authorization")
    }
}

/// HTTP Basic authentication
pub struct BasicAuth {
    is_proxy: bool,
    credentials: HashMap<String, String>,
}

impl BasicAuth {
    pub fn new(is_proxy: bool, credentials: HashMap<String, String>) -> Self {
        Self {
            is_proxy,
            credentials,
        }
    }
}

impl AuthStrategy for BasicAuth {
    fn mechanism(&self) -> AuthMechanism {
        AuthMechanism::Basic
    }

    fn evaluate(
        &self,
        request: &HttpRequest,
        session: &mut Session,
    ) -> Result<Option<HttpResponse>> {
        let value = match credential_header(request, self.is_proxy) {
            Some(v) => v,
            None => {
                warn!("basic auth: no credential header on request");
                session.set_state(AuthState::AuthFailed);
                return Ok(None);
            }
        };

        let decoded = value
            .strip_prefix("Basic ")
            .and_then(|encoded| general_purpose::STANDARD.decode(encoded).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok());

        let creds = match decoded {
            Some(c) => c,
            None => {
                warn!("basic auth: malformed credential header");
                session.set_state(AuthState::AuthFailed);
                return Ok(None);
            }
        };

        let (user, password) = match creds.split_once(':') {
            Some(pair) => pair,
            None => {
                warn!("basic auth: credential is not user:password");
                session.set_state(AuthState::AuthFailed);
                return Ok(None);
            }
        };

        info!(user, password, "captured basic credentials");

        if self.credentials.is_empty()
            || self.credentials.get(user).map(String::as_str) == Some(password)
        {
            session.set_state(AuthState::Authenticated);
        } else {
            warn!(user, "basic auth: credential verification failed");
            session.set_state(AuthState::AuthFailed);
        }
        Ok(None)
    }
}

/// Acceptance policy for NTLM authenticate tokens. The cryptographic
/// verification lives outside this crate; the default implementation
/// harvests tokens and accepts.
pub trait NtlmVerifier: Send + Sync {
    /// Type-2 challenge message to send back after a negotiate token
    fn challenge(&self) -> Vec<u8>;

    /// Verify a type-3 authenticate token
    fn verify(&self, token: &[u8]) -> bool;
}

/// Default verifier: static challenge, every token accepted and recorded
pub struct HarvestVerifier {
    challenge: Vec<u8>,
}

impl HarvestVerifier {
    /// Recognized setting: `challenge` (base64 of a full type-2 message)
    pub fn from_settings(settings: &HashMap<String, String>) -> Self {
        let challenge = settings
            .get("challenge")
            .and_then(|v| general_purpose::STANDARD.decode(v).ok())
            .unwrap_or_else(default_type2_message);
        Self { challenge }
    }
}

impl NtlmVerifier for HarvestVerifier {
    fn challenge(&self) -> Vec<u8> {
        self.challenge.clone()
    }

    fn verify(&self, token: &[u8]) -> bool {
        info!(
            token = %general_purpose::STANDARD.encode(token),
            "captured ntlm authenticate token"
        );
        true
    }
}

/// Minimal type-2 message with a fixed server challenge. Anything beyond
/// transporting the bytes is the verifier's concern.
fn default_type2_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(40);
    msg.extend_from_slice(b"NTLMSSP\0");
    msg.extend_from_slice(&2u32.to_le_bytes()); // message type
    msg.extend_from_slice(&[0u8; 8]); // target name fields
    msg.extend_from_slice(&0x0000_8201u32.to_le_bytes()); // negotiate flags
    msg.extend_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]); // server challenge
    msg.extend_from_slice(&[0u8; 8]); // context
    msg
}

const NTLM_NEGOTIATE: u32 = 1;
const NTLM_AUTHENTICATE: u32 = 3;

/// NTLM challenge-response authentication
///
/// The round a token belongs to is encoded in the token itself, so the
/// strategy carries no per-session state and stays safe to share.
pub struct NtlmAuth {
    is_proxy: bool,
    verifier: Arc<dyn NtlmVerifier>,
}

impl NtlmAuth {
    pub fn new(is_proxy: bool, verifier: Arc<dyn NtlmVerifier>) -> Self {
        Self { is_proxy, verifier }
    }

    fn challenge_response(&self, token: Option<&[u8]>) -> HttpResponse {
        let value = match token {
            Some(t) => format!("NTLM {}", general_purpose::STANDARD.encode(t)),
            None => "NTLM".to_string(),
        };
        HttpResponse::auth_challenge(self.is_proxy, &value)
    }
}

impl AuthStrategy for NtlmAuth {
    fn mechanism(&self) -> AuthMechanism {
        AuthMechanism::Ntlm
    }

    fn evaluate(
        &self,
        request: &HttpRequest,
        session: &mut Session,
    ) -> Result<Option<HttpResponse>> {
        let value = match credential_header(request, self.is_proxy) {
            Some(v) => v,
            // first round: tell the client which mechanism to speak
            None => return Ok(Some(self.challenge_response(None))),
        };

        let token = value
            .strip_prefix("NTLM ")
            .and_then(|encoded| general_purpose::STANDARD.decode(encoded).ok());

        let token = match token {
            Some(t) => t,
            None => {
                warn!("ntlm auth: malformed credential header");
                session.set_state(AuthState::AuthFailed);
                return Ok(None);
            }
        };

        if token.len() < 12 || !token.starts_with(b"NTLMSSP\0") {
            warn!("ntlm auth: not an NTLMSSP token");
            session.set_state(AuthState::AuthFailed);
            return Ok(None);
        }

        let message_type = u32::from_le_bytes([token[8], token[9], token[10], token[11]]);
        match message_type {
            NTLM_NEGOTIATE => {
                // type-2 round, state stays unauthenticated
                let challenge = self.verifier.challenge();
                Ok(Some(self.challenge_response(Some(&challenge))))
            }
            NTLM_AUTHENTICATE => {
                if self.verifier.verify(&token) {
                    session.set_state(AuthState::Authenticated);
                } else {
                    warn!("ntlm auth: token verification failed");
                    session.set_state(AuthState::AuthFailed);
                }
                Ok(None)
            }
            other => {
                warn!("ntlm auth: unexpected message type {}", other);
                session.set_state(AuthState::AuthFailed);
                Ok(None)
            }
        }
    }
}
