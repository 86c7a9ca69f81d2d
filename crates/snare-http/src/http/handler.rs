//! Per-connection server loop

use super::proxy::ProxyEngine;
use super::{exchange, HttpResponse};
use crate::auth::AuthStrategy;
use crate::config::ServerConfig;
use crate::dial::Dialer;
use crate::error::Result;
use crate::http::forward::Inspector;
use crate::session::Session;
use snare_types::{AuthState, ServerMode};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, error};

/// Connection handler driving the authentication state machine
#[derive(Clone)]
pub struct HttpHandler {
    config: Arc<ServerConfig>,
    auth: Option<Arc<dyn AuthStrategy>>,
    engine: ProxyEngine,
}

impl HttpHandler {
    pub fn new(
        config: Arc<ServerConfig>,
        auth: Option<Arc<dyn AuthStrategy>>,
        dialer: Arc<dyn Dialer>,
        inspector: Arc<dyn Inspector>,
    ) -> Self {
        let engine = ProxyEngine::new(dialer, inspector, config.timeouts.clone());
        Self {
            config,
            auth,
            engine,
        }
    }

    /// Drive one accepted connection to completion.
    ///
    /// This is the outermost failure boundary of the connection: whatever
    /// happens inside, the close signal is set and the streams are dropped
    /// before returning. Errors never reach other connections.
    pub async fn handle_connection<R, W>(&self, reader: R, writer: W, peer: &str) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut session = Session::new(&self.config, self.auth.clone());
        let result = self
            .run_session(BufReader::new(reader), writer, &mut session, peer)
            .await;

        session.close.cancel();
        match &result {
            // an expired deadline is a local termination decision
            Err(crate::ProxyError::Timeout) => debug!("connection from {} timed out", peer),
            Err(e) => error!("connection from {} terminated: {}", peer, e),
            Ok(()) => {}
        }
        result
    }

    async fn run_session<R, W>(
        &self,
        mut reader: BufReader<R>,
        mut writer: W,
        session: &mut Session,
        peer: &str,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        while !session.close.is_cancelled() {
            // no deadline beyond connection-level idle handling
            let request = match exchange::recv_request(&mut reader, None).await {
                Ok(Some(request)) => request,
                // clean EOF or mid-read hangup, normal termination
                Ok(None) => {
                    debug!("client {} closed connection", peer);
                    session.close.cancel();
                    return Ok(());
                }
                Err(e) if e.is_peer_closed() => {
                    debug!("client {} hung up: {}", peer, e);
                    session.close.cancel();
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if self.config.log_wire {
                debug!(?session, "{} {} from {}", request.method.as_str(), request.uri, peer);
            }

            if session.state() == AuthState::Unauthenticated {
                match session.auth.clone() {
                    // no auth required: short-circuit without invoking a strategy
                    None => session.set_state(AuthState::Authenticated),
                    Some(strategy) => {
                        if let Some(challenge) = strategy.evaluate(&request, session)? {
                            // another round is needed; state is unchanged
                            exchange::send_data(
                                &mut writer,
                                &challenge.to_bytes(),
                                Some(self.config.timeouts.drain),
                            )
                            .await?;
                            continue;
                        }
                    }
                }
            }

            if session.state() == AuthState::AuthFailed {
                exchange::send_data(
                    &mut writer,
                    &HttpResponse::forbidden("Auth failed!").to_bytes(),
                    Some(self.config.timeouts.drain),
                )
                .await?;
                session.close.cancel();
                return Ok(());
            }

            if session.state() == AuthState::Authenticated {
                match session.mode {
                    // the engine owns request chaining and connection close
                    ServerMode::Proxy => {
                        return self.engine.run(request, reader, writer, session).await;
                    }
                    ServerMode::CredStealer => {
                        exchange::send_data(
                            &mut writer,
                            &HttpResponse::ok_empty().to_bytes(),
                            Some(self.config.timeouts.drain),
                        )
                        .await?;
                        session.close.cancel();
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}
