//! Proxy engine: CONNECT tunneling and rewrite-and-forward relaying

use super::forward::{forward, Inspector};
use super::{exchange, HttpConnection, HttpMethod, HttpRequest, HttpResponse};
use crate::config::TimeoutConfig;
use crate::dial::Dialer;
use crate::error::{ProxyError, Result};
use crate::session::Session;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, error, warn};
use url::Url;

/// Orchestrates the two proxy sub-protocols for authenticated requests.
///
/// Once invoked it owns the rest of the connection's useful life: on return
/// the client connection has been closed or the close signal is set, and the
/// server loop does not read again.
#[derive(Clone)]
pub struct ProxyEngine {
    dialer: Arc<dyn Dialer>,
    inspector: Arc<dyn Inspector>,
    timeouts: TimeoutConfig,
}

impl ProxyEngine {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        inspector: Arc<dyn Inspector>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            dialer,
            inspector,
            timeouts,
        }
    }

    pub async fn run<R, W>(
        &self,
        request: HttpRequest,
        reader: BufReader<R>,
        writer: W,
        session: &mut Session,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if request.method == HttpMethod::Connect {
            self.tunnel(request, reader, writer, session).await
        } else {
            self.relay(request, reader, writer, session).await
        }
    }

    /// CONNECT: open the remote socket, acknowledge, then pump raw bytes in
    /// both directions until either side terminates.
    async fn tunnel<R, W>(
        &self,
        request: HttpRequest,
        reader: BufReader<R>,
        mut writer: W,
        session: &mut Session,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (host, port) = parse_connect_target(&request.uri)?;

        if session.ssl_intercept {
            // the intercept path needs a full re-parsing design; the plain
            // tunnel below must never depend on it
            warn!("ssl interception requested for {}:{}", host, port);
            session.close.cancel();
            return Err(ProxyError::unsupported("SSL interception"));
        }

        let (remote_reader, remote_writer) = match self
            .dialer
            .dial(&host, port, self.timeouts.connect)
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                // fail closed: nothing is written back to the client
                error!("failed to open tunnel to {}:{}: {}", host, port, e);
                session.close.cancel();
                return Ok(());
            }
        };

        // acknowledge before any tunneling begins
        exchange::send_data(
            &mut writer,
            &HttpResponse::connection_established().to_bytes(),
            Some(self.timeouts.drain),
        )
        .await?;

        debug!("tunnel established to {}:{}", host, port);

        let close = session.close.clone();
        let tunnel_closed = session.tunnel_closed.clone();

        tokio::spawn(forward(
            remote_reader,
            writer,
            self.inspector.clone(),
            self.timeouts.drain,
            close.clone(),
            tunnel_closed.clone(),
            "remote->client",
        ));
        tokio::spawn(forward(
            reader,
            remote_writer,
            self.inspector.clone(),
            self.timeouts.drain,
            close.clone(),
            tunnel_closed.clone(),
            "client->remote",
        ));

        // either direction terminating completes the tunnel
        session.tunnel_closed.cancelled().await;
        session.close.cancel();
        debug!("tunnel to {}:{} closed", host, port);
        Ok(())
    }

    /// Relay: rebuild and forward each request over a fresh remote
    /// connection, chaining on keep-alive.
    async fn relay<R, W>(
        &self,
        request: HttpRequest,
        mut reader: BufReader<R>,
        mut writer: W,
        session: &mut Session,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut request = request;
        loop {
            let (host, port, origin_uri) = parse_relay_target(&request.uri)?;
            let outbound = rebuild_request(&request, origin_uri);

            // remote connections are not pooled; every cycle dials fresh
            let (remote_reader, mut remote_writer) = match self
                .dialer
                .dial(&host, port, self.timeouts.connect)
                .await
            {
                Ok(pair) => pair,
                Err(e) => {
                    error!("relay dial to {}:{} failed: {}", host, port, e);
                    session.close.cancel();
                    return Ok(());
                }
            };

            exchange::send_data(
                &mut remote_writer,
                &outbound.to_bytes(),
                Some(self.timeouts.drain),
            )
            .await?;

            let mut remote_reader = BufReader::new(remote_reader);
            let response = match exchange::recv_response(&mut remote_reader, Some(self.timeouts.response))
                .await
            {
                Ok(response) => response,
                Err(ProxyError::Timeout) => {
                    debug!("response from {}:{} timed out", host, port);
                    session.close.cancel();
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            exchange::send_data(&mut writer, &response.to_bytes(), None).await?;
            debug!(
                "relayed {} {} -> {} {}",
                outbound.method.as_str(),
                outbound.uri,
                response.status,
                response.reason
            );

            if request.connection() == Some(HttpConnection::KeepAlive) {
                // block indefinitely for the next request of the chain
                match exchange::recv_request(&mut reader, None).await? {
                    Some(next) => request = next,
                    None => {
                        debug!("client closed keep-alive chain");
                        session.close.cancel();
                        return Ok(());
                    }
                }
            } else {
                debug!("closing connection");
                session.close.cancel();
                // dropping both ends closes remote and client
                return Ok(());
            }
        }
    }
}

/// Parse a `host:port` CONNECT target. Malformed targets are a hard failure
/// for the request.
fn parse_connect_target(uri: &str) -> Result<(String, u16)> {
    let (host, port) = uri
        .rsplit_once(':')
        .ok_or_else(|| ProxyError::invalid_request("Invalid CONNECT target"))?;
    if host.is_empty() {
        return Err(ProxyError::invalid_request("Invalid CONNECT target"));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| ProxyError::invalid_request("Invalid port number"))?;
    Ok((host.to_string(), port))
}

/// Parse an absolute-URI relay target into (host, port, origin-form uri).
fn parse_relay_target(uri: &str) -> Result<(String, u16, String)> {
    let url = Url::parse(uri)
        .map_err(|e| ProxyError::invalid_request(format!("Invalid request target: {}", e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| ProxyError::invalid_request("Request target has no host"))?
        .to_string();
    let port = url.port().unwrap_or(80);

    let origin_uri = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    Ok((host, port, origin_uri))
}

/// Rebuild the outbound request: origin-form target, all headers preserved
/// except Proxy-Authorization, which must never reach the upstream.
fn rebuild_request(request: &HttpRequest, origin_uri: String) -> HttpRequest {
    HttpRequest {
        method: request.method,
        uri: origin_uri,
        version: request.version.clone(),
        headers: request
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("proxy-authorization"))
            .cloned()
            .collect(),
        body: request.body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect_target() {
        assert_eq!(
            parse_connect_target("example.org:443").unwrap(),
            ("example.org".to_string(), 443)
        );
        assert!(parse_connect_target("example.org").is_err());
        assert!(parse_connect_target(":443").is_err());
        assert!(parse_connect_target("example.org:http").is_err());
    }

    #[test]
    fn test_parse_relay_target() {
        let (host, port, uri) = parse_relay_target("http://example.org/a").unwrap();
        assert_eq!(host, "example.org");
        assert_eq!(port, 80);
        assert_eq!(uri, "/a");

        let (host, port, uri) =
            parse_relay_target("http://example.org:8081/search?q=1&p=2").unwrap();
        assert_eq!(host, "example.org");
        assert_eq!(port, 8081);
        assert_eq!(uri, "/search?q=1&p=2");

        // origin-form targets cannot be relayed
        assert!(parse_relay_target("/a").is_err());
    }

    #[test]
    fn test_rebuild_strips_proxy_authorization() {
        let request = HttpRequest {
            method: HttpMethod::Get,
            uri: "http://example.org/a".to_string(),
            version: "HTTP/1.1".to_string(),
            headers: vec![
                ("Host".to_string(), "example.org".to_string()),
                ("Proxy-Authorization".to_string(), "Basic abc".to_string()),
                ("Accept".to_string(), "*/*".to_string()),
            ],
            body: Some(b"payload".to_vec()),
        };

        let rebuilt = rebuild_request(&request, "/a".to_string());
        assert_eq!(rebuilt.uri, "/a");
        assert!(rebuilt.header("proxy-authorization").is_none());
        assert_eq!(rebuilt.header("host"), Some("example.org"));
        assert_eq!(rebuilt.header("accept"), Some("*/*"));
        assert_eq!(rebuilt.body.as_deref(), Some(&b"payload"[..]));
    }
}
