//! Outbound connection establishment

use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Capability to open a stream pair towards a remote endpoint.
///
/// Object-safe so tests can substitute in-memory endpoints for real sockets.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, host: &str, port: u16, limit: Duration)
        -> Result<(BoxedReader, BoxedWriter)>;
}

/// Production dialer over TCP with a bounded connect timeout
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(
        &self,
        host: &str,
        port: u16,
        limit: Duration,
    ) -> Result<(BoxedReader, BoxedWriter)> {
        let stream = timeout(limit, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ProxyError::upstream(format!("Connect to {}:{} timed out", host, port)))?
            .map_err(|e| ProxyError::upstream(format!("Connect to {}:{} failed: {}", host, port, e)))?;

        debug!("connected to {}:{}", host, port);
        let (reader, writer) = stream.into_split();
        Ok((Box::new(reader), Box::new(writer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dial_refused_port_fails() {
        // a freshly bound-then-dropped port refuses immediately
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TcpDialer.dial("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(ProxyError::UpstreamConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_dial_success() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        TcpDialer
            .dial("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
    }
}
