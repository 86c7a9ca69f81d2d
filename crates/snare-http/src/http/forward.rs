//! One-directional byte pump between two stream endpoints
//!
//! Two forwarders make up a tunnel; they share the connection's close token
//! and the tunnel-closed token, so when either direction terminates the
//! peer forwarder observes it between operations and stops too.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Forwarding chunk size
pub const CHUNK_SIZE: usize = 1024;

/// Inspection hook applied to every chunk in transit.
///
/// A transform that returns different bytes is logged and forwarded; it
/// never changes forwarding semantics.
pub trait Inspector: Send + Sync {
    fn inspect<'a>(&self, chunk: &'a [u8]) -> Cow<'a, [u8]> {
        Cow::Borrowed(chunk)
    }
}

/// Identity inspector
pub struct Passthrough;

impl Inspector for Passthrough {}

/// Pump bytes from `source` to `sink` until EOF, error, write timeout, or
/// cancellation. Reads are unbounded; writes are bounded by `drain`.
/// Both tokens are cancelled on exit, whatever stopped the pump.
pub async fn forward<R, W>(
    mut source: R,
    mut sink: W,
    inspector: Arc<dyn Inspector>,
    drain: Duration,
    close: CancellationToken,
    tunnel_closed: CancellationToken,
    direction: &'static str,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            _ = close.cancelled() => {
                debug!("close signal observed ({})", direction);
                break;
            }
            res = source.read(&mut buf) => match res {
                Ok(0) => {
                    debug!("connection closed ({}) after {} bytes", direction, total);
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!("read error ({}): {}", direction, e);
                    break;
                }
            },
        };

        let chunk = inspector.inspect(&buf[..n]);
        if chunk.as_ref() != &buf[..n] {
            debug!(
                "inspector rewrote chunk ({}): {} -> {} bytes",
                direction,
                n,
                chunk.len()
            );
        }

        let write = async {
            sink.write_all(&chunk).await?;
            sink.flush().await
        };
        match timeout(drain, write).await {
            Ok(Ok(())) => total += chunk.len() as u64,
            Ok(Err(e)) => {
                debug!("write error ({}): {}", direction, e);
                break;
            }
            Err(_) => {
                debug!("write timed out ({})", direction);
                break;
            }
        }
    }

    close.cancel();
    tunnel_closed.cancel();
    debug!("forwarder {} stopped after {} bytes", direction, total);
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn tokens() -> (CancellationToken, CancellationToken) {
        (CancellationToken::new(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_identity_forwarding_is_lossless() {
        let (mut client_in, source) = tokio::io::duplex(4096);
        let (sink, mut remote_out) = tokio::io::duplex(4096);
        let (close, tunnel_closed) = tokens();

        let pump = tokio::spawn(forward(
            source,
            sink,
            Arc::new(Passthrough),
            Duration::from_secs(1),
            close.clone(),
            tunnel_closed.clone(),
            "client->remote",
        ));

        // more than one chunk, not chunk-aligned
        let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        use tokio::io::AsyncWriteExt;
        client_in.write_all(&payload).await.unwrap();
        drop(client_in);

        let total = pump.await.unwrap();
        assert_eq!(total, payload.len() as u64);

        let mut received = Vec::new();
        remote_out.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, payload);

        // EOF terminates both tokens
        assert!(close.is_cancelled());
        assert!(tunnel_closed.is_cancelled());
    }

    #[tokio::test]
    async fn test_close_signal_stops_forwarder() {
        let (_client_in, source) = tokio::io::duplex(64);
        let (sink, _remote_out) = tokio::io::duplex(64);
        let (close, tunnel_closed) = tokens();

        let pump = tokio::spawn(forward(
            source,
            sink,
            Arc::new(Passthrough),
            Duration::from_secs(1),
            close.clone(),
            tunnel_closed.clone(),
            "remote->client",
        ));

        close.cancel();
        let total = tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .expect("forwarder must observe the close signal")
            .unwrap();
        assert_eq!(total, 0);
        assert!(tunnel_closed.is_cancelled());
    }

    #[tokio::test]
    async fn test_write_timeout_stops_forwarder_and_cancels_tokens() {
        let (mut client_in, source) = tokio::io::duplex(4096);
        // sink smaller than one chunk and never drained, so the write stalls
        let (sink, remote_out) = tokio::io::duplex(16);
        let (close, tunnel_closed) = tokens();

        let pump = tokio::spawn(forward(
            source,
            sink,
            Arc::new(Passthrough),
            Duration::from_millis(100),
            close.clone(),
            tunnel_closed.clone(),
            "remote->client",
        ));

        use tokio::io::AsyncWriteExt;
        client_in.write_all(&[0u8; CHUNK_SIZE]).await.unwrap();

        let total = tokio::time::timeout(Duration::from_secs(2), pump)
            .await
            .expect("forwarder must stop when the write deadline expires")
            .unwrap();
        // the stalled chunk is not counted
        assert_eq!(total, 0);
        assert!(close.is_cancelled());
        assert!(tunnel_closed.is_cancelled());
        drop(remote_out);
        drop(client_in);
    }

    #[tokio::test]
    async fn test_transforming_inspector_is_forwarded() {
        struct Upper;
        impl Inspector for Upper {
            fn inspect<'a>(&self, chunk: &'a [u8]) -> Cow<'a, [u8]> {
                Cow::Owned(chunk.to_ascii_uppercase())
            }
        }

        let (mut client_in, source) = tokio::io::duplex(64);
        let (sink, mut remote_out) = tokio::io::duplex(64);
        let (close, tunnel_closed) = tokens();

        let pump = tokio::spawn(forward(
            source,
            sink,
            Arc::new(Upper),
            Duration::from_secs(1),
            close,
            tunnel_closed,
            "client->remote",
        ));

        use tokio::io::AsyncWriteExt;
        client_in.write_all(b"hello").await.unwrap();
        drop(client_in);
        pump.await.unwrap();

        let mut received = Vec::new();
        remote_out.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"HELLO");
    }
}
