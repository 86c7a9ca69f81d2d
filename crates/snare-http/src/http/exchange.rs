//! Timeout-bounded message exchange over the wire codec
//!
//! Every bounded operation converts an expired deadline into
//! `ProxyError::Timeout`; callers treat that as a local log-and-terminate
//! decision, never as something to surface to the client.

use super::parser;
use super::{HttpRequest, HttpResponse};
use crate::error::{ProxyError, Result};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Read one request, waiting at most `limit` (`None` blocks indefinitely).
/// `Ok(None)` means the peer closed cleanly.
pub async fn recv_request<R>(reader: &mut R, limit: Option<Duration>) -> Result<Option<HttpRequest>>
where
    R: AsyncBufRead + Unpin,
{
    match limit {
        Some(limit) => timeout(limit, parser::read_request(reader))
            .await
            .map_err(|_| ProxyError::Timeout)?,
        None => parser::read_request(reader).await,
    }
}

/// Read one full response, waiting at most `limit` for the whole message.
pub async fn recv_response<R>(reader: &mut R, limit: Option<Duration>) -> Result<HttpResponse>
where
    R: AsyncBufRead + Unpin,
{
    match limit {
        Some(limit) => timeout(limit, parser::read_response(reader))
            .await
            .map_err(|_| ProxyError::Timeout)?,
        None => parser::read_response(reader).await,
    }
}

/// Write raw bytes and drain, bounded by `limit` when given.
pub async fn send_data<W>(writer: &mut W, data: &[u8], limit: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(data).await?;
        writer.flush().await
    };
    match limit {
        Some(limit) => timeout(limit, write).await.map_err(|_| ProxyError::Timeout)??,
        None => write.await?,
    }
    Ok(())
}
