//! HTTP request/response wire parsing

use super::{HttpMethod, HttpRequest, HttpResponse};
use crate::error::{ProxyError, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::debug;

/// Upper bound on any peer-supplied length before a buffer is allocated
/// for it. Applies to `Content-Length` declarations and chunk sizes alike.
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Parse one HTTP request from the client.
///
/// Returns `Ok(None)` on a clean EOF before the first byte, which is the
/// peer closing between requests and not an error.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<HttpRequest>>
where
    R: AsyncBufRead + Unpin,
{
    let lines = match read_head(reader).await? {
        Some(lines) => lines,
        None => return Ok(None),
    };

    let (method, uri, version) = {
        let parts: Vec<&str> = lines[0].split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ProxyError::invalid_request("Invalid request line"));
        }
        let method = HttpMethod::from_str(parts[0])
            .ok_or_else(|| ProxyError::invalid_request(format!("Unknown method: {}", parts[0])))?;
        (method, parts[1].to_string(), parts[2].to_string())
    };

    let headers = parse_headers(&lines[1..])?;

    let body = match content_length(&headers)? {
        Some(len) if len > 0 => {
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await?;
            Some(body)
        }
        _ => None,
    };

    debug!(
        "parsed {} request to {} with {} headers",
        method.as_str(),
        uri,
        headers.len()
    );

    Ok(Some(HttpRequest {
        method,
        uri,
        version,
        headers,
        body,
    }))
}

/// Parse one HTTP response from an origin server.
///
/// The body is captured as raw payload bytes: Content-Length bodies are read
/// exactly, chunked bodies keep their framing, and bodies delimited by
/// connection close are read to EOF. Serializing the result reproduces the
/// response verbatim.
pub async fn read_response<R>(reader: &mut R) -> Result<HttpResponse>
where
    R: AsyncBufRead + Unpin,
{
    let lines = read_head(reader)
        .await?
        .ok_or_else(|| ProxyError::upstream("Remote closed before sending a response"))?;

    let (version, status, reason) = {
        let parts: Vec<&str> = lines[0].splitn(3, ' ').collect();
        if parts.len() < 2 {
            return Err(ProxyError::upstream("Invalid status line"));
        }
        let status: u16 = parts[1]
            .parse()
            .map_err(|_| ProxyError::upstream("Invalid status code"))?;
        let reason = parts.get(2).unwrap_or(&"").to_string();
        (parts[0].to_string(), status, reason)
    };

    let headers = parse_headers(&lines[1..])?;

    let body = if let Some(len) = content_length(&headers)? {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        body
    } else if is_chunked(&headers) {
        read_chunked_raw(reader).await?
    } else {
        // delimited by connection close; remote connections are never reused
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await?;
        body
    };

    Ok(HttpResponse {
        version,
        status,
        reason,
        headers,
        body,
    })
}

/// Read the head (start line + headers) up to the empty line.
/// Returns `None` on EOF before any byte arrives.
async fn read_head<R>(reader: &mut R) -> Result<Option<Vec<String>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if lines.is_empty() {
                return Ok(None);
            }
            return Err(ProxyError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Connection closed mid-message",
            )));
        }
        let line = line.trim_end().to_string();
        if line.is_empty() {
            if lines.is_empty() {
                return Err(ProxyError::invalid_request("Empty message"));
            }
            return Ok(Some(lines));
        }
        lines.push(line);
    }
}

fn parse_headers(lines: &[String]) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::with_capacity(lines.len());
    for line in lines {
        let colon = line
            .find(':')
            .ok_or_else(|| ProxyError::invalid_request("Invalid header format"))?;
        let name = line[..colon].trim().to_string();
        let value = line[colon + 1..].trim().to_string();
        headers.push((name, value));
    }
    Ok(headers)
}

fn content_length(headers: &[(String, String)]) -> Result<Option<usize>> {
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("content-length") {
            let len = value
                .parse::<usize>()
                .map_err(|_| ProxyError::invalid_request("Invalid Content-Length"))?;
            if len > MAX_BODY_SIZE {
                return Err(ProxyError::invalid_request("Content-Length too large"));
            }
            return Ok(Some(len));
        }
    }
    Ok(None)
}

fn is_chunked(headers: &[(String, String)]) -> bool {
    headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("transfer-encoding") && value.to_lowercase().contains("chunked")
    })
}

/// Consume a chunked body, preserving the chunk framing bytes so the
/// response can be relayed verbatim. Trailers are not supported; the body
/// ends at the zero-size chunk.
async fn read_chunked_raw<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    loop {
        let mut size_line = String::new();
        let n = reader.read_line(&mut size_line).await?;
        if n == 0 {
            return Err(ProxyError::upstream("Remote closed mid-chunk"));
        }
        raw.extend_from_slice(size_line.as_bytes());

        let size = usize::from_str_radix(size_line.trim().split(';').next().unwrap_or("").trim(), 16)
            .map_err(|_| ProxyError::upstream("Invalid chunk size"))?;
        if size > MAX_BODY_SIZE {
            return Err(ProxyError::upstream("Chunk too large"));
        }

        // chunk data plus its trailing CRLF
        let mut chunk = vec![0u8; size + 2];
        reader.read_exact(&mut chunk).await?;
        raw.extend_from_slice(&chunk);

        if size == 0 {
            return Ok(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_parse_simple_request() {
        let data: &[u8] = b"GET http://example.com/path HTTP/1.1\r\n\
                            Host: example.com\r\n\
                            User-Agent: test\r\n\
                            \r\n";
        let mut reader = BufReader::new(data);
        let req = read_request(&mut reader).await.unwrap().unwrap();

        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.uri, "http://example.com/path");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.header("host"), Some("example.com"));
        assert!(req.body.is_none());
    }

    #[tokio::test]
    async fn test_parse_request_with_body() {
        let data: &[u8] = b"POST /login HTTP/1.1\r\n\
                            Content-Length: 9\r\n\
                            \r\n\
                            user=abcd";
        let mut reader = BufReader::new(data);
        let req = read_request(&mut reader).await.unwrap().unwrap();

        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.body.as_deref(), Some(&b"user=abcd"[..]));
    }

    #[tokio::test]
    async fn test_eof_before_request_is_not_an_error() {
        let data: &[u8] = b"";
        let mut reader = BufReader::new(data);
        assert!(read_request(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_request_line() {
        let data: &[u8] = b"NONSENSE\r\n\r\n";
        let mut reader = BufReader::new(data);
        assert!(read_request(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_content_length_is_rejected() {
        let data: &[u8] = b"POST / HTTP/1.1\r\nContent-Length: 999999999999\r\n\r\n";
        let mut reader = BufReader::new(data);
        assert!(read_request(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_chunk_size_is_rejected() {
        // ffffffffffffffff parses to usize::MAX; the cap must stop it before
        // any allocation happens
        let data: &[u8] =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\n";
        let mut reader = BufReader::new(data);
        assert!(read_response(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_parse_response_content_length() {
        let data: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let mut reader = BufReader::new(data);
        let resp = read_response(&mut reader).await.unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.reason, "OK");
        assert_eq!(resp.body, b"hello");
        assert_eq!(resp.to_bytes(), data);
    }

    #[tokio::test]
    async fn test_parse_response_chunked_preserves_framing() {
        let data: &[u8] =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let mut reader = BufReader::new(data);
        let resp = read_response(&mut reader).await.unwrap();

        assert_eq!(resp.to_bytes(), data);
    }

    #[tokio::test]
    async fn test_parse_response_close_delimited() {
        let data: &[u8] = b"HTTP/1.1 204 No Content\r\nServer: test\r\n\r\n";
        let mut reader = BufReader::new(data);
        let resp = read_response(&mut reader).await.unwrap();

        assert_eq!(resp.status, 204);
        assert!(resp.body.is_empty());
    }
}
