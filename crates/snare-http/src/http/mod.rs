//! HTTP message model and per-connection protocol machinery

pub mod exchange;
pub mod forward;
pub mod handler;
pub mod parser;
pub mod proxy;

pub use handler::HttpHandler;

/// HTTP methods we recognize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Connect,
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Trace,
}

impl HttpMethod {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CONNECT" => Some(Self::Connect),
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "HEAD" => Some(Self::Head),
            "OPTIONS" => Some(Self::Options),
            "PATCH" => Some(Self::Patch),
            "TRACE" => Some(Self::Trace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Trace => "TRACE",
        }
    }
}

/// Derived value of the Connection header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpConnection {
    KeepAlive,
    Close,
}

/// HTTP request parsed from the client
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub uri: String,
    pub version: String,
    /// Headers in wire order; lookup is case-insensitive
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Case-insensitive header lookup returning the first match
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Derived Connection property; unset when the header is absent or
    /// carries an unrecognized value
    pub fn connection(&self) -> Option<HttpConnection> {
        match self.header("connection").map(str::to_lowercase).as_deref() {
            Some("keep-alive") => Some(HttpConnection::KeepAlive),
            Some("close") => Some(HttpConnection::Close),
            _ => None,
        }
    }

    /// Serialize back to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(
            format!("{} {} {}\r\n", self.method.as_str(), self.uri, self.version).as_bytes(),
        );
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        if let Some(body) = &self.body {
            out.extend_from_slice(body);
        }
        out
    }
}

/// HTTP response, either parsed from an origin server or synthesized
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    /// Raw payload bytes as they arrived; chunked framing is preserved so
    /// relayed responses reproduce verbatim
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn new(status: u16, reason: &str) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status,
            reason: reason.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Tunnel acknowledgment sent before any CONNECT forwarding begins
    pub fn connection_established() -> Self {
        Self::new(200, "Connection Established")
    }

    /// Stub answer of credential-stealer mode
    pub fn ok_empty() -> Self {
        let mut resp = Self::new(200, "OK");
        resp.headers
            .push(("Content-Length".to_string(), "0".to_string()));
        resp
    }

    /// Auth failure answer with a short plaintext reason
    pub fn forbidden(reason: &str) -> Self {
        let mut resp = Self::new(403, "Forbidden");
        resp.headers
            .push(("Content-Type".to_string(), "text/plain".to_string()));
        resp.headers
            .push(("Content-Length".to_string(), reason.len().to_string()));
        resp.headers
            .push(("Connection".to_string(), "close".to_string()));
        resp.body = reason.as_bytes().to_vec();
        resp
    }

    /// Challenge round of a multi-step mechanism. Proxy role challenges with
    /// 407/Proxy-Authenticate, server role with 401/WWW-Authenticate.
    pub fn auth_challenge(is_proxy: bool, value: &str) -> Self {
        let mut resp = if is_proxy {
            Self::new(407, "Proxy Authentication Required")
        } else {
            Self::new(401, "Unauthorized")
        };
        let header = if is_proxy {
            "Proxy-Authenticate"
        } else {
            "WWW-Authenticate"
        };
        resp.headers.push((header.to_string(), value.to_string()));
        resp.headers
            .push(("Content-Length".to_string(), "0".to_string()));
        resp
    }

    /// Case-insensitive header lookup returning the first match
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize back to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(
            format!("{} {} {}\r\n", self.version, self.status, self.reason).as_bytes(),
        );
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}
