//! HTTP message types
//!
//! This module defines requests and response heads. Request bodies travel
//! separately (see `body::RequestBody`) so they can be replayed across
//! retries, redirects and authentication re-challenges; response bodies are
//! exposed as delimited streams rather than buffered into the message.

use super::{headers::Headers, Error, Result, CRLF};
use std::fmt;
use url::Url;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    /// Parse method from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "CONNECT" => Ok(Method::Connect),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "PATCH" => Ok(Method::Patch),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }

    /// Convert method to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }

    /// Whether the method is idempotent (RFC 2616 section 9.1.2)
    ///
    /// The default retry predicate only retries idempotent requests.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            Method::Get
                | Method::Head
                | Method::Put
                | Method::Delete
                | Method::Options
                | Method::Trace
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

impl Version {
    /// Parse version from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }

    /// Convert version to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
}

impl Status {
    /// Create a new status code
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(format!("Invalid status code: {}", code)))
        }
    }

    /// Get the status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Get the canonical reason phrase for this status code
    pub fn reason_phrase(&self) -> &'static str {
        match self.code {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            305 => "Use Proxy",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            410 => "Gone",
            411 => "Length Required",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            417 => "Expectation Failed",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    /// Check if this is an informational status (1xx)
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Check if this is a redirection status (3xx)
    pub fn is_redirection(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Check if this is a client error status (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Check if this is a server error status (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    pub const OK: Status = Status { code: 200 };
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

/// Does a `Connection` header assert the given token?
///
/// The header value is a comma-separated token list compared
/// case-insensitively.
fn connection_has_token(headers: &Headers, token: &str) -> bool {
    headers.values("Connection").any(|v| {
        v.split(',')
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    })
}

/// HTTP request
///
/// The target URL is carried in parsed form; the wire form is derived per
/// round by [`HttpRequest::request_target`], which never exposes fragment
/// or userinfo to the network.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    uri: Url,
    version: Version,
    headers: Headers,
}

impl HttpRequest {
    /// Create a new HTTP request
    pub fn new(method: Method, uri: Url) -> Self {
        HttpRequest {
            method,
            uri,
            version: Version::default(),
            headers: Headers::new(),
        }
    }

    /// Create a builder for constructing requests
    pub fn builder() -> HttpRequestBuilder {
        HttpRequestBuilder::default()
    }

    /// Get the request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Coerce the method (a 303 response rewrites the reissue to GET)
    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Get the target URL
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Replace the target URL (redirect following)
    pub fn set_uri(&mut self, uri: Url) {
        self.uri = uri;
    }

    /// Get the HTTP version
    pub fn version(&self) -> Version {
        self.version
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get mutable headers
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The Host header value: host, plus the port only when non-default
    pub fn host_header(&self) -> String {
        let host = self.uri.host_str().unwrap_or("");
        match self.uri.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// The request-target for the request line
    ///
    /// Origin-form (absolute path, `/` when the URL has none) for direct
    /// connections; absolute-form for proxied ones. Fragment and userinfo
    /// never appear in either form.
    pub fn request_target(&self, proxied: bool) -> String {
        if proxied {
            let mut wire = self.uri.clone();
            wire.set_fragment(None);
            let _ = wire.set_username("");
            let _ = wire.set_password(None);
            wire.to_string()
        } else {
            let path = self.uri.path();
            let mut target = if path.is_empty() {
                String::from("/")
            } else {
                path.to_string()
            };
            if let Some(query) = self.uri.query() {
                target.push('?');
                target.push_str(query);
            }
            target
        }
    }

    /// Serialize the request line and the given effective headers
    pub fn write_head(&self, proxied: bool, headers: &Headers) -> Vec<u8> {
        let mut buf = Vec::new();

        // Request line
        buf.extend_from_slice(self.method.as_str().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.request_target(proxied).as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.version.as_str().as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());

        headers.write_wire(&mut buf);

        // Empty line terminates the head
        buf.extend_from_slice(CRLF.as_bytes());
        buf
    }

    /// Whether this request permits connection reuse
    pub fn keep_alive(&self) -> bool {
        !connection_has_token(&self.headers, "close")
    }
}

/// Builder for HTTP requests
#[derive(Debug, Default)]
pub struct HttpRequestBuilder {
    method: Option<Method>,
    uri: Option<Url>,
    version: Option<Version>,
    headers: Headers,
}

impl HttpRequestBuilder {
    /// Set the HTTP method
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Set the target URL
    pub fn uri(mut self, uri: Url) -> Self {
        self.uri = Some(uri);
        self
    }

    /// Set the HTTP version
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Build the request
    ///
    /// Errors if no URL was supplied.
    pub fn build(self) -> Result<HttpRequest> {
        let uri = self
            .uri
            .ok_or_else(|| Error::Parse("request built without a URL".to_string()))?;
        Ok(HttpRequest {
            method: self.method.unwrap_or(Method::Get),
            uri,
            version: self.version.unwrap_or_default(),
            headers: self.headers,
        })
    }
}

/// Parsed response status line and headers
///
/// The body is not part of this type: the execution loop hands it to the
/// caller as a delimited stream positioned at the body boundary.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    version: Version,
    status: Status,
    reason: String,
    headers: Headers,
}

impl ResponseHead {
    /// Create a response head
    pub fn new(version: Version, status: Status, reason: String, headers: Headers) -> Self {
        ResponseHead {
            version,
            status,
            reason,
            headers,
        }
    }

    /// Get the HTTP version
    pub fn version(&self) -> Version {
        self.version
    }

    /// Get the status code
    pub fn status(&self) -> Status {
        self.status
    }

    /// Get the reason phrase
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The declared body length, if any
    pub fn content_length(&self) -> Result<Option<u64>> {
        match self.headers.get("Content-Length") {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| Error::Parse(format!("Invalid Content-Length: {}", v))),
        }
    }

    /// Whether the body uses chunked transfer encoding
    pub fn is_chunked(&self) -> bool {
        self.headers
            .values("Transfer-Encoding")
            .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")))
    }

    /// The Location header, if present
    pub fn location(&self) -> Option<&str> {
        self.headers.get("Location")
    }

    /// Whether this response permits connection reuse
    ///
    /// HTTP/1.1 is persistent unless `Connection: close`; HTTP/1.0 only
    /// with an explicit `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http11 => !connection_has_token(&self.headers, "close"),
            Version::Http10 => connection_has_token(&self.headers, "keep-alive"),
        }
    }
}
