//! httpcall - convenient blocking HTTP/1.1 client
//!
//! This crate drives an application's request description to a response
//! while transparently handling connection reuse, proxies, redirects,
//! cookies, and authentication challenges.
//!
//! # Architecture
//!
//! All I/O is blocking and goes through a session operations abstraction
//! that allows seamless switching between plain TCP and TLS connections:
//!
//! - `SessionOps` trait defines transport operations (poll, read, peek,
//!   write, close)
//! - `Connection` pairs a session with the base URL it serves and is owned
//!   by a per-thread `ConnectionPool` between requests
//! - `Client` runs the request execution loop: acquire a connection, write
//!   the request, parse the response head, then retry / redirect /
//!   authenticate / hand the delimited body to the caller
//!
//! # Examples
//!
//! ```no_run
//! use httpcall::Client;
//!
//! let mut client = Client::new();
//! let (body, uri, head) = client.get("http://example.com/").unwrap();
//! assert_eq!(head.status().code(), 200);
//! println!("{} bytes from {}", body.len(), uri);
//! ```
//!
//! Lower-level control over the body stream:
//!
//! ```no_run
//! use std::io::Read;
//! use httpcall::{Client, HttpRequest, Method, RequestBody};
//! use url::Url;
//!
//! let mut client = Client::new();
//! let url = Url::parse("http://example.com/data").unwrap();
//! let request = HttpRequest::new(Method::Get, url);
//! let (len, _uri, _head) = client
//!     .call_with_response(request, RequestBody::None, |response| {
//!         let mut buf = Vec::new();
//!         response.read_to_end(&mut buf)?;
//!         Ok(buf.len())
//!     })
//!     .unwrap();
//! println!("read {} bytes", len);
//! ```

pub mod auth;
pub mod body;
pub mod chunked;
pub mod client;
pub mod cookie;
pub mod headers;
pub mod message;
pub mod multipart;
pub mod parser;
pub mod pool;
pub mod proxy;
pub mod session;
pub mod tls;

pub use auth::{Authenticator, BasicAuth, ChallengeContext, DigestAuth};
pub use body::{BodyReader, RequestBody, Response};
pub use client::{Client, ClientBuilder};
pub use cookie::{global_jar, Cookie, CookieJar};
pub use headers::Headers;
pub use message::{HttpRequest, Method, ResponseHead, Status, Version};
pub use multipart::{MultipartBody, Part};
pub use pool::{Connection, ConnectionPool};
pub use proxy::{EnvProxyResolver, ProxyResolver};
pub use session::{Connector, NetConnector, SessionOps};

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Client operation errors
///
/// Transport-class errors (see [`Error::is_transport`]) are candidates for
/// the execution loop's retry rule; everything else surfaces immediately.
/// Whatever the class, the connection an error occurred on is closed and
/// evicted from the pool before the error propagates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] openssl::error::ErrorStack),

    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("no TLS provider available for {uri}")]
    MissingTlsProvider { uri: String },

    #[error("unsupported URI scheme {scheme:?} in {uri}")]
    UnsupportedScheme { scheme: String, uri: String },

    #[error("invalid URI: {0}")]
    InvalidUri(#[from] url::ParseError),

    #[error("server closed connection before sending a response: {uri}")]
    PrematureDisconnection { uri: String },

    #[error("maximum redirect depth exceeded at {uri}")]
    RedirectDepthExceeded { uri: String },

    #[error("{status} response without a Location header: {uri}")]
    MissingLocation { status: u16, uri: String },

    #[error("no authenticator registered for scheme {scheme:?} ({uri})")]
    UnknownAuthType { scheme: String, uri: String },

    #[error("client error {status} from {uri}")]
    ClientError { status: u16, uri: String },

    #[error("server error {status} from {uri}")]
    ServerError { status: u16, uri: String },

    #[error("unexpected response {status} from {uri}")]
    UnexpectedResponse { status: u16, uri: String },

    #[error("form data error: {0}")]
    FormData(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,
}

impl Error {
    /// Whether this error came from the transport layer.
    ///
    /// Transport errors are retried while the attempt budget and the retry
    /// predicate allow; protocol and logic errors never retry.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ConnectionClosed
                | Error::Timeout
                | Error::Handshake(_)
                | Error::PrematureDisconnection { .. }
        )
    }
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 64;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default HTTPS port
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
