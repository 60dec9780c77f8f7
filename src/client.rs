//! HTTP client and request execution loop
//!
//! `Client` turns a request description into a response while handling
//! connection reuse, proxies, redirects, cookies and authentication
//! challenges. The heart is a small per-call state machine: acquire a
//! connection, write the request, parse the response head, then decide to
//! retry, follow a redirect, answer an auth challenge, honor a 305 proxy
//! hint, or hand the delimited body to the caller.

use super::auth::{default_authenticators, AuthChallenge, Authenticator, ChallengeContext};
use super::body::{BodyReader, RequestBody, Response, SessionWriter};
use super::chunked::ChunkedWriter;
use super::cookie::{self, CookieJar};
use super::message::{HttpRequest, Method, ResponseHead};
use super::parser::ResponseParser;
use super::pool::{Connection, ConnectionPool};
use super::proxy::{EnvProxyResolver, ProxyResolver};
use super::session::{Connector, NetConnector};
use super::{Error, Result};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Decides whether a failed request may be reissued
pub type RetryPredicate = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;

/// Produces (username, password) for a target URL and realm
pub type CredentialResolver = Arc<dyn Fn(&Url, &str) -> Option<(String, String)> + Send + Sync>;

/// Builder for [`Client`], collecting every tunable parameter
pub struct ClientBuilder {
    connector: Arc<dyn Connector>,
    proxy_resolver: Arc<dyn ProxyResolver>,
    server_credentials: Option<CredentialResolver>,
    proxy_credentials: Option<CredentialResolver>,
    authenticators: HashMap<String, Arc<dyn Authenticator>>,
    cookie_jar: Arc<CookieJar>,
    user_agent: String,
    max_retry_attempts: Option<u32>,
    max_redirect_depth: Option<u32>,
    retry_predicate: RetryPredicate,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder {
            connector: Arc::new(NetConnector::new()),
            proxy_resolver: Arc::new(EnvProxyResolver::new()),
            server_credentials: None,
            proxy_credentials: None,
            authenticators: default_authenticators(),
            cookie_jar: cookie::global_jar(),
            user_agent: format!("httpcall/{}", env!("CARGO_PKG_VERSION")),
            max_retry_attempts: Some(1),
            max_redirect_depth: Some(5),
            retry_predicate: Arc::new(|req: &HttpRequest| req.method().is_idempotent()),
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the transport connector
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Replace the proxy resolver
    pub fn proxy_resolver(mut self, resolver: impl ProxyResolver + 'static) -> Self {
        self.proxy_resolver = Arc::new(resolver);
        self
    }

    /// Credentials for 401 challenges from origin servers
    pub fn server_credentials<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Url, &str) -> Option<(String, String)> + Send + Sync + 'static,
    {
        self.server_credentials = Some(Arc::new(resolver));
        self
    }

    /// Credentials for 407 challenges from proxies
    pub fn proxy_credentials<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Url, &str) -> Option<(String, String)> + Send + Sync + 'static,
    {
        self.proxy_credentials = Some(Arc::new(resolver));
        self
    }

    /// Register an authenticator for a scheme token
    pub fn authenticator(
        mut self,
        scheme: impl Into<String>,
        authenticator: impl Authenticator + 'static,
    ) -> Self {
        self.authenticators
            .insert(scheme.into().to_ascii_lowercase(), Arc::new(authenticator));
        self
    }

    /// Use a specific cookie jar instead of the process-global one
    pub fn cookie_jar(mut self, jar: Arc<CookieJar>) -> Self {
        self.cookie_jar = jar;
        self
    }

    /// The User-Agent header value
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Transport retry budget; `None` retries without bound
    pub fn max_retry_attempts(mut self, max: Option<u32>) -> Self {
        self.max_retry_attempts = max;
        self
    }

    /// Redirect depth budget; `None` follows without bound
    pub fn max_redirect_depth(mut self, max: Option<u32>) -> Self {
        self.max_redirect_depth = max;
        self
    }

    /// Replace the retry predicate (default: idempotent methods only)
    pub fn retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&HttpRequest) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Arc::new(predicate);
        self
    }

    pub fn build(self) -> Client {
        Client {
            pool: ConnectionPool::new(),
            connector: self.connector,
            proxy_resolver: self.proxy_resolver,
            server_credentials: self.server_credentials,
            proxy_credentials: self.proxy_credentials,
            authenticators: self.authenticators,
            cookie_jar: self.cookie_jar,
            user_agent: self.user_agent,
            max_retry_attempts: self.max_retry_attempts,
            max_redirect_depth: self.max_redirect_depth,
            retry_predicate: self.retry_predicate,
        }
    }
}

/// Outcome of one wire round
enum Round<T> {
    /// Terminal: the reader ran and produced a value
    Done(T, ResponseHead),
    /// Follow a redirect; 303 additionally coerces the method to GET
    Redirect { location: String, coerce_get: bool },
    /// 305: retry the same request through the indicated proxy
    UseProxy(Url),
    /// Credentials were attached; reissue the request
    Authenticated,
}

/// Blocking HTTP/1.1 client
pub struct Client {
    pool: ConnectionPool,
    connector: Arc<dyn Connector>,
    proxy_resolver: Arc<dyn ProxyResolver>,
    server_credentials: Option<CredentialResolver>,
    proxy_credentials: Option<CredentialResolver>,
    authenticators: HashMap<String, Arc<dyn Authenticator>>,
    cookie_jar: Arc<CookieJar>,
    user_agent: String,
    max_retry_attempts: Option<u32>,
    max_redirect_depth: Option<u32>,
    retry_predicate: RetryPredicate,
}

impl Client {
    /// A client with default parameters
    pub fn new() -> Self {
        ClientBuilder::default().build()
    }

    /// Start configuring a client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The cookie jar this client reads and writes
    pub fn cookie_jar(&self) -> &Arc<CookieJar> {
        &self.cookie_jar
    }

    /// Close and evict the pooled connection for a URL
    pub fn close_connection(&mut self, uri: &Url) -> bool {
        self.pool.close(uri)
    }

    /// Close and evict every pooled connection
    pub fn close_all_connections(&mut self) {
        self.pool.close_all();
    }

    /// Whether an idle connection for the URL is pooled (mainly for tests)
    pub fn has_connection(&self, uri: &Url) -> bool {
        self.pool.contains(uri)
    }

    /// Fetch a URL with GET, buffering the whole body
    ///
    /// Non-2xx terminal statuses become errors: 4xx is `ClientError`, 5xx
    /// is `ServerError`, anything else non-2xx is `UnexpectedResponse`.
    pub fn get(&mut self, uri: &str) -> Result<(Vec<u8>, Url, ResponseHead)> {
        let url = Url::parse(uri)?;
        self.fetch(HttpRequest::new(Method::Get, url), RequestBody::None)
    }

    /// POST a body to a URL, buffering the whole response body
    ///
    /// Classifies non-2xx statuses like [`Client::get`].
    pub fn post(
        &mut self,
        uri: &str,
        body: impl Into<RequestBody>,
    ) -> Result<(Vec<u8>, Url, ResponseHead)> {
        let url = Url::parse(uri)?;
        self.fetch(HttpRequest::new(Method::Post, url), body.into())
    }

    /// Issue a request for a URL: POST when a body is supplied, GET otherwise
    ///
    /// The [`RequestBody`] variants carry the body-shape dispatch: literal
    /// bytes, urlencoded form fields, multipart parts, or a streaming
    /// callback.
    pub fn request<T, F>(
        &mut self,
        uri: Url,
        body: Option<RequestBody>,
        reader: F,
    ) -> Result<(T, Url, ResponseHead)>
    where
        F: FnOnce(&mut Response<'_>) -> Result<T>,
    {
        let method = if body.is_some() {
            Method::Post
        } else {
            Method::Get
        };
        self.call_with_response(
            HttpRequest::new(method, uri),
            body.unwrap_or(RequestBody::None),
            reader,
        )
    }

    fn fetch(
        &mut self,
        request: HttpRequest,
        body: RequestBody,
    ) -> Result<(Vec<u8>, Url, ResponseHead)> {
        let (bytes, uri, head) =
            self.call_with_response(request, body, |response| response.read_to_vec())?;

        let status = head.status();
        if status.is_success() {
            Ok((bytes, uri, head))
        } else if status.is_client_error() {
            Err(Error::ClientError {
                status: status.code(),
                uri: uri.to_string(),
            })
        } else if status.is_server_error() {
            Err(Error::ServerError {
                status: status.code(),
                uri: uri.to_string(),
            })
        } else {
            Err(Error::UnexpectedResponse {
                status: status.code(),
                uri: uri.to_string(),
            })
        }
    }

    /// The lowest-level driver
    ///
    /// Runs the execution loop until a terminal response hands the body to
    /// `reader`. Returns the reader's value, the effective URL after
    /// redirects, and the terminal response head. The body is serialized
    /// exactly once per wire attempt; retries, redirects and auth
    /// re-challenges serialize it again.
    pub fn call_with_response<T, F>(
        &mut self,
        request: HttpRequest,
        body: RequestBody,
        reader: F,
    ) -> Result<(T, Url, ResponseHead)>
    where
        F: FnOnce(&mut Response<'_>) -> Result<T>,
    {
        let mut req = request;
        let mut body = body;
        let mut send_body = !body.is_none();
        let mut reader = Some(reader);
        let mut proxy_override: Option<Url> = None;
        let mut attempts: u32 = 0;
        let mut redirects: u32 = 0;

        loop {
            let auth_budget_left = self
                .max_retry_attempts
                .map_or(true, |max| attempts + 1 <= max);

            let round = self.round(
                &mut req,
                &mut body,
                send_body,
                &mut proxy_override,
                auth_budget_left,
                &mut reader,
            );

            match round {
                Ok(Round::Done(value, head)) => {
                    return Ok((value, req.uri().clone(), head));
                }

                Ok(Round::Redirect {
                    location,
                    coerce_get,
                }) => {
                    redirects += 1;
                    if let Some(max) = self.max_redirect_depth {
                        if redirects > max {
                            return Err(Error::RedirectDepthExceeded {
                                uri: req.uri().to_string(),
                            });
                        }
                    }
                    let next = req.uri().join(&location)?;
                    debug!("following redirect to {}", next);
                    req.set_uri(next);
                    if coerce_get {
                        req.set_method(Method::Get);
                        send_body = false;
                    }
                }

                Ok(Round::UseProxy(proxy)) => {
                    debug!("305 Use Proxy: reissuing via {}", proxy);
                    proxy_override = Some(proxy);
                }

                Ok(Round::Authenticated) => {
                    attempts += 1;
                }

                Err(e) if e.is_transport() => {
                    attempts += 1;
                    let within = self.max_retry_attempts.map_or(true, |max| attempts <= max);
                    if within && (self.retry_predicate.as_ref())(&req) {
                        debug!("transport failure, retrying (attempt {}): {}", attempts, e);
                        continue;
                    }
                    return Err(e);
                }

                Err(e) => return Err(e),
            }
        }
    }

    /// Open a fresh connection, direct or through a proxy
    fn open(&self, uri: &Url, proxy: Option<Url>) -> Result<Connection> {
        let dial_target = proxy.as_ref().unwrap_or(uri);
        let session = self.connector.connect(dial_target)?;

        let mut base = uri.clone();
        base.set_path("/");
        base.set_query(None);
        base.set_fragment(None);
        let _ = base.set_username("");
        let _ = base.set_password(None);

        debug!(
            "opened connection to {}{}",
            base,
            proxy
                .as_ref()
                .map(|p| format!(" via proxy {}", p))
                .unwrap_or_default()
        );
        Ok(Connection::new(base, session, proxy))
    }

    /// One iteration of the execution loop
    ///
    /// The connection used by the round is always disposed of before this
    /// returns: pooled when the outcome and keep-alive rules allow, closed
    /// otherwise (always closed on error).
    fn round<T, F>(
        &mut self,
        req: &mut HttpRequest,
        body: &mut RequestBody,
        send_body: bool,
        proxy_override: &mut Option<Url>,
        auth_budget_left: bool,
        reader: &mut Option<F>,
    ) -> Result<Round<T>>
    where
        F: FnOnce(&mut Response<'_>) -> Result<T>,
    {
        // A 305 override is consumed by exactly one resolver consult
        let proxy = match proxy_override.take() {
            Some(p) => Some(p),
            None => self.proxy_resolver.proxy_for(req.uri()),
        };

        // A pooled connection is only good if it was opened through the
        // same proxy decision
        let mut conn = match self.pool.checkout(req.uri()) {
            Some(pooled) if pooled.proxy() == proxy.as_ref() => pooled,
            Some(mut mismatched) => {
                mismatched.close();
                self.open(req.uri(), proxy)?
            }
            None => self.open(req.uri(), proxy)?,
        };

        match self.round_on(&mut conn, req, body, send_body, auth_budget_left, reader) {
            Ok((outcome, reusable)) => {
                if reusable {
                    self.pool.checkin(conn);
                } else {
                    conn.close();
                }
                Ok(outcome)
            }
            Err(e) => {
                // The stream state is unknown; never reuse it
                conn.close();
                Err(e)
            }
        }
    }

    /// Write the request and handle the response on an open connection
    fn round_on<T, F>(
        &self,
        conn: &mut Connection,
        req: &mut HttpRequest,
        body: &mut RequestBody,
        send_body: bool,
        auth_budget_left: bool,
        reader: &mut Option<F>,
    ) -> Result<(Round<T>, bool)>
    where
        F: FnOnce(&mut Response<'_>) -> Result<T>,
    {
        let proxied = conn.proxy().is_some();

        // Default headers merge under the caller's
        let mut headers = req.headers().clone();
        headers.set_if_absent("Host", req.host_header());
        headers.set_if_absent("User-Agent", self.user_agent.clone());
        if !headers.contains("Cookie") {
            let cookies = self.cookie_jar.cookies_for(req.uri());
            if let Some(value) = cookie::request_header(&cookies) {
                headers.insert("Cookie", value);
            }
        }

        let mut use_chunked = false;
        if send_body && !body.is_none() {
            if let Some(content_type) = body.content_type() {
                headers.set_if_absent("Content-Type", content_type);
            }
            match body.content_length()? {
                Some(length) => headers.set_if_absent("Content-Length", length.to_string()),
                None => {
                    headers.set_if_absent("Transfer-Encoding", "chunked");
                    use_chunked = true;
                }
            }
        }

        let head_bytes = req.write_head(proxied, &headers);
        conn.session_mut().write_all(&head_bytes)?;

        // The body writer runs exactly once per round
        if send_body && !body.is_none() {
            let mut sink = SessionWriter(conn.session_mut());
            if use_chunked {
                let mut encoder = ChunkedWriter::new(&mut sink);
                body.write_to(&mut encoder)?;
                encoder.finish()?;
            } else {
                body.write_to(&mut sink)?;
            }
        }

        // Parse the response head
        let mut parser = ResponseParser::new();
        let head = loop {
            let mut buf = [0u8; 8192];
            let n = conn.session_mut().read(&mut buf)?;
            if n == 0 {
                return Err(Error::PrematureDisconnection {
                    uri: req.uri().to_string(),
                });
            }
            if let Some(head) = parser.parse(&buf[..n])? {
                break head;
            }
        };

        // Cookie processing happens before status dispatch
        self.cookie_jar.ingest(head.headers(), req.uri());

        let request_keep_alive = req.keep_alive();
        let code = head.status().code();

        // Authentication decisions mutate the request, so they run before
        // the body reader borrows the connection
        let authenticated = match code {
            401 | 407 if auth_budget_left => self.try_authenticate(req, body, &head, code, proxied)?,
            _ => false,
        };

        let prefix = parser.into_remainder();
        let mut body_reader = BodyReader::new(conn.session_mut(), prefix, &head, req.method())?;

        match code {
            301 | 302 | 303 | 307 => {
                let location = head
                    .location()
                    .ok_or_else(|| Error::MissingLocation {
                        status: code,
                        uri: req.uri().to_string(),
                    })?
                    .to_string();
                body_reader.drain()?;
                let reusable =
                    request_keep_alive && head.keep_alive() && body_reader.is_exhausted();
                Ok((
                    Round::Redirect {
                        location,
                        coerce_get: code == 303,
                    },
                    reusable,
                ))
            }

            305 => {
                let location = head.location().ok_or_else(|| Error::MissingLocation {
                    status: code,
                    uri: req.uri().to_string(),
                })?;
                let proxy = req.uri().join(location)?;
                body_reader.drain()?;
                let reusable =
                    request_keep_alive && head.keep_alive() && body_reader.is_exhausted();
                Ok((Round::UseProxy(proxy), reusable))
            }

            401 | 407 if authenticated => {
                body_reader.drain()?;
                let reusable =
                    request_keep_alive && head.keep_alive() && body_reader.is_exhausted();
                Ok((Round::Authenticated, reusable))
            }

            _ => {
                // Terminal: the reader owns the body; no drain afterwards
                let reader_fn = reader.take().unwrap();
                let mut response = Response::new(head.clone(), body_reader);
                let value = reader_fn(&mut response)?;
                let reusable = request_keep_alive
                    && head.keep_alive()
                    && response.body_mut().is_exhausted();
                Ok((Round::Done(value, head), reusable))
            }
        }
    }

    /// Answer a 401/407 by attaching a credential header to the request
    ///
    /// Returns false when no challenge, resolver or credentials are
    /// available (the response then goes to the reader untouched); an
    /// unregistered scheme is an error.
    fn try_authenticate(
        &self,
        req: &mut HttpRequest,
        body: &mut RequestBody,
        head: &ResponseHead,
        code: u16,
        proxied: bool,
    ) -> Result<bool> {
        let (challenge_header, credential_header, resolver) = if code == 407 {
            (
                "Proxy-Authenticate",
                "Proxy-Authorization",
                &self.proxy_credentials,
            )
        } else {
            ("WWW-Authenticate", "Authorization", &self.server_credentials)
        };

        let Some(value) = head.headers().get(challenge_header) else {
            return Ok(false);
        };
        let Some(challenge) = AuthChallenge::parse(value) else {
            return Ok(false);
        };

        let Some(authenticator) = self
            .authenticators
            .get(&challenge.scheme().to_ascii_lowercase())
        else {
            return Err(Error::UnknownAuthType {
                scheme: challenge.scheme().to_string(),
                uri: req.uri().to_string(),
            });
        };

        let Some(resolver) = resolver else {
            return Ok(false);
        };
        let Some((username, password)) = (resolver.as_ref())(req.uri(), challenge.realm()) else {
            return Ok(false);
        };

        let target = req.request_target(proxied);
        let mut ctx = ChallengeContext {
            challenge: &challenge,
            method: req.method(),
            target: &target,
            username: &username,
            password: &password,
            body,
        };
        let header_value = authenticator.credentials_header(&mut ctx)?;

        debug!(
            "answering {} challenge ({}) for {}",
            challenge.scheme(),
            challenge_header,
            req.uri()
        );
        req.headers_mut().set(credential_header, header_value);
        Ok(true)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let client = Client::new();
        assert_eq!(client.max_retry_attempts, Some(1));
        assert_eq!(client.max_redirect_depth, Some(5));
        assert!(client.user_agent.starts_with("httpcall/"));
        assert!(client.authenticators.contains_key("basic"));
        assert!(client.authenticators.contains_key("digest"));
    }

    #[test]
    fn test_default_retry_predicate_is_idempotence() {
        let client = Client::new();
        let get = HttpRequest::new(Method::Get, Url::parse("http://a/").unwrap());
        let post = HttpRequest::new(Method::Post, Url::parse("http://a/").unwrap());
        assert!((client.retry_predicate.as_ref())(&get));
        assert!(!(client.retry_predicate.as_ref())(&post));
    }

    #[test]
    fn test_builder_overrides() {
        let jar = Arc::new(CookieJar::new());
        let client = Client::builder()
            .user_agent("custom/1.0")
            .max_retry_attempts(None)
            .max_redirect_depth(Some(2))
            .cookie_jar(jar.clone())
            .retry_predicate(|_| true)
            .build();

        assert_eq!(client.user_agent, "custom/1.0");
        assert_eq!(client.max_retry_attempts, None);
        assert_eq!(client.max_redirect_depth, Some(2));
        assert!(Arc::ptr_eq(client.cookie_jar(), &jar));
        let post = HttpRequest::new(Method::Post, Url::parse("http://a/").unwrap());
        assert!((client.retry_predicate.as_ref())(&post));
    }
}
