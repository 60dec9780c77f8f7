//! Cookie jar
//!
//! Storage, matching and Set-Cookie processing per RFC 2109 (`Set-Cookie`)
//! and RFC 2965 (`Set-Cookie2`). A cookie's identity is the triple
//! (name, domain, path): name and domain compare case-insensitively, path
//! exactly; storing an existing identity replaces the entry in place,
//! preserving its position.
//!
//! The jar is internally synchronized: each operation is atomic with
//! respect to the others. One process-global jar is available through
//! [`global_jar`], and clients accept any jar instance instead.

use super::headers::Headers;
use log::debug;
use std::sync::{Arc, Mutex, OnceLock};
use url::Url;

/// A stored cookie together with its scope attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Domain pattern: the origin host, or a `.suffix` pattern
    pub domain: String,
    /// Absolute path prefix the cookie applies to
    pub path: String,
    /// Ports the cookie may be sent to; `None` means any
    pub ports: Option<Vec<u16>>,
    /// Only send over https/shttp
    pub secure: bool,
    /// RFC 2965 version attribute (0 for old-style cookies)
    pub version: u32,
}

impl Cookie {
    /// Create a cookie scoped to `domain` and `path`
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: path.into(),
            ports: None,
            secure: false,
            version: 0,
        }
    }

    fn same_identity(&self, name: &str, domain: &str, path: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            && self.domain.eq_ignore_ascii_case(domain)
            && self.path == path
    }
}

/// Does `pattern` cover `host`?
///
/// Exact case-insensitive equality, or a pattern with a leading dot that
/// is a case-insensitive suffix of the host.
fn domain_match(host: &str, pattern: &str) -> bool {
    if pattern.eq_ignore_ascii_case(host) {
        return true;
    }
    let (host, pattern) = (host.as_bytes(), pattern.as_bytes());
    pattern.first() == Some(&b'.')
        && host.len() > pattern.len()
        && host[host.len() - pattern.len()..].eq_ignore_ascii_case(pattern)
}

/// Is the host portion before the domain match itself dotted?
///
/// `a.b.example.com` against `.example.com` leaves the prefix `a.b`,
/// which still contains a dot: such a cookie would leak to sibling
/// subdomains and is rejected.
fn prefix_contains_dot(host: &str, pattern: &str) -> bool {
    if pattern.eq_ignore_ascii_case(host) {
        return false;
    }
    let prefix_len = host.len().saturating_sub(pattern.len());
    host.as_bytes()[..prefix_len].contains(&b'.')
}

/// Does the stored path cover the request path?
///
/// Segment-wise prefix: every non-empty stored segment must equal the
/// request segment at the same position; a trailing empty segment
/// (a `/`-terminated path) matches any continuation.
fn path_match(stored: &str, request: &str) -> bool {
    if !stored.starts_with('/') {
        return false;
    }
    let stored_segs: Vec<&str> = stored.split('/').skip(1).collect();
    let request_segs: Vec<&str> = request.split('/').skip(1).collect();

    for (i, seg) in stored_segs.iter().enumerate() {
        if seg.is_empty() && i == stored_segs.len() - 1 {
            return true;
        }
        match request_segs.get(i) {
            Some(r) if r == seg => {}
            _ => return false,
        }
    }
    true
}

fn path_segment_count(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Process-wide cookie store
pub struct CookieJar {
    entries: Mutex<Vec<Cookie>>,
}

impl CookieJar {
    /// Create an empty jar
    pub fn new() -> Self {
        CookieJar {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Store a cookie, replacing any existing one with the same identity
    pub fn store(&self, cookie: Cookie) {
        let mut entries = self.entries.lock().unwrap();
        match entries
            .iter_mut()
            .find(|c| c.same_identity(&cookie.name, &cookie.domain, &cookie.path))
        {
            Some(slot) => *slot = cookie,
            None => entries.push(cookie),
        }
    }

    /// Remove the cookie with the given identity
    pub fn delete(&self, name: &str, domain: &str, path: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|c| !c.same_identity(name, domain, path));
        entries.len() != before
    }

    /// Remove every stored cookie
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Number of stored cookies
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the jar is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// The cookies to send with a request to `uri`
    ///
    /// Filters on domain, port, path and the secure flag, and orders the
    /// result by ascending stored-path segment count (most general
    /// first); insertion order breaks ties.
    pub fn cookies_for(&self, uri: &Url) -> Vec<Cookie> {
        let host = match uri.host_str() {
            Some(h) => h,
            None => return Vec::new(),
        };
        let port = uri.port_or_known_default();
        let path = uri.path();
        let secure_scheme = matches!(uri.scheme(), "https" | "shttp");

        let entries = self.entries.lock().unwrap();
        let mut matched: Vec<Cookie> = entries
            .iter()
            .filter(|c| domain_match(host, &c.domain))
            .filter(|c| match (&c.ports, port) {
                (None, _) => true,
                (Some(ports), Some(p)) => ports.contains(&p),
                (Some(_), None) => false,
            })
            .filter(|c| path_match(&c.path, path))
            .filter(|c| !c.secure || secure_scheme)
            .cloned()
            .collect();

        matched.sort_by_key(|c| path_segment_count(&c.path));
        matched
    }

    /// Process the `Set-Cookie` and `Set-Cookie2` headers of a response
    ///
    /// Invalid cookies (bad domain scope, path that does not cover the
    /// request, missing RFC 2965 version) are dropped silently.
    pub fn ingest(&self, headers: &Headers, uri: &Url) {
        for value in headers.values("Set-Cookie") {
            for raw in split_cookie_list(value) {
                if let Some(cookie) = parse_cookie(raw, uri, false) {
                    debug!("storing cookie {}={} for {}", cookie.name, cookie.value, cookie.domain);
                    self.store(cookie);
                }
            }
        }
        for value in headers.values("Set-Cookie2") {
            for raw in split_cookie_list(value) {
                if let Some(cookie) = parse_cookie(raw, uri, true) {
                    debug!("storing cookie2 {}={} for {}", cookie.name, cookie.value, cookie.domain);
                    self.store(cookie);
                }
            }
        }
    }
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-global jar new clients use by default
pub fn global_jar() -> Arc<CookieJar> {
    static GLOBAL: OnceLock<Arc<CookieJar>> = OnceLock::new();
    GLOBAL.get_or_init(|| Arc::new(CookieJar::new())).clone()
}

/// Format matched cookies as a `Cookie` request header value
pub fn request_header(cookies: &[Cookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Split a header value possibly carrying several cookies
///
/// A comma separates cookies only when what follows looks like the start
/// of a new `name=` pair; commas inside quoted values or date strings do
/// not split.
fn split_cookie_list(value: &str) -> Vec<&str> {
    let bytes = value.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                if starts_new_cookie(&value[i + 1..]) {
                    parts.push(value[start..i].trim());
                    start = i + 1;
                }
            }
            _ => {}
        }
    }
    parts.push(value[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Does the remainder begin with `token=`?
fn starts_new_cookie(rest: &str) -> bool {
    let rest = rest.trim_start();
    let token_len = rest
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'$'))
        .count();
    token_len > 0 && rest[token_len..].starts_with('=')
}

fn trim_quotes(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Parse one cookie against the request URL it arrived on
fn parse_cookie(raw: &str, uri: &Url, rfc2965: bool) -> Option<Cookie> {
    let host = uri.host_str()?;
    let mut attrs = raw.split(';');

    let (name, value) = attrs.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || name.starts_with('$') {
        return None;
    }

    let mut cookie = Cookie::new(name, trim_quotes(value), host, uri.path());
    let mut has_version = false;
    let mut explicit_domain = false;
    let mut port_attr: Option<Option<String>> = None;

    for attr in attrs {
        let attr = attr.trim();
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), Some(trim_quotes(v).to_string())),
            None => (attr, None),
        };
        match key.to_ascii_lowercase().as_str() {
            "path" => {
                if let Some(v) = val {
                    cookie.path = v;
                }
            }
            "domain" => {
                if let Some(v) = val {
                    if !v.is_empty() {
                        cookie.domain = v;
                        explicit_domain = true;
                    }
                }
            }
            "secure" => cookie.secure = true,
            "version" => {
                if let Some(v) = val {
                    cookie.version = v.parse().unwrap_or(0);
                    has_version = true;
                }
            }
            "port" => port_attr = Some(val),
            _ => {}
        }
    }

    if rfc2965 {
        // Version is mandatory in Set-Cookie2
        if !has_version {
            return None;
        }
        // An explicit domain must be .local or carry an embedded dot
        if explicit_domain {
            let d = &cookie.domain;
            let embedded_dot = d.as_bytes().len() > 1 && d.as_bytes()[1..].contains(&b'.');
            if !d.eq_ignore_ascii_case(".local") && !embedded_dot {
                return None;
            }
        }
        match port_attr {
            // Bare Port attribute restricts to the request port
            Some(None) => cookie.ports = uri.port_or_known_default().map(|p| vec![p]),
            Some(Some(list)) => {
                let ports: Vec<u16> = list
                    .split(',')
                    .filter_map(|p| p.trim().parse().ok())
                    .collect();
                if ports.is_empty() {
                    return None;
                }
                cookie.ports = Some(ports);
            }
            None => {}
        }
    }

    // Scope validation against the request URL
    if !domain_match(host, &cookie.domain) {
        return None;
    }
    if explicit_domain && prefix_contains_dot(host, &cookie.domain) {
        return None;
    }
    if !path_match(&cookie.path, uri.path()) {
        return None;
    }

    Some(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn ingest_one(jar: &CookieJar, header: &str, uri: &str) {
        let mut headers = Headers::new();
        headers.insert("Set-Cookie", header);
        jar.ingest(&headers, &url(uri));
    }

    #[test]
    fn test_domain_match() {
        assert!(domain_match("example.com", "example.com"));
        assert!(domain_match("example.com", "EXAMPLE.com"));
        assert!(domain_match("www.example.com", ".example.com"));
        assert!(!domain_match("example.com", ".example.com"));
        assert!(!domain_match("badexample.com", "example.com"));
        assert!(!domain_match("evil-example.com", ".example.com"));
    }

    #[test]
    fn test_prefix_contains_dot() {
        assert!(!prefix_contains_dot("www.example.com", ".example.com"));
        assert!(prefix_contains_dot("a.b.example.com", ".example.com"));
        assert!(!prefix_contains_dot("example.com", "example.com"));
    }

    #[test]
    fn test_path_match() {
        assert!(path_match("/", "/anything"));
        assert!(path_match("/a", "/a"));
        assert!(path_match("/a", "/a/b"));
        assert!(!path_match("/a", "/ab"));
        assert!(!path_match("/a/b", "/a"));
        assert!(path_match("/a/", "/a/x/y"));
        assert!(path_match("/a/", "/a"));
        assert!(!path_match("relative", "/a"));
    }

    #[test]
    fn test_store_replaces_in_place() {
        let jar = CookieJar::new();
        jar.store(Cookie::new("a", "1", "example.com", "/"));
        jar.store(Cookie::new("b", "2", "example.com", "/"));
        jar.store(Cookie::new("A", "3", "EXAMPLE.com", "/"));

        let cookies = jar.cookies_for(&url("http://example.com/"));
        assert_eq!(cookies.len(), 2);
        // Replacement kept the original position
        assert_eq!(cookies[0].name, "A");
        assert_eq!(cookies[0].value, "3");
        assert_eq!(cookies[1].name, "b");
    }

    #[test]
    fn test_delete() {
        let jar = CookieJar::new();
        jar.store(Cookie::new("a", "1", "example.com", "/"));
        assert!(jar.delete("a", "example.com", "/"));
        assert!(!jar.delete("a", "example.com", "/"));
        assert!(jar.is_empty());
    }

    #[test]
    fn test_cookies_for_ordering() {
        let jar = CookieJar::new();
        jar.store(Cookie::new("deep", "1", "example.com", "/a/b/c"));
        jar.store(Cookie::new("shallow", "2", "example.com", "/"));
        jar.store(Cookie::new("mid", "3", "example.com", "/a"));

        let names: Vec<String> = jar
            .cookies_for(&url("http://example.com/a/b/c/d"))
            .into_iter()
            .map(|c| c.name)
            .collect();
        // Most general first
        assert_eq!(names, vec!["shallow", "mid", "deep"]);
    }

    #[test]
    fn test_secure_flag() {
        let jar = CookieJar::new();
        let mut cookie = Cookie::new("s", "1", "example.com", "/");
        cookie.secure = true;
        jar.store(cookie);

        assert!(jar.cookies_for(&url("http://example.com/")).is_empty());
        assert_eq!(jar.cookies_for(&url("https://example.com/")).len(), 1);
    }

    #[test]
    fn test_port_restriction() {
        let jar = CookieJar::new();
        let mut cookie = Cookie::new("p", "1", "example.com", "/");
        cookie.ports = Some(vec![8080]);
        jar.store(cookie);

        assert!(jar.cookies_for(&url("http://example.com/")).is_empty());
        assert_eq!(jar.cookies_for(&url("http://example.com:8080/")).len(), 1);
    }

    #[test]
    fn test_ingest_defaults() {
        let jar = CookieJar::new();
        ingest_one(&jar, "sid=abc123", "http://example.com/account/login");

        let cookies = jar.cookies_for(&url("http://example.com/account/login"));
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].domain, "example.com");
        assert_eq!(cookies[0].path, "/account/login");
    }

    #[test]
    fn test_ingest_explicit_domain() {
        let jar = CookieJar::new();
        ingest_one(&jar, "a=1; Domain=.example.com; Path=/", "http://www.example.com/");

        assert_eq!(jar.cookies_for(&url("http://www.example.com/")).len(), 1);
        assert_eq!(jar.cookies_for(&url("http://other.example.com/x")).len(), 1);
        assert!(jar.cookies_for(&url("http://example.org/")).is_empty());
    }

    #[test]
    fn test_ingest_rejects_dotted_prefix() {
        let jar = CookieJar::new();
        // a.b would leak the cookie to every *.example.com sibling
        ingest_one(&jar, "a=1; Domain=.example.com; Path=/", "http://a.b.example.com/");
        assert!(jar.is_empty());
    }

    #[test]
    fn test_ingest_rejects_foreign_domain() {
        let jar = CookieJar::new();
        ingest_one(&jar, "a=1; Domain=.evil.org; Path=/", "http://www.example.com/");
        assert!(jar.is_empty());
    }

    #[test]
    fn test_ingest_rejects_nonmatching_path() {
        let jar = CookieJar::new();
        ingest_one(&jar, "a=1; Path=/admin", "http://example.com/public");
        assert!(jar.is_empty());
    }

    #[test]
    fn test_multiple_cookies_in_one_header() {
        let jar = CookieJar::new();
        ingest_one(&jar, "a=1; Path=/, b=2; Path=/", "http://example.com/");
        assert_eq!(jar.len(), 2);
    }

    #[test]
    fn test_expires_comma_does_not_split() {
        let jar = CookieJar::new();
        ingest_one(
            &jar,
            "a=1; Expires=Wed, 09 Jun 2088 10:18:14 GMT; Path=/",
            "http://example.com/",
        );
        assert_eq!(jar.len(), 1);
        assert_eq!(jar.cookies_for(&url("http://example.com/"))[0].value, "1");
    }

    #[test]
    fn test_set_cookie2_requires_version() {
        let jar = CookieJar::new();
        let mut headers = Headers::new();
        headers.insert("Set-Cookie2", "a=1; Path=/");
        jar.ingest(&headers, &url("http://example.com/"));
        assert!(jar.is_empty());

        let mut headers = Headers::new();
        headers.insert("Set-Cookie2", "a=1; Version=1; Path=/");
        jar.ingest(&headers, &url("http://example.com/"));
        assert_eq!(jar.len(), 1);
    }

    #[test]
    fn test_set_cookie2_port_forms() {
        let jar = CookieJar::new();
        let mut headers = Headers::new();
        // Bare Port locks the cookie to the request port
        headers.insert("Set-Cookie2", "a=1; Version=1; Path=/; Port");
        jar.ingest(&headers, &url("http://example.com:8080/"));

        let stored = jar.cookies_for(&url("http://example.com:8080/"));
        assert_eq!(stored[0].ports, Some(vec![8080]));

        let jar = CookieJar::new();
        let mut headers = Headers::new();
        headers.insert("Set-Cookie2", "b=2; Version=1; Path=/; Port=\"80,8080\"");
        jar.ingest(&headers, &url("http://example.com/"));
        let stored = jar.cookies_for(&url("http://example.com/"));
        assert_eq!(stored[0].ports, Some(vec![80, 8080]));
    }

    #[test]
    fn test_set_cookie2_domain_needs_embedded_dot() {
        let jar = CookieJar::new();
        let mut headers = Headers::new();
        headers.insert("Set-Cookie2", "a=1; Version=1; Path=/; Domain=.com");
        jar.ingest(&headers, &url("http://example.com/"));
        assert!(jar.is_empty());
    }

    #[test]
    fn test_request_header() {
        assert_eq!(request_header(&[]), None);
        let cookies = vec![
            Cookie::new("a", "1", "example.com", "/"),
            Cookie::new("b", "2", "example.com", "/"),
        ];
        assert_eq!(request_header(&cookies).unwrap(), "a=1; b=2");
    }
}
