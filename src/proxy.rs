//! Proxy resolution
//!
//! Decides, per target URL, whether the request goes through a proxy and
//! which one. The default resolver reads the conventional environment
//! variables: `no_proxy`/`NO_PROXY`, `<scheme>_proxy` in both cases,
//! `all_proxy`/`ALL_PROXY`, and `cgi_http_proxy` when running inside a CGI
//! invocation (the `HTTP_PROXY` variable is attacker-controlled there, the
//! "httpoxy" vulnerability).

use log::debug;
use url::Url;

/// Proxy selection strategy
pub trait ProxyResolver: Send + Sync {
    /// The proxy to use for `uri`, or `None` for a direct connection
    fn proxy_for(&self, uri: &Url) -> Option<Url>;
}

/// Environment-driven proxy resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvProxyResolver;

impl EnvProxyResolver {
    pub fn new() -> Self {
        EnvProxyResolver
    }

    /// Resolve against an arbitrary variable lookup
    ///
    /// The lookup indirection keeps the algorithm testable without
    /// touching the process environment.
    pub fn resolve_with<F>(lookup: F, uri: &Url) -> Option<Url>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = uri.host_str()?;
        let port = uri.port_or_known_default()?;

        for name in ["no_proxy", "NO_PROXY"] {
            if let Some(list) = lookup(name).filter(|v| !v.is_empty()) {
                if no_proxy_matches(&list, host, port) {
                    debug!("{} matches {}, going direct", name, host);
                    return None;
                }
            }
        }

        // Inside CGI, HTTP_PROXY is derived from a request header; a
        // separate variable must opt in to proxying plain http.
        let scheme = uri.scheme();
        let scheme_var = if scheme == "http" && lookup("REQUEST_METHOD").is_some() {
            "cgi_http_proxy".to_string()
        } else {
            format!("{}_proxy", scheme)
        };
        let scheme_var_upper = scheme_var.to_uppercase();

        let names = [
            scheme_var.as_str(),
            scheme_var_upper.as_str(),
            "all_proxy",
            "ALL_PROXY",
        ];
        let value = names
            .iter()
            .find_map(|name| lookup(name).filter(|v| !v.is_empty()))?;

        match Url::parse(&value) {
            Ok(proxy) if proxy.has_host() => {
                debug!("using proxy {} for {}", proxy, host);
                Some(proxy)
            }
            _ => {
                debug!("ignoring non-absolute proxy value {:?}", value);
                None
            }
        }
    }
}

impl ProxyResolver for EnvProxyResolver {
    fn proxy_for(&self, uri: &Url) -> Option<Url> {
        Self::resolve_with(|name| std::env::var(name).ok(), uri)
    }
}

/// A fixed proxy decision, mostly useful in tests and for one-off overrides
pub struct StaticProxy(pub Option<Url>);

impl ProxyResolver for StaticProxy {
    fn proxy_for(&self, _uri: &Url) -> Option<Url> {
        self.0.clone()
    }
}

/// Does a no-proxy pattern list cover (host, port)?
///
/// Patterns are comma-separated `host[:port]` entries. A host pattern is
/// an exact case-insensitive match, the lone wildcard `*`, or a
/// `*.suffix` form matching any subdomain. A pattern port must equal the
/// target port exactly; a pattern without a port matches any port.
fn no_proxy_matches(list: &str, host: &str, port: u16) -> bool {
    for entry in list.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let (pattern, pattern_port) = match entry.rsplit_once(':') {
            Some((h, p)) => match p.parse::<u16>() {
                Ok(parsed) => (h, Some(parsed)),
                Err(_) => (entry, None),
            },
            None => (entry, None),
        };

        if let Some(expected) = pattern_port {
            if expected != port {
                continue;
            }
        }

        if pattern == "*" || pattern.eq_ignore_ascii_case(host) {
            return true;
        }
        if let Some(suffix) = pattern.strip_prefix("*.") {
            let dotted = format!(".{}", suffix);
            let (host, dotted) = (host.as_bytes(), dotted.as_bytes());
            if host.len() > dotted.len()
                && host[host.len() - dotted.len()..].eq_ignore_ascii_case(dotted)
            {
                return true;
            }
        }
    }
    false
}
