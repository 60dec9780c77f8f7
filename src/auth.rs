//! Authentication
//!
//! Challenge parsing and the authenticator plug-in model. An authenticator
//! is selected by the scheme token of a `WWW-Authenticate` (401) or
//! `Proxy-Authenticate` (407) header and turns resolved credentials into
//! the value of the matching credential header. Basic (RFC 2617 section 2)
//! and Digest (RFC 2617 section 3, including `auth-int`) ship built in;
//! the table is open for additional schemes.

use super::{body::RequestBody, message::Method, Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::hash::{Hasher, MessageDigest};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A parsed authentication challenge
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    scheme: String,
    params: Vec<(String, String)>,
}

impl AuthChallenge {
    /// Parse a `WWW-Authenticate` / `Proxy-Authenticate` header value
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (scheme, rest) = match value.find(char::is_whitespace) {
            Some(i) => (&value[..i], value[i..].trim_start()),
            None => (value, ""),
        };
        if scheme.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        for piece in split_unquoted_commas(rest) {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            if let Some((name, val)) = piece.split_once('=') {
                params.push((
                    name.trim().to_ascii_lowercase(),
                    trim_quotes(val.trim()).to_string(),
                ));
            }
        }

        Some(AuthChallenge {
            scheme: scheme.to_string(),
            params,
        })
    }

    /// The scheme token as it appeared in the challenge
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// A challenge parameter by (lowercase) name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The realm parameter, empty if absent
    pub fn realm(&self) -> &str {
        self.get("realm").unwrap_or("")
    }
}

/// Split on commas that sit outside double quotes
fn split_unquoted_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn trim_quotes(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Everything an authenticator may need to answer a challenge
pub struct ChallengeContext<'a> {
    /// The parsed challenge
    pub challenge: &'a AuthChallenge,
    /// Method of the request being retried
    pub method: Method,
    /// The wire request-target, userinfo-free
    pub target: &'a str,
    /// Resolved username
    pub username: &'a str,
    /// Resolved password
    pub password: &'a str,
    /// The request body, replayable into a digest sink for `auth-int`
    pub body: &'a mut RequestBody,
}

impl ChallengeContext<'_> {
    /// MD5 of the request body, as lowercase hex
    ///
    /// Replays the body writer once against a hash sink; an empty body
    /// digests to the well-known empty-input MD5.
    pub fn body_digest(&mut self) -> Result<String> {
        let mut hasher = Hasher::new(MessageDigest::md5())?;
        self.body.write_to(&mut hasher)?;
        let digest = hasher.finish()?;
        Ok(to_hex(&digest))
    }
}

/// A credential-header producer for one authentication scheme
pub trait Authenticator: Send + Sync {
    /// Produce the credential header value answering the challenge
    fn credentials_header(&self, ctx: &mut ChallengeContext<'_>) -> Result<String>;
}

/// The built-in authenticator table: `basic` and `digest`
pub fn default_authenticators() -> HashMap<String, Arc<dyn Authenticator>> {
    let mut table: HashMap<String, Arc<dyn Authenticator>> = HashMap::new();
    table.insert("basic".to_string(), Arc::new(BasicAuth));
    table.insert("digest".to_string(), Arc::new(DigestAuth::new()));
    table
}

/// Basic authentication (RFC 2617 section 2)
pub struct BasicAuth;

impl Authenticator for BasicAuth {
    fn credentials_header(&self, ctx: &mut ChallengeContext<'_>) -> Result<String> {
        let pair = format!("{}:{}", ctx.username, ctx.password);
        Ok(format!("Basic {}", BASE64.encode(pair)))
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = std::fmt::Write::write_fmt(&mut out, format_args!("{:02x}", b));
    }
    out
}

/// `H(a:b:...)`: lowercase hex MD5 of colon-joined parts
fn md5_hex(parts: &[&str]) -> Result<String> {
    let mut hasher = Hasher::new(MessageDigest::md5())?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            std::io::Write::write_all(&mut hasher, b":")?;
        }
        std::io::Write::write_all(&mut hasher, part.as_bytes())?;
    }
    let digest = hasher.finish()?;
    Ok(to_hex(&digest))
}

fn default_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Digest authentication (RFC 2617 section 3)
///
/// Prefers `auth-int` over `auth` over no qop. The nonce count stays at 1
/// and `algorithm=MD5-sess` is not computed (the directive is echoed back
/// untouched); extending either means a new authenticator.
pub struct DigestAuth {
    clock: fn() -> u64,
}

impl DigestAuth {
    pub fn new() -> Self {
        DigestAuth {
            clock: default_clock,
        }
    }

    /// Use a fixed clock, for deterministic cnonce values in tests
    pub fn with_clock(clock: fn() -> u64) -> Self {
        DigestAuth { clock }
    }

    fn choose_qop<'c>(challenge: &'c AuthChallenge) -> Option<&'c str> {
        let offered = challenge.get("qop")?;
        let mut has_auth = false;
        for option in offered.split(',') {
            match option.trim() {
                "auth-int" => return Some("auth-int"),
                "auth" => has_auth = true,
                _ => {}
            }
        }
        has_auth.then_some("auth")
    }
}

impl Default for DigestAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl Authenticator for DigestAuth {
    fn credentials_header(&self, ctx: &mut ChallengeContext<'_>) -> Result<String> {
        let challenge = ctx.challenge;
        let nonce = challenge
            .get("nonce")
            .ok_or_else(|| Error::Parse("digest challenge without nonce".to_string()))?
            .to_string();
        let realm = challenge.realm().to_string();
        let qop = Self::choose_qop(challenge).map(str::to_string);

        let ha1 = md5_hex(&[ctx.username, &realm, ctx.password])?;
        let ha2 = match qop.as_deref() {
            Some("auth-int") => {
                let body_digest = ctx.body_digest()?;
                md5_hex(&[ctx.method.as_str(), ctx.target, &body_digest])?
            }
            _ => md5_hex(&[ctx.method.as_str(), ctx.target])?,
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            ctx.username, realm, nonce, ctx.target
        );

        let response = match qop.as_deref() {
            Some(qop_value) => {
                let nc = "00000001";
                let cnonce = md5_hex(&[&(self.clock)().to_string(), &realm])?;
                let response = md5_hex(&[&ha1, &nonce, nc, &cnonce, qop_value, &ha2])?;
                header.push_str(&format!(
                    ", qop={}, nc={}, cnonce=\"{}\"",
                    qop_value, nc, cnonce
                ));
                response
            }
            None => md5_hex(&[&ha1, &nonce, &ha2])?,
        };
        header.push_str(&format!(", response=\"{}\"", response));

        if let Some(opaque) = ctx.challenge.get("opaque") {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        if let Some(algorithm) = ctx.challenge.get("algorithm") {
            header.push_str(&format!(", algorithm={}", algorithm));
        }

        Ok(header)
    }
}
