//! HTTP response head parsing
//!
//! Incremental parser for the status line and headers of a response. The
//! parser deliberately stops at the body boundary: the body belongs to the
//! delimited reader in `body`, which takes over the stream together with
//! whatever surplus bytes the parser buffered past the head.

use super::{
    headers::Headers,
    message::{ResponseHead, Status, Version},
    Result,
};
use bytes::BytesMut;

/// Find the next CRLF in a buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parse HTTP response status line
///
/// Format: VERSION STATUS REASON\r\n
/// Example: HTTP/1.1 200 OK\r\n
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(super::Error::Parse(format!(
            "Invalid status line: expected at least 2 parts, got {}",
            parts.len()
        )));
    }

    let version = Version::from_str(parts[0])?;
    let status_code = parts[1]
        .parse::<u16>()
        .map_err(|_| super::Error::Parse(format!("Invalid status code: {}", parts[1])))?;
    let status = Status::new(status_code)?;
    let reason = if parts.len() == 3 {
        parts[2].to_string()
    } else {
        status.reason_phrase().to_string()
    };

    Ok((version, status, reason))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    StatusLine,
    Headers,
    Complete,
}

/// Incremental response head parser
///
/// Feed reads with [`ResponseParser::parse`]; once it returns a head, any
/// buffered surplus is the start of the body and is recovered with
/// [`ResponseParser::into_remainder`].
pub struct ResponseParser {
    state: ParserState,
    buffer: BytesMut,
    version: Option<Version>,
    status: Option<Status>,
    reason: Option<String>,
    headers: Headers,
}

impl ResponseParser {
    /// Create a new response parser
    pub fn new() -> Self {
        ResponseParser {
            state: ParserState::StatusLine,
            buffer: BytesMut::new(),
            version: None,
            status: None,
            reason: None,
            headers: Headers::new(),
        }
    }

    /// Feed data to the parser
    ///
    /// Returns Ok(Some(head)) when the complete head is parsed, Ok(None)
    /// if more data is needed, or Err on parse error.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<ResponseHead>> {
        self.buffer.extend_from_slice(data);

        match self.state {
            ParserState::StatusLine => self.parse_status_line(),
            ParserState::Headers => self.parse_headers(),
            ParserState::Complete => Ok(None),
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let crlf_pos = find_crlf(&self.buffer)?;
        let line = String::from_utf8_lossy(&self.buffer[..crlf_pos]).to_string();
        let _ = self.buffer.split_to(crlf_pos + 2);
        Some(line)
    }

    fn parse_status_line(&mut self) -> Result<Option<ResponseHead>> {
        if let Some(line) = self.take_line() {
            let (version, status, reason) = parse_status_line(&line)?;
            self.version = Some(version);
            self.status = Some(status);
            self.reason = Some(reason);

            self.state = ParserState::Headers;
            self.parse_headers()
        } else {
            Ok(None)
        }
    }

    fn parse_headers(&mut self) -> Result<Option<ResponseHead>> {
        loop {
            match find_crlf(&self.buffer) {
                Some(0) => {
                    // Empty line marks end of head; the rest is body
                    let _ = self.buffer.split_to(2);
                    self.state = ParserState::Complete;

                    let head = ResponseHead::new(
                        self.version.take().unwrap_or_default(),
                        self.status.take().unwrap_or(Status::OK),
                        self.reason.take().unwrap_or_default(),
                        std::mem::take(&mut self.headers),
                    );
                    return Ok(Some(head));
                }
                Some(_) => {
                    let line = match self.take_line() {
                        Some(line) => line,
                        None => return Ok(None),
                    };
                    self.headers.append_line(&line)?;
                }
                None => return Ok(None),
            }
        }
    }

    /// Whether any bytes have been fed yet
    ///
    /// Used to distinguish "server closed before replying" from a close in
    /// the middle of a response.
    pub fn is_empty(&self) -> bool {
        self.state == ParserState::StatusLine && self.buffer.is_empty()
    }

    /// Surplus bytes read past the head: the first body bytes
    pub fn into_remainder(self) -> BytesMut {
        self.buffer
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_line() {
        let (version, status, reason) = parse_status_line("HTTP/1.1 200 OK").unwrap();
        assert_eq!(version, Version::Http11);
        assert_eq!(status.code(), 200);
        assert_eq!(reason, "OK");

        // Missing reason phrase falls back to the canonical one
        let (version, status, reason) = parse_status_line("HTTP/1.0 404").unwrap();
        assert_eq!(version, Version::Http10);
        assert_eq!(status.code(), 404);
        assert_eq!(reason, "Not Found");
    }

    #[test]
    fn test_head_with_body_prefix() {
        let mut parser = ResponseParser::new();

        let data = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello";
        let head = parser.parse(data).unwrap().unwrap();

        assert_eq!(head.status().code(), 200);
        assert_eq!(head.headers().get("Content-Length"), Some("5"));
        // The body bytes stay behind as the remainder
        assert_eq!(&parser.into_remainder()[..], b"Hello");
    }

    #[test]
    fn test_incremental_feed() {
        let mut parser = ResponseParser::new();

        assert!(parser.parse(b"HTTP/1.1 ").unwrap().is_none());
        assert!(parser.parse(b"200 OK\r\n").unwrap().is_none());
        assert!(parser.parse(b"Content-Type: text/plain\r\n").unwrap().is_none());
        let head = parser.parse(b"\r\nTes").unwrap().unwrap();

        assert_eq!(head.status().code(), 200);
        assert_eq!(head.headers().get("Content-Type"), Some("text/plain"));
        assert_eq!(&parser.into_remainder()[..], b"Tes");
    }

    #[test]
    fn test_is_empty_tracks_first_byte() {
        let mut parser = ResponseParser::new();
        assert!(parser.is_empty());
        assert!(parser.parse(b"HTTP").unwrap().is_none());
        assert!(!parser.is_empty());
    }

    #[test]
    fn test_invalid_status_line() {
        let mut parser = ResponseParser::new();
        assert!(parser.parse(b"garbage\r\n").is_err());
    }
}
