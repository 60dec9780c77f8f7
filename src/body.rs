//! Body framing
//!
//! Request side: [`RequestBody`] describes what goes on the wire and can be
//! replayed (retries, redirects, digest `auth-int` body hashing). Response
//! side: [`BodyReader`] exposes the body as a delimited stream over the
//! connection, honoring Content-Length, chunked transfer encoding, or
//! read-to-EOF framing, and reports whether it was fully consumed so the
//! connection can be reused.

use super::chunked::ChunkedDecoder;
use super::headers::Headers;
use super::message::{Method, ResponseHead, Status};
use super::multipart::{encode_form, MultipartBody};
use super::session::SessionOps;
use super::{Error, Result};
use bytes::{Buf, BytesMut};
use std::io::{self, BufRead, Read, Write};

const READ_CHUNK: usize = 8192;

/// The body of an outgoing request
///
/// Every variant can be serialized more than once: the execution loop
/// invokes the body exactly once per wire attempt, but a retry, redirect
/// or authentication re-challenge issues a new attempt, and digest
/// `auth-int` additionally replays the body into a hash sink.
pub enum RequestBody {
    /// No body at all (no framing headers are sent)
    None,
    /// A literal byte payload
    Bytes(Vec<u8>),
    /// Scalar fields, sent urlencoded
    Form(Vec<(String, String)>),
    /// A multipart/form-data payload
    Multipart(MultipartBody),
    /// An opaque streaming callback, sent chunked
    ///
    /// The callback must tolerate being invoked again for a later attempt.
    Stream(Box<dyn FnMut(&mut dyn Write) -> io::Result<()> + Send>),
}

impl RequestBody {
    /// Whether there is no body
    pub fn is_none(&self) -> bool {
        matches!(self, RequestBody::None)
    }

    /// The Content-Type implied by the body shape, if any
    pub fn content_type(&self) -> Option<String> {
        match self {
            RequestBody::None | RequestBody::Bytes(_) | RequestBody::Stream(_) => None,
            RequestBody::Form(_) => Some("application/x-www-form-urlencoded".to_string()),
            RequestBody::Multipart(mp) => Some(mp.content_type()),
        }
    }

    /// The body length when it can be computed up front
    ///
    /// `None` means the length is unknowable (opaque streams) and the
    /// request goes out with chunked transfer encoding.
    pub fn content_length(&self) -> Result<Option<u64>> {
        match self {
            RequestBody::None => Ok(Some(0)),
            RequestBody::Bytes(data) => Ok(Some(data.len() as u64)),
            RequestBody::Form(fields) => Ok(Some(encode_form(fields).len() as u64)),
            RequestBody::Multipart(mp) => mp.content_length(),
            RequestBody::Stream(_) => Ok(None),
        }
    }

    /// Serialize the body into `w`
    pub fn write_to(&mut self, w: &mut dyn Write) -> Result<()> {
        match self {
            RequestBody::None => Ok(()),
            RequestBody::Bytes(data) => {
                w.write_all(data)?;
                Ok(())
            }
            RequestBody::Form(fields) => {
                w.write_all(encode_form(fields).as_bytes())?;
                Ok(())
            }
            RequestBody::Multipart(mp) => mp.write_to(w),
            RequestBody::Stream(f) => {
                f(w)?;
                Ok(())
            }
        }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(data: Vec<u8>) -> Self {
        RequestBody::Bytes(data)
    }
}

impl From<&[u8]> for RequestBody {
    fn from(data: &[u8]) -> Self {
        RequestBody::Bytes(data.to_vec())
    }
}

impl From<String> for RequestBody {
    fn from(data: String) -> Self {
        RequestBody::Bytes(data.into_bytes())
    }
}

impl From<&str> for RequestBody {
    fn from(data: &str) -> Self {
        RequestBody::Bytes(data.as_bytes().to_vec())
    }
}

impl From<Vec<(String, String)>> for RequestBody {
    fn from(fields: Vec<(String, String)>) -> Self {
        RequestBody::Form(fields)
    }
}

impl From<MultipartBody> for RequestBody {
    fn from(mp: MultipartBody) -> Self {
        RequestBody::Multipart(mp)
    }
}

/// `io::Write` adapter over a session stream, for body serialization
pub(crate) struct SessionWriter<'a>(pub &'a mut dyn SessionOps);

impl Write for SessionWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf).map_err(io_err)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// How the response body ends
enum Framing {
    /// No body (HEAD, 1xx, 204, 304)
    Empty,
    /// Exactly `remaining` more bytes
    Length { remaining: u64 },
    /// Chunked transfer encoding
    Chunked { decoder: ChunkedDecoder },
    /// Everything until the peer closes
    UntilEof { eof: bool },
}

fn io_err(e: Error) -> io::Error {
    match e {
        Error::Io(inner) => inner,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

/// Delimited reader over a response body
///
/// Borrows the connection stream for the duration of the body. All read
/// styles (single bytes, lines, bulk) observe exactly the framed length;
/// reading past it reports EOF without touching bytes that belong to the
/// connection's next response.
pub struct BodyReader<'a> {
    session: &'a mut dyn SessionOps,
    /// Undecoded bytes already read off the wire
    raw: BytesMut,
    /// Decoded bytes ready for the consumer (chunked framing only)
    decoded: BytesMut,
    framing: Framing,
}

impl<'a> BodyReader<'a> {
    /// Build the reader for a parsed response head
    ///
    /// `prefix` holds body bytes the head parser read past the header
    /// terminator. The framing is chosen per RFC 2616 section 4.4, with
    /// bodiless statuses and HEAD treated as empty.
    pub fn new(
        session: &'a mut dyn SessionOps,
        prefix: BytesMut,
        head: &ResponseHead,
        request_method: Method,
    ) -> Result<Self> {
        let status = head.status().code();
        let framing = if request_method == Method::Head
            || head.status().is_informational()
            || status == 204
            || status == 304
        {
            Framing::Empty
        } else if head.is_chunked() {
            Framing::Chunked {
                decoder: ChunkedDecoder::new(),
            }
        } else if let Some(length) = head.content_length()? {
            Framing::Length { remaining: length }
        } else {
            Framing::UntilEof { eof: false }
        };

        Ok(BodyReader {
            session,
            raw: prefix,
            decoded: BytesMut::new(),
            framing,
        })
    }

    /// Whether the framed body has been fully consumed
    ///
    /// Only an exhausted body leaves the connection in a reusable state.
    pub fn is_exhausted(&self) -> bool {
        match &self.framing {
            Framing::Empty => true,
            Framing::Length { remaining } => *remaining == 0,
            Framing::Chunked { decoder } => decoder.is_complete() && self.decoded.is_empty(),
            Framing::UntilEof { eof } => *eof && self.raw.is_empty(),
        }
    }

    /// Read and discard the rest of the body
    ///
    /// Bounded by the framed length when one is known, otherwise reads to
    /// EOF. Returns the number of bytes discarded.
    pub fn drain(&mut self) -> Result<u64> {
        let mut total = 0u64;
        loop {
            let n = self.fill_buf()?.len();
            if n == 0 {
                break;
            }
            self.consume(n);
            total += n as u64;
        }
        Ok(total)
    }
}

impl Read for BodyReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let src = self.fill_buf()?;
        if src.is_empty() || buf.is_empty() {
            return Ok(0);
        }
        let n = src.len().min(buf.len());
        buf[..n].copy_from_slice(&src[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for BodyReader<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match &mut self.framing {
            Framing::Empty => Ok(&[]),

            Framing::Length { remaining } => {
                if *remaining == 0 {
                    return Ok(&[]);
                }
                if self.raw.is_empty() {
                    let want = (*remaining).min(READ_CHUNK as u64) as usize;
                    let mut temp = [0u8; READ_CHUNK];
                    let n = self.session.read(&mut temp[..want]).map_err(io_err)?;
                    if n == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed inside a delimited body",
                        ));
                    }
                    self.raw.extend_from_slice(&temp[..n]);
                }
                let avail = (self.raw.len() as u64).min(*remaining) as usize;
                Ok(&self.raw[..avail])
            }

            Framing::Chunked { decoder } => {
                while self.decoded.is_empty() && !decoder.is_complete() {
                    decoder
                        .decode(&mut self.raw, &mut self.decoded)
                        .map_err(io_err)?;
                    if self.decoded.is_empty() && !decoder.is_complete() {
                        let mut temp = [0u8; READ_CHUNK];
                        let n = self.session.read(&mut temp).map_err(io_err)?;
                        if n == 0 {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "connection closed inside a chunked body",
                            ));
                        }
                        self.raw.extend_from_slice(&temp[..n]);
                    }
                }
                Ok(&self.decoded[..])
            }

            Framing::UntilEof { eof } => {
                if self.raw.is_empty() && !*eof {
                    let mut temp = [0u8; READ_CHUNK];
                    let n = self.session.read(&mut temp).map_err(io_err)?;
                    if n == 0 {
                        *eof = true;
                    } else {
                        self.raw.extend_from_slice(&temp[..n]);
                    }
                }
                Ok(&self.raw[..])
            }
        }
    }

    fn consume(&mut self, amt: usize) {
        match &mut self.framing {
            Framing::Empty => {}
            Framing::Length { remaining } => {
                let amt = amt.min(self.raw.len());
                self.raw.advance(amt);
                *remaining -= amt as u64;
            }
            Framing::Chunked { .. } => {
                let amt = amt.min(self.decoded.len());
                self.decoded.advance(amt);
            }
            Framing::UntilEof { .. } => {
                let amt = amt.min(self.raw.len());
                self.raw.advance(amt);
            }
        }
    }
}

/// A response handed to the reader callback: head plus delimited body
///
/// Implements `Read` and `BufRead` over the body, so line- and byte-wise
/// consumption both work against the framed stream.
pub struct Response<'a> {
    head: ResponseHead,
    body: BodyReader<'a>,
}

impl<'a> Response<'a> {
    pub fn new(head: ResponseHead, body: BodyReader<'a>) -> Self {
        Response { head, body }
    }

    /// The parsed status line and headers
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Status code shortcut
    pub fn status(&self) -> Status {
        self.head.status()
    }

    /// Headers shortcut
    pub fn headers(&self) -> &Headers {
        self.head.headers()
    }

    /// The body stream
    pub fn body_mut(&mut self) -> &mut BodyReader<'a> {
        &mut self.body
    }

    /// Read the entire remaining body into a vector
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.body.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for Response<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.body.read(buf)
    }
}

impl BufRead for Response<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.body.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.body.consume(amt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Version;
    use crate::session::PollEvents;
    use std::time::Duration;

    /// In-memory session serving scripted bytes; writes are discarded
    struct ScriptedSession {
        input: io::Cursor<Vec<u8>>,
    }

    impl ScriptedSession {
        fn new(input: &[u8]) -> Self {
            ScriptedSession {
                input: io::Cursor::new(input.to_vec()),
            }
        }
    }

    impl SessionOps for ScriptedSession {
        fn poll(&self, _events: PollEvents, _timeout: Option<Duration>) -> Result<bool> {
            Ok(true)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            Ok(self.input.read(buf)?)
        }

        fn peek(&mut self, buf: &mut [u8]) -> Result<usize> {
            let pos = self.input.position();
            let n = self.input.read(buf)?;
            self.input.set_position(pos);
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            Ok(buf.len())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn head_with(headers: &[(&str, &str)]) -> ResponseHead {
        let mut h = Headers::new();
        for (name, value) in headers {
            h.insert(name.to_string(), value.to_string());
        }
        ResponseHead::new(Version::Http11, Status::OK, "OK".to_string(), h)
    }

    #[test]
    fn test_delimited_exact_length_mixed_reads() {
        let mut session = ScriptedSession::new(b"line one\nrestEXTRA-NOT-BODY");
        let head = head_with(&[("Content-Length", "13")]);
        let mut reader =
            BodyReader::new(&mut session, BytesMut::new(), &head, Method::Get).unwrap();

        // read-line
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "line one\n");

        // single byte
        let mut one = [0u8; 1];
        assert_eq!(reader.read(&mut one).unwrap(), 1);
        assert_eq!(&one, b"r");

        // bulk read stops at the boundary
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"est");
        assert!(reader.is_exhausted());

        // one more read still reports EOF
        assert_eq!(reader.read(&mut one).unwrap(), 0);
    }

    #[test]
    fn test_prefix_counts_toward_length() {
        let mut session = ScriptedSession::new(b"llo");
        let head = head_with(&[("Content-Length", "5")]);
        let prefix = BytesMut::from(&b"He"[..]);
        let mut reader = BodyReader::new(&mut session, prefix, &head, Method::Get).unwrap();

        let mut body = Vec::new();
        reader.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"Hello");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_truncated_length_is_an_error() {
        let mut session = ScriptedSession::new(b"abc");
        let head = head_with(&[("Content-Length", "10")]);
        let mut reader =
            BodyReader::new(&mut session, BytesMut::new(), &head, Method::Get).unwrap();

        let mut body = Vec::new();
        let err = reader.read_to_end(&mut body).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_chunked_body() {
        let mut session = ScriptedSession::new(b"5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n");
        let head = head_with(&[("Transfer-Encoding", "chunked")]);
        let mut reader =
            BodyReader::new(&mut session, BytesMut::new(), &head, Method::Get).unwrap();

        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "Hello World");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_until_eof_body() {
        let mut session = ScriptedSession::new(b"everything until close");
        let head = head_with(&[]);
        let mut reader =
            BodyReader::new(&mut session, BytesMut::new(), &head, Method::Get).unwrap();

        let mut body = Vec::new();
        reader.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"everything until close");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_head_has_no_body() {
        let mut session = ScriptedSession::new(b"should never be read");
        let head = head_with(&[("Content-Length", "20")]);
        let mut reader =
            BodyReader::new(&mut session, BytesMut::new(), &head, Method::Head).unwrap();

        assert!(reader.is_exhausted());
        let mut body = Vec::new();
        reader.read_to_end(&mut body).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_drain_bounded_by_length() {
        let mut session = ScriptedSession::new(b"0123456789NEXT");
        let head = head_with(&[("Content-Length", "10")]);
        let mut reader =
            BodyReader::new(&mut session, BytesMut::new(), &head, Method::Get).unwrap();

        assert_eq!(reader.drain().unwrap(), 10);
        assert!(reader.is_exhausted());
        // Bytes past the body stay on the wire
        let mut rest = Vec::new();
        session.input.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"NEXT");
    }

    #[test]
    fn test_request_body_lengths_and_types() {
        assert_eq!(RequestBody::None.content_length().unwrap(), Some(0));

        let body = RequestBody::from("hello");
        assert_eq!(body.content_length().unwrap(), Some(5));
        assert_eq!(body.content_type(), None);

        let form = RequestBody::Form(vec![("a".to_string(), "b c".to_string())]);
        assert_eq!(form.content_length().unwrap(), Some(5)); // "a=b+c"
        assert_eq!(
            form.content_type().as_deref(),
            Some("application/x-www-form-urlencoded")
        );

        let stream = RequestBody::Stream(Box::new(|w: &mut dyn Write| w.write_all(b"x")));
        assert_eq!(stream.content_length().unwrap(), None);
    }

    #[test]
    fn test_request_body_is_replayable() {
        let mut body = RequestBody::Form(vec![("k".to_string(), "v".to_string())]);

        let mut first = Vec::new();
        body.write_to(&mut first).unwrap();
        let mut second = Vec::new();
        body.write_to(&mut second).unwrap();

        assert_eq!(first, b"k=v");
        assert_eq!(first, second);
    }
}
