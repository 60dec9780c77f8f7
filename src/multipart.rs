//! Multipart request bodies
//!
//! Assembles `multipart/form-data` payloads from literal fields, files and
//! opaque streams, with content-length precomputation when every part has
//! a knowable size. Plain scalar field lists are instead encoded as
//! `application/x-www-form-urlencoded` (see [`encode_form`]).

use super::{headers::Headers, Error, Result, CRLF};
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use url::form_urlencoded;

/// Payload of a single multipart field
enum PartSource {
    Literal(Vec<u8>),
    File(PathBuf),
    Stream(Box<dyn FnMut(&mut dyn Write) -> io::Result<()> + Send>),
}

/// One field of a multipart body
pub struct Part {
    name: String,
    filename: Option<String>,
    headers: Headers,
    source: PartSource,
}

impl Part {
    /// A literal text or byte field
    pub fn text(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Part {
            name: name.into(),
            filename: None,
            headers: Headers::new(),
            source: PartSource::Literal(value.into()),
        }
    }

    /// A field streamed from a file on disk
    ///
    /// The filename defaults to the final path component; the file is
    /// opened at serialization time and closed on every path.
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned());
        Part {
            name: name.into(),
            filename,
            headers: Headers::new(),
            source: PartSource::File(path),
        }
    }

    /// A field streamed through a callback
    ///
    /// The part has no precomputable size, so the enclosing request is
    /// sent without a Content-Length.
    pub fn stream<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&mut dyn Write) -> io::Result<()> + Send + 'static,
    {
        Part {
            name: name.into(),
            filename: None,
            headers: Headers::new(),
            source: PartSource::Stream(Box::new(f)),
        }
    }

    /// Override the filename sent in Content-Disposition
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Add a part header, overriding the generated default of the same name
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The serialized headers of this part, blank line included
    fn head(&self) -> Vec<u8> {
        let mut disposition = format!("form-data; name=\"{}\"", self.name);
        if let Some(filename) = &self.filename {
            let _ = write!(disposition, "; filename=\"{}\"", filename);
        }

        let mut defaults = Headers::new();
        defaults.insert("Content-Disposition", disposition);
        if matches!(self.source, PartSource::File(_)) {
            defaults.insert("Content-Type", "application/octet-stream");
        }
        // User headers replace generated ones of the same name
        for (name, value) in self.headers.iter() {
            defaults.set(name.to_string(), value.to_string());
        }

        let mut buf = Vec::new();
        defaults.write_wire(&mut buf);
        buf.extend_from_slice(CRLF.as_bytes());
        buf
    }

    /// The payload size, or `None` for an opaque stream
    fn payload_length(&self) -> Result<Option<u64>> {
        match &self.source {
            PartSource::Literal(data) => Ok(Some(data.len() as u64)),
            PartSource::File(path) => {
                let meta = fs::metadata(path).map_err(|e| {
                    Error::FormData(format!("cannot stat {}: {}", path.display(), e))
                })?;
                Ok(Some(meta.len()))
            }
            PartSource::Stream(_) => Ok(None),
        }
    }

    fn write_payload(&mut self, w: &mut dyn Write) -> Result<()> {
        match &mut self.source {
            PartSource::Literal(data) => w.write_all(data)?,
            PartSource::File(path) => {
                let mut file = fs::File::open(&path).map_err(|e| {
                    Error::FormData(format!("cannot open {}: {}", path.display(), e))
                })?;
                io::copy(&mut file, w)?;
            }
            PartSource::Stream(f) => f(w)?,
        }
        Ok(())
    }
}

/// A complete multipart/form-data body
pub struct MultipartBody {
    boundary: String,
    parts: Vec<Part>,
}

impl MultipartBody {
    /// Assemble a body from parts, generating a fresh boundary
    pub fn new(parts: Vec<Part>) -> Self {
        MultipartBody {
            boundary: make_boundary(),
            parts,
        }
    }

    /// The boundary token
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The Content-Type header value, boundary parameter included
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Precomputed body length
    ///
    /// Sums literal and file sizes plus framing; `None` as soon as any
    /// part is an opaque stream.
    pub fn content_length(&self) -> Result<Option<u64>> {
        let mut total: u64 = 0;
        for part in &self.parts {
            let Some(payload) = part.payload_length()? else {
                return Ok(None);
            };
            // --boundary CRLF, headers + blank line, payload, CRLF
            total += 2 + self.boundary.len() as u64 + 2;
            total += part.head().len() as u64;
            total += payload + 2;
        }
        // --boundary-- CRLF
        total += 2 + self.boundary.len() as u64 + 2 + 2;
        Ok(Some(total))
    }

    /// Serialize the whole body
    pub fn write_to(&mut self, w: &mut dyn Write) -> Result<()> {
        for part in &mut self.parts {
            write!(w, "--{}{}", self.boundary, CRLF)?;
            w.write_all(&part.head())?;
            part.write_payload(w)?;
            w.write_all(CRLF.as_bytes())?;
        }
        write!(w, "--{}--{}", self.boundary, CRLF)?;
        Ok(())
    }
}

/// Generate a multipart boundary
///
/// Shape: `----------------Multipart-=_<unique>=_=<pid>=-=<time>`, unique
/// enough not to collide with field payloads.
fn make_boundary() -> String {
    let unique: u64 = rand::random();
    let pid = std::process::id();
    let time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!(
        "----------------Multipart-=_{:016x}=_={}=-={}",
        unique, pid, time
    )
}

/// Encode scalar fields as application/x-www-form-urlencoded
pub fn encode_form(fields: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in fields {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}
