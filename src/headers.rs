//! HTTP headers handling
//!
//! An ordered, case-insensitive header map. Values are stored grouped by
//! field name: names keep first-insertion order, values within a name keep
//! arrival order, and duplicate names serialize under the first
//! occurrence. The grouping matches how the rest of the crate consumes
//! headers: Set-Cookie ingestion walks every value of one name,
//! Connection-token checks scan them, and an authentication re-challenge
//! swaps a credential header in place without disturbing the rest of the
//! request head.

use super::{Error, Result, CRLF, MAX_HEADERS};

/// One field name with every value it has accumulated
#[derive(Debug, Clone)]
struct Field {
    name: String,
    values: Vec<String>,
}

impl Field {
    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Is `name` an RFC 7230 field-name (one or more token characters)?
fn valid_field_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

/// HTTP headers collection
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: Vec<Field>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers { fields: Vec::new() }
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.is(name))
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.is(name))
    }

    /// Append a value for `name`, keeping values already present
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.len() >= MAX_HEADERS {
            // Hard cap, mirroring the wire parser's limit
            return;
        }
        let name = name.into();
        let value = value.into();
        match self.field_mut(&name) {
            Some(field) => field.values.push(value),
            None => self.fields.push(Field {
                name,
                values: vec![value],
            }),
        }
    }

    /// Replace every value of `name` with a single one
    ///
    /// An existing field keeps its position, so swapping Authorization on
    /// a re-challenge does not reorder the request head.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.field_mut(&name) {
            Some(field) => {
                field.values.clear();
                field.values.push(value);
            }
            None => self.insert(name, value),
        }
    }

    /// Insert only if no value for `name` exists yet
    ///
    /// The merge rule for generated defaults: headers the caller set
    /// explicitly always win over generated ones.
    pub fn set_if_absent(&mut self, name: &str, value: impl Into<String>) {
        if self.field(name).is_none() {
            self.insert(name.to_string(), value);
        }
    }

    /// The first value for `name` (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.field(name)
            .and_then(|f| f.values.first())
            .map(String::as_str)
    }

    /// Every value for `name`, in arrival order
    pub fn values(&self, name: &str) -> impl Iterator<Item = &str> {
        self.field(name)
            .map(|f| f.values.iter().map(String::as_str))
            .into_iter()
            .flatten()
    }

    /// Whether any value for `name` exists
    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Drop `name` entirely, returning how many values went with it
    pub fn remove(&mut self, name: &str) -> usize {
        match self.fields.iter().position(|f| f.is(name)) {
            Some(i) => self.fields.remove(i).values.len(),
            None => 0,
        }
    }

    /// Total number of header lines (a duplicated name counts each value)
    pub fn len(&self) -> usize {
        self.fields.iter().map(|f| f.values.len()).sum()
    }

    /// Whether there are no headers
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All (name, value) pairs, grouped by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .flat_map(|f| f.values.iter().map(move |v| (f.name.as_str(), v.as_str())))
    }

    /// Serialize in wire format, one `Name: value` line per value
    pub fn write_wire(&self, buf: &mut Vec<u8>) {
        for (name, value) in self.iter() {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(CRLF.as_bytes());
        }
    }

    /// Parse one received header line and add it
    ///
    /// The name must be an RFC 7230 token up to the colon (which also
    /// rejects whitespace smuggled before it); surrounding whitespace on
    /// the value is optional and dropped. Lines past the header cap are
    /// an error here, unlike the silent cap on programmatic inserts.
    pub fn append_line(&mut self, line: &str) -> Result<()> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidHeader(format!("No colon in header: {}", line)))?;

        if !valid_field_name(name) {
            return Err(Error::InvalidHeader(format!(
                "Invalid header name: {:?}",
                name
            )));
        }
        if self.len() >= MAX_HEADERS {
            return Err(Error::InvalidHeader(format!(
                "More than {} headers",
                MAX_HEADERS
            )));
        }

        self.insert(name.to_string(), value.trim().to_string());
        Ok(())
    }
}
