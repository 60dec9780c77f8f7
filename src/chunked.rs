//! Chunked transfer encoding support
//!
//! Encoding for request bodies whose length is not known up front, and
//! incremental decoding for chunked response bodies.

use super::{Error, Result, CRLF};
use bytes::{Buf, BytesMut};
use std::io::{self, Write};

/// Chunked encoder
///
/// An `io::Write` adapter: every `write` becomes one chunk. `finish` emits
/// the terminating zero chunk; forgetting it leaves the message unframed.
pub struct ChunkedWriter<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedWriter<W> {
    /// Create a new chunked encoder
    pub fn new(writer: W) -> Self {
        ChunkedWriter { writer }
    }

    /// Write the final (0-sized) chunk and flush
    pub fn finish(mut self) -> io::Result<W> {
        write!(self.writer, "0{}{}", CRLF, CRLF)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> Write for ChunkedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            // A zero-sized chunk would terminate the body
            return Ok(0);
        }
        write!(self.writer, "{:x}{}", buf.len(), CRLF)?;
        self.writer.write_all(buf)?;
        self.writer.write_all(CRLF.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

/// Incremental chunked decoder
///
/// Driven by the body reader: `decode` consumes framing and data from the
/// input buffer and appends decoded payload bytes to the output buffer,
/// stopping when it needs more input or the terminator arrived.
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_remaining: usize,
}

impl ChunkedDecoder {
    /// Create a new chunked decoder
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_remaining: 0,
        }
    }

    /// Decode as much as possible from `input` into `output`
    pub fn decode(&mut self, input: &mut BytesMut, output: &mut BytesMut) -> Result<()> {
        loop {
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(crlf_pos) = find_crlf(input) else {
                        return Ok(());
                    };
                    let line = String::from_utf8_lossy(&input[..crlf_pos]).to_string();
                    input.advance(crlf_pos + 2);

                    // Chunk extensions after ';' are ignored
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size_str, 16)
                        .map_err(|_| Error::InvalidChunkSize(size_str.to_string()))?;

                    if size == 0 {
                        self.state = DecoderState::Trailer;
                    } else {
                        self.chunk_remaining = size;
                        self.state = DecoderState::ChunkData;
                    }
                }

                DecoderState::ChunkData => {
                    if input.is_empty() {
                        return Ok(());
                    }
                    let take = self.chunk_remaining.min(input.len());
                    output.extend_from_slice(&input[..take]);
                    input.advance(take);
                    self.chunk_remaining -= take;

                    if self.chunk_remaining == 0 {
                        self.state = DecoderState::ChunkEnd;
                    }
                }

                DecoderState::ChunkEnd => {
                    if input.len() < 2 {
                        return Ok(());
                    }
                    if &input[..2] != b"\r\n" {
                        return Err(Error::Parse("Expected CRLF after chunk".to_string()));
                    }
                    input.advance(2);
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    let Some(crlf_pos) = find_crlf(input) else {
                        return Ok(());
                    };
                    if crlf_pos == 0 {
                        // Empty line ends the trailer section
                        input.advance(2);
                        self.state = DecoderState::Complete;
                    } else {
                        // Skip trailer headers
                        input.advance(crlf_pos + 2);
                    }
                }

                DecoderState::Complete => return Ok(()),
            }
        }
    }

    /// Check if decoding is complete
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Find CRLF in buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::from(input);
        let mut out = BytesMut::new();
        decoder.decode(&mut buf, &mut out)?;
        assert!(decoder.is_complete());
        Ok(out.to_vec())
    }

    #[test]
    fn test_writer_single_chunk() {
        let mut output = Vec::new();
        let writer = &mut output;
        let mut enc = ChunkedWriter::new(writer);
        enc.write_all(b"Hello").unwrap();
        enc.finish().unwrap();

        assert_eq!(output, b"5\r\nHello\r\n0\r\n\r\n");
    }

    #[test]
    fn test_writer_multiple_chunks() {
        let mut output = Vec::new();
        let mut enc = ChunkedWriter::new(&mut output);
        enc.write_all(b"Hello").unwrap();
        enc.write_all(b"World").unwrap();
        enc.finish().unwrap();

        assert_eq!(output, b"5\r\nHello\r\n5\r\nWorld\r\n0\r\n\r\n");
    }

    #[test]
    fn test_decode_single_chunk() {
        assert_eq!(decode_all(b"5\r\nHello\r\n0\r\n\r\n").unwrap(), b"Hello");
    }

    #[test]
    fn test_decode_multiple_chunks() {
        assert_eq!(
            decode_all(b"5\r\nHello\r\n5\r\nWorld\r\n0\r\n\r\n").unwrap(),
            b"HelloWorld"
        );
    }

    #[test]
    fn test_decode_with_extension() {
        assert_eq!(
            decode_all(b"5;ext=value\r\nHello\r\n0\r\n\r\n").unwrap(),
            b"Hello"
        );
    }

    #[test]
    fn test_decode_with_trailers() {
        assert_eq!(
            decode_all(b"5\r\nHello\r\n0\r\nX-Check: 1\r\n\r\n").unwrap(),
            b"Hello"
        );
    }

    #[test]
    fn test_decode_incremental() {
        let input: &[u8] = b"5\r\nHello\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::new();
        let mut out = BytesMut::new();

        for chunk in input.chunks(3) {
            buf.extend_from_slice(chunk);
            decoder.decode(&mut buf, &mut out).unwrap();
        }

        assert!(decoder.is_complete());
        assert_eq!(&out[..], b"Hello");
    }

    #[test]
    fn test_decode_bad_size() {
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        let mut out = BytesMut::new();
        assert!(decoder.decode(&mut buf, &mut out).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let mut encoded = Vec::new();
        let mut enc = ChunkedWriter::new(&mut encoded);
        for part in data.chunks(7) {
            enc.write_all(part).unwrap();
        }
        enc.finish().unwrap();

        assert_eq!(decode_all(&encoded).unwrap(), data);
    }
}
