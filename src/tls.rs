//! TLS session operations
//!
//! OpenSSL-backed implementation of the `SessionOps` trait, so the HTTP
//! layer is transparent to whether a connection is encrypted. Only the
//! client side exists here: the connector performs the handshake with SNI
//! and default peer verification.

use super::session::{poll_fd, PollEvents, SessionOps};
use super::{Error, Result};
use openssl::ssl::{ErrorCode, SslConnector, SslMethod, SslStream};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// TLS session operations
///
/// Wraps an OpenSSL `SslStream` over a connected TCP stream.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
}

impl TlsSessionOps {
    /// Perform a client handshake against `servername`
    ///
    /// The servername is used both for SNI and for certificate
    /// verification.
    pub fn connect(tcp_stream: TcpStream, servername: &str) -> Result<Self> {
        let connector = SslConnector::builder(SslMethod::tls())?.build();

        let stream = connector
            .connect(servername, tcp_stream)
            .map_err(|e| Error::Handshake(e.to_string()))?;

        Ok(TlsSessionOps { stream })
    }

    fn map_io(e: io::Error) -> Error {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::Io(e),
        }
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        // Plaintext already decrypted inside the TLS buffer counts as
        // readable even though the socket itself may be idle.
        if events == PollEvents::Read && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }
        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Self::map_io)
    }

    fn peek(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream.ssl_peek(buf) {
            Ok(n) => Ok(n),
            // Clean close notify is EOF, not an error
            Err(e) if e.code() == ErrorCode::ZERO_RETURN => Ok(0),
            Err(e) => Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                e.to_string(),
            ))),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Self::map_io)
    }

    fn close(&mut self) -> Result<()> {
        // Best-effort close notify, then tear down the socket
        let _ = self.stream.shutdown();
        use std::net::Shutdown;
        match self.stream.get_ref().shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
