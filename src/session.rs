//! Session operations abstraction
//!
//! This module provides the session operations pattern that allows
//! transparent switching between plain TCP and TLS connections, plus the
//! `Connector` used to open new sessions for a target URL.
//!
//! Timeouts are a transport concern: the connector configures them on the
//! socket, and expired ones surface as `Error::Timeout` from read/write.

use super::{Error, Result, DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;
use url::Url;

/// Session operations trait
///
/// This trait defines the operations that can be performed on a session,
/// abstracting over plain TCP and TLS connections.
pub trait SessionOps: Send {
    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation.
    /// A zero timeout makes this a non-blocking readiness probe.
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Read data without consuming it
    ///
    /// Only called after `poll` reported readability; a return of 0 means
    /// the peer closed the connection.
    fn peek(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Close the session
    fn close(&mut self) -> Result<()>;

    /// Write an entire buffer
    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// Poll a raw file descriptor for readiness
pub(crate) fn poll_fd(fd: i32, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout.map(|d| d.as_millis() as i32).unwrap_or(-1); // -1 = infinite

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

    if result < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    Ok(result > 0)
}

fn map_io(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Io(e),
    }
}

/// Plain TCP session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create session operations from a connected TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(map_io)
    }

    fn peek(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.peek(buf).map_err(map_io)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(map_io)
    }

    fn close(&mut self) -> Result<()> {
        use std::net::Shutdown;
        self.stream.shutdown(Shutdown::Both).map_err(Error::from)
    }
}

/// Transport connector
///
/// Opens a fresh duplex session for a target URL. The execution loop never
/// dials sockets itself; swapping the connector swaps the transport.
pub trait Connector: Send + Sync {
    fn connect(&self, uri: &Url) -> Result<Box<dyn SessionOps>>;
}

/// Default connector: plain TCP for `http`, OpenSSL TLS for `https`
pub struct NetConnector {
    tls: bool,
    timeout: Option<Duration>,
}

impl NetConnector {
    /// Connector with TLS support enabled
    pub fn new() -> Self {
        NetConnector {
            tls: true,
            timeout: None,
        }
    }

    /// Connector that only speaks plain `http`
    ///
    /// An `https` target then fails with `MissingTlsProvider`.
    pub fn plain() -> Self {
        NetConnector {
            tls: false,
            timeout: None,
        }
    }

    /// Set a read/write timeout applied to every opened socket
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn dial(&self, host: &str, port: u16) -> Result<TcpStream> {
        let stream = TcpStream::connect(format!("{}:{}", host, port))?;
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;
        Ok(stream)
    }
}

impl Default for NetConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for NetConnector {
    fn connect(&self, uri: &Url) -> Result<Box<dyn SessionOps>> {
        let host = uri
            .host_str()
            .ok_or_else(|| Error::Parse(format!("URL without a host: {}", uri)))?;

        match uri.scheme() {
            "http" => {
                let port = uri.port().unwrap_or(DEFAULT_HTTP_PORT);
                Ok(Box::new(FdSessionOps::new(self.dial(host, port)?)))
            }
            "https" => {
                if !self.tls {
                    return Err(Error::MissingTlsProvider {
                        uri: uri.to_string(),
                    });
                }
                let port = uri.port().unwrap_or(DEFAULT_HTTPS_PORT);
                let stream = self.dial(host, port)?;
                Ok(Box::new(super::tls::TlsSessionOps::connect(stream, host)?))
            }
            scheme => Err(Error::UnsupportedScheme {
                scheme: scheme.to_string(),
                uri: uri.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_fd_session_ops() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"Hello").unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = FdSessionOps::new(stream);

        assert!(session
            .poll(PollEvents::Read, Some(Duration::from_secs(1)))
            .unwrap());

        // Peek does not consume
        let mut buf = [0u8; 5];
        let n = session.peek(&mut buf).unwrap();
        assert!(n > 0);

        let n = session.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &b"Hello"[..n]);

        handle.join().unwrap();
    }

    #[test]
    fn test_write_all() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).unwrap();
            assert_eq!(buf, b"payload");
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = FdSessionOps::new(stream);
        session.write_all(b"payload").unwrap();
        session.close().unwrap();

        handle.join().unwrap();
    }

    #[test]
    fn test_connector_rejects_unknown_scheme() {
        let connector = NetConnector::new();
        let uri = Url::parse("ftp://example.com/file").unwrap();
        match connector.connect(&uri) {
            Err(Error::UnsupportedScheme { scheme, .. }) => assert_eq!(scheme, "ftp"),
            other => panic!("expected UnsupportedScheme, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_plain_connector_rejects_https() {
        let connector = NetConnector::plain();
        let uri = Url::parse("https://example.com/").unwrap();
        assert!(matches!(
            connector.connect(&uri),
            Err(Error::MissingTlsProvider { .. })
        ));
    }
}
