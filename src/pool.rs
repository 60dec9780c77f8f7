//! Connection pool
//!
//! Keeps idle keep-alive connections keyed by (host, port) for reuse by
//! later requests. The pool belongs to a single thread at a time; when it
//! is touched from a different thread than the one that used it last, it
//! resets to empty and transfers ownership, so no locking is needed.

use super::session::{PollEvents, SessionOps};
use log::debug;
use std::collections::HashMap;
use std::thread::{self, ThreadId};
use std::time::Duration;
use url::Url;

/// Pool key for a target URL: (host, port)
pub fn key_for(uri: &Url) -> Option<(String, u16)> {
    let host = uri.host_str()?.to_string();
    let port = uri.port_or_known_default()?;
    Some((host, port))
}

/// An established connection to an origin (possibly through a proxy)
///
/// Owns the duplex session stream. Between requests the connection lives
/// in the pool; during a request the execution loop owns it exclusively.
pub struct Connection {
    base: Url,
    proxy: Option<Url>,
    session: Box<dyn SessionOps>,
}

impl Connection {
    /// Create a connection for the given base URL
    pub fn new(base: Url, session: Box<dyn SessionOps>, proxy: Option<Url>) -> Self {
        Connection {
            base,
            proxy,
            session,
        }
    }

    /// The base URL (scheme, host, port) this connection serves
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// The proxy this connection was opened through, if any
    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    /// Access the underlying session stream
    pub fn session_mut(&mut self) -> &mut dyn SessionOps {
        &mut *self.session
    }

    /// Liveness probe
    ///
    /// A connection is dropped iff the peer closed it: a zero-timeout poll
    /// that reports nothing pending means alive; pending data is peeked,
    /// and EOF or any error on the peek means dropped.
    pub fn is_dropped(&mut self) -> bool {
        match self
            .session
            .poll(PollEvents::Read, Some(Duration::from_millis(0)))
        {
            Ok(false) => false,
            Ok(true) => {
                let mut byte = [0u8; 1];
                match self.session.peek(&mut byte) {
                    Ok(0) => true,
                    Ok(_) => false,
                    Err(_) => true,
                }
            }
            Err(_) => true,
        }
    }

    /// Close both directions of the stream
    pub fn close(&mut self) {
        let _ = self.session.close();
    }
}

/// Per-owner connection pool
pub struct ConnectionPool {
    owner: ThreadId,
    entries: HashMap<(String, u16), Connection>,
}

impl ConnectionPool {
    /// Create an empty pool owned by the current thread
    pub fn new() -> Self {
        ConnectionPool {
            owner: thread::current().id(),
            entries: HashMap::new(),
        }
    }

    /// Reset the pool if the calling thread is not the recorded owner
    fn rebind(&mut self) {
        let current = thread::current().id();
        if current != self.owner {
            debug!("connection pool changed owner, resetting");
            self.close_all();
            self.owner = current;
        }
    }

    /// Take a live pooled connection for the URL, if one exists
    ///
    /// The entry leaves the pool; the caller returns it with
    /// [`ConnectionPool::checkin`] when the response allows reuse. A
    /// dropped entry is closed and discarded.
    pub fn checkout(&mut self, uri: &Url) -> Option<Connection> {
        self.rebind();
        let key = key_for(uri)?;
        let mut conn = self.entries.remove(&key)?;
        if conn.is_dropped() {
            debug!("evicting dead connection to {}:{}", key.0, key.1);
            conn.close();
            return None;
        }
        debug!("reusing connection to {}:{}", key.0, key.1);
        Some(conn)
    }

    /// Return a reusable connection to the pool
    pub fn checkin(&mut self, conn: Connection) {
        self.rebind();
        if let Some(key) = key_for(conn.base()) {
            if let Some(mut old) = self.entries.insert(key, conn) {
                old.close();
            }
        }
    }

    /// Close and remove the pooled connection for a URL
    pub fn close(&mut self, uri: &Url) -> bool {
        self.rebind();
        let Some(key) = key_for(uri) else {
            return false;
        };
        match self.entries.remove(&key) {
            Some(mut conn) => {
                conn.close();
                true
            }
            None => false,
        }
    }

    /// Close and remove every pooled connection
    pub fn close_all(&mut self) {
        for (_, mut conn) in self.entries.drain() {
            conn.close();
        }
    }

    /// Whether a connection for the URL is currently pooled
    pub fn contains(&self, uri: &Url) -> bool {
        key_for(uri).is_some_and(|key| self.entries.contains_key(&key))
    }

    /// Number of pooled connections
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.close_all();
    }
}
