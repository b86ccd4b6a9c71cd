//! Mutex-guarded socket plus in/out byte buffers, gated by read/write
//! permission flags and caller-supplied "is wanted" predicates.
//!
//! Grounded on `examples/original_source/tor/src/lib/evloop/events.c`'s
//! surrounding connection plumbing (`safe_connection_t` in the original),
//! re-expressed with an `mio` registration instead of two persistent
//! Libevent handles.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use tracing::warn;

use crate::event::{EventListener, EventSource};

/// What's plugged into the connection's socket slot.
enum Socket {
    /// Never had a socket (freshly constructed).
    None,
    /// Linked to another in-process connection instead of a real socket;
    /// never registered with a loop.
    Linked,
    Real(TcpStream),
}

/// A predicate consulted on every [`SafeConnection::refresh_events`] call.
pub type WantPredicate = Box<dyn Fn() -> bool + Send + Sync>;

/// Invoked after `inbuf`/`outbuf` are mutated, if `care_about_modified` is
/// set.
pub type ModifiedFn = Box<dyn Fn() + Send + Sync>;

struct Callbacks {
    is_read_wanted: WantPredicate,
    is_write_wanted: WantPredicate,
    on_modified: Option<ModifiedFn>,
}

struct Inner {
    socket: Socket,
    inbuf: VecDeque<u8>,
    outbuf: VecDeque<u8>,
    read_allowed: bool,
    write_allowed: bool,
    care_about_modified: bool,
    token: Option<Token>,
    registered_interest: Option<Interest>,
}

/// The shared base every connection type is built on: one socket, two
/// buffers, and the permission/predicate plumbing that decides whether the
/// loop should currently watch the socket for read or write readiness.
///
/// Lock discipline: every public method takes the connection's single
/// mutex at entry. The lock is not re-entrant — never call back into
/// upstream code while holding it.
pub struct SafeConnection {
    inner: Mutex<Inner>,
    callbacks: Callbacks,
    source: EventSource,
    listener: Arc<EventListener>,
}

impl SafeConnection {
    /// Constructs a connection with no socket yet, both permissions granted,
    /// and the supplied predicates/callback installed.
    pub fn new(
        is_read_wanted: WantPredicate,
        is_write_wanted: WantPredicate,
        on_modified: Option<ModifiedFn>,
        listener: Arc<EventListener>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                socket: Socket::None,
                inbuf: VecDeque::new(),
                outbuf: VecDeque::new(),
                read_allowed: true,
                write_allowed: true,
                care_about_modified: on_modified.is_some(),
                token: None,
                registered_interest: None,
            }),
            callbacks: Callbacks {
                is_read_wanted,
                is_write_wanted,
                on_modified,
            },
            source: EventSource::new(),
            listener,
        }
    }

    pub fn source(&self) -> &EventSource {
        &self.source
    }

    pub fn listener(&self) -> &Arc<EventListener> {
        &self.listener
    }

    /// Installs a real socket. Legal exactly once, while unlinked and
    /// socket-less.
    pub fn set_socket(&self, socket: TcpStream) {
        let mut inner = self.inner.lock().expect("connection lock poisoned");
        assert!(matches!(inner.socket, Socket::None), "set_socket called twice");
        inner.socket = Socket::Real(socket);
    }

    /// Marks the connection as linked to an in-process peer rather than a
    /// real socket; it will never be registered with a loop.
    pub fn set_linked(&self) {
        let mut inner = self.inner.lock().expect("connection lock poisoned");
        assert!(matches!(inner.socket, Socket::None), "set_linked called twice");
        inner.socket = Socket::Linked;
    }

    /// (Re)registers this connection's socket with `registry` under `token`,
    /// then calls [`refresh_events`](Self::refresh_events).
    pub fn register_events(&self, registry: &Registry, token: Token) -> io::Result<()> {
        {
            let mut inner = self.inner.lock().expect("connection lock poisoned");
            inner.token = Some(token);
            if let Socket::Real(ref mut stream) = inner.socket {
                let interest = Interest::READABLE;
                registry.register(stream, token, interest)?;
                inner.registered_interest = Some(interest);
            }
        }
        self.refresh_events(registry)
    }

    /// Recomputes desired interest from `(permission ∧ predicate())` for
    /// read and write and reregisters if it changed. Idempotent; callers
    /// must invoke it whenever a gate flag changes.
    pub fn refresh_events(&self, registry: &Registry) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("connection lock poisoned");
        let Socket::Real(ref mut stream) = inner.socket else {
            return Ok(());
        };
        let Some(token) = inner.token else {
            return Ok(());
        };

        let want_read = inner.read_allowed && (self.callbacks.is_read_wanted)();
        let want_write = inner.write_allowed && (self.callbacks.is_write_wanted)();

        let desired = match (want_read, want_write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        };

        if desired == inner.registered_interest {
            return Ok(());
        }

        match desired {
            Some(interest) => {
                if inner.registered_interest.is_some() {
                    registry.reregister(stream, token, interest)?;
                } else {
                    registry.register(stream, token, interest)?;
                }
            }
            None => {
                if inner.registered_interest.is_some() {
                    registry.deregister(stream)?;
                }
            }
        }
        inner.registered_interest = desired;
        Ok(())
    }

    /// Appends to `inbuf` and fires the modified callback, if any.
    pub(crate) fn push_inbuf(&self, bytes: &[u8]) {
        let care = {
            let mut inner = self.inner.lock().expect("connection lock poisoned");
            inner.inbuf.extend(bytes);
            inner.care_about_modified
        };
        if care {
            if let Some(cb) = &self.callbacks.on_modified {
                cb();
            }
        }
    }

    /// Appends to `outbuf` and fires the modified callback, if any.
    pub(crate) fn push_outbuf(&self, bytes: &[u8]) {
        let care = {
            let mut inner = self.inner.lock().expect("connection lock poisoned");
            inner.outbuf.extend(bytes);
            inner.care_about_modified
        };
        if care {
            if let Some(cb) = &self.callbacks.on_modified {
                cb();
            }
        }
    }

    pub(crate) fn drain_inbuf(&self, n: usize) -> Vec<u8> {
        let mut inner = self.inner.lock().expect("connection lock poisoned");
        inner.inbuf.drain(..n.min(inner.inbuf.len())).collect()
    }

    pub(crate) fn peek_inbuf(&self, n: usize) -> Vec<u8> {
        let inner = self.inner.lock().expect("connection lock poisoned");
        inner.inbuf.iter().take(n).copied().collect()
    }

    pub(crate) fn inbuf_len(&self) -> usize {
        self.inner.lock().expect("connection lock poisoned").inbuf.len()
    }

    pub(crate) fn outbuf_is_empty(&self) -> bool {
        self.inner.lock().expect("connection lock poisoned").outbuf.is_empty()
    }

    /// Reads raw bytes directly from the socket, bypassing `inbuf`. Used by
    /// specializations (such as the OR connection) that drive their own
    /// session layer (TLS) in front of the socket instead of reading
    /// plaintext through this type.
    pub(crate) fn read_raw(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().expect("connection lock poisoned");
        match &mut inner.socket {
            Socket::Real(stream) => stream.read(buf),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "no socket registered")),
        }
    }

    /// Writes raw bytes directly to the socket, bypassing `outbuf`.
    pub(crate) fn write_raw(&self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().expect("connection lock poisoned");
        match &mut inner.socket {
            Socket::Real(stream) => stream.write(buf),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "no socket registered")),
        }
    }

    /// Returns the pending `SO_ERROR` for the socket, if any, clearing it.
    /// Used after a non-blocking `connect()` reports writable to learn
    /// whether the connection actually succeeded.
    pub(crate) fn take_socket_error(&self) -> io::Result<Option<io::Error>> {
        let inner = self.inner.lock().expect("connection lock poisoned");
        match &inner.socket {
            Socket::Real(stream) => stream.take_error(),
            _ => Ok(None),
        }
    }

    pub fn set_read_allowed(&self, allowed: bool) {
        self.inner.lock().expect("connection lock poisoned").read_allowed = allowed;
    }

    pub fn set_write_allowed(&self, allowed: bool) {
        self.inner.lock().expect("connection lock poisoned").write_allowed = allowed;
    }

    /// Unregisters the loop handle, closes the socket, and drops it. Safe to
    /// call multiple times; only the first call does anything.
    pub fn close(&self, registry: &Registry) {
        let mut inner = self.inner.lock().expect("connection lock poisoned");
        if let Socket::Real(ref mut stream) = inner.socket {
            let _ = registry.deregister(stream);
        }
        if matches!(inner.socket, Socket::Real(_)) {
            inner.socket = Socket::Linked; // drops the stream without a second deregister
        }
        if !matches!(inner.socket, Socket::None) {
            warn!("safe connection closed");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::EventListener;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn starts_with_both_permissions_granted() {
        let listener = EventListener::new(None);
        let conn = SafeConnection::new(Box::new(|| false), Box::new(|| false), None, listener);
        let inner = conn.inner.lock().unwrap();
        assert!(inner.read_allowed);
        assert!(inner.write_allowed);
    }

    #[test]
    fn modified_callback_fires_on_push() {
        let listener = EventListener::new(None);
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        let conn = SafeConnection::new(
            Box::new(|| false),
            Box::new(|| false),
            Some(Box::new(move || fired2.store(true, Ordering::SeqCst))),
            listener,
        );
        conn.push_inbuf(b"hello");
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(conn.inbuf_len(), 5);
    }
}
