//! The network event loop: accepts and dials OR connections, and drives
//! each one's `on_readable`/`on_writable`/`on_connectable` from `mio`
//! readiness events.
//!
//! Grounded on `pool::worker::WorkerThread`'s poll/shutdown/wake skeleton,
//! extended from a single wake token to a full connection-token dispatch
//! table, and on `examples/original_source/tor/src/lib/evloop/workqueue.c`'s
//! sibling accept loop in the original's `main.c` for the one-thread-per-CPU
//! sizing this crate's `eventloop.num_eventloops` knob controls.
//!
//! Only one loop owns the listening socket (see [`run_acceptor`]); every
//! loop, including that one, also accepts hand-offs through its
//! [`LoopHandle`], which is how the acceptor distributes accepted sockets
//! round-robin and how a caller asks a particular loop to dial out.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coarsetime::Instant;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, Registry, Token, Waker};
use rustls::pki_types::ServerName;
use tracing::{debug, trace, warn};

use crate::channel::{AuthSigner, OrConnection, OrState};
use crate::config::{AuthMethod, RateLimitConfig};
use crate::event::EventListener;

const WAKE_TOKEN: Token = Token(0);
const FIRST_CONN_TOKEN: usize = 1;

/// How long one pass blocks in `poll` before re-checking the shutdown flag
/// and the hand-off inbox even with nothing else to wake it.
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// A socket handed to a loop from another thread: either already accepted,
/// or mid-`connect()` and waiting to be driven to completion.
enum Incoming {
    Accepted(TcpStream, SocketAddr),
    Dial(TcpStream, ServerName<'static>),
}

/// The shared material every [`OrConnection`] a loop adopts is built from.
pub struct ConnectionFactory {
    pub server_config: Option<Arc<rustls::ServerConfig>>,
    pub client_config: Option<Arc<rustls::ClientConfig>>,
    pub certs_payload: Vec<u8>,
    pub auth_methods: Vec<AuthMethod>,
    pub signer: Option<Arc<dyn AuthSigner>>,
    pub rate: RateLimitConfig,
}

/// A handle other threads use to hand a socket to a running [`NetLoop`]
/// without reaching into its `Poll`.
#[derive(Clone)]
pub struct LoopHandle {
    inbox: Arc<Mutex<VecDeque<Incoming>>>,
    waker: Arc<Waker>,
}

impl LoopHandle {
    /// Queues an already-accepted socket for this loop to adopt as a
    /// responder connection, waking the loop if it's blocked in `poll`.
    pub fn hand_off_accepted(&self, stream: TcpStream, addr: SocketAddr) {
        self.inbox.lock().expect("netloop inbox poisoned").push_back(Incoming::Accepted(stream, addr));
        let _ = self.waker.wake();
    }

    /// Queues a socket mid-`connect()` for this loop to adopt as an
    /// initiator connection once it becomes writable.
    pub fn hand_off_dial(&self, stream: TcpStream, server_name: ServerName<'static>) {
        self.inbox.lock().expect("netloop inbox poisoned").push_back(Incoming::Dial(stream, server_name));
        let _ = self.waker.wake();
    }
}

/// One event-loop thread's worth of OR connections.
pub struct NetLoop {
    index: usize,
    poll: Poll,
    waker: Arc<Waker>,
    inbox: Arc<Mutex<VecDeque<Incoming>>>,
    connections: HashMap<Token, Arc<OrConnection>>,
    next_token: usize,
    shutdown: Arc<AtomicBool>,
    factory: Arc<ConnectionFactory>,
    event_listener: Arc<EventListener>,
}

impl NetLoop {
    pub fn new(index: usize, factory: Arc<ConnectionFactory>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            index,
            poll,
            waker,
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            connections: HashMap::new(),
            next_token: FIRST_CONN_TOKEN,
            shutdown: Arc::new(AtomicBool::new(false)),
            factory,
            event_listener: EventListener::new(None),
        })
    }

    /// A cloneable handle other threads use to hand sockets to this loop.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            inbox: Arc::clone(&self.inbox),
            waker: Arc::clone(&self.waker),
        }
    }

    /// A handle used to ask this loop to stop after its current pass.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Adopts every socket queued on this loop's inbox since the last pass.
    fn drain_inbox(&mut self) {
        let queued: Vec<Incoming> = self.inbox.lock().expect("netloop inbox poisoned").drain(..).collect();
        for item in queued {
            match item {
                Incoming::Accepted(stream, addr) => self.adopt_incoming(stream, addr),
                Incoming::Dial(stream, server_name) => self.adopt_outgoing(stream, server_name),
            }
        }
    }

    fn adopt_incoming(&mut self, stream: TcpStream, addr: SocketAddr) {
        let Some(server_config) = self.factory.server_config.clone() else {
            warn!(worker = self.index, %addr, "rejecting incoming connection: no server TLS configured");
            return;
        };
        let conn = match OrConnection::new_incoming(
            Arc::clone(&self.event_listener),
            server_config,
            self.factory.certs_payload.clone(),
            self.factory.auth_methods.clone(),
            self.factory.signer.clone(),
            &self.factory.rate,
            Instant::now(),
        ) {
            Ok(conn) => Arc::new(conn),
            Err(err) => {
                warn!(worker = self.index, %addr, %err, "failed to start TLS for incoming connection");
                return;
            }
        };
        let token = self.allocate_token();
        if let Err(err) = conn.attach_incoming_socket(stream, self.registry(), token) {
            warn!(worker = self.index, %addr, %err, "failed to register incoming connection");
            return;
        }
        debug!(worker = self.index, %addr, ?token, "accepted connection");
        self.connections.insert(token, conn);
    }

    fn adopt_outgoing(&mut self, stream: TcpStream, server_name: ServerName<'static>) {
        let Some(client_config) = self.factory.client_config.clone() else {
            warn!(worker = self.index, "cannot dial out: no client TLS configured");
            return;
        };
        let conn = match OrConnection::new_outgoing(
            Arc::clone(&self.event_listener),
            client_config,
            server_name,
            self.factory.certs_payload.clone(),
            self.factory.auth_methods.clone(),
            self.factory.signer.clone(),
            &self.factory.rate,
            Instant::now(),
        ) {
            Ok(conn) => Arc::new(conn),
            Err(err) => {
                warn!(worker = self.index, %err, "failed to start TLS for outgoing connection");
                return;
            }
        };
        let token = self.allocate_token();
        if let Err(err) = conn.attach_outgoing_socket(stream, self.registry(), token) {
            warn!(worker = self.index, %err, "failed to register outgoing connection");
            return;
        }
        debug!(worker = self.index, ?token, "dialing connection");
        self.connections.insert(token, conn);
    }

    /// Runs the loop until `shutdown_flag` is set. Intended to be called on
    /// its own OS thread.
    pub fn run(&mut self) {
        let mut events = Events::with_capacity(256);
        debug!(worker = self.index, "netloop starting");
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!(worker = self.index, "netloop exiting");
                for conn in self.connections.values() {
                    conn.close(self.poll.registry());
                }
                return;
            }

            if let Err(err) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if err.kind() != io::ErrorKind::Interrupted {
                    warn!(worker = self.index, %err, "netloop poll failed");
                }
            }

            self.drain_inbox();
            self.service_events(&events);
        }
    }

    fn service_events(&mut self, events: &Events) {
        let now = Instant::now();
        let mut closed = Vec::new();

        for event in events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                continue;
            }
            let Some(conn) = self.connections.get(&token).cloned() else {
                trace!(worker = self.index, ?token, "event for unknown token");
                continue;
            };

            if event.is_error() || event.is_read_closed() || event.is_write_closed() {
                trace!(worker = self.index, ?token, "connection closed by peer");
                conn.close(self.poll.registry());
                closed.push(token);
                continue;
            }

            if conn.state() == OrState::TcpConnecting {
                if let Err(err) = conn.on_connectable(self.poll.registry()) {
                    debug!(worker = self.index, ?token, %err, "outgoing connect failed");
                    closed.push(token);
                    continue;
                }
            }

            if event.is_readable() {
                let _ = conn.on_readable(self.poll.registry(), now);
            }
            if event.is_writable() {
                let _ = conn.on_writable(self.poll.registry(), now);
            }

            if conn.state() == OrState::Closed {
                closed.push(token);
            }
        }

        for token in closed {
            self.connections.remove(&token);
        }
    }
}

const LISTENER_TOKEN: Token = Token(0);

/// Accepts connections on `listener` until `shutdown` is set, handing each
/// one to the next loop in `targets` round-robin. Intended to run on its
/// own thread, separate from every [`NetLoop`] (none of them owns the
/// listening socket directly).
pub fn run_acceptor(mut listener: TcpListener, targets: Vec<LoopHandle>, shutdown: Arc<AtomicBool>) -> io::Result<()> {
    assert!(!targets.is_empty(), "run_acceptor needs at least one loop to hand sockets to");
    let poll = Poll::new()?;
    poll.registry().register(&mut listener, LISTENER_TOKEN, mio::Interest::READABLE)?;

    let mut events = Events::with_capacity(32);
    let mut next_target = 0usize;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            if err.kind() != io::ErrorKind::Interrupted {
                warn!(%err, "acceptor poll failed");
            }
            continue;
        }
        for event in events.iter() {
            if event.token() != LISTENER_TOKEN {
                continue;
            }
            loop {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        targets[next_target].hand_off_accepted(stream, addr);
                        next_target = (next_target + 1) % targets.len();
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        break;
                    }
                }
            }
        }
    }
}
