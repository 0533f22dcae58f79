//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Own one accepted socket and its buffers
//! - Drive reads and writes on readiness (or on an immediate "try now")
//! - Hand inbound bytes to the protocol collaborator and flush what it produces
//! - Keep its poller interest in line with pending output

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

/// Source of connection ids; only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection, used in logs.
///
/// Unlike the pool slot (`Token`), an id is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Checked out but not yet registered with the poller.
    Pending,
    /// Registered and exchanging data.
    Active,
    /// No more reads; closes once pending output is flushed.
    Draining,
    /// Deregistered and closed.
    Closed,
}

/// What a protocol wants done with the connection after consuming input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Keep reading.
    Continue,
    /// Stop reading, flush pending output, then close.
    CloseAfterFlush,
    /// Close now, discarding pending output.
    Close,
}

/// Application side of a connection.
///
/// Called on the controller thread only. Implementations must not block.
pub trait Protocol: Send {
    /// Consume bytes from `inbound` (leave any incomplete tail in place) and
    /// append response bytes to `outbound`.
    fn on_inbound(&mut self, inbound: &mut Vec<u8>, outbound: &mut Vec<u8>) -> Progress;

    /// The connection has been closed, for whatever reason.
    fn on_closed(&mut self) {}
}

/// Builds a protocol instance for each accepted peer.
pub type ProtocolFactory = Arc<dyn Fn(SocketAddr) -> Box<dyn Protocol> + Send + Sync>;

/// Reusable I/O buffers of a connection.
#[derive(Debug, Default)]
pub struct Buffers {
    pub(crate) inbound: Vec<u8>,
    pub(crate) outbound: Vec<u8>,
}

impl Buffers {
    pub fn with_capacity(inbound: usize, outbound: usize) -> Self {
        Self {
            inbound: Vec::with_capacity(inbound),
            outbound: Vec::with_capacity(outbound),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.inbound.clear();
        self.outbound.clear();
    }
}

/// One accepted socket, exclusively owned by the controller's pool.
pub struct Connection {
    id: ConnectionId,
    token: Token,
    stream: TcpStream,
    remote_addr: SocketAddr,
    state: ConnectionState,
    last_activity: Instant,
    interest: Option<Interest>,
    close_requested: bool,
    read_chunk: usize,
    read_budget: usize,
    /// The last read step stopped on its budget, not on `WouldBlock`.
    unread_input: bool,
    buffers: Buffers,
    protocol: Box<dyn Protocol>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state)
            .field("inbound", &self.buffers.inbound.len())
            .field("outbound", &self.buffers.outbound.len())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        token: Token,
        stream: TcpStream,
        remote_addr: SocketAddr,
        buffers: Buffers,
        read_chunk: usize,
        read_budget: usize,
        protocol: Box<dyn Protocol>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            token,
            stream,
            remote_addr,
            state: ConnectionState::Pending,
            last_activity: Instant::now(),
            interest: None,
            close_requested: false,
            read_chunk: read_chunk.max(1),
            read_budget: read_budget.max(1),
            unread_input: false,
            buffers,
            protocol,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Time since the last byte was read or written.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Active | ConnectionState::Draining)
    }

    /// Whether the controller should close and release this connection.
    pub fn wants_close(&self) -> bool {
        self.close_requested
            || (self.state == ConnectionState::Draining && self.buffers.outbound.is_empty())
    }

    /// Whether bytes may still be waiting in the socket although no new
    /// readiness will be reported for them.
    pub fn has_unread_input(&self) -> bool {
        self.unread_input && self.state == ConnectionState::Active && !self.close_requested
    }

    /// Bytes queued for the peer.
    pub fn pending_output(&self) -> usize {
        self.buffers.outbound.len()
    }

    /// Register for read readiness and mark the connection active.
    pub fn open(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, Interest::READABLE)?;
        self.interest = Some(Interest::READABLE);
        self.state = ConnectionState::Active;
        self.last_activity = Instant::now();
        tracing::trace!(connection_id = %self.id, peer_addr = %self.remote_addr, "Connection opened");
        Ok(())
    }

    /// Make as much progress as the socket allows.
    ///
    /// `event` is `None` for an optimistic attempt outside of a readiness
    /// notification; both directions are tried then.
    pub fn on_ready(&mut self, registry: &Registry, event: Option<&Event>) -> io::Result<()> {
        if !self.is_open() {
            return Ok(());
        }

        let (readable, writable) = match event {
            Some(event) => (
                event.is_readable() || event.is_read_closed() || event.is_error(),
                event.is_writable() || event.is_write_closed(),
            ),
            None => (true, true),
        };

        if readable && self.state == ConnectionState::Active {
            self.handle_inbound()?;
        }

        if self.close_requested {
            return Ok(());
        }

        if writable || !self.buffers.outbound.is_empty() {
            self.handle_outbound()?;
        }

        self.update_interest(registry)
    }

    /// Read in `read_chunk` steps, handing each step to the protocol before
    /// reading more, until the socket would block or `read_budget` is spent.
    fn handle_inbound(&mut self) -> io::Result<()> {
        self.unread_input = false;
        let mut budget = self.read_budget;

        while self.state == ConnectionState::Active && !self.close_requested {
            if budget == 0 {
                self.unread_input = true;
                break;
            }

            match self.read_once(self.read_chunk.min(budget))? {
                Some(0) => {
                    tracing::trace!(connection_id = %self.id, "Peer closed its side");
                    self.state = ConnectionState::Draining;
                }
                Some(n) => {
                    budget -= n;
                    self.consume_inbound();
                }
                None => break,
            }
        }
        Ok(())
    }

    /// One read of at most `limit` bytes. `None` when the socket would block.
    fn read_once(&mut self, limit: usize) -> io::Result<Option<usize>> {
        let inbound = &mut self.buffers.inbound;
        let start = inbound.len();
        inbound.resize(start + limit, 0);

        loop {
            match self.stream.read(&mut inbound[start..]) {
                Ok(n) => {
                    inbound.truncate(start + n);
                    if n > 0 {
                        self.last_activity = Instant::now();
                    }
                    return Ok(Some(n));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    inbound.truncate(start);
                    return Ok(None);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    inbound.truncate(start);
                    return Err(e);
                }
            }
        }
    }

    fn consume_inbound(&mut self) {
        let Buffers { inbound, outbound } = &mut self.buffers;
        match self.protocol.on_inbound(inbound, outbound) {
            Progress::Continue => {}
            Progress::CloseAfterFlush => self.state = ConnectionState::Draining,
            Progress::Close => self.close_requested = true,
        }
    }

    fn handle_outbound(&mut self) -> io::Result<()> {
        let outbound = &mut self.buffers.outbound;
        let mut written = 0;

        while written < outbound.len() {
            match self.stream.write(&outbound[written..]) {
                Ok(0) => {
                    outbound.drain(..written);
                    return Err(io::ErrorKind::WriteZero.into());
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    outbound.drain(..written);
                    return Err(e);
                }
            }
        }

        if written > 0 {
            outbound.drain(..written);
            self.last_activity = Instant::now();
        }
        Ok(())
    }

    fn update_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let wanted = if self.buffers.outbound.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };

        if self.interest != Some(wanted) {
            registry.reregister(&mut self.stream, self.token, wanted)?;
            self.interest = Some(wanted);
        }
        Ok(())
    }

    /// Deregister and close the socket. Safe to call more than once.
    pub fn close(&mut self, registry: &Registry) {
        if self.state == ConnectionState::Closed {
            return;
        }

        if self.interest.take().is_some() {
            if let Err(e) = registry.deregister(&mut self.stream) {
                tracing::trace!(connection_id = %self.id, error = %e, "Deregistration failed");
            }
        }
        let _ = self.stream.shutdown(std::net::Shutdown::Both);

        self.state = ConnectionState::Closed;
        self.protocol.on_closed();
    }

    /// Hand back the buffers for reuse. The socket is dropped here.
    pub(crate) fn into_buffers(self) -> Buffers {
        let mut buffers = self.buffers;
        buffers.clear();
        buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Poll;
    use std::io::{Read as _, Write as _};
    use std::sync::atomic::AtomicUsize;

    struct Echo {
        closed: Arc<AtomicUsize>,
        finish_on: Option<u8>,
    }

    impl Protocol for Echo {
        fn on_inbound(&mut self, inbound: &mut Vec<u8>, outbound: &mut Vec<u8>) -> Progress {
            let finish = self.finish_on.is_some_and(|b| inbound.contains(&b));
            outbound.append(inbound);
            if finish {
                Progress::CloseAfterFlush
            } else {
                Progress::Continue
            }
        }

        fn on_closed(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn connected(finish_on: Option<u8>) -> (Poll, Connection, std::net::TcpStream, Arc<AtomicUsize>) {
        let closed = Arc::new(AtomicUsize::new(0));
        let protocol = Box::new(Echo {
            closed: Arc::clone(&closed),
            finish_on,
        });
        let (poll, connection, client) = connected_with(protocol, 16, 1024);
        (poll, connection, client, closed)
    }

    fn connected_with(
        protocol: Box<dyn Protocol>,
        read_chunk: usize,
        read_budget: usize,
    ) -> (Poll, Connection, std::net::TcpStream) {
        let poll = Poll::new().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut connection = Connection::new(
            Token(0),
            TcpStream::from_std(server),
            peer,
            Buffers::with_capacity(64, 64),
            read_chunk,
            read_budget,
            protocol,
        );
        assert_eq!(connection.state(), ConnectionState::Pending);
        connection.open(poll.registry()).unwrap();
        (poll, connection, client)
    }

    /// Drive the connection until `done` holds, giving loopback time to deliver.
    fn drive_until(poll: &Poll, connection: &mut Connection, done: impl Fn(&Connection) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(connection) {
            assert!(Instant::now() < deadline, "connection made no progress");
            connection.on_ready(poll.registry(), None).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn echoes_in_small_read_chunks() {
        let (poll, mut connection, mut client, _) = connected(None);
        assert_eq!(connection.state(), ConnectionState::Active);

        let message = b"more than sixteen bytes of payload";
        client.write_all(message).unwrap();

        let mut echoed = vec![0u8; message.len()];
        let mut received = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        client.set_nonblocking(true).unwrap();
        while received < message.len() {
            assert!(Instant::now() < deadline, "echo never arrived");
            connection.on_ready(poll.registry(), None).unwrap();
            match client.read(&mut echoed[received..]) {
                Ok(n) => received += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                Err(e) => panic!("read failed: {e}"),
            }
        }
        assert_eq!(&echoed, message);
        assert!(!connection.wants_close());
        assert_eq!(connection.pending_output(), 0);
    }

    #[test]
    fn close_after_flush_waits_for_output() {
        let (poll, mut connection, mut client, _) = connected(Some(b'!'));
        client.write_all(b"bye!").unwrap();

        drive_until(&poll, &mut connection, Connection::wants_close);
        assert_eq!(connection.state(), ConnectionState::Draining);
        assert_eq!(connection.pending_output(), 0);

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"bye!");
    }

    #[test]
    fn peer_eof_drains_connection() {
        let (poll, mut connection, client, _) = connected(None);
        client.shutdown(std::net::Shutdown::Write).unwrap();

        drive_until(&poll, &mut connection, Connection::wants_close);
        assert_eq!(connection.state(), ConnectionState::Draining);
    }

    /// Discards input, remembering the largest buffer it was handed.
    struct Meter {
        largest: Arc<AtomicUsize>,
        total: Arc<AtomicUsize>,
    }

    impl Protocol for Meter {
        fn on_inbound(&mut self, inbound: &mut Vec<u8>, _outbound: &mut Vec<u8>) -> Progress {
            self.largest.fetch_max(inbound.len(), Ordering::SeqCst);
            self.total.fetch_add(inbound.len(), Ordering::SeqCst);
            inbound.clear();
            Progress::Continue
        }
    }

    #[test]
    fn fast_peer_is_read_in_bounded_steps() {
        const CHUNK: usize = 512;
        const BUDGET: usize = 4 * CHUNK;
        const SENT: usize = 1024 * 1024;

        let largest = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));
        let protocol = Box::new(Meter {
            largest: Arc::clone(&largest),
            total: Arc::clone(&total),
        });
        let (poll, mut connection, mut client) = connected_with(protocol, CHUNK, BUDGET);

        let writer = std::thread::spawn(move || {
            client.write_all(&vec![7u8; SENT]).unwrap();
        });

        let mut budget_hit = false;
        let deadline = Instant::now() + Duration::from_secs(10);
        while total.load(Ordering::SeqCst) < SENT {
            assert!(Instant::now() < deadline, "peer data never fully read");
            let before = total.load(Ordering::SeqCst);
            connection.on_ready(poll.registry(), None).unwrap();
            let step = total.load(Ordering::SeqCst) - before;
            assert!(step <= BUDGET, "one step read {step} bytes");

            if connection.has_unread_input() {
                budget_hit = true;
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        writer.join().unwrap();

        assert!(budget_hit);
        assert!(largest.load(Ordering::SeqCst) <= CHUNK);
        assert!(connection.is_open());
    }

    #[test]
    fn close_is_idempotent() {
        let (poll, mut connection, mut client, closed) = connected(None);

        connection.close(poll.registry());
        connection.close(poll.registry());
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(!connection.is_open());
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        // Further readiness is ignored.
        connection.on_ready(poll.registry(), None).unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);
    }

    #[test]
    fn ids_are_unique_and_displayable() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn-"));
    }
}
