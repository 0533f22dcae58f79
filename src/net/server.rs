//! Server-side acceptor with admission control.
//!
//! # Responsibilities
//! - Own the listening socket and register it for accept readiness
//! - Release the startup gate once registered
//! - Accept pending sockets while the server is not overloaded
//! - Enforce total and per-host connection ceilings
//! - Hand admitted sockets to the pool and try a first read right away
//!
//! # Design Decisions
//! - Readiness is edge-triggered, so a backlog flag remembers that sockets
//!   may still be queued; it is only cleared when accept reports nothing pending
//! - An overloaded iteration leaves queued sockets to the OS for a later iteration
//! - Rejected sockets are closed without writing anything

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};

use crate::config::{ConnectorConfig, LimitsConfig};
use crate::lifecycle::{ShutdownHandle, StartupGate};
use crate::net::admission::{self, Admission, OverloadPolicy, SharedLimits};
use crate::net::connection::ProtocolFactory;
use crate::net::controller::{ConnectionController, ControllerContext, ControllerError};
use crate::net::stats::ControllerStats;
use crate::net::LISTENER;
use crate::observability::metrics;

/// Listening-socket acceptor.
pub struct ServerAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    limits: SharedLimits,
    overload: Arc<dyn OverloadPolicy>,
    gate: StartupGate,
    /// Accept readiness seen and not yet drained down to `WouldBlock`.
    backlog: bool,
}

impl ServerAcceptor {
    /// Bind a new listening socket.
    pub fn bind(
        addr: SocketAddr,
        limits: SharedLimits,
        overload: Arc<dyn OverloadPolicy>,
    ) -> Result<Self, ControllerError> {
        let listener = TcpListener::bind(addr).map_err(|source| ControllerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Self::from_listener(listener, limits, overload)
    }

    /// Use an already bound std listener.
    pub fn from_std(
        listener: std::net::TcpListener,
        limits: SharedLimits,
        overload: Arc<dyn OverloadPolicy>,
    ) -> Result<Self, ControllerError> {
        listener.set_nonblocking(true)?;
        Self::from_listener(TcpListener::from_std(listener), limits, overload)
    }

    fn from_listener(
        listener: TcpListener,
        limits: SharedLimits,
        overload: Arc<dyn OverloadPolicy>,
    ) -> Result<Self, ControllerError> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            limits,
            overload,
            gate: StartupGate::new(),
            backlog: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn startup_gate(&self) -> StartupGate {
        self.gate.clone()
    }

    pub fn limits(&self) -> SharedLimits {
        Arc::clone(&self.limits)
    }

    /// Accept until nothing is pending, admission is refused or the
    /// listener fails.
    fn accept_pending(&mut self, ctx: &mut ControllerContext<'_>) -> Result<(), ControllerError> {
        while self.backlog {
            if self.overload.is_overloaded() {
                ctx.stats.record_deferred();
                metrics::record_deferred();
                tracing::trace!("Server overloaded, leaving pending connections queued");
                return Ok(());
            }

            match self.listener.accept() {
                Ok((stream, peer_addr)) => self.admit(ctx, stream, peer_addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.backlog = false,
                // A signal interrupting accept is retried here instead of being
                // raised out of the loop. Stopping the controller goes through
                // `ShutdownHandle`, never through an interrupted accept.
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    tracing::debug!("Accept interrupted, retrying");
                }
                Err(e) if is_peer_abort(&e) => {
                    tracing::debug!(error = %e, "Pending connection aborted by peer before accept");
                }
                Err(e) if is_listener_closed(&e) => {
                    tracing::debug!(error = %e, "The server socket was closed");
                    self.backlog = false;
                    return Err(ControllerError::ListenerClosed(e));
                }
                Err(e) => {
                    ctx.stats.record_accept_error();
                    metrics::record_accept_error();
                    tracing::warn!(error = %e, "Unexpected error while accepting new connection");
                    // Leave the backlog flag set and retry on the next iteration.
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn admit(&self, ctx: &mut ControllerContext<'_>, stream: TcpStream, peer_addr: SocketAddr) {
        // Streams from a mio listener are already non-blocking.
        let limits: LimitsConfig = **self.limits.load();
        let active = ctx.pool.len();
        let host_active = ctx.pool.connections_from(peer_addr.ip());

        match admission::admit(&limits, active, host_active) {
            Admission::Accept => match ctx.pool.checkout(stream, ctx.registry, peer_addr) {
                Ok(token) => {
                    let active = ctx.pool.len();
                    ctx.stats.record_accepted(active);
                    metrics::record_accepted(active);
                    tracing::debug!(peer_addr = %peer_addr, total = active, "New connection accepted");

                    ctx.drive(token, None);
                }
                Err(e) => {
                    ctx.stats.record_accept_error();
                    metrics::record_accept_error();
                    tracing::warn!(peer_addr = %peer_addr, error = %e, "Failed to register accepted connection");
                }
            },
            Admission::RejectTotal { active, max } => {
                drop(stream);
                ctx.stats.record_rejected();
                metrics::record_rejected("total");
                tracing::info!(
                    peer_addr = %peer_addr,
                    active,
                    max,
                    "Maximum number of concurrent connections reached. New connection rejected"
                );
            }
            Admission::RejectPerHost { host_active, max } => {
                drop(stream);
                ctx.stats.record_rejected();
                metrics::record_rejected("per_host");
                tracing::info!(
                    peer_addr = %peer_addr,
                    host_active,
                    max,
                    "Maximum number of connections for this host reached. New connection rejected"
                );
            }
        }
    }
}

impl crate::net::controller::Acceptor for ServerAcceptor {
    fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.listener, LISTENER, Interest::READABLE)?;
        // Sockets may have queued up between bind and registration.
        self.backlog = true;
        Ok(())
    }

    fn on_registered(&mut self) {
        self.gate.release();
        tracing::info!(address = %self.local_addr, "Listening for connections");
    }

    fn owns(&self, token: Token) -> bool {
        token == LISTENER
    }

    fn on_acceptable(&mut self, ctx: &mut ControllerContext<'_>) -> Result<(), ControllerError> {
        self.backlog = true;
        self.accept_pending(ctx)
    }

    fn on_tick(&mut self, ctx: &mut ControllerContext<'_>) -> Result<(), ControllerError> {
        self.accept_pending(ctx)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.backlog = false;
        registry.deregister(&mut self.listener)
    }
}

fn is_peer_abort(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
    )
}

fn is_listener_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::NotConnected
    )
}

/// Controller that accepts from a listening socket.
pub type ServerConnectionController = ConnectionController<ServerAcceptor>;

impl ConnectionController<ServerAcceptor> {
    /// Bind the configured address and build a controller around it.
    pub fn bind(
        config: &ConnectorConfig,
        protocols: ProtocolFactory,
        overload: Arc<dyn OverloadPolicy>,
    ) -> Result<Self, ControllerError> {
        let limits = admission::shared_limits(config.limits);
        Self::bind_with_limits(config, limits, protocols, overload)
    }

    /// Like [`bind`](Self::bind), with limits shared with the caller
    /// (for example with an overload policy that reads them too).
    pub fn bind_with_limits(
        config: &ConnectorConfig,
        limits: SharedLimits,
        protocols: ProtocolFactory,
        overload: Arc<dyn OverloadPolicy>,
    ) -> Result<Self, ControllerError> {
        let addr: SocketAddr = config
            .listener
            .bind_address
            .parse()
            .map_err(|_| ControllerError::InvalidAddress(config.listener.bind_address.clone()))?;

        let acceptor = ServerAcceptor::bind(addr, limits, overload)?;

        tracing::info!(
            address = %acceptor.local_addr(),
            max_total_connections = config.limits.max_total_connections,
            max_connections_per_host = config.limits.max_connections_per_host,
            backlog_hint = config.listener.backlog_hint,
            "Listener bound"
        );

        Ok(ConnectionController::new(
            acceptor,
            config.controller.clone(),
            config.pool.clone(),
            protocols,
        )?)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor().local_addr()
    }

    /// Cross-thread handle onto this controller.
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            local_addr: self.local_addr(),
            gate: self.acceptor().startup_gate(),
            shutdown: self.shutdown_handle(),
            stats: self.stats(),
            limits: self.acceptor().limits(),
            startup_timeout: self.settings().startup_timeout(),
        }
    }

    /// Run the controller on a dedicated thread.
    pub fn spawn(
        mut self,
    ) -> io::Result<(ControllerHandle, JoinHandle<Result<(), ControllerError>>)> {
        let handle = self.handle();
        let thread = std::thread::Builder::new()
            .name("connector-controller".to_string())
            .spawn(move || self.run())?;
        Ok((handle, thread))
    }
}

/// What other threads may do with a running server controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    local_addr: SocketAddr,
    gate: StartupGate,
    shutdown: ShutdownHandle,
    stats: Arc<ControllerStats>,
    limits: SharedLimits,
    startup_timeout: Duration,
}

impl ControllerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait, up to the configured startup timeout, for the listener to be
    /// registered. Returns `false` on timeout; that is not an error.
    pub fn await_ready(&self) -> bool {
        self.gate.wait(self.startup_timeout)
    }

    pub fn startup_gate(&self) -> &StartupGate {
        &self.gate
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    /// Current admission limits.
    pub fn limits(&self) -> LimitsConfig {
        **self.limits.load()
    }

    /// Replace the admission limits; applied on the next accept.
    pub fn update_limits(&self, limits: LimitsConfig) {
        self.limits.store(Arc::new(limits));
        tracing::info!(
            max_total_connections = limits.max_total_connections,
            max_connections_per_host = limits.max_connections_per_host,
            max_pending_requests = limits.max_pending_requests,
            "Admission limits updated"
        );
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }
}
