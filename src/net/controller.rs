//! Readiness-driven connection controller.
//!
//! # Responsibilities
//! - Own the poller and the pool of active connections
//! - Block on readiness with a bounded timeout, then dispatch every ready token once
//! - Route listener tokens to the [`Acceptor`], everything else to its connection
//! - Reap idle connections and honour shutdown requests between polls
//!
//! # Design Decisions
//! - One thread runs the whole loop; pool and state are never shared
//! - Handler failures close the affected connection and the loop carries on
//! - Accept behaviour is a pluggable [`Acceptor`] instead of a controller subtype

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::{Events, Poll, Registry, Token, Waker};
use thiserror::Error;

use crate::config::{ControllerConfig, PoolConfig};
use crate::lifecycle::ShutdownHandle;
use crate::net::connection::ProtocolFactory;
use crate::net::pool::ConnectionPool;
use crate::net::stats::ControllerStats;
use crate::net::WAKER;
use crate::observability::metrics;

/// Errors that stop or prevent a controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid bind address {0:?}")]
    InvalidAddress(String),

    #[error("Poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error("Listening socket closed: {0}")]
    ListenerClosed(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Lifecycle of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Created,
    /// Registering the acceptor's sources.
    Registering,
    /// Registration succeeded; waiting for the first events.
    AwaitingAcceptEvents,
    Running,
    /// No longer accepting; serving open connections until they close.
    Draining,
    Stopped,
}

/// Everything a handler may touch while the loop dispatches one event.
pub struct ControllerContext<'a> {
    pub registry: &'a Registry,
    pub pool: &'a mut ConnectionPool,
    pub stats: &'a ControllerStats,
    /// Connections to drive again next iteration without waiting for readiness.
    retry: &'a mut Vec<Token>,
}

impl ControllerContext<'_> {
    /// Let the connection in `token` make progress, closing it when it is
    /// finished or fails.
    pub fn drive(&mut self, token: Token, event: Option<&Event>) {
        let Some(connection) = self.pool.get_mut(token) else {
            tracing::trace!(token = token.0, "Readiness for a released slot");
            return;
        };

        let close = match connection.on_ready(self.registry, event) {
            Ok(()) if connection.has_unread_input() => {
                self.retry.push(token);
                false
            }
            Ok(()) => connection.wants_close(),
            Err(e) => {
                tracing::debug!(
                    connection_id = %connection.id(),
                    peer_addr = %connection.remote_addr(),
                    error = %e,
                    "Connection I/O failed"
                );
                true
            }
        };

        if close {
            self.close(token);
        }
    }

    /// Close the connection in `token` and return its slot to the pool.
    pub fn close(&mut self, token: Token) {
        if let Some(id) = self.pool.release(token, self.registry) {
            let active = self.pool.len();
            self.stats.record_closed(active);
            metrics::record_closed(active);
            tracing::debug!(connection_id = %id, active, "Connection closed");
        }
    }
}

/// Source of new connections driven by a [`ConnectionController`].
pub trait Acceptor {
    /// Register the acceptor's event sources.
    fn register(&mut self, registry: &Registry) -> io::Result<()>;

    /// Called once after a successful [`register`](Acceptor::register).
    fn on_registered(&mut self) {}

    /// Whether events for `token` belong to this acceptor.
    fn owns(&self, token: Token) -> bool;

    /// A source of this acceptor is ready.
    ///
    /// Returning `Err` means the acceptor can no longer produce connections;
    /// the controller then drains and stops.
    fn on_acceptable(&mut self, ctx: &mut ControllerContext<'_>) -> Result<(), ControllerError>;

    /// Called once per loop iteration after events have been dispatched,
    /// including iterations that ended on the poll timeout.
    fn on_tick(&mut self, _ctx: &mut ControllerContext<'_>) -> Result<(), ControllerError> {
        Ok(())
    }

    /// Stop producing connections.
    fn deregister(&mut self, registry: &Registry) -> io::Result<()>;
}

/// Single-threaded event loop over an acceptor and its connections.
pub struct ConnectionController<A: Acceptor> {
    poll: Poll,
    events: Events,
    pool: ConnectionPool,
    acceptor: A,
    settings: ControllerConfig,
    shutdown: ShutdownHandle,
    stats: Arc<ControllerStats>,
    state: ControllerState,
    drain_deadline: Option<Instant>,
    stop_cause: Option<ControllerError>,
    /// Connections whose last read step ran out of budget.
    retry: Vec<Token>,
}

impl<A: Acceptor> ConnectionController<A> {
    pub fn new(
        acceptor: A,
        settings: ControllerConfig,
        pool: PoolConfig,
        protocols: ProtocolFactory,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        Ok(Self {
            events: Events::with_capacity(settings.events_capacity.max(1)),
            poll,
            pool: ConnectionPool::new(pool, protocols),
            acceptor,
            settings,
            shutdown: ShutdownHandle::new(waker),
            stats: Arc::new(ControllerStats::new()),
            state: ControllerState::Created,
            drain_deadline: None,
            stop_cause: None,
            retry: Vec::new(),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<ControllerStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn acceptor(&self) -> &A {
        &self.acceptor
    }

    pub fn settings(&self) -> &ControllerConfig {
        &self.settings
    }

    /// Run the loop on the calling thread until shutdown completes or the
    /// acceptor fails.
    ///
    /// A registration failure is logged and leaves the loop running without
    /// accepting; shutdown still works.
    pub fn run(&mut self) -> Result<(), ControllerError> {
        self.state = ControllerState::Registering;
        match self.acceptor.register(self.poll.registry()) {
            Ok(()) => {
                self.state = ControllerState::AwaitingAcceptEvents;
                self.acceptor.on_registered();
                tracing::debug!("Controller registered, awaiting accept events");
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Unexpected error while registering the listening socket, no connections will be accepted"
                );
            }
        }

        while self.state != ControllerState::Stopped {
            if let Err(e) = self.run_once() {
                self.state = ControllerState::Stopped;
                tracing::error!(error = %e, "Controller loop failed");
                return Err(e);
            }
        }

        tracing::info!(
            remaining = self.pool.len(),
            "Controller stopped"
        );
        self.close_all();

        match self.stop_cause.take() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    /// One poll and dispatch round.
    fn run_once(&mut self) -> Result<(), ControllerError> {
        // Budget-limited connections still have input; don't sleep on them.
        let timeout = if self.retry.is_empty() {
            self.settings.select_timeout()
        } else {
            Duration::ZERO
        };
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(ControllerError::Poll(e)),
        }

        if matches!(
            self.state,
            ControllerState::Registering | ControllerState::AwaitingAcceptEvents
        ) {
            self.state = ControllerState::Running;
        }

        let retry = std::mem::take(&mut self.retry);
        let mut ctx = ControllerContext {
            registry: self.poll.registry(),
            pool: &mut self.pool,
            stats: &self.stats,
            retry: &mut self.retry,
        };
        let mut acceptor_failure = None;

        for event in self.events.iter() {
            match event.token() {
                WAKER => {}
                token if self.acceptor.owns(token) => {
                    if self.state == ControllerState::Draining {
                        continue;
                    }
                    if let Err(e) = self.acceptor.on_acceptable(&mut ctx) {
                        acceptor_failure = Some(e);
                    }
                }
                token => ctx.drive(token, Some(event)),
            }
        }

        for token in retry {
            if !self.events.iter().any(|event| event.token() == token) {
                ctx.drive(token, None);
            }
        }

        if acceptor_failure.is_none() && self.state == ControllerState::Running {
            if let Err(e) = self.acceptor.on_tick(&mut ctx) {
                acceptor_failure = Some(e);
            }
        }

        if let Some(idle_timeout) = self.settings.idle_timeout() {
            for token in ctx.pool.idle_tokens(Instant::now(), idle_timeout) {
                tracing::debug!(token = token.0, "Closing idle connection");
                ctx.close(token);
            }
        }

        if let Some(e) = acceptor_failure {
            tracing::debug!(error = %e, "Acceptor failed, stopping");
            self.stop_cause = Some(e);
            self.begin_drain();
        } else if self.shutdown.is_triggered() && self.state != ControllerState::Draining {
            tracing::info!(open = self.pool.len(), "Shutdown requested, draining connections");
            self.begin_drain();
        }

        if self.state == ControllerState::Draining {
            let expired = self
                .drain_deadline
                .is_some_and(|deadline| Instant::now() >= deadline);
            if self.pool.is_empty() || expired {
                self.state = ControllerState::Stopped;
            }
        }

        Ok(())
    }

    fn begin_drain(&mut self) {
        if let Err(e) = self.acceptor.deregister(self.poll.registry()) {
            tracing::debug!(error = %e, "Acceptor deregistration failed");
        }
        self.state = ControllerState::Draining;
        self.drain_deadline = Some(Instant::now() + self.settings.drain_timeout());
    }

    fn close_all(&mut self) {
        let mut ctx = ControllerContext {
            registry: self.poll.registry(),
            pool: &mut self.pool,
            stats: &self.stats,
            retry: &mut self.retry,
        };
        for token in ctx.pool.tokens() {
            ctx.close(token);
        }
    }
}
