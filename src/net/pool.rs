//! Connection pool.
//!
//! # Responsibilities
//! - Hold the active connections, addressed by a stable slot token
//! - Reuse vacated slots through a free list
//! - Recycle the buffers of closed connections
//! - Track open connections per peer IP for admission checks
//!
//! # Design
//!
//! - Slots live in a Vec; a slot index is the connection's poll token
//! - Vacated slots are pushed on a free list and handed out again first
//! - Only the controller thread touches the pool, so there is no locking

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Registry, Token};

use crate::config::PoolConfig;
use crate::net::connection::{Buffers, Connection, ConnectionId, ProtocolFactory};

/// Slot arena of active connections with buffer recycling.
pub struct ConnectionPool {
    slots: Vec<Option<Connection>>,
    free: Vec<usize>,
    idle_buffers: Vec<Buffers>,
    per_host: HashMap<IpAddr, usize>,
    active: usize,
    settings: PoolConfig,
    protocols: ProtocolFactory,
}

impl ConnectionPool {
    pub fn new(settings: PoolConfig, protocols: ProtocolFactory) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            idle_buffers: Vec::new(),
            per_host: HashMap::new(),
            active: 0,
            settings,
            protocols,
        }
    }

    /// Wrap an accepted socket in a connection, register it and store it.
    ///
    /// Never blocks. On registration failure the socket is dropped and its
    /// slot stays free.
    pub fn checkout(
        &mut self,
        stream: TcpStream,
        registry: &Registry,
        remote_addr: SocketAddr,
    ) -> io::Result<Token> {
        let index = self.free.pop().unwrap_or(self.slots.len());
        let token = Token(index);

        let buffers = self.idle_buffers.pop().unwrap_or_else(|| {
            Buffers::with_capacity(
                self.settings.inbound_buffer_size,
                self.settings.outbound_buffer_size,
            )
        });
        let protocol = (self.protocols)(remote_addr);
        let mut connection = Connection::new(
            token,
            stream,
            remote_addr,
            buffers,
            self.settings.inbound_buffer_size,
            self.settings.read_budget,
            protocol,
        );

        if let Err(e) = connection.open(registry) {
            self.recycle(connection.into_buffers());
            if index < self.slots.len() {
                self.free.push(index);
            }
            return Err(e);
        }

        if index == self.slots.len() {
            self.slots.push(Some(connection));
        } else {
            self.slots[index] = Some(connection);
        }
        self.active += 1;
        *self.per_host.entry(remote_addr.ip()).or_insert(0) += 1;

        Ok(token)
    }

    pub fn get(&self, token: Token) -> Option<&Connection> {
        self.slots.get(token.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Connection> {
        self.slots.get_mut(token.0).and_then(Option::as_mut)
    }

    /// Close the connection in `token`'s slot and return the slot.
    pub fn release(&mut self, token: Token, registry: &Registry) -> Option<ConnectionId> {
        let mut connection = self.slots.get_mut(token.0)?.take()?;
        connection.close(registry);

        let id = connection.id();
        let ip = connection.remote_addr().ip();
        if let Some(count) = self.per_host.get_mut(&ip) {
            *count -= 1;
            if *count == 0 {
                self.per_host.remove(&ip);
            }
        }

        self.active -= 1;
        self.free.push(token.0);
        self.recycle(connection.into_buffers());
        Some(id)
    }

    fn recycle(&mut self, buffers: Buffers) {
        if self.settings.pooled_connections && self.idle_buffers.len() < self.settings.max_idle_buffers {
            self.idle_buffers.push(buffers);
        }
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    /// Number of open connections from `ip`.
    pub fn connections_from(&self, ip: IpAddr) -> usize {
        self.per_host.get(&ip).copied().unwrap_or(0)
    }

    /// Number of recycled buffer pairs waiting for reuse.
    pub fn idle_buffer_count(&self) -> usize {
        self.idle_buffers.len()
    }

    pub fn tokens(&self) -> Vec<Token> {
        self.iter().map(Connection::token).collect()
    }

    /// Tokens of connections idle for longer than `timeout`.
    pub fn idle_tokens(&self, now: Instant, timeout: Duration) -> Vec<Token> {
        self.iter()
            .filter(|c| c.idle_for(now) > timeout)
            .map(Connection::token)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("active", &self.active)
            .field("slots", &self.slots.len())
            .field("free", &self.free.len())
            .field("idle_buffers", &self.idle_buffers.len())
            .finish()
    }
}
