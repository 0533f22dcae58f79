//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Listening socket readable
//!     → server.rs (overload check, accept, connection ceilings)
//!     → pool.rs (checkout: slot + recycled buffers, register with poller)
//!     → connection.rs (immediate read attempt, then readiness driven I/O)
//!     → Protocol collaborator consumes bytes and queues responses
//!
//! controller.rs runs the poll loop that feeds all of the above.
//!
//! Connection States:
//!     Pending → Active → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - One controller thread owns every connection; no locks on the hot path
//! - Capacity limits close the new socket, they never queue it
//! - Overload leaves sockets queued in the OS backlog

use mio::Token;

pub mod admission;
pub mod connection;
pub mod controller;
pub mod pool;
pub mod server;
pub mod stats;

/// Poll token of the listening socket.
pub const LISTENER: Token = Token(usize::MAX - 1);

/// Poll token of the shutdown waker.
pub const WAKER: Token = Token(usize::MAX);

pub use admission::{LoadGauge, NeverOverloaded, OverloadPolicy, PendingRequestThreshold, SharedLimits};
pub use connection::{Connection, ConnectionId, ConnectionState, Progress, Protocol, ProtocolFactory};
pub use controller::{Acceptor, ConnectionController, ControllerContext, ControllerError, ControllerState};
pub use pool::ConnectionPool;
pub use server::{ControllerHandle, ServerAcceptor, ServerConnectionController};
pub use stats::{ControllerStats, StatsSnapshot};
