//! Readiness-driven HTTP connection controller.
//!
//! A single controller thread multiplexes a listening socket and every
//! accepted connection, applying admission control before a socket is
//! admitted. The [`header`] module provides the HTTP header syntax writer
//! and reader used by protocol implementations.

// Core subsystems
pub mod header;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::ConnectorConfig;
pub use header::{HeaderReader, HeaderWriter, Parameter};
pub use net::{ControllerHandle, ServerConnectionController};
