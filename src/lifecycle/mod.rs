//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Controller thread registers listener → gate released → waiters proceed
//!
//! Shutdown (shutdown.rs):
//!     Trigger → wake poll → stop accepting → drain connections → loop exits
//! ```
//!
//! # Design Decisions
//! - Listener registration is the only startup step other threads wait for
//! - Shutdown has timeout: remaining connections are dropped after the drain deadline

pub mod shutdown;
pub mod startup;

pub use shutdown::ShutdownHandle;
pub use startup::StartupGate;
