//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Connection inbound buffer
//!     → status.rs (frame request head, skip body)
//!     → header::HeaderWriter (Server / Cache-Control values)
//!     → Connection outbound buffer
//! ```

pub mod status;

pub use status::{status_factory, ResponseTemplate, StatusProtocol, MAX_HEAD_SIZE};
