//! Header value encoding subsystem.
//!
//! # Data Flow
//! ```text
//! Structured metadata (tokens, parameters, comments)
//!     → writer.rs (escape / validate per grammar position)
//!     → header value text (caller adds name, colon, CRLF)
//!
//! Header value text
//!     → reader.rs (unescape quoted pairs)
//!     → tokens / strings / Parameter lists
//! ```
//!
//! # Design Decisions
//! - Token positions are validated, never escaped
//! - Quoted strings and comments always succeed through quoted pairs
//! - Both directions share the predicates in chars.rs

pub mod chars;
pub mod reader;
pub mod writer;

pub use reader::{DecodingError, HeaderReader};
pub use writer::{EncodingError, HeaderWriter};

/// A named header parameter with an optional value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub name: String,
    pub value: Option<String>,
}

impl Parameter {
    /// Create a `name=value` parameter.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Create a parameter without a value.
    pub fn name_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}
