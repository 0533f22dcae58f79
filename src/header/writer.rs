//! HTTP-style header value builder.
//!
//! # Responsibilities
//! - Emit tokens, quoted strings and comments with the grammar's escaping rules
//! - Join parameters with `", "` without a leading separator
//! - Reject values that can't legally sit in a token position
//!
//! The caller frames the value (header name, colon, CRLF); the writer only
//! produces what goes between them.

use std::fmt;

use thiserror::Error;

use crate::header::chars;
use crate::header::Parameter;

/// A value could not be encoded in the requested grammar position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// The value holds a character that is not allowed in a token.
    #[error("Unexpected character found in token: {token:?}")]
    InvalidToken { token: String },

    /// Tokens need at least one character.
    #[error("Empty value found where a token was expected")]
    EmptyToken,
}

/// Header value builder backed by an append-only string buffer.
///
/// ```
/// use http_connector::header::HeaderWriter;
///
/// let mut writer = HeaderWriter::new();
/// writer
///     .append_parameter("a", Some("1"))?
///     .append_quoted_parameter("b", Some("two words"))?
///     .append_parameter("c", None)?;
/// assert_eq!(writer.as_str(), r#"a=1, b="two words", c"#);
/// # Ok::<(), http_connector::header::EncodingError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HeaderWriter {
    buffer: String,
    /// Set until the first parameter separator has been requested.
    first_parameter: bool,
}

impl HeaderWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty writer with a pre-sized buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: String::with_capacity(capacity),
            first_parameter: true,
        }
    }

    /// Append raw text without any validation.
    pub fn append(&mut self, text: &str) -> &mut Self {
        self.buffer.push_str(text);
        self
    }

    /// Append a single raw character.
    pub fn append_char(&mut self, c: char) -> &mut Self {
        self.buffer.push(c);
        self
    }

    /// Append a space character.
    pub fn append_space(&mut self) -> &mut Self {
        self.append_char(' ')
    }

    /// Append `content` as a comment, surrounded by parentheses.
    ///
    /// Characters outside the comment-text class are written as quoted pairs,
    /// so this never fails.
    pub fn append_comment(&mut self, content: &str) -> &mut Self {
        self.append_char('(');
        for c in content.chars() {
            if chars::is_comment_text(c) {
                self.append_char(c);
            } else {
                self.append_quoted_pair(c);
            }
        }
        self.append_char(')')
    }

    /// Append `token` verbatim, or fail if it is not a valid token.
    pub fn append_token(&mut self, token: &str) -> Result<&mut Self, EncodingError> {
        check_token(token)?;
        Ok(self.append(token))
    }

    /// Append `content` as a quoted string. Never fails.
    pub fn append_quoted_string(&mut self, content: &str) -> &mut Self {
        self.append_char('"');
        for c in content.chars() {
            if chars::is_quoted_text(c) {
                self.append_char(c);
            } else {
                self.append_quoted_pair(c);
            }
        }
        self.append_char('"')
    }

    /// Write `", "` unless this is the first parameter of the writer.
    ///
    /// The first call only clears the first-parameter flag; it is never set
    /// again for the lifetime of the writer.
    pub fn append_parameter_separator(&mut self) -> &mut Self {
        if self.first_parameter {
            self.first_parameter = false;
            self
        } else {
            self.append(", ")
        }
    }

    /// Append a parameter whose value, if any, is written as a token.
    ///
    /// Name and value are checked before anything is written, so a rejected
    /// parameter leaves the writer untouched.
    pub fn append_parameter(
        &mut self,
        name: &str,
        value: Option<&str>,
    ) -> Result<&mut Self, EncodingError> {
        check_token(name)?;
        if let Some(value) = value {
            check_token(value)?;
        }

        self.append_parameter_separator();
        self.append(name);
        if let Some(value) = value {
            self.append_char('=').append(value);
        }
        Ok(self)
    }

    /// Append a parameter whose value, if any, is written as a quoted string.
    pub fn append_quoted_parameter(
        &mut self,
        name: &str,
        value: Option<&str>,
    ) -> Result<&mut Self, EncodingError> {
        check_token(name)?;

        self.append_parameter_separator();
        self.append(name);
        if let Some(value) = value {
            self.append_char('=').append_quoted_string(value);
        }
        Ok(self)
    }

    /// Append `parameter` with its value written as a token.
    pub fn append_parameter_pair(
        &mut self,
        parameter: &Parameter,
    ) -> Result<&mut Self, EncodingError> {
        self.append_parameter(&parameter.name, parameter.value.as_deref())
    }

    /// Append `parameter` with its value written as a quoted string.
    pub fn append_quoted_parameter_pair(
        &mut self,
        parameter: &Parameter,
    ) -> Result<&mut Self, EncodingError> {
        self.append_quoted_parameter(&parameter.name, parameter.value.as_deref())
    }

    fn append_quoted_pair(&mut self, c: char) -> &mut Self {
        self.append_char('\\').append_char(c)
    }

    /// True until the first parameter separator has been requested.
    pub fn is_first_parameter(&self) -> bool {
        self.first_parameter
    }

    /// The text written so far.
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Consume the writer and return its buffer.
    pub fn into_string(self) -> String {
        self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for HeaderWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HeaderWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buffer)
    }
}

impl From<HeaderWriter> for String {
    fn from(writer: HeaderWriter) -> Self {
        writer.buffer
    }
}

fn check_token(token: &str) -> Result<(), EncodingError> {
    if token.is_empty() {
        Err(EncodingError::EmptyToken)
    } else if chars::is_token(token) {
        Ok(())
    } else {
        Err(EncodingError::InvalidToken {
            token: token.to_string(),
        })
    }
}
