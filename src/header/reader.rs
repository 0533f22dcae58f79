//! Header value reader.
//!
//! The decoding side of [`HeaderWriter`](crate::header::HeaderWriter): it
//! accepts the same token, quoted-string, comment and parameter-list syntax
//! and undoes quoted-pair escaping.

use thiserror::Error;

use crate::header::chars;
use crate::header::Parameter;

/// Header text that does not follow the expected grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodingError {
    #[error("Unexpected end of header value, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("Unexpected character {found:?} at position {position}, expected {expected}")]
    UnexpectedChar {
        found: char,
        position: usize,
        expected: &'static str,
    },

    #[error("Unterminated {what} starting at position {position}")]
    Unterminated { what: &'static str, position: usize },
}

/// Cursor over a single header value.
#[derive(Debug, Clone)]
pub struct HeaderReader<'a> {
    input: &'a str,
    /// Byte offset of the next unread character.
    pos: usize,
}

impl<'a> HeaderReader<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Byte offset of the next unread character.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// The unread remainder of the value.
    pub fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    pub fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn expect(&mut self, wanted: char, expected: &'static str) -> Result<(), DecodingError> {
        match self.peek() {
            Some(c) if c == wanted => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(found) => Err(DecodingError::UnexpectedChar {
                found,
                position: self.pos,
                expected,
            }),
            None => Err(DecodingError::UnexpectedEnd { expected }),
        }
    }

    /// Skip spaces and horizontal tabs.
    pub fn skip_spaces(&mut self) -> &mut Self {
        while let Some(c) = self.peek() {
            if !chars::is_linear_white_space(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        self
    }

    /// Read one or more token characters.
    pub fn read_token(&mut self) -> Result<&'a str, DecodingError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !chars::is_token_char(c) {
                break;
            }
            self.pos += c.len_utf8();
        }

        if self.pos > start {
            return Ok(&self.input[start..self.pos]);
        }

        match self.peek() {
            Some(found) => Err(DecodingError::UnexpectedChar {
                found,
                position: self.pos,
                expected: "a token",
            }),
            None => Err(DecodingError::UnexpectedEnd {
                expected: "a token",
            }),
        }
    }

    /// Read a quoted string and return its unescaped content.
    pub fn read_quoted_string(&mut self) -> Result<String, DecodingError> {
        let start = self.pos;
        self.expect('"', "an opening double quote")?;

        let mut content = String::new();
        loop {
            match self.next_char() {
                Some('"') => return Ok(content),
                Some('\\') => match self.next_char() {
                    Some(c) => content.push(c),
                    None => break,
                },
                Some(c) => content.push(c),
                None => break,
            }
        }

        Err(DecodingError::Unterminated {
            what: "quoted string",
            position: start,
        })
    }

    /// Read a comment and return its unescaped content without the outer
    /// parentheses. Nested unescaped parentheses are kept in the content.
    pub fn read_comment(&mut self) -> Result<String, DecodingError> {
        let start = self.pos;
        self.expect('(', "an opening parenthesis")?;

        let mut content = String::new();
        let mut depth = 1usize;
        loop {
            match self.next_char() {
                Some('\\') => match self.next_char() {
                    Some(c) => content.push(c),
                    None => break,
                },
                Some('(') => {
                    depth += 1;
                    content.push('(');
                }
                Some(')') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(content);
                    }
                    content.push(')');
                }
                Some(c) => content.push(c),
                None => break,
            }
        }

        Err(DecodingError::Unterminated {
            what: "comment",
            position: start,
        })
    }

    /// Read a parameter value, either a token or a quoted string.
    pub fn read_value(&mut self) -> Result<String, DecodingError> {
        if self.peek() == Some('"') {
            self.read_quoted_string()
        } else {
            self.read_token().map(str::to_string)
        }
    }

    /// Read `name [= value]`.
    pub fn read_parameter(&mut self) -> Result<Parameter, DecodingError> {
        self.skip_spaces();
        let name = self.read_token()?.to_string();
        self.skip_spaces();

        if self.peek() != Some('=') {
            return Ok(Parameter::name_only(name));
        }

        self.pos += 1;
        self.skip_spaces();
        let value = self.read_value()?;
        Ok(Parameter::new(name, value))
    }

    /// Read a comma separated parameter list up to the end of the value.
    pub fn read_parameters(&mut self) -> Result<Vec<Parameter>, DecodingError> {
        let mut parameters = Vec::new();

        if self.skip_spaces().is_at_end() {
            return Ok(parameters);
        }

        loop {
            parameters.push(self.read_parameter()?);
            self.skip_spaces();

            match self.peek() {
                None => return Ok(parameters),
                Some(',') => {
                    self.pos += 1;
                }
                Some(found) => {
                    return Err(DecodingError::UnexpectedChar {
                        found,
                        position: self.pos,
                        expected: "a comma or the end of the value",
                    })
                }
            }
        }
    }
}
