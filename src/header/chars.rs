//! Character classes of the HTTP/1.1 header grammar.
//!
//! The writer and reader both consult these predicates so that what one side
//! emits verbatim the other side accepts verbatim.

/// True for code points in the ISO-8859-1 range.
pub fn is_latin1(c: char) -> bool {
    (c as u32) <= 0xFF
}

/// CTL = <any US-ASCII control character (octets 0 - 31) and DEL (127)>
pub fn is_control(c: char) -> bool {
    (c as u32) <= 31 || (c as u32) == 127
}

/// True for the separator characters that may never appear in a token.
pub fn is_separator(c: char) -> bool {
    matches!(
        c,
        '(' | ')'
            | '<'
            | '>'
            | '@'
            | ','
            | ';'
            | ':'
            | '\\'
            | '"'
            | '/'
            | '['
            | ']'
            | '?'
            | '='
            | '{'
            | '}'
            | ' '
            | '\t'
    )
}

/// SP or HT.
pub fn is_linear_white_space(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// TEXT = <any OCTET except CTLs>
pub fn is_text(c: char) -> bool {
    is_latin1(c) && !is_control(c)
}

/// Printable US-ASCII excluding separators.
pub fn is_token_char(c: char) -> bool {
    c.is_ascii() && !is_control(c) && !is_separator(c)
}

/// Characters copied verbatim between double quotes.
pub fn is_quoted_text(c: char) -> bool {
    is_text(c) && c != '"' && c != '\\'
}

/// Characters copied verbatim between comment parentheses.
pub fn is_comment_text(c: char) -> bool {
    is_text(c) && c != '(' && c != ')' && c != '\\'
}

/// A token is one or more token characters.
pub fn is_token(value: &str) -> bool {
    !value.is_empty() && value.chars().all(is_token_char)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_excludes_separators_and_controls() {
        assert!(is_token("foo-bar"));
        assert!(is_token("gzip"));
        assert!(is_token("x.y_z~1!#$%&'*+^`|"));
        assert!(!is_token("foo bar"));
        assert!(!is_token("a=b"));
        assert!(!is_token("tab\there"));
        assert!(!is_token("caf\u{e9}"));
        assert!(!is_token("\u{7f}"));
        assert!(!is_token(""));
    }

    #[test]
    fn quoted_text_excludes_quote_and_backslash() {
        assert!(is_quoted_text('a'));
        assert!(is_quoted_text(' '));
        assert!(is_quoted_text('('));
        assert!(is_quoted_text('\u{e9}'));
        assert!(!is_quoted_text('"'));
        assert!(!is_quoted_text('\\'));
        assert!(!is_quoted_text('\n'));
        assert!(!is_quoted_text('\u{20ac}'));
    }

    #[test]
    fn comment_text_excludes_parentheses() {
        assert!(is_comment_text('"'));
        assert!(is_comment_text(';'));
        assert!(!is_comment_text('('));
        assert!(!is_comment_text(')'));
        assert!(!is_comment_text('\\'));
        assert!(!is_comment_text('\r'));
    }
}
