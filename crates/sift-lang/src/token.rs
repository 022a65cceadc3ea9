use std::fmt;

use sift_core::Span;

/// Kind of a lexical token.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    Operator,
    Bracket,
    Eof,
}

/// A lexical token.
///
/// `value` holds the operator spelling for operators and the decoded
/// value for string literals.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            value: value.into(),
            span,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    /// True when the token has the given kind and one of the values.
    pub fn is_value(&self, kind: TokenKind, values: &[&str]) -> bool {
        self.kind == kind && values.iter().any(|v| *v == self.value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}({:?})", self.kind, self.value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching() {
        let tok = Token::new(TokenKind::Operator, "+", Span::at(0, 1));
        assert!(tok.is(TokenKind::Operator));
        assert!(tok.is_value(TokenKind::Operator, &["+", "-"]));
        assert!(!tok.is_value(TokenKind::Operator, &["*"]));
        assert!(!tok.is_value(TokenKind::Identifier, &["+"]));
    }

    #[test]
    fn display() {
        let tok = Token::new(TokenKind::Identifier, "foo", Span::at(0, 3));
        assert_eq!(tok.to_string(), "Identifier(\"foo\")");
        let eof = Token::new(TokenKind::Eof, "", Span::at(3, 3));
        assert_eq!(eof.to_string(), "Eof");
    }
}
