use sift_core::{Diagnostic, ErrorCode, Span};
use thiserror::Error;

/// A lexical or syntactic error bound to a source span.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub code: ErrorCode,
    pub span: Span,
}

impl ParseError {
    pub fn new(code: ErrorCode, span: Span, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            span,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.code, self.span)
            .message(self.message.clone())
            .build()
    }
}

/// A type error found by the checker.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CheckError {
    pub message: String,
    pub code: ErrorCode,
    pub span: Span,
}

impl CheckError {
    pub fn new(code: ErrorCode, span: Span, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            span,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.code, self.span)
            .message(self.message.clone())
            .build()
    }
}

/// A compilation failure.
///
/// These indicate misconfiguration (for example a broken operator
/// overload), not user mistakes in the expression.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    pub code: ErrorCode,
    pub span: Span,
}

impl CompileError {
    pub fn new(code: ErrorCode, span: Span, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            span,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.code, self.span)
            .message(self.message.clone())
            .build()
    }
}
