use sift_core::{ErrorCode, Span};
use thiserror::Error;

/// An error raised during evaluation, bound to the span of the
/// instruction that raised it.
///
/// Host callables construct these without a span; the machine binds the
/// span of the last-executed instruction before surfacing the error.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub code: ErrorCode,
    pub span: Span,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: ErrorCode::E400,
            span: Span::DUMMY,
        }
    }

    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            span: Span::DUMMY,
        }
    }

    /// Bind a span unless one is already set.
    pub fn at(mut self, span: Span) -> Self {
        if self.span == Span::DUMMY {
            self.span = span;
        }
        self
    }

    pub fn memory_budget() -> Self {
        Self::with_code(ErrorCode::E401, "memory budget exceeded")
    }

    pub fn index_out_of_range(index: i64, len: usize) -> Self {
        Self::with_code(
            ErrorCode::E402,
            format!("index out of range: {} (array length is {})", index, len),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::Pos;

    #[test]
    fn display_message() {
        let err = RuntimeError::new("division by zero");
        assert_eq!(err.to_string(), "division by zero");
        assert_eq!(err.code, ErrorCode::E400);
    }

    #[test]
    fn at_binds_once() {
        let span = Span::new(Pos::new(3), Pos::new(5));
        let other = Span::new(Pos::new(7), Pos::new(9));
        let err = RuntimeError::new("boom").at(span).at(other);
        assert_eq!(err.span, span);
    }

    #[test]
    fn index_error_message() {
        let err = RuntimeError::index_out_of_range(5, 3);
        assert_eq!(
            err.to_string(),
            "index out of range: 5 (array length is 3)"
        );
        assert_eq!(err.code, ErrorCode::E402);
    }
}
