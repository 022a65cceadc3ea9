use std::fmt;
use std::sync::Arc;

use sift_core::{Diagnostic, Span};
use sift_lang::{CheckError, CompileError, ParseError};
use sift_source::{DiagnosticRenderer, Source};
use sift_vm::RuntimeError;

/// Any failure of the compile or run pipeline, bound to its source.
///
/// `render()` produces the annotated caret-and-squiggle snippet;
/// `Display` is the bare message.
#[derive(Clone, Debug)]
pub struct Error {
    message: String,
    diagnostic: Diagnostic,
    source: Arc<Source>,
}

impl Error {
    pub(crate) fn parse(err: ParseError, source: Arc<Source>) -> Self {
        Self {
            message: err.message.clone(),
            diagnostic: err.to_diagnostic(),
            source,
        }
    }

    pub(crate) fn check(err: CheckError, source: Arc<Source>) -> Self {
        Self {
            message: err.message.clone(),
            diagnostic: err.to_diagnostic(),
            source,
        }
    }

    pub(crate) fn compile(err: CompileError, source: Arc<Source>) -> Self {
        Self {
            message: err.message.clone(),
            diagnostic: err.to_diagnostic(),
            source,
        }
    }

    pub(crate) fn runtime(err: RuntimeError, source: Arc<Source>) -> Self {
        let diagnostic = Diagnostic::error(err.code, err.span)
            .message(err.message.clone())
            .build();
        Self {
            message: err.message,
            diagnostic,
            source,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn span(&self) -> Span {
        self.diagnostic.span()
    }

    pub fn diagnostic(&self) -> &Diagnostic {
        &self.diagnostic
    }

    /// Render the annotated source snippet.
    pub fn render(&self) -> String {
        DiagnosticRenderer::new(&self.source).render(&self.diagnostic)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::ErrorCode;

    #[test]
    fn renders_snippet() {
        let source = Arc::new(Source::unnamed("foo + 1"));
        let err = Error::check(
            CheckError::new(ErrorCode::E200, Span::at(0, 3), "unknown name foo"),
            source,
        );
        let out = err.render();
        assert!(out.contains("error[E200]: unknown name foo"));
        assert!(out.contains("foo + 1"));
        assert!(out.contains("^~~"));
    }

    #[test]
    fn display_is_bare_message() {
        let source = Arc::new(Source::unnamed("1 / 0"));
        let err = Error::runtime(
            sift_vm::RuntimeError::new("division by zero"),
            source,
        );
        assert_eq!(err.to_string(), "division by zero");
    }
}
