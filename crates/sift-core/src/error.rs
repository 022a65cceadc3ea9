use thiserror::Error;

use crate::span::Span;

/// Stable error codes for diagnostics.
///
/// Grouped by pipeline stage: E0xx lexical, E1xx parse, E2xx type,
/// E3xx compile, E4xx runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Error)]
pub enum ErrorCode {
    // Lexical errors (E001-E099)
    #[error("unrecognized character")]
    E001,
    #[error("literal not terminated")]
    E002,
    #[error("bad number syntax")]
    E003,
    #[error("unclosed comment")]
    E004,
    #[error("invalid char escape")]
    E005,

    // Parse errors (E100-E199)
    #[error("unexpected token")]
    E100,
    #[error("unmatched bracket")]
    E101,
    #[error("unexpected end of expression")]
    E102,
    #[error("ambiguous operator nesting")]
    E103,
    #[error("expression too complex")]
    E104,

    // Type errors (E200-E299)
    #[error("unknown name")]
    E200,
    #[error("invalid operation")]
    E201,
    #[error("arity mismatch")]
    E202,
    #[error("invalid predicate")]
    E203,
    #[error("undeclared field")]
    E204,
    #[error("cannot redeclare")]
    E205,
    #[error("invalid regexp")]
    E206,
    #[error("unexpected result type")]
    E207,

    // Compile errors (E300-E399)
    #[error("operator overload misconfigured")]
    E300,

    // Runtime errors (E400-E499)
    #[error("runtime error")]
    E400,
    #[error("memory budget exceeded")]
    E401,
    #[error("index out of range")]
    E402,
    #[error("invalid argument")]
    E403,
}

impl ErrorCode {
    /// Get the error code as a string (e.g., "E201").
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::E001 => "E001",
            ErrorCode::E002 => "E002",
            ErrorCode::E003 => "E003",
            ErrorCode::E004 => "E004",
            ErrorCode::E005 => "E005",
            ErrorCode::E100 => "E100",
            ErrorCode::E101 => "E101",
            ErrorCode::E102 => "E102",
            ErrorCode::E103 => "E103",
            ErrorCode::E104 => "E104",
            ErrorCode::E200 => "E200",
            ErrorCode::E201 => "E201",
            ErrorCode::E202 => "E202",
            ErrorCode::E203 => "E203",
            ErrorCode::E204 => "E204",
            ErrorCode::E205 => "E205",
            ErrorCode::E206 => "E206",
            ErrorCode::E207 => "E207",
            ErrorCode::E300 => "E300",
            ErrorCode::E400 => "E400",
            ErrorCode::E401 => "E401",
            ErrorCode::E402 => "E402",
            ErrorCode::E403 => "E403",
        }
    }
}

/// Severity level of a diagnostic.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// A diagnostic message with location and context.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Diagnostic {
    severity: Severity,
    code: ErrorCode,
    message: String,
    span: Span,
    label: Option<String>,
    secondary: Vec<(Span, String)>,
    notes: Vec<String>,
}

impl Diagnostic {
    /// Start building an error diagnostic.
    pub fn error(code: ErrorCode, span: Span) -> DiagnosticBuilder {
        DiagnosticBuilder::new(Severity::Error, code, span)
    }

    /// Start building a warning diagnostic.
    pub fn warning(code: ErrorCode, span: Span) -> DiagnosticBuilder {
        DiagnosticBuilder::new(Severity::Warning, code, span)
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn secondary(&self) -> &[(Span, String)] {
        &self.secondary
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

/// Builder for constructing diagnostics.
pub struct DiagnosticBuilder {
    severity: Severity,
    code: ErrorCode,
    span: Span,
    message: Option<String>,
    label: Option<String>,
    secondary: Vec<(Span, String)>,
    notes: Vec<String>,
}

impl DiagnosticBuilder {
    fn new(severity: Severity, code: ErrorCode, span: Span) -> Self {
        Self {
            severity,
            code,
            span,
            message: None,
            label: None,
            secondary: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Set the main message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the primary label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a secondary label.
    pub fn secondary(mut self, span: Span, label: impl Into<String>) -> Self {
        self.secondary.push((span, label.into()));
        self
    }

    /// Add a note.
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Build the diagnostic.
    pub fn build(self) -> Diagnostic {
        Diagnostic {
            severity: self.severity,
            code: self.code,
            message: self.message.unwrap_or_else(|| self.code.to_string()),
            span: self.span,
            label: self.label,
            secondary: self.secondary,
            notes: self.notes,
        }
    }
}
