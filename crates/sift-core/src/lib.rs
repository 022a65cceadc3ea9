pub mod error;
pub mod kind;
pub mod span;

pub use error::{Diagnostic, DiagnosticBuilder, ErrorCode, Severity};
pub use kind::Kind;
pub use span::{Pos, Span};
