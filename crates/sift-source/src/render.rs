use std::fmt::Write as _;

use sift_core::{Diagnostic, Severity, Span};

use crate::Source;

/// Renders diagnostics as annotated source snippets.
///
/// The primary span is underlined with a caret and tildes, secondary
/// spans with dashes:
///
/// ```text
/// error[E200]: unknown name 'bar'
///   --> <expr>:1:7
///   |
/// 1 | foo + bar
///   |       ^~~ not found in the environment
/// ```
pub struct DiagnosticRenderer<'a> {
    source: &'a Source,
}

/// Underline style of an annotated span.
enum Marker {
    Primary,
    Secondary,
}

impl Marker {
    fn draw(&self, width: usize) -> String {
        match self {
            Marker::Primary => {
                let mut underline = String::from("^");
                for _ in 1..width {
                    underline.push('~');
                }
                underline
            }
            Marker::Secondary => "-".repeat(width),
        }
    }
}

impl<'a> DiagnosticRenderer<'a> {
    pub fn new(source: &'a Source) -> Self {
        Self { source }
    }

    /// Render a diagnostic to an annotated string.
    pub fn render(&self, diag: &Diagnostic) -> String {
        let mut out = String::new();

        let severity = match diag.severity() {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        let _ = writeln!(
            out,
            "{}[{}]: {}",
            severity,
            diag.code().as_str(),
            diag.message()
        );

        let at = self.source.line_col(diag.span().from());
        let _ = writeln!(out, "  --> {}:{}:{}", self.source.name(), at.line, at.col);

        self.annotate(&mut out, diag.span(), Marker::Primary, diag.label());
        for (span, label) in diag.secondary() {
            self.annotate(&mut out, *span, Marker::Secondary, Some(label));
        }

        for note in diag.notes() {
            let _ = writeln!(out, "  = note: {}", note);
        }

        out
    }

    /// One gutter-framed source line plus its underline row.
    fn annotate(&self, out: &mut String, span: Span, marker: Marker, label: Option<&str>) {
        let at = self.source.line_col(span.from());
        let Some(text) = self.source.line_text(at.line) else {
            return;
        };

        let gutter = at.line.to_string();
        let pad = " ".repeat(gutter.len());
        let _ = writeln!(out, "{} |", pad);
        let _ = writeln!(out, "{} | {}", gutter, text);

        // The underline never runs past the end of the line and always
        // marks at least one column.
        let lead = (at.col - 1) as usize;
        let room = text.len().saturating_sub(lead).max(1);
        let width = (span.len() as usize).clamp(1, room);

        let _ = write!(out, "{} | {}{}", pad, " ".repeat(lead), marker.draw(width));
        if let Some(label) = label {
            let _ = write!(out, " {}", label);
        }
        out.push('\n');
    }
}
