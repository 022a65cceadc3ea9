use sift_core::{Pos, Span};

/// Line and column position (1-indexed for display).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LineCol {
    pub line: u32,
    pub col: u32,
}

impl LineCol {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

/// An immutable expression source with a line index.
///
/// The line index is only consulted when rendering diagnostics; the
/// pipeline itself works in byte offsets.
#[derive(Clone, Debug)]
pub struct Source {
    name: String,
    text: String,
    line_starts: Vec<u32>,
}

impl Source {
    /// Create a new source, computing line starts.
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let line_starts = Self::compute_line_starts(&text);
        Self {
            name: name.into(),
            text,
            line_starts,
        }
    }

    /// An unnamed source, displayed as `<expr>`.
    pub fn unnamed(text: impl Into<String>) -> Self {
        Self::new("<expr>", text)
    }

    fn compute_line_starts(text: &str) -> Vec<u32> {
        let mut starts = vec![0];
        for (i, c) in text.char_indices() {
            if c == '\n' {
                starts.push((i + 1) as u32);
            }
        }
        starts
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Convert a byte position to line/column (1-indexed).
    pub fn line_col(&self, pos: Pos) -> LineCol {
        let offset = pos.offset();
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,      // position is at start of line
            Err(idx) => idx - 1, // position is inside previous line
        };
        LineCol {
            line: (line_idx + 1) as u32,
            col: offset - self.line_starts[line_idx] + 1,
        }
    }

    /// Get the text of a line (1-indexed), without the trailing newline.
    pub fn line_text(&self, line: u32) -> Option<&str> {
        if line == 0 {
            return None;
        }
        let line_idx = (line - 1) as usize;
        if line_idx >= self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[line_idx] as usize;
        let end = if line_idx + 1 < self.line_starts.len() {
            (self.line_starts[line_idx + 1] - 1) as usize
        } else {
            self.text.len()
        };
        Some(&self.text[start..end])
    }

    /// Get the text covered by a span.
    pub fn span_text(&self, span: Span) -> &str {
        let from = span.from().offset() as usize;
        let to = span.to().offset() as usize;
        &self.text[from.min(self.text.len())..to.min(self.text.len())]
    }

    pub fn line_count(&self) -> u32 {
        self.line_starts.len() as u32
    }
}
