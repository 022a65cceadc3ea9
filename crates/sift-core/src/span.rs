use std::cmp;

/// Byte offset into an expression source.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Pos(u32);

impl Pos {
    pub fn new(offset: u32) -> Self {
        Pos(offset)
    }

    pub fn offset(self) -> u32 {
        self.0
    }
}

impl From<u32> for Pos {
    fn from(offset: u32) -> Self {
        Pos(offset)
    }
}

/// A half-open byte range `[from, to)` into an expression source.
///
/// Every token, AST node, instruction and diagnostic carries one.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Span {
    from: Pos,
    to: Pos,
}

impl Span {
    /// The zero-width span at offset 0, used where no position exists.
    pub const DUMMY: Span = Span::at(0, 0);

    pub fn new(from: Pos, to: Pos) -> Self {
        Span { from, to }
    }

    /// Span from raw byte offsets.
    pub const fn at(from: u32, to: u32) -> Self {
        Span {
            from: Pos(from),
            to: Pos(to),
        }
    }

    pub fn from(self) -> Pos {
        self.from
    }

    pub fn to(self) -> Pos {
        self.to
    }

    pub fn len(self) -> u32 {
        self.to.0.saturating_sub(self.from.0)
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Whether a position falls inside the range; `to` is excluded.
    pub fn contains(self, pos: Pos) -> bool {
        self.from <= pos && pos < self.to
    }

    /// The smallest span covering both ranges, gaps included.
    pub fn merge(self, other: Span) -> Span {
        Span {
            from: cmp::min(self.from, other.from),
            to: cmp::max(self.to, other.to),
        }
    }
}
