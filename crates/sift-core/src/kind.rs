use std::fmt;

/// Semantic kind of a value or expression.
///
/// This is the closed discriminator shared by the checker's type records,
/// the compiler's cast/create arguments and the runtime value union.
/// `Unknown` is the checker's unresolved state; `Any` is a value that is
/// present but statically untyped.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum Kind {
    #[default]
    Unknown,
    Nil,
    Bool,
    Int,
    Uint,
    Float,
    String,
    Time,
    Duration,
    Array,
    Map,
    Struct,
    Func,
    Any,
}

impl Kind {
    /// Integer family: `int` and `uint` mix freely in arithmetic.
    pub fn is_integer(self) -> bool {
        matches!(self, Kind::Int | Kind::Uint)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Kind::Int | Kind::Uint | Kind::Float)
    }

    /// Kinds that support the ordering operators.
    pub fn is_ordered(self) -> bool {
        self.is_numeric() || matches!(self, Kind::String | Kind::Time | Kind::Duration)
    }

    /// Statically undetermined: operators must accept anything.
    pub fn is_open(self) -> bool {
        matches!(self, Kind::Unknown | Kind::Any)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Unknown => "unknown",
            Kind::Nil => "nil",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Uint => "uint",
            Kind::Float => "float",
            Kind::String => "string",
            Kind::Time => "time",
            Kind::Duration => "duration",
            Kind::Array => "array",
            Kind::Map => "map",
            Kind::Struct => "struct",
            Kind::Func => "func",
            Kind::Any => "any",
        }
    }

    /// Stable numeric id, used as the immediate argument of the cast and
    /// create opcodes.
    pub fn code(self) -> i64 {
        match self {
            Kind::Unknown => 0,
            Kind::Nil => 1,
            Kind::Bool => 2,
            Kind::Int => 3,
            Kind::Uint => 4,
            Kind::Float => 5,
            Kind::String => 6,
            Kind::Time => 7,
            Kind::Duration => 8,
            Kind::Array => 9,
            Kind::Map => 10,
            Kind::Struct => 11,
            Kind::Func => 12,
            Kind::Any => 13,
        }
    }

    pub fn from_code(code: i64) -> Option<Kind> {
        Some(match code {
            0 => Kind::Unknown,
            1 => Kind::Nil,
            2 => Kind::Bool,
            3 => Kind::Int,
            4 => Kind::Uint,
            5 => Kind::Float,
            6 => Kind::String,
            7 => Kind::Time,
            8 => Kind::Duration,
            9 => Kind::Array,
            10 => Kind::Map,
            11 => Kind::Struct,
            12 => Kind::Func,
            13 => Kind::Any,
            _ => return None,
        })
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_family() {
        assert!(Kind::Int.is_integer());
        assert!(Kind::Uint.is_integer());
        assert!(!Kind::Float.is_integer());
        assert!(Kind::Float.is_numeric());
        assert!(!Kind::String.is_numeric());
    }

    #[test]
    fn ordered_kinds() {
        assert!(Kind::Int.is_ordered());
        assert!(Kind::String.is_ordered());
        assert!(Kind::Time.is_ordered());
        assert!(Kind::Duration.is_ordered());
        assert!(!Kind::Bool.is_ordered());
        assert!(!Kind::Array.is_ordered());
    }

    #[test]
    fn open_kinds() {
        assert!(Kind::Unknown.is_open());
        assert!(Kind::Any.is_open());
        assert!(!Kind::Nil.is_open());
    }

    #[test]
    fn code_round_trip() {
        for code in 0..=13 {
            let kind = Kind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(Kind::from_code(14), None);
        assert_eq!(Kind::from_code(-1), None);
    }

    #[test]
    fn display() {
        assert_eq!(Kind::Int.to_string(), "int");
        assert_eq!(Kind::Duration.to_string(), "duration");
        assert_eq!(Kind::Unknown.to_string(), "unknown");
    }
}
