use std::fmt;

use sift_core::Span;
use sift_vm::Value;

use crate::nature::Nature;

/// Unary operator.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

impl UnaryOp {
    pub fn from_str(op: &str) -> Option<Self> {
        Some(match op {
            "!" | "not" => UnaryOp::Not,
            "-" => UnaryOp::Neg,
            "+" => UnaryOp::Pos,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
        }
    }
}

/// Binary operator.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    Matches,
    Contains,
    StartsWith,
    EndsWith,
    Range,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    Coalesce,
    /// Pipe exists only between lexing and parsing; `a | f(b)` is
    /// rewritten to `f(a, b)` before a node is built.
    Pipe,
}

impl BinaryOp {
    pub fn from_str(op: &str) -> Option<Self> {
        Some(match op {
            "or" | "||" => BinaryOp::Or,
            "and" | "&&" => BinaryOp::And,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            ">" => BinaryOp::Gt,
            "<=" => BinaryOp::Le,
            ">=" => BinaryOp::Ge,
            "in" => BinaryOp::In,
            "matches" => BinaryOp::Matches,
            "contains" => BinaryOp::Contains,
            "startsWith" => BinaryOp::StartsWith,
            "endsWith" => BinaryOp::EndsWith,
            ".." => BinaryOp::Range,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Mod,
            "**" | "^" => BinaryOp::Exp,
            "??" => BinaryOp::Coalesce,
            "|" => BinaryOp::Pipe,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Matches => "matches",
            BinaryOp::Contains => "contains",
            BinaryOp::StartsWith => "startsWith",
            BinaryOp::EndsWith => "endsWith",
            BinaryOp::Range => "..",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Exp => "**",
            BinaryOp::Coalesce => "??",
            BinaryOp::Pipe => "|",
        }
    }

    /// Binding power; higher binds tighter.
    pub fn precedence(self) -> u16 {
        match self {
            BinaryOp::Pipe => 0,
            BinaryOp::Or => 10,
            BinaryOp::And => 15,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Gt
            | BinaryOp::Le
            | BinaryOp::Ge
            | BinaryOp::In
            | BinaryOp::Matches
            | BinaryOp::Contains
            | BinaryOp::StartsWith
            | BinaryOp::EndsWith => 20,
            BinaryOp::Range => 25,
            BinaryOp::Add | BinaryOp::Sub => 30,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 60,
            BinaryOp::Exp => 100,
            BinaryOp::Coalesce => 500,
        }
    }

    pub fn is_right_associative(self) -> bool {
        matches!(self, BinaryOp::Exp)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge
        )
    }

    /// Operators that accept a `not` prefix (`a not in b`).
    pub fn allows_negation(self) -> bool {
        matches!(
            self,
            BinaryOp::In
                | BinaryOp::Matches
                | BinaryOp::Contains
                | BinaryOp::StartsWith
                | BinaryOp::EndsWith
        )
    }
}

/// An AST node: a variant, its source span and the nature attached by
/// the checker (unknown until then).
#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub nature: Nature,
}

impl Node {
    pub fn new(kind: NodeKind, span: Span) -> Self {
        Self {
            kind,
            span,
            nature: Nature::unknown(),
        }
    }
}

/// The node variants.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// An opaque precomputed value, produced by patchers.
    Constant(Value),
    Identifier(String),
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// `base.property` / `base[property]`; `optional` encodes `?.` and
    /// `method` marks a property that is immediately called.
    Member {
        base: Box<Node>,
        property: Box<Node>,
        optional: bool,
        method: bool,
    },
    /// Wraps a postfix chain containing at least one `?.` so the whole
    /// chain short-circuits to nil.
    Chain {
        inner: Box<Node>,
    },
    Slice {
        base: Box<Node>,
        from: Option<Box<Node>>,
        to: Option<Box<Node>>,
    },
    Call {
        callee: Box<Node>,
        arguments: Vec<Node>,
    },
    /// A named higher-order or library builtin with parse-time arity
    /// rules. `map` carries an optional projection fused into the loop
    /// body; `throws` makes a missing element an error instead of nil.
    Builtin {
        name: String,
        arguments: Vec<Node>,
        map: Option<Box<Node>>,
        throws: bool,
    },
    /// The body of a higher-order argument; opens a pointer scope.
    Predicate {
        body: Box<Node>,
    },
    /// `#`, `#acc`, `#index` or `#name` inside a predicate.
    Pointer {
        name: String,
    },
    /// `let name = value; body`.
    VariableDeclarator {
        name: String,
        value: Box<Node>,
        body: Box<Node>,
    },
    /// `a; b; c`; the result is the last expression.
    Sequence {
        nodes: Vec<Node>,
    },
    Conditional {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    Array {
        elements: Vec<Node>,
    },
    Map {
        pairs: Vec<Node>,
    },
    Pair {
        key: Box<Node>,
        value: Box<Node>,
    },
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Nil => f.write_str("nil"),
            NodeKind::Bool(b) => write!(f, "{}", b),
            NodeKind::Integer(i) => write!(f, "{}", i),
            NodeKind::Float(v) => write!(f, "{}", v),
            NodeKind::String(s) => write!(f, "{:?}", s),
            NodeKind::Constant(v) => write!(f, "{}", v),
            NodeKind::Identifier(name) => f.write_str(name),
            NodeKind::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "not {}", operand),
                _ => write!(f, "{}{}", op.as_str(), operand),
            },
            NodeKind::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.as_str(), right)
            }
            NodeKind::Member {
                base,
                property,
                optional,
                ..
            } => {
                let dot = if *optional { "?." } else { "." };
                match &property.kind {
                    NodeKind::String(name) => write!(f, "{}{}{}", base, dot, name),
                    _ => write!(f, "{}[{}]", base, property),
                }
            }
            NodeKind::Chain { inner } => write!(f, "{}", inner),
            NodeKind::Slice { base, from, to } => {
                write!(f, "{}[", base)?;
                if let Some(from) = from {
                    write!(f, "{}", from)?;
                }
                f.write_str(":")?;
                if let Some(to) = to {
                    write!(f, "{}", to)?;
                }
                f.write_str("]")
            }
            NodeKind::Call { callee, arguments } => {
                write!(f, "{}(", callee)?;
                join(f, arguments)?;
                f.write_str(")")
            }
            NodeKind::Builtin {
                name, arguments, ..
            } => {
                write!(f, "{}(", name)?;
                join(f, arguments)?;
                f.write_str(")")
            }
            NodeKind::Predicate { body } => write!(f, "{}", body),
            NodeKind::Pointer { name } => write!(f, "#{}", name),
            NodeKind::VariableDeclarator { name, value, body } => {
                write!(f, "let {} = {}; {}", name, value, body)
            }
            NodeKind::Sequence { nodes } => join(f, nodes),
            NodeKind::Conditional {
                cond,
                then,
                otherwise,
            } => write!(f, "({} ? {} : {})", cond, then, otherwise),
            NodeKind::Array { elements } => {
                f.write_str("[")?;
                join(f, elements)?;
                f.write_str("]")
            }
            NodeKind::Map { pairs } => {
                f.write_str("{")?;
                join(f, pairs)?;
                f.write_str("}")
            }
            NodeKind::Pair { key, value } => write!(f, "{}: {}", key, value),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, nodes: &[Node]) -> fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", node)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: NodeKind) -> Node {
        Node::new(kind, Span::DUMMY)
    }

    #[test]
    fn precedence_table() {
        assert!(BinaryOp::Coalesce.precedence() > BinaryOp::Exp.precedence());
        assert!(BinaryOp::Exp.precedence() > BinaryOp::Mul.precedence());
        assert!(BinaryOp::Mul.precedence() > BinaryOp::Add.precedence());
        assert!(BinaryOp::Add.precedence() > BinaryOp::Range.precedence());
        assert!(BinaryOp::Range.precedence() > BinaryOp::Eq.precedence());
        assert!(BinaryOp::Eq.precedence() > BinaryOp::And.precedence());
        assert!(BinaryOp::And.precedence() > BinaryOp::Or.precedence());
        assert!(BinaryOp::Or.precedence() > BinaryOp::Pipe.precedence());
    }

    #[test]
    fn exponent_is_right_associative() {
        assert!(BinaryOp::Exp.is_right_associative());
        assert!(!BinaryOp::Add.is_right_associative());
    }

    #[test]
    fn spellings_round_trip() {
        assert_eq!(BinaryOp::from_str("and"), Some(BinaryOp::And));
        assert_eq!(BinaryOp::from_str("&&"), Some(BinaryOp::And));
        assert_eq!(BinaryOp::from_str("^"), Some(BinaryOp::Exp));
        assert_eq!(BinaryOp::from_str("?"), None);
        assert_eq!(UnaryOp::from_str("!"), Some(UnaryOp::Not));
    }

    #[test]
    fn negatable_operators() {
        assert!(BinaryOp::In.allows_negation());
        assert!(BinaryOp::Matches.allows_negation());
        assert!(!BinaryOp::Add.allows_negation());
        assert!(!BinaryOp::Eq.allows_negation());
    }

    #[test]
    fn display_expression() {
        let expr = node(NodeKind::Binary {
            op: BinaryOp::Add,
            left: Box::new(node(NodeKind::Integer(1))),
            right: Box::new(node(NodeKind::Binary {
                op: BinaryOp::Mul,
                left: Box::new(node(NodeKind::Integer(2))),
                right: Box::new(node(NodeKind::Identifier("x".to_string()))),
            })),
        });
        assert_eq!(expr.to_string(), "(1 + (2 * x))");
    }

    #[test]
    fn display_member_chain() {
        let expr = node(NodeKind::Member {
            base: Box::new(node(NodeKind::Identifier("user".to_string()))),
            property: Box::new(node(NodeKind::String("name".to_string()))),
            optional: true,
            method: false,
        });
        assert_eq!(expr.to_string(), "user?.name");
    }
}
