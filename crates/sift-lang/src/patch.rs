//! AST-rewriting visitors ("patchers") and their driver.
//!
//! A patcher sees every node of the tree (children first) and may
//! replace the node in place. Non-repeatable patchers run once;
//! repeatable ones run in a fixed-point loop, with the type checker
//! re-run before each pass so patchers can rely on fresh natures.

use sift_core::{ErrorCode, Kind, Span};

use crate::ast::{BinaryOp, Node, NodeKind};
use crate::checker::check;
use crate::conf::Config;
use crate::error::CompileError;
use crate::nature::Nature;

/// An AST-rewriting visitor.
pub trait Patcher {
    fn visit(&mut self, node: &mut Node);

    /// Called before every walk of a repeatable patcher.
    fn reset(&mut self) {}

    /// Whether the last walk changed the tree and another is needed.
    fn should_repeat(&self) -> bool {
        false
    }

    /// Repeatable patchers take part in the fixed-point loop.
    fn repeatable(&self) -> bool {
        false
    }
}

/// Walk the tree bottom-up, applying the patcher to every node.
pub fn walk(node: &mut Node, patcher: &mut dyn Patcher) {
    match &mut node.kind {
        NodeKind::Nil
        | NodeKind::Bool(_)
        | NodeKind::Integer(_)
        | NodeKind::Float(_)
        | NodeKind::String(_)
        | NodeKind::Constant(_)
        | NodeKind::Identifier(_)
        | NodeKind::Pointer { .. } => {}
        NodeKind::Unary { operand, .. } => walk(operand, patcher),
        NodeKind::Binary { left, right, .. } => {
            walk(left, patcher);
            walk(right, patcher);
        }
        NodeKind::Member { base, property, .. } => {
            walk(base, patcher);
            walk(property, patcher);
        }
        NodeKind::Chain { inner } => walk(inner, patcher),
        NodeKind::Slice { base, from, to } => {
            walk(base, patcher);
            if let Some(from) = from {
                walk(from, patcher);
            }
            if let Some(to) = to {
                walk(to, patcher);
            }
        }
        NodeKind::Call { callee, arguments } => {
            walk(callee, patcher);
            for arg in arguments {
                walk(arg, patcher);
            }
        }
        NodeKind::Builtin { arguments, map, .. } => {
            for arg in arguments {
                walk(arg, patcher);
            }
            if let Some(map) = map {
                walk(map, patcher);
            }
        }
        NodeKind::Predicate { body } => walk(body, patcher),
        NodeKind::VariableDeclarator { value, body, .. } => {
            walk(value, patcher);
            walk(body, patcher);
        }
        NodeKind::Sequence { nodes } => {
            for child in nodes {
                walk(child, patcher);
            }
        }
        NodeKind::Conditional {
            cond,
            then,
            otherwise,
        } => {
            walk(cond, patcher);
            walk(then, patcher);
            walk(otherwise, patcher);
        }
        NodeKind::Array { elements } => {
            for element in elements {
                walk(element, patcher);
            }
        }
        NodeKind::Map { pairs } => {
            for pair in pairs {
                walk(pair, patcher);
            }
        }
        NodeKind::Pair { key, value } => {
            walk(key, patcher);
            walk(value, patcher);
        }
    }
    patcher.visit(node);
}

/// Run the configured visitors and default optimizer patchers.
///
/// User visitors and the one-shot optimizers run a single pass each;
/// repeatable patchers (operator overloading) iterate to a fixed point.
/// The checker runs before every pass; its errors are ignored here and
/// surface in the final check.
pub fn run_visitors(root: &mut Node, config: &mut Config) -> Result<(), CompileError> {
    let mut visitors = std::mem::take(&mut config.visitors);
    if config.optimize {
        visitors.push(Box::new(InRange));
        visitors.push(Box::new(SumArray));
        visitors.push(Box::new(SumMap));
    }
    for (op, overloads) in &config.operators {
        visitors.push(Box::new(OperatorOverload::new(op, overloads.clone(), config)?));
    }

    // One pass for everything that does not repeat.
    for visitor in visitors.iter_mut().filter(|v| !v.repeatable()) {
        let _ = check(root, config);
        walk(root, visitor.as_mut());
    }

    // Fixed point for the rest.
    loop {
        let mut more = false;
        for visitor in visitors.iter_mut().filter(|v| v.repeatable()) {
            let _ = check(root, config);
            visitor.reset();
            walk(root, visitor.as_mut());
            more = more || visitor.should_repeat();
        }
        if !more {
            break;
        }
    }
    Ok(())
}

fn node_with_nature(kind: NodeKind, span: Span, nature: Nature) -> Node {
    let mut node = Node::new(kind, span);
    node.nature = nature;
    node
}

/// `x in m..n` with an integer-natured `x` and literal bounds becomes
/// `(x >= m) && (x <= n)`.
pub struct InRange;

impl Patcher for InRange {
    fn visit(&mut self, node: &mut Node) {
        let bounds = match &node.kind {
            NodeKind::Binary {
                op: BinaryOp::In,
                left,
                right,
            } if left.nature.is_integer() => match &right.kind {
                NodeKind::Binary {
                    op: BinaryOp::Range,
                    left: from,
                    right: to,
                } if matches!(from.kind, NodeKind::Integer(_))
                    && matches!(to.kind, NodeKind::Integer(_)) =>
                {
                    Some((left.clone(), from.clone(), to.clone()))
                }
                _ => None,
            },
            _ => None,
        };
        let Some((left, from, to)) = bounds else {
            return;
        };

        let span = node.span;
        let nature = node.nature.clone();
        let lower = node_with_nature(
            NodeKind::Binary {
                op: BinaryOp::Ge,
                left: left.clone(),
                right: from,
            },
            span,
            Nature::bool(),
        );
        let upper = node_with_nature(
            NodeKind::Binary {
                op: BinaryOp::Le,
                left,
                right: to,
            },
            span,
            Nature::bool(),
        );
        *node = node_with_nature(
            NodeKind::Binary {
                op: BinaryOp::And,
                left: Box::new(lower),
                right: Box::new(upper),
            },
            span,
            nature,
        );
    }
}

/// `sum([a, b, c, d])` over a literal array of two or more elements
/// becomes the right-folded sum `a + (b + (c + d))`.
pub struct SumArray;

impl Patcher for SumArray {
    fn visit(&mut self, node: &mut Node) {
        let folded = match &node.kind {
            NodeKind::Builtin {
                name, arguments, ..
            } if name == "sum" && arguments.len() == 1 => match &arguments[0].kind {
                NodeKind::Array { elements } if elements.len() >= 2 => {
                    Some(fold_sum(elements, node.span))
                }
                _ => None,
            },
            _ => None,
        };
        let Some(folded) = folded else {
            return;
        };

        let span = node.span;
        let nature = node.nature.clone();
        *node = node_with_nature(folded.kind, span, nature);
    }
}

fn fold_sum(elements: &[Node], span: Span) -> Node {
    if elements.len() == 2 {
        return Node::new(
            NodeKind::Binary {
                op: BinaryOp::Add,
                left: Box::new(elements[0].clone()),
                right: Box::new(elements[1].clone()),
            },
            span,
        );
    }
    Node::new(
        NodeKind::Binary {
            op: BinaryOp::Add,
            left: Box::new(elements[0].clone()),
            right: Box::new(fold_sum(&elements[1..], span)),
        },
        span,
    )
}

/// `sum(map(arr, fn))` becomes `sum(arr, fn)`, eliminating the
/// intermediate array.
pub struct SumMap;

impl Patcher for SumMap {
    fn visit(&mut self, node: &mut Node) {
        let fused = match &node.kind {
            NodeKind::Builtin {
                name, arguments, ..
            } if name == "sum" && arguments.len() == 1 => match &arguments[0].kind {
                NodeKind::Builtin {
                    name: inner_name,
                    arguments: inner_args,
                    ..
                } if inner_name == "map" && inner_args.len() == 2 => {
                    Some((inner_args[0].clone(), inner_args[1].clone()))
                }
                _ => None,
            },
            _ => None,
        };
        let Some((collection, projection)) = fused else {
            return;
        };

        let span = node.span;
        let nature = node.nature.clone();
        *node = node_with_nature(
            NodeKind::Builtin {
                name: "sum".to_string(),
                arguments: vec![collection, projection],
                map: None,
                throws: false,
            },
            span,
            nature,
        );
    }
}

/// Replaces a binary operator with a call to a registered overload
/// whose signature matches the operand natures. Repeatable: a
/// replacement may expose new rewritable nodes.
pub struct OperatorOverload {
    op: BinaryOp,
    overloads: Vec<(String, Vec<(Kind, Kind, Kind)>)>,
    applied: bool,
}

impl OperatorOverload {
    /// Validate the overload table against the configuration.
    pub fn new(
        op: &str,
        functions: Vec<String>,
        config: &Config,
    ) -> Result<Self, CompileError> {
        let Some(op_kind) = BinaryOp::from_str(op) else {
            return Err(CompileError::new(
                ErrorCode::E300,
                Span::DUMMY,
                format!("cannot overload {:?}: not a binary operator", op),
            ));
        };

        let mut overloads = Vec::with_capacity(functions.len());
        for name in functions {
            let Some(descriptor) = config.functions.get(&name) else {
                return Err(CompileError::new(
                    ErrorCode::E300,
                    Span::DUMMY,
                    format!("function {} for {} operator does not exist", name, op),
                ));
            };
            if descriptor.signatures().is_empty() {
                return Err(CompileError::new(
                    ErrorCode::E300,
                    Span::DUMMY,
                    format!("function {} for {} operator misses signatures", name, op),
                ));
            }
            let mut signatures = Vec::new();
            for sig in descriptor.signatures() {
                if sig.params.len() != 2 || sig.variadic {
                    return Err(CompileError::new(
                        ErrorCode::E300,
                        Span::DUMMY,
                        format!(
                            "function {} for {} operator does not have a correct signature",
                            name, op
                        ),
                    ));
                }
                signatures.push((sig.params[0], sig.params[1], sig.result));
            }
            overloads.push((name, signatures));
        }

        Ok(Self {
            op: op_kind,
            overloads,
            applied: false,
        })
    }

    fn find(&self, l: Kind, r: Kind) -> Option<(&str, Kind)> {
        for (name, signatures) in &self.overloads {
            for (first, second, result) in signatures {
                if kind_fits(l, *first) && kind_fits(r, *second) {
                    return Some((name, *result));
                }
            }
        }
        None
    }
}

fn kind_fits(actual: Kind, param: Kind) -> bool {
    param == Kind::Any
        || actual == param
        || (actual.is_integer() && param.is_integer())
}

impl Patcher for OperatorOverload {
    fn visit(&mut self, node: &mut Node) {
        let rewrite = match &node.kind {
            NodeKind::Binary { op, left, right } if *op == self.op => {
                // Open operands stay on the default operator path.
                if left.nature.is_open() || right.nature.is_open() {
                    None
                } else {
                    self.find(left.nature.kind, right.nature.kind)
                        .map(|(name, result)| {
                            (name.to_string(), result, (**left).clone(), (**right).clone())
                        })
                }
            }
            _ => None,
        };
        let Some((name, result, left, right)) = rewrite else {
            return;
        };

        let span = node.span;
        let callee = Node::new(NodeKind::Identifier(name), span);
        *node = node_with_nature(
            NodeKind::Call {
                callee: Box::new(callee),
                arguments: vec![left, right],
            },
            span,
            Nature::of(result),
        );
        self.applied = true;
    }

    fn reset(&mut self) {
        self.applied = false;
    }

    fn should_repeat(&self) -> bool {
        self.applied
    }

    fn repeatable(&self) -> bool {
        true
    }
}
