//! Type checker.
//!
//! A recursive visit over the AST that attaches a nature to every node.
//! The first error is recorded and further errors suppressed, but the
//! walk continues structurally so every node still ends up with a
//! nature (unknown where resolution failed).

use std::collections::BTreeMap;
use std::sync::Arc;

use smallvec::SmallVec;

use sift_core::{ErrorCode, Kind, Span};
use sift_vm::Function;

use crate::ast::{BinaryOp, Node, NodeKind, UnaryOp};
use crate::conf::{Config, Expect};
use crate::error::CheckError;
use crate::nature::{FuncNature, Nature};

/// Check a tree against a configuration, attaching natures.
///
/// Returns the nature of the whole expression.
pub fn check(root: &mut Node, config: &Config) -> Result<Nature, CheckError> {
    let mut checker = Checker {
        config,
        env: config.env.nature(),
        var_scopes: SmallVec::new(),
        predicate_scopes: Vec::new(),
        err: None,
    };

    let nature = checker.visit(root);

    if let Some(err) = checker.err.take() {
        return Err(err);
    }

    if config.expect != Expect::Any {
        let expected = config.expect.kind();
        if nature.is_open() {
            if !config.expect_any {
                return Err(CheckError::new(
                    ErrorCode::E207,
                    root.span,
                    format!("expected {}, but got {}", expected, nature.kind),
                ));
            }
        } else if nature.kind != expected
            && !(nature.kind.is_integer() && expected.is_integer())
        {
            return Err(CheckError::new(
                ErrorCode::E207,
                root.span,
                format!("expected {}, but got {}", expected, nature.kind),
            ));
        }
    }

    Ok(nature)
}

struct PredicateScope {
    collection: Nature,
    vars: BTreeMap<String, Nature>,
}

struct Checker<'a> {
    config: &'a Config,
    env: Nature,
    var_scopes: SmallVec<[(String, Nature); 4]>,
    predicate_scopes: Vec<PredicateScope>,
    err: Option<CheckError>,
}

impl<'a> Checker<'a> {
    fn error(&mut self, code: ErrorCode, span: Span, message: impl Into<String>) -> Nature {
        if self.err.is_none() {
            self.err = Some(CheckError::new(code, span, message));
        }
        Nature::unknown()
    }

    fn visit(&mut self, node: &mut Node) -> Nature {
        let nature = match &mut node.kind {
            NodeKind::Nil => Nature::nil(),
            NodeKind::Bool(_) => Nature::bool(),
            NodeKind::Integer(_) => Nature::int(),
            NodeKind::Float(_) => Nature::float(),
            NodeKind::String(_) => Nature::string(),
            NodeKind::Constant(value) => Nature::of(value.kind()),
            NodeKind::Identifier(_) => self.check_identifier(node),
            NodeKind::Unary { .. } => self.check_unary(node),
            NodeKind::Binary { .. } => self.check_binary(node),
            NodeKind::Chain { .. } => self.check_chain(node),
            NodeKind::Member { .. } => self.check_member(node),
            NodeKind::Slice { .. } => self.check_slice(node),
            NodeKind::Call { .. } => self.check_call(node),
            NodeKind::Builtin { .. } => self.check_builtin(node),
            NodeKind::Predicate { .. } => self.check_predicate(node),
            NodeKind::Pointer { .. } => self.check_pointer(node),
            NodeKind::VariableDeclarator { .. } => self.check_declarator(node),
            NodeKind::Sequence { .. } => self.check_sequence(node),
            NodeKind::Conditional { .. } => self.check_conditional(node),
            NodeKind::Array { .. } => self.check_array(node),
            NodeKind::Map { pairs } => {
                let mut pairs = std::mem::take(pairs);
                for pair in &mut pairs {
                    self.visit(pair);
                }
                if let NodeKind::Map { pairs: slot } = &mut node.kind {
                    *slot = pairs;
                }
                Nature::of(Kind::Map)
            }
            NodeKind::Pair { .. } => self.check_pair(node),
        };
        node.nature = nature.clone();
        nature
    }

    // === Identifiers ===

    fn check_identifier(&mut self, node: &mut Node) -> Nature {
        let name = match &node.kind {
            NodeKind::Identifier(name) => name.clone(),
            _ => unreachable!(),
        };
        if let Some((_, nature)) = self
            .var_scopes
            .iter()
            .rev()
            .find(|(n, _)| n.as_str() == name)
        {
            return nature.clone();
        }
        if name == "$env" {
            return Nature::unknown();
        }
        self.resolve(node, &name, self.config.strict, true)
    }

    /// Resolution order: environment field, then registered function.
    /// In strict mode an unresolved name is an error.
    fn resolve(&mut self, node: &mut Node, name: &str, strict: bool, functions: bool) -> Nature {
        if let Some((storage, index, mut nature)) = self.env.get(name) {
            // Canonicalize aliases so the compiler fetches the storage
            // name, and record the field index for static folding.
            if storage != name {
                match &mut node.kind {
                    NodeKind::Identifier(value) => *value = storage.clone(),
                    NodeKind::Member { property, .. } => {
                        property.kind = NodeKind::String(storage.clone());
                    }
                    _ => {}
                }
            }
            if self.env.kind == Kind::Struct {
                nature.field_index = vec![index];
            }
            return nature;
        }
        if functions {
            if let Some(f) = self.config.function(name) {
                return Nature::of_function(f.clone());
            }
        }
        if self.config.strict && strict {
            let span = node.span;
            return self.error(ErrorCode::E200, span, format!("unknown name {}", name));
        }
        if !self.env.strict {
            if let Some(default_value) = &self.env.default_value {
                return (**default_value).clone();
            }
        }
        Nature::unknown()
    }

    // === Operators ===

    fn check_unary(&mut self, node: &mut Node) -> Nature {
        let span = node.span;
        let (op, nt) = match &mut node.kind {
            NodeKind::Unary { op, operand } => (*op, self.visit(operand)),
            _ => unreachable!(),
        };

        match op {
            UnaryOp::Not => {
                if nt.kind == Kind::Bool || nt.is_open() {
                    return Nature::bool();
                }
            }
            UnaryOp::Neg | UnaryOp::Pos => {
                if nt.is_numeric() || nt.kind == Kind::Duration {
                    return nt;
                }
                if nt.is_open() {
                    return Nature::unknown();
                }
            }
        }
        self.error(
            ErrorCode::E201,
            span,
            format!(
                "invalid operation: {} (mismatched type {})",
                op.as_str(),
                nt.kind
            ),
        )
    }

    fn check_binary(&mut self, node: &mut Node) -> Nature {
        let span = node.span;
        let (op, l, r, right_is_string_literal) = match &mut node.kind {
            NodeKind::Binary { op, left, right } => {
                let l = self.visit(left);
                let r = self.visit(right);
                let lit = match &right.kind {
                    NodeKind::String(s) => Some(s.clone()),
                    _ => None,
                };
                (*op, l, r, lit)
            }
            _ => unreachable!(),
        };

        match op {
            BinaryOp::Eq | BinaryOp::Ne => {
                if comparable(&l, &r) {
                    return Nature::bool();
                }
            }
            BinaryOp::Or | BinaryOp::And => {
                if (l.kind == Kind::Bool || l.is_open()) && (r.kind == Kind::Bool || r.is_open())
                {
                    return Nature::bool();
                }
            }
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                if l.comparable_with(&r) {
                    return Nature::bool();
                }
            }
            BinaryOp::Add => {
                if l.is_numeric() && r.is_numeric() {
                    return combined(&l, &r);
                }
                if l.kind == Kind::String && r.kind == Kind::String {
                    return Nature::string();
                }
                if (l.kind == Kind::Time && r.kind == Kind::Duration)
                    || (l.kind == Kind::Duration && r.kind == Kind::Time)
                {
                    return Nature::time();
                }
                if l.kind == Kind::Duration && r.kind == Kind::Duration {
                    return Nature::duration();
                }
                if open_or(&l, &r, |n| {
                    n.is_numeric()
                        || matches!(n.kind, Kind::String | Kind::Time | Kind::Duration)
                }) {
                    return Nature::unknown();
                }
            }
            BinaryOp::Sub => {
                if l.is_numeric() && r.is_numeric() {
                    return combined(&l, &r);
                }
                if l.kind == Kind::Time && r.kind == Kind::Time {
                    return Nature::duration();
                }
                if l.kind == Kind::Time && r.kind == Kind::Duration {
                    return Nature::time();
                }
                if l.kind == Kind::Duration && r.kind == Kind::Duration {
                    return Nature::duration();
                }
                if open_or(&l, &r, |n| {
                    n.is_numeric() || matches!(n.kind, Kind::Time | Kind::Duration)
                }) {
                    return Nature::unknown();
                }
            }
            BinaryOp::Mul => {
                if l.is_numeric() && r.is_numeric() {
                    return combined(&l, &r);
                }
                if (l.is_numeric() && r.kind == Kind::Duration)
                    || (l.kind == Kind::Duration && r.is_numeric())
                {
                    return Nature::duration();
                }
                if open_or(&l, &r, |n| {
                    n.is_numeric() || n.kind == Kind::Duration
                }) {
                    return Nature::unknown();
                }
            }
            BinaryOp::Div => {
                if (l.is_numeric() || l.is_open()) && (r.is_numeric() || r.is_open()) {
                    return Nature::float();
                }
            }
            BinaryOp::Exp => {
                if (l.is_numeric() || l.is_open()) && (r.is_numeric() || r.is_open()) {
                    return Nature::float();
                }
            }
            BinaryOp::Mod => {
                if (l.is_integer() || l.is_open()) && (r.is_integer() || r.is_open()) {
                    return Nature::int();
                }
            }
            BinaryOp::In => {
                if (l.kind == Kind::String || l.is_open()) && r.kind == Kind::Struct {
                    return Nature::bool();
                }
                if r.kind == Kind::Map {
                    if !(l.kind == Kind::String || l.is_open()) {
                        return self.error(
                            ErrorCode::E201,
                            span,
                            format!("cannot use {} as map key", l.kind),
                        );
                    }
                    return Nature::bool();
                }
                if r.kind == Kind::Array {
                    if !comparable(&l, &r.elem()) {
                        return self.error(
                            ErrorCode::E201,
                            span,
                            format!("cannot use {} as element of {}", l.kind, r.kind),
                        );
                    }
                    return Nature::bool();
                }
                if r.is_open() {
                    return Nature::bool();
                }
            }
            BinaryOp::Matches => {
                if let Some(pattern) = &right_is_string_literal {
                    if let Err(e) = regex::Regex::new(pattern) {
                        return self.error(
                            ErrorCode::E206,
                            span,
                            format!("invalid regexp: {}", e),
                        );
                    }
                }
                if (l.kind == Kind::String || l.is_open())
                    && (r.kind == Kind::String || r.is_open())
                {
                    return Nature::bool();
                }
            }
            BinaryOp::Contains | BinaryOp::StartsWith | BinaryOp::EndsWith => {
                if (l.kind == Kind::String || l.is_open())
                    && (r.kind == Kind::String || r.is_open())
                {
                    return Nature::bool();
                }
            }
            BinaryOp::Range => {
                if (l.is_integer() || l.is_open()) && (r.is_integer() || r.is_open()) {
                    return Nature::array_of(Nature::int());
                }
            }
            BinaryOp::Coalesce => {
                if l.is_nil() && !r.is_nil() {
                    return r;
                }
                if !l.is_nil() && r.is_nil() {
                    return l;
                }
                if l.is_nil() && r.is_nil() {
                    return Nature::nil();
                }
                if r.assignable_to(&l) {
                    return l;
                }
                return Nature::unknown();
            }
            BinaryOp::Pipe => {
                // Rewritten away by the parser.
            }
        }

        self.error(
            ErrorCode::E201,
            span,
            format!(
                "invalid operation: {} (mismatched types {} and {})",
                op.as_str(),
                l.kind,
                r.kind
            ),
        )
    }

    fn check_chain(&mut self, node: &mut Node) -> Nature {
        match &mut node.kind {
            NodeKind::Chain { inner } => self.visit(inner),
            _ => unreachable!(),
        }
    }

    // === Member access ===

    fn check_member(&mut self, node: &mut Node) -> Nature {
        let span = node.span;

        // `$env.name` resolves the name directly in the environment;
        // `$env?.name` suppresses the strict-mode error.
        let env_lookup = match &node.kind {
            NodeKind::Member {
                base,
                property,
                optional,
                ..
            } => match (&base.kind, &property.kind) {
                (NodeKind::Identifier(id), NodeKind::String(name)) if id == "$env" => {
                    Some((name.clone(), *optional))
                }
                (NodeKind::Identifier(id), _) if id == "$env" => {
                    return Nature::unknown();
                }
                _ => None,
            },
            _ => unreachable!(),
        };
        if let Some((name, optional)) = env_lookup {
            let strict = self.config.strict && !optional;
            return self.resolve(node, &name, strict, false);
        }

        let (base_nature, prop_nature, prop_literal, method) = match &mut node.kind {
            NodeKind::Member {
                base,
                property,
                method,
                ..
            } => {
                let b = self.visit(base);
                let p = self.visit(property);
                let lit = match &property.kind {
                    NodeKind::String(s) => Some(s.clone()),
                    _ => None,
                };
                (b, p, lit, *method)
            }
            _ => unreachable!(),
        };

        if base_nature.is_open() {
            return Nature::unknown();
        }

        if let Some(name) = &prop_literal {
            if base_nature.is_nil() {
                return self.error(
                    ErrorCode::E201,
                    span,
                    format!("type nil has no field {}", name),
                );
            }
        }

        match base_nature.kind {
            Kind::Map | Kind::Struct => {
                if !(prop_nature.kind == Kind::String || prop_nature.is_open()) {
                    return self.error(
                        ErrorCode::E201,
                        span,
                        format!("cannot use {} to get an element from map", prop_nature.kind),
                    );
                }
                if let Some(name) = &prop_literal {
                    if let Some((storage, index, mut nature)) = base_nature.get(name) {
                        // Canonicalize an alias and extend the static
                        // field path when the base has one.
                        if &storage != name {
                            if let NodeKind::Member { property, .. } = &mut node.kind {
                                property.kind = NodeKind::String(storage.clone());
                            }
                        }
                        if base_nature.kind == Kind::Struct
                            || !base_nature.field_index.is_empty()
                        {
                            let mut path = base_nature.field_index.clone();
                            path.push(index);
                            nature.field_index = path;
                        }
                        return nature;
                    }
                    if base_nature.strict {
                        return self.error(
                            ErrorCode::E204,
                            span,
                            format!("unknown field {}", name),
                        );
                    }
                }
                base_nature.elem()
            }
            Kind::Array => {
                if !(prop_nature.is_integer() || prop_nature.is_open()) {
                    return self.error(
                        ErrorCode::E201,
                        span,
                        format!(
                            "array elements can only be selected using an integer (got {})",
                            prop_nature.kind
                        ),
                    );
                }
                base_nature.elem()
            }
            Kind::String => {
                if !(prop_nature.is_integer() || prop_nature.is_open()) {
                    return self.error(
                        ErrorCode::E201,
                        span,
                        format!("non-integer string index (got {})", prop_nature.kind),
                    );
                }
                Nature::string()
            }
            _ => {
                let what = if method { "method" } else { "field" };
                match prop_literal {
                    Some(name) => self.error(
                        ErrorCode::E201,
                        span,
                        format!("type {} has no {} {}", base_nature.kind, what, name),
                    ),
                    None => self.error(
                        ErrorCode::E201,
                        span,
                        format!("type {} is not indexable", base_nature.kind),
                    ),
                }
            }
        }
    }

    fn check_slice(&mut self, node: &mut Node) -> Nature {
        let span = node.span;
        let (base_nature, from_nature, to_nature) = match &mut node.kind {
            NodeKind::Slice { base, from, to } => {
                let b = self.visit(base);
                let f = from.as_mut().map(|n| self.visit(n));
                let t = to.as_mut().map(|n| self.visit(n));
                (b, f, t)
            }
            _ => unreachable!(),
        };

        if base_nature.is_open() {
            return Nature::unknown();
        }
        if !matches!(base_nature.kind, Kind::String | Kind::Array) {
            return self.error(
                ErrorCode::E201,
                span,
                format!("cannot slice {}", base_nature.kind),
            );
        }
        for bound in [from_nature, to_nature].into_iter().flatten() {
            if !(bound.is_integer() || bound.is_open()) {
                return self.error(
                    ErrorCode::E201,
                    span,
                    format!("non-integer slice index {}", bound.kind),
                );
            }
        }
        base_nature
    }

    // === Calls ===

    fn check_call(&mut self, node: &mut Node) -> Nature {
        let span = node.span;
        let callee_nature = match &mut node.kind {
            NodeKind::Call { callee, .. } => self.visit(callee),
            _ => unreachable!(),
        };

        let name = match &node.kind {
            NodeKind::Call { callee, .. } => match &callee.kind {
                NodeKind::Identifier(n) => n.clone(),
                NodeKind::Member { property, .. } => match &property.kind {
                    NodeKind::String(n) => n.clone(),
                    _ => "function".to_string(),
                },
                _ => "function".to_string(),
            },
            _ => unreachable!(),
        };

        if let Some(descriptor) = callee_nature.builtin.clone() {
            return self.check_function_call(&descriptor, node, span);
        }

        if callee_nature.is_open() {
            // Still type check the arguments.
            if let NodeKind::Call { arguments, .. } = &mut node.kind {
                let mut args = std::mem::take(arguments);
                for arg in &mut args {
                    self.visit(arg);
                }
                if let NodeKind::Call { arguments: slot, .. } = &mut node.kind {
                    *slot = args;
                }
            }
            return Nature::unknown();
        }
        if callee_nature.is_nil() {
            return self.error(
                ErrorCode::E201,
                span,
                format!("{} is nil; cannot call nil as function", name),
            );
        }

        if let Some(func) = callee_nature.func.clone() {
            let mut arguments = match &mut node.kind {
                NodeKind::Call { arguments, .. } => std::mem::take(arguments),
                _ => unreachable!(),
            };
            let result = self.check_arguments(&name, &func, &mut arguments, span);
            if let NodeKind::Call { arguments: slot, .. } = &mut node.kind {
                *slot = arguments;
            }
            return match result {
                Ok(nature) => nature,
                Err(err) => {
                    if self.err.is_none() {
                        self.err = Some(err);
                    }
                    Nature::unknown()
                }
            };
        }

        self.error(
            ErrorCode::E201,
            span,
            format!("{} is not callable", callee_nature.kind),
        )
    }

    /// Check a call against a registered function descriptor: the
    /// validator wins if present, otherwise the first signature that
    /// type-checks.
    fn check_function_call(
        &mut self,
        descriptor: &Arc<Function>,
        node: &mut Node,
        span: Span,
    ) -> Nature {
        let mut arguments = match &mut node.kind {
            NodeKind::Call { arguments, .. } => std::mem::take(arguments),
            _ => unreachable!(),
        };

        let result = self.check_descriptor(descriptor, &mut arguments, span);

        if let NodeKind::Call { arguments: slot, .. } = &mut node.kind {
            *slot = arguments;
        }
        result
    }

    fn check_descriptor(
        &mut self,
        descriptor: &Arc<Function>,
        arguments: &mut Vec<Node>,
        span: Span,
    ) -> Nature {
        if descriptor.signatures().is_empty() && !descriptor.has_validator() {
            for arg in arguments.iter_mut() {
                self.visit(arg);
            }
            return Nature::any();
        }

        // The validator replaces signature matching entirely.
        let mut kinds = Vec::with_capacity(arguments.len());
        for arg in arguments.iter_mut() {
            let nature = self.visit(arg);
            kinds.push(if nature.is_open() {
                Kind::Any
            } else {
                nature.kind
            });
        }
        if let Some(result) = descriptor.validate(&kinds) {
            return match result {
                Ok(kind) => Nature::of(kind),
                Err(message) => self.error(ErrorCode::E202, span, message),
            };
        }

        let mut last_err = None;
        for sig in descriptor.signatures() {
            let func = FuncNature {
                params: sig.params.iter().map(|k| Nature::of(*k)).collect(),
                result: Box::new(Nature::of(sig.result)),
                variadic: sig.variadic,
                method: false,
                method_index: 0,
            };
            match self.check_arguments(descriptor.name(), &func, arguments, span) {
                Ok(nature) => return nature,
                Err(err) => last_err = Some(err),
            }
        }

        match last_err {
            Some(err) => {
                if self.err.is_none() {
                    self.err = Some(err);
                }
                Nature::unknown()
            }
            None => self.error(
                ErrorCode::E202,
                span,
                format!("no matching overload for {}", descriptor.name()),
            ),
        }
    }

    fn check_arguments(
        &mut self,
        name: &str,
        func: &FuncNature,
        arguments: &mut [Node],
        span: Span,
    ) -> Result<Nature, CheckError> {
        // Method receivers shift the parameter window by one.
        let offset = if func.method { 1 } else { 0 };
        let num_in = func.params.len() - offset;

        let arity_err = if func.variadic {
            if arguments.len() + 1 < num_in {
                Some(format!("not enough arguments to call {}", name))
            } else {
                None
            }
        } else if arguments.len() > num_in {
            Some(format!("too many arguments to call {}", name))
        } else if arguments.len() < num_in {
            Some(format!("not enough arguments to call {}", name))
        } else {
            None
        };

        if let Some(message) = arity_err {
            // Visit the arguments anyway so a later patcher pass can
            // still work with typed nodes.
            for arg in arguments.iter_mut() {
                self.visit(arg);
            }
            return Err(CheckError::new(ErrorCode::E202, span, message));
        }

        for (i, arg) in arguments.iter_mut().enumerate() {
            let arg_nature = self.visit(arg);

            let param = if func.variadic && i + offset >= func.params.len() - 1 {
                func.params.last().cloned().unwrap_or_else(Nature::any)
            } else {
                func.params[i + offset].clone()
            };

            // Integer literals flow into float parameters by rewriting
            // the literal subtree; this is the only implicit numeric
            // conversion.
            if param.kind == Kind::Float && arg_nature.is_integer() {
                promote_to_float(arg);
                continue;
            }

            if arg_nature.is_nil() {
                if param.is_open() {
                    continue;
                }
                return Err(CheckError::new(
                    ErrorCode::E202,
                    arg.span,
                    format!(
                        "cannot use nil as argument (type {}) to call {}",
                        param.kind, name
                    ),
                ));
            }

            if !arg_nature.assignable_to(&param) {
                return Err(CheckError::new(
                    ErrorCode::E202,
                    arg.span,
                    format!(
                        "cannot use {} as argument (type {}) to call {}",
                        arg_nature.kind, param.kind, name
                    ),
                ));
            }
        }

        Ok((*func.result).clone())
    }

    // === Higher-order builtins ===

    fn check_builtin(&mut self, node: &mut Node) -> Nature {
        let span = node.span;
        let name = match &node.kind {
            NodeKind::Builtin { name, .. } => name.clone(),
            _ => unreachable!(),
        };
        let mut arguments = match &mut node.kind {
            NodeKind::Builtin { arguments, .. } => std::mem::take(arguments),
            _ => unreachable!(),
        };

        let nature = self.check_builtin_args(&name, &mut arguments, span);

        if let NodeKind::Builtin { arguments: slot, .. } = &mut node.kind {
            *slot = arguments;
        }
        nature
    }

    fn check_builtin_args(
        &mut self,
        name: &str,
        arguments: &mut [Node],
        span: Span,
    ) -> Nature {
        let collection = self.visit(&mut arguments[0]);
        if collection.kind != Kind::Array && !collection.is_open() {
            return self.error(
                ErrorCode::E203,
                arguments[0].span,
                format!("builtin {} takes only array (got {})", name, collection.kind),
            );
        }

        match name {
            "all" | "none" | "any" | "one" | "filter" | "find" | "findLast" | "findIndex"
            | "findLastIndex" | "groupBy" | "sortBy" => {
                self.begin(collection.clone(), &[]);
                let predicate = self.visit(&mut arguments[1]);
                self.end();

                if name == "sortBy" && arguments.len() == 3 {
                    let order = self.visit(&mut arguments[2]);
                    if !(order.kind == Kind::String || order.is_open()) {
                        return self.error(
                            ErrorCode::E203,
                            arguments[2].span,
                            "sort order must be \"asc\" or \"desc\"",
                        );
                    }
                }

                let out = predicate_out(&predicate);
                let needs_bool = !matches!(name, "groupBy" | "sortBy");
                if needs_bool && !(out.kind == Kind::Bool || out.is_open()) {
                    return self.error(
                        ErrorCode::E203,
                        arguments[1].span,
                        format!("predicate should return boolean (got {})", out.kind),
                    );
                }

                match name {
                    "all" | "none" | "any" | "one" => Nature::bool(),
                    "filter" => {
                        if collection.is_open() {
                            Nature::of(Kind::Array)
                        } else {
                            Nature::array_of(collection.elem())
                        }
                    }
                    "find" | "findLast" => {
                        if collection.is_open() {
                            Nature::unknown()
                        } else {
                            collection.elem()
                        }
                    }
                    "findIndex" | "findLastIndex" => Nature::int(),
                    "groupBy" => {
                        let mut groups = Nature::of(Kind::Map);
                        groups.default_value =
                            Some(Box::new(Nature::array_of(collection.elem())));
                        groups
                    }
                    "sortBy" => collection,
                    _ => unreachable!(),
                }
            }
            "map" => {
                self.begin(collection, &[("index", Nature::int())]);
                let predicate = self.visit(&mut arguments[1]);
                self.end();
                Nature::array_of(predicate_out(&predicate))
            }
            "count" => {
                if arguments.len() == 2 {
                    self.begin(collection, &[]);
                    let predicate = self.visit(&mut arguments[1]);
                    self.end();
                    let out = predicate_out(&predicate);
                    if !(out.kind == Kind::Bool || out.is_open()) {
                        return self.error(
                            ErrorCode::E203,
                            arguments[1].span,
                            format!("predicate should return boolean (got {})", out.kind),
                        );
                    }
                }
                Nature::int()
            }
            "sum" => {
                if arguments.len() == 2 {
                    self.begin(collection, &[]);
                    let predicate = self.visit(&mut arguments[1]);
                    self.end();
                    predicate_out(&predicate)
                } else if collection.is_open() {
                    Nature::unknown()
                } else {
                    collection.elem()
                }
            }
            "reduce" => {
                self.begin(
                    collection,
                    &[("index", Nature::int()), ("acc", Nature::unknown())],
                );
                let predicate = self.visit(&mut arguments[1]);
                self.end();
                if arguments.len() == 3 {
                    self.visit(&mut arguments[2]);
                }
                predicate_out(&predicate)
            }
            _ => self.error(ErrorCode::E203, span, format!("unknown builtin {}", name)),
        }
    }

    fn begin(&mut self, collection: Nature, vars: &[(&str, Nature)]) {
        let mut scope = PredicateScope {
            collection,
            vars: BTreeMap::new(),
        };
        for (name, nature) in vars {
            scope.vars.insert(name.to_string(), nature.clone());
        }
        self.predicate_scopes.push(scope);
    }

    fn end(&mut self) {
        self.predicate_scopes.pop();
    }

    fn check_predicate(&mut self, node: &mut Node) -> Nature {
        let out = match &mut node.kind {
            NodeKind::Predicate { body } => self.visit(body),
            _ => unreachable!(),
        };
        let mut nature = Nature::func_of(vec![Nature::any()], out.clone(), false);
        nature.predicate_out = Some(Box::new(out));
        nature
    }

    fn check_pointer(&mut self, node: &mut Node) -> Nature {
        let span = node.span;
        let name = match &node.kind {
            NodeKind::Pointer { name } => name.clone(),
            _ => unreachable!(),
        };
        let Some(scope) = self.predicate_scopes.last() else {
            return self.error(
                ErrorCode::E203,
                span,
                "cannot use pointer accessor outside predicate",
            );
        };

        if name.is_empty() {
            let collection = scope.collection.clone();
            if collection.is_open() {
                return Nature::unknown();
            }
            if collection.kind == Kind::Array {
                return collection.elem();
            }
            return self.error(
                ErrorCode::E203,
                span,
                format!("cannot use {} as array", collection.kind),
            );
        }
        if let Some(nature) = scope.vars.get(&name) {
            return nature.clone();
        }
        self.error(ErrorCode::E203, span, format!("unknown pointer #{}", name))
    }

    // === Bindings and structure ===

    fn check_declarator(&mut self, node: &mut Node) -> Nature {
        let span = node.span;
        let name = match &node.kind {
            NodeKind::VariableDeclarator { name, .. } => name.clone(),
            _ => unreachable!(),
        };

        if self.env.get(&name).is_some() {
            return self.error(ErrorCode::E205, span, format!("cannot redeclare {}", name));
        }
        if self.config.function(&name).is_some() {
            return self.error(
                ErrorCode::E205,
                span,
                format!("cannot redeclare function {}", name),
            );
        }
        if self.var_scopes.iter().any(|(n, _)| n.as_str() == name) {
            return self.error(
                ErrorCode::E205,
                span,
                format!("cannot redeclare variable {}", name),
            );
        }

        let value_nature = match &mut node.kind {
            NodeKind::VariableDeclarator { value, .. } => self.visit(value),
            _ => unreachable!(),
        };
        self.var_scopes.push((name, value_nature));
        let body_nature = match &mut node.kind {
            NodeKind::VariableDeclarator { body, .. } => self.visit(body),
            _ => unreachable!(),
        };
        self.var_scopes.pop();
        body_nature
    }

    fn check_sequence(&mut self, node: &mut Node) -> Nature {
        let span = node.span;
        match &mut node.kind {
            NodeKind::Sequence { nodes } => {
                if nodes.is_empty() {
                    return self.error(ErrorCode::E201, span, "empty sequence expression");
                }
                let mut last = Nature::unknown();
                for child in nodes.iter_mut() {
                    last = self.visit(child);
                }
                last
            }
            _ => unreachable!(),
        }
    }

    fn check_conditional(&mut self, node: &mut Node) -> Nature {
        let (cond_nature, cond_span) = match &mut node.kind {
            NodeKind::Conditional { cond, .. } => (self.visit(cond), cond.span),
            _ => unreachable!(),
        };
        if cond_nature.kind != Kind::Bool && !cond_nature.is_open() {
            return self.error(
                ErrorCode::E201,
                cond_span,
                format!(
                    "non-bool expression (type {}) used as condition",
                    cond_nature.kind
                ),
            );
        }

        let (t1, t2) = match &mut node.kind {
            NodeKind::Conditional {
                then, otherwise, ..
            } => (self.visit(then), self.visit(otherwise)),
            _ => unreachable!(),
        };

        if t1.is_nil() && !t2.is_nil() {
            return t2;
        }
        if !t1.is_nil() && t2.is_nil() {
            return t1;
        }
        if t1.is_nil() && t2.is_nil() {
            return Nature::nil();
        }
        if t1.assignable_to(&t2) {
            return t1;
        }
        Nature::unknown()
    }

    fn check_array(&mut self, node: &mut Node) -> Nature {
        match &mut node.kind {
            NodeKind::Array { elements } => {
                let mut prev: Option<Nature> = None;
                let mut uniform = true;
                for element in elements.iter_mut() {
                    let curr = self.visit(element);
                    if let Some(p) = &prev {
                        if p.kind != curr.kind {
                            uniform = false;
                        }
                    }
                    prev = Some(curr);
                }
                match (uniform, prev) {
                    (true, Some(elem)) => Nature::array_of(elem),
                    _ => Nature::of(Kind::Array),
                }
            }
            _ => unreachable!(),
        }
    }

    fn check_pair(&mut self, node: &mut Node) -> Nature {
        match &mut node.kind {
            NodeKind::Pair { key, value } => {
                self.visit(key);
                self.visit(value);
                Nature::nil()
            }
            _ => unreachable!(),
        }
    }
}

/// Out nature of a predicate node, defaulting open.
fn predicate_out(predicate: &Nature) -> Nature {
    predicate
        .predicate_out
        .as_deref()
        .cloned()
        .unwrap_or_else(Nature::unknown)
}

/// Equality comparability: numerics cross-compare, otherwise kinds must
/// match or a side must be open.
fn comparable(l: &Nature, r: &Nature) -> bool {
    if l.is_open() || r.is_open() {
        return true;
    }
    if l.is_numeric() && r.is_numeric() {
        return true;
    }
    l.kind == r.kind || l.is_nil() || r.is_nil()
}

/// The combined nature of a mixed numeric operation.
fn combined(l: &Nature, r: &Nature) -> Nature {
    if l.kind == Kind::Float || r.kind == Kind::Float {
        Nature::float()
    } else {
        Nature::int()
    }
}

/// Either side open and the other acceptable (or open too).
fn open_or(l: &Nature, r: &Nature, pred: impl Fn(&Nature) -> bool) -> bool {
    if l.is_open() && r.is_open() {
        return true;
    }
    (l.is_open() && pred(r)) || (r.is_open() && pred(l))
}

/// Rewrite integer literals to floats through `+`, `-`, `*` and unary
/// nodes, replacing leaves.
fn promote_to_float(node: &mut Node) {
    match &mut node.kind {
        NodeKind::Integer(i) => {
            let value = *i as f64;
            node.kind = NodeKind::Float(value);
            node.nature = Nature::float();
        }
        NodeKind::Unary { operand, .. } => {
            promote_to_float(operand);
            node.nature = Nature::float();
        }
        NodeKind::Binary { op, left, right } => {
            if matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul) {
                promote_to_float(left);
                promote_to_float(right);
                node.nature = Nature::float();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::EnvSchema;
    use crate::parser::parse;
    use sift_source::Source;

    fn check_str(src: &str, config: &Config) -> Result<Nature, CheckError> {
        let mut node = parse(&Source::unnamed(src), config).unwrap();
        check(&mut node, config)
    }

    fn kind_of(src: &str, config: &Config) -> Kind {
        check_str(src, config).unwrap().kind
    }

    fn default_config() -> Config {
        Config::new()
    }

    #[test]
    fn literal_kinds() {
        let c = default_config();
        assert_eq!(kind_of("1", &c), Kind::Int);
        assert_eq!(kind_of("1.5", &c), Kind::Float);
        assert_eq!(kind_of("true", &c), Kind::Bool);
        assert_eq!(kind_of("\"x\"", &c), Kind::String);
        assert_eq!(kind_of("nil", &c), Kind::Nil);
    }

    #[test]
    fn arithmetic_combining() {
        let c = default_config();
        assert_eq!(kind_of("1 + 2", &c), Kind::Int);
        assert_eq!(kind_of("1 + 2.0", &c), Kind::Float);
        assert_eq!(kind_of("1 / 2", &c), Kind::Float);
        assert_eq!(kind_of("2 ** 3", &c), Kind::Float);
        assert_eq!(kind_of("7 % 3", &c), Kind::Int);
        assert_eq!(kind_of("'a' + 'b'", &c), Kind::String);
    }

    #[test]
    fn arithmetic_errors() {
        let c = default_config();
        assert!(check_str("1 + 'a'", &c).is_err());
        assert!(check_str("1.5 % 2", &c).is_err());
        assert!(check_str("-'a'", &c).is_err());
    }

    #[test]
    fn comparisons() {
        let c = default_config();
        assert_eq!(kind_of("1 < 2", &c), Kind::Bool);
        assert_eq!(kind_of("'a' <= 'b'", &c), Kind::Bool);
        assert!(check_str("1 < 'a'", &c).is_err());
        assert!(check_str("true and 1", &c).is_err());
    }

    #[test]
    fn range_requires_integers() {
        let c = default_config();
        let nature = check_str("1..5", &c).unwrap();
        assert_eq!(nature.kind, Kind::Array);
        assert_eq!(nature.elem().kind, Kind::Int);
        assert!(check_str("1.5..5", &c).is_err());
    }

    #[test]
    fn membership() {
        let c = default_config();
        assert_eq!(kind_of("1 in [1, 2]", &c), Kind::Bool);
        assert_eq!(kind_of("1 in 1..5", &c), Kind::Bool);
        assert!(check_str("'a' in [1, 2]", &c).is_err());
    }

    #[test]
    fn matches_validates_literal_patterns() {
        let c = default_config();
        assert_eq!(kind_of("'ab' matches '^a'", &c), Kind::Bool);
        let err = check_str("'ab' matches '('", &c).unwrap_err();
        assert_eq!(err.code, ErrorCode::E206);
    }

    #[test]
    fn unknown_name_in_strict_mode() {
        let c = default_config();
        let err = check_str("missing + 1", &c).unwrap_err();
        assert_eq!(err.code, ErrorCode::E200);
    }

    #[test]
    fn unknown_name_allowed_when_lenient() {
        let c = Config::new().allow_undefined_variables();
        assert_eq!(kind_of("missing", &c), Kind::Unknown);
    }

    #[test]
    fn env_field_resolution() {
        let c = Config::new().with_env(
            EnvSchema::map()
                .declare("age", Nature::int())
                .declare("name", Nature::string()),
        );
        assert_eq!(kind_of("age + 1", &c), Kind::Int);
        assert_eq!(kind_of("name startsWith 'a'", &c), Kind::Bool);
        assert!(check_str("missing", &c).is_err());
    }

    #[test]
    fn env_alias_is_canonicalized() {
        let c = Config::new().with_env(EnvSchema::map().declare_aliased(
            "user_name",
            "username",
            Nature::string(),
        ));
        let mut node = parse(&Source::unnamed("username"), &c).unwrap();
        check(&mut node, &c).unwrap();
        match &node.kind {
            NodeKind::Identifier(name) => assert_eq!(name, "user_name"),
            other => panic!("expected identifier, got {:?}", other),
        }
    }

    #[test]
    fn env_member_access() {
        let user = Nature::map_of(
            crate::nature::fields_of(vec![
                ("age", Nature::int()),
                ("name", Nature::string()),
            ]),
            true,
        );
        let c = Config::new().with_env(EnvSchema::map().declare("user", user));
        assert_eq!(kind_of("user.age", &c), Kind::Int);
        let err = check_str("user.height", &c).unwrap_err();
        assert_eq!(err.code, ErrorCode::E204);
    }

    #[test]
    fn record_env_records_field_paths() {
        let address = {
            let mut n = Nature::map_of(
                crate::nature::fields_of(vec![("city", Nature::string())]),
                true,
            );
            n.kind = Kind::Struct;
            n
        };
        let c = Config::new().with_env(EnvSchema::record().declare("address", address));
        let mut node = parse(&Source::unnamed("address.city"), &c).unwrap();
        check(&mut node, &c).unwrap();
        assert_eq!(node.nature.field_index, vec![0, 0]);
    }

    #[test]
    fn dollar_env_access() {
        let c = Config::new().with_env(EnvSchema::map().declare("x", Nature::int()));
        assert_eq!(kind_of("$env.x", &c), Kind::Int);
        // unknown name through $env is an error in strict mode
        assert!(check_str("$env.y", &c).is_err());
        // but not through the optional form
        assert_eq!(kind_of("$env?.y", &c), Kind::Unknown);
    }

    #[test]
    fn let_bindings_and_redeclaration() {
        let c = default_config();
        assert_eq!(kind_of("let x = 10; x * x", &c), Kind::Int);
        let err = check_str("let x = 1; let x = 2; x", &c).unwrap_err();
        assert_eq!(err.code, ErrorCode::E205);
    }

    #[test]
    fn redeclaring_env_name_is_an_error() {
        let c = Config::new().with_env(EnvSchema::map().declare("x", Nature::int()));
        let err = check_str("let x = 1; x", &c).unwrap_err();
        assert_eq!(err.code, ErrorCode::E205);
    }

    #[test]
    fn conditional_typing() {
        let c = default_config();
        assert_eq!(kind_of("true ? 1 : 2", &c), Kind::Int);
        assert_eq!(kind_of("true ? 1 : nil", &c), Kind::Int);
        assert_eq!(kind_of("true ? 1 : 'a'", &c), Kind::Unknown);
        assert!(check_str("1 ? 2 : 3", &c).is_err());
    }

    #[test]
    fn coalesce_typing() {
        let c = default_config();
        assert_eq!(kind_of("nil ?? 1", &c), Kind::Int);
        assert_eq!(kind_of("1 ?? 2", &c), Kind::Int);
    }

    #[test]
    fn array_literals() {
        let c = default_config();
        let nature = check_str("[1, 2, 3]", &c).unwrap();
        assert_eq!(nature.elem().kind, Kind::Int);
        let mixed = check_str("[1, 'a']", &c).unwrap();
        assert_eq!(mixed.kind, Kind::Array);
        assert_eq!(mixed.elem().kind, Kind::Any);
    }

    #[test]
    fn builtin_predicates() {
        let c = default_config();
        assert_eq!(kind_of("all(1..5, # > 0)", &c), Kind::Bool);
        assert_eq!(kind_of("filter(1..5, # > 2)", &c), Kind::Array);
        assert_eq!(kind_of("count(1..5)", &c), Kind::Int);
        assert_eq!(kind_of("sum(1..5)", &c), Kind::Int);
        assert_eq!(kind_of("find(1..5, # > 2)", &c), Kind::Int);
        assert_eq!(kind_of("findIndex(1..5, # > 2)", &c), Kind::Int);
        assert_eq!(kind_of("sortBy(1..5, #)", &c), Kind::Array);
        assert_eq!(kind_of("groupBy(1..5, # % 2)", &c), Kind::Map);
        assert_eq!(kind_of("map(1..3, # * 2)", &c), Kind::Array);
        assert_eq!(kind_of("reduce(1..4, #acc + #, 0)", &c), Kind::Unknown);
    }

    #[test]
    fn predicate_must_return_bool() {
        let c = default_config();
        let err = check_str("all(1..5, # + 1)", &c).unwrap_err();
        assert_eq!(err.code, ErrorCode::E203);
    }

    #[test]
    fn builtin_collection_must_be_array() {
        let c = default_config();
        let err = check_str("filter(1, # > 0)", &c).unwrap_err();
        assert_eq!(err.code, ErrorCode::E203);
    }

    #[test]
    fn map_injects_index() {
        let c = default_config();
        assert_eq!(kind_of("map(1..3, #index)", &c), Kind::Array);
        // index is not available in filter
        let err = check_str("filter(1..3, #index > 0)", &c).unwrap_err();
        assert_eq!(err.code, ErrorCode::E203);
    }

    #[test]
    fn pointer_outside_predicate() {
        // The parser only builds pointers inside predicates, so this
        // state is reachable only through a rewriting visitor.
        let c = default_config();
        let mut node = Node::new(
            NodeKind::Pointer {
                name: String::new(),
            },
            Span::at(0, 1),
        );
        let err = check(&mut node, &c).unwrap_err();
        assert!(err.message.contains("outside predicate"));
    }

    #[test]
    fn function_calls_with_signatures() {
        let c = Config::new().with_function(
            Function::new("double")
                .signature(&[Kind::Int], Kind::Int)
                .fast(|v| v.clone()),
        );
        assert_eq!(kind_of("double(2)", &c), Kind::Int);
        let err = check_str("double('a')", &c).unwrap_err();
        assert_eq!(err.code, ErrorCode::E202);
        let err = check_str("double(1, 2)", &c).unwrap_err();
        assert_eq!(err.code, ErrorCode::E202);
    }

    #[test]
    fn function_overloads_pick_first_match() {
        let c = Config::new().with_function(
            Function::new("add")
                .signature(&[Kind::Int, Kind::Int], Kind::Int)
                .signature(&[Kind::String, Kind::String], Kind::String),
        );
        assert_eq!(kind_of("add(1, 2)", &c), Kind::Int);
        assert_eq!(kind_of("add('a', 'b')", &c), Kind::String);
        assert!(check_str("add(1, 'b')", &c).is_err());
    }

    #[test]
    fn variadic_functions() {
        let c = Config::new().with_function(
            Function::new("max").variadic_signature(&[Kind::Int], Kind::Int),
        );
        assert_eq!(kind_of("max(1)", &c), Kind::Int);
        assert_eq!(kind_of("max(1, 2, 3)", &c), Kind::Int);
    }

    #[test]
    fn validator_functions() {
        let c = Config::new().with_function(Function::new("first").validator(|args| {
            if args.len() == 1 && args[0] == Kind::Array {
                Ok(Kind::Any)
            } else {
                Err("first expects an array".to_string())
            }
        }));
        assert_eq!(kind_of("first([1])", &c), Kind::Any);
        assert!(check_str("first(1)", &c).is_err());
    }

    #[test]
    fn literal_promotion() {
        let c = Config::new().with_function(
            Function::new("sqrt").signature(&[Kind::Float], Kind::Float),
        );
        let mut node = parse(&Source::unnamed("sqrt(2 + 2)"), &c).unwrap();
        check(&mut node, &c).unwrap();
        match &node.kind {
            NodeKind::Call { arguments, .. } => match &arguments[0].kind {
                NodeKind::Binary { left, right, .. } => {
                    assert!(matches!(left.kind, NodeKind::Float(_)));
                    assert!(matches!(right.kind, NodeKind::Float(_)));
                }
                other => panic!("expected binary, got {:?}", other),
            },
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn expect_kind_enforced() {
        let config = Config::new().expect(Expect::Bool);
        let err = check_str("1 + 2", &config).unwrap_err();
        assert_eq!(err.code, ErrorCode::E207);
        assert!(check_str("1 < 2", &config).is_ok());
    }

    #[test]
    fn expect_any_relaxes_unknown() {
        let mut config = Config::new().allow_undefined_variables().expect(Expect::Int);
        config.expect_any = true;
        assert!(check_str("missing", &config).is_ok());
    }

    #[test]
    fn nature_totality_on_error() {
        let c = default_config();
        let mut node = parse(&Source::unnamed("1 + 'a'"), &c).unwrap();
        assert!(check(&mut node, &c).is_err());
        // the failing node still carries a nature (unknown)
        assert_eq!(node.nature.kind, Kind::Unknown);
    }

    #[test]
    fn chain_typing() {
        let user = Nature::map_of(
            crate::nature::fields_of(vec![("name", Nature::string())]),
            true,
        );
        let c = Config::new().with_env(EnvSchema::map().declare("user", user));
        assert_eq!(kind_of("user?.name", &c), Kind::String);
    }

    #[test]
    fn slice_typing() {
        let c = default_config();
        assert_eq!(kind_of("[1, 2, 3][1:2]", &c), Kind::Array);
        assert_eq!(kind_of("'abc'[1:]", &c), Kind::String);
        assert!(check_str("1[1:2]", &c).is_err());
        assert!(check_str("[1]['a':2]", &c).is_err());
    }
}
