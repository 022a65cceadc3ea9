//! Pratt-style precedence-climbing parser.
//!
//! The parser records the first error and keeps building whatever tree
//! it can so later stages never see a hole; callers only observe the
//! error. Node construction is counted against a configurable limit to
//! bound worst-case resource usage.

use sift_core::{ErrorCode, Span};
use sift_source::Source;

use crate::ast::{BinaryOp, Node, NodeKind, UnaryOp};
use crate::conf::Config;
use crate::error::ParseError;
use crate::lexer::lex;
use crate::token::{Token, TokenKind};

// Argument pattern bits of the higher-order builtin table.
const ARG_EXPR: u8 = 1;
const ARG_PRED: u8 = 2;
const ARG_OPTIONAL: u8 = 0x80;

/// Parse-time arity rules of the higher-order builtins.
fn higher_order(name: &str) -> Option<&'static [u8]> {
    Some(match name {
        "all" | "none" | "any" | "one" | "filter" | "map" | "find" | "findIndex"
        | "findLast" | "findLastIndex" | "groupBy" => &[ARG_EXPR, ARG_PRED],
        "count" | "sum" => &[ARG_EXPR, ARG_PRED | ARG_OPTIONAL],
        "sortBy" => &[ARG_EXPR, ARG_PRED, ARG_EXPR | ARG_OPTIONAL],
        "reduce" => &[ARG_EXPR, ARG_PRED, ARG_EXPR | ARG_OPTIONAL],
        _ => return None,
    })
}

/// Parse a source into an AST using the given configuration.
pub fn parse(source: &Source, config: &Config) -> Result<Node, ParseError> {
    let tokens = lex(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        err: None,
        depth: 0,
        node_count: 0,
        config,
    };

    let node = parser.parse_sequence_expression();

    if !parser.current().is(TokenKind::Eof) {
        let token = parser.current().clone();
        parser.error_at(&token, ErrorCode::E100, format!("unexpected token {}", token));
    }

    match parser.err.take() {
        Some(err) => Err(err),
        None => Ok(node),
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    err: Option<ParseError>,
    /// Predicate nesting depth; pointers are only legal above zero.
    depth: u32,
    node_count: usize,
    config: &'a Config,
}

impl<'a> Parser<'a> {
    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn next(&mut self) {
        if self.pos + 1 >= self.tokens.len() {
            let token = self.current().clone();
            self.error_at(&token, ErrorCode::E102, "unexpected end of expression");
            return;
        }
        self.pos += 1;
    }

    fn expect(&mut self, kind: TokenKind, value: &str) {
        if self.current().is_value(kind, &[value]) {
            self.next();
            return;
        }
        let token = self.current().clone();
        self.error_at(
            &token,
            ErrorCode::E100,
            format!("unexpected token {} (expected {:?})", token, value),
        );
    }

    fn expect_kind(&mut self, kind: TokenKind) -> Token {
        let token = self.current().clone();
        if token.is(kind) {
            self.next();
        } else {
            self.error_at(&token, ErrorCode::E100, format!("unexpected token {}", token));
        }
        token
    }

    fn error_at(&mut self, token: &Token, code: ErrorCode, message: impl Into<String>) {
        if self.err.is_none() {
            self.err = Some(ParseError::new(code, token.span, message));
        }
    }

    /// Build a node, charging it against the node limit.
    fn create(&mut self, kind: NodeKind, span: Span) -> Node {
        self.node_count += 1;
        if self.node_count > self.config.max_nodes {
            if self.err.is_none() {
                self.err = Some(ParseError::new(
                    ErrorCode::E104,
                    span,
                    "expression exceeds maximum allowed nodes",
                ));
            }
        }
        Node::new(kind, span)
    }

    fn dummy(&self) -> Node {
        Node::new(NodeKind::Nil, self.current().span)
    }

    // === Sequences and declarations ===

    fn parse_sequence_expression(&mut self) -> Node {
        let mut nodes = vec![self.parse_expression(0)];

        while self.current().is_value(TokenKind::Operator, &[";"]) && self.err.is_none() {
            self.next();
            // A trailing semicolon ends the sequence.
            if self.current().is(TokenKind::Eof) {
                break;
            }
            nodes.push(self.parse_expression(0));
        }

        if nodes.len() == 1 {
            return nodes.pop().unwrap();
        }
        let span = nodes[0].span;
        self.create(NodeKind::Sequence { nodes }, span)
    }

    fn parse_variable_declaration(&mut self) -> Node {
        self.expect(TokenKind::Operator, "let");
        let name_token = self.expect_kind(TokenKind::Identifier);
        self.expect(TokenKind::Operator, "=");

        let value = self.parse_expression(0);
        self.expect(TokenKind::Operator, ";");
        let body = self.parse_sequence_expression();

        self.create(
            NodeKind::VariableDeclarator {
                name: name_token.value.clone(),
                value: Box::new(value),
                body: Box::new(body),
            },
            name_token.span,
        )
    }

    /// `if cond { a } else { b }` lowers to the ternary node.
    fn parse_conditional_if(&mut self) -> Node {
        let start = self.current().span;
        self.next();

        let cond = self.parse_expression(0);
        self.expect(TokenKind::Bracket, "{");
        let then = self.parse_sequence_expression();
        self.expect(TokenKind::Bracket, "}");
        self.expect(TokenKind::Operator, "else");
        self.expect(TokenKind::Bracket, "{");
        let otherwise = self.parse_sequence_expression();
        self.expect(TokenKind::Bracket, "}");

        self.create(
            NodeKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            start,
        )
    }

    // === Expressions ===

    fn parse_expression(&mut self, precedence: u16) -> Node {
        if self.err.is_some() {
            return self.dummy();
        }

        if precedence == 0 {
            if self.current().is_value(TokenKind::Operator, &["let"]) {
                return self.parse_variable_declaration();
            }
            if self.current().is_value(TokenKind::Operator, &["if"]) {
                return self.parse_conditional_if();
            }
        }

        let mut node_left = self.parse_primary();
        let mut prev_op: Option<BinaryOp> = None;
        let mut op_token = self.current().clone();

        while op_token.is(TokenKind::Operator) && self.err.is_none() {
            let negate = op_token.value == "not";
            let mut not_span = Span::DUMMY;

            // `a not in b` and friends: the lexer left two operator
            // tokens; combine them when precedence permits.
            if negate {
                let saved = self.pos;
                self.next();
                let candidate = BinaryOp::from_str(&self.current().value);
                match candidate {
                    Some(op) if op.allows_negation() => {
                        if op.precedence() >= precedence {
                            not_span = self.current().span;
                            op_token = self.current().clone();
                        } else {
                            self.pos = saved;
                            break;
                        }
                    }
                    _ => {
                        let token = self.current().clone();
                        self.error_at(
                            &token,
                            ErrorCode::E100,
                            format!("unexpected token {}", token),
                        );
                        break;
                    }
                }
            }

            let op = match BinaryOp::from_str(&op_token.value) {
                Some(op) if op.precedence() >= precedence => op,
                _ => break,
            };
            self.next();

            if op == BinaryOp::Pipe {
                let ident = self.expect_kind(TokenKind::Identifier);
                node_left = self.parse_call(&ident, vec![node_left], true);
                prev_op = Some(op);
                op_token = self.current().clone();
                continue;
            }

            if prev_op == Some(BinaryOp::Coalesce) && op != BinaryOp::Coalesce {
                self.error_at(
                    &op_token,
                    ErrorCode::E103,
                    format!(
                        "operator ({}) and coalesce expressions (??) cannot be mixed; wrap either by parentheses",
                        op_token.value
                    ),
                );
                break;
            }

            if op.is_comparison() {
                node_left = self.parse_comparison(node_left, op, &op_token);
                prev_op = Some(op);
                op_token = self.current().clone();
                continue;
            }

            let node_right = if op.is_right_associative() {
                self.parse_expression(op.precedence())
            } else {
                self.parse_expression(op.precedence() + 1)
            };

            node_left = self.create(
                NodeKind::Binary {
                    op,
                    left: Box::new(node_left),
                    right: Box::new(node_right),
                },
                op_token.span,
            );

            if negate {
                node_left = self.create(
                    NodeKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(node_left),
                    },
                    not_span,
                );
            }

            prev_op = Some(op);
            op_token = self.current().clone();
        }

        if precedence == 0 {
            node_left = self.parse_conditional(node_left);
        }
        node_left
    }

    /// `a < b < c` becomes `(a < b) && (b < c)`; the shared operand is
    /// reused in both comparisons.
    fn parse_comparison(&mut self, left: Node, op: BinaryOp, op_token: &Token) -> Node {
        let mut left = left;
        let mut op = op;
        let mut span = op_token.span;
        let mut root: Option<Node> = None;

        loop {
            let comparator = self.parse_expression(op.precedence() + 1);
            let cmp = self.create(
                NodeKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(comparator.clone()),
                },
                span,
            );
            root = Some(match root {
                None => cmp,
                Some(prev) => self.create(
                    NodeKind::Binary {
                        op: BinaryOp::And,
                        left: Box::new(prev),
                        right: Box::new(cmp),
                    },
                    span,
                ),
            });

            left = comparator;
            let token = self.current().clone();
            let next_op = BinaryOp::from_str(&token.value);
            match next_op {
                Some(next)
                    if token.is(TokenKind::Operator)
                        && next.is_comparison()
                        && self.err.is_none() =>
                {
                    op = next;
                    span = token.span;
                    self.next();
                }
                _ => break,
            }
        }
        root.unwrap_or_else(|| self.dummy())
    }

    /// Ternary `cond ? a : b` and its `cond ?: b` shortcut.
    fn parse_conditional(&mut self, node: Node) -> Node {
        let mut node = node;
        while self.current().is_value(TokenKind::Operator, &["?"]) && self.err.is_none() {
            self.next();
            let span = self.current().span;

            let (then, otherwise) = if !self.current().is_value(TokenKind::Operator, &[":"]) {
                let then = self.parse_expression(0);
                self.expect(TokenKind::Operator, ":");
                let otherwise = self.parse_expression(0);
                (then, otherwise)
            } else {
                self.next();
                (node.clone(), self.parse_expression(0))
            };

            node = self.create(
                NodeKind::Conditional {
                    cond: Box::new(node),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                },
                span,
            );
        }
        node
    }

    fn parse_primary(&mut self) -> Node {
        let token = self.current().clone();

        if token.is(TokenKind::Operator) {
            let unary_precedence = match token.value.as_str() {
                "not" | "!" => Some(50),
                "-" | "+" => Some(90),
                _ => None,
            };
            if let Some(precedence) = unary_precedence {
                let op = UnaryOp::from_str(&token.value).unwrap();
                self.next();
                let operand = self.parse_expression(precedence);
                let node = self.create(
                    NodeKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    token.span,
                );
                return self.parse_postfix(node);
            }
        }

        if token.is_value(TokenKind::Bracket, &["("]) {
            self.next();
            let node = self.parse_sequence_expression();
            self.expect(TokenKind::Bracket, ")");
            return self.parse_postfix(node);
        }

        // Pointers are only meaningful inside a predicate.
        if self.depth > 0 && token.is_value(TokenKind::Operator, &["#", "."]) {
            if token.value == "#" {
                self.next();
                let mut name = String::new();
                if self.current().is(TokenKind::Identifier) {
                    name = self.current().value.clone();
                    self.next();
                }
                let node = self.create(NodeKind::Pointer { name }, token.span);
                return self.parse_postfix(node);
            }
            // A leading `.` is shorthand for the anonymous pointer.
            let node = self.create(
                NodeKind::Pointer {
                    name: String::new(),
                },
                token.span,
            );
            return self.parse_postfix(node);
        }

        if token.is_value(TokenKind::Operator, &["::"]) {
            self.next();
            let ident = self.expect_kind(TokenKind::Identifier);
            let call = self.parse_call(&ident, Vec::new(), false);
            return self.parse_postfix(call);
        }

        self.parse_secondary()
    }

    fn parse_secondary(&mut self) -> Node {
        let token = self.current().clone();
        let node = match token.kind {
            TokenKind::Identifier => {
                self.next();
                match token.value.as_str() {
                    "true" => return self.create(NodeKind::Bool(true), token.span),
                    "false" => return self.create(NodeKind::Bool(false), token.span),
                    "nil" => return self.create(NodeKind::Nil, token.span),
                    _ => {
                        if self.current().is_value(TokenKind::Bracket, &["("]) {
                            self.parse_call(&token, Vec::new(), true)
                        } else {
                            self.create(NodeKind::Identifier(token.value.clone()), token.span)
                        }
                    }
                }
            }
            TokenKind::Number => {
                self.next();
                return self.parse_number(&token);
            }
            TokenKind::String => {
                self.next();
                self.create(NodeKind::String(token.value.clone()), token.span)
            }
            _ => {
                if token.is_value(TokenKind::Bracket, &["["]) {
                    self.parse_array(&token)
                } else if token.is_value(TokenKind::Bracket, &["{"]) {
                    self.parse_map(&token)
                } else {
                    self.error_at(&token, ErrorCode::E100, format!("unexpected token {}", token));
                    return self.dummy();
                }
            }
        };
        self.parse_postfix(node)
    }

    fn parse_number(&mut self, token: &Token) -> Node {
        let value: String = token.value.chars().filter(|c| *c != '_').collect();
        let lower = value.to_lowercase();

        if let Some(rest) = lower.strip_prefix("0x") {
            return self.integer_node(i64::from_str_radix(rest, 16), token, "hex");
        }
        if lower.contains('.') || lower.contains('e') {
            return match value.parse::<f64>() {
                Ok(f) => self.create(NodeKind::Float(f), token.span),
                Err(e) => {
                    self.error_at(token, ErrorCode::E003, format!("invalid float literal: {}", e));
                    self.dummy()
                }
            };
        }
        if let Some(rest) = lower.strip_prefix("0b") {
            return self.integer_node(i64::from_str_radix(rest, 2), token, "binary");
        }
        if let Some(rest) = lower.strip_prefix("0o") {
            return self.integer_node(i64::from_str_radix(rest, 8), token, "octal");
        }
        self.integer_node(value.parse::<i64>(), token, "integer")
    }

    fn integer_node(
        &mut self,
        parsed: Result<i64, std::num::ParseIntError>,
        token: &Token,
        what: &str,
    ) -> Node {
        match parsed {
            Ok(i) => self.create(NodeKind::Integer(i), token.span),
            Err(e) => {
                self.error_at(
                    token,
                    ErrorCode::E003,
                    format!("invalid {} literal: {}", what, e),
                );
                self.dummy()
            }
        }
    }

    // === Calls and builtins ===

    fn parse_call(&mut self, token: &Token, arguments: Vec<Node>, check_overrides: bool) -> Node {
        let overridden = check_overrides && self.config.functions.contains_key(&token.value);
        let hidden = self.config.disabled.contains(&token.value);

        if let (Some(pattern), false, false) = (higher_order(&token.value), overridden, hidden) {
            return self.parse_higher_order(token, arguments, pattern);
        }

        let arguments = self.parse_arguments(arguments);
        let callee = self.create(NodeKind::Identifier(token.value.clone()), token.span);
        self.create(
            NodeKind::Call {
                callee: Box::new(callee),
                arguments,
            },
            token.span,
        )
    }

    fn parse_higher_order(
        &mut self,
        token: &Token,
        mut arguments: Vec<Node>,
        pattern: &[u8],
    ) -> Node {
        self.expect(TokenKind::Bracket, "(");

        // With the pipe operator the first argument came from the left
        // of the pipe and is not inside the brackets.
        let args = &pattern[arguments.len()..];

        for (i, &arg) in args.iter().enumerate() {
            if arg & ARG_OPTIONAL != 0 {
                if self.current().is_value(TokenKind::Bracket, &[")"]) {
                    break;
                }
            } else if self.current().is_value(TokenKind::Bracket, &[")"]) {
                let token = self.current().clone();
                self.error_at(
                    &token,
                    ErrorCode::E202,
                    format!("expected at least {} arguments", args.len()),
                );
            }

            if i > 0 {
                self.expect(TokenKind::Operator, ",");
            }

            let node = if arg & ARG_PRED != 0 {
                self.parse_predicate()
            } else {
                self.parse_expression(0)
            };
            arguments.push(node);
        }

        if self.current().is_value(TokenKind::Operator, &[","]) {
            self.next();
        }
        self.expect(TokenKind::Bracket, ")");

        self.create(
            NodeKind::Builtin {
                name: token.value.clone(),
                arguments,
                map: None,
                throws: false,
            },
            token.span,
        )
    }

    /// A predicate is a brace-delimited block or a bare expression; a
    /// bare expression may not contain `;`.
    fn parse_predicate(&mut self) -> Node {
        let start = self.current().clone();
        let with_brackets = self.current().is_value(TokenKind::Bracket, &["{"]);
        if with_brackets {
            self.next();
        }

        self.depth += 1;
        let body = if with_brackets {
            self.parse_sequence_expression()
        } else {
            let node = self.parse_expression(0);
            if self.current().is_value(TokenKind::Operator, &[";"]) {
                let token = self.current().clone();
                self.error_at(
                    &token,
                    ErrorCode::E100,
                    "wrap predicate with brackets { and }",
                );
            }
            node
        };
        self.depth -= 1;

        if with_brackets {
            self.expect(TokenKind::Bracket, "}");
        }

        self.create(
            NodeKind::Predicate {
                body: Box::new(body),
            },
            start.span,
        )
    }

    fn parse_arguments(&mut self, arguments: Vec<Node>) -> Vec<Node> {
        // With a piped-in first argument, the comma rule starts past it.
        let offset = arguments.len();
        let mut arguments = arguments;

        self.expect(TokenKind::Bracket, "(");
        while !self.current().is_value(TokenKind::Bracket, &[")"]) && self.err.is_none() {
            if arguments.len() > offset {
                self.expect(TokenKind::Operator, ",");
            }
            if self.current().is_value(TokenKind::Bracket, &[")"]) {
                break;
            }
            arguments.push(self.parse_expression(0));
        }
        self.expect(TokenKind::Bracket, ")");

        arguments
    }

    // === Literals ===

    fn parse_array(&mut self, token: &Token) -> Node {
        let mut elements = Vec::new();

        self.expect(TokenKind::Bracket, "[");
        while !self.current().is_value(TokenKind::Bracket, &["]"]) && self.err.is_none() {
            if !elements.is_empty() {
                self.expect(TokenKind::Operator, ",");
                if self.current().is_value(TokenKind::Bracket, &["]"]) {
                    break;
                }
            }
            elements.push(self.parse_expression(0));
        }
        self.expect(TokenKind::Bracket, "]");

        self.create(NodeKind::Array { elements }, token.span)
    }

    fn parse_map(&mut self, token: &Token) -> Node {
        let mut pairs = Vec::new();

        self.expect(TokenKind::Bracket, "{");
        while !self.current().is_value(TokenKind::Bracket, &["}"]) && self.err.is_none() {
            if !pairs.is_empty() {
                self.expect(TokenKind::Operator, ",");
                if self.current().is_value(TokenKind::Bracket, &["}"]) {
                    break;
                }
                if self.current().is_value(TokenKind::Operator, &[","]) {
                    let tok = self.current().clone();
                    self.error_at(&tok, ErrorCode::E100, format!("unexpected token {}", tok));
                }
            }

            // A key is a number, string, identifier, or a parenthesized
            // expression.
            let current = self.current().clone();
            let key = match current.kind {
                TokenKind::Number | TokenKind::String | TokenKind::Identifier => {
                    self.next();
                    self.create(NodeKind::String(current.value.clone()), current.span)
                }
                _ if current.is_value(TokenKind::Bracket, &["("]) => self.parse_expression(0),
                _ => {
                    self.error_at(
                        &current,
                        ErrorCode::E100,
                        format!(
                            "a map key must be a quoted string, a number, an identifier, or an expression enclosed in parentheses (unexpected token {})",
                            current
                        ),
                    );
                    self.dummy()
                }
            };

            self.expect(TokenKind::Operator, ":");
            let value = self.parse_expression(0);
            let pair = self.create(
                NodeKind::Pair {
                    key: Box::new(key),
                    value: Box::new(value),
                },
                token.span,
            );
            pairs.push(pair);
        }
        self.expect(TokenKind::Bracket, "}");

        self.create(NodeKind::Map { pairs }, token.span)
    }

    // === Postfix forms ===

    fn parse_postfix(&mut self, node: Node) -> Node {
        let mut node = node;

        while (self.current().is(TokenKind::Operator) || self.current().is(TokenKind::Bracket))
            && self.err.is_none()
        {
            let postfix = self.current().clone();
            let optional = postfix.value == "?.";

            if postfix.value == "." || postfix.value == "?." {
                self.next();

                // `?.[` is optional index access.
                if !(optional && self.current().is_value(TokenKind::Bracket, &["["])) {
                    node = self.parse_member(node, optional);
                    continue;
                }
            } else if postfix.value != "[" {
                break;
            }

            node = self.parse_index_or_slice(node, optional);
        }
        node
    }

    fn parse_member(&mut self, node: Node, optional: bool) -> Node {
        let property_token = self.current().clone();
        self.next();

        // Operator keywords like `not` or `matches` are valid property
        // names; anything else after the dot is not.
        let valid_name = property_token.is(TokenKind::Identifier)
            || (property_token.is(TokenKind::Operator)
                && !property_token.value.is_empty()
                && property_token
                    .value
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '$'));
        if !valid_name {
            self.error_at(&property_token, ErrorCode::E100, "expected name");
        }

        let property = self.create(
            NodeKind::String(property_token.value.clone()),
            property_token.span,
        );

        // Re-chaining: unwrap an existing chain so the new member joins
        // it, then wrap the whole thing again below.
        let (base, was_chain) = match node.kind {
            NodeKind::Chain { inner } => (*inner, true),
            _ => (node, false),
        };

        let mut member = self.create(
            NodeKind::Member {
                base: Box::new(base),
                property: Box::new(property),
                optional,
                method: false,
            },
            property_token.span,
        );

        if self.current().is_value(TokenKind::Bracket, &["("]) {
            if let NodeKind::Member { method, .. } = &mut member.kind {
                *method = true;
            }
            let arguments = self.parse_arguments(Vec::new());
            member = self.create(
                NodeKind::Call {
                    callee: Box::new(member),
                    arguments,
                },
                property_token.span,
            );
        }

        if was_chain || optional {
            member = self.create(
                NodeKind::Chain {
                    inner: Box::new(member),
                },
                property_token.span,
            );
        }
        member
    }

    fn parse_index_or_slice(&mut self, node: Node, optional: bool) -> Node {
        let bracket = self.current().clone();
        self.expect(TokenKind::Bracket, "[");

        // `[:to]` or `[:]`
        if self.current().is_value(TokenKind::Operator, &[":"]) {
            self.next();
            let to = if !self.current().is_value(TokenKind::Bracket, &["]"]) {
                Some(Box::new(self.parse_expression(0)))
            } else {
                None
            };
            let slice = self.create(
                NodeKind::Slice {
                    base: Box::new(node),
                    from: None,
                    to,
                },
                bracket.span,
            );
            self.expect(TokenKind::Bracket, "]");
            return slice;
        }

        let from = self.parse_expression(0);

        if self.current().is_value(TokenKind::Operator, &[":"]) {
            self.next();
            let to = if !self.current().is_value(TokenKind::Bracket, &["]"]) {
                Some(Box::new(self.parse_expression(0)))
            } else {
                None
            };
            let slice = self.create(
                NodeKind::Slice {
                    base: Box::new(node),
                    from: Some(Box::new(from)),
                    to,
                },
                bracket.span,
            );
            self.expect(TokenKind::Bracket, "]");
            return slice;
        }

        let (base, was_chain) = match node.kind {
            NodeKind::Chain { inner } => (*inner, true),
            _ => (node, false),
        };
        let mut member = self.create(
            NodeKind::Member {
                base: Box::new(base),
                property: Box::new(from),
                optional,
                method: false,
            },
            bracket.span,
        );
        if was_chain || optional {
            member = self.create(
                NodeKind::Chain {
                    inner: Box::new(member),
                },
                bracket.span,
            );
        }
        self.expect(TokenKind::Bracket, "]");
        member
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(src: &str) -> Node {
        parse(&Source::unnamed(src), &Config::new()).unwrap()
    }

    fn parse_err(src: &str) -> ParseError {
        parse(&Source::unnamed(src), &Config::new()).unwrap_err()
    }

    fn rendered(src: &str) -> String {
        parse_str(src).to_string()
    }

    #[test]
    fn precedence() {
        assert_eq!(rendered("1 + 2 * 3"), "(1 + (2 * 3))");
        assert_eq!(rendered("(1 + 2) * 3"), "((1 + 2) * 3)");
        assert_eq!(rendered("1 * 2 + 3"), "((1 * 2) + 3)");
        assert_eq!(rendered("a or b and c"), "(a || (b && c))");
        assert_eq!(rendered("1 + 2 == 3"), "((1 + 2) == 3)");
    }

    #[test]
    fn exponent_is_right_associative() {
        assert_eq!(rendered("2 ** 3 ** 2"), "(2 ** (3 ** 2))");
        assert_eq!(rendered("-2 ** 2"), "-(2 ** 2)");
    }

    #[test]
    fn unary_not() {
        assert_eq!(rendered("not a and b"), "(not a && b)");
        assert_eq!(rendered("!a"), "not a");
    }

    #[test]
    fn chained_comparison() {
        assert_eq!(rendered("a < b < c"), "((a < b) && (b < c))");
        assert_eq!(rendered("1 <= x > y"), "((1 <= x) && (x > y))");
        // plain comparisons stay single
        assert_eq!(rendered("a < b"), "(a < b)");
    }

    #[test]
    fn negated_membership() {
        assert_eq!(rendered("a not in b"), "not (a in b)");
        assert_eq!(rendered("s not matches p"), "not (s matches p)");
    }

    #[test]
    fn range_operator() {
        assert_eq!(rendered("1..5"), "(1 .. 5)");
        assert_eq!(rendered("x in 1..5"), "(x in (1 .. 5))");
    }

    #[test]
    fn pipe_rewrites_to_call() {
        assert_eq!(rendered("x | foo()"), "foo(x)");
        assert_eq!(rendered("x | foo(1)"), "foo(x, 1)");
        assert_eq!(rendered("users | filter(# > 1) | map(#)"), "map(filter(users, (# > 1)), #)");
    }

    #[test]
    fn conditional_forms() {
        assert_eq!(rendered("a ? b : c"), "(a ? b : c)");
        assert_eq!(rendered("a ?: c"), "(a ? a : c)");
        assert_eq!(rendered("if a { b } else { c }"), "(a ? b : c)");
    }

    #[test]
    fn let_declaration() {
        assert_eq!(rendered("let x = 10; x * x"), "let x = 10; (x * x)");
    }

    #[test]
    fn sequences() {
        let node = parse_str("1; 2; 3");
        assert!(matches!(node.kind, NodeKind::Sequence { ref nodes } if nodes.len() == 3));
    }

    #[test]
    fn member_and_index() {
        assert_eq!(rendered("user.name"), "user.name");
        assert_eq!(rendered("user[\"name\"]"), "user[\"name\"]");
        assert_eq!(rendered("items[0]"), "items[0]");
        assert_eq!(rendered("items[1:3]"), "items[1:3]");
        assert_eq!(rendered("items[:3]"), "items[:3]");
        assert_eq!(rendered("items[1:]"), "items[1:]");
        assert_eq!(rendered("items[:]"), "items[:]");
    }

    #[test]
    fn optional_chain_is_wrapped() {
        let node = parse_str("a?.b.c");
        assert!(matches!(node.kind, NodeKind::Chain { .. }));
        // non-optional chains are not wrapped
        let node = parse_str("a.b.c");
        assert!(matches!(node.kind, NodeKind::Member { .. }));
    }

    #[test]
    fn optional_index_chain() {
        let node = parse_str("a?.[0]");
        assert!(matches!(node.kind, NodeKind::Chain { .. }));
    }

    #[test]
    fn method_call_flag() {
        let node = parse_str("obj.method(1)");
        match node.kind {
            NodeKind::Call { callee, .. } => match callee.kind {
                NodeKind::Member { method, .. } => assert!(method),
                other => panic!("expected member callee, got {:?}", other),
            },
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn higher_order_builtins() {
        let node = parse_str("filter(users, .age > 18)");
        match &node.kind {
            NodeKind::Builtin {
                name, arguments, ..
            } => {
                assert_eq!(name, "filter");
                assert_eq!(arguments.len(), 2);
                assert!(matches!(arguments[1].kind, NodeKind::Predicate { .. }));
            }
            other => panic!("expected builtin, got {:?}", other),
        }
    }

    #[test]
    fn optional_predicate_may_be_omitted() {
        let node = parse_str("count(items)");
        match &node.kind {
            NodeKind::Builtin { arguments, .. } => assert_eq!(arguments.len(), 1),
            other => panic!("expected builtin, got {:?}", other),
        }
        let node = parse_str("reduce(items, #acc + #, 0)");
        match &node.kind {
            NodeKind::Builtin { arguments, .. } => assert_eq!(arguments.len(), 3),
            other => panic!("expected builtin, got {:?}", other),
        }
    }

    #[test]
    fn missing_required_predicate() {
        let err = parse_err("filter(users)");
        assert_eq!(err.code, ErrorCode::E202);
    }

    #[test]
    fn predicate_block_allows_sequences() {
        let node = parse_str("filter(xs, { let y = # * 2; y > 4 })");
        assert!(matches!(node.kind, NodeKind::Builtin { .. }));
    }

    #[test]
    fn bare_predicate_rejects_semicolons() {
        let err = parse_err("filter(xs, # > 1; # < 4)");
        assert!(err.message.contains("wrap predicate with brackets"));
    }

    #[test]
    fn pointers_need_predicate_scope() {
        // `#` outside any predicate is not a pointer
        assert!(parse(&Source::unnamed("# + 1"), &Config::new()).is_err());
    }

    #[test]
    fn pointer_variants() {
        assert_eq!(rendered("map(xs, #index)"), "map(xs, #index)");
        assert_eq!(rendered("reduce(xs, #acc + #)"), "reduce(xs, (#acc + #))");
        assert_eq!(rendered("filter(xs, .age > 1)"), "filter(xs, (#.age > 1))");
    }

    #[test]
    fn coalesce_mixing_is_rejected() {
        let err = parse_err("a ?? b + c");
        assert_eq!(err.code, ErrorCode::E103);
        // parenthesized is fine
        assert_eq!(rendered("a ?? (b + c)"), "(a ?? (b + c))");
        assert_eq!(rendered("a ?? b ?? c"), "((a ?? b) ?? c)");
    }

    #[test]
    fn arrays_and_maps_with_trailing_commas() {
        assert_eq!(rendered("[1, 2, 3,]"), "[1, 2, 3]");
        assert_eq!(rendered("{a: 1, \"b\": 2,}"), "{a: 1, b: 2}");
        assert_eq!(rendered("{(1 + 2): 3}"), "{(1 + 2): 3}");
        assert_eq!(rendered("{}"), "{}");
        assert_eq!(rendered("[]"), "[]");
    }

    #[test]
    fn invalid_map_key() {
        let err = parse_err("{[1]: 2}");
        assert!(err.message.contains("map key"));
    }

    #[test]
    fn global_namespace_call() {
        assert_eq!(rendered("::len([1])"), "len([1])");
    }

    #[test]
    fn node_limit() {
        let mut config = Config::new();
        config.max_nodes = 10;
        let err = parse(&Source::unnamed("1 + 2 + 3 + 4 + 5 + 6 + 7 + 8"), &config).unwrap_err();
        assert_eq!(err.code, ErrorCode::E104);
    }

    #[test]
    fn unexpected_token_errors() {
        assert!(parse_err("1 +").code == ErrorCode::E102 || parse_err("1 +").code == ErrorCode::E100);
        assert_eq!(parse_err("(1").code, ErrorCode::E100);
        assert_eq!(parse_err("1 2").code, ErrorCode::E100);
    }

    #[test]
    fn keyword_property_names() {
        assert_eq!(rendered("data.in"), "data.in");
        assert_eq!(rendered("data.matches"), "data.matches");
    }

    #[test]
    fn overridden_builtin_parses_as_call() {
        use sift_core::Kind;
        let config = Config::new().with_function(
            sift_vm::Function::new("filter").signature(&[Kind::Array], Kind::Array),
        );
        let node = parse(&Source::unnamed("filter([1, 2])"), &config).unwrap();
        assert!(matches!(node.kind, NodeKind::Call { .. }));
    }

    #[test]
    fn disabled_builtin_parses_as_call() {
        let config = Config::new().disable("map");
        let node = parse(&Source::unnamed("map(x)"), &config).unwrap();
        assert!(matches!(node.kind, NodeKind::Call { .. }));
    }
}
