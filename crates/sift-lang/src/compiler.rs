//! Bytecode compiler.
//!
//! A pure function over the already-checked AST. Instructions are
//! emitted into flat parallel vectors (opcode, argument, span); forward
//! jumps are emitted with a placeholder argument and back-patched to
//! the offset between the jump site and the landing site.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;

use sift_core::{ErrorCode, Kind, Span};
use sift_source::Source;
use sift_vm::{dispatch, Constant, FieldPath, Function, Opcode, Program, Value};
use tracing::debug;

use crate::ast::{BinaryOp, Node, NodeKind, UnaryOp};
use crate::conf::{Config, Expect};
use crate::error::CompileError;

const PLACEHOLDER: i64 = 12345;

/// Compile a checked tree into a program.
pub fn compile(
    root: &Node,
    config: &Config,
    source: Arc<Source>,
) -> Result<Program, CompileError> {
    let mut compiler = Compiler {
        config,
        opcodes: Vec::new(),
        arguments: Vec::new(),
        locations: Vec::new(),
        constants: Vec::new(),
        const_index: HashMap::new(),
        functions: Vec::new(),
        function_index: HashMap::new(),
        variables: 0,
        scopes: Vec::new(),
        chains: Vec::new(),
        spans: SmallVec::new(),
        profile_spans: Vec::new(),
    };

    compiler.compile(root)?;

    match config.expect {
        Expect::Int | Expect::Int64 => compiler.emit(Opcode::Cast, Kind::Int.code()),
        Expect::Float64 => compiler.emit(Opcode::Cast, Kind::Float.code()),
        _ => 0,
    };

    if config.optimize {
        compiler.thread_jumps();
    }

    debug!(
        instructions = compiler.opcodes.len(),
        constants = compiler.constants.len(),
        functions = compiler.functions.len(),
        "compiled program"
    );

    Ok(Program::new(
        source,
        compiler.opcodes,
        compiler.arguments,
        compiler.locations,
        compiler.constants,
        compiler.functions,
        compiler.variables,
        config.memory_budget,
        compiler.profile_spans,
    ))
}

/// Hashable identity of an internable constant.
///
/// Scalars intern by value (floats by bit pattern); field paths and
/// regexes by a stable string key. Structured values (arrays, maps)
/// are not internable and are appended without deduplication.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum ConstKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    Keyed(String),
}

struct Compiler<'a> {
    config: &'a Config,
    opcodes: Vec<Opcode>,
    arguments: Vec<i64>,
    locations: Vec<Span>,
    constants: Vec<Constant>,
    const_index: HashMap<ConstKey, usize>,
    functions: Vec<Arc<Function>>,
    function_index: HashMap<String, usize>,
    variables: usize,
    scopes: Vec<(String, usize)>,
    /// Per-chain lists of jump sites waiting for the landing site.
    chains: Vec<Vec<usize>>,
    /// Span stack; emit attributes instructions to the innermost node.
    spans: SmallVec<[Span; 16]>,
    profile_spans: Vec<Span>,
}

impl<'a> Compiler<'a> {
    fn fail(&self, message: impl Into<String>) -> CompileError {
        let span = self.spans.last().copied().unwrap_or(Span::DUMMY);
        CompileError::new(ErrorCode::E300, span, message)
    }

    /// Append an instruction; returns its index.
    fn emit(&mut self, op: Opcode, arg: i64) -> usize {
        let index = self.opcodes.len();
        self.opcodes.push(op);
        self.arguments.push(arg);
        self.locations
            .push(self.spans.last().copied().unwrap_or(Span::DUMMY));
        index
    }

    fn emit0(&mut self, op: Opcode) -> usize {
        self.emit(op, 0)
    }

    /// Patch a forward jump to land after the last emitted instruction.
    fn patch_jump(&mut self, site: usize) {
        self.arguments[site] = (self.opcodes.len() - site - 1) as i64;
    }

    /// Backward distance from the next instruction to `to`.
    fn backward_distance(&self, to: usize) -> i64 {
        (self.opcodes.len() + 1 - to) as i64
    }

    // === Constant and function pools ===

    fn add_constant(&mut self, value: Value) -> i64 {
        let key = match &value {
            Value::Nil => Some(ConstKey::Keyed("nil".to_string())),
            Value::Bool(b) => Some(ConstKey::Bool(*b)),
            Value::Int(i) => Some(ConstKey::Int(*i)),
            Value::Float(f) => Some(ConstKey::Float(f.to_bits())),
            Value::String(s) => Some(ConstKey::Str(s.to_string())),
            _ => None,
        };
        if let Some(key) = &key {
            if let Some(&index) = self.const_index.get(key) {
                return index as i64;
            }
        }
        let index = self.constants.len();
        self.constants.push(Constant::Value(value));
        if let Some(key) = key {
            self.const_index.insert(key, index);
        }
        index as i64
    }

    fn add_field(&mut self, field: FieldPath) -> i64 {
        let key = ConstKey::Keyed(format!("field:{}", field.display()));
        if let Some(&index) = self.const_index.get(&key) {
            return index as i64;
        }
        let index = self.constants.len();
        self.constants.push(Constant::Field(field));
        self.const_index.insert(key, index);
        index as i64
    }

    fn add_regex(&mut self, pattern: &str) -> Result<i64, CompileError> {
        let key = ConstKey::Keyed(format!("regex:{}", pattern));
        if let Some(&index) = self.const_index.get(&key) {
            return Ok(index as i64);
        }
        let re = regex::Regex::new(pattern)
            .map_err(|e| self.fail(format!("invalid regexp: {}", e)))?;
        let index = self.constants.len();
        self.constants.push(Constant::Regex(re));
        self.const_index.insert(key, index);
        Ok(index as i64)
    }

    /// Register a host function once; repeats return the existing index.
    fn add_function(&mut self, descriptor: &Arc<Function>) -> i64 {
        if let Some(&index) = self.function_index.get(descriptor.name()) {
            return index as i64;
        }
        let index = self.functions.len();
        self.functions.push(descriptor.clone());
        self.function_index
            .insert(descriptor.name().to_string(), index);
        index as i64
    }

    // === Variable scopes ===

    fn add_variable(&mut self, name: &str) -> i64 {
        let index = self.variables;
        self.variables += 1;
        self.scopes.push((name.to_string(), index));
        index as i64
    }

    fn lookup_variable(&self, name: &str) -> Option<i64> {
        self.scopes
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, i)| *i as i64)
    }

    // === Node compilation ===

    fn compile(&mut self, node: &Node) -> Result<(), CompileError> {
        self.spans.push(node.span);

        let profile = if self.config.profile {
            let index = self.profile_spans.len() as i64;
            self.profile_spans.push(node.span);
            self.emit(Opcode::ProfileStart, index);
            Some(index)
        } else {
            None
        };

        let result = self.compile_inner(node);

        if let Some(index) = profile {
            self.emit(Opcode::ProfileEnd, index);
        }
        self.spans.pop();
        result
    }

    fn compile_inner(&mut self, node: &Node) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Nil => {
                self.emit0(Opcode::Nil);
            }
            NodeKind::Bool(true) => {
                self.emit0(Opcode::True);
            }
            NodeKind::Bool(false) => {
                self.emit0(Opcode::False);
            }
            NodeKind::Integer(i) => {
                self.emit(Opcode::Int, *i);
            }
            NodeKind::Float(f) => {
                let index = self.add_constant(Value::Float(*f));
                self.emit(Opcode::Push, index);
            }
            NodeKind::String(s) => {
                let index = self.add_constant(Value::string(s.as_str()));
                self.emit(Opcode::Push, index);
            }
            NodeKind::Constant(value) => {
                if value.is_nil() {
                    self.emit0(Opcode::Nil);
                } else {
                    let index = self.add_constant(value.clone());
                    self.emit(Opcode::Push, index);
                }
            }
            NodeKind::Identifier(name) => self.compile_identifier(node, name),
            NodeKind::Unary { op, operand } => {
                self.compile(operand)?;
                match op {
                    UnaryOp::Not => {
                        self.emit0(Opcode::Not);
                    }
                    UnaryOp::Neg => {
                        self.emit0(Opcode::Negate);
                    }
                    UnaryOp::Pos => {}
                }
            }
            NodeKind::Binary { op, left, right } => {
                self.compile_binary(*op, left, right)?;
            }
            NodeKind::Chain { .. } => self.compile_chain(node, false)?,
            NodeKind::Member { .. } => self.compile_member(node)?,
            NodeKind::Slice { base, from, to } => {
                self.compile(base)?;
                match to {
                    Some(to) => self.compile(to)?,
                    None => {
                        self.emit0(Opcode::Len);
                    }
                }
                match from {
                    Some(from) => self.compile(from)?,
                    None => {
                        self.emit(Opcode::Int, 0);
                    }
                }
                self.emit0(Opcode::Slice);
            }
            NodeKind::Call { .. } => self.compile_call(node)?,
            NodeKind::Builtin { .. } => self.compile_builtin(node)?,
            NodeKind::Predicate { body } => self.compile(body)?,
            NodeKind::Pointer { name } => match name.as_str() {
                "" => {
                    self.emit0(Opcode::Pointer);
                }
                "index" => {
                    self.emit0(Opcode::GetIndex);
                }
                "acc" => {
                    self.emit0(Opcode::GetAcc);
                }
                other => return Err(self.fail(format!("unknown pointer #{}", other))),
            },
            NodeKind::VariableDeclarator { name, value, body } => {
                self.compile(value)?;
                let index = self.add_variable(name);
                self.emit(Opcode::Store, index);
                self.compile(body)?;
                self.scopes.pop();
            }
            NodeKind::Sequence { nodes } => {
                for (i, child) in nodes.iter().enumerate() {
                    self.compile(child)?;
                    if i + 1 < nodes.len() {
                        self.emit0(Opcode::Pop);
                    }
                }
            }
            NodeKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                self.compile(cond)?;
                let to_else = self.emit(Opcode::JumpIfFalse, PLACEHOLDER);
                self.emit0(Opcode::Pop);
                self.compile(then)?;
                let to_end = self.emit(Opcode::Jump, PLACEHOLDER);
                self.patch_jump(to_else);
                self.emit0(Opcode::Pop);
                self.compile(otherwise)?;
                self.patch_jump(to_end);
            }
            NodeKind::Array { elements } => {
                for element in elements {
                    self.compile(element)?;
                }
                self.emit(Opcode::Int, elements.len() as i64);
                self.emit0(Opcode::Array);
            }
            NodeKind::Map { pairs } => {
                for pair in pairs {
                    self.compile(pair)?;
                }
                self.emit(Opcode::Int, pairs.len() as i64);
                self.emit0(Opcode::Map);
            }
            NodeKind::Pair { key, value } => {
                self.compile(key)?;
                self.compile(value)?;
            }
        }
        Ok(())
    }

    fn compile_identifier(&mut self, node: &Node, name: &str) {
        if let Some(index) = self.lookup_variable(name) {
            self.emit(Opcode::LoadVar, index);
            return;
        }
        if name == "$env" {
            self.emit0(Opcode::LoadEnv);
            return;
        }
        if self.config.env.is_record() && node.nature.field_index.len() == 1 {
            let index = self.add_field(FieldPath {
                index: node.nature.field_index.clone(),
                path: vec![name.to_string()],
            });
            self.emit(Opcode::LoadField, index);
            return;
        }
        if !self.config.env.is_record() && self.config.env.nature().get(name).is_some() {
            let index = self.add_constant(Value::string(name));
            self.emit(Opcode::LoadFast, index);
            return;
        }
        if let Some(descriptor) = self.config.function(name) {
            let descriptor = descriptor.clone();
            let index = self.add_function(&descriptor);
            self.emit(Opcode::LoadFunc, index);
            return;
        }
        let index = self.add_constant(Value::string(name));
        if self.config.env.is_record() {
            self.emit(Opcode::LoadConst, index);
        } else {
            self.emit(Opcode::LoadFast, index);
        }
    }

    fn compile_binary(
        &mut self,
        op: BinaryOp,
        left: &Node,
        right: &Node,
    ) -> Result<(), CompileError> {
        match op {
            BinaryOp::Eq => {
                self.compile_equal(left, right)?;
            }
            BinaryOp::Ne => {
                self.compile_equal(left, right)?;
                self.emit0(Opcode::Not);
            }
            BinaryOp::Or => {
                self.compile(left)?;
                let end = self.emit(Opcode::JumpIfTrue, PLACEHOLDER);
                self.emit0(Opcode::Pop);
                self.compile(right)?;
                self.patch_jump(end);
            }
            BinaryOp::And => {
                self.compile(left)?;
                let end = self.emit(Opcode::JumpIfFalse, PLACEHOLDER);
                self.emit0(Opcode::Pop);
                self.compile(right)?;
                self.patch_jump(end);
            }
            BinaryOp::Coalesce => {
                // A chain on the left omits its own nil push; this
                // jump covers it.
                match &left.kind {
                    NodeKind::Chain { .. } => self.compile_chain(left, true)?,
                    _ => self.compile(left)?,
                }
                let end = self.emit(Opcode::JumpIfNotNil, PLACEHOLDER);
                self.emit0(Opcode::Pop);
                self.compile(right)?;
                self.patch_jump(end);
            }
            BinaryOp::Matches => {
                if let NodeKind::String(pattern) = &right.kind {
                    let index = self.add_regex(pattern)?;
                    self.compile(left)?;
                    self.emit(Opcode::MatchesConst, index);
                } else {
                    self.compile(left)?;
                    self.compile(right)?;
                    self.emit0(Opcode::Matches);
                }
            }
            BinaryOp::Pipe => {
                return Err(self.fail("pipe operator survived parsing"));
            }
            _ => {
                self.compile(left)?;
                self.compile(right)?;
                let opcode = match op {
                    BinaryOp::Lt => Opcode::Less,
                    BinaryOp::Gt => Opcode::More,
                    BinaryOp::Le => Opcode::LessOrEqual,
                    BinaryOp::Ge => Opcode::MoreOrEqual,
                    BinaryOp::Add => Opcode::Add,
                    BinaryOp::Sub => Opcode::Subtract,
                    BinaryOp::Mul => Opcode::Multiply,
                    BinaryOp::Div => Opcode::Divide,
                    BinaryOp::Mod => Opcode::Modulo,
                    BinaryOp::Exp => Opcode::Exponent,
                    BinaryOp::In => Opcode::In,
                    BinaryOp::Contains => Opcode::Contains,
                    BinaryOp::StartsWith => Opcode::StartsWith,
                    BinaryOp::EndsWith => Opcode::EndsWith,
                    BinaryOp::Range => Opcode::Range,
                    _ => unreachable!(),
                };
                self.emit0(opcode);
            }
        }
        Ok(())
    }

    fn compile_equal(&mut self, left: &Node, right: &Node) -> Result<(), CompileError> {
        self.compile(left)?;
        self.compile(right)?;
        let l = left.nature.kind;
        let r = right.nature.kind;
        if l == Kind::Int && r == Kind::Int {
            self.emit0(Opcode::EqualInt);
        } else if l == Kind::String && r == Kind::String {
            self.emit0(Opcode::EqualString);
        } else {
            self.emit0(Opcode::Equal);
        }
        Ok(())
    }

    /// A chain reserves a list of placeholders; every `?.` inside
    /// records its jump-if-nil site; at the end all placeholders are
    /// patched to a common landing site. When the chain is the
    /// immediate operand of `??`, the terminal nil push is omitted.
    fn compile_chain(&mut self, node: &Node, in_coalesce: bool) -> Result<(), CompileError> {
        let NodeKind::Chain { inner } = &node.kind else {
            return Err(self.fail("not a chain"));
        };
        self.chains.push(Vec::new());
        self.compile(inner)?;
        let sites = self.chains.pop().unwrap_or_default();
        for site in sites {
            self.patch_jump(site);
        }

        if !in_coalesce {
            let done = self.emit(Opcode::JumpIfNotNil, PLACEHOLDER);
            self.emit0(Opcode::Pop);
            self.emit0(Opcode::Nil);
            self.patch_jump(done);
        }
        Ok(())
    }

    fn compile_member(&mut self, node: &Node) -> Result<(), CompileError> {
        let NodeKind::Member {
            base,
            property,
            optional,
            ..
        } = &node.kind
        else {
            return Err(self.fail("not a member"));
        };

        // Consecutive static accesses on a record environment fold into
        // a single fetch carrying the whole index path. `?.` anywhere in
        // the chain prevents the fold.
        if !*optional && !node.nature.field_index.is_empty() {
            if let Some(path) = static_path(node) {
                if path.len() == node.nature.field_index.len() {
                    let index = self.add_field(FieldPath {
                        index: node.nature.field_index.clone(),
                        path,
                    });
                    self.emit(Opcode::LoadField, index);
                    return Ok(());
                }
            }
        }

        self.compile(base)?;

        if *optional && !self.chains.is_empty() {
            let site = self.emit(Opcode::JumpIfNil, PLACEHOLDER);
            if let Some(chain) = self.chains.last_mut() {
                chain.push(site);
            }
        }

        self.compile(property)?;
        self.emit0(Opcode::Fetch);
        Ok(())
    }

    fn compile_call(&mut self, node: &Node) -> Result<(), CompileError> {
        let NodeKind::Call { callee, arguments } = &node.kind else {
            return Err(self.fail("not a call"));
        };

        // Registered functions are called through the function table.
        if let NodeKind::Identifier(name) = &callee.kind {
            if self.lookup_variable(name).is_none() {
                if let Some(descriptor) = self.config.function(name) {
                    let descriptor = descriptor.clone();
                    for (i, arg) in arguments.iter().enumerate() {
                        self.compile(arg)?;
                        if arg.nature.is_open()
                            && descriptor.wants_deref(i, arg.nature.kind)
                        {
                            self.emit0(Opcode::Deref);
                        }
                    }
                    self.emit_function(&descriptor, arguments.len());
                    return Ok(());
                }
            }
        }

        for arg in arguments {
            self.compile(arg)?;
        }
        self.compile(callee)?;

        // Monomorphic signatures dispatch through the typed table; the
        // any-variadic shape has a dedicated fast path.
        if let Some(func) = &callee.nature.func {
            let params: Vec<Kind> = func.params.iter().map(|p| p.kind).collect();
            if !func.variadic && func.params.len() == arguments.len() {
                if let Some(index) = dispatch::index_of(&params, func.result.kind) {
                    self.emit(Opcode::CallTyped, index as i64);
                    return Ok(());
                }
            }
            if func.variadic && params == [Kind::Any] && func.result.kind == Kind::Any {
                self.emit(Opcode::CallFast, arguments.len() as i64);
                return Ok(());
            }
        }

        self.emit(Opcode::Call, arguments.len() as i64);
        Ok(())
    }

    fn emit_function(&mut self, descriptor: &Arc<Function>, argc: usize) {
        let index = self.add_function(descriptor);
        if argc == 1 && descriptor.has_fast() {
            self.emit(Opcode::CallBuiltin1, index);
            return;
        }
        if descriptor.has_safe() {
            self.emit(Opcode::LoadFunc, index);
            self.emit(Opcode::CallSafe, argc as i64);
            return;
        }
        match argc {
            0 => self.emit(Opcode::Call0, index),
            1 => self.emit(Opcode::Call1, index),
            2 => self.emit(Opcode::Call2, index),
            3 => self.emit(Opcode::Call3, index),
            _ => {
                self.emit(Opcode::LoadFunc, index);
                self.emit(Opcode::CallN, argc as i64)
            }
        };
    }

    // === Higher-order lowering ===

    fn compile_builtin(&mut self, node: &Node) -> Result<(), CompileError> {
        let NodeKind::Builtin {
            name,
            arguments,
            map,
            throws,
        } = &node.kind
        else {
            return Err(self.fail("not a builtin"));
        };

        match name.as_str() {
            "all" | "none" | "any" => {
                let on_true = name == "any";
                self.compile(&arguments[0])?;
                self.emit0(Opcode::Begin);
                let mut out = 0;
                self.emit_loop(|c| {
                    c.compile(&arguments[1])?;
                    if name == "none" {
                        c.emit0(Opcode::Not);
                    }
                    out = c.emit(
                        if on_true {
                            Opcode::JumpIfTrue
                        } else {
                            Opcode::JumpIfFalse
                        },
                        PLACEHOLDER,
                    );
                    c.emit0(Opcode::Pop);
                    Ok(())
                })?;
                self.emit0(if on_true { Opcode::False } else { Opcode::True });
                self.patch_jump(out);
                self.emit0(Opcode::End);
            }
            "one" => {
                self.compile(&arguments[0])?;
                self.emit0(Opcode::Begin);
                self.emit_loop(|c| {
                    c.compile(&arguments[1])?;
                    c.emit_cond(|c| {
                        c.emit0(Opcode::IncrementCount);
                        Ok(())
                    })
                })?;
                self.emit0(Opcode::GetCount);
                self.emit(Opcode::Int, 1);
                self.emit0(Opcode::EqualInt);
                self.emit0(Opcode::End);
            }
            "filter" => {
                self.compile(&arguments[0])?;
                self.emit0(Opcode::Begin);
                self.emit_loop(|c| {
                    c.compile(&arguments[1])?;
                    c.emit_cond(|c| {
                        c.emit0(Opcode::IncrementCount);
                        match map {
                            Some(projection) => c.compile(projection)?,
                            None => {
                                c.emit0(Opcode::Pointer);
                            }
                        }
                        Ok(())
                    })
                })?;
                self.emit0(Opcode::GetCount);
                self.emit0(Opcode::End);
                self.emit0(Opcode::Array);
            }
            "map" => {
                self.compile(&arguments[0])?;
                self.emit0(Opcode::Begin);
                self.emit_loop(|c| c.compile(&arguments[1]))?;
                self.emit0(Opcode::GetLen);
                self.emit0(Opcode::End);
                self.emit0(Opcode::Array);
            }
            "count" => {
                self.compile(&arguments[0])?;
                self.emit0(Opcode::Begin);
                self.emit_loop(|c| {
                    if arguments.len() == 2 {
                        c.compile(&arguments[1])?;
                    } else {
                        c.emit0(Opcode::Pointer);
                    }
                    c.emit_cond(|c| {
                        c.emit0(Opcode::IncrementCount);
                        Ok(())
                    })
                })?;
                self.emit0(Opcode::GetCount);
                self.emit0(Opcode::End);
            }
            "sum" => {
                self.compile(&arguments[0])?;
                self.emit0(Opcode::Begin);
                self.emit(Opcode::Int, 0);
                self.emit0(Opcode::SetAcc);
                self.emit_loop(|c| {
                    if arguments.len() == 2 {
                        c.compile(&arguments[1])?;
                    } else {
                        c.emit0(Opcode::Pointer);
                    }
                    c.emit0(Opcode::GetAcc);
                    c.emit0(Opcode::Add);
                    c.emit0(Opcode::SetAcc);
                    Ok(())
                })?;
                self.emit0(Opcode::GetAcc);
                self.emit0(Opcode::End);
            }
            "find" | "findIndex" | "findLast" | "findLastIndex" => {
                let backwards = name.starts_with("findLast");
                let wants_index = name.ends_with("Index");
                self.compile(&arguments[0])?;
                self.emit0(Opcode::Begin);
                let mut found = 0;
                let body = |c: &mut Self| {
                    c.compile(&arguments[1])?;
                    let miss = c.emit(Opcode::JumpIfFalse, PLACEHOLDER);
                    c.emit0(Opcode::Pop);
                    if wants_index {
                        c.emit0(Opcode::GetIndex);
                    } else {
                        match map {
                            Some(projection) => c.compile(projection)?,
                            None => {
                                c.emit0(Opcode::Pointer);
                            }
                        }
                    }
                    found = c.emit(Opcode::Jump, PLACEHOLDER);
                    c.patch_jump(miss);
                    c.emit0(Opcode::Pop);
                    Ok(())
                };
                if backwards {
                    self.emit_loop_backwards(body)?;
                } else {
                    self.emit_loop(body)?;
                }
                if *throws && !wants_index {
                    let index = self.add_constant(Value::string("no matching element"));
                    self.emit(Opcode::Push, index);
                    self.emit0(Opcode::Throw);
                } else {
                    self.emit0(Opcode::Nil);
                }
                self.patch_jump(found);
                self.emit0(Opcode::End);
            }
            "groupBy" => {
                self.compile(&arguments[0])?;
                self.emit0(Opcode::Begin);
                self.emit(Opcode::Create, 1);
                self.emit_loop(|c| {
                    c.compile(&arguments[1])?;
                    c.emit0(Opcode::GroupBy);
                    Ok(())
                })?;
                self.emit0(Opcode::GetAcc);
                self.emit0(Opcode::End);
            }
            "sortBy" => {
                self.compile(&arguments[0])?;
                self.emit0(Opcode::Begin);
                if arguments.len() == 3 {
                    self.compile(&arguments[2])?;
                } else {
                    let index = self.add_constant(Value::string("asc"));
                    self.emit(Opcode::Push, index);
                }
                self.emit(Opcode::Create, 2);
                self.emit_loop(|c| {
                    c.compile(&arguments[1])?;
                    c.emit0(Opcode::SortBy);
                    Ok(())
                })?;
                self.emit0(Opcode::Sort);
                self.emit0(Opcode::End);
            }
            "reduce" => {
                self.compile(&arguments[0])?;
                self.emit0(Opcode::Begin);
                if arguments.len() == 3 {
                    self.compile(&arguments[2])?;
                    self.emit0(Opcode::SetAcc);
                } else {
                    // Without a seed, the first element initializes the
                    // accumulator.
                    self.emit0(Opcode::Pointer);
                    self.emit0(Opcode::IncrementIndex);
                    self.emit0(Opcode::SetAcc);
                }
                self.emit_loop(|c| {
                    c.compile(&arguments[1])?;
                    c.emit0(Opcode::SetAcc);
                    Ok(())
                })?;
                self.emit0(Opcode::GetAcc);
                self.emit0(Opcode::End);
            }
            other => return Err(self.fail(format!("unknown builtin {}", other))),
        }
        Ok(())
    }

    /// Ascending loop template: `JumpIfEnd`, body, `IncrementIndex`,
    /// `JumpBackward`.
    fn emit_loop(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        let begin = self.opcodes.len();
        let end = self.emit(Opcode::JumpIfEnd, PLACEHOLDER);

        body(self)?;

        self.emit0(Opcode::IncrementIndex);
        let distance = self.backward_distance(begin);
        self.emit(Opcode::JumpBackward, distance);
        self.patch_jump(end);
        Ok(())
    }

    /// Descending loop: the index starts at the last element and the
    /// frame reports exhaustion when it runs below zero.
    fn emit_loop_backwards(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        self.emit0(Opcode::GetLen);
        self.emit(Opcode::Int, 1);
        self.emit0(Opcode::Subtract);
        self.emit0(Opcode::SetIndex);
        let begin = self.opcodes.len();
        let end = self.emit(Opcode::JumpIfEnd, PLACEHOLDER);

        body(self)?;

        self.emit0(Opcode::DecrementIndex);
        let distance = self.backward_distance(begin);
        self.emit(Opcode::JumpBackward, distance);
        self.patch_jump(end);
        Ok(())
    }

    /// Conditional step: run the body when the stack top is true; the
    /// condition is popped on both paths.
    fn emit_cond(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        let miss = self.emit(Opcode::JumpIfFalse, PLACEHOLDER);
        self.emit0(Opcode::Pop);

        body(self)?;

        let done = self.emit(Opcode::Jump, PLACEHOLDER);
        self.patch_jump(miss);
        self.emit0(Opcode::Pop);
        self.patch_jump(done);
        Ok(())
    }

    /// Collapse chains of identical conditional jumps so one test jumps
    /// straight to the final landing site.
    fn thread_jumps(&mut self) {
        for i in 0..self.opcodes.len() {
            let op = self.opcodes[i];
            if matches!(
                op,
                Opcode::JumpIfTrue | Opcode::JumpIfFalse | Opcode::JumpIfNil | Opcode::JumpIfNotNil
            ) {
                let mut target = i + self.arguments[i] as usize + 1;
                while target < self.opcodes.len() && self.opcodes[target] == op {
                    target += self.arguments[target] as usize + 1;
                }
                self.arguments[i] = (target - i - 1) as i64;
            }
        }
    }
}

/// The member-access names of a purely static chain, outermost last.
/// Returns `None` if any link is optional or dynamic.
fn static_path(node: &Node) -> Option<Vec<String>> {
    match &node.kind {
        NodeKind::Identifier(name) => Some(vec![name.clone()]),
        NodeKind::Member {
            base,
            property,
            optional: false,
            ..
        } => {
            let mut path = static_path(base)?;
            match &property.kind {
                NodeKind::String(name) => {
                    path.push(name.clone());
                    Some(path)
                }
                _ => None,
            }
        }
        _ => None,
    }
}
