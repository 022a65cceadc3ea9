use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use sift_core::ErrorCode;

use crate::dispatch;
use crate::error::RuntimeError;
use crate::frame::{IterFrame, SortBuffer};
use crate::opcode::Opcode;
use crate::program::{Constant, Program};
use crate::runtime;
use crate::value::Value;

/// Default allocation budget per evaluation, in elements.
pub const DEFAULT_MEMORY_BUDGET: u64 = 1_000_000;

/// Run a program against an environment with a fresh machine.
pub fn run(program: &Program, env: &Value) -> Result<Value, RuntimeError> {
    Vm::new().run(program, env)
}

/// The stack machine.
///
/// A machine owns transient evaluation state only: the value stack, the
/// iteration-frame stack, the variable array and the memory counter.
/// Programs are immutable and may be shared across machines; a single
/// machine is reusable but not reentrant.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<IterFrame>,
    variables: Vec<Value>,
    memory: u64,
    memory_budget: u64,
    ip: usize,
    profile: Vec<i64>,
    profile_starts: Vec<Option<Instant>>,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(8),
            frames: Vec::new(),
            variables: Vec::new(),
            memory: 0,
            memory_budget: 0,
            ip: 0,
            profile: Vec::new(),
            profile_starts: Vec::new(),
        }
    }

    /// Override the program's allocation budget for this machine.
    pub fn with_memory_budget(mut self, budget: u64) -> Self {
        self.memory_budget = budget;
        self
    }

    /// Accumulated nanoseconds per profile span of the last run.
    pub fn profile(&self) -> &[i64] {
        &self.profile
    }

    /// Execute a program against an environment value.
    ///
    /// Any panic escaping the interpreter is recovered and returned as
    /// an error bound to the span of the last-executed instruction.
    pub fn run(&mut self, program: &Program, env: &Value) -> Result<Value, RuntimeError> {
        self.stack.clear();
        self.frames.clear();
        self.variables.clear();
        self.variables.resize(program.num_variables, Value::Nil);
        self.memory = 0;
        self.ip = 0;
        self.profile.clear();
        self.profile.resize(program.profile_spans.len(), 0);
        self.profile_starts.clear();
        self.profile_starts.resize(program.profile_spans.len(), None);

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_loop(program, env)));
        let result = match result {
            Ok(r) => r,
            Err(payload) => {
                let message = if let Some(s) = payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "internal error".to_string()
                };
                Err(RuntimeError::new(message))
            }
        };
        result.map_err(|e| e.at(program.location(self.ip.saturating_sub(1))))
    }

    fn run_loop(&mut self, program: &Program, env: &Value) -> Result<Value, RuntimeError> {
        let budget = if self.memory_budget != 0 {
            self.memory_budget
        } else if program.memory_budget != 0 {
            program.memory_budget
        } else {
            DEFAULT_MEMORY_BUDGET
        };

        while self.ip < program.opcodes.len() {
            let op = program.opcodes[self.ip];
            let arg = program.arguments[self.ip];
            self.ip += 1;

            match op {
                Opcode::Push => self.stack.push(self.constant_value(program, arg)?),
                Opcode::Int => self.stack.push(Value::Int(arg)),
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::True => self.stack.push(Value::Bool(true)),
                Opcode::False => self.stack.push(Value::Bool(false)),
                Opcode::Nil => self.stack.push(Value::Nil),
                Opcode::LoadEnv => self.stack.push(env.clone()),

                Opcode::Store => {
                    let value = self.pop()?;
                    self.variables[arg as usize] = value;
                }
                Opcode::LoadVar => self.stack.push(self.variables[arg as usize].clone()),

                Opcode::LoadConst => {
                    let key = self.constant_value(program, arg)?;
                    self.stack.push(runtime::fetch(env, &key)?);
                }
                Opcode::LoadFast => {
                    let key = self.constant_value(program, arg)?;
                    let name = key
                        .as_str()
                        .ok_or_else(|| RuntimeError::new("environment key must be a string"))?;
                    let entries = env.as_map().ok_or_else(|| {
                        RuntimeError::new("environment is not a map")
                    })?;
                    self.stack
                        .push(entries.get(name).cloned().unwrap_or(Value::Nil));
                }
                Opcode::LoadField => {
                    let field = self.constant_field(program, arg)?;
                    self.stack.push(runtime::fetch_field(env, field)?);
                }
                Opcode::FetchField => {
                    let base = self.pop()?;
                    let field = self.constant_field(program, arg)?;
                    self.stack.push(runtime::fetch_field(&base, field)?);
                }
                Opcode::LoadFunc => self
                    .stack
                    .push(Value::Function(program.functions[arg as usize].clone())),
                Opcode::Fetch => {
                    let key = self.pop()?;
                    let base = self.pop()?;
                    self.stack.push(runtime::fetch(&base, &key)?);
                }

                Opcode::Negate => {
                    let v = self.pop()?;
                    self.stack.push(runtime::negate(v)?);
                }
                Opcode::Not => {
                    let v = self.pop_bool()?;
                    self.stack.push(Value::Bool(!v));
                }
                Opcode::Add => self.binary(runtime::add)?,
                Opcode::Subtract => self.binary(runtime::subtract)?,
                Opcode::Multiply => self.binary(runtime::multiply)?,
                Opcode::Divide => self.binary(runtime::divide)?,
                Opcode::Modulo => self.binary(runtime::modulo)?,
                Opcode::Exponent => self.binary(runtime::exponent)?,

                Opcode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Bool(a == b));
                }
                Opcode::EqualInt => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack
                        .push(Value::Bool(a.as_int() == b.as_int() && a.as_int().is_some()));
                }
                Opcode::EqualString => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack
                        .push(Value::Bool(a.as_str().is_some() && a.as_str() == b.as_str()));
                }
                Opcode::Less => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(runtime::less(&a, &b)?);
                }
                Opcode::More => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(runtime::more(&a, &b)?);
                }
                Opcode::LessOrEqual => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(runtime::less_or_equal(&a, &b)?);
                }
                Opcode::MoreOrEqual => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(runtime::more_or_equal(&a, &b)?);
                }
                Opcode::In => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(runtime::in_op(&a, &b)?);
                }

                Opcode::Matches => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(runtime::matches(&a, &b)?);
                }
                Opcode::MatchesConst => {
                    let a = self.pop()?;
                    if a.is_nil() {
                        self.stack.push(Value::Bool(false));
                    } else {
                        let re = self.constant_regex(program, arg)?;
                        let s = a.as_str().ok_or_else(|| {
                            RuntimeError::new(format!(
                                "invalid operation: {} matches string",
                                a.kind()
                            ))
                        })?;
                        self.stack.push(Value::Bool(re.is_match(s)));
                    }
                }
                Opcode::Contains => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(runtime::contains(&a, &b)?);
                }
                Opcode::StartsWith => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(runtime::starts_with(&a, &b)?);
                }
                Opcode::EndsWith => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(runtime::ends_with(&a, &b)?);
                }

                Opcode::Jump => self.jump_forward(arg),
                Opcode::JumpIfTrue => {
                    if self.current_bool()? {
                        self.jump_forward(arg);
                    }
                }
                Opcode::JumpIfFalse => {
                    if !self.current_bool()? {
                        self.jump_forward(arg);
                    }
                }
                Opcode::JumpIfNil => {
                    if self.current()?.is_nil() {
                        self.jump_forward(arg);
                    }
                }
                Opcode::JumpIfNotNil => {
                    if !self.current()?.is_nil() {
                        self.jump_forward(arg);
                    }
                }
                Opcode::JumpIfEnd => {
                    if self.frame()?.is_done() {
                        self.jump_forward(arg);
                    }
                }
                Opcode::JumpBackward => {
                    self.ip -= arg as usize;
                }

                Opcode::Array => {
                    let size = runtime::to_int(&self.pop()?)?;
                    if size < 0 {
                        return Err(RuntimeError::new("negative array size"));
                    }
                    self.mem_grow(size as u64, budget)?;
                    let mut items = vec![Value::Nil; size as usize];
                    for slot in items.iter_mut().rev() {
                        *slot = self.pop()?;
                    }
                    self.stack.push(Value::array(items));
                }
                Opcode::Map => {
                    let size = runtime::to_int(&self.pop()?)?;
                    if size < 0 {
                        return Err(RuntimeError::new("negative map size"));
                    }
                    self.mem_grow(size as u64, budget)?;
                    let mut pairs = Vec::with_capacity(size as usize);
                    for _ in 0..size {
                        let value = self.pop()?;
                        let key = self.pop()?;
                        pairs.push((key, value));
                    }
                    pairs.reverse();
                    let mut entries = std::collections::BTreeMap::new();
                    for (key, value) in pairs {
                        let key = key
                            .as_str()
                            .ok_or_else(|| {
                                RuntimeError::new(format!(
                                    "cannot use {} as map key",
                                    key.kind()
                                ))
                            })?
                            .to_string();
                        entries.insert(key, value);
                    }
                    self.stack.push(Value::map(entries));
                }
                Opcode::Len => {
                    let length = runtime::len(self.current()?)?;
                    self.stack.push(length);
                }
                Opcode::Slice => {
                    let from = self.pop()?;
                    let to = self.pop()?;
                    let base = self.pop()?;
                    self.stack.push(runtime::slice(&base, &from, &to)?);
                }
                Opcode::Range => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let from = runtime::to_int(&a)?;
                    let to = runtime::to_int(&b)?;
                    let size = (to - from + 1).max(0) as u64;
                    self.mem_grow(size, budget)?;
                    self.stack.push(Value::array(runtime::make_range(from, to)));
                }

                Opcode::Call | Opcode::CallN => {
                    let callee = self.pop()?;
                    let args = self.pop_args(arg as usize)?;
                    self.invoke(&callee, &args, budget)?;
                }
                Opcode::Call0 => {
                    let (out, mem) = program.functions[arg as usize].invoke(&[])?;
                    self.mem_grow(mem, budget)?;
                    self.stack.push(out);
                }
                Opcode::Call1 => {
                    let a = self.pop()?;
                    let (out, mem) = program.functions[arg as usize].invoke(&[a])?;
                    self.mem_grow(mem, budget)?;
                    self.stack.push(out);
                }
                Opcode::Call2 => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let (out, mem) = program.functions[arg as usize].invoke(&[a, b])?;
                    self.mem_grow(mem, budget)?;
                    self.stack.push(out);
                }
                Opcode::Call3 => {
                    let c = self.pop()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let (out, mem) = program.functions[arg as usize].invoke(&[a, b, c])?;
                    self.mem_grow(mem, budget)?;
                    self.stack.push(out);
                }
                Opcode::CallFast => {
                    let callee = self.pop()?;
                    let args = self.pop_args(arg as usize)?;
                    let func = callee
                        .as_function()
                        .ok_or_else(|| RuntimeError::new("callee is not a function"))?;
                    if args.len() == 1 && func.has_fast() {
                        let out = func.invoke_fast(&args[0])?;
                        self.stack.push(out);
                    } else {
                        self.invoke(&callee, &args, budget)?;
                    }
                }
                Opcode::CallSafe => {
                    let callee = self.pop()?;
                    let args = self.pop_args(arg as usize)?;
                    self.invoke(&callee, &args, budget)?;
                }
                Opcode::CallTyped => {
                    let arity = dispatch::arity(arg as usize)
                        .ok_or_else(|| RuntimeError::new("unknown typed signature"))?;
                    let callee = self.pop()?;
                    let args = self.pop_args(arity)?;
                    self.invoke(&callee, &args, budget)?;
                }
                Opcode::CallBuiltin1 => {
                    let a = self.pop()?;
                    let out = program.functions[arg as usize].invoke_fast(&a)?;
                    self.stack.push(out);
                }

                Opcode::Begin => {
                    let v = self.pop()?;
                    match v {
                        Value::Array(items) => self.frames.push(IterFrame::new(items)),
                        other => {
                            return Err(RuntimeError::new(format!(
                                "cannot iterate over {}",
                                other.kind()
                            )))
                        }
                    }
                }
                Opcode::End => {
                    self.frames
                        .pop()
                        .ok_or_else(|| RuntimeError::new("no active iteration"))?;
                }
                Opcode::Pointer => {
                    let v = self.frame()?.current();
                    self.stack.push(v);
                }
                Opcode::GetIndex => {
                    let index = self.frame()?.index;
                    self.stack.push(Value::Int(index));
                }
                Opcode::GetCount => {
                    let count = self.frame()?.count;
                    self.stack.push(Value::Int(count));
                }
                Opcode::GetLen => {
                    let frame_len = self.frame()?.len;
                    self.stack.push(Value::Int(frame_len));
                }
                Opcode::GetAcc => {
                    let acc = self.frame()?.acc.clone();
                    self.stack.push(acc);
                }
                Opcode::SetAcc => {
                    let v = self.pop()?;
                    self.frame_mut()?.acc = v;
                }
                Opcode::SetIndex => {
                    let v = runtime::to_int(&self.pop()?)?;
                    self.frame_mut()?.index = v;
                }
                Opcode::IncrementIndex => self.frame_mut()?.index += 1,
                Opcode::DecrementIndex => self.frame_mut()?.index -= 1,
                Opcode::IncrementCount => self.frame_mut()?.count += 1,

                Opcode::Cast => {
                    let v = self.pop()?;
                    match sift_core::Kind::from_code(arg) {
                        Some(sift_core::Kind::Int) => {
                            self.stack.push(Value::Int(runtime::to_int(&v)?))
                        }
                        Some(sift_core::Kind::Float) => {
                            self.stack.push(Value::Float(runtime::to_float(&v)?))
                        }
                        _ => return Err(RuntimeError::new("unsupported cast")),
                    }
                }
                Opcode::Deref => {
                    // No indirection in the closed value union.
                }
                Opcode::Throw => {
                    let v = self.pop()?;
                    return Err(RuntimeError::new(v.to_string()));
                }
                Opcode::Create => match arg {
                    1 => {
                        self.frame_mut()?.acc = Value::map(std::collections::BTreeMap::new());
                    }
                    2 => {
                        let order = self.pop()?;
                        let desc = match order.as_str() {
                            Some("asc") => false,
                            Some("desc") => true,
                            _ => {
                                return Err(RuntimeError::new(
                                    "unknown order, use asc or desc",
                                ))
                            }
                        };
                        let frame_len = self.frame()?.len as usize;
                        self.frame_mut()?.sort = Some(SortBuffer {
                            desc,
                            items: Vec::with_capacity(frame_len),
                            keys: Vec::with_capacity(frame_len),
                        });
                    }
                    other => {
                        return Err(RuntimeError::new(format!(
                            "unknown create argument {}",
                            other
                        )))
                    }
                },
                Opcode::GroupBy => {
                    let key = self.pop()?;
                    let item = self.frame()?.current();
                    let acc = &mut self.frame_mut()?.acc;
                    let entries = match acc {
                        Value::Map(entries) => Arc::make_mut(entries),
                        _ => return Err(RuntimeError::new("group accumulator is missing")),
                    };
                    match entries
                        .entry(key.to_string())
                        .or_insert_with(|| Value::array(Vec::new()))
                    {
                        Value::Array(items) => Arc::make_mut(items).push(item),
                        _ => return Err(RuntimeError::new("group bucket is not an array")),
                    }
                }
                Opcode::SortBy => {
                    let key = self.pop()?;
                    let item = self.frame()?.current();
                    let buffer = self
                        .frame_mut()?
                        .sort
                        .as_mut()
                        .ok_or_else(|| RuntimeError::new("sort buffer is missing"))?;
                    buffer.keys.push(key);
                    buffer.items.push(item);
                }
                Opcode::Sort => {
                    let frame_len = self.frame()?.len as u64;
                    let buffer = self
                        .frame_mut()?
                        .sort
                        .take()
                        .ok_or_else(|| RuntimeError::new("sort buffer is missing"))?;
                    self.mem_grow(frame_len, budget)?;
                    self.stack.push(sort_buffer(buffer)?);
                }

                Opcode::ProfileStart => {
                    self.profile_starts[arg as usize] = Some(Instant::now());
                }
                Opcode::ProfileEnd => {
                    if let Some(start) = self.profile_starts[arg as usize].take() {
                        self.profile[arg as usize] += start.elapsed().as_nanos() as i64;
                    }
                }
            }
        }

        Ok(self.stack.pop().unwrap_or(Value::Nil))
    }

    fn jump_forward(&mut self, arg: i64) {
        self.ip = (self.ip as i64 + arg) as usize;
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::new("stack underflow"))
    }

    /// Pop two operands (right first) and push the operation's result.
    fn binary(
        &mut self,
        op: fn(Value, Value) -> Result<Value, RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.stack.push(op(a, b)?);
        Ok(())
    }

    fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        let v = self.pop()?;
        v.as_bool().ok_or_else(|| {
            RuntimeError::new(format!("expected bool, got {}", v.kind()))
        })
    }

    fn pop_args(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        let mut args = vec![Value::Nil; n];
        for slot in args.iter_mut().rev() {
            *slot = self.pop()?;
        }
        Ok(args)
    }

    fn current(&self) -> Result<&Value, RuntimeError> {
        self.stack
            .last()
            .ok_or_else(|| RuntimeError::new("stack underflow"))
    }

    fn current_bool(&self) -> Result<bool, RuntimeError> {
        let v = self.current()?;
        v.as_bool().ok_or_else(|| {
            RuntimeError::new(format!("expected bool, got {}", v.kind()))
        })
    }

    fn frame(&self) -> Result<&IterFrame, RuntimeError> {
        self.frames
            .last()
            .ok_or_else(|| RuntimeError::new("no active iteration"))
    }

    fn frame_mut(&mut self) -> Result<&mut IterFrame, RuntimeError> {
        self.frames
            .last_mut()
            .ok_or_else(|| RuntimeError::new("no active iteration"))
    }

    fn invoke(
        &mut self,
        callee: &Value,
        args: &[Value],
        budget: u64,
    ) -> Result<(), RuntimeError> {
        let func = callee.as_function().ok_or_else(|| {
            RuntimeError::new(format!("{} is not callable", callee.kind()))
        })?;
        let (out, mem) = func.invoke(args)?;
        self.mem_grow(mem, budget)?;
        self.stack.push(out);
        Ok(())
    }

    fn mem_grow(&mut self, size: u64, budget: u64) -> Result<(), RuntimeError> {
        self.memory += size;
        if self.memory >= budget {
            return Err(RuntimeError::memory_budget());
        }
        Ok(())
    }

    fn constant_value(&self, program: &Program, arg: i64) -> Result<Value, RuntimeError> {
        match program.constants.get(arg as usize) {
            Some(Constant::Value(v)) => Ok(v.clone()),
            _ => Err(internal("constant is not a value")),
        }
    }

    fn constant_field<'p>(
        &self,
        program: &'p Program,
        arg: i64,
    ) -> Result<&'p crate::program::FieldPath, RuntimeError> {
        match program.constants.get(arg as usize) {
            Some(Constant::Field(f)) => Ok(f),
            _ => Err(internal("constant is not a field path")),
        }
    }

    fn constant_regex<'p>(
        &self,
        program: &'p Program,
        arg: i64,
    ) -> Result<&'p regex::Regex, RuntimeError> {
        match program.constants.get(arg as usize) {
            Some(Constant::Regex(r)) => Ok(r),
            _ => Err(internal("constant is not a regex")),
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn internal(message: &str) -> RuntimeError {
    RuntimeError::with_code(ErrorCode::E400, message)
}

/// Stable sort of collected items by their keys; errors on the first
/// incomparable key pair.
fn sort_buffer(buffer: SortBuffer) -> Result<Value, RuntimeError> {
    let SortBuffer { desc, items, keys } = buffer;
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failed = None;
    order.sort_by(|&a, &b| match runtime::compare(&keys[a], &keys[b]) {
        Ok(ord) => {
            if desc {
                ord.reverse()
            } else {
                ord
            }
        }
        Err(e) => {
            failed.get_or_insert(e);
            std::cmp::Ordering::Equal
        }
    });
    if let Some(e) = failed {
        return Err(e);
    }
    let mut sorted = Vec::with_capacity(items.len());
    for i in order {
        sorted.push(items[i].clone());
    }
    Ok(Value::array(sorted))
}
