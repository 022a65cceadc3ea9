use std::fmt;
use std::sync::Arc;

use sift_core::Kind;

use crate::error::RuntimeError;
use crate::value::Value;

/// A single callable type: input kinds, output kind, variadic flag.
///
/// A variadic signature accepts any number of trailing arguments of the
/// last parameter kind.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Signature {
    pub params: Vec<Kind>,
    pub result: Kind,
    pub variadic: bool,
}

impl Signature {
    pub fn new(params: &[Kind], result: Kind) -> Self {
        Self {
            params: params.to_vec(),
            result,
            variadic: false,
        }
    }

    pub fn variadic(params: &[Kind], result: Kind) -> Self {
        Self {
            params: params.to_vec(),
            result,
            variadic: true,
        }
    }
}

pub type FastFn = dyn Fn(&Value) -> Value + Send + Sync;
pub type CallFn = dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync;
pub type SafeFn = dyn Fn(&[Value]) -> Result<(Value, u64), RuntimeError> + Send + Sync;
pub type ValidateFn = dyn Fn(&[Kind]) -> Result<Kind, String> + Send + Sync;
pub type DerefFn = dyn Fn(usize, Kind) -> bool + Send + Sync;

/// A host-registered function.
///
/// Carries one or more signatures for the checker, plus up to three
/// callables: `fast` (single argument, cannot fail), `call` (variadic,
/// fallible) and `safe` (variadic, fallible, reports extra memory cost
/// charged against the evaluation's budget). An optional `validate`
/// callback replaces signature matching at check time, and `deref`
/// controls per-argument dereferencing.
#[derive(Clone)]
pub struct Function {
    name: String,
    signatures: Vec<Signature>,
    fast: Option<Arc<FastFn>>,
    call: Option<Arc<CallFn>>,
    safe: Option<Arc<SafeFn>>,
    validate: Option<Arc<ValidateFn>>,
    deref: Option<Arc<DerefFn>>,
    predicate: bool,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signatures: Vec::new(),
            fast: None,
            call: None,
            safe: None,
            validate: None,
            deref: None,
            predicate: false,
        }
    }

    pub fn signature(mut self, params: &[Kind], result: Kind) -> Self {
        self.signatures.push(Signature::new(params, result));
        self
    }

    pub fn variadic_signature(mut self, params: &[Kind], result: Kind) -> Self {
        self.signatures.push(Signature::variadic(params, result));
        self
    }

    pub fn fast(mut self, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.fast = Some(Arc::new(f));
        self
    }

    pub fn callable(
        mut self,
        f: impl Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    ) -> Self {
        self.call = Some(Arc::new(f));
        self
    }

    pub fn safe(
        mut self,
        f: impl Fn(&[Value]) -> Result<(Value, u64), RuntimeError> + Send + Sync + 'static,
    ) -> Self {
        self.safe = Some(Arc::new(f));
        self
    }

    pub fn validator(
        mut self,
        f: impl Fn(&[Kind]) -> Result<Kind, String> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Arc::new(f));
        self
    }

    pub fn deref_control(
        mut self,
        f: impl Fn(usize, Kind) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.deref = Some(Arc::new(f));
        self
    }

    pub fn predicate(mut self) -> Self {
        self.predicate = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn is_predicate(&self) -> bool {
        self.predicate
    }

    pub fn has_fast(&self) -> bool {
        self.fast.is_some()
    }

    pub fn has_safe(&self) -> bool {
        self.safe.is_some()
    }

    pub fn has_validator(&self) -> bool {
        self.validate.is_some()
    }

    /// Run the check-time validator, if present.
    pub fn validate(&self, args: &[Kind]) -> Option<Result<Kind, String>> {
        self.validate.as_ref().map(|v| v(args))
    }

    /// Should argument `i` of kind `kind` be dereferenced before the call?
    /// Without a deref-control callback, arguments are dereferenced.
    pub fn wants_deref(&self, i: usize, kind: Kind) -> bool {
        match &self.deref {
            Some(f) => f(i, kind),
            None => true,
        }
    }

    /// Call the fast path directly. Only valid when `has_fast()`.
    pub fn invoke_fast(&self, arg: &Value) -> Result<Value, RuntimeError> {
        match &self.fast {
            Some(f) => Ok(f(arg)),
            None => Err(RuntimeError::new(format!(
                "function {} has no fast path",
                self.name
            ))),
        }
    }

    /// Dispatch to the best available callable.
    ///
    /// Returns the result plus the extra memory cost reported by the
    /// safe callable (zero for the other paths).
    pub fn invoke(&self, args: &[Value]) -> Result<(Value, u64), RuntimeError> {
        if let (1, Some(fast)) = (args.len(), &self.fast) {
            return Ok((fast(&args[0]), 0));
        }
        if let Some(call) = &self.call {
            return call(args).map(|v| (v, 0));
        }
        if let Some(safe) = &self.safe {
            return safe(args);
        }
        if let (1, Some(fast)) = (args.len(), &self.fast) {
            return Ok((fast(&args[0]), 0));
        }
        Err(RuntimeError::new(format!(
            "function {} is not callable",
            self.name
        )))
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("signatures", &self.signatures)
            .field("predicate", &self.predicate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper() -> Function {
        Function::new("upper")
            .signature(&[Kind::String], Kind::String)
            .fast(|v| match v.as_str() {
                Some(s) => Value::string(s.to_uppercase()),
                None => Value::Nil,
            })
    }

    #[test]
    fn fast_path() {
        let f = upper();
        let (out, mem) = f.invoke(&[Value::string("abc")]).unwrap();
        assert_eq!(out, Value::string("ABC"));
        assert_eq!(mem, 0);
    }

    #[test]
    fn call_path() {
        let add = Function::new("add")
            .signature(&[Kind::Int, Kind::Int], Kind::Int)
            .callable(|args| {
                let a = args[0].as_int().unwrap_or(0);
                let b = args[1].as_int().unwrap_or(0);
                Ok(Value::Int(a + b))
            });
        let (out, _) = add.invoke(&[Value::Int(40), Value::Int(2)]).unwrap();
        assert_eq!(out, Value::Int(42));
    }

    #[test]
    fn safe_path_reports_memory() {
        let dup = Function::new("dup").safe(|args| {
            let v = args[0].clone();
            Ok((Value::array(vec![v.clone(), v]), 2))
        });
        let (out, mem) = dup.invoke(&[Value::Int(1)]).unwrap();
        assert_eq!(out, Value::array(vec![Value::Int(1), Value::Int(1)]));
        assert_eq!(mem, 2);
    }

    #[test]
    fn not_callable() {
        let f = Function::new("ghost").signature(&[], Kind::Nil);
        assert!(f.invoke(&[]).is_err());
    }

    #[test]
    fn validator_overrides() {
        let f = Function::new("pick").validator(|args| {
            if args.len() == 1 {
                Ok(args[0])
            } else {
                Err("pick expects one argument".to_string())
            }
        });
        assert_eq!(f.validate(&[Kind::Int]), Some(Ok(Kind::Int)));
        assert!(matches!(f.validate(&[]), Some(Err(_))));
    }

    #[test]
    fn deref_default_is_on() {
        let f = upper();
        assert!(f.wants_deref(0, Kind::Any));
        let g = Function::new("raw").deref_control(|_, _| false);
        assert!(!g.wants_deref(0, Kind::Any));
    }
}
