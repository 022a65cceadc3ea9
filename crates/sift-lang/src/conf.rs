use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sift_core::Kind;
use sift_vm::Function;

use crate::nature::{Field, Nature};
use crate::patch::Patcher;

/// A declared environment entry.
#[derive(Clone, Debug)]
pub struct EnvField {
    pub name: String,
    pub nature: Nature,
    pub alias: Option<String>,
}

/// The shape of the host environment.
///
/// Either a map shape (heterogeneous string-keyed lookup, compiled to
/// direct key fetches) or a record shape (struct-like: strict, with
/// stable field indices that let consecutive member accesses fold into
/// a single fetch). Undeclared names are errors when strict.
#[derive(Clone, Debug)]
pub struct EnvSchema {
    fields: Vec<EnvField>,
    strict: bool,
    record: bool,
    default_value: Option<Nature>,
}

impl EnvSchema {
    /// An empty strict map shape.
    pub fn map() -> Self {
        Self {
            fields: Vec::new(),
            strict: true,
            record: false,
            default_value: None,
        }
    }

    /// An empty record (struct-like) shape.
    pub fn record() -> Self {
        Self {
            fields: Vec::new(),
            strict: true,
            record: true,
            default_value: None,
        }
    }

    /// Declare a field.
    pub fn declare(mut self, name: impl Into<String>, nature: Nature) -> Self {
        self.fields.push(EnvField {
            name: name.into(),
            nature,
            alias: None,
        });
        self
    }

    /// Declare a field reachable in expressions under an alias.
    pub fn declare_aliased(
        mut self,
        name: impl Into<String>,
        alias: impl Into<String>,
        nature: Nature,
    ) -> Self {
        self.fields.push(EnvField {
            name: name.into(),
            nature,
            alias: Some(alias.into()),
        });
        self
    }

    /// Allow undeclared names, giving them the supplied nature.
    pub fn permissive(mut self, default_value: Nature) -> Self {
        self.strict = false;
        self.default_value = Some(default_value);
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn is_record(&self) -> bool {
        self.record
    }

    /// The schema as a nature for the checker.
    pub fn nature(&self) -> Nature {
        let fields: BTreeMap<String, Field> = self
            .fields
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    Field {
                        nature: f.nature.clone(),
                        alias: f.alias.clone(),
                    },
                )
            })
            .collect();
        let mut nature = Nature::map_of(fields, self.strict);
        if self.record {
            nature.kind = Kind::Struct;
        }
        if let Some(default_value) = &self.default_value {
            nature.default_value = Some(Box::new(default_value.clone()));
        }
        nature
    }
}

impl Default for EnvSchema {
    fn default() -> Self {
        Self::map()
    }
}

/// Expected result kind of a compiled program.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum Expect {
    #[default]
    Any,
    Bool,
    Int,
    Int64,
    Float64,
    String,
}

impl Expect {
    pub fn kind(self) -> Kind {
        match self {
            Expect::Any => Kind::Any,
            Expect::Bool => Kind::Bool,
            Expect::Int | Expect::Int64 => Kind::Int,
            Expect::Float64 => Kind::Float,
            Expect::String => Kind::String,
        }
    }

    /// Whether the compiler appends a final cast for this expectation.
    pub fn casts(self) -> bool {
        matches!(self, Expect::Int | Expect::Int64 | Expect::Float64)
    }
}

/// Compilation and evaluation options.
pub struct Config {
    /// The environment shape.
    pub env: EnvSchema,
    /// Fail on unresolved identifiers.
    pub strict: bool,
    /// Expected result kind; a static mismatch is a type error.
    pub expect: Expect,
    /// Accept a statically unknown result even when `expect` is set.
    pub expect_any: bool,
    /// Registered functions by name.
    pub functions: BTreeMap<String, Arc<Function>>,
    /// Builtin names hidden from expressions.
    pub disabled: BTreeSet<String>,
    /// Operator overloads: operator spelling to candidate function names.
    pub operators: BTreeMap<String, Vec<String>>,
    /// Extra patchers, run before the default optimizer ones.
    pub visitors: Vec<Box<dyn Patcher>>,
    /// Run the default optimizer patchers.
    pub optimize: bool,
    /// Emit profiling opcodes around each node.
    pub profile: bool,
    /// Parser AST node limit.
    pub max_nodes: usize,
    /// VM allocation budget in elements; zero selects the default.
    pub memory_budget: u64,
}

impl Config {
    pub fn new() -> Self {
        Self {
            env: EnvSchema::map(),
            strict: true,
            expect: Expect::Any,
            expect_any: false,
            functions: BTreeMap::new(),
            disabled: BTreeSet::new(),
            operators: BTreeMap::new(),
            visitors: Vec::new(),
            optimize: true,
            profile: false,
            max_nodes: 10_000,
            memory_budget: 0,
        }
    }

    pub fn with_env(mut self, env: EnvSchema) -> Self {
        self.env = env;
        self
    }

    pub fn with_function(mut self, function: Function) -> Self {
        self.functions
            .insert(function.name().to_string(), Arc::new(function));
        self
    }

    pub fn expect(mut self, expect: Expect) -> Self {
        self.expect = expect;
        self
    }

    pub fn allow_undefined_variables(mut self) -> Self {
        self.strict = false;
        self
    }

    pub fn disable(mut self, name: impl Into<String>) -> Self {
        self.disabled.insert(name.into());
        self
    }

    /// Register function names as overloads of an operator.
    pub fn overload_operator(
        mut self,
        op: impl Into<String>,
        functions: &[&str],
    ) -> Self {
        self.operators
            .entry(op.into())
            .or_default()
            .extend(functions.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_visitor(mut self, patcher: Box<dyn Patcher>) -> Self {
        self.visitors.push(patcher);
        self
    }

    pub fn with_profile(mut self) -> Self {
        self.profile = true;
        self
    }

    /// Look up a registered function unless it has been disabled.
    pub fn function(&self, name: &str) -> Option<&Arc<Function>> {
        if self.disabled.contains(name) {
            return None;
        }
        self.functions.get(name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
