//! sift, an embeddable, sandboxed expression language.
//!
//! One expression string in, one value out: the source is checked
//! statically against a host-declared environment shape, compiled to
//! bytecode and run on a bounded stack machine.
//!
//! ```
//! use sift::{eval, Value};
//!
//! let result = eval("1 + 2 * 3", &Value::Nil).unwrap();
//! assert_eq!(result, Value::Int(7));
//! ```
//!
//! Programs are immutable and can be compiled once and evaluated many
//! times, concurrently, against different environments:
//!
//! ```
//! use sift::{compile, run, Config, EnvSchema, Nature, Value};
//!
//! let config = Config::new()
//!     .with_env(EnvSchema::map().declare("age", Nature::int()));
//! let program = compile("age >= 18", config).unwrap();
//!
//! let env = Value::map([("age".to_string(), Value::Int(21))].into());
//! assert_eq!(run(&program, &env).unwrap(), Value::Bool(true));
//! ```

pub mod builtin;
mod error;

use std::sync::Arc;

use sift_lang::{checker, parser, patch};
use sift_source::Source;
use tracing::debug;

pub use error::Error;
pub use sift_core::{Diagnostic, ErrorCode, Kind, Pos, Span};
pub use sift_lang::{Config, EnvField, EnvSchema, Expect, Nature, Patcher};
pub use sift_source::DiagnosticRenderer;
pub use sift_vm::{Function, Program, RuntimeError, Signature, Value, Vm};

/// Compile a named source with the standard builtins and a config.
///
/// The pipeline is lex, parse, patch (user visitors plus the default
/// optimizers), check, compile. On failure the error is bound to the
/// source and no program is returned.
pub fn compile_named(
    name: &str,
    source_text: &str,
    mut config: Config,
) -> Result<Program, Error> {
    let source = Arc::new(Source::new(name, source_text));
    builtin::register_standard(&mut config);

    debug!(name, len = source_text.len(), "compiling expression");

    let mut tree = parser::parse(&source, &config)
        .map_err(|e| Error::parse(e, source.clone()))?;

    patch::run_visitors(&mut tree, &mut config)
        .map_err(|e| Error::compile(e, source.clone()))?;

    checker::check(&mut tree, &config).map_err(|e| Error::check(e, source.clone()))?;

    sift_lang::compiler::compile(&tree, &config, source.clone())
        .map_err(|e| Error::compile(e, source))
}

/// Compile a source string with a config.
pub fn compile(source_text: &str, config: Config) -> Result<Program, Error> {
    compile_named("<expr>", source_text, config)
}

/// Run a compiled program against an environment value.
pub fn run(program: &Program, env: &Value) -> Result<Value, Error> {
    debug!(instructions = program.len(), "evaluating program");
    sift_vm::run(program, env).map_err(|e| Error::runtime(e, program.source().clone()))
}

/// Compile and immediately evaluate with the default configuration.
pub fn eval(source_text: &str, env: &Value) -> Result<Value, Error> {
    let program = compile(source_text, Config::new())?;
    run(&program, env)
}
