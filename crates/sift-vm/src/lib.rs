pub mod dispatch;
pub mod error;
pub mod frame;
pub mod function;
pub mod machine;
pub mod opcode;
pub mod program;
pub mod runtime;
pub mod value;

pub use error::RuntimeError;
pub use frame::IterFrame;
pub use function::{Function, Signature};
pub use machine::{run, Vm, DEFAULT_MEMORY_BUDGET};
pub use opcode::Opcode;
pub use program::{Constant, FieldPath, Program};
pub use value::Value;
