//! Vireo virtual machine
//!
//! The VM executes one compiled function's instruction stream against an
//! execution context, delegating every semantic operation (arithmetic,
//! property access, calls, construction, the builtin family) to an
//! externally supplied [`Primitives`] table. Scripted exceptions travel
//! through the handler stack (see [`unwind`]); encoder defects are fatal
//! [`VmError`]s and never catchable by script code.

pub mod context;
pub mod dispatch;
pub mod frame;
pub mod function;
pub mod object;
pub mod primitives;
pub mod slots;
pub mod unwind;
pub mod value;

pub use context::ExecutionContext;
pub use dispatch::{execute, DispatchMode};
pub use frame::Frame;
pub use function::CompiledFunction;
pub use object::{Object, ObjectKind, ObjectRef, PropertySlot};
pub use primitives::Primitives;
pub use unwind::{Handler, Thrown};
pub use value::Value;

use thiserror::Error;

/// VM execution errors
///
/// Every variant except [`VmError::Unhandled`] is an encoder or embedder
/// defect: the instruction stream is assumed well-formed by construction
/// (see `vireo_bytecode::verify`), and a malformed stream aborts the
/// VM instance rather than degrading.
#[derive(Debug, Error)]
pub enum VmError {
    /// Unrecognized opcode tag
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Malformed instruction encoding
    #[error("Malformed instruction: {0}")]
    Decode(#[from] vireo_bytecode::DecodeError),

    /// Execution ran past the end of the stream without a `Ret`
    #[error("Execution ran off the end of the instruction stream at offset {0}")]
    RanOffEnd(usize),

    /// A scripted exception propagated with no handler installed
    #[error("Unhandled exception")]
    Unhandled(Value),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
