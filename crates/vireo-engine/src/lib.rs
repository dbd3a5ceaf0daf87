//! Vireo language engine
//!
//! The register-addressed bytecode interpreter for the Vireo scripting
//! language: operand addressing, exception unwinding, two dispatch
//! strategies with identical semantics, and a reference implementation of
//! the primitive-operation table the instruction set delegates to.

#![warn(rust_2018_idioms)]

pub mod runtime;
pub mod vm;

pub use runtime::StdRuntime;
pub use vm::{
    execute, CompiledFunction, DispatchMode, ExecutionContext, Frame, Handler, Primitives,
    Thrown, Value, VmError, VmResult,
};
