//! Operand addressing
//!
//! Resolves a [`Param`] to its storage slot given the loaded function's
//! constant pool, the current context, and the current frame. Four cases,
//! mutually exclusive and exhaustive; resolution is O(1) and allocates
//! nothing beyond the value clone. A write addressed at the constant pool
//! is an encoder defect and aborts the VM instance — the verifier rejects
//! such streams before they run.

use vireo_bytecode::Param;

use crate::vm::context::ExecutionContext;
use crate::vm::frame::Frame;
use crate::vm::value::Value;

/// Addressing view over one invocation's storage
pub(crate) struct Slots<'a> {
    pub consts: &'a [Value],
    pub ctx: &'a ExecutionContext,
    pub frame: &'a mut Frame,
}

impl Slots<'_> {
    /// Read the slot a param addresses
    pub fn load(&self, param: Param) -> Value {
        match param {
            Param::Const(index) => {
                debug_assert!(
                    (index as usize) < self.consts.len(),
                    "const c{} outside pool of {}",
                    index,
                    self.consts.len()
                );
                self.consts[index as usize].clone()
            }
            Param::Arg(index) => self.ctx.arg(index),
            Param::Local(index) => self.ctx.local(index),
            Param::Temp(index) => self.frame.get(index).clone(),
        }
    }

    /// Write the slot a param addresses
    pub fn store(&mut self, param: Param, value: Value) {
        match param {
            Param::Const(index) => {
                panic!("write addressed at constant c{index}: encoder defect")
            }
            Param::Arg(index) => self.ctx.set_arg(index, value),
            Param::Local(index) => self.ctx.set_local(index, value),
            Param::Temp(index) => self.frame.set(index, value),
        }
    }
}
