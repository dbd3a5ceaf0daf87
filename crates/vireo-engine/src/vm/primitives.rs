//! The primitive-operation table
//!
//! Every semantic operation an instruction performs is a method on this
//! trait, supplied by the embedder (or by [`crate::runtime::StdRuntime`]).
//! The dispatch loop calls these exactly as the instruction names them and
//! never inlines their logic; a method signals scripted failure by
//! recording the exception on the context and returning [`Thrown`], which
//! the loop routes to the innermost installed handler.
//!
//! `binop`, `unop` and the `inplace_*` entry points take the operation
//! selector the instruction carries, so the concrete operation is chosen
//! per-instruction rather than per-opcode-family.

use std::rc::Rc;

use vireo_bytecode::{BinaryOp, UnaryOp};

use crate::vm::context::ExecutionContext;
use crate::vm::function::CompiledFunction;
use crate::vm::unwind::Thrown;
use crate::vm::value::Value;

/// Result of a primitive producing a value
pub type PrimResult = Result<Value, Thrown>;

/// Result of a primitive with no value
pub type PrimUnit = Result<(), Thrown>;

/// Externally supplied operation catalogue
pub trait Primitives {
    // ===== Scope-chain name access =====

    /// Read a named binding through the scope chain
    fn get_activation_property(&mut self, ctx: &ExecutionContext, name: &Rc<str>) -> PrimResult;

    /// Write a named binding through the scope chain
    fn set_activation_property(
        &mut self,
        ctx: &ExecutionContext,
        name: &Rc<str>,
        value: Value,
    ) -> PrimUnit;

    // ===== Property and element access =====

    /// result = base.name
    fn get_property(&mut self, ctx: &ExecutionContext, base: &Value, name: &Rc<str>)
        -> PrimResult;

    /// base.name = value
    fn set_property(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
        value: Value,
    ) -> PrimUnit;

    /// result = base[index]
    fn get_element(&mut self, ctx: &ExecutionContext, base: &Value, index: &Value) -> PrimResult;

    /// base[index] = value
    fn set_element(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        index: &Value,
        value: Value,
    ) -> PrimUnit;

    // ===== Closures and the receiver =====

    /// Build a closure over `func`, bound to the current context
    fn init_closure(&mut self, ctx: &ExecutionContext, func: &Rc<CompiledFunction>) -> PrimResult;

    /// The context's receiver value
    fn this_object(&mut self, ctx: &ExecutionContext) -> PrimResult;

    // ===== Calls =====

    /// Invoke a bare callable value
    fn call_value(&mut self, ctx: &ExecutionContext, func: &Value, args: &[Value]) -> PrimResult;

    /// Invoke base.name(...), with base as receiver
    fn call_property(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
        args: &[Value],
    ) -> PrimResult;

    /// Invoke base[index](...), with base as receiver
    fn call_element(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        index: &Value,
        args: &[Value],
    ) -> PrimResult;

    /// Invoke a callable resolved through the scope chain
    fn call_activation_property(
        &mut self,
        ctx: &ExecutionContext,
        name: &Rc<str>,
        args: &[Value],
    ) -> PrimResult;

    // ===== Construction =====

    /// Construct from a bare callable value
    fn construct_value(
        &mut self,
        ctx: &ExecutionContext,
        func: &Value,
        args: &[Value],
    ) -> PrimResult;

    /// Construct from base.name
    fn construct_property(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
        args: &[Value],
    ) -> PrimResult;

    /// Construct from a callable resolved through the scope chain
    fn construct_activation_property(
        &mut self,
        ctx: &ExecutionContext,
        name: &Rc<str>,
        args: &[Value],
    ) -> PrimResult;

    // ===== Exceptions =====

    /// Record `value` as the current exception and signal the unwind
    fn throw(&mut self, ctx: &ExecutionContext, value: Value) -> Thrown;

    /// Read back the current exception
    fn get_exception(&mut self, ctx: &ExecutionContext) -> Value;

    // ===== Scopes =====

    /// Push a `with` scope; the returned context becomes current
    fn push_with_scope(
        &mut self,
        ctx: &ExecutionContext,
        subject: Value,
    ) -> Result<ExecutionContext, Thrown>;

    /// Push a catch scope binding `name` to the current exception
    fn push_catch_scope(&mut self, ctx: &ExecutionContext, name: &Rc<str>) -> ExecutionContext;

    /// Pop the innermost scope; the parent context becomes current
    fn pop_scope(&mut self, ctx: &ExecutionContext) -> ExecutionContext;

    // ===== Property enumeration =====

    /// Build a property-name iterator over `value`
    fn foreach_iterator_object(&mut self, ctx: &ExecutionContext, value: &Value) -> PrimResult;

    /// Next property name from an iterator, or undefined when exhausted
    fn foreach_next_property_name(&mut self, ctx: &ExecutionContext, iter: &Value) -> PrimResult;

    // ===== Deletion =====

    /// delete base.name
    fn delete_member(&mut self, ctx: &ExecutionContext, base: &Value, name: &Rc<str>)
        -> PrimResult;

    /// delete base[index]
    fn delete_subscript(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        index: &Value,
    ) -> PrimResult;

    /// delete a scope-chain binding
    fn delete_name(&mut self, ctx: &ExecutionContext, name: &Rc<str>) -> PrimResult;

    // ===== typeof =====

    /// typeof of a value
    fn typeof_value(&mut self, ctx: &ExecutionContext, value: &Value) -> PrimResult;

    /// typeof base.name
    fn typeof_member(&mut self, ctx: &ExecutionContext, base: &Value, name: &Rc<str>)
        -> PrimResult;

    /// typeof base[index]
    fn typeof_subscript(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        index: &Value,
    ) -> PrimResult;

    /// typeof of a scope-chain binding; unresolvable names are "undefined"
    fn typeof_name(&mut self, ctx: &ExecutionContext, name: &Rc<str>) -> PrimResult;

    // ===== Postfix increment / decrement =====

    /// (old numeric value, incremented value) for a slot operand
    fn post_increment(
        &mut self,
        ctx: &ExecutionContext,
        value: &Value,
    ) -> Result<(Value, Value), Thrown>;

    /// (old numeric value, decremented value) for a slot operand
    fn post_decrement(
        &mut self,
        ctx: &ExecutionContext,
        value: &Value,
    ) -> Result<(Value, Value), Thrown>;

    /// base.name++, returning the old numeric value
    fn post_increment_member(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
    ) -> PrimResult;

    /// base[index]++, returning the old numeric value
    fn post_increment_subscript(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        index: &Value,
    ) -> PrimResult;

    /// name++, returning the old numeric value
    fn post_increment_name(&mut self, ctx: &ExecutionContext, name: &Rc<str>) -> PrimResult;

    /// base.name--, returning the old numeric value
    fn post_decrement_member(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
    ) -> PrimResult;

    /// base[index]--, returning the old numeric value
    fn post_decrement_subscript(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        index: &Value,
    ) -> PrimResult;

    /// name--, returning the old numeric value
    fn post_decrement_name(&mut self, ctx: &ExecutionContext, name: &Rc<str>) -> PrimResult;

    // ===== Declarations and property definition =====

    /// Declare a variable in the current activation
    fn declare_var(&mut self, ctx: &ExecutionContext, deletable: bool, name: &Rc<str>)
        -> PrimUnit;

    /// Install a getter/setter pair on object.name
    fn define_getter_setter(
        &mut self,
        ctx: &ExecutionContext,
        object: &Value,
        name: &Rc<str>,
        getter: Value,
        setter: Value,
    ) -> PrimUnit;

    /// Define a data property object.name = value
    fn define_property(
        &mut self,
        ctx: &ExecutionContext,
        object: &Value,
        name: &Rc<str>,
        value: Value,
    ) -> PrimUnit;

    /// Define object[index] = value for a literal element index
    fn define_array_property(
        &mut self,
        ctx: &ExecutionContext,
        object: &Value,
        index: u32,
        value: Value,
    ) -> PrimUnit;

    // ===== Selected arithmetic =====

    /// Apply the selected unary operation
    fn unop(&mut self, ctx: &ExecutionContext, op: UnaryOp, value: &Value) -> PrimResult;

    /// Apply the selected binary operation
    fn binop(&mut self, ctx: &ExecutionContext, op: BinaryOp, lhs: &Value, rhs: &Value)
        -> PrimResult;

    /// base[index] op= source
    fn inplace_element(
        &mut self,
        ctx: &ExecutionContext,
        op: BinaryOp,
        base: &Value,
        index: &Value,
        source: &Value,
    ) -> PrimUnit;

    /// base.name op= source
    fn inplace_member(
        &mut self,
        ctx: &ExecutionContext,
        op: BinaryOp,
        base: &Value,
        name: &Rc<str>,
        source: &Value,
    ) -> PrimUnit;

    /// name op= source
    fn inplace_name(
        &mut self,
        ctx: &ExecutionContext,
        op: BinaryOp,
        name: &Rc<str>,
        source: &Value,
    ) -> PrimUnit;
}
