//! The dispatch loop
//!
//! Executes one compiled function's instruction stream until a `Ret`
//! yields the final value, or an unwind propagates out of the whole
//! stream. Two dispatch strategies share one handler function per opcode:
//!
//! - **Switch**: the driver decodes the opcode tag and multiplexes on it
//!   with a `match`.
//! - **Jump table**: the driver indexes a process-wide 256-entry table of
//!   handler function pointers with the raw opcode byte, one indirect
//!   call per instruction with no central comparison. This is the
//!   portable analogue of computed-goto direct threading.
//!
//! Every handler decodes its own operands, advancing the code pointer
//! past the instruction's full encoding *before* the effect runs, so the
//! jump handlers may overwrite the code pointer without being overwritten
//! themselves. Both strategies decode exactly once per instruction and
//! produce identical side effects.
//!
//! Scripted failures surface as [`Thrown`] from the primitive table; the
//! driver reacts by resuming at the innermost installed handler (see
//! [`crate::vm::unwind`]). An unrecognized opcode byte or malformed
//! operand encoding is an encoder defect and a fatal [`VmError`], never
//! routed through the handler stack.

use std::rc::Rc;

use once_cell::sync::Lazy;
use tracing::trace;

use vireo_bytecode::{BytecodeReader, DecodeError, Opcode, Param};

use crate::vm::context::ExecutionContext;
use crate::vm::frame::Frame;
use crate::vm::function::CompiledFunction;
use crate::vm::primitives::Primitives;
use crate::vm::slots::Slots;
use crate::vm::unwind::{Handler, Thrown};
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};

/// Which dispatch strategy drives the loop
///
/// Both strategies execute identical instruction semantics; the choice
/// only affects how the next handler is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Central decode-and-branch loop
    #[default]
    Switch,
    /// Indirect call through the static opcode handler table
    JumpTable,
}

/// Execute `func` against `ctx`, delegating semantics to `prims`
///
/// The frame and the current-context binding live here, owned by this
/// invocation: the frame is created by the stream's `Push` and dropped
/// when the invocation returns or unwinds out; scope push/pop
/// instructions reassign the context binding. Handlers installed deeper
/// than the entry watermark are consumed here; a throw with none left
/// surfaces as [`VmError::Unhandled`] to the caller.
pub fn execute(
    func: &CompiledFunction,
    ctx: ExecutionContext,
    prims: &mut dyn Primitives,
    mode: DispatchMode,
) -> VmResult<Value> {
    let handler_base = ctx.handler_depth();
    let mut machine = Machine {
        reader: BytecodeReader::new(&func.code),
        func,
        ctx,
        frame: Frame::new(),
        prims,
        handler_base,
    };
    match mode {
        DispatchMode::Switch => machine.run_switch(),
        DispatchMode::JumpTable => machine.run_jump_table(),
    }
}

/// What a handler tells the driver to do next
enum Step {
    /// Continue at the current code pointer
    Next,
    /// Terminate the stream with this value
    Return(Value),
}

/// Why a handler did not produce a step
enum Fault {
    /// Scripted exception; the driver consults the handler stack
    Thrown,
    /// Encoder or embedder defect; terminates the invocation
    Fatal(VmError),
}

impl From<Thrown> for Fault {
    fn from(_: Thrown) -> Self {
        Self::Thrown
    }
}

impl From<DecodeError> for Fault {
    fn from(err: DecodeError) -> Self {
        Self::Fatal(VmError::Decode(err))
    }
}

type OpHandler = fn(&mut Machine<'_, '_>) -> Result<Step, Fault>;

/// Loop-local interpreter state for one invocation
struct Machine<'a, 'p> {
    func: &'a CompiledFunction,
    reader: BytecodeReader<'a>,
    ctx: ExecutionContext,
    frame: Frame,
    prims: &'p mut dyn Primitives,
    /// Handler-stack depth at entry; handlers below it belong to callers
    handler_base: usize,
}

impl Machine<'_, '_> {
    fn run_switch(&mut self) -> VmResult<Value> {
        loop {
            let at = self.reader.position();
            let byte = match self.reader.read_u8() {
                Ok(byte) => byte,
                Err(_) => return Err(VmError::RanOffEnd(at)),
            };
            let Some(opcode) = Opcode::from_u8(byte) else {
                return Err(VmError::InvalidOpcode(byte, at));
            };
            trace!(offset = at, opcode = opcode.name(), "exec");
            let step = step_switch(self, opcode);
            if let Some(value) = self.react(step)? {
                return Ok(value);
            }
        }
    }

    fn run_jump_table(&mut self) -> VmResult<Value> {
        let table = &*JUMP_TABLE;
        loop {
            let at = self.reader.position();
            let byte = match self.reader.read_u8() {
                Ok(byte) => byte,
                Err(_) => return Err(VmError::RanOffEnd(at)),
            };
            trace!(offset = at, opcode = byte, "exec");
            let step = table[byte as usize](self);
            if let Some(value) = self.react(step)? {
                return Ok(value);
            }
        }
    }

    fn react(&mut self, step: Result<Step, Fault>) -> VmResult<Option<Value>> {
        match step {
            Ok(Step::Next) => Ok(None),
            Ok(Step::Return(value)) => Ok(Some(value)),
            Err(Fault::Thrown) => {
                self.unwind()?;
                Ok(None)
            }
            Err(Fault::Fatal(err)) => Err(err),
        }
    }

    /// Resume at the innermost handler this invocation installed
    ///
    /// Restores the code pointer and the install-time context, then sets
    /// the handler's target slot to the exception-occurred flag. Only the
    /// two saved fields are trusted; temporaries written in the protected
    /// region keep whatever the throw left in them. Handlers below the
    /// entry watermark belong to a caller, so the condition propagates
    /// out as an unhandled exception instead.
    fn unwind(&mut self) -> VmResult<()> {
        if self.ctx.handler_depth() <= self.handler_base {
            return Err(VmError::Unhandled(self.ctx.exception()));
        }
        let Some(handler) = self.ctx.top_handler() else {
            return Err(VmError::Unhandled(self.ctx.exception()));
        };
        trace!(resume = handler.resume, "unwind");
        self.ctx = handler.scope.clone();
        self.reader.seek(handler.resume);
        self.store(handler.target, Value::Bool(true));
        Ok(())
    }

    // ===== Operand decoding =====

    fn read_param(&mut self) -> Result<Param, DecodeError> {
        Param::decode(&mut self.reader)
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.reader.read_u32()
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.reader.read_i32()
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.reader.read_u8()
    }

    fn read_unary_op(&mut self) -> Result<vireo_bytecode::UnaryOp, DecodeError> {
        let at = self.reader.position();
        let raw = self.reader.read_u8()?;
        vireo_bytecode::UnaryOp::from_u8(raw).ok_or(DecodeError::InvalidOpSelector(raw, at))
    }

    fn read_binary_op(&mut self) -> Result<vireo_bytecode::BinaryOp, DecodeError> {
        let at = self.reader.position();
        let raw = self.reader.read_u8()?;
        vireo_bytecode::BinaryOp::from_u8(raw).ok_or(DecodeError::InvalidOpSelector(raw, at))
    }

    // ===== Storage =====

    fn load(&mut self, param: Param) -> Value {
        Slots {
            consts: &self.func.consts,
            ctx: &self.ctx,
            frame: &mut self.frame,
        }
        .load(param)
    }

    fn store(&mut self, param: Param, value: Value) {
        Slots {
            consts: &self.func.consts,
            ctx: &self.ctx,
            frame: &mut self.frame,
        }
        .store(param, value);
    }

    fn name(&self, index: u32) -> Rc<str> {
        debug_assert!(
            (index as usize) < self.func.names.len(),
            "name n{} outside table of {}",
            index,
            self.func.names.len()
        );
        Rc::clone(&self.func.names[index as usize])
    }

    fn nested(&self, index: u32) -> Rc<CompiledFunction> {
        debug_assert!(
            (index as usize) < self.func.funcs.len(),
            "function f{} outside table of {}",
            index,
            self.func.funcs.len()
        );
        Rc::clone(&self.func.funcs[index as usize])
    }

    fn argv(&self, args: u32, argc: u32) -> Vec<Value> {
        self.frame.window(args, argc).to_vec()
    }

    /// Transfer control; `field` is the position of the displacement field
    fn jump_to(&mut self, field: usize, offset: i32) {
        let target = field as i64 + i64::from(offset);
        debug_assert!(
            target >= 0 && target <= self.func.code.len() as i64,
            "jump target {} outside code of {}",
            target,
            self.func.code.len()
        );
        self.reader.seek(target as usize);
    }
}

/// The switch strategy's multiplexer, one arm per opcode
fn step_switch(m: &mut Machine<'_, '_>, opcode: Opcode) -> Result<Step, Fault> {
    match opcode {
        Opcode::MoveTemp => op_move_temp(m),
        Opcode::LoadValue => op_load_value(m),
        Opcode::LoadClosure => op_load_closure(m),
        Opcode::LoadThis => op_load_this(m),
        Opcode::LoadName => op_load_name(m),
        Opcode::StoreName => op_store_name(m),
        Opcode::LoadElement => op_load_element(m),
        Opcode::StoreElement => op_store_element(m),
        Opcode::LoadProperty => op_load_property(m),
        Opcode::StoreProperty => op_store_property(m),
        Opcode::Push => op_push(m),
        Opcode::Jump => op_jump(m),
        Opcode::CJump => op_cjump(m),
        Opcode::Ret => op_ret(m),
        Opcode::CallValue => op_call_value(m),
        Opcode::CallProperty => op_call_property(m),
        Opcode::CallElement => op_call_element(m),
        Opcode::CallActivationProperty => op_call_activation_property(m),
        Opcode::CreateValue => op_create_value(m),
        Opcode::CreateProperty => op_create_property(m),
        Opcode::CreateActivationProperty => op_create_activation_property(m),
        Opcode::Unop => op_unop(m),
        Opcode::Binop => op_binop(m),
        Opcode::InplaceElementOp => op_inplace_element(m),
        Opcode::InplaceMemberOp => op_inplace_member(m),
        Opcode::InplaceNameOp => op_inplace_name(m),
        Opcode::CallBuiltinThrow => op_throw(m),
        Opcode::CallBuiltinCreateExceptionHandler => op_create_exception_handler(m),
        Opcode::CallBuiltinDeleteExceptionHandler => op_delete_exception_handler(m),
        Opcode::CallBuiltinGetException => op_get_exception(m),
        Opcode::CallBuiltinPushScope => op_push_scope(m),
        Opcode::CallBuiltinPushCatchScope => op_push_catch_scope(m),
        Opcode::CallBuiltinPopScope => op_pop_scope(m),
        Opcode::CallBuiltinForeachIteratorObject => op_foreach_iterator_object(m),
        Opcode::CallBuiltinForeachNextPropertyName => op_foreach_next_property_name(m),
        Opcode::CallBuiltinDeleteMember => op_delete_member(m),
        Opcode::CallBuiltinDeleteSubscript => op_delete_subscript(m),
        Opcode::CallBuiltinDeleteName => op_delete_name(m),
        Opcode::CallBuiltinTypeofMember => op_typeof_member(m),
        Opcode::CallBuiltinTypeofSubscript => op_typeof_subscript(m),
        Opcode::CallBuiltinTypeofName => op_typeof_name(m),
        Opcode::CallBuiltinTypeofValue => op_typeof_value(m),
        Opcode::CallBuiltinPostIncMember => op_post_inc_member(m),
        Opcode::CallBuiltinPostIncSubscript => op_post_inc_subscript(m),
        Opcode::CallBuiltinPostIncName => op_post_inc_name(m),
        Opcode::CallBuiltinPostIncValue => op_post_inc_value(m),
        Opcode::CallBuiltinPostDecMember => op_post_dec_member(m),
        Opcode::CallBuiltinPostDecSubscript => op_post_dec_subscript(m),
        Opcode::CallBuiltinPostDecName => op_post_dec_name(m),
        Opcode::CallBuiltinPostDecValue => op_post_dec_value(m),
        Opcode::CallBuiltinDeclareVar => op_declare_var(m),
        Opcode::CallBuiltinDefineGetterSetter => op_define_getter_setter(m),
        Opcode::CallBuiltinDefineProperty => op_define_property(m),
        Opcode::CallBuiltinDefineArrayProperty => op_define_array_property(m),
    }
}

/// The jump-table strategy's handler table, indexed by the raw opcode byte
static JUMP_TABLE: Lazy<[OpHandler; 256]> = Lazy::new(|| {
    let mut table = [op_invalid as OpHandler; 256];
    table[Opcode::MoveTemp as usize] = op_move_temp;
    table[Opcode::LoadValue as usize] = op_load_value;
    table[Opcode::LoadClosure as usize] = op_load_closure;
    table[Opcode::LoadThis as usize] = op_load_this;
    table[Opcode::LoadName as usize] = op_load_name;
    table[Opcode::StoreName as usize] = op_store_name;
    table[Opcode::LoadElement as usize] = op_load_element;
    table[Opcode::StoreElement as usize] = op_store_element;
    table[Opcode::LoadProperty as usize] = op_load_property;
    table[Opcode::StoreProperty as usize] = op_store_property;
    table[Opcode::Push as usize] = op_push;
    table[Opcode::Jump as usize] = op_jump;
    table[Opcode::CJump as usize] = op_cjump;
    table[Opcode::Ret as usize] = op_ret;
    table[Opcode::CallValue as usize] = op_call_value;
    table[Opcode::CallProperty as usize] = op_call_property;
    table[Opcode::CallElement as usize] = op_call_element;
    table[Opcode::CallActivationProperty as usize] = op_call_activation_property;
    table[Opcode::CreateValue as usize] = op_create_value;
    table[Opcode::CreateProperty as usize] = op_create_property;
    table[Opcode::CreateActivationProperty as usize] = op_create_activation_property;
    table[Opcode::Unop as usize] = op_unop;
    table[Opcode::Binop as usize] = op_binop;
    table[Opcode::InplaceElementOp as usize] = op_inplace_element;
    table[Opcode::InplaceMemberOp as usize] = op_inplace_member;
    table[Opcode::InplaceNameOp as usize] = op_inplace_name;
    table[Opcode::CallBuiltinThrow as usize] = op_throw;
    table[Opcode::CallBuiltinCreateExceptionHandler as usize] = op_create_exception_handler;
    table[Opcode::CallBuiltinDeleteExceptionHandler as usize] = op_delete_exception_handler;
    table[Opcode::CallBuiltinGetException as usize] = op_get_exception;
    table[Opcode::CallBuiltinPushScope as usize] = op_push_scope;
    table[Opcode::CallBuiltinPushCatchScope as usize] = op_push_catch_scope;
    table[Opcode::CallBuiltinPopScope as usize] = op_pop_scope;
    table[Opcode::CallBuiltinForeachIteratorObject as usize] = op_foreach_iterator_object;
    table[Opcode::CallBuiltinForeachNextPropertyName as usize] = op_foreach_next_property_name;
    table[Opcode::CallBuiltinDeleteMember as usize] = op_delete_member;
    table[Opcode::CallBuiltinDeleteSubscript as usize] = op_delete_subscript;
    table[Opcode::CallBuiltinDeleteName as usize] = op_delete_name;
    table[Opcode::CallBuiltinTypeofMember as usize] = op_typeof_member;
    table[Opcode::CallBuiltinTypeofSubscript as usize] = op_typeof_subscript;
    table[Opcode::CallBuiltinTypeofName as usize] = op_typeof_name;
    table[Opcode::CallBuiltinTypeofValue as usize] = op_typeof_value;
    table[Opcode::CallBuiltinPostIncMember as usize] = op_post_inc_member;
    table[Opcode::CallBuiltinPostIncSubscript as usize] = op_post_inc_subscript;
    table[Opcode::CallBuiltinPostIncName as usize] = op_post_inc_name;
    table[Opcode::CallBuiltinPostIncValue as usize] = op_post_inc_value;
    table[Opcode::CallBuiltinPostDecMember as usize] = op_post_dec_member;
    table[Opcode::CallBuiltinPostDecSubscript as usize] = op_post_dec_subscript;
    table[Opcode::CallBuiltinPostDecName as usize] = op_post_dec_name;
    table[Opcode::CallBuiltinPostDecValue as usize] = op_post_dec_value;
    table[Opcode::CallBuiltinDeclareVar as usize] = op_declare_var;
    table[Opcode::CallBuiltinDefineGetterSetter as usize] = op_define_getter_setter;
    table[Opcode::CallBuiltinDefineProperty as usize] = op_define_property;
    table[Opcode::CallBuiltinDefineArrayProperty as usize] = op_define_array_property;
    table
});

/// Poisoned table entry for bytes that are not opcodes
fn op_invalid(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let at = m.reader.position().saturating_sub(1);
    let byte = m.func.code.get(at).copied().unwrap_or(0);
    Err(Fault::Fatal(VmError::InvalidOpcode(byte, at)))
}

// ===== Moves & literals =====

fn op_move_temp(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let source = m.read_param()?;
    let value = m.load(source);
    m.store(result, value);
    Ok(Step::Next)
}

fn op_load_value(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let value = m.read_param()?;
    let value = m.load(value);
    m.store(result, value);
    Ok(Step::Next)
}

fn op_load_closure(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let func = m.read_u32()?;
    let desc = m.nested(func);
    let ctx = m.ctx.clone();
    let value = m.prims.init_closure(&ctx, &desc)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_load_this(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let ctx = m.ctx.clone();
    let value = m.prims.this_object(&ctx)?;
    m.store(result, value);
    Ok(Step::Next)
}

// ===== Name, property and element access =====

fn op_load_name(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let name = m.read_u32()?;
    let name = m.name(name);
    let ctx = m.ctx.clone();
    let value = m.prims.get_activation_property(&ctx, &name)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_store_name(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let name = m.read_u32()?;
    let source = m.read_param()?;
    let name = m.name(name);
    let value = m.load(source);
    let ctx = m.ctx.clone();
    m.prims.set_activation_property(&ctx, &name, value)?;
    Ok(Step::Next)
}

fn op_load_element(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let index = m.read_param()?;
    let base = m.load(base);
    let index = m.load(index);
    let ctx = m.ctx.clone();
    let value = m.prims.get_element(&ctx, &base, &index)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_store_element(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let base = m.read_param()?;
    let index = m.read_param()?;
    let source = m.read_param()?;
    let base = m.load(base);
    let index = m.load(index);
    let value = m.load(source);
    let ctx = m.ctx.clone();
    m.prims.set_element(&ctx, &base, &index, value)?;
    Ok(Step::Next)
}

fn op_load_property(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let name = m.read_u32()?;
    let base = m.load(base);
    let name = m.name(name);
    let ctx = m.ctx.clone();
    let value = m.prims.get_property(&ctx, &base, &name)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_store_property(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let base = m.read_param()?;
    let name = m.read_u32()?;
    let source = m.read_param()?;
    let base = m.load(base);
    let name = m.name(name);
    let value = m.load(source);
    let ctx = m.ctx.clone();
    m.prims.set_property(&ctx, &base, &name, value)?;
    Ok(Step::Next)
}

// ===== Frame & control flow =====

fn op_push(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let size = m.read_u32()?;
    m.frame.resize(size as usize);
    Ok(Step::Next)
}

fn op_jump(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let field = m.reader.position();
    let offset = m.read_i32()?;
    m.jump_to(field, offset);
    Ok(Step::Next)
}

fn op_cjump(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let field = m.reader.position();
    let offset = m.read_i32()?;
    let condition = m.read_param()?;
    if m.load(condition).to_boolean() {
        m.jump_to(field, offset);
    }
    Ok(Step::Next)
}

fn op_ret(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    Ok(Step::Return(m.load(result)))
}

// ===== Calls =====

fn op_call_value(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let dest = m.read_param()?;
    let args = m.read_u32()?;
    let argc = m.read_u32()?;
    let callee = m.load(dest);
    let argv = m.argv(args, argc);
    let ctx = m.ctx.clone();
    let value = m.prims.call_value(&ctx, &callee, &argv)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_call_property(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let name = m.read_u32()?;
    let args = m.read_u32()?;
    let argc = m.read_u32()?;
    let base = m.load(base);
    let name = m.name(name);
    let argv = m.argv(args, argc);
    let ctx = m.ctx.clone();
    let value = m.prims.call_property(&ctx, &base, &name, &argv)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_call_element(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let index = m.read_param()?;
    let args = m.read_u32()?;
    let argc = m.read_u32()?;
    let base = m.load(base);
    let index = m.load(index);
    let argv = m.argv(args, argc);
    let ctx = m.ctx.clone();
    let value = m.prims.call_element(&ctx, &base, &index, &argv)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_call_activation_property(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let name = m.read_u32()?;
    let args = m.read_u32()?;
    let argc = m.read_u32()?;
    let name = m.name(name);
    let argv = m.argv(args, argc);
    let ctx = m.ctx.clone();
    let value = m.prims.call_activation_property(&ctx, &name, &argv)?;
    m.store(result, value);
    Ok(Step::Next)
}

// ===== Construction =====

fn op_create_value(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let func = m.read_param()?;
    let args = m.read_u32()?;
    let argc = m.read_u32()?;
    let func = m.load(func);
    let argv = m.argv(args, argc);
    let ctx = m.ctx.clone();
    let value = m.prims.construct_value(&ctx, &func, &argv)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_create_property(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let name = m.read_u32()?;
    let args = m.read_u32()?;
    let argc = m.read_u32()?;
    let base = m.load(base);
    let name = m.name(name);
    let argv = m.argv(args, argc);
    let ctx = m.ctx.clone();
    let value = m.prims.construct_property(&ctx, &base, &name, &argv)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_create_activation_property(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let name = m.read_u32()?;
    let args = m.read_u32()?;
    let argc = m.read_u32()?;
    let name = m.name(name);
    let argv = m.argv(args, argc);
    let ctx = m.ctx.clone();
    let value = m.prims.construct_activation_property(&ctx, &name, &argv)?;
    m.store(result, value);
    Ok(Step::Next)
}

// ===== Arithmetic & compound assignment =====

fn op_unop(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let alu = m.read_unary_op()?;
    let result = m.read_param()?;
    let source = m.read_param()?;
    let value = m.load(source);
    let ctx = m.ctx.clone();
    let value = m.prims.unop(&ctx, alu, &value)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_binop(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let alu = m.read_binary_op()?;
    let result = m.read_param()?;
    let lhs = m.read_param()?;
    let rhs = m.read_param()?;
    let lhs = m.load(lhs);
    let rhs = m.load(rhs);
    let ctx = m.ctx.clone();
    let value = m.prims.binop(&ctx, alu, &lhs, &rhs)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_inplace_element(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let alu = m.read_binary_op()?;
    let base = m.read_param()?;
    let index = m.read_param()?;
    let source = m.read_param()?;
    let base = m.load(base);
    let index = m.load(index);
    let value = m.load(source);
    let ctx = m.ctx.clone();
    m.prims.inplace_element(&ctx, alu, &base, &index, &value)?;
    Ok(Step::Next)
}

fn op_inplace_member(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let alu = m.read_binary_op()?;
    let base = m.read_param()?;
    let member = m.read_u32()?;
    let source = m.read_param()?;
    let base = m.load(base);
    let name = m.name(member);
    let value = m.load(source);
    let ctx = m.ctx.clone();
    m.prims.inplace_member(&ctx, alu, &base, &name, &value)?;
    Ok(Step::Next)
}

fn op_inplace_name(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let alu = m.read_binary_op()?;
    let name = m.read_u32()?;
    let source = m.read_param()?;
    let name = m.name(name);
    let value = m.load(source);
    let ctx = m.ctx.clone();
    m.prims.inplace_name(&ctx, alu, &name, &value)?;
    Ok(Step::Next)
}

// ===== Exceptions & scopes =====

fn op_throw(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let arg = m.read_param()?;
    let value = m.load(arg);
    let ctx = m.ctx.clone();
    Err(m.prims.throw(&ctx, value).into())
}

fn op_create_exception_handler(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    // The resume point is the offset just past this instruction; a later
    // throw lands there with the flag set instead.
    let resume = m.reader.position();
    m.ctx.push_handler(Handler {
        target: result,
        resume,
        scope: m.ctx.clone(),
    });
    m.store(result, Value::Bool(false));
    Ok(Step::Next)
}

fn op_delete_exception_handler(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    debug_assert!(
        m.ctx.handler_depth() > m.handler_base,
        "handler uninstall below the invocation's entry depth"
    );
    m.ctx.pop_handler();
    Ok(Step::Next)
}

fn op_get_exception(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let ctx = m.ctx.clone();
    let value = m.prims.get_exception(&ctx);
    m.store(result, value);
    Ok(Step::Next)
}

fn op_push_scope(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let arg = m.read_param()?;
    let subject = m.load(arg);
    let ctx = m.ctx.clone();
    m.ctx = m.prims.push_with_scope(&ctx, subject)?;
    Ok(Step::Next)
}

fn op_push_catch_scope(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let name = m.read_u32()?;
    let name = m.name(name);
    let ctx = m.ctx.clone();
    m.ctx = m.prims.push_catch_scope(&ctx, &name);
    Ok(Step::Next)
}

fn op_pop_scope(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let ctx = m.ctx.clone();
    m.ctx = m.prims.pop_scope(&ctx);
    Ok(Step::Next)
}

// ===== Property enumeration =====

fn op_foreach_iterator_object(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let arg = m.read_param()?;
    let value = m.load(arg);
    let ctx = m.ctx.clone();
    let iter = m.prims.foreach_iterator_object(&ctx, &value)?;
    m.store(result, iter);
    Ok(Step::Next)
}

fn op_foreach_next_property_name(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let arg = m.read_param()?;
    let iter = m.load(arg);
    let ctx = m.ctx.clone();
    let name = m.prims.foreach_next_property_name(&ctx, &iter)?;
    m.store(result, name);
    Ok(Step::Next)
}

// ===== Deletion =====

fn op_delete_member(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let member = m.read_u32()?;
    let base = m.load(base);
    let name = m.name(member);
    let ctx = m.ctx.clone();
    let value = m.prims.delete_member(&ctx, &base, &name)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_delete_subscript(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let index = m.read_param()?;
    let base = m.load(base);
    let index = m.load(index);
    let ctx = m.ctx.clone();
    let value = m.prims.delete_subscript(&ctx, &base, &index)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_delete_name(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let name = m.read_u32()?;
    let name = m.name(name);
    let ctx = m.ctx.clone();
    let value = m.prims.delete_name(&ctx, &name)?;
    m.store(result, value);
    Ok(Step::Next)
}

// ===== Typeof =====

fn op_typeof_member(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let member = m.read_u32()?;
    let base = m.load(base);
    let name = m.name(member);
    let ctx = m.ctx.clone();
    let value = m.prims.typeof_member(&ctx, &base, &name)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_typeof_subscript(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let index = m.read_param()?;
    let base = m.load(base);
    let index = m.load(index);
    let ctx = m.ctx.clone();
    let value = m.prims.typeof_subscript(&ctx, &base, &index)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_typeof_name(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let name = m.read_u32()?;
    let name = m.name(name);
    let ctx = m.ctx.clone();
    let value = m.prims.typeof_name(&ctx, &name)?;
    m.store(result, value);
    Ok(Step::Next)
}

fn op_typeof_value(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let value = m.read_param()?;
    let value = m.load(value);
    let ctx = m.ctx.clone();
    let value = m.prims.typeof_value(&ctx, &value)?;
    m.store(result, value);
    Ok(Step::Next)
}

// ===== Postfix increment / decrement =====

fn op_post_inc_member(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let member = m.read_u32()?;
    let base = m.load(base);
    let name = m.name(member);
    let ctx = m.ctx.clone();
    let old = m.prims.post_increment_member(&ctx, &base, &name)?;
    m.store(result, old);
    Ok(Step::Next)
}

fn op_post_inc_subscript(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let index = m.read_param()?;
    let base = m.load(base);
    let index = m.load(index);
    let ctx = m.ctx.clone();
    let old = m.prims.post_increment_subscript(&ctx, &base, &index)?;
    m.store(result, old);
    Ok(Step::Next)
}

fn op_post_inc_name(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let name = m.read_u32()?;
    let name = m.name(name);
    let ctx = m.ctx.clone();
    let old = m.prims.post_increment_name(&ctx, &name)?;
    m.store(result, old);
    Ok(Step::Next)
}

fn op_post_inc_value(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let value = m.read_param()?;
    let current = m.load(value);
    let ctx = m.ctx.clone();
    let (old, new) = m.prims.post_increment(&ctx, &current)?;
    m.store(value, new);
    m.store(result, old);
    Ok(Step::Next)
}

fn op_post_dec_member(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let member = m.read_u32()?;
    let base = m.load(base);
    let name = m.name(member);
    let ctx = m.ctx.clone();
    let old = m.prims.post_decrement_member(&ctx, &base, &name)?;
    m.store(result, old);
    Ok(Step::Next)
}

fn op_post_dec_subscript(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let base = m.read_param()?;
    let index = m.read_param()?;
    let base = m.load(base);
    let index = m.load(index);
    let ctx = m.ctx.clone();
    let old = m.prims.post_decrement_subscript(&ctx, &base, &index)?;
    m.store(result, old);
    Ok(Step::Next)
}

fn op_post_dec_name(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let name = m.read_u32()?;
    let name = m.name(name);
    let ctx = m.ctx.clone();
    let old = m.prims.post_decrement_name(&ctx, &name)?;
    m.store(result, old);
    Ok(Step::Next)
}

fn op_post_dec_value(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let result = m.read_param()?;
    let value = m.read_param()?;
    let current = m.load(value);
    let ctx = m.ctx.clone();
    let (old, new) = m.prims.post_decrement(&ctx, &current)?;
    m.store(value, new);
    m.store(result, old);
    Ok(Step::Next)
}

// ===== Declarations & property definition =====

fn op_declare_var(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let deletable = m.read_u8()? != 0;
    let name = m.read_u32()?;
    let name = m.name(name);
    let ctx = m.ctx.clone();
    m.prims.declare_var(&ctx, deletable, &name)?;
    Ok(Step::Next)
}

fn op_define_getter_setter(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let object = m.read_param()?;
    let name = m.read_u32()?;
    let getter = m.read_param()?;
    let setter = m.read_param()?;
    let object = m.load(object);
    let name = m.name(name);
    let getter = m.load(getter);
    let setter = m.load(setter);
    let ctx = m.ctx.clone();
    m.prims
        .define_getter_setter(&ctx, &object, &name, getter, setter)?;
    Ok(Step::Next)
}

fn op_define_property(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let object = m.read_param()?;
    let name = m.read_u32()?;
    let value = m.read_param()?;
    let object = m.load(object);
    let name = m.name(name);
    let value = m.load(value);
    let ctx = m.ctx.clone();
    m.prims.define_property(&ctx, &object, &name, value)?;
    Ok(Step::Next)
}

fn op_define_array_property(m: &mut Machine<'_, '_>) -> Result<Step, Fault> {
    let object = m.read_param()?;
    let index = m.read_u32()?;
    let value = m.read_param()?;
    let object = m.load(object);
    let value = m.load(value);
    let ctx = m.ctx.clone();
    m.prims.define_array_property(&ctx, &object, index, value)?;
    Ok(Step::Next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::StdRuntime;
    use vireo_bytecode::{BinaryOp, FunctionBuilder, Instr};

    fn add_unit() -> vireo_bytecode::CodeUnit {
        let mut b = FunctionBuilder::new("add", 0, 0);
        b.emit(Instr::Push { size: 3 });
        let ten = b.number(10.0);
        let twenty = b.number(20.0);
        b.emit(Instr::LoadValue {
            result: Param::Temp(0),
            value: ten,
        });
        b.emit(Instr::LoadValue {
            result: Param::Temp(1),
            value: twenty,
        });
        b.emit(Instr::Binop {
            alu: BinaryOp::Add,
            result: Param::Temp(2),
            lhs: Param::Temp(0),
            rhs: Param::Temp(1),
        });
        b.emit(Instr::Ret {
            result: Param::Temp(2),
        });
        b.finish()
    }

    fn run(unit: &vireo_bytecode::CodeUnit, mode: DispatchMode) -> VmResult<Value> {
        let func = CompiledFunction::from_unit(unit);
        let ctx = ExecutionContext::new(Value::Undefined, vec![], 0);
        let mut runtime = StdRuntime::new(mode);
        execute(&func, ctx, &mut runtime, mode)
    }

    #[test]
    fn test_both_modes_agree_on_simple_stream() {
        let unit = add_unit();
        assert_eq!(run(&unit, DispatchMode::Switch).unwrap(), Value::Number(30.0));
        assert_eq!(
            run(&unit, DispatchMode::JumpTable).unwrap(),
            Value::Number(30.0)
        );
    }

    #[test]
    fn test_invalid_opcode_is_fatal_in_both_modes() {
        let mut unit = FunctionBuilder::new("broken", 0, 0).finish();
        unit.code = vec![0xEE];
        for mode in [DispatchMode::Switch, DispatchMode::JumpTable] {
            match run(&unit, mode) {
                Err(VmError::InvalidOpcode(0xEE, 0)) => {}
                other => panic!("expected fatal invalid opcode, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_running_off_end_is_fatal() {
        let mut b = FunctionBuilder::new("no_ret", 0, 0);
        b.emit(Instr::Push { size: 1 });
        let unit = b.finish();
        for mode in [DispatchMode::Switch, DispatchMode::JumpTable] {
            assert!(matches!(run(&unit, mode), Err(VmError::RanOffEnd(_))));
        }
    }

    #[test]
    fn test_unhandled_throw_surfaces_value() {
        let mut b = FunctionBuilder::new("thrower", 0, 0);
        b.emit(Instr::Push { size: 1 });
        let payload = b.number(7.0);
        b.emit(Instr::LoadValue {
            result: Param::Temp(0),
            value: payload,
        });
        b.emit(Instr::CallBuiltinThrow {
            arg: Param::Temp(0),
        });
        let unit = b.finish();
        match run(&unit, DispatchMode::Switch) {
            Err(VmError::Unhandled(value)) => assert_eq!(value, Value::Number(7.0)),
            other => panic!("expected unhandled exception, got {other:?}"),
        }
    }
}
