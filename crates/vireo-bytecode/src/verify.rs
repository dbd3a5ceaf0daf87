//! Static bytecode verification
//!
//! The dispatch loop trusts the compiler: it does not re-validate operand
//! ranges on every instruction. This verifier is the other half of that
//! contract — it walks a unit's instruction stream once and rejects the
//! encodings the loop is entitled to assume never occur: invalid opcodes
//! or operand tags, jumps that do not land on instruction boundaries,
//! temp registers outside the frame declared by `Push`, call argument
//! windows outside the frame, out-of-range pool indices, and writes
//! addressed at the constant pool.

use std::collections::HashSet;

use crate::encoder::BytecodeReader;
use crate::instr::Instr;
use crate::param::Param;
use crate::unit::CodeUnit;
use thiserror::Error;

/// Bytecode verification errors
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Malformed instruction encoding
    #[error("Decode error in `{unit}`: {source}")]
    Decode {
        /// Unit name
        unit: String,
        /// Underlying decode failure
        source: crate::encoder::DecodeError,
    },

    /// Jump does not land on an instruction boundary
    #[error("Invalid jump target {target} at offset {offset} in `{unit}`")]
    InvalidJumpTarget {
        /// Unit name
        unit: String,
        /// Computed absolute target
        target: i64,
        /// Offset of the jump instruction
        offset: usize,
    },

    /// Temp register used before any `Push` declared the frame
    #[error("Temp register used before Push at offset {offset} in `{unit}`")]
    TempBeforePush {
        /// Unit name
        unit: String,
        /// Offset of the offending instruction
        offset: usize,
    },

    /// Temp register outside the declared frame
    #[error("Temp t{index} outside frame of {frame_size} at offset {offset} in `{unit}`")]
    TempOutOfRange {
        /// Unit name
        unit: String,
        /// Register index
        index: u32,
        /// Declared frame size
        frame_size: u32,
        /// Offset of the offending instruction
        offset: usize,
    },

    /// Argument index outside the declared arity
    #[error("Arg a{index} outside arity {max} at offset {offset} in `{unit}`")]
    ArgOutOfRange {
        /// Unit name
        unit: String,
        /// Argument index
        index: u32,
        /// Declared arity
        max: u32,
        /// Offset of the offending instruction
        offset: usize,
    },

    /// Local index outside the declared local count
    #[error("Local l{index} outside {max} locals at offset {offset} in `{unit}`")]
    LocalOutOfRange {
        /// Unit name
        unit: String,
        /// Local index
        index: u32,
        /// Declared local count
        max: u32,
        /// Offset of the offending instruction
        offset: usize,
    },

    /// Constant-pool index out of range
    #[error("Constant c{index} outside pool of {max} at offset {offset} in `{unit}`")]
    ConstOutOfRange {
        /// Unit name
        unit: String,
        /// Pool index
        index: u32,
        /// Pool size
        max: u32,
        /// Offset of the offending instruction
        offset: usize,
    },

    /// Write addressed at the constant pool
    #[error("Write to constant c{index} at offset {offset} in `{unit}`")]
    WriteToConst {
        /// Unit name
        unit: String,
        /// Pool index
        index: u32,
        /// Offset of the offending instruction
        offset: usize,
    },

    /// Name-table index out of range
    #[error("Name {index} outside table of {max} at offset {offset} in `{unit}`")]
    NameOutOfRange {
        /// Unit name
        unit: String,
        /// Table index
        index: u32,
        /// Table size
        max: u32,
        /// Offset of the offending instruction
        offset: usize,
    },

    /// Function-table index out of range
    #[error("Function {index} outside table of {max} at offset {offset} in `{unit}`")]
    FuncOutOfRange {
        /// Unit name
        unit: String,
        /// Table index
        index: u32,
        /// Table size
        max: u32,
        /// Offset of the offending instruction
        offset: usize,
    },

    /// Call argument window outside the declared frame
    #[error(
        "Call window [{args}, {args}+{argc}) outside frame of {frame_size} at offset {offset} in `{unit}`"
    )]
    CallWindowOutOfRange {
        /// Unit name
        unit: String,
        /// First argument register
        args: u32,
        /// Argument count
        argc: u32,
        /// Declared frame size
        frame_size: u32,
        /// Offset of the offending instruction
        offset: usize,
    },

    /// Execution can fall off the end of the stream
    #[error("Execution falls off end of `{unit}`")]
    FallOffEnd {
        /// Unit name
        unit: String,
    },
}

/// Operand summary for one instruction, used by the range checks
#[derive(Default)]
struct Operands {
    reads: Vec<Param>,
    writes: Vec<Param>,
    names: Vec<u32>,
    window: Option<(u32, u32)>,
    func: Option<u32>,
}

fn operands(instr: &Instr) -> Operands {
    let mut o = Operands::default();
    match *instr {
        Instr::MoveTemp { result, source } => {
            o.writes.push(result);
            o.reads.push(source);
        }
        Instr::LoadValue { result, value } => {
            o.writes.push(result);
            o.reads.push(value);
        }
        Instr::LoadClosure { result, func } => {
            o.writes.push(result);
            o.func = Some(func);
        }
        Instr::LoadThis { result } => o.writes.push(result),
        Instr::LoadName { result, name } => {
            o.writes.push(result);
            o.names.push(name);
        }
        Instr::StoreName { name, source } => {
            o.names.push(name);
            o.reads.push(source);
        }
        Instr::LoadElement {
            result,
            base,
            index,
        } => {
            o.writes.push(result);
            o.reads.push(base);
            o.reads.push(index);
        }
        Instr::StoreElement {
            base,
            index,
            source,
        } => {
            o.reads.push(base);
            o.reads.push(index);
            o.reads.push(source);
        }
        Instr::LoadProperty { result, base, name } => {
            o.writes.push(result);
            o.reads.push(base);
            o.names.push(name);
        }
        Instr::StoreProperty { base, name, source } => {
            o.reads.push(base);
            o.names.push(name);
            o.reads.push(source);
        }
        Instr::Push { .. } | Instr::Jump { .. } => {}
        Instr::CJump { condition, .. } => o.reads.push(condition),
        Instr::Ret { result } => o.reads.push(result),
        Instr::CallValue {
            result,
            dest,
            args,
            argc,
        } => {
            o.writes.push(result);
            o.reads.push(dest);
            o.window = Some((args, argc));
        }
        Instr::CallProperty {
            result,
            base,
            name,
            args,
            argc,
        } => {
            o.writes.push(result);
            o.reads.push(base);
            o.names.push(name);
            o.window = Some((args, argc));
        }
        Instr::CallElement {
            result,
            base,
            index,
            args,
            argc,
        } => {
            o.writes.push(result);
            o.reads.push(base);
            o.reads.push(index);
            o.window = Some((args, argc));
        }
        Instr::CallActivationProperty {
            result,
            name,
            args,
            argc,
        } => {
            o.writes.push(result);
            o.names.push(name);
            o.window = Some((args, argc));
        }
        Instr::CreateValue {
            result,
            func,
            args,
            argc,
        } => {
            o.writes.push(result);
            o.reads.push(func);
            o.window = Some((args, argc));
        }
        Instr::CreateProperty {
            result,
            base,
            name,
            args,
            argc,
        } => {
            o.writes.push(result);
            o.reads.push(base);
            o.names.push(name);
            o.window = Some((args, argc));
        }
        Instr::CreateActivationProperty {
            result,
            name,
            args,
            argc,
        } => {
            o.writes.push(result);
            o.names.push(name);
            o.window = Some((args, argc));
        }
        Instr::Unop { result, source, .. } => {
            o.writes.push(result);
            o.reads.push(source);
        }
        Instr::Binop {
            result, lhs, rhs, ..
        } => {
            o.writes.push(result);
            o.reads.push(lhs);
            o.reads.push(rhs);
        }
        Instr::InplaceElementOp {
            base,
            index,
            source,
            ..
        } => {
            o.reads.push(base);
            o.reads.push(index);
            o.reads.push(source);
        }
        Instr::InplaceMemberOp {
            base,
            member,
            source,
            ..
        } => {
            o.reads.push(base);
            o.names.push(member);
            o.reads.push(source);
        }
        Instr::InplaceNameOp { name, source, .. } => {
            o.names.push(name);
            o.reads.push(source);
        }
        Instr::CallBuiltinThrow { arg } | Instr::CallBuiltinPushScope { arg } => {
            o.reads.push(arg)
        }
        Instr::CallBuiltinCreateExceptionHandler { result }
        | Instr::CallBuiltinGetException { result } => o.writes.push(result),
        Instr::CallBuiltinDeleteExceptionHandler | Instr::CallBuiltinPopScope => {}
        Instr::CallBuiltinPushCatchScope { name } => o.names.push(name),
        Instr::CallBuiltinForeachIteratorObject { result, arg }
        | Instr::CallBuiltinForeachNextPropertyName { result, arg } => {
            o.writes.push(result);
            o.reads.push(arg);
        }
        Instr::CallBuiltinDeleteMember {
            result,
            base,
            member,
        }
        | Instr::CallBuiltinTypeofMember {
            result,
            base,
            member,
        }
        | Instr::CallBuiltinPostIncMember {
            result,
            base,
            member,
        }
        | Instr::CallBuiltinPostDecMember {
            result,
            base,
            member,
        } => {
            o.writes.push(result);
            o.reads.push(base);
            o.names.push(member);
        }
        Instr::CallBuiltinDeleteSubscript {
            result,
            base,
            index,
        }
        | Instr::CallBuiltinTypeofSubscript {
            result,
            base,
            index,
        }
        | Instr::CallBuiltinPostIncSubscript {
            result,
            base,
            index,
        }
        | Instr::CallBuiltinPostDecSubscript {
            result,
            base,
            index,
        } => {
            o.writes.push(result);
            o.reads.push(base);
            o.reads.push(index);
        }
        Instr::CallBuiltinDeleteName { result, name }
        | Instr::CallBuiltinTypeofName { result, name }
        | Instr::CallBuiltinPostIncName { result, name }
        | Instr::CallBuiltinPostDecName { result, name } => {
            o.writes.push(result);
            o.names.push(name);
        }
        Instr::CallBuiltinTypeofValue { result, value } => {
            o.writes.push(result);
            o.reads.push(value);
        }
        Instr::CallBuiltinPostIncValue { result, value }
        | Instr::CallBuiltinPostDecValue { result, value } => {
            o.writes.push(result);
            // The slot is read and written back
            o.writes.push(value);
        }
        Instr::CallBuiltinDeclareVar { name, .. } => o.names.push(name),
        Instr::CallBuiltinDefineGetterSetter {
            object,
            name,
            getter,
            setter,
        } => {
            o.reads.push(object);
            o.names.push(name);
            o.reads.push(getter);
            o.reads.push(setter);
        }
        Instr::CallBuiltinDefineProperty {
            object,
            name,
            value,
        } => {
            o.reads.push(object);
            o.names.push(name);
            o.reads.push(value);
        }
        Instr::CallBuiltinDefineArrayProperty { object, value, .. } => {
            o.reads.push(object);
            o.reads.push(value);
        }
    }
    o
}

/// Verify a unit and, recursively, its nested functions
pub fn verify_unit(unit: &CodeUnit) -> Result<(), VerifyError> {
    verify_code(unit)?;
    for func in &unit.funcs {
        verify_unit(func)?;
    }
    Ok(())
}

fn verify_code(unit: &CodeUnit) -> Result<(), VerifyError> {
    // Empty units are allowed
    if unit.code.is_empty() {
        return Ok(());
    }
    let name = unit.meta.name.clone();

    // Pass 1: decode every instruction, collecting boundaries
    let mut reader = BytecodeReader::new(&unit.code);
    let mut instrs: Vec<(usize, Instr)> = Vec::new();
    let mut boundaries: HashSet<usize> = HashSet::new();
    while reader.has_more() {
        let offset = reader.position();
        boundaries.insert(offset);
        let instr = Instr::decode(&mut reader).map_err(|source| VerifyError::Decode {
            unit: name.clone(),
            source,
        })?;
        instrs.push((offset, instr));
    }

    // Pass 2: range checks, tracking the frame size declared by Push
    let mut frame_size: Option<u32> = None;
    for (offset, instr) in &instrs {
        let offset = *offset;
        if let Instr::Push { size } = instr {
            frame_size = Some(*size);
        }

        // Jump targets must land on an instruction boundary
        match instr {
            Instr::Jump { offset: disp } | Instr::CJump { offset: disp, .. } => {
                let field = offset as i64 + 1;
                let target = field + *disp as i64;
                if target < 0 || !boundaries.contains(&(target as usize)) {
                    return Err(VerifyError::InvalidJumpTarget {
                        unit: name,
                        target,
                        offset,
                    });
                }
            }
            _ => {}
        }

        let ops = operands(instr);
        for param in ops.reads.iter().chain(ops.writes.iter()) {
            check_param(unit, &name, *param, frame_size, offset)?;
        }
        for param in &ops.writes {
            if let Param::Const(index) = param {
                return Err(VerifyError::WriteToConst {
                    unit: name,
                    index: *index,
                    offset,
                });
            }
        }
        for name_index in &ops.names {
            if *name_index as usize >= unit.names.len() {
                return Err(VerifyError::NameOutOfRange {
                    unit: name,
                    index: *name_index,
                    max: unit.names.len() as u32,
                    offset,
                });
            }
        }
        if let Some(func) = ops.func {
            if func as usize >= unit.funcs.len() {
                return Err(VerifyError::FuncOutOfRange {
                    unit: name,
                    index: func,
                    max: unit.funcs.len() as u32,
                    offset,
                });
            }
        }
        if let Some((args, argc)) = ops.window {
            let size = frame_size.ok_or_else(|| VerifyError::TempBeforePush {
                unit: name.clone(),
                offset,
            })?;
            if args as u64 + argc as u64 > size as u64 {
                return Err(VerifyError::CallWindowOutOfRange {
                    unit: name,
                    args,
                    argc,
                    frame_size: size,
                    offset,
                });
            }
        }
    }

    // The stream must not run off its end; CJump falls through
    match instrs.last() {
        Some((_, last)) if last.opcode().is_terminator() && !matches!(last, Instr::CJump { .. }) => {
            Ok(())
        }
        _ => Err(VerifyError::FallOffEnd { unit: name }),
    }
}

fn check_param(
    unit: &CodeUnit,
    name: &str,
    param: Param,
    frame_size: Option<u32>,
    offset: usize,
) -> Result<(), VerifyError> {
    match param {
        Param::Const(index) => {
            if index as usize >= unit.consts.len() {
                return Err(VerifyError::ConstOutOfRange {
                    unit: name.to_string(),
                    index,
                    max: unit.consts.len() as u32,
                    offset,
                });
            }
        }
        Param::Arg(index) => {
            if index >= unit.arg_count {
                return Err(VerifyError::ArgOutOfRange {
                    unit: name.to_string(),
                    index,
                    max: unit.arg_count,
                    offset,
                });
            }
        }
        Param::Local(index) => {
            if index >= unit.local_count {
                return Err(VerifyError::LocalOutOfRange {
                    unit: name.to_string(),
                    index,
                    max: unit.local_count,
                    offset,
                });
            }
        }
        Param::Temp(index) => match frame_size {
            None => {
                return Err(VerifyError::TempBeforePush {
                    unit: name.to_string(),
                    offset,
                })
            }
            Some(size) if index >= size => {
                return Err(VerifyError::TempOutOfRange {
                    unit: name.to_string(),
                    index,
                    frame_size: size,
                    offset,
                });
            }
            Some(_) => {}
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBuilder;
    use crate::unit::Constant;

    fn trivial_unit() -> CodeUnit {
        let mut b = FunctionBuilder::new("f", 0, 0);
        let t0 = Param::Temp(0);
        b.emit(Instr::Push { size: 1 });
        let ten = b.number(10.0);
        b.emit(Instr::LoadValue {
            result: t0,
            value: ten,
        });
        b.emit(Instr::Ret { result: t0 });
        b.finish()
    }

    #[test]
    fn test_accepts_trivial_unit() {
        assert!(verify_unit(&trivial_unit()).is_ok());
    }

    #[test]
    fn test_rejects_temp_before_push() {
        let mut b = FunctionBuilder::new("f", 0, 0);
        b.emit(Instr::Ret {
            result: Param::Temp(0),
        });
        let unit = b.finish();
        assert!(matches!(
            verify_unit(&unit),
            Err(VerifyError::TempBeforePush { .. })
        ));
    }

    #[test]
    fn test_rejects_temp_out_of_range() {
        let mut b = FunctionBuilder::new("f", 0, 0);
        b.emit(Instr::Push { size: 2 });
        b.emit(Instr::Ret {
            result: Param::Temp(2),
        });
        let unit = b.finish();
        assert!(matches!(
            verify_unit(&unit),
            Err(VerifyError::TempOutOfRange {
                index: 2,
                frame_size: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_arg_and_local_out_of_range() {
        let mut b = FunctionBuilder::new("f", 1, 1);
        b.emit(Instr::Push { size: 1 });
        b.emit(Instr::Ret {
            result: Param::Arg(1),
        });
        assert!(matches!(
            verify_unit(&b.finish()),
            Err(VerifyError::ArgOutOfRange { index: 1, max: 1, .. })
        ));

        let mut b = FunctionBuilder::new("f", 1, 1);
        b.emit(Instr::Push { size: 1 });
        b.emit(Instr::Ret {
            result: Param::Local(3),
        });
        assert!(matches!(
            verify_unit(&b.finish()),
            Err(VerifyError::LocalOutOfRange { index: 3, max: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_const_out_of_range_and_write() {
        let mut b = FunctionBuilder::new("f", 0, 0);
        b.emit(Instr::Push { size: 1 });
        b.emit(Instr::LoadValue {
            result: Param::Temp(0),
            value: Param::Const(0),
        });
        b.emit(Instr::Ret {
            result: Param::Temp(0),
        });
        assert!(matches!(
            verify_unit(&b.finish()),
            Err(VerifyError::ConstOutOfRange { index: 0, max: 0, .. })
        ));

        let mut b = FunctionBuilder::new("f", 0, 0);
        b.emit(Instr::Push { size: 1 });
        let zero = b.constant(Constant::Number(0.0));
        b.emit(Instr::MoveTemp {
            result: zero,
            source: Param::Temp(0),
        });
        b.emit(Instr::Ret {
            result: Param::Temp(0),
        });
        assert!(matches!(
            verify_unit(&b.finish()),
            Err(VerifyError::WriteToConst { index: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_jump_target() {
        let mut b = FunctionBuilder::new("f", 0, 0);
        b.emit(Instr::Push { size: 1 });
        // Jump into the middle of the following Ret encoding
        b.emit(Instr::Jump { offset: 6 });
        b.emit(Instr::Ret {
            result: Param::Temp(0),
        });
        assert!(matches!(
            verify_unit(&b.finish()),
            Err(VerifyError::InvalidJumpTarget { .. })
        ));
    }

    #[test]
    fn test_rejects_call_window_outside_frame() {
        let mut b = FunctionBuilder::new("f", 0, 0);
        b.emit(Instr::Push { size: 2 });
        b.emit(Instr::CallValue {
            result: Param::Temp(0),
            dest: Param::Temp(1),
            args: 1,
            argc: 4,
        });
        b.emit(Instr::Ret {
            result: Param::Temp(0),
        });
        assert!(matches!(
            verify_unit(&b.finish()),
            Err(VerifyError::CallWindowOutOfRange {
                args: 1,
                argc: 4,
                frame_size: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_fall_off_end() {
        let mut b = FunctionBuilder::new("f", 0, 0);
        b.emit(Instr::Push { size: 1 });
        let unit = b.finish();
        assert!(matches!(
            verify_unit(&unit),
            Err(VerifyError::FallOffEnd { .. })
        ));
    }

    #[test]
    fn test_rejects_name_out_of_range() {
        let mut b = FunctionBuilder::new("f", 0, 0);
        b.emit(Instr::Push { size: 1 });
        b.emit(Instr::LoadName {
            result: Param::Temp(0),
            name: 7,
        });
        b.emit(Instr::Ret {
            result: Param::Temp(0),
        });
        assert!(matches!(
            verify_unit(&b.finish()),
            Err(VerifyError::NameOutOfRange { index: 7, .. })
        ));
    }

    #[test]
    fn test_verifies_nested_functions() {
        let mut inner = FunctionBuilder::new("inner", 0, 0);
        inner.emit(Instr::Ret {
            result: Param::Temp(0),
        });
        let mut b = FunctionBuilder::new("outer", 0, 0);
        b.emit(Instr::Push { size: 1 });
        let idx = b.function(inner.finish());
        b.emit(Instr::LoadClosure {
            result: Param::Temp(0),
            func: idx,
        });
        b.emit(Instr::Ret {
            result: Param::Temp(0),
        });
        // Inner unit uses a temp with no Push
        assert!(matches!(
            verify_unit(&b.finish()),
            Err(VerifyError::TempBeforePush { .. })
        ));
    }
}
