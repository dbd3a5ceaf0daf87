//! Instruction stream disassembly
//!
//! Renders one mnemonic per line with decoded operands, the form the
//! engine's trace output and the test suites read.

use std::fmt::Write as _;

use crate::encoder::{BytecodeReader, DecodeError};
use crate::instr::Instr;
use crate::unit::CodeUnit;

/// Disassemble a unit's instruction stream
///
/// Each line is `offset: MNEMONIC operands`. Name-table operands render
/// with the resolved name when in range.
pub fn disassemble(unit: &CodeUnit) -> Result<String, DecodeError> {
    let mut out = String::new();
    let mut reader = BytecodeReader::new(&unit.code);
    while reader.has_more() {
        let offset = reader.position();
        let instr = Instr::decode(&mut reader)?;
        let _ = writeln!(out, "{:6}: {}", offset, render(unit, &instr));
    }
    Ok(out)
}

fn name_of(unit: &CodeUnit, index: u32) -> String {
    match unit.names.get(index as usize) {
        Some(name) => format!("{:?}", name),
        None => format!("name#{}", index),
    }
}

fn render(unit: &CodeUnit, instr: &Instr) -> String {
    let op = instr.opcode().name();
    match *instr {
        Instr::MoveTemp { result, source } => format!("{} {}, {}", op, result, source),
        Instr::LoadValue { result, value } => format!("{} {}, {}", op, result, value),
        Instr::LoadClosure { result, func } => format!("{} {}, func#{}", op, result, func),
        Instr::LoadThis { result } => format!("{} {}", op, result),
        Instr::LoadName { result, name } => {
            format!("{} {}, {}", op, result, name_of(unit, name))
        }
        Instr::StoreName { name, source } => {
            format!("{} {}, {}", op, name_of(unit, name), source)
        }
        Instr::LoadElement {
            result,
            base,
            index,
        } => format!("{} {}, {}[{}]", op, result, base, index),
        Instr::StoreElement {
            base,
            index,
            source,
        } => format!("{} {}[{}], {}", op, base, index, source),
        Instr::LoadProperty { result, base, name } => {
            format!("{} {}, {}.{}", op, result, base, name_of(unit, name))
        }
        Instr::StoreProperty { base, name, source } => {
            format!("{} {}.{}, {}", op, base, name_of(unit, name), source)
        }
        Instr::Push { size } => format!("{} {}", op, size),
        Instr::Jump { offset } => format!("{} {:+}", op, offset),
        Instr::CJump { offset, condition } => format!("{} {:+}, {}", op, offset, condition),
        Instr::Ret { result } => format!("{} {}", op, result),
        Instr::CallValue {
            result,
            dest,
            args,
            argc,
        } => format!("{} {}, {}, t{}..+{}", op, result, dest, args, argc),
        Instr::CallProperty {
            result,
            base,
            name,
            args,
            argc,
        } => format!(
            "{} {}, {}.{}, t{}..+{}",
            op,
            result,
            base,
            name_of(unit, name),
            args,
            argc
        ),
        Instr::CallElement {
            result,
            base,
            index,
            args,
            argc,
        } => format!("{} {}, {}[{}], t{}..+{}", op, result, base, index, args, argc),
        Instr::CallActivationProperty {
            result,
            name,
            args,
            argc,
        } => format!(
            "{} {}, {}, t{}..+{}",
            op,
            result,
            name_of(unit, name),
            args,
            argc
        ),
        Instr::CreateValue {
            result,
            func,
            args,
            argc,
        } => format!("{} {}, {}, t{}..+{}", op, result, func, args, argc),
        Instr::CreateProperty {
            result,
            base,
            name,
            args,
            argc,
        } => format!(
            "{} {}, {}.{}, t{}..+{}",
            op,
            result,
            base,
            name_of(unit, name),
            args,
            argc
        ),
        Instr::CreateActivationProperty {
            result,
            name,
            args,
            argc,
        } => format!(
            "{} {}, {}, t{}..+{}",
            op,
            result,
            name_of(unit, name),
            args,
            argc
        ),
        Instr::Unop {
            alu,
            result,
            source,
        } => format!("{} {} {}, {}", op, alu.name(), result, source),
        Instr::Binop {
            alu,
            result,
            lhs,
            rhs,
        } => format!("{} {} {}, {}, {}", op, alu.name(), result, lhs, rhs),
        Instr::InplaceElementOp {
            alu,
            base,
            index,
            source,
        } => format!("{} {} {}[{}], {}", op, alu.name(), base, index, source),
        Instr::InplaceMemberOp {
            alu,
            base,
            member,
            source,
        } => format!(
            "{} {} {}.{}, {}",
            op,
            alu.name(),
            base,
            name_of(unit, member),
            source
        ),
        Instr::InplaceNameOp { alu, name, source } => {
            format!("{} {} {}, {}", op, alu.name(), name_of(unit, name), source)
        }
        Instr::CallBuiltinThrow { arg } | Instr::CallBuiltinPushScope { arg } => {
            format!("{} {}", op, arg)
        }
        Instr::CallBuiltinCreateExceptionHandler { result }
        | Instr::CallBuiltinGetException { result } => format!("{} {}", op, result),
        Instr::CallBuiltinDeleteExceptionHandler | Instr::CallBuiltinPopScope => op.to_string(),
        Instr::CallBuiltinPushCatchScope { name } => {
            format!("{} {}", op, name_of(unit, name))
        }
        Instr::CallBuiltinForeachIteratorObject { result, arg }
        | Instr::CallBuiltinForeachNextPropertyName { result, arg } => {
            format!("{} {}, {}", op, result, arg)
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
        } => format!("{} {}, {}.{}", op, result, base, name_of(unit, member)),
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
        } => format!("{} {}, {}[{}]", op, result, base, index),
        Instr::CallBuiltinDeleteName { result, name }
        | Instr::CallBuiltinTypeofName { result, name }
        | Instr::CallBuiltinPostIncName { result, name }
        | Instr::CallBuiltinPostDecName { result, name } => {
            format!("{} {}, {}", op, result, name_of(unit, name))
        }
        Instr::CallBuiltinTypeofValue { result, value }
        | Instr::CallBuiltinPostIncValue { result, value }
        | Instr::CallBuiltinPostDecValue { result, value } => {
            format!("{} {}, {}", op, result, value)
        }
        Instr::CallBuiltinDeclareVar { deletable, name } => {
            format!("{} {} deletable={}", op, name_of(unit, name), deletable)
        }
        Instr::CallBuiltinDefineGetterSetter {
            object,
            name,
            getter,
            setter,
        } => format!(
            "{} {}.{}, get={}, set={}",
            op,
            object,
            name_of(unit, name),
            getter,
            setter
        ),
        Instr::CallBuiltinDefineProperty {
            object,
            name,
            value,
        } => format!("{} {}.{}, {}", op, object, name_of(unit, name), value),
        Instr::CallBuiltinDefineArrayProperty {
            object,
            index,
            value,
        } => format!("{} {}[{}], {}", op, object, index, value),
    }
}
