//! Decoded instruction representation
//!
//! [`Instr`] is the decoded form of one instruction: the opcode tag plus
//! that opcode's fixed-shape operand payload. The encoded form is the
//! opcode byte followed by the operand bytes; [`Instr::decode`] consumes
//! exactly [`Opcode::encoded_size`] bytes, which the dispatch loop relies
//! on to advance the instruction pointer before an instruction's effect
//! runs.
//!
//! `Unop`, `Binop` and the `Inplace*Op` instructions carry a one-byte
//! operation selector, so the concrete operation is chosen per-instruction
//! rather than per-opcode-family; the selector is handed unchanged to the
//! primitive-operation table at execution time.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::opcode::Opcode;
use crate::param::Param;

/// Unary operation selector carried by `Unop`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Logical not
    Not = 0,
    /// Numeric negation
    Neg = 1,
    /// Unary plus (numeric coercion)
    Plus = 2,
    /// Bitwise complement
    Compl = 3,
    /// Prefix increment
    PreInc = 4,
    /// Prefix decrement
    PreDec = 5,
}

impl UnaryOp {
    /// Convert byte to selector
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Not),
            1 => Some(Self::Neg),
            2 => Some(Self::Plus),
            3 => Some(Self::Compl),
            4 => Some(Self::PreInc),
            5 => Some(Self::PreDec),
            _ => None,
        }
    }

    /// Human-readable selector name
    pub fn name(self) -> &'static str {
        match self {
            Self::Not => "not",
            Self::Neg => "neg",
            Self::Plus => "plus",
            Self::Compl => "compl",
            Self::PreInc => "pre_inc",
            Self::PreDec => "pre_dec",
        }
    }
}

/// Binary operation selector carried by `Binop` and the `Inplace*Op` family
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Addition (numeric add or string concatenation)
    Add = 0,
    /// Subtraction
    Sub = 1,
    /// Multiplication
    Mul = 2,
    /// Division
    Div = 3,
    /// Remainder
    Mod = 4,
    /// Left shift
    Shl = 5,
    /// Signed right shift
    Shr = 6,
    /// Unsigned right shift
    UShr = 7,
    /// Bitwise and
    BitAnd = 8,
    /// Bitwise or
    BitOr = 9,
    /// Bitwise xor
    BitXor = 10,
    /// Loose equality
    Eq = 11,
    /// Loose inequality
    Ne = 12,
    /// Strict equality
    StrictEq = 13,
    /// Strict inequality
    StrictNe = 14,
    /// Less than
    Lt = 15,
    /// Less or equal
    Le = 16,
    /// Greater than
    Gt = 17,
    /// Greater or equal
    Ge = 18,
    /// instanceof test
    InstanceOf = 19,
    /// Property-membership test
    In = 20,
}

impl BinaryOp {
    /// Convert byte to selector
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Add),
            1 => Some(Self::Sub),
            2 => Some(Self::Mul),
            3 => Some(Self::Div),
            4 => Some(Self::Mod),
            5 => Some(Self::Shl),
            6 => Some(Self::Shr),
            7 => Some(Self::UShr),
            8 => Some(Self::BitAnd),
            9 => Some(Self::BitOr),
            10 => Some(Self::BitXor),
            11 => Some(Self::Eq),
            12 => Some(Self::Ne),
            13 => Some(Self::StrictEq),
            14 => Some(Self::StrictNe),
            15 => Some(Self::Lt),
            16 => Some(Self::Le),
            17 => Some(Self::Gt),
            18 => Some(Self::Ge),
            19 => Some(Self::InstanceOf),
            20 => Some(Self::In),
            _ => None,
        }
    }

    /// Human-readable selector name
    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::UShr => "ushr",
            Self::BitAnd => "bit_and",
            Self::BitOr => "bit_or",
            Self::BitXor => "bit_xor",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::StrictEq => "strict_eq",
            Self::StrictNe => "strict_ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::InstanceOf => "instanceof",
            Self::In => "in",
        }
    }
}

/// A decoded instruction
///
/// Jump displacements are self-relative to the offset field itself (not
/// to the instruction start): the target is `offset_field_pos + offset`.
/// That keeps the displacement a single relocatable field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instr {
    /// Copy source slot into result slot
    MoveTemp {
        /// Destination slot
        result: Param,
        /// Source slot
        source: Param,
    },
    /// Materialize an embedded literal into result slot
    LoadValue {
        /// Destination slot
        result: Param,
        /// Literal operand (constant-pool reference)
        value: Param,
    },
    /// Build a closure over a function-table entry
    LoadClosure {
        /// Destination slot
        result: Param,
        /// Index into the unit's nested-function table
        func: u32,
    },
    /// Load the context receiver
    LoadThis {
        /// Destination slot
        result: Param,
    },
    /// Read a named binding through the scope chain
    LoadName {
        /// Destination slot
        result: Param,
        /// Name-table index
        name: u32,
    },
    /// Write a named binding through the scope chain
    StoreName {
        /// Name-table index
        name: u32,
        /// Value to store
        source: Param,
    },
    /// result = base[index]
    LoadElement {
        /// Destination slot
        result: Param,
        /// Base value
        base: Param,
        /// Computed key
        index: Param,
    },
    /// base[index] = source
    StoreElement {
        /// Base value
        base: Param,
        /// Computed key
        index: Param,
        /// Value to store
        source: Param,
    },
    /// result = base.name
    LoadProperty {
        /// Destination slot
        result: Param,
        /// Base value
        base: Param,
        /// Name-table index
        name: u32,
    },
    /// base.name = source
    StoreProperty {
        /// Base value
        base: Param,
        /// Name-table index
        name: u32,
        /// Value to store
        source: Param,
    },
    /// Declare the frame size
    Push {
        /// Number of temp registers
        size: u32,
    },
    /// Unconditional control transfer
    Jump {
        /// Self-relative displacement from the offset field
        offset: i32,
    },
    /// Conditional control transfer
    CJump {
        /// Self-relative displacement from the offset field
        offset: i32,
        /// Condition operand, coerced to boolean
        condition: Param,
    },
    /// Terminate, yielding the result slot
    Ret {
        /// Slot holding the return value
        result: Param,
    },
    /// Invoke a callable value
    CallValue {
        /// Destination slot
        result: Param,
        /// The callable
        dest: Param,
        /// First argument register
        args: u32,
        /// Argument count
        argc: u32,
    },
    /// Invoke base.name(...)
    CallProperty {
        /// Destination slot
        result: Param,
        /// Base value
        base: Param,
        /// Name-table index
        name: u32,
        /// First argument register
        args: u32,
        /// Argument count
        argc: u32,
    },
    /// Invoke base[index](...)
    CallElement {
        /// Destination slot
        result: Param,
        /// Base value
        base: Param,
        /// Computed key
        index: Param,
        /// First argument register
        args: u32,
        /// Argument count
        argc: u32,
    },
    /// Invoke a scope-chain-resolved callable
    CallActivationProperty {
        /// Destination slot
        result: Param,
        /// Name-table index
        name: u32,
        /// First argument register
        args: u32,
        /// Argument count
        argc: u32,
    },
    /// Construct from a callable value
    CreateValue {
        /// Destination slot
        result: Param,
        /// The constructor
        func: Param,
        /// First argument register
        args: u32,
        /// Argument count
        argc: u32,
    },
    /// Construct from base.name
    CreateProperty {
        /// Destination slot
        result: Param,
        /// Base value
        base: Param,
        /// Name-table index
        name: u32,
        /// First argument register
        args: u32,
        /// Argument count
        argc: u32,
    },
    /// Construct from a scope-chain-resolved callable
    CreateActivationProperty {
        /// Destination slot
        result: Param,
        /// Name-table index
        name: u32,
        /// First argument register
        args: u32,
        /// Argument count
        argc: u32,
    },
    /// Apply a selected unary operation
    Unop {
        /// Operation selector
        alu: UnaryOp,
        /// Destination slot
        result: Param,
        /// Operand
        source: Param,
    },
    /// Apply a selected binary operation
    Binop {
        /// Operation selector
        alu: BinaryOp,
        /// Destination slot
        result: Param,
        /// Left operand
        lhs: Param,
        /// Right operand
        rhs: Param,
    },
    /// Compound-assign through base[index]
    InplaceElementOp {
        /// Operation selector
        alu: BinaryOp,
        /// Base value
        base: Param,
        /// Computed key
        index: Param,
        /// Right-hand operand
        source: Param,
    },
    /// Compound-assign through base.member
    InplaceMemberOp {
        /// Operation selector
        alu: BinaryOp,
        /// Base value
        base: Param,
        /// Name-table index
        member: u32,
        /// Right-hand operand
        source: Param,
    },
    /// Compound-assign through a scope-chain name
    InplaceNameOp {
        /// Operation selector
        alu: BinaryOp,
        /// Name-table index
        name: u32,
        /// Right-hand operand
        source: Param,
    },
    /// Throw the operand value
    CallBuiltinThrow {
        /// Thrown value
        arg: Param,
    },
    /// Install an exception handler
    CallBuiltinCreateExceptionHandler {
        /// Slot receiving the did-throw flag
        result: Param,
    },
    /// Uninstall the innermost exception handler
    CallBuiltinDeleteExceptionHandler,
    /// Read the current exception
    CallBuiltinGetException {
        /// Destination slot
        result: Param,
    },
    /// Push a `with` scope
    CallBuiltinPushScope {
        /// Scope subject
        arg: Param,
    },
    /// Push a catch scope
    CallBuiltinPushCatchScope {
        /// Name-table index of the catch variable
        name: u32,
    },
    /// Pop the innermost scope
    CallBuiltinPopScope,
    /// Build a property-name iterator
    CallBuiltinForeachIteratorObject {
        /// Destination slot
        result: Param,
        /// Enumerated value
        arg: Param,
    },
    /// Advance a property-name iterator
    CallBuiltinForeachNextPropertyName {
        /// Destination slot
        result: Param,
        /// Iterator object
        arg: Param,
    },
    /// Delete base.member
    CallBuiltinDeleteMember {
        /// Destination slot (success flag)
        result: Param,
        /// Base value
        base: Param,
        /// Name-table index
        member: u32,
    },
    /// Delete base[index]
    CallBuiltinDeleteSubscript {
        /// Destination slot (success flag)
        result: Param,
        /// Base value
        base: Param,
        /// Computed key
        index: Param,
    },
    /// Delete a scope-chain binding
    CallBuiltinDeleteName {
        /// Destination slot (success flag)
        result: Param,
        /// Name-table index
        name: u32,
    },
    /// typeof base.member
    CallBuiltinTypeofMember {
        /// Destination slot
        result: Param,
        /// Base value
        base: Param,
        /// Name-table index
        member: u32,
    },
    /// typeof base[index]
    CallBuiltinTypeofSubscript {
        /// Destination slot
        result: Param,
        /// Base value
        base: Param,
        /// Computed key
        index: Param,
    },
    /// typeof of a scope-chain binding
    CallBuiltinTypeofName {
        /// Destination slot
        result: Param,
        /// Name-table index
        name: u32,
    },
    /// typeof of an operand value
    CallBuiltinTypeofValue {
        /// Destination slot
        result: Param,
        /// Inspected value
        value: Param,
    },
    /// base.member++
    CallBuiltinPostIncMember {
        /// Destination slot (old value)
        result: Param,
        /// Base value
        base: Param,
        /// Name-table index
        member: u32,
    },
    /// base[index]++
    CallBuiltinPostIncSubscript {
        /// Destination slot (old value)
        result: Param,
        /// Base value
        base: Param,
        /// Computed key
        index: Param,
    },
    /// name++
    CallBuiltinPostIncName {
        /// Destination slot (old value)
        result: Param,
        /// Name-table index
        name: u32,
    },
    /// slot++
    CallBuiltinPostIncValue {
        /// Destination slot (old value)
        result: Param,
        /// Incremented slot
        value: Param,
    },
    /// base.member--
    CallBuiltinPostDecMember {
        /// Destination slot (old value)
        result: Param,
        /// Base value
        base: Param,
        /// Name-table index
        member: u32,
    },
    /// base[index]--
    CallBuiltinPostDecSubscript {
        /// Destination slot (old value)
        result: Param,
        /// Base value
        base: Param,
        /// Computed key
        index: Param,
    },
    /// name--
    CallBuiltinPostDecName {
        /// Destination slot (old value)
        result: Param,
        /// Name-table index
        name: u32,
    },
    /// slot--
    CallBuiltinPostDecValue {
        /// Destination slot (old value)
        result: Param,
        /// Decremented slot
        value: Param,
    },
    /// Declare a variable in the current activation
    CallBuiltinDeclareVar {
        /// Whether the binding is deletable
        deletable: bool,
        /// Name-table index
        name: u32,
    },
    /// Install a getter/setter pair
    CallBuiltinDefineGetterSetter {
        /// Target object
        object: Param,
        /// Name-table index
        name: u32,
        /// Getter function value
        getter: Param,
        /// Setter function value
        setter: Param,
    },
    /// Define a data property
    CallBuiltinDefineProperty {
        /// Target object
        object: Param,
        /// Name-table index
        name: u32,
        /// Property value
        value: Param,
    },
    /// Define an array element at a literal index
    CallBuiltinDefineArrayProperty {
        /// Target object
        object: Param,
        /// Literal element index
        index: u32,
        /// Element value
        value: Param,
    },
}

impl Instr {
    /// The opcode tag of this instruction
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::MoveTemp { .. } => Opcode::MoveTemp,
            Self::LoadValue { .. } => Opcode::LoadValue,
            Self::LoadClosure { .. } => Opcode::LoadClosure,
            Self::LoadThis { .. } => Opcode::LoadThis,
            Self::LoadName { .. } => Opcode::LoadName,
            Self::StoreName { .. } => Opcode::StoreName,
            Self::LoadElement { .. } => Opcode::LoadElement,
            Self::StoreElement { .. } => Opcode::StoreElement,
            Self::LoadProperty { .. } => Opcode::LoadProperty,
            Self::StoreProperty { .. } => Opcode::StoreProperty,
            Self::Push { .. } => Opcode::Push,
            Self::Jump { .. } => Opcode::Jump,
            Self::CJump { .. } => Opcode::CJump,
            Self::Ret { .. } => Opcode::Ret,
            Self::CallValue { .. } => Opcode::CallValue,
            Self::CallProperty { .. } => Opcode::CallProperty,
            Self::CallElement { .. } => Opcode::CallElement,
            Self::CallActivationProperty { .. } => Opcode::CallActivationProperty,
            Self::CreateValue { .. } => Opcode::CreateValue,
            Self::CreateProperty { .. } => Opcode::CreateProperty,
            Self::CreateActivationProperty { .. } => Opcode::CreateActivationProperty,
            Self::Unop { .. } => Opcode::Unop,
            Self::Binop { .. } => Opcode::Binop,
            Self::InplaceElementOp { .. } => Opcode::InplaceElementOp,
            Self::InplaceMemberOp { .. } => Opcode::InplaceMemberOp,
            Self::InplaceNameOp { .. } => Opcode::InplaceNameOp,
            Self::CallBuiltinThrow { .. } => Opcode::CallBuiltinThrow,
            Self::CallBuiltinCreateExceptionHandler { .. } => {
                Opcode::CallBuiltinCreateExceptionHandler
            }
            Self::CallBuiltinDeleteExceptionHandler => Opcode::CallBuiltinDeleteExceptionHandler,
            Self::CallBuiltinGetException { .. } => Opcode::CallBuiltinGetException,
            Self::CallBuiltinPushScope { .. } => Opcode::CallBuiltinPushScope,
            Self::CallBuiltinPushCatchScope { .. } => Opcode::CallBuiltinPushCatchScope,
            Self::CallBuiltinPopScope => Opcode::CallBuiltinPopScope,
            Self::CallBuiltinForeachIteratorObject { .. } => {
                Opcode::CallBuiltinForeachIteratorObject
            }
            Self::CallBuiltinForeachNextPropertyName { .. } => {
                Opcode::CallBuiltinForeachNextPropertyName
            }
            Self::CallBuiltinDeleteMember { .. } => Opcode::CallBuiltinDeleteMember,
            Self::CallBuiltinDeleteSubscript { .. } => Opcode::CallBuiltinDeleteSubscript,
            Self::CallBuiltinDeleteName { .. } => Opcode::CallBuiltinDeleteName,
            Self::CallBuiltinTypeofMember { .. } => Opcode::CallBuiltinTypeofMember,
            Self::CallBuiltinTypeofSubscript { .. } => Opcode::CallBuiltinTypeofSubscript,
            Self::CallBuiltinTypeofName { .. } => Opcode::CallBuiltinTypeofName,
            Self::CallBuiltinTypeofValue { .. } => Opcode::CallBuiltinTypeofValue,
            Self::CallBuiltinPostIncMember { .. } => Opcode::CallBuiltinPostIncMember,
            Self::CallBuiltinPostIncSubscript { .. } => Opcode::CallBuiltinPostIncSubscript,
            Self::CallBuiltinPostIncName { .. } => Opcode::CallBuiltinPostIncName,
            Self::CallBuiltinPostIncValue { .. } => Opcode::CallBuiltinPostIncValue,
            Self::CallBuiltinPostDecMember { .. } => Opcode::CallBuiltinPostDecMember,
            Self::CallBuiltinPostDecSubscript { .. } => Opcode::CallBuiltinPostDecSubscript,
            Self::CallBuiltinPostDecName { .. } => Opcode::CallBuiltinPostDecName,
            Self::CallBuiltinPostDecValue { .. } => Opcode::CallBuiltinPostDecValue,
            Self::CallBuiltinDeclareVar { .. } => Opcode::CallBuiltinDeclareVar,
            Self::CallBuiltinDefineGetterSetter { .. } => Opcode::CallBuiltinDefineGetterSetter,
            Self::CallBuiltinDefineProperty { .. } => Opcode::CallBuiltinDefineProperty,
            Self::CallBuiltinDefineArrayProperty { .. } => Opcode::CallBuiltinDefineArrayProperty,
        }
    }

    /// Total encoded size of this instruction in bytes
    #[inline]
    pub fn encoded_size(&self) -> usize {
        self.opcode().encoded_size()
    }

    /// Encode this instruction: opcode byte, then operands
    pub fn encode(&self, w: &mut BytecodeWriter) {
        w.emit_opcode(self.opcode());
        match *self {
            Self::MoveTemp { result, source } => {
                result.encode(w);
                source.encode(w);
            }
            Self::LoadValue { result, value } => {
                result.encode(w);
                value.encode(w);
            }
            Self::LoadClosure { result, func } => {
                result.encode(w);
                w.emit_u32(func);
            }
            Self::LoadThis { result } => result.encode(w),
            Self::LoadName { result, name } => {
                result.encode(w);
                w.emit_u32(name);
            }
            Self::StoreName { name, source } => {
                w.emit_u32(name);
                source.encode(w);
            }
            Self::LoadElement {
                result,
                base,
                index,
            } => {
                result.encode(w);
                base.encode(w);
                index.encode(w);
            }
            Self::StoreElement {
                base,
                index,
                source,
            } => {
                base.encode(w);
                index.encode(w);
                source.encode(w);
            }
            Self::LoadProperty { result, base, name } => {
                result.encode(w);
                base.encode(w);
                w.emit_u32(name);
            }
            Self::StoreProperty { base, name, source } => {
                base.encode(w);
                w.emit_u32(name);
                source.encode(w);
            }
            Self::Push { size } => w.emit_u32(size),
            Self::Jump { offset } => w.emit_i32(offset),
            Self::CJump { offset, condition } => {
                w.emit_i32(offset);
                condition.encode(w);
            }
            Self::Ret { result } => result.encode(w),
            Self::CallValue {
                result,
                dest,
                args,
                argc,
            } => {
                result.encode(w);
                dest.encode(w);
                w.emit_u32(args);
                w.emit_u32(argc);
            }
            Self::CallProperty {
                result,
                base,
                name,
                args,
                argc,
            } => {
                result.encode(w);
                base.encode(w);
                w.emit_u32(name);
                w.emit_u32(args);
                w.emit_u32(argc);
            }
            Self::CallElement {
                result,
                base,
                index,
                args,
                argc,
            } => {
                result.encode(w);
                base.encode(w);
                index.encode(w);
                w.emit_u32(args);
                w.emit_u32(argc);
            }
            Self::CallActivationProperty {
                result,
                name,
                args,
                argc,
            } => {
                result.encode(w);
                w.emit_u32(name);
                w.emit_u32(args);
                w.emit_u32(argc);
            }
            Self::CreateValue {
                result,
                func,
                args,
                argc,
            } => {
                result.encode(w);
                func.encode(w);
                w.emit_u32(args);
                w.emit_u32(argc);
            }
            Self::CreateProperty {
                result,
                base,
                name,
                args,
                argc,
            } => {
                result.encode(w);
                base.encode(w);
                w.emit_u32(name);
                w.emit_u32(args);
                w.emit_u32(argc);
            }
            Self::CreateActivationProperty {
                result,
                name,
                args,
                argc,
            } => {
                result.encode(w);
                w.emit_u32(name);
                w.emit_u32(args);
                w.emit_u32(argc);
            }
            Self::Unop {
                alu,
                result,
                source,
            } => {
                w.emit_u8(alu as u8);
                result.encode(w);
                source.encode(w);
            }
            Self::Binop {
                alu,
                result,
                lhs,
                rhs,
            } => {
                w.emit_u8(alu as u8);
                result.encode(w);
                lhs.encode(w);
                rhs.encode(w);
            }
            Self::InplaceElementOp {
                alu,
                base,
                index,
                source,
            } => {
                w.emit_u8(alu as u8);
                base.encode(w);
                index.encode(w);
                source.encode(w);
            }
            Self::InplaceMemberOp {
                alu,
                base,
                member,
                source,
            } => {
                w.emit_u8(alu as u8);
                base.encode(w);
                w.emit_u32(member);
                source.encode(w);
            }
            Self::InplaceNameOp { alu, name, source } => {
                w.emit_u8(alu as u8);
                w.emit_u32(name);
                source.encode(w);
            }
            Self::CallBuiltinThrow { arg } => arg.encode(w),
            Self::CallBuiltinCreateExceptionHandler { result } => result.encode(w),
            Self::CallBuiltinDeleteExceptionHandler => {}
            Self::CallBuiltinGetException { result } => result.encode(w),
            Self::CallBuiltinPushScope { arg } => arg.encode(w),
            Self::CallBuiltinPushCatchScope { name } => w.emit_u32(name),
            Self::CallBuiltinPopScope => {}
            Self::CallBuiltinForeachIteratorObject { result, arg }
            | Self::CallBuiltinForeachNextPropertyName { result, arg } => {
                result.encode(w);
                arg.encode(w);
            }
            Self::CallBuiltinDeleteMember {
                result,
                base,
                member,
            }
            | Self::CallBuiltinTypeofMember {
                result,
                base,
                member,
            }
            | Self::CallBuiltinPostIncMember {
                result,
                base,
                member,
            }
            | Self::CallBuiltinPostDecMember {
                result,
                base,
                member,
            } => {
                result.encode(w);
                base.encode(w);
                w.emit_u32(member);
            }
            Self::CallBuiltinDeleteSubscript {
                result,
                base,
                index,
            }
            | Self::CallBuiltinTypeofSubscript {
                result,
                base,
                index,
            }
            | Self::CallBuiltinPostIncSubscript {
                result,
                base,
                index,
            }
            | Self::CallBuiltinPostDecSubscript {
                result,
                base,
                index,
            } => {
                result.encode(w);
                base.encode(w);
                index.encode(w);
            }
            Self::CallBuiltinDeleteName { result, name }
            | Self::CallBuiltinTypeofName { result, name }
            | Self::CallBuiltinPostIncName { result, name }
            | Self::CallBuiltinPostDecName { result, name } => {
                result.encode(w);
                w.emit_u32(name);
            }
            Self::CallBuiltinTypeofValue { result, value }
            | Self::CallBuiltinPostIncValue { result, value }
            | Self::CallBuiltinPostDecValue { result, value } => {
                result.encode(w);
                value.encode(w);
            }
            Self::CallBuiltinDeclareVar { deletable, name } => {
                w.emit_u8(deletable as u8);
                w.emit_u32(name);
            }
            Self::CallBuiltinDefineGetterSetter {
                object,
                name,
                getter,
                setter,
            } => {
                object.encode(w);
                w.emit_u32(name);
                getter.encode(w);
                setter.encode(w);
            }
            Self::CallBuiltinDefineProperty {
                object,
                name,
                value,
            } => {
                object.encode(w);
                w.emit_u32(name);
                value.encode(w);
            }
            Self::CallBuiltinDefineArrayProperty {
                object,
                index,
                value,
            } => {
                object.encode(w);
                w.emit_u32(index);
                value.encode(w);
            }
        }
    }

    /// Decode one instruction from the reader
    ///
    /// Consumes exactly the decoded opcode's `encoded_size()` bytes.
    pub fn decode(r: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let opcode = r.read_opcode()?;
        let instr = match opcode {
            Opcode::MoveTemp => Self::MoveTemp {
                result: Param::decode(r)?,
                source: Param::decode(r)?,
            },
            Opcode::LoadValue => Self::LoadValue {
                result: Param::decode(r)?,
                value: Param::decode(r)?,
            },
            Opcode::LoadClosure => Self::LoadClosure {
                result: Param::decode(r)?,
                func: r.read_u32()?,
            },
            Opcode::LoadThis => Self::LoadThis {
                result: Param::decode(r)?,
            },
            Opcode::LoadName => Self::LoadName {
                result: Param::decode(r)?,
                name: r.read_u32()?,
            },
            Opcode::StoreName => Self::StoreName {
                name: r.read_u32()?,
                source: Param::decode(r)?,
            },
            Opcode::LoadElement => Self::LoadElement {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                index: Param::decode(r)?,
            },
            Opcode::StoreElement => Self::StoreElement {
                base: Param::decode(r)?,
                index: Param::decode(r)?,
                source: Param::decode(r)?,
            },
            Opcode::LoadProperty => Self::LoadProperty {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                name: r.read_u32()?,
            },
            Opcode::StoreProperty => Self::StoreProperty {
                base: Param::decode(r)?,
                name: r.read_u32()?,
                source: Param::decode(r)?,
            },
            Opcode::Push => Self::Push {
                size: r.read_u32()?,
            },
            Opcode::Jump => Self::Jump {
                offset: r.read_i32()?,
            },
            Opcode::CJump => Self::CJump {
                offset: r.read_i32()?,
                condition: Param::decode(r)?,
            },
            Opcode::Ret => Self::Ret {
                result: Param::decode(r)?,
            },
            Opcode::CallValue => Self::CallValue {
                result: Param::decode(r)?,
                dest: Param::decode(r)?,
                args: r.read_u32()?,
                argc: r.read_u32()?,
            },
            Opcode::CallProperty => Self::CallProperty {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                name: r.read_u32()?,
                args: r.read_u32()?,
                argc: r.read_u32()?,
            },
            Opcode::CallElement => Self::CallElement {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                index: Param::decode(r)?,
                args: r.read_u32()?,
                argc: r.read_u32()?,
            },
            Opcode::CallActivationProperty => Self::CallActivationProperty {
                result: Param::decode(r)?,
                name: r.read_u32()?,
                args: r.read_u32()?,
                argc: r.read_u32()?,
            },
            Opcode::CreateValue => Self::CreateValue {
                result: Param::decode(r)?,
                func: Param::decode(r)?,
                args: r.read_u32()?,
                argc: r.read_u32()?,
            },
            Opcode::CreateProperty => Self::CreateProperty {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                name: r.read_u32()?,
                args: r.read_u32()?,
                argc: r.read_u32()?,
            },
            Opcode::CreateActivationProperty => Self::CreateActivationProperty {
                result: Param::decode(r)?,
                name: r.read_u32()?,
                args: r.read_u32()?,
                argc: r.read_u32()?,
            },
            Opcode::Unop => {
                let at = r.position();
                let raw = r.read_u8()?;
                let alu =
                    UnaryOp::from_u8(raw).ok_or(DecodeError::InvalidOpSelector(raw, at))?;
                Self::Unop {
                    alu,
                    result: Param::decode(r)?,
                    source: Param::decode(r)?,
                }
            }
            Opcode::Binop => {
                let alu = Self::decode_binary_op(r)?;
                Self::Binop {
                    alu,
                    result: Param::decode(r)?,
                    lhs: Param::decode(r)?,
                    rhs: Param::decode(r)?,
                }
            }
            Opcode::InplaceElementOp => {
                let alu = Self::decode_binary_op(r)?;
                Self::InplaceElementOp {
                    alu,
                    base: Param::decode(r)?,
                    index: Param::decode(r)?,
                    source: Param::decode(r)?,
                }
            }
            Opcode::InplaceMemberOp => {
                let alu = Self::decode_binary_op(r)?;
                Self::InplaceMemberOp {
                    alu,
                    base: Param::decode(r)?,
                    member: r.read_u32()?,
                    source: Param::decode(r)?,
                }
            }
            Opcode::InplaceNameOp => {
                let alu = Self::decode_binary_op(r)?;
                Self::InplaceNameOp {
                    alu,
                    name: r.read_u32()?,
                    source: Param::decode(r)?,
                }
            }
            Opcode::CallBuiltinThrow => Self::CallBuiltinThrow {
                arg: Param::decode(r)?,
            },
            Opcode::CallBuiltinCreateExceptionHandler => {
                Self::CallBuiltinCreateExceptionHandler {
                    result: Param::decode(r)?,
                }
            }
            Opcode::CallBuiltinDeleteExceptionHandler => Self::CallBuiltinDeleteExceptionHandler,
            Opcode::CallBuiltinGetException => Self::CallBuiltinGetException {
                result: Param::decode(r)?,
            },
            Opcode::CallBuiltinPushScope => Self::CallBuiltinPushScope {
                arg: Param::decode(r)?,
            },
            Opcode::CallBuiltinPushCatchScope => Self::CallBuiltinPushCatchScope {
                name: r.read_u32()?,
            },
            Opcode::CallBuiltinPopScope => Self::CallBuiltinPopScope,
            Opcode::CallBuiltinForeachIteratorObject => Self::CallBuiltinForeachIteratorObject {
                result: Param::decode(r)?,
                arg: Param::decode(r)?,
            },
            Opcode::CallBuiltinForeachNextPropertyName => {
                Self::CallBuiltinForeachNextPropertyName {
                    result: Param::decode(r)?,
                    arg: Param::decode(r)?,
                }
            }
            Opcode::CallBuiltinDeleteMember => Self::CallBuiltinDeleteMember {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                member: r.read_u32()?,
            },
            Opcode::CallBuiltinDeleteSubscript => Self::CallBuiltinDeleteSubscript {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                index: Param::decode(r)?,
            },
            Opcode::CallBuiltinDeleteName => Self::CallBuiltinDeleteName {
                result: Param::decode(r)?,
                name: r.read_u32()?,
            },
            Opcode::CallBuiltinTypeofMember => Self::CallBuiltinTypeofMember {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                member: r.read_u32()?,
            },
            Opcode::CallBuiltinTypeofSubscript => Self::CallBuiltinTypeofSubscript {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                index: Param::decode(r)?,
            },
            Opcode::CallBuiltinTypeofName => Self::CallBuiltinTypeofName {
                result: Param::decode(r)?,
                name: r.read_u32()?,
            },
            Opcode::CallBuiltinTypeofValue => Self::CallBuiltinTypeofValue {
                result: Param::decode(r)?,
                value: Param::decode(r)?,
            },
            Opcode::CallBuiltinPostIncMember => Self::CallBuiltinPostIncMember {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                member: r.read_u32()?,
            },
            Opcode::CallBuiltinPostIncSubscript => Self::CallBuiltinPostIncSubscript {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                index: Param::decode(r)?,
            },
            Opcode::CallBuiltinPostIncName => Self::CallBuiltinPostIncName {
                result: Param::decode(r)?,
                name: r.read_u32()?,
            },
            Opcode::CallBuiltinPostIncValue => Self::CallBuiltinPostIncValue {
                result: Param::decode(r)?,
                value: Param::decode(r)?,
            },
            Opcode::CallBuiltinPostDecMember => Self::CallBuiltinPostDecMember {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                member: r.read_u32()?,
            },
            Opcode::CallBuiltinPostDecSubscript => Self::CallBuiltinPostDecSubscript {
                result: Param::decode(r)?,
                base: Param::decode(r)?,
                index: Param::decode(r)?,
            },
            Opcode::CallBuiltinPostDecName => Self::CallBuiltinPostDecName {
                result: Param::decode(r)?,
                name: r.read_u32()?,
            },
            Opcode::CallBuiltinPostDecValue => Self::CallBuiltinPostDecValue {
                result: Param::decode(r)?,
                value: Param::decode(r)?,
            },
            Opcode::CallBuiltinDeclareVar => Self::CallBuiltinDeclareVar {
                deletable: r.read_u8()? != 0,
                name: r.read_u32()?,
            },
            Opcode::CallBuiltinDefineGetterSetter => Self::CallBuiltinDefineGetterSetter {
                object: Param::decode(r)?,
                name: r.read_u32()?,
                getter: Param::decode(r)?,
                setter: Param::decode(r)?,
            },
            Opcode::CallBuiltinDefineProperty => Self::CallBuiltinDefineProperty {
                object: Param::decode(r)?,
                name: r.read_u32()?,
                value: Param::decode(r)?,
            },
            Opcode::CallBuiltinDefineArrayProperty => Self::CallBuiltinDefineArrayProperty {
                object: Param::decode(r)?,
                index: r.read_u32()?,
                value: Param::decode(r)?,
            },
        };
        Ok(instr)
    }

    fn decode_binary_op(r: &mut BytecodeReader<'_>) -> Result<BinaryOp, DecodeError> {
        let at = r.position();
        let raw = r.read_u8()?;
        BinaryOp::from_u8(raw).ok_or(DecodeError::InvalidOpSelector(raw, at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(opcode: Opcode) -> Instr {
        let r = Param::Temp(0);
        let a = Param::Temp(1);
        let b = Param::Temp(2);
        match opcode {
            Opcode::MoveTemp => Instr::MoveTemp { result: r, source: a },
            Opcode::LoadValue => Instr::LoadValue {
                result: r,
                value: Param::Const(4),
            },
            Opcode::LoadClosure => Instr::LoadClosure { result: r, func: 1 },
            Opcode::LoadThis => Instr::LoadThis { result: r },
            Opcode::LoadName => Instr::LoadName { result: r, name: 2 },
            Opcode::StoreName => Instr::StoreName { name: 2, source: a },
            Opcode::LoadElement => Instr::LoadElement {
                result: r,
                base: a,
                index: b,
            },
            Opcode::StoreElement => Instr::StoreElement {
                base: r,
                index: a,
                source: b,
            },
            Opcode::LoadProperty => Instr::LoadProperty {
                result: r,
                base: a,
                name: 3,
            },
            Opcode::StoreProperty => Instr::StoreProperty {
                base: r,
                name: 3,
                source: a,
            },
            Opcode::Push => Instr::Push { size: 8 },
            Opcode::Jump => Instr::Jump { offset: -5 },
            Opcode::CJump => Instr::CJump {
                offset: 15,
                condition: a,
            },
            Opcode::Ret => Instr::Ret { result: r },
            Opcode::CallValue => Instr::CallValue {
                result: r,
                dest: a,
                args: 2,
                argc: 1,
            },
            Opcode::CallProperty => Instr::CallProperty {
                result: r,
                base: a,
                name: 0,
                args: 2,
                argc: 1,
            },
            Opcode::CallElement => Instr::CallElement {
                result: r,
                base: a,
                index: b,
                args: 3,
                argc: 0,
            },
            Opcode::CallActivationProperty => Instr::CallActivationProperty {
                result: r,
                name: 1,
                args: 2,
                argc: 2,
            },
            Opcode::CreateValue => Instr::CreateValue {
                result: r,
                func: a,
                args: 2,
                argc: 1,
            },
            Opcode::CreateProperty => Instr::CreateProperty {
                result: r,
                base: a,
                name: 0,
                args: 2,
                argc: 1,
            },
            Opcode::CreateActivationProperty => Instr::CreateActivationProperty {
                result: r,
                name: 1,
                args: 2,
                argc: 2,
            },
            Opcode::Unop => Instr::Unop {
                alu: UnaryOp::Neg,
                result: r,
                source: a,
            },
            Opcode::Binop => Instr::Binop {
                alu: BinaryOp::Add,
                result: r,
                lhs: a,
                rhs: b,
            },
            Opcode::InplaceElementOp => Instr::InplaceElementOp {
                alu: BinaryOp::BitOr,
                base: r,
                index: a,
                source: b,
            },
            Opcode::InplaceMemberOp => Instr::InplaceMemberOp {
                alu: BinaryOp::Add,
                base: r,
                member: 1,
                source: a,
            },
            Opcode::InplaceNameOp => Instr::InplaceNameOp {
                alu: BinaryOp::Sub,
                name: 1,
                source: a,
            },
            Opcode::CallBuiltinThrow => Instr::CallBuiltinThrow { arg: a },
            Opcode::CallBuiltinCreateExceptionHandler => {
                Instr::CallBuiltinCreateExceptionHandler { result: r }
            }
            Opcode::CallBuiltinDeleteExceptionHandler => {
                Instr::CallBuiltinDeleteExceptionHandler
            }
            Opcode::CallBuiltinGetException => Instr::CallBuiltinGetException { result: r },
            Opcode::CallBuiltinPushScope => Instr::CallBuiltinPushScope { arg: a },
            Opcode::CallBuiltinPushCatchScope => Instr::CallBuiltinPushCatchScope { name: 1 },
            Opcode::CallBuiltinPopScope => Instr::CallBuiltinPopScope,
            Opcode::CallBuiltinForeachIteratorObject => {
                Instr::CallBuiltinForeachIteratorObject { result: r, arg: a }
            }
            Opcode::CallBuiltinForeachNextPropertyName => {
                Instr::CallBuiltinForeachNextPropertyName { result: r, arg: a }
            }
            Opcode::CallBuiltinDeleteMember => Instr::CallBuiltinDeleteMember {
                result: r,
                base: a,
                member: 1,
            },
            Opcode::CallBuiltinDeleteSubscript => Instr::CallBuiltinDeleteSubscript {
                result: r,
                base: a,
                index: b,
            },
            Opcode::CallBuiltinDeleteName => Instr::CallBuiltinDeleteName { result: r, name: 1 },
            Opcode::CallBuiltinTypeofMember => Instr::CallBuiltinTypeofMember {
                result: r,
                base: a,
                member: 1,
            },
            Opcode::CallBuiltinTypeofSubscript => Instr::CallBuiltinTypeofSubscript {
                result: r,
                base: a,
                index: b,
            },
            Opcode::CallBuiltinTypeofName => Instr::CallBuiltinTypeofName { result: r, name: 1 },
            Opcode::CallBuiltinTypeofValue => Instr::CallBuiltinTypeofValue {
                result: r,
                value: a,
            },
            Opcode::CallBuiltinPostIncMember => Instr::CallBuiltinPostIncMember {
                result: r,
                base: a,
                member: 1,
            },
            Opcode::CallBuiltinPostIncSubscript => Instr::CallBuiltinPostIncSubscript {
                result: r,
                base: a,
                index: b,
            },
            Opcode::CallBuiltinPostIncName => {
                Instr::CallBuiltinPostIncName { result: r, name: 1 }
            }
            Opcode::CallBuiltinPostIncValue => Instr::CallBuiltinPostIncValue {
                result: r,
                value: a,
            },
            Opcode::CallBuiltinPostDecMember => Instr::CallBuiltinPostDecMember {
                result: r,
                base: a,
                member: 1,
            },
            Opcode::CallBuiltinPostDecSubscript => Instr::CallBuiltinPostDecSubscript {
                result: r,
                base: a,
                index: b,
            },
            Opcode::CallBuiltinPostDecName => {
                Instr::CallBuiltinPostDecName { result: r, name: 1 }
            }
            Opcode::CallBuiltinPostDecValue => Instr::CallBuiltinPostDecValue {
                result: r,
                value: a,
            },
            Opcode::CallBuiltinDeclareVar => Instr::CallBuiltinDeclareVar {
                deletable: true,
                name: 1,
            },
            Opcode::CallBuiltinDefineGetterSetter => Instr::CallBuiltinDefineGetterSetter {
                object: r,
                name: 1,
                getter: a,
                setter: b,
            },
            Opcode::CallBuiltinDefineProperty => Instr::CallBuiltinDefineProperty {
                object: r,
                name: 1,
                value: a,
            },
            Opcode::CallBuiltinDefineArrayProperty => Instr::CallBuiltinDefineArrayProperty {
                object: r,
                index: 4,
                value: a,
            },
        }
    }

    #[test]
    fn test_roundtrip_every_opcode() {
        for opcode in crate::opcode::ALL_OPCODES {
            let instr = sample(opcode);
            let mut writer = BytecodeWriter::new();
            instr.encode(&mut writer);
            let bytes = writer.into_bytes();
            let mut reader = BytecodeReader::new(&bytes);
            let decoded = Instr::decode(&mut reader).unwrap();
            assert_eq!(decoded, instr, "roundtrip failed for {:?}", opcode);
        }
    }

    #[test]
    fn test_encoded_size_matches_bytes() {
        // The dispatch loop advances by encoded_size() before running an
        // instruction's effect; encode and decode must both agree with it.
        for opcode in crate::opcode::ALL_OPCODES {
            let instr = sample(opcode);
            let mut writer = BytecodeWriter::new();
            instr.encode(&mut writer);
            assert_eq!(
                writer.offset(),
                opcode.encoded_size(),
                "encode size mismatch for {:?}",
                opcode
            );

            let bytes = writer.into_bytes();
            let mut reader = BytecodeReader::new(&bytes);
            Instr::decode(&mut reader).unwrap();
            assert_eq!(
                reader.position(),
                opcode.encoded_size(),
                "decode size mismatch for {:?}",
                opcode
            );
        }
    }

    #[test]
    fn test_selector_roundtrip() {
        for raw in 0..=20u8 {
            let op = BinaryOp::from_u8(raw).unwrap();
            assert_eq!(op as u8, raw);
        }
        assert_eq!(BinaryOp::from_u8(21), None);

        for raw in 0..=5u8 {
            let op = UnaryOp::from_u8(raw).unwrap();
            assert_eq!(op as u8, raw);
        }
        assert_eq!(UnaryOp::from_u8(6), None);
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let mut writer = BytecodeWriter::new();
        writer.emit_opcode(Opcode::Binop);
        writer.emit_u8(0xEE);
        Param::Temp(0).encode(&mut writer);
        Param::Temp(1).encode(&mut writer);
        Param::Temp(2).encode(&mut writer);

        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        assert!(matches!(
            Instr::decode(&mut reader),
            Err(DecodeError::InvalidOpSelector(0xEE, 1))
        ));
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let mut writer = BytecodeWriter::new();
        Instr::MoveTemp {
            result: Param::Temp(0),
            source: Param::Temp(1),
        }
        .encode(&mut writer);
        let mut bytes = writer.into_bytes();
        bytes.truncate(bytes.len() - 1);

        let mut reader = BytecodeReader::new(&bytes);
        assert!(Instr::decode(&mut reader).is_err());
    }
}
