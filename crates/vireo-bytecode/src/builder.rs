//! Function assembly
//!
//! [`FunctionBuilder`] is the small assembler the compiler (and the test
//! suites) drive: it interns constants and names, registers nested
//! functions, and resolves labels into the self-relative displacements the
//! `Jump`/`CJump` encodings carry. Displacements are measured from the
//! offset field itself, so binding a label after the jump is a single
//! 4-byte patch.

use rustc_hash::FxHashMap;

use crate::encoder::BytecodeWriter;
use crate::instr::Instr;
use crate::opcode::Opcode;
use crate::param::Param;
use crate::unit::{CodeUnit, Constant, Metadata};

/// A forward- or backward-referenced position in the code stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Interning key for constants; numbers compare by bit pattern so NaN
/// literals intern like any other value.
#[derive(PartialEq, Eq, Hash)]
enum ConstKey {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    Str(String),
}

/// Incremental builder for one [`CodeUnit`]
pub struct FunctionBuilder {
    writer: BytecodeWriter,
    meta: Metadata,
    arg_count: u32,
    local_count: u32,
    consts: Vec<Constant>,
    const_map: FxHashMap<ConstKey, u32>,
    names: Vec<String>,
    name_map: FxHashMap<String, u32>,
    funcs: Vec<CodeUnit>,
    labels: Vec<Option<usize>>,
    patches: Vec<(usize, Label)>,
}

impl FunctionBuilder {
    /// Create a builder for a function with the given arity and local count
    pub fn new(name: impl Into<String>, arg_count: u32, local_count: u32) -> Self {
        Self {
            writer: BytecodeWriter::new(),
            meta: Metadata {
                name: name.into(),
                source: None,
            },
            arg_count,
            local_count,
            consts: Vec::new(),
            const_map: FxHashMap::default(),
            names: Vec::new(),
            name_map: FxHashMap::default(),
            funcs: Vec::new(),
            labels: Vec::new(),
            patches: Vec::new(),
        }
    }

    /// Current offset in the code stream
    pub fn offset(&self) -> usize {
        self.writer.offset()
    }

    // ===== Pools =====

    /// Intern a constant, returning the `Const` param addressing it
    pub fn constant(&mut self, value: Constant) -> Param {
        let key = match &value {
            Constant::Undefined => ConstKey::Undefined,
            Constant::Null => ConstKey::Null,
            Constant::Bool(b) => ConstKey::Bool(*b),
            Constant::Number(n) => ConstKey::Number(n.to_bits()),
            Constant::Str(s) => ConstKey::Str(s.clone()),
        };
        if let Some(&index) = self.const_map.get(&key) {
            return Param::Const(index);
        }
        let index = self.consts.len() as u32;
        self.consts.push(value);
        self.const_map.insert(key, index);
        Param::Const(index)
    }

    /// Intern the undefined literal
    pub fn undefined(&mut self) -> Param {
        self.constant(Constant::Undefined)
    }

    /// Intern a numeric literal
    pub fn number(&mut self, value: f64) -> Param {
        self.constant(Constant::Number(value))
    }

    /// Intern a string literal
    pub fn string(&mut self, value: &str) -> Param {
        self.constant(Constant::Str(value.to_string()))
    }

    /// Intern a name, returning its name-table index
    pub fn name(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.name_map.get(name) {
            return index;
        }
        let index = self.names.len() as u32;
        self.names.push(name.to_string());
        self.name_map.insert(name.to_string(), index);
        index
    }

    /// Register a nested function, returning its function-table index
    pub fn function(&mut self, unit: CodeUnit) -> u32 {
        let index = self.funcs.len() as u32;
        self.funcs.push(unit);
        index
    }

    // ===== Emission =====

    /// Emit a fully formed instruction
    ///
    /// Jumps with label targets go through [`Self::jump`]/[`Self::cjump`]
    /// instead, so the displacement can be patched at bind time.
    pub fn emit(&mut self, instr: Instr) {
        instr.encode(&mut self.writer);
    }

    /// Allocate an unbound label
    pub fn label(&mut self) -> Label {
        let id = self.labels.len();
        self.labels.push(None);
        Label(id)
    }

    /// Bind a label to the current offset
    ///
    /// Panics if the label is already bound; that is builder misuse, not
    /// a runtime condition.
    pub fn bind(&mut self, label: Label) {
        let slot = &mut self.labels[label.0];
        assert!(slot.is_none(), "label bound twice");
        *slot = Some(self.writer.offset());
    }

    /// Emit an unconditional jump to `target`
    pub fn jump(&mut self, target: Label) {
        self.writer.emit_opcode(Opcode::Jump);
        let field = self.writer.reserve_i32();
        self.patches.push((field, target));
    }

    /// Emit a conditional jump to `target`
    pub fn cjump(&mut self, target: Label, condition: Param) {
        self.writer.emit_opcode(Opcode::CJump);
        let field = self.writer.reserve_i32();
        condition.encode(&mut self.writer);
        self.patches.push((field, target));
    }

    /// Resolve all labels and produce the finished unit
    ///
    /// Panics if any referenced label was never bound.
    pub fn finish(mut self) -> CodeUnit {
        for (field, label) in &self.patches {
            let target = self.labels[label.0].expect("jump to unbound label");
            let displacement = target as i64 - *field as i64;
            self.writer.patch_i32(*field, displacement as i32);
        }
        CodeUnit {
            meta: self.meta,
            arg_count: self.arg_count,
            local_count: self.local_count,
            consts: self.consts,
            names: self.names,
            funcs: self.funcs,
            code: self.writer.into_bytes(),
        }
    }
}
