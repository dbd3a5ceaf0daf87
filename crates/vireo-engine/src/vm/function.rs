//! Loaded compiled functions
//!
//! [`CompiledFunction`] is the engine-side form of a
//! [`vireo_bytecode::CodeUnit`]: the constant pool is materialized to
//! runtime values once at load, names are interned, and nested function
//! descriptors are loaded recursively so `LoadClosure` can hand the
//! runtime a shared descriptor without touching the container again.

use std::rc::Rc;

use vireo_bytecode::{CodeUnit, Constant};

use crate::vm::value::Value;

/// A function loaded for execution
#[derive(Debug)]
pub struct CompiledFunction {
    /// Function name (diagnostic only)
    pub name: Rc<str>,
    /// Declared parameter count
    pub arg_count: u32,
    /// Declared local-variable count
    pub local_count: u32,
    /// Materialized constant pool
    pub consts: Vec<Value>,
    /// Interned name table
    pub names: Vec<Rc<str>>,
    /// Nested function descriptors
    pub funcs: Vec<Rc<CompiledFunction>>,
    /// Encoded instruction stream
    pub code: Vec<u8>,
}

impl CompiledFunction {
    /// Load a unit (and, recursively, its nested functions)
    pub fn from_unit(unit: &CodeUnit) -> Rc<Self> {
        Rc::new(Self {
            name: Rc::from(unit.meta.name.as_str()),
            arg_count: unit.arg_count,
            local_count: unit.local_count,
            consts: unit.consts.iter().map(materialize).collect(),
            names: unit.names.iter().map(|n| Rc::from(n.as_str())).collect(),
            funcs: unit.funcs.iter().map(|f| Self::from_unit(f)).collect(),
            code: unit.code.clone(),
        })
    }
}

fn materialize(constant: &Constant) -> Value {
    match constant {
        Constant::Undefined => Value::Undefined,
        Constant::Null => Value::Null,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Number(n) => Value::Number(*n),
        Constant::Str(s) => Value::str(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_bytecode::{FunctionBuilder, Instr, Param};

    #[test]
    fn test_load_materializes_pools() {
        let mut inner = FunctionBuilder::new("inner", 1, 0);
        inner.emit(Instr::Push { size: 1 });
        inner.emit(Instr::Ret {
            result: Param::Temp(0),
        });

        let mut b = FunctionBuilder::new("outer", 2, 3);
        b.emit(Instr::Push { size: 1 });
        let _ = b.number(4.25);
        let _ = b.string("hi");
        let _ = b.constant(Constant::Null);
        let _ = b.name("x");
        b.function(inner.finish());
        b.emit(Instr::Ret {
            result: Param::Temp(0),
        });

        let func = CompiledFunction::from_unit(&b.finish());
        assert_eq!(func.name.as_ref(), "outer");
        assert_eq!(func.arg_count, 2);
        assert_eq!(func.local_count, 3);
        assert_eq!(func.consts[0], Value::Number(4.25));
        assert_eq!(func.consts[1], Value::str("hi"));
        assert_eq!(func.consts[2], Value::Null);
        assert_eq!(func.names[0].as_ref(), "x");
        assert_eq!(func.funcs.len(), 1);
        assert_eq!(func.funcs[0].name.as_ref(), "inner");
    }
}
