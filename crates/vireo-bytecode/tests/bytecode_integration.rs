//! Integration tests for the code-unit container and verifier

use vireo_bytecode::{
    disassemble, verify_unit, BinaryOp, CodeUnit, Constant, FunctionBuilder, Instr, Opcode, Param,
    UnitError, VerifyError,
};

/// Assemble `fn() { return 10 + 20; }` the way the compiler would.
fn add_unit() -> CodeUnit {
    let mut b = FunctionBuilder::new("add_literals", 0, 0);
    let (t0, t1, t2) = (Param::Temp(0), Param::Temp(1), Param::Temp(2));
    b.emit(Instr::Push { size: 3 });
    let ten = b.number(10.0);
    let twenty = b.number(20.0);
    b.emit(Instr::LoadValue {
        result: t0,
        value: ten,
    });
    b.emit(Instr::LoadValue {
        result: t1,
        value: twenty,
    });
    b.emit(Instr::Binop {
        alu: BinaryOp::Add,
        result: t2,
        lhs: t0,
        rhs: t1,
    });
    b.emit(Instr::Ret { result: t2 });
    b.finish()
}

#[test]
fn test_build_verify_roundtrip() {
    let unit = add_unit();
    verify_unit(&unit).expect("unit verifies");

    let bytes = unit.to_bytes();
    let decoded = CodeUnit::from_bytes(&bytes).expect("container decodes");
    assert_eq!(decoded, unit);
    verify_unit(&decoded).expect("decoded unit verifies");
}

#[test]
fn test_decoded_stream_matches_disassembly() {
    let unit = add_unit();
    let text = disassemble(&unit).unwrap();
    assert!(text.contains("PUSH 3"));
    assert!(text.contains("BINOP add t2, t0, t1"));
    assert!(text.contains("RET t2"));
}

#[test]
fn test_corrupted_container_is_rejected_before_verification() {
    let unit = add_unit();
    let mut bytes = unit.to_bytes();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x80;
    assert!(matches!(
        CodeUnit::from_bytes(&bytes),
        Err(UnitError::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_verifier_catches_frame_violation_in_well_formed_container() {
    // A structurally valid container whose stream indexes t5 in a frame of 3
    let mut b = FunctionBuilder::new("bad", 0, 0);
    b.emit(Instr::Push { size: 3 });
    b.emit(Instr::MoveTemp {
        result: Param::Temp(5),
        source: Param::Temp(0),
    });
    b.emit(Instr::Ret {
        result: Param::Temp(0),
    });
    let unit = b.finish();

    let decoded = CodeUnit::from_bytes(&unit.to_bytes()).unwrap();
    assert!(matches!(
        verify_unit(&decoded),
        Err(VerifyError::TempOutOfRange { index: 5, .. })
    ));
}

#[test]
fn test_exception_handler_stream_assembles() {
    // Push(2); CreateExceptionHandler(t0); Throw(c0); Ret(t0) — the unwind
    // scenario the engine tests execute end to end.
    let mut b = FunctionBuilder::new("thrower", 0, 0);
    let t0 = Param::Temp(0);
    b.emit(Instr::Push { size: 2 });
    b.emit(Instr::CallBuiltinCreateExceptionHandler { result: t0 });
    let payload = b.constant(Constant::Number(99.0));
    b.emit(Instr::CallBuiltinThrow { arg: payload });
    b.emit(Instr::Ret { result: t0 });
    let unit = b.finish();

    verify_unit(&unit).expect("handler stream verifies");
    let text = disassemble(&unit).unwrap();
    assert!(text.contains(Opcode::CallBuiltinCreateExceptionHandler.name()));
    assert!(text.contains(Opcode::CallBuiltinThrow.name()));
}

#[test]
fn test_cjump_skipping_ret_verifies() {
    let mut b = FunctionBuilder::new("skip", 0, 0);
    let (t0, t1) = (Param::Temp(0), Param::Temp(1));
    b.emit(Instr::Push { size: 2 });
    let yes = b.constant(Constant::Bool(true));
    b.emit(Instr::LoadValue {
        result: t0,
        value: yes,
    });
    let target = b.label();
    b.cjump(target, t0);
    b.emit(Instr::Ret { result: t0 });
    b.bind(target);
    b.emit(Instr::Ret { result: t1 });
    let unit = b.finish();

    verify_unit(&unit).expect("cjump stream verifies");
}

#[test]
fn test_nested_closure_unit_roundtrip() {
    let mut inner = FunctionBuilder::new("inner", 1, 0);
    inner.emit(Instr::Push { size: 1 });
    inner.emit(Instr::MoveTemp {
        result: Param::Temp(0),
        source: Param::Arg(0),
    });
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
    let unit = b.finish();

    verify_unit(&unit).expect("closure unit verifies");
    let decoded = CodeUnit::from_bytes(&unit.to_bytes()).unwrap();
    assert_eq!(decoded.funcs.len(), 1);
    assert_eq!(decoded.funcs[0].arg_count, 1);
    verify_unit(&decoded).expect("decoded closure unit verifies");
}
