//! Dispatch throughput for both strategies

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vireo_bytecode::{BinaryOp, CodeUnit, FunctionBuilder, Instr, Param};
use vireo_engine::{execute, CompiledFunction, DispatchMode, ExecutionContext, StdRuntime, Value};

/// Counts down from `iters`, accumulating the sum
fn loop_unit(iters: f64) -> CodeUnit {
    let t0 = Param::Temp(0);
    let t1 = Param::Temp(1);
    let t2 = Param::Temp(2);
    let mut b = FunctionBuilder::new("countdown", 0, 0);
    b.emit(Instr::Push { size: 3 });
    let start = b.number(iters);
    let zero = b.number(0.0);
    let one = b.number(1.0);
    b.emit(Instr::LoadValue {
        result: t0,
        value: start,
    });
    b.emit(Instr::LoadValue {
        result: t1,
        value: zero,
    });
    let top = b.label();
    let body = b.label();
    let done = b.label();
    b.bind(top);
    b.emit(Instr::Binop {
        alu: BinaryOp::Gt,
        result: t2,
        lhs: t0,
        rhs: zero,
    });
    b.cjump(body, t2);
    b.jump(done);
    b.bind(body);
    b.emit(Instr::Binop {
        alu: BinaryOp::Add,
        result: t1,
        lhs: t1,
        rhs: t0,
    });
    b.emit(Instr::Binop {
        alu: BinaryOp::Sub,
        result: t0,
        lhs: t0,
        rhs: one,
    });
    b.jump(top);
    b.bind(done);
    b.emit(Instr::Ret { result: t1 });
    b.finish()
}

fn bench_mode(c: &mut Criterion, name: &str, mode: DispatchMode) {
    let unit = loop_unit(1000.0);
    let func = CompiledFunction::from_unit(&unit);
    c.bench_function(name, |b| {
        b.iter(|| {
            let ctx = ExecutionContext::new(Value::Undefined, vec![], 0);
            let mut runtime = StdRuntime::new(mode);
            black_box(execute(&func, ctx, &mut runtime, mode).unwrap())
        });
    });
}

fn bench_dispatch(c: &mut Criterion) {
    bench_mode(c, "switch_countdown_1k", DispatchMode::Switch);
    bench_mode(c, "jump_table_countdown_1k", DispatchMode::JumpTable);
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
