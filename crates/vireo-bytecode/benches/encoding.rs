//! Encoding/decoding throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vireo_bytecode::{BinaryOp, BytecodeReader, BytecodeWriter, Instr, Param};

fn build_stream(instr_count: usize) -> Vec<u8> {
    let mut w = BytecodeWriter::with_capacity(instr_count * 17);
    Instr::Push {
        size: instr_count as u32 + 2,
    }
    .encode(&mut w);
    for i in 0..instr_count {
        Instr::Binop {
            alu: BinaryOp::Add,
            result: Param::Temp(i as u32),
            lhs: Param::Temp(0),
            rhs: Param::Temp(1),
        }
        .encode(&mut w);
    }
    Instr::Ret {
        result: Param::Temp(0),
    }
    .encode(&mut w);
    w.into_bytes()
}

fn bench_encode(c: &mut Criterion) {
    c.bench_function("encode_1k_binops", |b| {
        b.iter(|| black_box(build_stream(1000)));
    });
}

fn bench_decode(c: &mut Criterion) {
    let bytes = build_stream(1000);
    c.bench_function("decode_1k_binops", |b| {
        b.iter(|| {
            let mut reader = BytecodeReader::new(&bytes);
            let mut count = 0usize;
            while reader.has_more() {
                black_box(Instr::decode(&mut reader).unwrap());
                count += 1;
            }
            count
        });
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
