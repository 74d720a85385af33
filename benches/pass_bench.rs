//! FakePtr pass benchmarks using criterion.
//!
//! Run with: cargo bench --bench pass_bench

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use fakeptr::ir::{FunctionBuilder, Linkage, Module, TypeId};
use fakeptr::pass::fakeptr::FakePtrPass;
use fakeptr::pass::ModulePass;

/// Build a module with `n` getter/setter pairs over the protected record.
fn accessor_heavy_module(n: usize) -> Module {
    let mut m = Module::new("bench");
    let i32_ty = m.types.int(32);
    let i1_ty = m.types.int(1);
    let s = m.types.create_struct("struct.MyStruct", vec![i32_ty, i1_ty]);
    let s_ptr = m.types.ptr_to(s);

    for i in 0..n {
        build_getter(&mut m, s_ptr, i32_ty, &format!("read_{}", i));
        build_setter(&mut m, s_ptr, i32_ty, &format!("write_{}", i));
    }
    m
}

fn build_getter(m: &mut Module, s_ptr: TypeId, i32_ty: TypeId, name: &str) {
    let fn_ty = m.types.func(i32_ty, vec![s_ptr], false);
    let f = m.add_function(name, fn_ty, Linkage::External).unwrap();
    let mut b = FunctionBuilder::new(m, f);
    let p = b.arg(0);
    b.append_block("entry");
    let slot = b.alloca(s_ptr, 8, "p.addr");
    b.store(p, slot, 8);
    let loaded = b.load(s_ptr, slot, 8, "p.val");
    let field = b.gep(loaded, &[0, 0], "x.addr");
    let x = b.load(i32_ty, field, 4, "x");
    b.ret(Some(x));
}

fn build_setter(m: &mut Module, s_ptr: TypeId, i32_ty: TypeId, name: &str) {
    let void = m.types.void();
    let fn_ty = m.types.func(void, vec![s_ptr, i32_ty], false);
    let f = m.add_function(name, fn_ty, Linkage::External).unwrap();
    let mut b = FunctionBuilder::new(m, f);
    let p = b.arg(0);
    let v = b.arg(1);
    b.append_block("entry");
    let slot = b.alloca(s_ptr, 8, "p.addr");
    b.store(p, slot, 8);
    let loaded = b.load(s_ptr, slot, 8, "p.val");
    let field = b.gep(loaded, &[0, 0], "x.addr");
    b.store(v, field, 4);
    b.ret(None);
}

fn bench_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("fakeptr_pass");
    for n in [4usize, 32, 128] {
        let module = accessor_heavy_module(n);
        group.bench_with_input(BenchmarkId::new("functions", n * 2), &module, |b, module| {
            b.iter_batched(
                || module.clone(),
                |mut m| {
                    let mut pass = FakePtrPass::with_default_config();
                    pass.run_on_module(&mut m);
                    m
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut module = accessor_heavy_module(32);
    let mut pass = FakePtrPass::with_default_config();
    pass.run_on_module(&mut module);

    c.bench_function("print_rewritten_module", |b| {
        b.iter(|| criterion::black_box(module.to_string()));
    });
}

criterion_group!(benches, bench_pass, bench_serialization);
criterion_main!(benches);
