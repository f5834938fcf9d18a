//! Performance benchmarks for the escape analysis
//!
//! - Call chains: bottom-up summary merging along a long chain
//! - Wide functions: many allocations, stores and loads in one body
//! - Queries: alias and escape questions on a completed graph

use codegraph_escape::shared::ir::{Callee, ClassType, FunctionId, Module, Param, Type, TypeId, ValueId};
use codegraph_escape::{EscapeAnalysis, EscapeConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

// ============================================================================
// Synthetic modules
// ============================================================================

fn object_type(module: &mut Module) -> TypeId {
    module.types.intern(Type::Class(ClassType::new("Node")))
}

/// `chain0(x) -> chain1(x) -> ...`, the last link storing `x` in a global
fn call_chain(depth: usize) -> (Module, FunctionId) {
    let mut module = Module::new();
    let obj = object_type(&mut module);
    let functions: Vec<FunctionId> = (0..depth)
        .map(|i| module.declare_function(&format!("chain{i}"), vec![Param::guaranteed(obj)], None))
        .collect();
    for (i, &f) in functions.iter().enumerate() {
        let mut b = module.builder(f);
        let entry = b.entry();
        let x = b.arg(0);
        match functions.get(i + 1) {
            Some(&next) => {
                b.apply(entry, Callee::Direct(next), vec![x], None);
            }
            None => {
                let global = b.global_addr(entry, "sink", obj, false);
                b.store(entry, x, global);
            }
        }
        b.ret(entry, None);
    }
    (module, functions[0])
}

/// One function with `width` objects shuffled through stack slots
fn wide_function(width: usize) -> (Module, FunctionId, Vec<ValueId>) {
    let mut module = Module::new();
    let obj = object_type(&mut module);
    let f = module.declare_function("wide", vec![], None);
    let mut b = module.builder(f);
    let entry = b.entry();
    let mut values = Vec::with_capacity(width * 2);
    for i in 0..width {
        let x = b.alloc_ref(entry, obj);
        let slot = b.alloc_stack(entry, obj);
        b.store(entry, x, slot);
        let y = b.load(entry, slot);
        if i % 3 == 0 {
            b.strong_release(entry, y);
        }
        values.push(x);
        values.push(y);
    }
    b.ret(entry, None);
    (module, f, values)
}

fn analysis() -> EscapeAnalysis {
    let config = EscapeConfig::default().max_nodes(1_000_000).max_recursion_depth(32);
    EscapeAnalysis::new(config).expect("valid config")
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_call_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_chain");

    for depth in [4, 16, 32] {
        let (module, root) = call_chain(depth);
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                let mut ea = analysis();
                let valid = ea.connection_graph(&module, root).map(|g| g.is_valid());
                black_box(valid)
            });
        });
    }

    group.finish();
}

fn bench_wide_function(c: &mut Criterion) {
    let mut group = c.benchmark_group("wide_function");

    for width in [16, 128, 1024] {
        let (module, f, _) = wide_function(width);
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                let mut ea = analysis();
                let nodes = ea.connection_graph(&module, f).map(|g| g.node_count());
                black_box(nodes)
            });
        });
    }

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let (module, f, values) = wide_function(256);
    let mut ea = analysis();
    let _ = ea.connection_graph(&module, f);

    c.bench_function("can_point_to_same_memory", |b| {
        b.iter(|| {
            let mut aliased = 0usize;
            for pair in values.windows(2) {
                if ea.can_point_to_same_memory(&module, f, pair[0], pair[1]) {
                    aliased += 1;
                }
            }
            black_box(aliased)
        });
    });
}

criterion_group!(benches, bench_call_chain, bench_wide_function, bench_queries);
criterion_main!(benches);
