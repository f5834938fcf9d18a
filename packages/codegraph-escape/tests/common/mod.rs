//! Shared fixtures for codegraph-escape integration tests

#![allow(dead_code)]

use codegraph_escape::shared::ir::{Callee, ClassType, FunctionId, Module, Param, Type, TypeId, ValueId};
use codegraph_escape::{ConnectionGraph, EscapeAnalysis, EscapeConfig, EscapeState};
use codegraph_escape::features::escape_analysis::infrastructure::FunctionContext;

/// Route driver logs to the test harness. Set `RUST_LOG=codegraph_escape=debug`
/// to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Analysis with graph verification enabled
pub fn analysis() -> EscapeAnalysis {
    analysis_with(EscapeConfig::default())
}

pub fn analysis_with(config: EscapeConfig) -> EscapeAnalysis {
    init_tracing();
    EscapeAnalysis::new(config.verify_graphs(true)).expect("valid test config")
}

pub fn class(module: &mut Module, name: &str) -> TypeId {
    module.types.intern(Type::Class(ClassType::new(name)))
}

/// Escape state of the node of `value` in `graph`
pub fn state_of(graph: &ConnectionGraph, module: &Module, f: FunctionId, value: ValueId) -> EscapeState {
    let ctx = FunctionContext::new(module, f).expect("function exists");
    let node = graph.lookup_node(&ctx, value).expect("value has a node");
    graph.node(node).escape_state()
}

/// Declared but never defined, so calls to it resolve to unknown callees
pub fn declare_external(module: &mut Module, name: &str, obj: TypeId) -> FunctionId {
    module.declare_function(name, vec![Param::guaranteed(obj)], None)
}

/// `fn name(x) { cache = x }`
pub fn define_keep(module: &mut Module, name: &str, obj: TypeId) -> FunctionId {
    let f = module.declare_function(name, vec![Param::guaranteed(obj)], None);
    let mut b = module.builder(f);
    let entry = b.entry();
    let x = b.arg(0);
    let global = b.global_addr(entry, "cache", obj, false);
    b.store(entry, x, global);
    b.ret(entry, None);
    f
}

/// `fn name(x) -> x`
pub fn define_identity(module: &mut Module, name: &str, obj: TypeId) -> FunctionId {
    let f = module.declare_function(name, vec![Param::guaranteed(obj)], Some(obj));
    let mut b = module.builder(f);
    let entry = b.entry();
    let x = b.arg(0);
    b.ret(entry, Some(x));
    f
}

/// `f0(x) -> f1(x) -> ... -> f{depth-1}(x)`, the last one a no-op.
/// Returns the functions outermost first.
pub fn call_chain(module: &mut Module, depth: usize, obj: TypeId) -> Vec<FunctionId> {
    let functions: Vec<FunctionId> = (0..depth)
        .map(|i| module.declare_function(&format!("chain{i}"), vec![Param::guaranteed(obj)], None))
        .collect();
    for (i, &f) in functions.iter().enumerate() {
        let mut b = module.builder(f);
        let entry = b.entry();
        let x = b.arg(0);
        if let Some(&next) = functions.get(i + 1) {
            b.apply(entry, Callee::Direct(next), vec![x], None);
        }
        b.ret(entry, None);
    }
    functions
}
