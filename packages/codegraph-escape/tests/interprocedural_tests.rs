//! Bottom-up driver: summaries, recursion, caps and invalidation

mod common;

use codegraph_escape::features::escape_analysis::application::merge_callee_graph;
use codegraph_escape::features::escape_analysis::infrastructure::FunctionContext;
use codegraph_escape::shared::ir::{Callee, Module, Param, ValueId};
use codegraph_escape::{ConnectionGraph, EscapeConfig, EscapeState, FunctionId};
use common::*;
use pretty_assertions::assert_eq;

/// `a(x) { b(x) }`, `b(x) { a(x); keep(x)? }`
fn mutual_recursion(module: &mut Module, b_keeps: bool) -> (FunctionId, FunctionId) {
    let obj = class(module, "Obj");
    let keep = define_keep(module, "keep", obj);
    let a = module.declare_function("a", vec![Param::guaranteed(obj)], None);
    let b_fn = module.declare_function("b", vec![Param::guaranteed(obj)], None);

    let mut b = module.builder(a);
    let entry = b.entry();
    let x = b.arg(0);
    b.apply(entry, Callee::Direct(b_fn), vec![x], None);
    b.ret(entry, None);

    let mut b = module.builder(b_fn);
    let entry = b.entry();
    let x = b.arg(0);
    b.apply(entry, Callee::Direct(a), vec![x], None);
    if b_keeps {
        b.apply(entry, Callee::Direct(keep), vec![x], None);
    }
    b.ret(entry, None);
    (a, b_fn)
}

#[test]
fn test_mutual_recursion_terminates_with_valid_summaries() {
    let mut module = Module::new();
    let (a, b) = mutual_recursion(&mut module, false);

    let mut ea = analysis();
    assert!(ea.summary_graph(&module, a).unwrap().is_valid());
    assert!(ea.summary_graph(&module, b).unwrap().is_valid());
    assert!(ea.function_info(a).unwrap().is_computed());
    assert!(ea.function_info(b).unwrap().is_computed());
    ea.verify_all().unwrap();
}

#[test]
fn test_escape_through_recursive_cycle_reaches_both_functions() {
    let mut module = Module::new();
    let (a, b) = mutual_recursion(&mut module, true);

    let mut ea = analysis();
    let ctx_a = FunctionContext::new(&module, a).unwrap();
    let x = ctx_a.function.arguments()[0];
    let summary = ea.summary_graph(&module, a).unwrap();
    let node = summary.lookup_node(&ctx_a, x).unwrap();
    assert_eq!(summary.node(node).escape_state(), EscapeState::GlobalEscaping);

    let site = module.function(a).unwrap().block(ctx_a.function.entry_block()).insts[0];
    assert!(ea.can_parameter_escape(&module, a, site, 0, false));
    assert!(ea.function_info(b).unwrap().is_computed());
}

#[test]
fn test_single_merge_iteration_still_converges() {
    let mut module = Module::new();
    let (a, b) = mutual_recursion(&mut module, true);

    let mut ea = analysis_with(EscapeConfig::default().max_graph_merges(1));
    assert!(ea.connection_graph(&module, a).is_ok());
    assert!(ea.connection_graph(&module, b).is_ok());
    ea.verify_all().unwrap();
}

#[test]
fn test_caller_sees_callee_global_store() {
    let mut module = Module::new();
    let obj = class(&mut module, "Obj");
    let keep = define_keep(&mut module, "keep", obj);
    let f = module.declare_function("f", vec![], None);
    let mut b = module.builder(f);
    let entry = b.entry();
    let kept = b.alloc_ref(entry, obj);
    let local = b.alloc_ref(entry, obj);
    b.apply(entry, Callee::Direct(keep), vec![kept], None);
    b.ret(entry, None);

    let mut ea = analysis();
    let graph = ea.connection_graph(&module, f).unwrap();
    assert_eq!(state_of(graph, &module, f, kept), EscapeState::GlobalEscaping);
    assert_eq!(state_of(graph, &module, f, local), EscapeState::NoEscape);

    let callers = ea.function_info(keep).unwrap().callers();
    assert_eq!(callers.len(), 1);
    assert_eq!(callers[0].caller, f);
}

/// States of `values` and of what they point to, in order
fn value_and_content_states(graph: &ConnectionGraph, ctx: &FunctionContext<'_>, values: &[ValueId]) -> Vec<EscapeState> {
    let mut states = Vec::new();
    for &value in values {
        let node = graph.merge_target(graph.lookup_node(ctx, value).unwrap());
        states.push(graph.node(node).escape_state());
        states.push(
            graph
                .points_to(node)
                .map(|content| graph.node(content).escape_state())
                .unwrap_or_default(),
        );
    }
    states
}

#[test]
fn test_full_graph_splice_is_at_least_as_conservative_as_summary() {
    let mut module = Module::new();
    let obj = class(&mut module, "Obj");

    // fn keep_and_return(x) -> x { cache = x }
    let callee = module.declare_function("keep_and_return", vec![Param::guaranteed(obj)], Some(obj));
    let mut b = module.builder(callee);
    let entry = b.entry();
    let x = b.arg(0);
    let global = b.global_addr(entry, "cache", obj, false);
    b.store(entry, x, global);
    b.ret(entry, Some(x));

    let f = module.declare_function("f", vec![], None);
    let mut b = module.builder(f);
    let entry = b.entry();
    let x = b.alloc_ref(entry, obj);
    let site = b.apply(entry, Callee::Direct(callee), vec![x], Some(obj));
    let y = b.result(site).unwrap();
    b.ret(entry, None);

    let mut ea = analysis();
    ea.connection_graph(&module, callee).unwrap();
    let info = ea.function_info(callee).unwrap();

    let ctx = FunctionContext::new(&module, f).unwrap();
    let mut base = ConnectionGraph::new(Some(f), false);
    base.get_value_content(&ctx, x).unwrap();
    base.get_node(&ctx, y).unwrap();

    let splice = |callee_graph: &ConnectionGraph| {
        let mut caller_graph = base.clone();
        let mut callee_graph = callee_graph.clone();
        merge_callee_graph(&module, f, site, &mut caller_graph, callee, &mut callee_graph);
        caller_graph.propagate_escape_states();
        assert!(caller_graph.verify_structure(false).is_ok());
        value_and_content_states(&caller_graph, &ctx, &[x, y])
    };
    let from_summary = splice(info.summary());
    let from_graph = splice(info.graph());

    // x's object is stored into a global by the callee
    assert_eq!(from_summary[1], EscapeState::GlobalEscaping);
    for (summary_state, graph_state) in from_summary.iter().zip(&from_graph) {
        assert!(graph_state >= summary_state, "{graph_state:?} < {summary_state:?}");
    }
}

#[test]
fn test_deep_chain_summarizes_every_callee() {
    let mut module = Module::new();
    let obj = class(&mut module, "Obj");
    let chain = call_chain(&mut module, 12, obj);

    let mut ea = analysis_with(EscapeConfig::default().max_recursion_depth(16));
    ea.connection_graph(&module, chain[0]).unwrap();
    assert_eq!(ea.analyzed_count(), chain.len());
    for &f in &chain {
        assert!(ea.function_info(f).unwrap().is_computed());
    }
    ea.verify_all().unwrap();
}

#[test]
fn test_recursion_depth_cap_boundary() {
    let mut module = Module::new();
    let obj = class(&mut module, "Obj");
    let chain = call_chain(&mut module, 6, obj);

    let mut ea = analysis_with(EscapeConfig::default().max_recursion_depth(3));
    ea.connection_graph(&module, chain[0]).unwrap();
    assert_eq!(ea.analyzed_count(), 4);

    // chain[3] sits at the cap, so its call is treated as unknown
    let last = chain[3];
    let x = module.function(last).unwrap().arguments()[0];
    let graph = ea.connection_graph(&module, last).unwrap();
    assert_eq!(state_of(graph, &module, last, x), EscapeState::GlobalEscaping);

    let inner = chain[2];
    let x = module.function(inner).unwrap().arguments()[0];
    let graph = ea.connection_graph(&module, inner).unwrap();
    assert_eq!(state_of(graph, &module, inner, x), EscapeState::GlobalEscaping);
}

#[test]
fn test_recompute_reproduces_graphs() {
    let mut module = Module::new();
    let obj = class(&mut module, "Obj");
    let chain = call_chain(&mut module, 4, obj);
    let leaf = chain[3];

    let mut ea = analysis();
    ea.connection_graph(&module, chain[0]).unwrap();
    let graph_before = ea.connection_graph(&module, leaf).unwrap().dump();
    let summary_before = ea.summary_graph(&module, leaf).unwrap().dump();

    ea.recompute(&module, leaf).unwrap();
    assert!(!ea.function_info(chain[0]).is_some_and(|info| info.is_computed()));

    assert_eq!(graph_before, ea.connection_graph(&module, leaf).unwrap().dump());
    assert_eq!(summary_before, ea.summary_graph(&module, leaf).unwrap().dump());
    assert!(ea.connection_graph(&module, chain[0]).unwrap().is_valid());
}

#[test]
fn test_invalidate_all_forgets_everything() {
    let mut module = Module::new();
    let obj = class(&mut module, "Obj");
    let chain = call_chain(&mut module, 3, obj);

    let mut ea = analysis();
    ea.connection_graph(&module, chain[0]).unwrap();
    ea.invalidate_all();
    assert_eq!(ea.analyzed_count(), 0);
    assert!(ea.connection_graph(&module, chain[2]).is_ok());
}

#[test]
fn test_node_cap_boundary() {
    let build = |allocs: usize| {
        let mut module = Module::new();
        let obj = class(&mut module, "Obj");
        let f = module.declare_function("f", vec![], None);
        let mut b = module.builder(f);
        let entry = b.entry();
        for _ in 0..allocs {
            b.alloc_ref(entry, obj);
        }
        b.ret(entry, None);
        (module, f)
    };

    let (small, f) = build(2);
    let mut ea = analysis_with(EscapeConfig::default().max_nodes(16));
    assert!(ea.connection_graph(&small, f).unwrap().is_valid());

    let (large, f) = build(17);
    let mut ea = analysis_with(EscapeConfig::default().max_nodes(16));
    assert!(!ea.connection_graph(&large, f).unwrap().is_valid());
    assert!(!ea.summary_graph(&large, f).unwrap().is_valid());
}

#[test]
fn test_unknown_callee_invalidates_nothing_else() {
    let mut module = Module::new();
    let obj = class(&mut module, "Obj");
    let external = declare_external(&mut module, "external", obj);
    let f = module.declare_function("f", vec![Param::guaranteed(obj)], None);
    let mut b = module.builder(f);
    let entry = b.entry();
    let x = b.arg(0);
    b.apply(entry, Callee::Direct(external), vec![x], None);
    b.ret(entry, None);

    let mut ea = analysis();
    let summary = ea.summary_graph(&module, f).unwrap();
    assert!(summary.is_valid());
    assert!(summary.dump().contains("Arg"));
    assert!(ea.function_info(external).is_none());
}
