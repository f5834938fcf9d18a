//! Pluggable callee resolution, destructor policies and file configuration

mod common;

use codegraph_escape::config::ConfigError;
use codegraph_escape::features::escape_analysis::infrastructure::FunctionContext;
use codegraph_escape::shared::ir::{Callee, ClassType, InstId, Module, Param, Type, ValueId};
use codegraph_escape::{
    CalleeResolver, CalleeSet, EscapeAnalysis, EscapeConfig, EscapeState, FunctionId,
    NamedDeinitPolicy, Preset,
};
use common::*;
use pretty_assertions::assert_eq;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

/// Treats every call site as opaque
struct OpaqueResolver;

impl CalleeResolver for OpaqueResolver {
    fn resolve_callees(&self, _module: &Module, _caller: FunctionId, _site: InstId) -> CalleeSet {
        CalleeSet::Unknown
    }
}

/// Sends every call site to one known function
struct RedirectResolver(FunctionId);

impl CalleeResolver for RedirectResolver {
    fn resolve_callees(&self, _module: &Module, _caller: FunctionId, _site: InstId) -> CalleeSet {
        CalleeSet::Precise(vec![self.0])
    }
}

/// `inspect(x) { fix_lifetime(x) }` plus an undefined `external(x)`
fn inspect_and_external(module: &mut Module) -> (FunctionId, FunctionId, FunctionId, ValueId) {
    let obj = class(module, "Obj");
    let external = declare_external(module, "external", obj);
    let inspect = module.declare_function("inspect", vec![Param::guaranteed(obj)], None);
    let mut b = module.builder(inspect);
    let entry = b.entry();
    let x = b.arg(0);
    b.fix_lifetime(entry, x);
    b.ret(entry, None);

    let f = module.declare_function("f", vec![], None);
    let mut b = module.builder(f);
    let entry = b.entry();
    let x = b.alloc_ref(entry, obj);
    b.apply(entry, Callee::Direct(inspect), vec![x], None);
    b.apply(entry, Callee::Direct(external), vec![x], None);
    b.ret(entry, None);
    (f, inspect, external, x)
}

#[test]
fn test_opaque_resolver_makes_known_callees_escape() {
    let mut module = Module::new();
    let obj = class(&mut module, "Obj");
    let inspect = module.declare_function("inspect", vec![Param::guaranteed(obj)], None);
    let mut b = module.builder(inspect);
    let entry = b.entry();
    let x = b.arg(0);
    b.fix_lifetime(entry, x);
    b.ret(entry, None);

    let f = module.declare_function("f", vec![], None);
    let mut b = module.builder(f);
    let entry = b.entry();
    let x = b.alloc_ref(entry, obj);
    let site = b.apply(entry, Callee::Direct(inspect), vec![x], None);
    b.ret(entry, None);

    let mut static_ea = analysis();
    let graph = static_ea.connection_graph(&module, f).unwrap();
    assert_eq!(state_of(graph, &module, f, x), EscapeState::NoEscape);

    let mut opaque_ea = analysis().with_resolver(OpaqueResolver);
    let graph = opaque_ea.connection_graph(&module, f).unwrap();
    assert_eq!(state_of(graph, &module, f, x), EscapeState::GlobalEscaping);
    assert!(opaque_ea.can_parameter_escape(&module, f, site, 0, false));
    assert!(opaque_ea.function_info(inspect).is_none());
}

#[test]
fn test_redirect_resolver_replaces_unknown_callee() {
    let mut module = Module::new();
    let (f, inspect, external, x) = inspect_and_external(&mut module);

    let mut static_ea = analysis();
    let graph = static_ea.connection_graph(&module, f).unwrap();
    assert_eq!(state_of(graph, &module, f, x), EscapeState::GlobalEscaping);

    assert_eq!(module.find_function("inspect"), Some(inspect));
    let mut redirected = analysis().with_resolver(RedirectResolver(inspect));
    let graph = redirected.connection_graph(&module, f).unwrap();
    assert_eq!(state_of(graph, &module, f, x), EscapeState::NoEscape);
    assert_eq!(redirected.function_info(inspect).unwrap().callers().len(), 2);
    assert!(redirected.function_info(external).is_none());
}

/// `holder.field = held; release(holder)` where `Outer` has no destructor
fn release_holder(module: &mut Module) -> (FunctionId, ValueId) {
    let inner = class(module, "Inner");
    let outer = module
        .types
        .intern(Type::Class(ClassType::new("Outer").with_field(inner)));
    let f = module.declare_function("f", vec![], None);
    let mut b = module.builder(f);
    let entry = b.entry();
    let holder = b.alloc_ref(entry, outer);
    let held = b.alloc_ref(entry, inner);
    let field = b.ref_element_addr(entry, holder, 0);
    b.store(entry, held, field);
    b.strong_release(entry, holder);
    b.ret(entry, None);
    (f, held)
}

fn held_object_state(ea: &mut EscapeAnalysis, module: &Module, f: FunctionId, held: ValueId) -> EscapeState {
    let ctx = FunctionContext::new(module, f).unwrap();
    let graph = ea.connection_graph(module, f).unwrap();
    let pointer = graph.lookup_node(&ctx, held).unwrap();
    let object = graph.points_to(pointer).unwrap();
    graph.node(object).escape_state()
}

#[test]
fn test_capturing_destructor_leaks_field_contents() {
    let mut module = Module::new();
    let (f, held) = release_holder(&mut module);

    let mut ea = analysis();
    assert_eq!(held_object_state(&mut ea, &module, f, held), EscapeState::GlobalEscaping);
}

#[test]
fn test_named_destructor_policy_keeps_field_contents_local() {
    let mut module = Module::new();
    let (f, held) = release_holder(&mut module);

    let mut ea = analysis().with_deinit_policy(NamedDeinitPolicy::new(["Outer"]));
    assert_ne!(held_object_state(&mut ea, &module, f, held), EscapeState::GlobalEscaping);

    let config = EscapeConfig::default().non_capturing_deinit("Outer");
    let mut from_config = analysis_with(config);
    assert_ne!(
        held_object_state(&mut from_config, &module, f, held),
        EscapeState::GlobalEscaping
    );
}

// ============================================================================
// YAML configuration files
// ============================================================================

fn yaml_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_yaml_file_applies_preset_and_overrides() {
    let file = yaml_file(
        "version: 1\npreset: fast\noverrides:\n  max_nodes: 4096\n  non_capturing_deinits: [Outer]\n",
    );
    let config = EscapeConfig::from_yaml(file.path()).unwrap();

    let fast = EscapeConfig::preset(Preset::Fast);
    assert_eq!(config.max_graph_merges, fast.max_graph_merges);
    assert_eq!(config.max_recursion_depth, fast.max_recursion_depth);
    assert_eq!(config.max_nodes, 4096);
    assert_eq!(config.non_capturing_deinits, vec!["Outer".to_string()]);

    let mut module = Module::new();
    let (f, held) = release_holder(&mut module);
    let mut ea = analysis_with(config);
    assert_ne!(held_object_state(&mut ea, &module, f, held), EscapeState::GlobalEscaping);
}

#[test]
fn test_yaml_file_errors() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.yaml");
    assert!(matches!(EscapeConfig::from_yaml(&missing), Err(ConfigError::Io(_))));

    let file = yaml_file("version: 1\npreset: exhaustive\n");
    let result = EscapeConfig::from_yaml(file.path());
    assert!(matches!(result, Err(ConfigError::UnknownPreset(name)) if name == "exhaustive"));

    let file = yaml_file("version: 7\n");
    let result = EscapeConfig::from_yaml(file.path());
    assert!(matches!(result, Err(ConfigError::UnsupportedVersion { found: 7, .. })));
}
