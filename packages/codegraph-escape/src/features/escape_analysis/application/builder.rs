//! Connection Graph Builder
//!
//! Visits every instruction of the reachable blocks once, applies its
//! [`Effect`], then links block arguments to their incoming values.
//! Calls with precisely known callees recurse into the callees' graphs up to
//! `max_recursion_depth`; their summaries are spliced in later by the
//! driver.

use super::driver::{set_all_escaping, EscapeAnalysis};
use super::effect_rules::{classify, Effect};
use super::function_order::{FunctionInfo, FunctionOrder};
use crate::features::escape_analysis::domain::EscapeState;
use crate::features::escape_analysis::infrastructure::{ConnectionGraph, FunctionContext};
use crate::features::escape_analysis::ports::CalleeSet;
use crate::shared::ir::{
    BlockId, ContainerOp, FunctionId, InstId, InstKind, Module, PointerKind, Type, ValueId,
};
use tracing::{trace, warn};

impl EscapeAnalysis {
    /// Build the full graph of `function` and, recursively, of its callees
    pub(super) fn build_connection_graph(
        &mut self,
        module: &Module,
        function: FunctionId,
        order: &mut FunctionOrder,
        depth: usize,
    ) {
        let Some(ctx) = FunctionContext::new(module, function) else {
            return;
        };
        let info = self
            .infos
            .entry(function)
            .or_insert_with(|| FunctionInfo::new(function));
        if order.prepare_for_visiting(function, info) {
            return;
        }
        trace!("escape analysis: build graph of {} at depth {}", ctx.function.name, depth);

        // Taken out so that callees can be built while this graph is open
        let mut graph = std::mem::take(&mut info.graph);
        let reachable = ctx.function.reachable_blocks();

        'blocks: for &block in &reachable {
            for &inst in &ctx.function.block(block).insts {
                self.analyze_instruction(&ctx, &mut graph, inst, order, depth);
                if graph.node_count() > self.config.max_nodes {
                    warn!(
                        "escape analysis: graph of {} exceeds {} nodes, giving up",
                        ctx.function.name, self.config.max_nodes
                    );
                    graph.invalidate();
                    break 'blocks;
                }
            }
        }
        if graph.is_valid() {
            link_block_arguments(&ctx, &mut graph, &reachable);
        }

        if let Some(info) = self.infos.get_mut(&function) {
            info.graph = graph;
        }
    }

    fn analyze_instruction(
        &mut self,
        ctx: &FunctionContext<'_>,
        graph: &mut ConnectionGraph,
        inst: InstId,
        order: &mut FunctionOrder,
        depth: usize,
    ) {
        match classify(ctx, inst) {
            Effect::None => {}

            Effect::Allocate { result } => {
                graph.get_node(ctx, result);
            }

            Effect::MapToContent { result, address } => match graph.get_value_content(ctx, address) {
                Some(content) => graph.set_node(result, content),
                None => graph.set_value_escapes_global(ctx, result),
            },

            Effect::Store { value, address } => {
                let Some(value_node) = graph.get_node(ctx, value) else {
                    return;
                };
                match graph.get_value_content(ctx, address) {
                    Some(content) => {
                        graph.defer(content, value_node);
                    }
                    None => graph.set_value_escapes_global(ctx, value),
                }
            }

            Effect::CopyAddr { src, dest } => {
                let Some(loaded) = graph.get_value_content(ctx, src) else {
                    set_all_escaping(ctx, graph, inst);
                    return;
                };
                match graph.get_value_content(ctx, dest) {
                    Some(dest_content) => {
                        graph.defer(dest_content, loaded);
                    }
                    None => graph.set_value_escapes_global(ctx, src),
                }
            }

            Effect::Copy { result, operand } => match graph.get_node(ctx, operand) {
                Some(op_node) => {
                    if let Some(result_node) = graph.get_node(ctx, result) {
                        graph.defer(result_node, op_node);
                    }
                }
                None => graph.set_value_escapes_global(ctx, result),
            },

            Effect::Defer { result, operands } => {
                let Some(mut result_node) = graph.get_node(ctx, result) else {
                    return;
                };
                for op in operands {
                    if let Some(op_node) = graph.get_node(ctx, op) {
                        result_node = graph.defer(result_node, op_node);
                    }
                }
            }

            Effect::DeferAddresses { dest, src } => {
                if let (Some(dest_node), Some(src_node)) =
                    (graph.get_node(ctx, dest), graph.get_node(ctx, src))
                {
                    graph.defer(dest_node, src_node);
                }
            }

            Effect::Release { operand } => {
                if depth < self.config.max_recursion_depth
                    && self.build_destructor_call(ctx, inst, operand, order, depth)
                {
                    return;
                }
                self.apply_release(ctx, graph, operand);
            }

            Effect::DestroyAddr { address } => {
                let Some(value_node) = graph.get_value_content(ctx, address) else {
                    return;
                };
                let target = graph.get_field_content(value_node).unwrap_or(value_node);
                let unknown = graph.get_or_create_unknown_content(target);
                graph.set_escapes_global(unknown);
            }

            Effect::Return { value } => {
                let Some(value_node) = graph.get_node(ctx, value) else {
                    return;
                };
                let ret = graph.get_return_node();
                graph.defer(ret, value_node);
                if let Some(content) = graph.get_value_content(ctx, value) {
                    graph.merge_escape_state(content, EscapeState::Returned);
                }
            }

            Effect::Call { container } => {
                if let Some(op) = container {
                    if self.config.model_container_semantics && apply_container_op(ctx, graph, inst, op) {
                        return;
                    }
                }
                if depth < self.config.max_recursion_depth {
                    if let CalleeSet::Precise(callees) =
                        self.resolver.resolve_callees(ctx.module, ctx.id, inst)
                    {
                        let all_defined = !callees.is_empty()
                            && callees.iter().all(|f| ctx.module.function(*f).is_some());
                        if all_defined {
                            self.build_callees(ctx.module, ctx.id, inst, &callees, order, depth);
                            return;
                        }
                    }
                }
                set_all_escaping(ctx, graph, inst);
            }

            Effect::EscapeAll => set_all_escaping(ctx, graph, inst),
        }
    }

    /// Record `site` as a caller edge of every callee and build the callees
    /// not visited yet in this update
    fn build_callees(
        &mut self,
        module: &Module,
        caller: FunctionId,
        site: InstId,
        callees: &[FunctionId],
        order: &mut FunctionOrder,
        depth: usize,
    ) {
        for &callee in callees {
            let info = self
                .infos
                .entry(callee)
                .or_insert_with(|| FunctionInfo::new(callee));
            info.add_caller(caller, site);
            if order.is_visited(info) {
                continue;
            }
            self.build_connection_graph(module, callee, order, depth + 1);
            if let Some(info) = self.infos.get_mut(&callee) {
                order.try_to_schedule(callee, info);
            }
        }
    }

    /// A release of a local object of a known class is a call to its
    /// destructor
    fn build_destructor_call(
        &mut self,
        ctx: &FunctionContext<'_>,
        site: InstId,
        released: ValueId,
        order: &mut FunctionOrder,
        depth: usize,
    ) -> bool {
        if !ctx.points_to_local_object(released) {
            return false;
        }
        let Some(class) = ctx.local_object_class(released) else {
            return false;
        };
        let Some(deinit) = ctx.module.types.class(class).and_then(|c| c.deinit) else {
            return false;
        };
        if ctx.module.function(deinit).is_none() {
            return false;
        }
        self.build_callees(ctx.module, ctx.id, site, &[deinit], order, depth);
        true
    }

    /// Releasing the last reference runs a destructor that may capture what
    /// the object's fields point to, but never the object itself
    fn apply_release(&self, ctx: &FunctionContext<'_>, graph: &mut ConnectionGraph, released: ValueId) {
        let Some(object) = graph.get_value_content(ctx, released) else {
            return;
        };
        let Some(field) = graph.get_field_content(object) else {
            let unknown = graph.get_or_create_unknown_content(object);
            graph.set_escapes_global(unknown);
            return;
        };
        if !self.deinit_known_not_to_capture(ctx, released) {
            let stored = ctx.module.types.stored_pointer_kind(ctx.value_type(released));
            if stored != PointerKind::NoPointer {
                let unknown = graph.get_or_create_unknown_content(field);
                graph.set_escapes_global(unknown);
            }
            return;
        }
        // The destructor only releases the fields, which in turn may release
        // whatever they reference
        let referenced = graph.get_or_create_reference_content(ctx, None, field);
        let escaping = graph.points_to(referenced).unwrap_or(referenced);
        let unknown = graph.get_or_create_unknown_content(escaping);
        graph.set_escapes_global(unknown);
    }

    /// True if the destructor run when `value` dies only releases its fields
    fn deinit_known_not_to_capture(&self, ctx: &FunctionContext<'_>, mut value: ValueId) -> bool {
        loop {
            let ty = ctx.value_type(value);
            match ctx.type_of(ty) {
                Type::Box(_) => return true,
                Type::Class(class) if !self.deinit_policy.deinit_captures_fields(class) => {
                    return true
                }
                _ => {}
            }
            match ctx.function.defining_kind(value) {
                Some(InstKind::FunctionRef { .. }) => return true,
                Some(InstKind::PartialApply { callee, args }) => {
                    return std::iter::once(callee)
                        .chain(args.iter())
                        .filter(|op| ctx.is_pointer(**op))
                        .all(|op| self.deinit_known_not_to_capture(ctx, *op));
                }
                _ => {}
            }
            match ctx.pointer_base(value) {
                Some(base) => value = base,
                None => return false,
            }
        }
    }
}

/// Hand-written effects of container operations. Returns false if the
/// call has to be treated like any other call.
fn apply_container_op(
    ctx: &FunctionContext<'_>,
    graph: &mut ConnectionGraph,
    site: InstId,
    op: ContainerOp,
) -> bool {
    if op.has_no_effect() {
        return true;
    }
    let InstKind::Apply { args, .. } = &ctx.function.inst(site).kind else {
        return false;
    };
    let Some(&container) = args.last() else {
        return false;
    };
    let result = ctx.function.result(site);

    match op {
        ContainerOp::GetElement => {
            let Some(object) = graph.get_value_content(ctx, container) else {
                return false;
            };
            let loaded = match result {
                // A trivial element loads no pointer
                Some(result) if !ctx.is_pointer(result) => return true,
                Some(result) => graph.get_node(ctx, result),
                None => match args.first() {
                    Some(&dest) if args.len() >= 3 => graph.get_value_content(ctx, dest),
                    _ => None,
                },
            };
            match (loaded, graph.get_field_content(object)) {
                (Some(loaded), Some(storage)) => {
                    graph.defer(storage, loaded);
                    true
                }
                _ => false,
            }
        }
        ContainerOp::GetElementAddress => {
            let Some(object) = graph.get_value_content(ctx, container) else {
                return false;
            };
            let Some(address) = result.and_then(|r| graph.get_node(ctx, r)) else {
                return false;
            };
            graph.defer(object, address);
            true
        }
        ContainerOp::SetElement => {
            let Some(&element) = args.first() else {
                return false;
            };
            let Some(object) = graph.get_value_content(ctx, container) else {
                return false;
            };
            let Some(element_node) = graph.get_node(ctx, element) else {
                return true;
            };
            match graph.get_field_content(object) {
                Some(storage) => {
                    graph.defer(storage, element_node);
                    true
                }
                None => false,
            }
        }
        ContainerOp::WithUnsafeMutableBufferPointer => {
            // `self` is passed inout
            let Some(container_struct) = graph.get_value_content(ctx, container) else {
                return false;
            };
            if let Some(&closure) = args.first() {
                graph.set_value_escapes_global(ctx, closure);
            }
            let object = graph.get_or_create_content_node(container_struct, true, false);
            if !graph.node(object).is_interior() {
                graph.set_escapes_global(object);
                return true;
            }
            let storage = graph.get_or_create_content_node(object, false, true);
            graph.set_escapes_global(storage);
            true
        }
        _ => false,
    }
}

/// Defer every block argument of the non-entry reachable blocks to the
/// values flowing in from its predecessors
fn link_block_arguments(ctx: &FunctionContext<'_>, graph: &mut ConnectionGraph, reachable: &[BlockId]) {
    let entry = ctx.function.entry_block();
    for &block in reachable {
        if block == entry {
            continue;
        }
        for (idx, &arg) in ctx.function.block(block).args.iter().enumerate() {
            let Some(mut arg_node) = graph.get_node(ctx, arg) else {
                continue;
            };
            let Some(incoming) = ctx.function.incoming_values(reachable, block, idx) else {
                graph.set_escapes_global(arg_node);
                continue;
            };
            for src in incoming {
                match graph.get_node(ctx, src) {
                    Some(src_node) => arg_node = graph.defer(arg_node, src_node),
                    None => {
                        graph.set_escapes_global(arg_node);
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EscapeConfig;
    use crate::shared::ir::{Callee, ClassType, Param};

    fn analysis() -> EscapeAnalysis {
        EscapeAnalysis::new(EscapeConfig::default().verify_graphs(true)).unwrap()
    }

    fn state_of(graph: &ConnectionGraph, module: &Module, f: FunctionId, v: ValueId) -> EscapeState {
        let ctx = FunctionContext::new(module, f).unwrap();
        let node = graph.lookup_node(&ctx, v).unwrap();
        graph.node(node).escape_state()
    }

    #[test]
    fn test_store_then_load_aliases() {
        let mut module = Module::new();
        let obj = module.types.intern(Type::Class(ClassType::new("Obj")));
        let f = module.declare_function("f", vec![], None);
        let mut b = module.builder(f);
        let entry = b.entry();
        let x = b.alloc_ref(entry, obj);
        let slot = b.alloc_stack(entry, obj);
        b.store(entry, x, slot);
        let y = b.load(entry, slot);
        b.ret(entry, None);

        let mut ea = analysis();
        let graph = ea.connection_graph(&module, f).unwrap();
        let ctx = FunctionContext::new(&module, f).unwrap();
        let x_node = graph.lookup_node(&ctx, x).unwrap();
        let y_node = graph.lookup_node(&ctx, y).unwrap();
        assert!(graph.is_reachable(y_node, x_node));
        assert_eq!(graph.lookup_value_content(&ctx, x), graph.lookup_value_content(&ctx, y));
    }

    #[test]
    fn test_unknown_call_escapes_arguments() {
        let mut module = Module::new();
        let obj = module.types.intern(Type::Class(ClassType::new("Obj")));
        let external = module.declare_function("external", vec![Param::guaranteed(obj)], None);
        let f = module.declare_function("f", vec![], None);
        let mut b = module.builder(f);
        let entry = b.entry();
        let x = b.alloc_ref(entry, obj);
        let local = b.alloc_ref(entry, obj);
        b.apply(entry, Callee::Direct(external), vec![x], None);
        b.ret(entry, None);

        let mut ea = analysis();
        let graph = ea.connection_graph(&module, f).unwrap().clone();
        assert_eq!(state_of(&graph, &module, f, x), EscapeState::GlobalEscaping);
        assert_eq!(state_of(&graph, &module, f, local), EscapeState::NoEscape);
    }

    #[test]
    fn test_returned_value_content_is_returned() {
        let mut module = Module::new();
        let obj = module.types.intern(Type::Class(ClassType::new("Obj")));
        let f = module.declare_function("make", vec![], Some(obj));
        let mut b = module.builder(f);
        let entry = b.entry();
        let x = b.alloc_ref(entry, obj);
        b.ret(entry, Some(x));

        let mut ea = analysis();
        let graph = ea.connection_graph(&module, f).unwrap();
        let ctx = FunctionContext::new(&module, f).unwrap();
        let content = graph.lookup_value_content(&ctx, x).unwrap();
        assert_eq!(graph.node(content).escape_state(), EscapeState::Returned);
        assert!(graph.return_node().is_some());
    }

    #[test]
    fn test_block_arguments_merge_incoming_values() {
        let mut module = Module::new();
        let obj = module.types.intern(Type::Class(ClassType::new("Obj")));
        let int = module.types.scalar();
        let f = module.declare_function("f", vec![Param::guaranteed(int)], None);
        let mut b = module.builder(f);
        let entry = b.entry();
        let cond = b.arg(0);
        let x = b.alloc_ref(entry, obj);
        let y = b.alloc_ref(entry, obj);
        let join = b.new_block(&[obj]);
        b.cond_br(entry, cond, join, vec![x], join, vec![y]);
        let phi = b.block_arg(join, 0);
        b.ret(join, None);

        let mut ea = analysis();
        let graph = ea.connection_graph(&module, f).unwrap();
        let ctx = FunctionContext::new(&module, f).unwrap();
        let phi_content = graph.lookup_value_content(&ctx, phi);
        assert_eq!(phi_content, graph.lookup_value_content(&ctx, x));
        assert_eq!(phi_content, graph.lookup_value_content(&ctx, y));
    }

    #[test]
    fn test_node_cap_invalidates_graph() {
        let mut module = Module::new();
        let obj = module.types.intern(Type::Class(ClassType::new("Obj")));
        let f = module.declare_function("f", vec![], None);
        let mut b = module.builder(f);
        let entry = b.entry();
        for _ in 0..40 {
            b.alloc_ref(entry, obj);
        }
        b.ret(entry, None);

        let mut ea = EscapeAnalysis::new(EscapeConfig::default().max_nodes(16)).unwrap();
        assert!(!ea.connection_graph(&module, f).unwrap().is_valid());
        assert!(!ea.summary_graph(&module, f).unwrap().is_valid());
    }

    #[test]
    fn test_known_destructor_is_analyzed_as_call() {
        let mut module = Module::new();
        let obj = module.types.intern_unique(Type::Class(ClassType::new("Holder")));
        let deinit = module.declare_function("Holder.deinit", vec![Param::owned(obj)], None);
        module.types.set_class_deinit(obj, deinit);
        {
            let mut b = module.builder(deinit);
            let entry = b.entry();
            b.ret(entry, None);
        }
        let f = module.declare_function("f", vec![], None);
        let mut b = module.builder(f);
        let entry = b.entry();
        let x = b.alloc_ref(entry, obj);
        b.strong_release(entry, x);
        b.ret(entry, None);

        let mut ea = analysis();
        let graph = ea.connection_graph(&module, f).unwrap().clone();
        assert_eq!(state_of(&graph, &module, f, x), EscapeState::NoEscape);
        assert_eq!(
            ea.function_info(deinit).map(|info| info.callers().len()),
            Some(1)
        );
    }

    #[test]
    fn test_container_get_count_has_no_effect() {
        let mut module = Module::new();
        let int = module.types.scalar();
        let storage = module.types.intern(Type::Class(ClassType::new("ArrayStorage")));
        let array = module.types.intern(Type::Aggregate(vec![storage]));
        let count = module.declare_function("Array.count", vec![Param::guaranteed(array)], Some(int));
        let f = module.declare_function("f", vec![], None);
        let mut b = module.builder(f);
        let entry = b.entry();
        let buffer = b.alloc_ref(entry, storage);
        let a = b.struct_(entry, array, vec![buffer]);
        b.apply_semantics(entry, Callee::Direct(count), ContainerOp::GetCount, vec![a], Some(int));
        b.ret(entry, None);

        let mut ea = analysis();
        let graph = ea.connection_graph(&module, f).unwrap().clone();
        assert_eq!(state_of(&graph, &module, f, buffer), EscapeState::NoEscape);

        let mut plain = EscapeAnalysis::new(EscapeConfig::default().model_container_semantics(false)).unwrap();
        let graph = plain.connection_graph(&module, f).unwrap().clone();
        assert_eq!(state_of(&graph, &module, f, buffer), EscapeState::GlobalEscaping);
    }
}
