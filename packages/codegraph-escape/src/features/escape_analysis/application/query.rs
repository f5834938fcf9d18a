//! Escape Queries
//!
//! The questions optimizations ask. Every query computes the function's
//! graphs on demand and otherwise only reads them. Anything the graphs
//! cannot prove (an unknown function, an invalid graph, a value without a
//! node) is answered conservatively with `true`.
//!
//! | Query                      | `false` means                                   |
//! |----------------------------|-------------------------------------------------|
//! | `can_escape_to`            | the use point cannot reach the value's memory   |
//! | `can_point_to_same_memory` | the two values never address the same memory    |
//! | `may_release_content`      | releasing one value cannot free the other's memory |
//! | `can_parameter_escape`     | no callee lets the argument outlive the call    |

use super::driver::EscapeAnalysis;
use crate::features::escape_analysis::domain::{EscapeState, NodeId};
use crate::features::escape_analysis::infrastructure::{ConnectionGraph, FunctionContext, NodeWorklist};
use crate::features::escape_analysis::ports::CalleeSet;
use crate::shared::ir::{FunctionId, InstId, Module, Type, ValueId};

impl EscapeAnalysis {
    /// Valid full graph of `function`, computing it if needed
    fn graph_for_query(&mut self, module: &Module, function: FunctionId) -> Option<&ConnectionGraph> {
        self.ensure_computed(module, function).ok()?;
        let graph = &self.infos.get(&function)?.graph;
        graph.is_valid().then_some(graph)
    }

    /// True if `user` (a call or a release) may access the memory `value`
    /// points to
    pub fn can_escape_to(&mut self, module: &Module, function: FunctionId, value: ValueId, user: InstId) -> bool {
        let Some(ctx) = FunctionContext::new(module, function) else {
            return true;
        };
        if !ctx.is_uniquely_identified(value) {
            return true;
        }
        let Some(graph) = self.graph_for_query(module, function) else {
            return true;
        };
        let Some(mut node) = graph.lookup_value_content(&ctx, value) else {
            return true;
        };

        let mut worklist = NodeWorklist::new();
        loop {
            // Interior nodes may form cycles after arbitrary merges
            if !worklist.try_push(node) {
                return false;
            }
            if graph.value_escapes_inside_function(&ctx, node, value) || graph.is_use_point(node, user) {
                return true;
            }
            if !graph.node(node).is_interior() {
                return false;
            }
            match graph.points_to(node) {
                Some(next) => node = next,
                None => return false,
            }
        }
    }

    /// True if `v1` and `v2` may address the same memory
    pub fn can_point_to_same_memory(&mut self, module: &Module, function: FunctionId, v1: ValueId, v2: ValueId) -> bool {
        let Some(ctx) = FunctionContext::new(module, function) else {
            return true;
        };
        let mut unique1 = ctx.is_uniquely_identified(v1);
        let mut unique2 = ctx.is_uniquely_identified(v2);
        if !unique1 && !unique2 {
            return true;
        }
        let Some(graph) = self.graph_for_query(module, function) else {
            return true;
        };
        let (Some(content1), Some(content2)) = (
            graph.lookup_value_content(&ctx, v1),
            graph.lookup_value_content(&ctx, v2),
        ) else {
            return true;
        };

        unique1 &= !graph.value_escapes_inside_function(&ctx, content1, v1);
        unique2 &= !graph.value_escapes_inside_function(&ctx, content2, v2);
        if !unique1 && !unique2 {
            return true;
        }

        let (addr1, addr2) = (ctx.is_address(v1), ctx.is_address(v2));
        let (ref1, ref2) = (has_reference_semantics(&ctx, v1), has_reference_semantics(&ctx, v2));
        if (addr1 && addr2) || (ref1 && ref2) {
            return content1 == content2;
        }
        // Field addresses are modelled as the object's content, one level
        // below the reference
        if addr1 && ref2 {
            return Some(content1) == graph.get_field_content(content2);
        }
        if addr2 && ref1 {
            return graph.get_field_content(content1) == Some(content2);
        }
        true
    }

    /// True if destroying `released` (or, for an address, the reference it
    /// holds) may free memory `live` points to
    pub fn may_release_content(
        &mut self,
        module: &Module,
        function: FunctionId,
        released: ValueId,
        live: ValueId,
    ) -> bool {
        let Some(ctx) = FunctionContext::new(module, function) else {
            return true;
        };
        let Some(graph) = self.graph_for_query(module, function) else {
            return true;
        };
        let Some(live_content) = graph.lookup_value_content(&ctx, live) else {
            return true;
        };

        // An exclusive argument has its own reference count, so it is
        // unique even if reachable from the released value
        let live_unique = ctx.is_uniquely_identified(live)
            && !graph.value_escapes_inside_function(&ctx, live_content, live);
        if !live_unique && !ctx.points_to_local_object(released) {
            return true;
        }

        let Some(released_content) = graph.lookup_value_content(&ctx, released) else {
            return true;
        };
        let released_object = if ctx.is_address(released) {
            // The address holds a reference; the object is one level further
            match graph.points_to(released_content) {
                Some(object) => object,
                None => return !live_unique && graph.node(released_content).escapes_inside_function(),
            }
        } else {
            released_content
        };

        let mut worklist = NodeWorklist::new();
        let mut current = Some(released_object);
        while let Some(node) = current {
            if !worklist.try_push(node) {
                break;
            }
            if node == live_content {
                return true;
            }
            if !live_unique && graph.node(node).escapes_inside_function() {
                return true;
            }
            current = graph.points_to(node);
        }
        false
    }

    /// True if argument `param` of call `site` in `caller` may escape
    /// through any of the callees, judged by their summaries.
    ///
    /// With `check_content` set the question is about the memory the
    /// argument points to rather than the argument itself.
    pub fn can_parameter_escape(
        &mut self,
        module: &Module,
        caller: FunctionId,
        site: InstId,
        param: usize,
        check_content: bool,
    ) -> bool {
        let callees = match self.resolver.resolve_callees(module, caller, site) {
            CalleeSet::Precise(callees) if !callees.is_empty() => callees,
            _ => return true,
        };
        callees
            .into_iter()
            .any(|callee| self.parameter_escapes(module, callee, param, check_content))
    }

    fn parameter_escapes(&mut self, module: &Module, callee: FunctionId, param: usize, check_content: bool) -> bool {
        let Some(ctx) = FunctionContext::new(module, callee) else {
            return true;
        };
        let Some(&param_value) = ctx.function.arguments().get(param) else {
            return true;
        };
        if !ctx.is_pointer(param_value) {
            return false;
        }
        if self.ensure_computed(module, callee).is_err() {
            return true;
        }
        let Some(summary) = self.infos.get(&callee).map(|info| &info.summary) else {
            return true;
        };
        if !summary.is_valid() {
            return true;
        }
        let Some(mut node) = summary.lookup_node(&ctx, param_value) else {
            return true;
        };
        if check_content {
            match summary.points_to(node) {
                Some(content) => node = content,
                None => return false,
            }
        }
        reaches_global(summary, node)
            || summary
                .return_node()
                .is_some_and(|ret| summary.is_reachable(ret, node))
    }
}

/// Object references, as opposed to addresses and aggregates
fn has_reference_semantics(ctx: &FunctionContext<'_>, v: ValueId) -> bool {
    matches!(ctx.type_of(ctx.value_type(v)), Type::Class(_) | Type::Box(_))
}

fn reaches_global(graph: &ConnectionGraph, start: NodeId) -> bool {
    let mut worklist = NodeWorklist::new();
    worklist.try_push(graph.merge_target(start));
    let mut idx = 0;
    while idx < worklist.len() {
        let id = worklist.get(idx);
        idx += 1;
        let node = graph.node(id);
        if node.escape_state() == EscapeState::GlobalEscaping {
            return true;
        }
        if let Some(pt) = graph.points_to(id) {
            worklist.try_push(pt);
        }
        for &def in node.defers_to() {
            worklist.try_push(graph.merge_target(def));
        }
    }
    false
}
