//! Interprocedural Escape Analysis Driver
//!
//! Owns one [`FunctionInfo`] per analyzed function and runs the bottom-up
//! fixpoint:
//!
//! ```text
//! recompute(root)
//!   ├─ build graphs for root and every resolvable callee (depth-capped)
//!   ├─ order them bottom-up
//!   ├─ iterate: derive summaries, splice them into callers' graphs
//!   │     until nothing changes or `max_graph_merges` is hit
//!   │     (then call sites of unconverged callers escape entirely)
//!   └─ finalize: materialize contents, propagate states, use points, verify
//! ```
//!
//! Recursive call chains are not collapsed into SCCs. A caller that is not
//! scheduled after its callee simply triggers another iteration.

use super::function_order::{CallerEdge, FunctionInfo, FunctionOrder};
use crate::config::{EscapeConfig, Validatable};
use crate::errors::{EscapeError, Result};
use crate::features::escape_analysis::infrastructure::{ConnectionGraph, FunctionContext, NodeMap};
use crate::features::escape_analysis::ports::{
    CalleeResolver, DeinitCapturePolicy, NamedDeinitPolicy, StaticCalleeResolver,
};
use crate::shared::ir::{BlockId, Callee, FunctionId, InstId, InstKind, Module, ValueId};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};

/// Escape analysis over the functions of a module
///
/// Graphs are computed lazily on first query and kept until invalidated.
/// The module is passed to every call instead of being owned, so the
/// optimizer stays free to mutate it between queries as long as it
/// reports changes through `invalidate` or `on_instruction_deleted`.
pub struct EscapeAnalysis {
    pub(super) config: EscapeConfig,
    pub(super) resolver: Box<dyn CalleeResolver>,
    pub(super) deinit_policy: Box<dyn DeinitCapturePolicy>,
    pub(super) infos: FxHashMap<FunctionId, FunctionInfo>,
    update_id: u32,
}

impl Default for EscapeAnalysis {
    fn default() -> Self {
        Self::with_config(EscapeConfig::default())
    }
}

impl EscapeAnalysis {
    /// Create an analysis with the static resolver and the named deinit
    /// policy from `config`
    pub fn new(config: EscapeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: EscapeConfig) -> Self {
        let deinit_policy = NamedDeinitPolicy::new(config.non_capturing_deinits.iter().cloned());
        Self {
            config,
            resolver: Box::new(StaticCalleeResolver),
            deinit_policy: Box::new(deinit_policy),
            infos: FxHashMap::default(),
            update_id: 0,
        }
    }

    pub fn with_resolver(mut self, resolver: impl CalleeResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self.infos.clear();
        self
    }

    pub fn with_deinit_policy(mut self, policy: impl DeinitCapturePolicy + 'static) -> Self {
        self.deinit_policy = Box::new(policy);
        self.infos.clear();
        self
    }

    pub fn config(&self) -> &EscapeConfig {
        &self.config
    }

    /// Analysis state of `function`, if it was visited
    pub fn function_info(&self, function: FunctionId) -> Option<&FunctionInfo> {
        self.infos.get(&function)
    }

    /// Number of functions with analysis state
    pub fn analyzed_count(&self) -> usize {
        self.infos.len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Graph access
    // ═══════════════════════════════════════════════════════════════════════

    /// Full connection graph of `function`, computed on first request
    pub fn connection_graph(&mut self, module: &Module, function: FunctionId) -> Result<&ConnectionGraph> {
        self.ensure_computed(module, function)?;
        self.infos
            .get(&function)
            .map(FunctionInfo::graph)
            .ok_or(EscapeError::UnknownFunction(function))
    }

    /// Summary graph of `function`: only what callers can observe
    pub fn summary_graph(&mut self, module: &Module, function: FunctionId) -> Result<&ConnectionGraph> {
        self.ensure_computed(module, function)?;
        self.infos
            .get(&function)
            .map(FunctionInfo::summary)
            .ok_or(EscapeError::UnknownFunction(function))
    }

    pub(super) fn ensure_computed(&mut self, module: &Module, function: FunctionId) -> Result<()> {
        if module.function(function).is_none() {
            return Err(EscapeError::UnknownFunction(function));
        }
        if !self.infos.get(&function).is_some_and(FunctionInfo::is_computed) {
            self.run_update(module, function);
        }
        Ok(())
    }

    /// Throw away the graphs of `function` and its callers and rebuild them
    pub fn recompute(&mut self, module: &Module, function: FunctionId) -> Result<()> {
        if module.function(function).is_none() {
            return Err(EscapeError::UnknownFunction(function));
        }
        self.invalidate(function);
        self.run_update(module, function);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bottom-up fixpoint
    // ═══════════════════════════════════════════════════════════════════════

    fn run_update(&mut self, module: &Module, root: FunctionId) {
        self.update_id += 1;
        let mut order = FunctionOrder::new(self.update_id);
        debug!(
            "escape analysis: recompute {} (update {})",
            function_name(module, root),
            self.update_id
        );

        self.build_connection_graph(module, root, &mut order, 0);
        if let Some(info) = self.infos.get_mut(&root) {
            order.try_to_schedule(root, info);
        }

        let max_merges = self.config.max_graph_merges;
        let mut iteration = 0;
        loop {
            debug!("escape analysis: iteration {}", iteration);
            let mut need_another_iteration = false;

            for idx in 0..order.len() {
                let callee = order.functions()[idx];
                let summary_changed = self.update_summary(module, callee);
                if iteration < max_merges {
                    // Summaries of reused callees are spliced in once even
                    // though they did not change
                    if iteration == 0 || summary_changed {
                        need_another_iteration |= self.merge_into_callers(module, callee, &order);
                    }
                } else if iteration == max_merges {
                    need_another_iteration |= self.finalize_callers_conservatively(module, callee, &order);
                }
            }

            iteration += 1;
            if !need_another_iteration {
                break;
            }
        }

        self.finalize(module, &order);
    }

    /// Derive the summary of `function` if its full graph changed
    fn update_summary(&mut self, module: &Module, function: FunctionId) -> bool {
        let Some(info) = self.infos.get_mut(&function) else {
            return false;
        };
        if !info.need_update_summary {
            return false;
        }
        info.need_update_summary = false;
        let FunctionInfo { graph, summary, .. } = info;
        graph.propagate_escape_states();
        let changed = merge_summary_graph(module, summary, graph);
        if changed {
            trace!("escape analysis: summary of {} changed", function_name(module, function));
        }
        changed
    }

    /// Splice the summary of `callee` into every caller rebuilt in this
    /// update. Returns true if a caller that was already processed in this
    /// pass changed.
    fn merge_into_callers(&mut self, module: &Module, callee: FunctionId, order: &FunctionOrder) -> bool {
        let Some(callee_info) = self.infos.get_mut(&callee) else {
            return false;
        };
        let edges = callee_info.callers.clone();
        let mut summary = std::mem::take(&mut callee_info.summary);

        let mut need_another_iteration = false;
        for CallerEdge { caller, site } in edges {
            let Some(caller_info) = self.infos.get_mut(&caller) else {
                continue;
            };
            if !order.was_recomputed(caller_info) {
                continue;
            }
            trace!(
                "escape analysis: merge {} into {} at {}",
                function_name(module, callee),
                function_name(module, caller),
                site
            );
            if merge_callee_graph(module, caller, site, &mut caller_info.graph, callee, &mut summary) {
                caller_info.need_update_summary = true;
                // A cycle in the call graph: the caller was already visited
                // in this pass
                let scheduled_after = match (self.infos.get(&caller), self.infos.get(&callee)) {
                    (Some(caller_info), Some(callee_info)) => {
                        order.is_scheduled_after(caller_info, callee_info)
                    }
                    _ => false,
                };
                need_another_iteration |= !scheduled_after;
            }
        }

        if let Some(callee_info) = self.infos.get_mut(&callee) {
            callee_info.summary = summary;
        }
        need_another_iteration
    }

    /// Iteration cap reached: every call site of `callee` in a rebuilt
    /// caller escapes entirely
    fn finalize_callers_conservatively(
        &mut self,
        module: &Module,
        callee: FunctionId,
        order: &FunctionOrder,
    ) -> bool {
        let Some(edges) = self.infos.get(&callee).map(|info| info.callers.clone()) else {
            return false;
        };
        let mut need_another_iteration = false;
        for CallerEdge { caller, site } in edges {
            let Some(ctx) = FunctionContext::new(module, caller) else {
                continue;
            };
            let Some(caller_info) = self.infos.get_mut(&caller) else {
                continue;
            };
            if !order.was_recomputed(caller_info) {
                continue;
            }
            debug!(
                "escape analysis: finalize conservatively {} at {} in {}",
                function_name(module, callee),
                site,
                ctx.function.name
            );
            set_all_escaping(&ctx, &mut caller_info.graph, site);
            caller_info.need_update_summary = true;
            need_another_iteration = true;
        }
        need_another_iteration
    }

    /// Materialize the content of every pointer value, then propagate
    /// states and compute use points, so that queries never mutate
    fn finalize(&mut self, module: &Module, order: &FunctionOrder) {
        let verify = self.config.verify_graphs;
        for &function in order.functions() {
            let Some(info) = self.infos.get_mut(&function) else {
                continue;
            };
            if !order.was_recomputed(info) {
                continue;
            }
            info.computed = true;
            let Some(ctx) = FunctionContext::new(module, function) else {
                continue;
            };
            let graph = &mut info.graph;
            if graph.is_valid() {
                let reachable = ctx.function.reachable_blocks();
                for value in pointer_values(&ctx, &reachable) {
                    graph.get_value_content(&ctx, value);
                }
                graph.propagate_escape_states();
                graph.compute_use_points(&ctx, &reachable);
            }

            if verify {
                if let Err(err) = verify_info(function, info) {
                    warn!("escape analysis: {}", err);
                    if cfg!(debug_assertions) {
                        panic!("broken connection graph of {}: {}", ctx.function.name, err);
                    }
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Invalidation
    // ═══════════════════════════════════════════════════════════════════════

    /// Drop the graphs of `function` and of all its transitive callers
    pub fn invalidate(&mut self, function: FunctionId) {
        let mut removed = FxHashSet::default();
        let mut worklist = vec![function];
        while let Some(f) = worklist.pop() {
            if !removed.insert(f) {
                continue;
            }
            if let Some(info) = self.infos.remove(&f) {
                worklist.extend(info.callers.iter().map(|edge| edge.caller));
            }
        }
        for info in self.infos.values_mut() {
            info.callers.retain(|edge| !removed.contains(&edge.caller));
        }
        debug!("escape analysis: invalidated {} functions", removed.len());
    }

    pub fn invalidate_all(&mut self) {
        self.infos.clear();
        debug!("escape analysis: invalidate all");
    }

    /// Forget `inst` of `function` before it is deleted from the IR.
    /// Its results lose their nodes, its use point is retired and call
    /// edges recorded for it are dropped.
    pub fn on_instruction_deleted(&mut self, module: &Module, function: FunctionId, inst: InstId) {
        let results = module
            .function(function)
            .map(|f| f.inst(inst).results.clone())
            .unwrap_or_default();
        if let Some(info) = self.infos.get_mut(&function) {
            info.graph.evict_instruction(inst, &results);
        }
        for info in self.infos.values_mut() {
            info.callers
                .retain(|edge| !(edge.caller == function && edge.site == inst));
        }
    }

    /// Verify both graphs of `function` against the structural invariants
    pub fn verify(&self, function: FunctionId) -> Result<()> {
        match self.infos.get(&function) {
            Some(info) => verify_info(function, info),
            None => Ok(()),
        }
    }

    /// Verify every computed graph
    pub fn verify_all(&self) -> Result<()> {
        self.infos
            .iter()
            .try_for_each(|(function, info)| verify_info(*function, info))
    }
}

fn verify_info(function: FunctionId, info: &FunctionInfo) -> Result<()> {
    let wrap = |source| EscapeError::Graph { function, source };
    info.graph.verify_structure(false).map_err(wrap)?;
    info.summary.verify_structure(false).map_err(wrap)?;
    Ok(())
}

fn function_name(module: &Module, function: FunctionId) -> &str {
    module.function(function).map_or("<unknown>", |f| f.name.as_str())
}

/// Arguments, block arguments and results of reachable blocks that are
/// pointers
fn pointer_values(ctx: &FunctionContext<'_>, reachable: &[BlockId]) -> Vec<ValueId> {
    let mut values: Vec<ValueId> = ctx.function.arguments().to_vec();
    for &block in reachable {
        let data = ctx.function.block(block);
        if block != ctx.function.entry_block() {
            values.extend(data.args.iter().copied());
        }
        for &inst in &data.insts {
            values.extend(ctx.function.inst(inst).results.iter().copied());
        }
    }
    values.retain(|v| ctx.is_pointer(*v));
    values
}

// ═══════════════════════════════════════════════════════════════════════════
// Graph splicing
// ═══════════════════════════════════════════════════════════════════════════

/// Every pointer operand and result of `inst` escapes
pub(super) fn set_all_escaping(ctx: &FunctionContext<'_>, graph: &mut ConnectionGraph, inst: InstId) {
    let instruction = ctx.function.inst(inst);
    for op in instruction.kind.operands() {
        if !ctx.is_non_writable_address(op) {
            graph.set_value_escapes_global(ctx, op);
        }
    }
    for &result in &instruction.results {
        graph.set_value_escapes_global(ctx, result);
    }
}

/// Caller-side values a call site binds to the callee's parameters: the
/// call arguments, then the callee operand for the parameters a closure
/// context supplies. A release binds the released value to `self`.
fn call_site_arguments(ctx: &FunctionContext<'_>, site: InstId, param_count: usize) -> Vec<Option<ValueId>> {
    match &ctx.function.inst(site).kind {
        InstKind::Apply { callee, args, .. } => (0..param_count)
            .map(|idx| match args.get(idx) {
                Some(arg) => Some(*arg),
                None => match callee {
                    Callee::Value(v) => Some(*v),
                    Callee::Direct(_) => None,
                },
            })
            .collect(),
        kind if kind.is_release() => {
            let released = kind.operands().first().copied();
            (0..param_count)
                .map(|idx| if idx == 0 { released } else { None })
                .collect()
        }
        _ => vec![None; param_count],
    }
}

/// Splice the summary of `callee` into the graph of `caller` at `site`.
/// Returns true if the caller's graph changed.
pub fn merge_callee_graph(
    module: &Module,
    caller: FunctionId,
    site: InstId,
    caller_graph: &mut ConnectionGraph,
    callee: FunctionId,
    callee_summary: &mut ConnectionGraph,
) -> bool {
    if !caller_graph.is_valid() {
        return false;
    }
    let (Some(caller_ctx), Some(callee_ctx)) = (
        FunctionContext::new(module, caller),
        FunctionContext::new(module, callee),
    ) else {
        return false;
    };
    if !callee_summary.is_valid() {
        set_all_escaping(&caller_ctx, caller_graph, site);
        return true;
    }

    let params = callee_ctx.function.arguments();
    let bound = call_site_arguments(&caller_ctx, site, params.len());
    let mut mapping = NodeMap::new();
    for (&param, arg) in params.iter().zip(bound) {
        let Some(callee_node) = callee_summary.get_node(&callee_ctx, param) else {
            continue;
        };
        let Some(caller_node) = arg.and_then(|arg| caller_graph.get_node(&caller_ctx, arg)) else {
            continue;
        };
        mapping.add(callee_node, caller_node);
    }

    if let Some(ret) = callee_summary.return_node() {
        if let Some(result) = caller_ctx.function.result(site) {
            if let Some(caller_node) = caller_graph.get_node(&caller_ctx, result) {
                mapping.add(ret, caller_node);
            }
        }
    }

    caller_graph.merge_from(callee_summary, &mut mapping)
}

/// Derive the summary of a function from its full graph: only nodes
/// reachable from its parameters and its return value. Returns true if the
/// summary changed.
pub fn merge_summary_graph(module: &Module, summary: &mut ConnectionGraph, graph: &mut ConnectionGraph) -> bool {
    if !graph.is_valid() {
        let changed = summary.is_valid();
        summary.invalidate();
        return changed;
    }
    let Some(function) = graph.function() else {
        return false;
    };
    let Some(ctx) = FunctionContext::new(module, function) else {
        return false;
    };

    let mut mapping = NodeMap::new();
    for &param in ctx.function.arguments() {
        if let Some(node) = graph.get_node(&ctx, param) {
            if let Some(summary_node) = summary.get_node(&ctx, param) {
                mapping.add(node, summary_node);
            }
        }
    }
    if let Some(ret) = graph.return_node() {
        mapping.add(ret, summary.get_return_node());
    }
    summary.merge_from(graph, &mut mapping)
}
