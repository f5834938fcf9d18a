//! Connection Graph
//!
//! The per-function heap abstraction. Pointer values map to nodes; a node's
//! `points_to` names the content node of the memory it addresses; defer
//! edges tie together nodes that must agree on their content.
//!
//! Node structure:
//! ```text
//!   Val %x ──defer──▶ Val %y ──points-to──▶ Con (object) ──points-to──▶ Con (fields)
//! ```
//!
//! Structural mutation (defer edges, content creation and node merging)
//! lives in `merge.rs`; splicing another graph in lives in `node_map.rs`.
//!
//! # References
//! - Choi et al. "Escape Analysis for Java" (OOPSLA 1999), connection graphs
//! - Steensgaard "Points-to Analysis in Almost Linear Time" (POPL 1996),
//!   unification of content nodes

use super::{FunctionContext, NodeWorklist};
use crate::features::escape_analysis::domain::{
    CGNode, EdgeKind, EscapeState, NodeId, NodeKind, Traversal,
};
use crate::shared::ir::{BlockId, FunctionId, InstId, PointerKind, Type, ValueId};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct ConnectionGraph {
    function: Option<FunctionId>,
    pub(crate) nodes: Vec<CGNode>,
    values_to_nodes: FxHashMap<ValueId, NodeId>,
    return_node: Option<NodeId>,

    /// Use point instruction -> bit index
    use_points: FxHashMap<InstId, u32>,
    /// Bit index -> use point instruction. `None` once the instruction was
    /// deleted.
    use_point_table: Vec<Option<InstId>>,

    /// Nodes with a pending `merge_to`, processed by `merge_all_scheduled`
    pub(crate) to_merge: Vec<NodeId>,

    is_summary: bool,
    valid: bool,
}

impl Default for ConnectionGraph {
    fn default() -> Self {
        Self::new(None, false)
    }
}

impl ConnectionGraph {
    pub fn new(function: Option<FunctionId>, is_summary: bool) -> Self {
        Self {
            function,
            nodes: Vec::new(),
            values_to_nodes: FxHashMap::default(),
            return_node: None,
            use_points: FxHashMap::default(),
            use_point_table: Vec::new(),
            to_merge: Vec::new(),
            is_summary,
            valid: true,
        }
    }

    pub fn full(function: FunctionId) -> Self {
        Self::new(Some(function), false)
    }

    pub fn summary(function: FunctionId) -> Self {
        Self::new(Some(function), true)
    }

    /// Drop all nodes and make the graph valid again
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.values_to_nodes.clear();
        self.return_node = None;
        self.use_points.clear();
        self.use_point_table.clear();
        self.to_merge.clear();
        self.valid = true;
    }

    /// Give up on this graph. Every query answers conservatively from now on.
    pub fn invalidate(&mut self) {
        self.clear();
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_summary(&self) -> bool {
        self.is_summary
    }

    pub fn function(&self) -> Option<FunctionId> {
        self.function
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of arena slots, merged tombstones included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &CGNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut CGNode {
        &mut self.nodes[id.index()]
    }

    /// All live (non-merged) nodes
    pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &CGNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.is_merged)
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    pub(crate) fn alloc_node(&mut self, node: CGNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Follow `merge_to` links to the surviving node
    pub fn merge_target(&self, mut id: NodeId) -> NodeId {
        while let Some(next) = self.nodes[id.index()].merge_to {
            id = next;
        }
        id
    }

    /// Resolved points-to target of a node
    pub fn points_to(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).points_to.map(|pt| self.merge_target(pt))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Value -> node mapping
    // ═══════════════════════════════════════════════════════════════════════

    /// The node of a pointer value, created on first request
    ///
    /// Projections and casts resolve to their root, so they share one node.
    /// Returns `None` for non-pointers, `undef`, function references, and on
    /// an invalid graph.
    pub fn get_node(&mut self, ctx: &FunctionContext<'_>, value: ValueId) -> Option<NodeId> {
        if !self.valid || ctx.is_function_ref(value) {
            return None;
        }
        let pointer_kind = ctx.pointer_kind(value);
        if !pointer_kind.is_pointer() {
            return None;
        }
        let root = ctx.pointer_root(value);
        if ctx.is_undef(root) {
            return None;
        }
        let has_reference_only = pointer_kind == PointerKind::ReferenceOnly;

        if let Some(&node) = self.values_to_nodes.get(&root) {
            let target = self.merge_target(node);
            self.nodes[target.index()].merge_flags(false, has_reference_only);
            self.values_to_nodes.insert(root, target);
            return Some(target);
        }

        let id = if ctx.is_argument(root) {
            let mut node = CGNode::new(NodeKind::Argument, Some(root));
            node.has_reference_only = has_reference_only;
            if !self.is_summary {
                node.state = EscapeState::ArgumentReachable;
            }
            self.alloc_node(node)
        } else {
            let mut node = CGNode::new(NodeKind::Value, Some(root));
            node.has_reference_only = has_reference_only;
            self.alloc_node(node)
        };
        self.values_to_nodes.insert(root, id);
        Some(id)
    }

    /// Read-only variant of `get_node`
    pub fn lookup_node(&self, ctx: &FunctionContext<'_>, value: ValueId) -> Option<NodeId> {
        if !self.valid || !ctx.is_pointer(value) {
            return None;
        }
        let root = ctx.pointer_root(value);
        self.values_to_nodes
            .get(&root)
            .map(|n| self.merge_target(*n))
    }

    /// Map `value` to an existing node, e.g. a loaded value to the content
    /// it was loaded from
    pub fn set_node(&mut self, value: ValueId, node: NodeId) {
        let node = self.merge_target(node);
        match self.values_to_nodes.get(&value).copied() {
            Some(existing) => {
                self.defer(existing, node);
            }
            None => {
                self.values_to_nodes.insert(value, node);
                let n = &mut self.nodes[node.index()];
                if n.mapped_value.is_none() {
                    n.mapped_value = Some(value);
                }
            }
        }
    }

    /// The node representing the returned value, created on first request
    pub fn get_return_node(&mut self) -> NodeId {
        if let Some(ret) = self.return_node {
            return ret;
        }
        let ret = self.alloc_node(CGNode::new(NodeKind::Return, None));
        self.return_node = Some(ret);
        ret
    }

    pub fn return_node(&self) -> Option<NodeId> {
        self.return_node
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Content nodes
    // ═══════════════════════════════════════════════════════════════════════

    /// Fresh content for `addr`, shared by `addr`'s whole defer web
    pub(crate) fn create_content_node(
        &mut self,
        addr: NodeId,
        is_interior: bool,
        has_reference_only: bool,
    ) -> NodeId {
        let content = self.alloc_node(CGNode::content(is_interior, has_reference_only));
        self.initialize_points_to_edge(addr, content);
        content
    }

    pub fn get_or_create_content_node(
        &mut self,
        addr: NodeId,
        is_interior: bool,
        has_reference_only: bool,
    ) -> NodeId {
        if let Some(content) = self.points_to(addr) {
            self.nodes[content.index()].merge_flags(is_interior, has_reference_only);
            return content;
        }
        let content = self.create_content_node(addr, is_interior, has_reference_only);
        // Content may be created after states and use points were propagated.
        let state = self.nodes[addr.index()].state;
        self.nodes[content.index()].merge_escape_state(state);
        self.merge_use_points(content, addr);
        content
    }

    /// Content of an address value. Never interior.
    pub fn get_or_create_address_content(
        &mut self,
        ctx: &FunctionContext<'_>,
        addr_value: ValueId,
        addr: NodeId,
    ) -> NodeId {
        let types = &ctx.module.types;
        let has_reference_only = types
            .pointee(ctx.value_type(addr_value))
            .is_some_and(|p| types.pointer_kind(p) == PointerKind::ReferenceOnly);
        self.get_or_create_content_node(addr, false, has_reference_only)
    }

    /// Object content of a reference: an interior node for the object
    /// itself plus a content node for what its fields point to
    pub fn get_or_create_reference_content(
        &mut self,
        ctx: &FunctionContext<'_>,
        ref_value: Option<ValueId>,
        ref_node: NodeId,
    ) -> NodeId {
        let object = self.get_or_create_content_node(ref_node, true, false);
        if !self.nodes[object.index()].is_interior {
            return object;
        }
        let fields_reference_only = ref_value.is_some_and(|v| {
            let ty = ctx.value_type(v);
            matches!(ctx.type_of(ty), Type::Class(_) | Type::Box(_))
                && ctx.module.types.stored_pointer_kind(ty) == PointerKind::ReferenceOnly
        });
        self.get_or_create_content_node(object, false, fields_reference_only);
        object
    }

    /// Content of a pointer that may address anything
    pub fn get_or_create_unknown_content(&mut self, addr: NodeId) -> NodeId {
        self.get_or_create_content_node(addr, false, false)
    }

    /// The content node for the memory `value` points to
    pub fn get_value_content(&mut self, ctx: &FunctionContext<'_>, value: ValueId) -> Option<NodeId> {
        let addr = self.get_node(ctx, value)?;
        if ctx.is_address(value) {
            return Some(self.get_or_create_address_content(ctx, value, addr));
        }
        if self.nodes[addr.index()].has_reference_only {
            return Some(self.get_or_create_reference_content(ctx, Some(value), addr));
        }
        Some(self.get_or_create_unknown_content(addr))
    }

    /// Read-only variant of `get_value_content`
    pub fn lookup_value_content(&self, ctx: &FunctionContext<'_>, value: ValueId) -> Option<NodeId> {
        let addr = self.lookup_node(ctx, value)?;
        self.points_to(addr)
    }

    /// Field content of an object node, i.e. one more indirection
    ///
    /// Only interior object nodes have one.
    pub fn get_field_content(&self, object: NodeId) -> Option<NodeId> {
        if !self.node(object).is_interior {
            return None;
        }
        self.points_to(object)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Escape states
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_escapes_global(&mut self, node: NodeId) {
        let node = self.merge_target(node);
        self.nodes[node.index()].merge_escape_state(EscapeState::GlobalEscaping);
    }

    /// Mark a value and the memory it points to as globally escaping
    pub fn set_value_escapes_global(&mut self, ctx: &FunctionContext<'_>, value: ValueId) {
        if let Some(node) = self.get_node(ctx, value) {
            self.set_escapes_global(node);
        }
        if let Some(content) = self.get_value_content(ctx, value) {
            self.set_escapes_global(content);
        }
    }

    pub fn merge_escape_state(&mut self, node: NodeId, state: EscapeState) -> bool {
        let node = self.merge_target(node);
        self.nodes[node.index()].merge_escape_state(state)
    }

    /// True if any pointer in the function may alias the memory of `node`,
    /// which is the node of `value`
    pub fn value_escapes_inside_function(
        &self,
        ctx: &FunctionContext<'_>,
        node: NodeId,
        value: ValueId,
    ) -> bool {
        let exclusive = ctx.is_exclusive_argument(ctx.pointer_root(value));
        self.node(node).state.escapes_inside_function(exclusive)
    }

    /// Push escape states along points-to and defer edges until stable.
    /// Returns true if any state changed.
    pub fn propagate_escape_states(&mut self) -> bool {
        let mut any_changed = false;
        loop {
            let mut changed = false;
            for idx in 0..self.nodes.len() {
                if self.nodes[idx].is_merged {
                    continue;
                }
                let state = self.nodes[idx].state;
                if let Some(pt) = self.nodes[idx].points_to {
                    let pt = self.merge_target(pt);
                    changed |= self.nodes[pt.index()].merge_escape_state(state);
                }
                for d in 0..self.nodes[idx].defers_to.len() {
                    let def = self.nodes[idx].defers_to[d];
                    changed |= self.nodes[def.index()].merge_escape_state(state);
                }
            }
            if !changed {
                return any_changed;
            }
            any_changed = true;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Use points
    // ═══════════════════════════════════════════════════════════════════════

    /// Register `user` as a use point of `node`. Globally escaping nodes
    /// never need one.
    pub fn add_use_point(&mut self, node: NodeId, user: InstId) -> Option<u32> {
        let node = self.merge_target(node);
        if self.nodes[node.index()].state >= EscapeState::GlobalEscaping {
            return None;
        }
        let idx = match self.use_points.get(&user) {
            Some(idx) => *idx,
            None => {
                let idx = self.use_point_table.len() as u32;
                self.use_points.insert(user, idx);
                self.use_point_table.push(Some(user));
                idx
            }
        };
        self.nodes[node.index()].use_points.insert(idx);
        Some(idx)
    }

    /// Record releasing instructions and calls as use points of the memory
    /// their operands point to, then propagate to everything that memory
    /// points to
    pub fn compute_use_points(&mut self, ctx: &FunctionContext<'_>, reachable: &[BlockId]) {
        debug_assert!(
            self.nodes.iter().all(|n| n.use_points.is_empty()),
            "premature use point computation"
        );
        for &block in reachable {
            for &inst in &ctx.function.block(block).insts {
                let kind = &ctx.function.inst(inst).kind;
                if !(kind.is_release() || kind.is_apply()) {
                    continue;
                }
                let mut bit: Option<u32> = None;
                for op in kind.operands() {
                    let Some(content) = self.get_value_content(ctx, op) else {
                        continue;
                    };
                    match bit {
                        None => bit = self.add_use_point(content, inst),
                        Some(idx) => {
                            self.nodes[content.index()].use_points.insert(idx);
                        }
                    }
                }
            }
        }

        loop {
            let mut changed = false;
            for idx in 0..self.nodes.len() {
                if self.nodes[idx].is_merged {
                    continue;
                }
                if let Some(pt) = self.nodes[idx].points_to {
                    let pt = self.merge_target(pt);
                    if pt.index() != idx {
                        changed |= self.merge_use_points(pt, NodeId(idx as u32));
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// True if `user` may end the lifetime of the memory of `node`.
    /// Only meaningful for nodes that do not escape globally.
    pub fn is_use_point(&self, node: NodeId, user: InstId) -> bool {
        let node = self.merge_target(node);
        if self.node(node).state >= EscapeState::GlobalEscaping {
            return true;
        }
        self.use_points
            .get(&user)
            .is_some_and(|idx| self.node(node).use_points.contains(*idx))
    }

    pub fn use_points_of(&self, node: NodeId) -> Vec<InstId> {
        self.node(self.merge_target(node))
            .use_points
            .iter()
            .filter_map(|idx| self.use_point_table.get(idx as usize).copied().flatten())
            .collect()
    }

    /// Forget an instruction that is about to be deleted. Its results lose
    /// their node mapping and its use-point bit is retired.
    pub fn evict_instruction(&mut self, inst: InstId, results: &[ValueId]) {
        for value in results {
            if let Some(node) = self.values_to_nodes.remove(value) {
                let node = self.merge_target(node);
                let n = &mut self.nodes[node.index()];
                if n.mapped_value == Some(*value) {
                    n.mapped_value = None;
                }
            }
        }
        if let Some(idx) = self.use_points.remove(&inst) {
            if let Some(slot) = self.use_point_table.get_mut(idx as usize) {
                *slot = None;
            }
            for node in &mut self.nodes {
                node.use_points.remove(idx);
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Traversals
    // ═══════════════════════════════════════════════════════════════════════

    /// Walk defer predecessors backwards from `start`
    ///
    /// Returns false if the visitor halted the traversal.
    pub fn backward_traverse<F>(&self, start: NodeId, mut visitor: F) -> bool
    where
        F: FnMut(NodeId) -> Traversal,
    {
        let mut worklist = NodeWorklist::new();
        worklist.try_push(start);
        let mut idx = 0;
        while idx < worklist.len() {
            let node = worklist.get(idx);
            idx += 1;
            for pred in &self.node(node).preds {
                if pred.kind != EdgeKind::Defer || worklist.contains(pred.node) {
                    continue;
                }
                match visitor(pred.node) {
                    Traversal::Follow => {
                        worklist.try_push(pred.node);
                    }
                    Traversal::Backtrack => {}
                    Traversal::Halt => return false,
                }
            }
        }
        true
    }

    /// Walk defer successors forwards from `start`
    ///
    /// Returns false if the visitor halted the traversal.
    pub fn forward_traverse_defer<F>(&self, start: NodeId, mut visitor: F) -> bool
    where
        F: FnMut(NodeId) -> Traversal,
    {
        let mut worklist = NodeWorklist::new();
        worklist.try_push(start);
        let mut idx = 0;
        while idx < worklist.len() {
            let node = worklist.get(idx);
            idx += 1;
            for &def in &self.node(node).defers_to {
                if worklist.contains(def) {
                    continue;
                }
                match visitor(def) {
                    Traversal::Follow => {
                        worklist.try_push(def);
                    }
                    Traversal::Backtrack => {}
                    Traversal::Halt => return false,
                }
            }
        }
        true
    }

    /// True if `to` is reachable from `from` along points-to and defer edges
    pub fn is_reachable(&self, from: NodeId, to: NodeId) -> bool {
        let from = self.merge_target(from);
        let to = self.merge_target(to);
        let mut worklist = NodeWorklist::new();
        worklist.try_push(from);
        let mut idx = 0;
        while idx < worklist.len() {
            let node = worklist.get(idx);
            idx += 1;
            if node == to {
                return true;
            }
            let n = self.node(node);
            if let Some(pt) = n.points_to {
                worklist.try_push(self.merge_target(pt));
            }
            for &def in &n.defers_to {
                worklist.try_push(def);
            }
        }
        false
    }

    pub(crate) fn remap_value(&mut self, value: ValueId, node: NodeId) {
        self.values_to_nodes.insert(value, node);
    }
}
