//! Merge engine
//!
//! Every node of a defer web must point to the same content. Adding a defer
//! edge between two nodes with different content therefore merges the two
//! content nodes, which may in turn merge their contents, and so on.
//!
//! Merges are scheduled into `to_merge` and processed one at a time by
//! [`ConnectionGraph::merge_all_scheduled`]. Each step leaves the graph
//! consistent except for nodes still scheduled.

use super::{ConnectionGraph, NodeWorklist};
use crate::features::escape_analysis::domain::{EdgeKind, NodeId, Predecessor};

impl ConnectionGraph {
    // ═══════════════════════════════════════════════════════════════════════
    // Edge primitives
    // ═══════════════════════════════════════════════════════════════════════

    /// Make `to` the real points-to edge of `node`
    pub(crate) fn set_points_to_edge(&mut self, node: NodeId, to: NodeId) {
        debug_assert!(self.node(to).merge_to.is_none(), "edge to a merged node");
        debug_assert!(self.node(to).is_content(), "points-to edge must target content");
        let n = self.node_mut(node);
        n.points_to_is_edge = true;
        n.points_to = Some(to);
        self.node_mut(to).preds.push(Predecessor::points_to(node));
    }

    fn can_add_deferred(&self, from: NodeId, to: NodeId) -> bool {
        from != to && !self.node(from).find_deferred(to)
    }

    /// Add a plain defer edge without touching points-to fields
    pub(crate) fn add_deferred(&mut self, from: NodeId, to: NodeId) -> bool {
        debug_assert!(!self.node(to).is_merged, "defer edge to a merged node");
        if !self.can_add_deferred(from, to) {
            return false;
        }
        self.node_mut(from).defers_to.push(to);
        self.node_mut(to).preds.push(Predecessor::defer(from));
        true
    }

    /// Union the use points of `from` into `to`
    pub(crate) fn merge_use_points(&mut self, to: NodeId, from: NodeId) -> bool {
        if to == from || self.node(from).use_points.is_empty() {
            return false;
        }
        let bits = self.node(from).use_points.clone();
        self.node_mut(to).use_points.union_with(&bits)
    }

    /// Defer neighbours of `node` as `(neighbour, is_successor)`, captured
    /// before any mutation
    fn defer_neighbours(&self, node: NodeId) -> Vec<(NodeId, bool)> {
        let n = self.node(node);
        n.preds
            .iter()
            .filter(|p| p.kind == EdgeKind::Defer)
            .map(|p| (p.node, false))
            .chain(n.defers_to.iter().map(|d| (*d, true)))
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Defer
    // ═══════════════════════════════════════════════════════════════════════

    /// Add a defer edge `from -> to`, merging their contents if both already
    /// point somewhere. Returns the node `from` has become.
    pub fn defer(&mut self, from: NodeId, to: NodeId) -> NodeId {
        let mut changed = false;
        self.defer_tracked(from, to, &mut changed)
    }

    pub(crate) fn defer_tracked(&mut self, from: NodeId, to: NodeId, changed: &mut bool) -> NodeId {
        if !self.can_add_deferred(from, to) {
            return from;
        }
        let from_pt = self.node(from).points_to;
        let to_pt = self.node(to).points_to;
        if let (Some(fpt), Some(tpt)) = (from_pt, to_pt) {
            if fpt != tpt {
                self.schedule_to_merge(fpt, tpt);
                self.merge_all_scheduled();
                *changed = true;
            }
        }
        let from_target = self.merge_target(from);
        let to_target = self.merge_target(to);
        if self.add_deferred(from_target, to_target) {
            *changed = true;
        }
        match (from_pt, to_pt) {
            (None, Some(tpt)) => self.initialize_points_to(from_target, tpt, false),
            (Some(fpt), None) => self.initialize_points_to(to_target, fpt, false),
            _ => {}
        }
        self.merge_target(from)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Points-to initialization
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn initialize_points_to_edge(&mut self, node: NodeId, content: NodeId) {
        self.initialize_points_to(node, content, true);
    }

    /// Set the points-to of every node in `initial`'s defer web to
    /// `new_pt`. All nodes of the web either have no points-to yet or
    /// already point to `new_pt`.
    ///
    /// Leaves of the web get a real edge. A web that is a pure defer cycle
    /// gets an edge on one arbitrary node.
    pub(crate) fn initialize_points_to(&mut self, initial: NodeId, new_pt: NodeId, create_edge: bool) {
        let mut edge_nodes: Vec<NodeId> = Vec::new();
        if create_edge {
            edge_nodes.push(initial);
        }

        // Step 1: collect the uninitialized part of the web
        let mut updated = NodeWorklist::new();
        self.visit_uninitialized(initial, &mut updated, &mut edge_nodes);
        let mut idx = 0;
        while idx < updated.len() {
            let node = updated.get(idx);
            idx += 1;
            for (neighbour, _) in self.defer_neighbours(node) {
                self.visit_uninitialized(neighbour, &mut updated, &mut edge_nodes);
            }
        }

        // Step 2: propagate backwards from nodes that have (or get) an edge
        loop {
            while let Some(edge_node) = edge_nodes.pop() {
                if self.node(edge_node).points_to.is_none() {
                    self.set_points_to_edge(edge_node, new_pt);
                    self.merge_use_points(new_pt, edge_node);
                }
                let mut frontier = NodeWorklist::new();
                frontier.try_push(edge_node);
                let mut i = 0;
                while i < frontier.len() {
                    let node = frontier.get(i);
                    i += 1;
                    let preds: Vec<NodeId> = self
                        .node(node)
                        .preds
                        .iter()
                        .filter(|p| p.kind == EdgeKind::Defer)
                        .map(|p| p.node)
                        .collect();
                    for pred in preds {
                        if frontier.contains(pred) || self.node(pred).points_to.is_some() {
                            continue;
                        }
                        self.node_mut(pred).points_to = Some(new_pt);
                        self.merge_use_points(new_pt, pred);
                        frontier.try_push(pred);
                    }
                }
            }
            // A defer cycle without any leaf: give one node a real edge
            while let Some(node) = updated.pop() {
                if self.node(node).points_to.is_none() {
                    edge_nodes.push(node);
                    break;
                }
            }
            if edge_nodes.is_empty() {
                break;
            }
        }
    }

    fn visit_uninitialized(
        &self,
        node: NodeId,
        updated: &mut NodeWorklist,
        edge_nodes: &mut Vec<NodeId>,
    ) {
        if updated.contains(node) {
            return;
        }
        let n = self.node(node);
        if n.points_to.is_some() {
            edge_nodes.push(node);
            return;
        }
        // Leaf of the web
        if n.defers_to.is_empty() {
            edge_nodes.push(node);
        }
        updated.try_push(node);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Merging
    // ═══════════════════════════════════════════════════════════════════════

    /// Schedule content `from` to be merged into content `to`
    pub(crate) fn schedule_to_merge(&mut self, from: NodeId, to: NodeId) {
        let from_target = self.merge_target(from);
        let to_target = self.merge_target(to);
        if from_target == to_target {
            return;
        }
        self.merge_properties(to_target, from_target);
        self.node_mut(from_target).merge_to = Some(to_target);
        self.to_merge.push(from_target);
    }

    /// Flags of `to` after absorbing `from`. Interior-ness is OR'd, except
    /// when one node is the other's content: then the object side keeps its
    /// own flag.
    fn merge_properties(&mut self, to: NodeId, from: NodeId) {
        let from_interior = self.node(from).is_interior;
        let from_ref_only = self.node(from).has_reference_only;
        let mut is_interior = from_interior;
        if self.node(to).points_to == Some(from) {
            self.node_mut(to).is_interior = from_interior;
        } else if self.node(from).points_to == Some(to) {
            is_interior = self.node(to).is_interior;
        }
        self.node_mut(to).merge_flags(is_interior, from_ref_only);
    }

    /// Process all scheduled merges
    pub fn merge_all_scheduled(&mut self) {
        while let Some(from) = self.to_merge.pop() {
            let to = self.merge_target(from);
            debug_assert_ne!(to, from, "node scheduled to merge without target");
            debug_assert!(self.node(from).is_content() && self.node(to).is_content());

            #[cfg(feature = "trace")]
            tracing::trace!(%from, %to, "merge content");

            // Redirect incoming points-to edges, unlink defer predecessors
            let from_preds = self.node(from).preds.clone();
            for pred in &from_preds {
                match pred.kind {
                    EdgeKind::PointsTo => {
                        if pred.node != from {
                            self.set_points_to_edge(pred.node, to);
                        }
                    }
                    EdgeKind::Defer => {
                        self.node_mut(pred.node).defers_to.retain(|d| *d != from);
                    }
                }
            }
            // Unlink outgoing defer edges
            let from_defers = self.node(from).defers_to.clone();
            for d in &from_defers {
                self.node_mut(*d).remove_from_preds(Predecessor::defer(from));
            }

            let redirect = |pt: NodeId| if pt == from { to } else { pt };
            let from_pt = self.node(from).points_to;

            // Redirect the outgoing points-to edge
            if self.node(from).points_to_is_edge {
                if let Some(fpt) = from_pt {
                    self.node_mut(fpt).remove_from_preds(Predecessor::points_to(from));
                }
                if !self.node(to).points_to_is_edge {
                    match self.node(to).points_to {
                        None => {
                            if let Some(fpt) = from_pt {
                                self.initialize_points_to_edge(to, redirect(fpt));
                            }
                        }
                        Some(tpt) => {
                            let tpt = redirect(tpt);
                            let t = self.node_mut(to);
                            t.points_to_is_edge = true;
                            t.points_to = Some(tpt);
                            self.node_mut(tpt).preds.push(Predecessor::points_to(to));
                        }
                    }
                }
            }

            // Contents of both sides must be merged as well
            if let (Some(tpt), Some(fpt)) = (self.node(to).points_to, from_pt) {
                if tpt != from {
                    self.schedule_to_merge(redirect(fpt), tpt);
                }
            }

            if self.node(to).points_to == Some(from) {
                self.merge_points_to(to, to);
            }

            // Move the defer edges of `from` over to `to`
            for (deferred, is_successor) in self.defer_neighbours_snapshot(&from_preds, &from_defers) {
                if deferred == to {
                    continue;
                }
                if self.node(deferred).points_to == Some(from) {
                    self.merge_points_to(deferred, to);
                }
                if is_successor {
                    self.add_deferred(to, deferred);
                } else {
                    self.add_deferred(deferred, to);
                }
                let deferred_pt = self.node(deferred).points_to;
                let to_pt = self.node(to).points_to;
                match (deferred_pt, to_pt) {
                    (Some(_), Some(tpt)) => self.merge_points_to(deferred, tpt),
                    (Some(dpt), None) => self.initialize_points_to(to, dpt, false),
                    (None, Some(tpt)) => self.initialize_points_to(deferred, tpt, false),
                    (None, None) => {}
                }
            }

            // Nodes that pointed to `from` now point to `to`; update their webs
            let mut pred_idx = 0;
            while pred_idx < self.node(to).preds.len() {
                let pred = self.node(to).preds[pred_idx];
                pred_idx += 1;
                if pred.kind != EdgeKind::PointsTo {
                    continue;
                }
                for (deferred, _) in self.defer_neighbours(pred.node) {
                    if self.node(deferred).points_to.is_some() {
                        self.merge_points_to(deferred, to);
                    }
                }
            }

            let from_state = self.node(from).state;
            self.node_mut(to).merge_escape_state(from_state);
            self.merge_use_points(to, from);

            // Tombstone
            if let Some(value) = self.node(from).mapped_value {
                if self.node(to).mapped_value.is_none() {
                    self.node_mut(to).mapped_value = Some(value);
                    self.remap_value(value, to);
                }
            }
            let f = self.node_mut(from);
            f.is_merged = true;
            f.mapped_value = None;
            f.preds.clear();
            f.defers_to.clear();
            f.points_to = None;
            f.points_to_is_edge = false;
            f.use_points.clear();
        }
    }

    fn defer_neighbours_snapshot(
        &self,
        preds: &[Predecessor],
        defers: &[NodeId],
    ) -> Vec<(NodeId, bool)> {
        preds
            .iter()
            .filter(|p| p.kind == EdgeKind::Defer)
            .map(|p| (p.node, false))
            .chain(defers.iter().map(|d| (*d, true)))
            .collect()
    }

    /// Re-point `initial` and its whole defer web from the old content to
    /// `new_pt`
    pub(crate) fn merge_points_to(&mut self, initial: NodeId, new_pt: NodeId) {
        let Some(old_pt) = self.node(initial).points_to else {
            debug_assert!(false, "merging content should not initialize points-to");
            return;
        };
        let new_pt = self.merge_target(new_pt);
        if old_pt == new_pt {
            return;
        }

        let mut updated = NodeWorklist::new();
        self.update_points_to(initial, new_pt, &mut updated);
        let mut idx = 0;
        while idx < updated.len() {
            let node = updated.get(idx);
            idx += 1;
            for (neighbour, _) in self.defer_neighbours(node) {
                if !updated.contains(neighbour) {
                    self.update_points_to(neighbour, new_pt, &mut updated);
                }
            }
        }
    }

    fn update_points_to(&mut self, node: NodeId, new_pt: NodeId, updated: &mut NodeWorklist) {
        let Some(current) = self.node(node).points_to else {
            return;
        };
        if current == new_pt {
            return;
        }
        if self.node(node).points_to_is_edge {
            self.node_mut(current)
                .remove_from_preds(Predecessor::points_to(node));
            self.set_points_to_edge(node, new_pt);
        } else {
            self.node_mut(node).points_to = Some(new_pt);
        }
        updated.try_push(node);
    }
}
