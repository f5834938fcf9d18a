//! Splicing one connection graph into another
//!
//! Used for callee-into-caller merges and graph-into-summary merges. The
//! caller seeds a [`NodeMap`] with the nodes both graphs agree on (arguments
//! to parameters, return to call result); `merge_from` maps the rest of the
//! source's content nodes onto the destination.

use super::{ConnectionGraph, NodeWorklist};
use crate::features::escape_analysis::domain::{EscapeState, NodeId};
use rustc_hash::FxHashMap;

/// Source node -> destination node, in insertion order
#[derive(Debug, Default)]
pub struct NodeMap {
    map: FxHashMap<NodeId, NodeId>,
    mapped: Vec<NodeId>,
}

impl NodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `from` to `to`. The first mapping of a source node wins.
    pub fn add(&mut self, from: NodeId, to: NodeId) -> bool {
        if self.map.contains_key(&from) {
            return false;
        }
        self.map.insert(from, to);
        self.mapped.push(from);
        true
    }

    /// Destination node of `from`, resolved against merges in `dest`
    pub fn get(&self, dest: &ConnectionGraph, from: NodeId) -> Option<NodeId> {
        self.map.get(&from).map(|to| dest.merge_target(*to))
    }

    pub fn len(&self) -> usize {
        self.mapped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapped.is_empty()
    }

    fn source_at(&self, idx: usize) -> NodeId {
        self.mapped[idx]
    }
}

impl ConnectionGraph {
    /// Merge the nodes of `source` reachable from the mapped nodes into this
    /// graph. Returns true if this graph changed.
    ///
    /// Escape states of the source are relative to the source function, so
    /// only `GlobalEscaping` carries over.
    pub fn merge_from(&mut self, source: &ConnectionGraph, mapping: &mut NodeMap) -> bool {
        debug_assert!(self.is_valid() && source.is_valid());
        let mut changed = false;

        // Step 1: replicate points-to edges and content nodes
        let mut idx = 0;
        while idx < mapping.len() {
            let src = mapping.source_at(idx);
            idx += 1;
            let Some(dest) = mapping.get(self, src) else {
                continue;
            };
            let src_node = source.node(src);

            if src_node.escape_state() >= EscapeState::GlobalEscaping {
                changed |= self.merge_escape_state(dest, EscapeState::GlobalEscaping);
                // An interior node still needs its content
                if !self.node(dest).is_interior() || self.node(dest).points_to().is_some() {
                    continue;
                }
            }

            let Some(src_pt) = source.points_to(src) else {
                continue;
            };
            let dest_pt = self.points_to(dest);
            match mapping.get(self, src_pt) {
                None => {
                    let dest_pt = match dest_pt {
                        Some(pt) => pt,
                        None => {
                            changed = true;
                            let pt_node = source.node(src_pt);
                            self.create_content_node(
                                dest,
                                pt_node.is_interior(),
                                pt_node.has_reference_only(),
                            )
                        }
                    };
                    mapping.add(src_pt, dest_pt);
                }
                Some(mapped_pt) if dest_pt == Some(mapped_pt) => {}
                Some(mapped_pt) => {
                    changed = true;
                    match dest_pt {
                        None => self.initialize_points_to_edge(dest, mapped_pt),
                        // Two contents here map to one content in the source
                        Some(dest_pt) => self.schedule_to_merge(dest_pt, mapped_pt),
                    }
                }
            }
        }
        self.merge_all_scheduled();

        // Step 2: replicate defer edges
        for idx in 0..mapping.len() {
            let src = mapping.source_at(idx);
            let Some(mut dest_from) = mapping.get(self, src) else {
                continue;
            };
            let mut worklist = NodeWorklist::new();
            worklist.try_push(src);
            let mut i = 0;
            while i < worklist.len() {
                let reachable = worklist.get(i);
                i += 1;
                match mapping.get(self, reachable) {
                    Some(dest_reachable) => {
                        dest_from = self.defer_tracked(dest_from, dest_reachable, &mut changed);
                    }
                    None if source.node(reachable).escape_state()
                        >= EscapeState::GlobalEscaping =>
                    {
                        changed |= self.merge_escape_state(dest_from, EscapeState::GlobalEscaping);
                    }
                    None => {}
                }
                for &deferred in source.node(reachable).defers_to() {
                    worklist.try_push(deferred);
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::escape_analysis::domain::{CGNode, NodeKind};

    fn value(graph: &mut ConnectionGraph, kind: NodeKind) -> NodeId {
        graph.alloc_node(CGNode::new(kind, None))
    }

    #[test]
    fn test_merge_from_replicates_content_chain() {
        let mut callee = ConnectionGraph::default();
        let param = value(&mut callee, NodeKind::Argument);
        let object = callee.create_content_node(param, true, false);
        let field = callee.create_content_node(object, false, false);
        callee.set_escapes_global(field);

        let mut caller = ConnectionGraph::default();
        let arg = value(&mut caller, NodeKind::Value);

        let mut mapping = NodeMap::new();
        mapping.add(param, arg);
        assert!(caller.merge_from(&callee, &mut mapping));

        let dest_object = caller.points_to(arg).unwrap();
        assert!(caller.node(dest_object).is_interior());
        let dest_field = caller.points_to(dest_object).unwrap();
        assert_eq!(
            caller.node(dest_field).escape_state(),
            EscapeState::GlobalEscaping
        );
        assert!(caller.verify_structure(false).is_ok());
    }

    #[test]
    fn test_merge_from_unifies_aliased_parameters() {
        // Callee: both parameters point to the same content
        let mut callee = ConnectionGraph::default();
        let p0 = value(&mut callee, NodeKind::Argument);
        let p1 = value(&mut callee, NodeKind::Argument);
        let shared = callee.create_content_node(p0, false, false);
        callee.initialize_points_to_edge(p1, shared);

        let mut caller = ConnectionGraph::default();
        let a0 = value(&mut caller, NodeKind::Value);
        let a1 = value(&mut caller, NodeKind::Value);
        let c0 = caller.create_content_node(a0, false, false);
        let c1 = caller.create_content_node(a1, false, false);

        let mut mapping = NodeMap::new();
        mapping.add(p0, a0);
        mapping.add(p1, a1);
        assert!(caller.merge_from(&callee, &mut mapping));

        assert_eq!(caller.merge_target(c0), caller.merge_target(c1));
        assert!(caller.verify_structure(false).is_ok());
    }

    #[test]
    fn test_merge_from_replicates_defer_edges() {
        // Callee returns its parameter
        let mut callee = ConnectionGraph::default();
        let param = value(&mut callee, NodeKind::Argument);
        let ret = callee.get_return_node();
        callee.defer(ret, param);

        let mut caller = ConnectionGraph::default();
        let arg = value(&mut caller, NodeKind::Value);
        let result = value(&mut caller, NodeKind::Value);
        let content = caller.create_content_node(arg, false, false);

        let mut mapping = NodeMap::new();
        mapping.add(param, arg);
        mapping.add(ret, result);
        assert!(caller.merge_from(&callee, &mut mapping));

        assert!(caller.node(result).defers_to().contains(&arg));
        assert_eq!(caller.points_to(result), Some(content));

        // Merging the same summary again changes nothing
        let mut again = NodeMap::new();
        again.add(param, arg);
        again.add(ret, result);
        assert!(!caller.merge_from(&callee, &mut again));
    }

    #[test]
    fn test_unmapped_global_defer_target_escapes_source() {
        let mut callee = ConnectionGraph::default();
        let param = value(&mut callee, NodeKind::Argument);
        let global = value(&mut callee, NodeKind::Value);
        callee.set_escapes_global(global);
        callee.add_deferred(param, global);

        let mut caller = ConnectionGraph::default();
        let arg = value(&mut caller, NodeKind::Value);

        let mut mapping = NodeMap::new();
        mapping.add(param, arg);
        caller.merge_from(&callee, &mut mapping);
        assert_eq!(caller.node(arg).escape_state(), EscapeState::GlobalEscaping);
    }
}
