//! Structural invariants of a connection graph
//!
//! Checked after every graph computation when `verify_graphs` is enabled.

use super::{ConnectionGraph, NodeWorklist};
use crate::features::escape_analysis::domain::{EdgeKind, NodeId, Predecessor};
use thiserror::Error;

/// A violated structural invariant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphInvariantError {
    #[error("merged node {0} is still linked into the graph")]
    LinkedTombstone(NodeId),

    #[error("merged node {0} has no merge target")]
    MissingMergeTarget(NodeId),

    #[error("node {0} is scheduled to merge outside of a merge")]
    PendingMerge(NodeId),

    #[error("edge {from} -> {to} has no matching predecessor entry")]
    MissingPredecessor { from: NodeId, to: NodeId },

    #[error("predecessor entry {pred} of {node} has no matching edge")]
    DanglingPredecessor { node: NodeId, pred: NodeId },

    #[error("node {0} defers to itself")]
    DeferSelfEdge(NodeId),

    #[error("node {node} has an edge to merged node {target}")]
    EdgeToMergedNode { node: NodeId, target: NodeId },

    #[error("points-to edge of {node} targets non-content node {target}")]
    PointsToNonContent { node: NodeId, target: NodeId },

    #[error("interior node {0} has no content")]
    InteriorWithoutContent(NodeId),

    #[error("node {0} has an inferred points-to but no defer edges")]
    InferredPointsToWithoutDefers(NodeId),

    #[error("defer web of {node} disagrees on content: {expected} vs {found} at {other}")]
    InconsistentWeb {
        node: NodeId,
        other: NodeId,
        expected: NodeId,
        found: NodeId,
    },
}

impl ConnectionGraph {
    /// Check every structural invariant of the graph
    ///
    /// With `allow_merge` set, nodes may still be scheduled to merge.
    pub fn verify_structure(&self, allow_merge: bool) -> Result<(), GraphInvariantError> {
        if !self.is_valid() {
            return Ok(());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            let id = NodeId(idx as u32);
            if node.is_merged {
                if node.merge_to.is_none() {
                    return Err(GraphInvariantError::MissingMergeTarget(id));
                }
                if node.points_to.is_some()
                    || !node.defers_to.is_empty()
                    || !node.preds.is_empty()
                    || !node.use_points.is_empty()
                    || !node.is_content()
                {
                    return Err(GraphInvariantError::LinkedTombstone(id));
                }
                continue;
            }
            if node.merge_to.is_some() && !allow_merge {
                return Err(GraphInvariantError::PendingMerge(id));
            }
            self.verify_edges(id)?;
        }
        if !allow_merge {
            for (id, _) in self.live_nodes() {
                self.verify_points_to_web(id)?;
            }
        }
        Ok(())
    }

    fn verify_edges(&self, id: NodeId) -> Result<(), GraphInvariantError> {
        let node = self.node(id);
        if let Some(pt) = node.points_to {
            if self.node(pt).is_merged {
                return Err(GraphInvariantError::EdgeToMergedNode { node: id, target: pt });
            }
            if node.points_to_is_edge {
                if !self.node(pt).is_content() {
                    return Err(GraphInvariantError::PointsToNonContent { node: id, target: pt });
                }
                if !self.node(pt).preds.contains(&Predecessor::points_to(id)) {
                    return Err(GraphInvariantError::MissingPredecessor { from: id, to: pt });
                }
            }
        } else if node.is_interior {
            return Err(GraphInvariantError::InteriorWithoutContent(id));
        }
        for &def in &node.defers_to {
            if def == id {
                return Err(GraphInvariantError::DeferSelfEdge(id));
            }
            if self.node(def).is_merged {
                return Err(GraphInvariantError::EdgeToMergedNode { node: id, target: def });
            }
            if !self.node(def).preds.contains(&Predecessor::defer(id)) {
                return Err(GraphInvariantError::MissingPredecessor { from: id, to: def });
            }
        }
        for pred in &node.preds {
            let p = self.node(pred.node);
            let linked = match pred.kind {
                EdgeKind::PointsTo => p.points_to_is_edge && p.points_to == Some(id),
                EdgeKind::Defer => p.defers_to.contains(&id),
            };
            if !linked {
                return Err(GraphInvariantError::DanglingPredecessor {
                    node: id,
                    pred: pred.node,
                });
            }
        }
        Ok(())
    }

    /// All nodes of a defer web agree on their content, and a node without
    /// a real edge gets its content from somewhere in its web
    fn verify_points_to_web(&self, id: NodeId) -> Result<(), GraphInvariantError> {
        let node = self.node(id);
        let Some(expected) = node.points_to else {
            return Ok(());
        };
        if !node.points_to_is_edge && node.defers_to.is_empty() && !self.has_defer_pred(id) {
            return Err(GraphInvariantError::InferredPointsToWithoutDefers(id));
        }
        let mut worklist = NodeWorklist::new();
        worklist.try_push(id);
        let mut idx = 0;
        while idx < worklist.len() {
            let current = worklist.get(idx);
            idx += 1;
            let n = self.node(current);
            if let Some(found) = n.points_to {
                let found = self.merge_target(found);
                if found != self.merge_target(expected) {
                    return Err(GraphInvariantError::InconsistentWeb {
                        node: id,
                        other: current,
                        expected,
                        found,
                    });
                }
            }
            for &def in &n.defers_to {
                worklist.try_push(def);
            }
            for pred in n.preds.iter().filter(|p| p.kind == EdgeKind::Defer) {
                worklist.try_push(pred.node);
            }
        }
        Ok(())
    }

    fn has_defer_pred(&self, id: NodeId) -> bool {
        self.node(id).preds.iter().any(|p| p.kind == EdgeKind::Defer)
    }
}
