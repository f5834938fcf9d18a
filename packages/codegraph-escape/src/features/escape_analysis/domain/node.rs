//! Connection graph nodes
//!
//! Nodes live in an arena owned by their [`ConnectionGraph`] and refer to
//! each other by [`NodeId`]. A merged node stays in the arena as a
//! tombstone whose `merge_to` is the only way forward.
//!
//! [`ConnectionGraph`]: crate::features::escape_analysis::infrastructure::ConnectionGraph

use super::{EscapeState, UsePointSet};
use crate::shared::ir::ValueId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a node in its graph's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// A pointer value
    Value,
    /// Memory addressed by a pointer
    Content,
    /// A function parameter
    Argument,
    /// The returned value
    Return,
}

impl NodeKind {
    /// Three letter tag used in dumps
    pub fn tag(self) -> &'static str {
        match self {
            NodeKind::Value => "Val",
            NodeKind::Content => "Con",
            NodeKind::Argument => "Arg",
            NodeKind::Return => "Ret",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    PointsTo,
    Defer,
}

/// Back-reference from a successor to the node owning the edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Predecessor {
    pub node: NodeId,
    pub kind: EdgeKind,
}

impl Predecessor {
    pub fn points_to(node: NodeId) -> Self {
        Self {
            node,
            kind: EdgeKind::PointsTo,
        }
    }

    pub fn defer(node: NodeId) -> Self {
        Self {
            node,
            kind: EdgeKind::Defer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CGNode {
    pub(crate) kind: NodeKind,

    /// A representative IR value, if any
    pub(crate) mapped_value: Option<ValueId>,

    /// The content this node points to. Either a real edge or inferred
    /// through defer edges, see `points_to_is_edge`.
    pub(crate) points_to: Option<NodeId>,
    pub(crate) points_to_is_edge: bool,

    pub(crate) defers_to: Vec<NodeId>,
    pub(crate) preds: Vec<Predecessor>,
    pub(crate) use_points: UsePointSet,
    pub(crate) state: EscapeState,

    pub(crate) merge_to: Option<NodeId>,
    pub(crate) is_merged: bool,

    /// Content embedded in the object pointed to by its predecessor
    pub(crate) is_interior: bool,

    /// Memory holds nothing but object references
    pub(crate) has_reference_only: bool,
}

impl CGNode {
    pub(crate) fn new(kind: NodeKind, mapped_value: Option<ValueId>) -> Self {
        Self {
            kind,
            mapped_value,
            points_to: None,
            points_to_is_edge: false,
            defers_to: Vec::new(),
            preds: Vec::new(),
            use_points: UsePointSet::new(),
            state: EscapeState::NoEscape,
            merge_to: None,
            is_merged: false,
            is_interior: false,
            has_reference_only: false,
        }
    }

    pub(crate) fn content(is_interior: bool, has_reference_only: bool) -> Self {
        let mut node = Self::new(NodeKind::Content, None);
        node.is_interior = is_interior;
        node.has_reference_only = has_reference_only;
        node
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn escape_state(&self) -> EscapeState {
        self.state
    }

    pub fn mapped_value(&self) -> Option<ValueId> {
        self.mapped_value
    }

    pub fn points_to(&self) -> Option<NodeId> {
        self.points_to
    }

    pub fn points_to_is_edge(&self) -> bool {
        self.points_to_is_edge
    }

    pub fn defers_to(&self) -> &[NodeId] {
        &self.defers_to
    }

    pub fn predecessors(&self) -> &[Predecessor] {
        &self.preds
    }

    pub fn use_points(&self) -> &UsePointSet {
        &self.use_points
    }

    pub fn is_interior(&self) -> bool {
        self.is_interior
    }

    pub fn has_reference_only(&self) -> bool {
        self.has_reference_only
    }

    pub fn is_merged(&self) -> bool {
        self.is_merged
    }

    pub fn is_content(&self) -> bool {
        self.kind == NodeKind::Content
    }

    /// Raise the escape state. Returns true if it changed.
    pub(crate) fn merge_escape_state(&mut self, state: EscapeState) -> bool {
        if state > self.state {
            self.state = state;
            return true;
        }
        false
    }

    pub(crate) fn merge_flags(&mut self, is_interior: bool, has_reference_only: bool) {
        self.is_interior |= is_interior;
        self.has_reference_only &= has_reference_only;
    }

    pub fn escapes(&self) -> bool {
        self.state.escapes()
    }

    /// Global or reachable from an argument
    pub fn escapes_inside_function(&self) -> bool {
        self.state.escapes_inside_function(false)
    }

    pub(crate) fn find_deferred(&self, to: NodeId) -> bool {
        self.defers_to.contains(&to)
    }

    pub(crate) fn remove_from_preds(&mut self, pred: Predecessor) -> bool {
        match self.preds.iter().position(|p| *p == pred) {
            Some(pos) => {
                self.preds.swap_remove(pos);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_state_is_monotone() {
        let mut node = CGNode::new(NodeKind::Value, None);
        assert!(node.merge_escape_state(EscapeState::ArgumentReachable));
        assert!(!node.merge_escape_state(EscapeState::Returned));
        assert_eq!(node.escape_state(), EscapeState::ArgumentReachable);
    }

    #[test]
    fn test_merge_flags() {
        let mut node = CGNode::content(false, true);
        node.merge_flags(true, false);
        assert!(node.is_interior());
        assert!(!node.has_reference_only());
    }

    #[test]
    fn test_remove_from_preds_removes_one() {
        let mut node = CGNode::content(false, false);
        node.preds.push(Predecessor::defer(NodeId(1)));
        node.preds.push(Predecessor::points_to(NodeId(2)));
        assert!(node.remove_from_preds(Predecessor::defer(NodeId(1))));
        assert!(!node.remove_from_preds(Predecessor::defer(NodeId(1))));
        assert_eq!(node.predecessors(), &[Predecessor::points_to(NodeId(2))]);
    }
}
