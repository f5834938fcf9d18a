//! Node worklist with its own visited set
//!
//! Every traversal owns one of these, so traversals can nest freely.

use crate::features::escape_analysis::domain::NodeId;
use rustc_hash::FxHashSet;

#[derive(Debug, Clone, Default)]
pub struct NodeWorklist {
    nodes: Vec<NodeId>,
    visited: FxHashSet<NodeId>,
}

impl NodeWorklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node unless it was added before. Returns true if added.
    pub fn try_push(&mut self, node: NodeId) -> bool {
        if self.visited.insert(node) {
            self.nodes.push(node);
            return true;
        }
        false
    }

    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        self.visited.contains(&node)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at insertion position `idx`. Used by index loops that keep
    /// pushing while they iterate.
    #[inline]
    pub fn get(&self, idx: usize) -> NodeId {
        self.nodes[idx]
    }

    /// Remove the most recently added node. It stays marked as visited.
    pub fn pop(&mut self) -> Option<NodeId> {
        self.nodes.pop()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }
}
