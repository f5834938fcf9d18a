//! Escape Analysis Domain
//!
//! Value objects of the connection graph: node identity and kinds, the
//! escape-state lattice and use-point sets. No graph algorithms live here.

mod escape_state;
mod node;
mod use_point_set;

pub use escape_state::EscapeState;
pub use node::{CGNode, EdgeKind, NodeId, NodeKind, Predecessor};
pub use use_point_set::UsePointSet;

/// Control value returned by traversal visitors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Continue into the visited node's neighbours
    Follow,
    /// Do not expand this node, continue with the rest of the worklist
    Backtrack,
    /// Stop the whole traversal
    Halt,
}
