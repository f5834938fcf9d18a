//! Escape Analysis Infrastructure
//!
//! The connection graph and every algorithm that mutates it:
//! - `connection_graph`: node arena, value mapping, escape propagation, use points
//! - `merge`: defer edges and content merging
//! - `node_map`: splicing a callee or summary graph into another graph
//! - `verify`: structural invariant checks
//! - `dump`: text, DOT and JSON views

mod connection_graph;
mod dump;
mod function_context;
mod merge;
mod node_map;
mod verify;
mod worklist;

pub use connection_graph::ConnectionGraph;
pub use dump::{GraphSnapshot, NodeSnapshot};
pub use function_context::FunctionContext;
pub use node_map::NodeMap;
pub use verify::GraphInvariantError;
pub use worklist::NodeWorklist;
