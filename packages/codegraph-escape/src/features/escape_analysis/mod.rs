// Escape Analysis - Interprocedural Connection Graphs
//
// Computes, for every pointer value of a function, how far the memory it
// refers to can be seen outside the function.
//
// ## Layers
// - Domain: nodes, edges, the escape-state lattice, use-point sets
// - Infrastructure: the connection graph and its merge engine
// - Application: effect rules, graph builder, bottom-up driver, queries
// - Ports: callee resolution and destructor capture policy
//
// ## Bounds
// - `max_graph_merges` caps the summary fixpoint per recompute
// - `max_recursion_depth` caps how deep callees and destructors are built
// - `max_nodes` caps the size of a single graph

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod ports;

pub use application::{CallerEdge, EscapeAnalysis, FunctionInfo};
pub use domain::{CGNode, EscapeState, NodeId, NodeKind};
pub use infrastructure::ConnectionGraph;
pub use ports::{CalleeResolver, CalleeSet, DeinitCapturePolicy, NamedDeinitPolicy, StaticCalleeResolver};
