//! Escape Analysis Application Layer
//!
//! - `effect_rules`: instruction kind to graph effect
//! - `builder`: per-function graph construction
//! - `function_order` + `driver`: bottom-up interprocedural fixpoint
//! - `query`: escape and alias questions on completed graphs

mod builder;
mod driver;
pub mod effect_rules;
mod function_order;
mod query;

pub use driver::{merge_callee_graph, merge_summary_graph, EscapeAnalysis};
pub use effect_rules::{classify, Effect};
pub use function_order::{CallerEdge, FunctionInfo};
