//! Debug views of a connection graph
//!
//! Textual dump, one line per live node:
//! ```text
//! n2 Con [int] %4 Esc: A, Succ: (n3), n5
//! ```
//! a Graphviz export through petgraph, and a JSON snapshot for tooling.

use super::ConnectionGraph;
use crate::features::escape_analysis::domain::{EscapeState, NodeId, NodeKind};
use crate::shared::ir::{InstId, ValueId};
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt::Write;

/// Serializable view of one live node
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub state: EscapeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_to: Option<NodeId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub defers_to: Vec<NodeId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub use_points: Vec<InstId>,
}

/// Serializable view of a whole graph
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub valid: bool,
    pub summary: bool,
    pub nodes: Vec<NodeSnapshot>,
}

impl ConnectionGraph {
    /// Render all live nodes, ordered by node id
    pub fn dump(&self) -> String {
        let mut out = String::new();
        if !self.is_valid() {
            out.push_str("<invalid>\n");
            return out;
        }
        for (id, _) in self.live_nodes() {
            out.push_str(&self.dump_node(id));
            out.push('\n');
        }
        out
    }

    pub fn dump_node(&self, id: NodeId) -> String {
        let node = self.node(id);
        let mut line = format!("{} {}", id, node.kind().tag());
        if node.is_interior() {
            line.push_str(" [int]");
        }
        if node.has_reference_only() {
            line.push_str(" [ref]");
        }
        if let Some(value) = node.mapped_value() {
            let _ = write!(line, " {value}");
        }

        line.push_str(" Esc: ");
        if node.escape_state() == EscapeState::NoEscape && !node.use_points().is_empty() {
            let points: Vec<String> = self
                .use_points_of(id)
                .iter()
                .map(|inst| inst.to_string())
                .collect();
            line.push_str(&points.join(","));
        } else {
            line.push_str(node.escape_state().marker());
        }

        line.push_str(", Succ:");
        let mut sep = " ";
        if let Some(pt) = node.points_to() {
            if node.points_to_is_edge() {
                let _ = write!(line, "{sep}({})", self.merge_target(pt));
            } else {
                let _ = write!(line, "{sep}[{}]", self.merge_target(pt));
            }
            sep = ", ";
        }
        for def in node.defers_to() {
            let _ = write!(line, "{sep}{def}");
            sep = ", ";
        }
        line
    }

    /// Live nodes and edges as a petgraph graph. Inferred points-to fields
    /// are left out, only real edges are exported.
    pub fn to_petgraph(&self) -> DiGraph<String, &'static str> {
        let mut graph = DiGraph::new();
        let mut index: FxHashMap<NodeId, NodeIndex> = FxHashMap::default();
        for (id, node) in self.live_nodes() {
            let mut label = format!("{} {}", id, node.kind().tag());
            let marker = node.escape_state().marker();
            if !marker.is_empty() {
                let _ = write!(label, " {marker}");
            }
            index.insert(id, graph.add_node(label));
        }
        for (id, node) in self.live_nodes() {
            let from = index[&id];
            if node.points_to_is_edge() {
                if let Some(pt) = node.points_to() {
                    if let Some(to) = index.get(&pt) {
                        graph.add_edge(from, *to, "pt");
                    }
                }
            }
            for def in node.defers_to() {
                if let Some(to) = index.get(def) {
                    graph.add_edge(from, *to, "defer");
                }
            }
        }
        graph
    }

    /// Graphviz source of `to_petgraph`
    pub fn to_dot(&self) -> String {
        let graph = self.to_petgraph();
        format!("{}", Dot::with_config(&graph, &[]))
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = if self.is_valid() {
            self.live_nodes()
                .map(|(id, node)| NodeSnapshot {
                    id,
                    kind: node.kind(),
                    state: node.escape_state(),
                    value: node.mapped_value(),
                    points_to: node.points_to().map(|pt| self.merge_target(pt)),
                    defers_to: node.defers_to().to_vec(),
                    use_points: self.use_points_of(id),
                })
                .collect()
        } else {
            Vec::new()
        };
        GraphSnapshot {
            valid: self.is_valid(),
            summary: self.is_summary(),
            nodes,
        }
    }

    /// Pretty-printed JSON of `snapshot`
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}
