//! Per-function analysis state and the bottom-up order of one recompute
//!
//! Every recompute gets a fresh update id. A function visited during that
//! update is stamped with it, and `schedule_index` records its position in
//! the bottom-up order: callees come before their callers, except along
//! recursive edges.

use crate::features::escape_analysis::infrastructure::ConnectionGraph;
use crate::shared::ir::{FunctionId, InstId};

/// A call site of a function: `site` is an apply or a release in `caller`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerEdge {
    pub caller: FunctionId,
    pub site: InstId,
}

/// Graphs and bookkeeping of one function
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub(crate) graph: ConnectionGraph,
    pub(crate) summary: ConnectionGraph,
    pub(crate) callers: Vec<CallerEdge>,

    /// The full graph changed since the summary was last derived from it
    pub(crate) need_update_summary: bool,

    /// Both graphs are final and may be reused by later updates
    pub(crate) computed: bool,

    /// Update in which the graphs were last rebuilt
    pub(crate) built_in: u32,
    /// Update in which the function was last visited
    pub(crate) visited_in: u32,
    /// Position in the order of update `visited_in`
    pub(crate) schedule_index: Option<usize>,
}

impl FunctionInfo {
    pub fn new(function: FunctionId) -> Self {
        Self {
            graph: ConnectionGraph::full(function),
            summary: ConnectionGraph::summary(function),
            callers: Vec::new(),
            need_update_summary: false,
            computed: false,
            built_in: 0,
            visited_in: 0,
            schedule_index: None,
        }
    }

    pub fn graph(&self) -> &ConnectionGraph {
        &self.graph
    }

    pub fn summary(&self) -> &ConnectionGraph {
        &self.summary
    }

    pub fn callers(&self) -> &[CallerEdge] {
        &self.callers
    }

    pub fn is_computed(&self) -> bool {
        self.computed
    }

    /// Record a call site. Duplicate edges are ignored.
    pub(crate) fn add_caller(&mut self, caller: FunctionId, site: InstId) {
        let edge = CallerEdge { caller, site };
        if !self.callers.contains(&edge) {
            self.callers.push(edge);
        }
    }
}

/// Bottom-up order of the functions visited in one update
#[derive(Debug)]
pub(crate) struct FunctionOrder {
    update: u32,
    order: Vec<FunctionId>,
}

impl FunctionOrder {
    pub fn new(update: u32) -> Self {
        Self {
            update,
            order: Vec::new(),
        }
    }

    pub fn is_visited(&self, info: &FunctionInfo) -> bool {
        info.visited_in == self.update
    }

    /// Mark `info` visited. Returns true if there is nothing to build:
    /// it was already visited in this update, or its graphs are final.
    /// Otherwise its graphs are reset for a rebuild.
    pub fn prepare_for_visiting(&self, function: FunctionId, info: &mut FunctionInfo) -> bool {
        if self.is_visited(info) {
            return true;
        }
        info.visited_in = self.update;
        info.schedule_index = None;
        if info.computed {
            return true;
        }
        info.graph = ConnectionGraph::full(function);
        info.summary = ConnectionGraph::summary(function);
        info.built_in = self.update;
        info.need_update_summary = true;
        false
    }

    /// Append `function` unless it is already in the order
    pub fn try_to_schedule(&mut self, function: FunctionId, info: &mut FunctionInfo) {
        if info.schedule_index.is_some() && info.visited_in == self.update {
            return;
        }
        info.schedule_index = Some(self.order.len());
        self.order.push(function);
    }

    /// True if `caller` comes after `callee` in the order, i.e. it will see
    /// the callee's summary in the current pass
    pub fn is_scheduled_after(&self, caller: &FunctionInfo, callee: &FunctionInfo) -> bool {
        match (caller.schedule_index, callee.schedule_index) {
            (Some(a), Some(b)) => caller.visited_in == self.update && a > b,
            _ => false,
        }
    }

    /// True if the graphs of `info` were rebuilt in this update
    pub fn was_recomputed(&self, info: &FunctionInfo) -> bool {
        info.built_in == self.update
    }

    pub fn functions(&self) -> &[FunctionId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}
