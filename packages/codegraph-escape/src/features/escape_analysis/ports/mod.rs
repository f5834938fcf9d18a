//! Escape Analysis Ports
//!
//! The two questions the analysis cannot answer from the IR alone:
//! - which functions a call site may invoke ([`CalleeResolver`])
//! - whether a class destructor may capture what its fields point to
//!   ([`DeinitCapturePolicy`])
//!
//! Both are injected into [`EscapeAnalysis`], so an optimizer can plug in
//! its own call graph or class-hierarchy knowledge.
//!
//! [`EscapeAnalysis`]: crate::features::escape_analysis::application::EscapeAnalysis

use crate::shared::ir::{Callee, ClassType, FunctionId, InstId, InstKind, Module, ValueId};
use rustc_hash::FxHashSet;

// ═══════════════════════════════════════════════════════════════════════════
// Callee resolution
// ═══════════════════════════════════════════════════════════════════════════

/// Result of resolving a call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalleeSet {
    /// The call invokes one of exactly these functions
    Precise(Vec<FunctionId>),
    /// Anything may be called
    Unknown,
}

impl CalleeSet {
    pub fn is_unknown(&self) -> bool {
        matches!(self, CalleeSet::Unknown)
    }
}

/// Call graph port
///
/// `site` is an `apply` instruction of `caller`.
pub trait CalleeResolver: Send + Sync {
    fn resolve_callees(&self, module: &Module, caller: FunctionId, site: InstId) -> CalleeSet;
}

/// Resolves direct calls and calls through a `function_ref`, possibly
/// wrapped in a `partial_apply`
///
/// A callee without any blocks beyond an empty entry is an external
/// declaration and resolves to `Unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCalleeResolver;

impl StaticCalleeResolver {
    fn resolve_value(module: &Module, caller: FunctionId, mut value: ValueId) -> Option<FunctionId> {
        let function = module.function(caller)?;
        loop {
            match function.defining_kind(value)? {
                InstKind::FunctionRef { function } => return Some(*function),
                InstKind::PartialApply { callee, .. } => value = *callee,
                InstKind::CopyValue { operand } | InstKind::BeginBorrow { operand } => {
                    value = *operand
                }
                _ => return None,
            }
        }
    }

    fn has_body(module: &Module, f: FunctionId) -> bool {
        module
            .function(f)
            .is_some_and(|func| func.terminator(func.entry_block()).is_some())
    }
}

impl CalleeResolver for StaticCalleeResolver {
    fn resolve_callees(&self, module: &Module, caller: FunctionId, site: InstId) -> CalleeSet {
        let Some(function) = module.function(caller) else {
            return CalleeSet::Unknown;
        };
        let InstKind::Apply { callee, .. } = &function.inst(site).kind else {
            return CalleeSet::Unknown;
        };
        let target = match callee {
            Callee::Direct(f) => Some(*f),
            Callee::Value(v) => Self::resolve_value(module, caller, *v),
        };
        match target {
            Some(f) if Self::has_body(module, f) => CalleeSet::Precise(vec![f]),
            _ => CalleeSet::Unknown,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Destructor capture
// ═══════════════════════════════════════════════════════════════════════════

/// Whether releasing the last reference to an object may let its
/// destructor store what the object's fields point to somewhere else
pub trait DeinitCapturePolicy: Send + Sync {
    fn deinit_captures_fields(&self, class: &ClassType) -> bool;
}

/// Destructors of the named classes only release their fields
#[derive(Debug, Clone, Default)]
pub struct NamedDeinitPolicy {
    non_capturing: FxHashSet<String>,
}

impl NamedDeinitPolicy {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            non_capturing: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl DeinitCapturePolicy for NamedDeinitPolicy {
    fn deinit_captures_fields(&self, class: &ClassType) -> bool {
        !self.non_capturing.contains(&class.name)
    }
}
