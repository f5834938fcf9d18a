/*
 * Codegraph Escape - Interprocedural Escape Analysis
 *
 * Feature-First Hexagonal Architecture:
 * - shared/      : The analyzed IR (module, functions, types, builder)
 * - features/    : escape_analysis (domain → infrastructure → application)
 * - config/      : Presets, builder overrides, YAML loading
 *
 * Pipeline:
 * - Effect rules classify each instruction
 * - Connection graphs are built per function, callees first
 * - Callee summaries are merged into callers until a bounded fixpoint
 * - Queries read the completed graphs
 */

// Crate-level lint configuration
#![allow(clippy::too_many_arguments)] // Graph merge helpers take both graphs and their context
#![allow(clippy::module_inception)] // Module naming intentional
#![allow(clippy::new_without_default)] // Worklists and node maps start empty

// ═══════════════════════════════════════════════════════════════════════════
// Module Exports - Feature-First Architecture
// ═══════════════════════════════════════════════════════════════════════════

/// Shared models: the analyzed IR
pub mod shared;

/// Feature modules
pub mod features;

/// Configuration system
pub mod config;

/// Error types
pub mod errors;

// ═══════════════════════════════════════════════════════════════════════════
// Re-exports for Public API
// ═══════════════════════════════════════════════════════════════════════════

pub use config::{EscapeConfig, Preset};
pub use errors::{EscapeError, Result};
pub use features::escape_analysis::{
    CalleeResolver, CalleeSet, ConnectionGraph, DeinitCapturePolicy, EscapeAnalysis, EscapeState,
    NamedDeinitPolicy, NodeId, NodeKind, StaticCalleeResolver,
};
pub use shared::ir::{FunctionId, InstId, Module, ValueId};
