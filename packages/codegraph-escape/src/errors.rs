//! Error types for codegraph-escape
//!
//! The analysis itself never fails: every uncertainty resolves to a
//! conservative answer. Errors only come from configuration, from asking
//! about a function the module does not contain, and from broken graph
//! invariants surfaced by explicit verification.

use crate::config::ConfigError;
use crate::features::escape_analysis::infrastructure::GraphInvariantError;
use crate::shared::ir::FunctionId;
use thiserror::Error;

/// Main error type for codegraph-escape operations
#[derive(Debug, Error)]
pub enum EscapeError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A connection graph violates a structural invariant
    #[error("Graph invariant violated in {function}: {source}")]
    Graph {
        function: FunctionId,
        #[source]
        source: GraphInvariantError,
    },

    /// The function is not part of the module
    #[error("Unknown function {0}")]
    UnknownFunction(FunctionId),
}

/// Result type alias for escape analysis operations
pub type Result<T> = std::result::Result<T, EscapeError>;
