//! Preset configurations

use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// JIT-style compilation: shallow callee inlining, small graphs
    ///
    /// - max_graph_merges=2, max_recursion_depth=1, max_nodes=2000
    Fast,

    /// Default optimizer setting
    ///
    /// - max_graph_merges=4, max_recursion_depth=3, max_nodes=10000
    #[default]
    Balanced,

    /// Whole-module optimization with generous budgets
    ///
    /// - max_graph_merges=16, max_recursion_depth=8, max_nodes=100000
    Thorough,
}

impl Preset {
    /// Parse preset from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fast" => Some(Self::Fast),
            "balanced" => Some(Self::Balanced),
            "thorough" => Some(Self::Thorough),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Thorough => "thorough",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Preset::parse("FAST"), Some(Preset::Fast));
        assert_eq!(Preset::parse("thorough"), Some(Preset::Thorough));
        assert_eq!(Preset::parse("custom"), None);
    }
}
