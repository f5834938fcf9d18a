//! Escape State (Value Object)
//!
//! How far outside the function the memory of a node is visible.
//!
//! Lattice: NoEscape < Returned < ArgumentReachable < GlobalEscaping
//!
//! The state of a node only ever increases.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum EscapeState {
    /// Not visible outside the function
    #[default]
    NoEscape,

    /// Reachable from the return value
    Returned,

    /// Reachable from a function argument
    ArgumentReachable,

    /// Reachable from a global, unknown code or anything else
    GlobalEscaping,
}

impl EscapeState {
    /// Join two escape states (least upper bound)
    #[inline]
    pub fn join(self, other: Self) -> Self {
        self.max(other)
    }

    /// True if the value is visible to anything outside the function body,
    /// including the caller via the return value
    #[inline]
    pub fn escapes(self) -> bool {
        self != EscapeState::NoEscape
    }

    /// True if unidentified pointers inside the function may alias the value.
    ///
    /// `non_aliasing_argument` is set when the value is an exclusive
    /// argument, which cannot alias other arguments.
    pub fn escapes_inside_function(self, non_aliasing_argument: bool) -> bool {
        match self {
            EscapeState::NoEscape | EscapeState::Returned => false,
            EscapeState::ArgumentReachable => !non_aliasing_argument,
            EscapeState::GlobalEscaping => true,
        }
    }

    /// Short marker used in textual dumps
    pub fn marker(self) -> &'static str {
        match self {
            EscapeState::NoEscape => "",
            EscapeState::Returned => "R",
            EscapeState::ArgumentReachable => "A",
            EscapeState::GlobalEscaping => "G",
        }
    }
}

impl fmt::Display for EscapeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscapeState::NoEscape => write!(f, "NoEscape"),
            EscapeState::Returned => write!(f, "Returned"),
            EscapeState::ArgumentReachable => write!(f, "ArgumentReachable"),
            EscapeState::GlobalEscaping => write!(f, "GlobalEscaping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_max() {
        assert_eq!(
            EscapeState::Returned.join(EscapeState::ArgumentReachable),
            EscapeState::ArgumentReachable
        );
        assert_eq!(
            EscapeState::GlobalEscaping.join(EscapeState::NoEscape),
            EscapeState::GlobalEscaping
        );
        assert_eq!(EscapeState::NoEscape.join(EscapeState::NoEscape), EscapeState::NoEscape);
    }

    #[test]
    fn test_escapes_inside_function() {
        assert!(!EscapeState::Returned.escapes_inside_function(false));
        assert!(EscapeState::ArgumentReachable.escapes_inside_function(false));
        assert!(!EscapeState::ArgumentReachable.escapes_inside_function(true));
        assert!(EscapeState::GlobalEscaping.escapes_inside_function(true));
    }
}
