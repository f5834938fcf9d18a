//! Feature modules - Each feature follows Hexagonal Architecture
//!
//! Each feature contains:
//! - domain/     - Pure graph model (no algorithms)
//! - ports/      - Interface definitions (traits)
//! - application/ - Use cases
//! - infrastructure/ - Graph algorithms

pub mod escape_analysis;
