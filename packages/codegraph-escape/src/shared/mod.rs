//! Shared models

pub mod ir;
