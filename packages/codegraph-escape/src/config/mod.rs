//! Configuration
//!
//! Preset-based configuration with builder overrides and YAML loading.
//!
//! ```rust,ignore
//! use codegraph_escape::config::{EscapeConfig, Preset};
//!
//! let config = EscapeConfig::preset(Preset::Fast).max_nodes(5_000);
//! ```

pub mod error;
mod escape_config;
mod preset;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use escape_config::EscapeConfig;
pub use preset::Preset;
pub use validation::Validatable;
