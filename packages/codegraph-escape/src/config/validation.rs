//! Configuration validation

use super::error::ConfigResult;

/// Trait for validatable configuration objects
///
/// # Example
/// ```rust,ignore
/// use codegraph_escape::config::{EscapeConfig, Validatable};
///
/// let config = EscapeConfig::default().max_graph_merges(8);
/// config.validate()?;
/// ```
pub trait Validatable {
    /// Returns `Ok(())` if valid, `Err(ConfigError)` with details if invalid.
    fn validate(&self) -> ConfigResult<()>;

    /// Get the configuration name for error messages
    fn config_name(&self) -> &'static str {
        "Config"
    }
}

/// Validate a range-bounded field, producing a `ConfigError::Range` on failure
pub(crate) fn check_range(
    field: &str,
    value: usize,
    min: usize,
    max: usize,
    hint: &str,
) -> ConfigResult<()> {
    if value < min || value > max {
        return Err(super::ConfigError::range_with_hint(field, value, min, max, hint));
    }
    Ok(())
}
