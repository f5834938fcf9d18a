//! Escape analysis configuration
//!
//! Budgets of the interprocedural analysis plus the knobs of its effect
//! rules. Built from a [`Preset`], refined with builder setters, or loaded
//! from YAML:
//!
//! ```yaml
//! version: 1
//! preset: balanced
//! overrides:
//!   max_graph_merges: 8
//!   non_capturing_deinits: [Array, ContiguousArrayStorage, Dictionary]
//! ```

use super::error::{ConfigError, ConfigResult};
use super::preset::Preset;
use super::validation::{check_range, Validatable};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Escape analysis configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscapeConfig {
    /// Interprocedural iterations before remaining call sites are made
    /// conservative (1..=64)
    pub max_graph_merges: usize,

    /// How deep the builder follows resolved callees and destructors from
    /// the function being analyzed (0..=32)
    pub max_recursion_depth: usize,

    /// Node cap per connection graph; larger graphs are invalidated
    /// (16..=1000000)
    pub max_nodes: usize,

    /// Model well-known container operations instead of treating them as
    /// opaque calls
    pub model_container_semantics: bool,

    /// Check structural invariants after every graph computation
    pub verify_graphs: bool,

    /// Classes whose destructors only release their fields
    pub non_capturing_deinits: Vec<String>,
}

impl Default for EscapeConfig {
    fn default() -> Self {
        Self::preset(Preset::Balanced)
    }
}

impl EscapeConfig {
    pub const SUPPORTED_VERSIONS: [u32; 1] = [1];

    pub fn preset(preset: Preset) -> Self {
        let (max_graph_merges, max_recursion_depth, max_nodes) = match preset {
            Preset::Fast => (2, 1, 2_000),
            Preset::Balanced => (4, 3, 10_000),
            Preset::Thorough => (16, 8, 100_000),
        };
        Self {
            max_graph_merges,
            max_recursion_depth,
            max_nodes,
            model_container_semantics: true,
            verify_graphs: cfg!(debug_assertions),
            non_capturing_deinits: vec!["Array".to_string(), "ContiguousArrayStorage".to_string()],
        }
    }

    // Builder setters

    pub fn max_graph_merges(mut self, value: usize) -> Self {
        self.max_graph_merges = value;
        self
    }

    pub fn max_recursion_depth(mut self, value: usize) -> Self {
        self.max_recursion_depth = value;
        self
    }

    pub fn max_nodes(mut self, value: usize) -> Self {
        self.max_nodes = value;
        self
    }

    pub fn model_container_semantics(mut self, value: bool) -> Self {
        self.model_container_semantics = value;
        self
    }

    pub fn verify_graphs(mut self, value: bool) -> Self {
        self.verify_graphs = value;
        self
    }

    pub fn non_capturing_deinit(mut self, class_name: impl Into<String>) -> Self {
        self.non_capturing_deinits.push(class_name.into());
        self
    }

    // YAML

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: EscapeConfigFileV1 = serde_yaml::from_str(content)?;
        if !Self::SUPPORTED_VERSIONS.contains(&file.version) {
            return Err(ConfigError::UnsupportedVersion {
                found: file.version,
                supported: Self::SUPPORTED_VERSIONS.to_vec(),
            });
        }
        let preset = match file.preset.as_deref() {
            None => Preset::default(),
            Some(name) => {
                Preset::parse(name).ok_or_else(|| ConfigError::UnknownPreset(name.to_string()))?
            }
        };
        let mut config = Self::preset(preset);
        if let Some(overrides) = file.overrides {
            overrides.apply(&mut config);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Serialize as a version 1 file with every field overridden
    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = EscapeConfigFileV1 {
            version: 1,
            preset: None,
            overrides: Some(EscapeOverrides::from(self.clone())),
        };
        Ok(serde_yaml::to_string(&file)?)
    }
}

impl Validatable for EscapeConfig {
    fn validate(&self) -> ConfigResult<()> {
        check_range(
            "max_graph_merges",
            self.max_graph_merges,
            1,
            64,
            "At least one interprocedural iteration is required",
        )?;
        check_range(
            "max_recursion_depth",
            self.max_recursion_depth,
            0,
            32,
            "Callee and destructor build depth must stay small",
        )?;
        check_range(
            "max_nodes",
            self.max_nodes,
            16,
            1_000_000,
            "Graphs need room for a handful of nodes",
        )?;
        if self.non_capturing_deinits.iter().any(|n| n.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "non_capturing_deinits must not contain empty class names".to_string(),
            ));
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "EscapeConfig"
    }
}

/// YAML schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EscapeConfigFileV1 {
    version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    preset: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    overrides: Option<EscapeOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EscapeOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_graph_merges: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_recursion_depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_nodes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_container_semantics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    verify_graphs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    non_capturing_deinits: Option<Vec<String>>,
}

impl EscapeOverrides {
    fn apply(self, config: &mut EscapeConfig) {
        if let Some(v) = self.max_graph_merges {
            config.max_graph_merges = v;
        }
        if let Some(v) = self.max_recursion_depth {
            config.max_recursion_depth = v;
        }
        if let Some(v) = self.max_nodes {
            config.max_nodes = v;
        }
        if let Some(v) = self.model_container_semantics {
            config.model_container_semantics = v;
        }
        if let Some(v) = self.verify_graphs {
            config.verify_graphs = v;
        }
        if let Some(v) = self.non_capturing_deinits {
            config.non_capturing_deinits = v;
        }
    }
}

impl From<EscapeConfig> for EscapeOverrides {
    fn from(config: EscapeConfig) -> Self {
        Self {
            max_graph_merges: Some(config.max_graph_merges),
            max_recursion_depth: Some(config.max_recursion_depth),
            max_nodes: Some(config.max_nodes),
            model_container_semantics: Some(config.model_container_semantics),
            verify_graphs: Some(config.verify_graphs),
            non_capturing_deinits: Some(config.non_capturing_deinits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_balanced() {
        let config = EscapeConfig::default();
        assert_eq!(config.max_graph_merges, 4);
        assert_eq!(config.max_recursion_depth, 3);
        assert_eq!(config.max_nodes, 10_000);
        assert!(config.model_container_semantics);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_validate() {
        for preset in [Preset::Fast, Preset::Balanced, Preset::Thorough] {
            assert!(EscapeConfig::preset(preset).validate().is_ok(), "{preset}");
        }
    }

    #[test]
    fn test_builder_setters() {
        let config = EscapeConfig::default()
            .max_graph_merges(1)
            .max_recursion_depth(0)
            .non_capturing_deinit("Dictionary");
        assert_eq!(config.max_graph_merges, 1);
        assert_eq!(config.max_recursion_depth, 0);
        assert!(config.non_capturing_deinits.iter().any(|n| n == "Dictionary"));
    }

    #[test]
    fn test_zero_merges_is_rejected() {
        let err = EscapeConfig::default().max_graph_merges(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Range { ref field, .. } if field == "max_graph_merges"));
    }

    #[test]
    fn test_yaml_overrides_preset() {
        let yaml = r#"
version: 1
preset: fast
overrides:
  max_nodes: 500
  non_capturing_deinits: [Array]
"#;
        let config = EscapeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.max_graph_merges, 2);
        assert_eq!(config.max_nodes, 500);
        assert_eq!(config.non_capturing_deinits, vec!["Array".to_string()]);
    }

    #[test]
    fn test_yaml_rejects_unknown_fields_and_versions() {
        assert!(matches!(
            EscapeConfig::from_yaml_str("version: 1\noverrides:\n  max_nodez: 3\n"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(matches!(
            EscapeConfig::from_yaml_str("version: 2\n"),
            Err(ConfigError::UnsupportedVersion { found: 2, .. })
        ));
        assert!(matches!(
            EscapeConfig::from_yaml_str("version: 1\npreset: turbo\n"),
            Err(ConfigError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = EscapeConfig::preset(Preset::Thorough).max_nodes(4242);
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("max_nodes: 4242"));
        assert_eq!(EscapeConfig::from_yaml_str(&yaml).unwrap(), config);
    }
}
