//! Memanchor configuration management

use crate::error::{Error, Result};
use crate::memory::bank::ValidationBankEntry;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main memory configuration for one orchestrator instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of anchors surfaced for a single response
    pub max_anchors_per_response: usize,

    /// Minimum significance an anchor needs to be retrieved
    pub min_anchor_significance: f32,

    /// Enable Jaccard fuzzy matching during search
    pub enable_fuzzy_matching: bool,

    /// Filter retrieved anchors through the strict validator
    pub strict_validation: bool,

    /// Width in characters of the context snippet around each match
    pub context_window_size: usize,

    /// Injection strategy mode. Accepted and reported, thresholds are fixed.
    pub injection_strategy_mode: InjectionStrategyMode,

    /// Validation bank configuration
    pub validation: ValidationConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_anchors_per_response: 5,
            min_anchor_significance: 0.6,
            enable_fuzzy_matching: true,
            strict_validation: true,
            context_window_size: 100,
            injection_strategy_mode: InjectionStrategyMode::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl MemoryConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| {
            Error::Config(format!("failed to load {}: {}", path.display(), e))
        })
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values outside their documented ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_anchor_significance) {
            return Err(Error::Config(format!(
                "min_anchor_significance must be within [0, 1], got {}",
                self.min_anchor_significance
            )));
        }
        if self.max_anchors_per_response == 0 {
            return Err(Error::Config(
                "max_anchors_per_response must be at least 1".to_string(),
            ));
        }
        for entry in &self.validation.entries {
            if entry.question.trim().is_empty() {
                return Err(Error::Config(
                    "validation entries require a non-empty question".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// How assertively memory context should be surfaced downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InjectionStrategyMode {
    /// Prefer surfacing memories
    Aggressive,
    /// Prefer staying silent
    Conservative,
    /// Decide from confidence (default)
    #[default]
    Adaptive,
}

impl InjectionStrategyMode {
    /// Lowercase name used in rationales and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            InjectionStrategyMode::Aggressive => "aggressive",
            InjectionStrategyMode::Conservative => "conservative",
            InjectionStrategyMode::Adaptive => "adaptive",
        }
    }
}

/// Validation bank configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Seed the bank with the built-in canonical questions
    pub include_builtin: bool,

    /// Additional entries; an entry with an existing question replaces it
    pub entries: Vec<BankEntryConfig>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            include_builtin: true,
            entries: Vec::new(),
        }
    }
}

/// A configured validation bank entry keyed by its exact question text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankEntryConfig {
    /// Canonical question text (matched verbatim)
    pub question: String,

    /// Validation rules for the question
    #[serde(flatten)]
    pub entry: ValidationBankEntry,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::anchor::AnchorType;

    #[test]
    fn test_default_config() {
        let config = MemoryConfig::default();
        assert_eq!(config.max_anchors_per_response, 5);
        assert!((config.min_anchor_significance - 0.6).abs() < f32::EPSILON);
        assert!(config.enable_fuzzy_matching);
        assert!(config.strict_validation);
        assert_eq!(config.context_window_size, 100);
        assert_eq!(config.injection_strategy_mode, InjectionStrategyMode::Adaptive);
        assert!(config.validation.include_builtin);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = MemoryConfig::from_toml_str(
            r#"
            max_anchors_per_response = 3
            injection_strategy_mode = "conservative"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_anchors_per_response, 3);
        assert_eq!(
            config.injection_strategy_mode,
            InjectionStrategyMode::Conservative
        );
        assert!(config.strict_validation);
    }

    #[test]
    fn test_toml_bank_entries() {
        let config = MemoryConfig::from_toml_str(
            r#"
            [validation]
            include_builtin = false

            [[validation.entries]]
            question = "what did you say about sugar?"
            valid_answer_fragments = ["don't expect sugar"]
            required_substrings = ["sugar"]
            forbidden_substrings = ["i can help"]
            accepted_anchor_types = ["boundary"]
            min_significance = 0.7
            "#,
        )
        .unwrap();
        assert!(!config.validation.include_builtin);
        assert_eq!(config.validation.entries.len(), 1);
        let entry = &config.validation.entries[0];
        assert_eq!(entry.question, "what did you say about sugar?");
        assert_eq!(entry.entry.accepted_anchor_types, vec![AnchorType::Boundary]);
        assert!((entry.entry.min_significance - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rejects_out_of_range_significance() {
        let result = MemoryConfig::from_toml_str("min_anchor_significance = 1.5");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_max_anchors() {
        let result = MemoryConfig::from_toml_str("max_anchors_per_response = 0");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let config = MemoryConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = MemoryConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.context_window_size, config.context_window_size);
    }
}
