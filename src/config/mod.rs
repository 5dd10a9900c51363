pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Inbound stream interpretation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Identical consecutive text fragments allowed before suppression kicks in.
    #[serde(default = "default_repetition_threshold")]
    pub repetition_threshold: u32,
    /// Recognise `<|tool_call_begin|>` style markup inside text deltas.
    #[serde(default = "default_true")]
    pub inline_tool_calls: bool,
    /// Treat an unparsable tool buffer at a `stop`/`tool_calls` finish as fatal.
    #[serde(default = "default_true")]
    pub strict_finish_flush: bool,
    /// End the frame stream when no frame arrives within this window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactivity_timeout_ms: Option<u64>,
}

fn default_repetition_threshold() -> u32 {
    20
}
fn default_true() -> bool {
    true
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            repetition_threshold: default_repetition_threshold(),
            inline_tool_calls: true,
            strict_finish_flush: true,
            inactivity_timeout_ms: None,
        }
    }
}

/// Outbound message trimming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: u64,
    /// Short user turns that must stay paired with the assistant turn before them.
    #[serde(default = "default_acknowledgements")]
    pub acknowledgements: Vec<String>,
    #[serde(default = "default_max_input_tokens")]
    pub default_max_input_tokens: u64,
    #[serde(default = "default_max_output_tokens")]
    pub default_max_output_tokens: u64,
}

fn default_chars_per_token() -> u64 {
    4
}
fn default_acknowledgements() -> Vec<String> {
    vec!["continue".to_string()]
}
fn default_max_input_tokens() -> u64 {
    128_000
}
fn default_max_output_tokens() -> u64 {
    4_096
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            chars_per_token: default_chars_per_token(),
            acknowledgements: default_acknowledgements(),
            default_max_input_tokens: default_max_input_tokens(),
            default_max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// Quota redaction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default)]
    pub disabled: bool,
    /// Case-insensitive `regex-lite` patterns; any match flags a turn.
    #[serde(default = "default_quota_patterns")]
    pub patterns: Vec<String>,
    #[serde(default = "default_max_turns_scanned")]
    pub max_turns_scanned: usize,
}

/// Narrow on purpose: a bare "429" or "quota" in echoed prompt text must not match.
pub const DEFAULT_QUOTA_PATTERNS: &[&str] = &[
    r"\b(?:http|status|error|code)\W{0,3}429\b",
    r"\b429\s+too\s+many\s+requests\b",
    r"\brate[ _-]?limit(?:ed)?[ _-]?exceeded\b",
    r"\binsufficient[ _-]quota\b",
    r"\bquota[ _-]exceeded\b",
    r"\bresource[ _-]exhausted\b",
];

fn default_quota_patterns() -> Vec<String> {
    DEFAULT_QUOTA_PATTERNS
        .iter()
        .map(|pattern| (*pattern).to_string())
        .collect()
}
fn default_max_turns_scanned() -> usize {
    8
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            patterns: default_quota_patterns(),
            max_turns_scanned: default_max_turns_scanned(),
        }
    }
}

/// Declared token ceilings of one upstream model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub name: String,
    pub max_input_tokens: u64,
    pub max_output_tokens: u64,
}

/// Input/output ceilings resolved for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLimits {
    pub max_input_tokens: u64,
    pub max_output_tokens: u64,
}

/// Top-level adapter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub models: Vec<ModelProfile>,
}

impl AdapterConfig {
    /// Resolve token ceilings for `model`: exact name, then longest prefix,
    /// then the budget defaults.
    #[must_use]
    pub fn model_limits(&self, model: &str) -> ModelLimits {
        let profile = self
            .models
            .iter()
            .find(|profile| profile.name == model)
            .or_else(|| {
                self.models
                    .iter()
                    .filter(|profile| model.starts_with(profile.name.as_str()))
                    .max_by_key(|profile| profile.name.len())
            });
        match profile {
            Some(profile) => ModelLimits {
                max_input_tokens: profile.max_input_tokens,
                max_output_tokens: profile.max_output_tokens,
            },
            None => ModelLimits {
                max_input_tokens: self.budget.default_max_input_tokens,
                max_output_tokens: self.budget.default_max_output_tokens,
            },
        }
    }
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails, or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AdapterConfig, ConfigError> {
    let config: AdapterConfig = if contents.trim().is_empty() {
        AdapterConfig::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AdapterConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("").expect("empty config");
        assert_eq!(config.stream.repetition_threshold, 20);
        assert!(config.stream.inline_tool_calls);
        assert!(config.stream.strict_finish_flush);
        assert_eq!(config.budget.chars_per_token, 4);
        assert_eq!(config.budget.acknowledgements, vec!["continue".to_string()]);
        assert!(!config.quota.disabled);
        assert_eq!(config.quota.patterns.len(), DEFAULT_QUOTA_PATTERNS.len());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = "\
stream:
  repetition_threshold: 5
models:
  - name: gpt-4o
    max_input_tokens: 128000
    max_output_tokens: 16384
";
        let config = parse_config(yaml).expect("config");
        assert_eq!(config.stream.repetition_threshold, 5);
        assert!(config.stream.strict_finish_flush);
        assert_eq!(config.features.log_level, "INFO");
        assert_eq!(config.models.len(), 1);
    }

    #[test]
    fn test_model_limits_prefers_exact_then_longest_prefix() {
        let config = AdapterConfig {
            models: vec![
                ModelProfile {
                    name: "gpt-4".to_string(),
                    max_input_tokens: 8_000,
                    max_output_tokens: 1_000,
                },
                ModelProfile {
                    name: "gpt-4o".to_string(),
                    max_input_tokens: 128_000,
                    max_output_tokens: 16_000,
                },
            ],
            ..AdapterConfig::default()
        };
        assert_eq!(config.model_limits("gpt-4").max_input_tokens, 8_000);
        assert_eq!(config.model_limits("gpt-4o-mini").max_input_tokens, 128_000);
        assert_eq!(config.model_limits("gpt-4-turbo").max_input_tokens, 8_000);
        assert_eq!(config.model_limits("claude").max_input_tokens, 128_000);
        assert_eq!(config.model_limits("claude").max_output_tokens, 4_096);
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let err = parse_config("stream: [1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
