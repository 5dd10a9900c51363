use std::collections::HashSet;

use super::{AdapterConfig, ConfigError};
use crate::quota::compile_quota_pattern;

/// Validate the full adapter config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AdapterConfig) -> Result<(), ConfigError> {
    validate_log_level(config)?;
    validate_stream_config(config)?;
    validate_budget_config(config)?;
    validate_quota_config(config)?;
    validate_models(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_log_level(config: &AdapterConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_stream_config(config: &AdapterConfig) -> Result<(), ConfigError> {
    let stream = &config.stream;
    if stream.repetition_threshold == 0 {
        return Err(validation_err(
            "stream.repetition_threshold must be greater than 0",
        ));
    }
    if stream.inactivity_timeout_ms == Some(0) {
        return Err(validation_err(
            "stream.inactivity_timeout_ms must be greater than 0 when set",
        ));
    }
    Ok(())
}

fn validate_budget_config(config: &AdapterConfig) -> Result<(), ConfigError> {
    let budget = &config.budget;
    if budget.chars_per_token == 0 {
        return Err(validation_err("budget.chars_per_token must be greater than 0"));
    }
    if budget.acknowledgements.is_empty() {
        return Err(validation_err("budget.acknowledgements cannot be empty"));
    }
    if budget
        .acknowledgements
        .iter()
        .any(|ack| ack.trim().is_empty())
    {
        return Err(validation_err(
            "budget.acknowledgements contains an empty entry",
        ));
    }
    if budget.default_max_output_tokens >= budget.default_max_input_tokens {
        return Err(validation_err(
            "budget.default_max_output_tokens must be smaller than budget.default_max_input_tokens",
        ));
    }
    Ok(())
}

fn validate_quota_config(config: &AdapterConfig) -> Result<(), ConfigError> {
    let quota = &config.quota;
    if quota.max_turns_scanned == 0 {
        return Err(validation_err("quota.max_turns_scanned must be greater than 0"));
    }
    for pattern in &quota.patterns {
        if pattern.trim().is_empty() {
            return Err(validation_err("quota.patterns contains an empty pattern"));
        }
        compile_quota_pattern(pattern).map_err(|err| {
            validation_err(format!("quota pattern '{pattern}' does not compile: {err}"))
        })?;
    }
    Ok(())
}

fn validate_models(config: &AdapterConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for model in &config.models {
        if model.name.trim().is_empty() {
            return Err(validation_err("model name cannot be empty"));
        }
        if !seen.insert(model.name.as_str()) {
            return Err(validation_err(format!(
                "duplicate model entry '{}'",
                model.name
            )));
        }
        if model.max_input_tokens == 0 {
            return Err(validation_err(format!(
                "Model '{}': max_input_tokens must be greater than 0",
                model.name
            )));
        }
        if model.max_output_tokens >= model.max_input_tokens {
            return Err(validation_err(format!(
                "Model '{}': max_output_tokens must be smaller than max_input_tokens",
                model.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn make_valid_config() -> AdapterConfig {
        AdapterConfig {
            models: vec![ModelProfile {
                name: "gpt-4o".to_string(),
                max_input_tokens: 128_000,
                max_output_tokens: 16_384,
            }],
            ..AdapterConfig::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "VERBOSE".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_log_level_is_case_insensitive() {
        let mut config = make_valid_config();
        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_repetition_threshold() {
        let mut config = make_valid_config();
        config.stream.repetition_threshold = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_inactivity_timeout() {
        let mut config = make_valid_config();
        config.stream.inactivity_timeout_ms = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_chars_per_token() {
        let mut config = make_valid_config();
        config.budget.chars_per_token = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_blank_acknowledgement() {
        let mut config = make_valid_config();
        config.budget.acknowledgements = vec!["  ".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_uncompilable_quota_pattern() {
        let mut config = make_valid_config();
        config.quota.patterns.push("(unclosed".to_string());
        let msg = validate_config(&config).unwrap_err().to_string();
        assert!(msg.contains("does not compile"));
    }

    #[test]
    fn test_duplicate_model() {
        let mut config = make_valid_config();
        config.models.push(config.models[0].clone());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_output_ceiling_must_fit_input_ceiling() {
        let mut config = make_valid_config();
        config.models[0].max_output_tokens = 128_000;
        assert!(validate_config(&config).is_err());
    }
}
