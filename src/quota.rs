//! Quota redaction heuristic.
//!
//! When a recent turn carries a quota / rate-limit error that names one of
//! the offered tools, that tool is withheld from the next outbound request.

use std::borrow::Cow;

use regex_lite::Regex;
use tracing::warn;

use crate::config::QuotaConfig;
use crate::protocol::canonical::{ToolDefinition, Turn};

/// Compile one configured pattern. Matching is always case-insensitive.
///
/// # Errors
///
/// Returns the `regex-lite` error for an invalid pattern.
pub fn compile_quota_pattern(pattern: &str) -> Result<Regex, regex_lite::Error> {
    Regex::new(&format!("(?i){pattern}"))
}

/// Compiled quota patterns.
#[derive(Debug, Clone)]
pub struct QuotaMatcher {
    patterns: Vec<Regex>,
}

impl QuotaMatcher {
    /// Compile every pattern in `config`. Invalid patterns are skipped with a
    /// warning; `validate_config` rejects them up front.
    #[must_use]
    pub fn from_config(config: &QuotaConfig) -> Self {
        let patterns = config
            .patterns
            .iter()
            .filter_map(|pattern| match compile_quota_pattern(pattern) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    warn!(pattern = %pattern, error = %err, "skipping invalid quota pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.patterns.iter().any(|regex| regex.is_match(text))
    }
}

/// Result of a redaction pass.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaRedaction<'a> {
    /// Borrowed when nothing was removed.
    pub tools: Cow<'a, [ToolDefinition]>,
    /// Name of the removed tool, if any.
    pub removed: Option<String>,
}

impl QuotaRedaction<'_> {
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.removed.is_none()
    }
}

/// Scan the newest turns for a quota failure naming one of `tools` and drop
/// that single tool. History and tool list are only read.
#[must_use]
pub fn redact_quota_limited_tools<'a>(
    history: &[Turn],
    tools: &'a [ToolDefinition],
    config: &QuotaConfig,
) -> QuotaRedaction<'a> {
    let unchanged = QuotaRedaction {
        tools: Cow::Borrowed(tools),
        removed: None,
    };
    if config.disabled || tools.is_empty() || history.is_empty() {
        return unchanged;
    }

    let matcher = QuotaMatcher::from_config(config);
    for (age, turn) in history
        .iter()
        .rev()
        .take(config.max_turns_scanned)
        .enumerate()
    {
        let mut text = String::new();
        for part in &turn.parts {
            part.for_each_text(|fragment| {
                text.push_str(fragment);
                text.push('\n');
            });
        }
        if !matcher.is_match(&text) {
            continue;
        }
        let Some(position) = tools
            .iter()
            .position(|tool| contains_tool_token(&text, &tool.name))
        else {
            continue;
        };

        let mut remaining = tools.to_vec();
        let removed = remaining.remove(position);
        warn!(
            tool = %removed.name,
            turns_back = age,
            "tool withheld after quota failure in conversation"
        );
        return QuotaRedaction {
            tools: Cow::Owned(remaining),
            removed: Some(removed.name),
        };
    }
    unchanged
}

#[inline]
fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-'
}

/// `name` occurs in `text` as a whole token.
fn contains_tool_token(text: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let bytes = text.as_bytes();
    text.match_indices(name).any(|(start, matched)| {
        let end = start + matched.len();
        let before_ok = start == 0 || !is_name_byte(bytes[start - 1]);
        let after_ok = end == bytes.len() || !is_name_byte(bytes[end]);
        before_ok && after_ok
    })
}
