use crate::protocol::canonical::{ToolDefinition, Turn};

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`ceil(chars / chars_per_token)`) to avoid
/// loading model BPE tables. A zero ratio is treated as one.
#[must_use]
pub fn estimate_tokens(text: &str, chars_per_token: u64) -> u64 {
    let chars = u64::try_from(text.chars().count()).unwrap_or(u64::MAX);
    chars.div_ceil(chars_per_token.max(1))
}

/// Estimate a turn as the sum over its content parts.
#[must_use]
pub fn estimate_turn_tokens(turn: &Turn, chars_per_token: u64) -> u64 {
    let mut total: u64 = 0;
    for part in &turn.parts {
        part.for_each_text(|text| {
            total = total.saturating_add(estimate_tokens(text, chars_per_token));
        });
    }
    total
}

/// Estimate the serialized tool list. Serialization failure counts as zero.
#[must_use]
pub fn estimate_tools_tokens(tools: &[ToolDefinition], chars_per_token: u64) -> u64 {
    if tools.is_empty() {
        return 0;
    }
    match serde_json::to_string(tools) {
        Ok(serialized) => estimate_tokens(&serialized, chars_per_token),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{ContentPart, Role};
    use serde_json::json;

    #[test]
    fn test_rounds_up_per_character() {
        assert_eq!(estimate_tokens("", 4), 0);
        assert_eq!(estimate_tokens("abcd", 4), 1);
        assert_eq!(estimate_tokens("abcde", 4), 2);
        // Characters, not bytes.
        assert_eq!(estimate_tokens("ééééé", 4), 2);
        assert_eq!(estimate_tokens("abc", 0), 3);
    }

    #[test]
    fn test_turn_sums_parts() {
        let mut turn = Turn::text(Role::Assistant, "abcd");
        turn.parts.push(ContentPart::ToolCall {
            id: "call_1".to_string(),
            name: "find".to_string(),
            arguments: "{\"q\":1}".to_string(),
        });
        // "abcd" = 1, "find" = 1, "{\"q\":1}" (7 chars) = 2
        assert_eq!(estimate_turn_tokens(&turn, 4), 4);
    }

    #[test]
    fn test_tools_use_serialized_length() {
        let tools = vec![ToolDefinition {
            name: "f".to_string(),
            description: None,
            parameters: json!({}),
        }];
        let serialized = serde_json::to_string(&tools).unwrap();
        let expected = u64::try_from(serialized.len()).unwrap().div_ceil(4);
        assert_eq!(estimate_tools_tokens(&tools, 4), expected);
        assert_eq!(estimate_tools_tokens(&[], 4), 0);
    }
}
