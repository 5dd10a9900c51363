//! Token budget trimmer for outbound conversations.
//!
//! Selects the newest suffix of turns that fits the budget, keeping the
//! system turn and a trailing acknowledgement pair intact.

pub mod estimate;

pub use estimate::{estimate_tokens, estimate_tools_tokens, estimate_turn_tokens};

use tracing::debug;

use crate::config::{BudgetConfig, ModelLimits};
use crate::error::AdapterError;
use crate::protocol::canonical::{Role, ToolDefinition, Turn};

/// Trim `turns` so the request fits the model's input ceiling after reserving
/// the output allowance and the tool definitions.
///
/// # Errors
///
/// Returns [`AdapterError::TokenLimitExceeded`] when the tool definitions
/// alone reach the ceiling, or when [`trim_to_budget`] fails.
pub fn trim_messages_to_fit_budget(
    turns: &[Turn],
    tools: &[ToolDefinition],
    limits: ModelLimits,
    config: &BudgetConfig,
) -> Result<Vec<Turn>, AdapterError> {
    let ceiling = limits.max_input_tokens;
    let tool_estimate = estimate_tools_tokens(tools, config.chars_per_token);
    if tool_estimate >= ceiling {
        return Err(AdapterError::TokenLimitExceeded {
            subject: "tool definitions",
            estimate: tool_estimate,
            limit: ceiling,
        });
    }
    let budget = ceiling
        .saturating_sub(limits.max_output_tokens)
        .saturating_sub(tool_estimate);
    trim_to_budget(turns, budget, config)
}

/// Keep the system turn plus the longest run of newest turns within `budget`.
///
/// A turn that does not fit stops the walk: older turns are never reached,
/// and no turn is ever partially included.
///
/// # Errors
///
/// Returns [`AdapterError::TokenLimitExceeded`] when the system turn alone
/// exceeds the budget, or when it leaves no room for any other turn.
pub fn trim_to_budget(
    turns: &[Turn],
    budget: u64,
    config: &BudgetConfig,
) -> Result<Vec<Turn>, AdapterError> {
    let ratio = config.chars_per_token;
    let (system, rest) = match turns.split_first() {
        Some((first, rest)) if first.role == Role::System => (Some(first), rest),
        _ => (None, turns),
    };

    let system_estimate = system.map_or(0, |turn| estimate_turn_tokens(turn, ratio));
    if system_estimate > budget {
        return Err(AdapterError::TokenLimitExceeded {
            subject: "system turn",
            estimate: system_estimate,
            limit: budget,
        });
    }
    let remaining = budget - system_estimate;

    let mut keep_from = rest.len();
    let mut used: u64 = 0;

    if ends_with_acknowledgement(rest, &config.acknowledgements) {
        let pair = &rest[rest.len() - 2..];
        used = pair
            .iter()
            .map(|turn| estimate_turn_tokens(turn, ratio))
            .fold(0, u64::saturating_add);
        keep_from = rest.len() - 2;
    }

    while keep_from > 0 {
        let cost = estimate_turn_tokens(&rest[keep_from - 1], ratio);
        if used.saturating_add(cost) > remaining {
            break;
        }
        used += cost;
        keep_from -= 1;
    }

    if keep_from == rest.len() && !rest.is_empty() {
        // Nothing fits: the newest turn still goes out alone.
        if system_estimate >= budget {
            let newest = estimate_turn_tokens(&rest[rest.len() - 1], ratio);
            return Err(AdapterError::TokenLimitExceeded {
                subject: "message",
                estimate: system_estimate.saturating_add(newest),
                limit: budget,
            });
        }
        keep_from = rest.len() - 1;
    }

    if keep_from > 0 {
        debug!(
            dropped = keep_from,
            kept = rest.len() - keep_from,
            budget,
            "trimmed conversation to token budget"
        );
    }

    let mut out = Vec::with_capacity(rest.len() - keep_from + usize::from(system.is_some()));
    out.extend(system.cloned());
    out.extend_from_slice(&rest[keep_from..]);
    Ok(out)
}

/// Last turn is a short user acknowledgement right after an assistant turn.
fn ends_with_acknowledgement(turns: &[Turn], acknowledgements: &[String]) -> bool {
    let [.., previous, last] = turns else {
        return false;
    };
    if previous.role != Role::Assistant || last.role != Role::User {
        return false;
    }
    let text = last.plain_text();
    let text = text.trim();
    acknowledgements
        .iter()
        .any(|ack| text.eq_ignore_ascii_case(ack.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn turn(role: Role, tokens: usize) -> Turn {
        Turn::text(role, "x".repeat(tokens * 4))
    }

    fn roles_and_sizes(turns: &[Turn]) -> Vec<(Role, u64)> {
        turns
            .iter()
            .map(|turn| (turn.role, estimate_turn_tokens(turn, 4)))
            .collect()
    }

    #[test]
    fn test_old_turn_dropped_never_partial() {
        let turns = vec![
            turn(Role::System, 4),
            turn(Role::User, 14),
            turn(Role::User, 3),
        ];
        let trimmed = trim_to_budget(&turns, 10, &BudgetConfig::default()).unwrap();
        assert_eq!(trimmed, vec![turns[0].clone(), turns[2].clone()]);
    }

    #[test]
    fn test_walk_stops_at_first_turn_that_does_not_fit() {
        let turns = vec![
            turn(Role::User, 1),
            turn(Role::Assistant, 9),
            turn(Role::User, 2),
        ];
        let trimmed = trim_to_budget(&turns, 5, &BudgetConfig::default()).unwrap();
        assert_eq!(roles_and_sizes(&trimmed), vec![(Role::User, 2)]);
    }

    #[test]
    fn test_everything_fits_is_unchanged() {
        let turns = vec![
            turn(Role::System, 1),
            turn(Role::User, 1),
            turn(Role::Assistant, 1),
        ];
        let trimmed = trim_to_budget(&turns, 100, &BudgetConfig::default()).unwrap();
        assert_eq!(trimmed, turns);
    }

    #[test]
    fn test_acknowledgement_pair_is_atomic() {
        let turns = vec![
            turn(Role::System, 2),
            turn(Role::User, 1),
            turn(Role::Assistant, 20),
            Turn::text(Role::User, "  Continue "),
        ];
        let trimmed = trim_to_budget(&turns, 10, &BudgetConfig::default()).unwrap();
        assert_eq!(trimmed.len(), 3);
        assert_eq!(trimmed[0].role, Role::System);
        assert_eq!(trimmed[1], turns[2]);
        assert_eq!(trimmed[2], turns[3]);
    }

    #[test]
    fn test_acknowledgement_without_assistant_is_not_protected() {
        let turns = vec![turn(Role::User, 20), Turn::text(Role::User, "continue")];
        let trimmed = trim_to_budget(&turns, 10, &BudgetConfig::default()).unwrap();
        assert_eq!(trimmed, vec![turns[1].clone()]);
    }

    #[test]
    fn test_oversized_only_turn_is_returned_alone() {
        let turns = vec![turn(Role::System, 2), turn(Role::User, 50)];
        let trimmed = trim_to_budget(&turns, 10, &BudgetConfig::default()).unwrap();
        assert_eq!(trimmed, turns);
    }

    #[test]
    fn test_system_turn_over_budget_fails() {
        let turns = vec![turn(Role::System, 11), turn(Role::User, 1)];
        let err = trim_to_budget(&turns, 10, &BudgetConfig::default()).unwrap_err();
        assert!(err.is_token_limit());
        assert!(err.to_string().starts_with("message exceeds token limit"));
    }

    #[test]
    fn test_system_turn_filling_budget_with_oversized_turn_fails() {
        let turns = vec![turn(Role::System, 10), turn(Role::User, 1)];
        assert!(trim_to_budget(&turns, 10, &BudgetConfig::default()).is_err());
        assert_eq!(
            trim_to_budget(&turns[..1], 10, &BudgetConfig::default()).unwrap(),
            turns[..1].to_vec()
        );
    }

    #[test]
    fn test_tool_definitions_over_ceiling_fail() {
        let tools = vec![ToolDefinition {
            name: "big".to_string(),
            description: Some("y".repeat(400)),
            parameters: json!({"type": "object"}),
        }];
        let limits = ModelLimits {
            max_input_tokens: 50,
            max_output_tokens: 10,
        };
        let err = trim_messages_to_fit_budget(
            &[turn(Role::User, 1)],
            &tools,
            limits,
            &BudgetConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::TokenLimitExceeded { subject: "tool definitions", .. }
        ));
    }

    #[test]
    fn test_budget_reserves_output_and_tools() {
        let tools = vec![ToolDefinition {
            name: "t".to_string(),
            description: None,
            parameters: json!({}),
        }];
        let tool_tokens = estimate_tools_tokens(&tools, 4);
        let limits = ModelLimits {
            max_input_tokens: 100 + tool_tokens,
            max_output_tokens: 90,
        };
        // Budget is 10: the 6-token turn fits, the 5-token one before it does not.
        let turns = vec![turn(Role::User, 5), turn(Role::User, 6)];
        let trimmed =
            trim_messages_to_fit_budget(&turns, &tools, limits, &BudgetConfig::default()).unwrap();
        assert_eq!(trimmed, vec![turns[1].clone()]);
    }
}
