use crate::config::ConfigError;

/// Error type shared by every stage of the adapter.
///
/// Malformed frames and cancellation are deliberately absent: both are
/// absorbed by the stream driver and never reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("incomplete tool call at finish: slot={key}, arguments={arguments:?}")]
    IncompleteToolCall { key: String, arguments: String },
    #[error("message exceeds token limit: {subject} needs {estimate} tokens, limit is {limit}")]
    TokenLimitExceeded {
        subject: &'static str,
        estimate: u64,
        limit: u64,
    },
}

/// Broad error category, used by callers that map failures onto host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    UpstreamProtocol,
    Budget,
}

impl AdapterError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            AdapterError::Config(_) => ErrorCategory::Configuration,
            AdapterError::IncompleteToolCall { .. } => ErrorCategory::UpstreamProtocol,
            AdapterError::TokenLimitExceeded { .. } => ErrorCategory::Budget,
        }
    }

    /// Whether the failure means the outbound message list cannot be sent as-is.
    #[must_use]
    pub fn is_token_limit(&self) -> bool {
        matches!(self, AdapterError::TokenLimitExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_limit_message_is_descriptive() {
        let err = AdapterError::TokenLimitExceeded {
            subject: "system turn",
            estimate: 12,
            limit: 10,
        };
        let text = err.to_string();
        assert!(text.starts_with("message exceeds token limit"));
        assert!(text.contains("system turn"));
        assert!(err.is_token_limit());
        assert_eq!(err.category(), ErrorCategory::Budget);
    }

    #[test]
    fn incomplete_tool_call_is_protocol_error() {
        let err = AdapterError::IncompleteToolCall {
            key: "index:0".to_string(),
            arguments: "{\"a\":".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::UpstreamProtocol);
        assert!(err.to_string().contains("index:0"));
    }
}
