use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One event handed to the host sink. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmittedPart {
    Text {
        value: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// Argument object as JSON text, exactly as the upstream produced it.
        arguments: String,
    },
    Finish {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl EmittedPart {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        EmittedPart::Text {
            value: value.into(),
        }
    }

    #[must_use]
    pub fn is_tool_call(&self) -> bool {
        matches!(self, EmittedPart::ToolCall { .. })
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single part of a turn's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    ToolResult {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        content: String,
    },
}

impl ContentPart {
    /// Visit every text fragment this part carries.
    pub fn for_each_text<'a>(&'a self, mut visit: impl FnMut(&'a str)) {
        match self {
            ContentPart::Text { text } => visit(text),
            ContentPart::ToolCall {
                name, arguments, ..
            } => {
                visit(name);
                visit(arguments);
            }
            ContentPart::ToolResult { name, content, .. } => {
                if let Some(name) = name {
                    visit(name);
                }
                visit(content);
            }
        }
    }
}

/// One conversation turn, owned by the host and only read here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: SmallVec<[ContentPart; 1]>,
}

impl Turn {
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        let mut parts = SmallVec::new();
        parts.push(ContentPart::Text { text: text.into() });
        Self { role, parts }
    }

    /// Concatenation of the plain text parts only.
    #[must_use]
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// A tool the host offers to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}
