use serde::Deserialize;
use serde_json::Value;

/// A choice within a chat-completions stream chunk.
///
/// Every field is optional: upstreams omit, null out, or reorder them freely.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiStreamChoice {
    #[serde(default)]
    pub delta: Option<OpenAiDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Delta content within a stream choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

/// A tool call delta in streaming.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiStreamToolCall {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<OpenAiStreamToolCallFunction>,
}

/// Function delta within a streaming tool call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiStreamToolCallFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Decode `choices[0]` of a chat-completions chunk.
///
/// Returns `None` when the value has no first choice or the choice does not
/// have the chat-completions shape.
#[must_use]
pub fn first_stream_choice(value: &Value) -> Option<OpenAiStreamChoice> {
    let choice = value.get("choices")?.as_array()?.first()?;
    OpenAiStreamChoice::deserialize(choice).ok()
}
