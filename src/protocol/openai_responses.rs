use std::borrow::Cow;

use serde::Deserialize;
use serde_json::Value;

/// The subset of Responses API stream events this adapter acts on.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesStreamEvent {
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default)]
        delta: Option<String>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        chunk: Option<String>,
    },
    #[serde(rename = "response.output_item.delta")]
    OutputItemDelta { item: ResponsesItem },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: ResponsesItem },
    #[serde(rename = "response.completed")]
    Completed {},
    #[serde(other)]
    Other,
}

impl ResponsesStreamEvent {
    /// Decode a Responses frame; `None` when `type` is absent or the fields
    /// have the wrong JSON types.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        value.get("type")?.as_str()?;
        Self::deserialize(value).ok()
    }
}

/// An output item carried by `response.output_item.*` events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesItem {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<Value>,
}

impl ResponsesItem {
    #[must_use]
    pub fn is_function_call(&self) -> bool {
        self.kind.as_deref() == Some("function_call")
    }

    /// Buffer key for this item: `call_id`, falling back to the item `id`.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.call_id
            .as_deref()
            .or(self.id.as_deref())
            .filter(|key| !key.is_empty())
    }

    /// Arguments as JSON text. Some deployments send an object instead of a string.
    #[must_use]
    pub fn arguments_text(&self) -> Option<Cow<'_, str>> {
        match self.arguments.as_ref()? {
            Value::Null => None,
            Value::String(text) => Some(Cow::Borrowed(text.as_str())),
            other => Some(Cow::Owned(other.to_string())),
        }
    }
}
