use serde_json::{json, Value};
use tracing::debug;

use super::state::StreamingState;
use super::tool_calls::{Keyspace, SlotKey, SlotUpdate};
use crate::config::StreamConfig;
use crate::error::AdapterError;
use crate::protocol::canonical::EmittedPart;
use crate::protocol::openai_chat::{first_stream_choice, OpenAiStreamChoice};
use crate::protocol::openai_responses::{ResponsesItem, ResponsesStreamEvent};

// Event interpreter.
//
// Turns one parsed upstream JSON value into zero or more emitted parts. Every
// value is tested against every shape family: a single deployment may mix
// chat-completions chunks and Responses events in one stream.
//
// Key invariants:
// - All visible text passes through the inline parser (when enabled) and then
//   the repetition guard, regardless of which shape carried it.
// - At most one `Finish` part per stream.
// - Only a `stop`/`tool_calls` finish under `strict_finish_flush` may fail.

const FINISH_STOP: &str = "stop";
const FINISH_TOOL_CALLS: &str = "tool_calls";

/// Interpret one upstream value, appending emitted parts to `out`.
///
/// # Errors
///
/// Returns [`AdapterError::IncompleteToolCall`] when a `stop`/`tool_calls`
/// finish forces a flush and a buffered call's arguments do not parse.
pub fn interpret_value_into(
    value: &Value,
    state: &mut StreamingState,
    config: &StreamConfig,
    out: &mut Vec<EmittedPart>,
) -> Result<(), AdapterError> {
    state.frames += 1;

    if let Some(choice) = first_stream_choice(value) {
        interpret_chat_choice(choice, state, config, out)?;
    } else if value.get("choices").is_none() {
        if let Some(text) = fallback_text(value) {
            // Normalise into the chat shape so text takes a single path.
            let synthetic = json!({"choices": [{"delta": {"content": text}}]});
            if let Some(choice) = first_stream_choice(&synthetic) {
                interpret_chat_choice(choice, state, config, out)?;
            }
        }
    }

    if let Some(event) = ResponsesStreamEvent::from_value(value) {
        interpret_responses_event(event, state, config, out);
    }
    Ok(())
}

/// End-of-stream finalisation: force-flush the inline parser, leniently flush
/// buffered calls of both families, and emit the trailing `Finish` if none was
/// emitted yet.
pub fn finish_stream_into(state: &mut StreamingState, config: &StreamConfig, out: &mut Vec<EmittedPart>) {
    drain_inline(state, config, out);
    let parts = state.tool_calls.flush_lenient(None);
    push_tool_calls(parts, state, out);
    let reason = state.finish_reason.clone();
    emit_finish(reason, state, out);
}

// ---------------------------------------------------------------------------
// Chat-completions shape
// ---------------------------------------------------------------------------

fn interpret_chat_choice(
    choice: OpenAiStreamChoice,
    state: &mut StreamingState,
    config: &StreamConfig,
    out: &mut Vec<EmittedPart>,
) -> Result<(), AdapterError> {
    if let Some(delta) = choice.delta {
        if let Some(content) = delta.content.as_deref() {
            emit_text(content, state, config, out);
        }
        for call in delta.tool_calls.unwrap_or_default() {
            let function = call.function.unwrap_or_default();
            let key = SlotKey::Index(call.index.unwrap_or(0));
            let update = SlotUpdate {
                id: call.id.as_deref(),
                name: function.name.as_deref(),
                args: function.arguments.as_deref(),
            };
            if let Some(part) = state.tool_calls.apply(key, update) {
                push_tool_call(part, state, out);
            }
        }
    }

    let Some(reason) = choice.finish_reason else {
        return Ok(());
    };
    state.finish_reason = Some(reason.clone());
    if reason == FINISH_STOP || reason == FINISH_TOOL_CALLS {
        drain_inline(state, config, out);
        // Only chat-family slots: a half-streamed Responses call is not
        // claimed complete by a chat finish.
        let parts = if config.strict_finish_flush {
            state.tool_calls.flush_forced(Keyspace::Index)?
        } else {
            state.tool_calls.flush_lenient(Some(Keyspace::Index))
        };
        push_tool_calls(parts, state, out);
        emit_finish(Some(reason), state, out);
    }
    Ok(())
}

/// Text from `output[0].content[]` (`output_text` parts) or a bare
/// `content`/`text` string on an untyped value.
fn fallback_text(value: &Value) -> Option<String> {
    if let Some(parts) = value
        .get("output")
        .and_then(Value::as_array)
        .and_then(|output| output.first())
        .and_then(|item| item.get("content"))
        .and_then(Value::as_array)
    {
        let text: String = parts
            .iter()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect();
        if !text.is_empty() {
            return Some(text);
        }
    }
    if value.get("type").is_some() {
        return None;
    }
    value
        .get("content")
        .and_then(Value::as_str)
        .or_else(|| value.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Responses shape
// ---------------------------------------------------------------------------

fn interpret_responses_event(
    event: ResponsesStreamEvent,
    state: &mut StreamingState,
    config: &StreamConfig,
    out: &mut Vec<EmittedPart>,
) {
    match event {
        ResponsesStreamEvent::OutputTextDelta { delta, text, chunk } => {
            if let Some(text) = delta.or(text).or(chunk) {
                emit_text(&text, state, config, out);
            }
        }
        ResponsesStreamEvent::OutputItemDelta { item } if item.is_function_call() => {
            let Some(key) = item_slot(&item) else {
                debug!("function_call delta without call_id ignored");
                return;
            };
            let args = item.arguments_text();
            let update = SlotUpdate {
                id: item.call_id.as_deref(),
                name: item.name.as_deref(),
                args: args.as_deref(),
            };
            if let Some(part) = state.tool_calls.apply(key, update) {
                push_tool_call(part, state, out);
            }
        }
        ResponsesStreamEvent::OutputItemDone { item } if item.is_function_call() => {
            let Some(key) = item_slot(&item) else {
                debug!("function_call done without call_id ignored");
                return;
            };
            let args = item.arguments_text();
            let update = SlotUpdate {
                id: item.call_id.as_deref(),
                name: item.name.as_deref(),
                args: args.as_deref(),
            };
            if let Some(part) = state.tool_calls.complete(key, update) {
                push_tool_call(part, state, out);
            }
        }
        ResponsesStreamEvent::Completed {} => {
            drain_inline(state, config, out);
            let parts = state.tool_calls.flush_lenient(Some(Keyspace::CallId));
            push_tool_calls(parts, state, out);
            let reason = if state.tool_calls_emitted > 0 {
                FINISH_TOOL_CALLS
            } else {
                FINISH_STOP
            };
            state.finish_reason = Some(reason.to_string());
            emit_finish(Some(reason.to_string()), state, out);
        }
        ResponsesStreamEvent::OutputItemDelta { .. }
        | ResponsesStreamEvent::OutputItemDone { .. }
        | ResponsesStreamEvent::Other => {}
    }
}

fn item_slot(item: &ResponsesItem) -> Option<SlotKey> {
    item.key().map(|key| SlotKey::CallId(key.to_string()))
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

fn emit_text(
    text: &str,
    state: &mut StreamingState,
    config: &StreamConfig,
    out: &mut Vec<EmittedPart>,
) {
    if text.is_empty() {
        return;
    }
    if config.inline_tool_calls {
        let mut parsed = Vec::new();
        state.inline.feed(text, &mut parsed);
        route_parsed(parsed, state, config, out);
    } else if state.repetition.admit(text, config.repetition_threshold) {
        out.push(EmittedPart::text(text));
    }
}

fn drain_inline(state: &mut StreamingState, config: &StreamConfig, out: &mut Vec<EmittedPart>) {
    if !config.inline_tool_calls {
        return;
    }
    let mut parsed = Vec::new();
    state.inline.finish(&mut parsed);
    route_parsed(parsed, state, config, out);
}

fn route_parsed(
    parsed: Vec<EmittedPart>,
    state: &mut StreamingState,
    config: &StreamConfig,
    out: &mut Vec<EmittedPart>,
) {
    for part in parsed {
        match part {
            EmittedPart::Text { value } => {
                if state.repetition.admit(&value, config.repetition_threshold) {
                    out.push(EmittedPart::Text { value });
                }
            }
            other => push_tool_call(other, state, out),
        }
    }
}

fn push_tool_calls(parts: Vec<EmittedPart>, state: &mut StreamingState, out: &mut Vec<EmittedPart>) {
    for part in parts {
        push_tool_call(part, state, out);
    }
}

fn push_tool_call(part: EmittedPart, state: &mut StreamingState, out: &mut Vec<EmittedPart>) {
    if part.is_tool_call() {
        state.tool_calls_emitted += 1;
    }
    out.push(part);
}

fn emit_finish(reason: Option<String>, state: &mut StreamingState, out: &mut Vec<EmittedPart>) {
    if state.finished {
        debug!(?reason, "duplicate finish suppressed");
        return;
    }
    state.finished = true;
    out.push(EmittedPart::Finish { reason });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
