use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::error::AdapterError;
use crate::protocol::canonical::EmittedPart;
use crate::util::{is_json_object, next_call_id};

// Keyed accumulator for structured (JSON-field) tool calls.
//
// Per-slot lifecycle: Empty -> Accumulating -> Emittable -> Emitted.
// - Emittable is checked after every mutation, so a call whose arguments
//   complete mid-stream is emitted without waiting for a finish signal.
// - Emitted is terminal: later fragments for the same key are ignored.
// - Index keys (chat-completions) and call-id keys (responses) live in
//   separate keyspaces and are never merged.

/// Identifies one tool-call buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKey {
    Index(u32),
    CallId(String),
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Index(index) => write!(f, "index:{index}"),
            SlotKey::CallId(id) => write!(f, "call:{id}"),
        }
    }
}

/// Observable phase of a slot. `Emittable` is transient and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Empty,
    Accumulating,
    Emitted,
}

/// Buffered state of one in-flight call. `args` is append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallBuffer {
    pub id: Option<String>,
    pub name: Option<String>,
    pub args: String,
}

impl ToolCallBuffer {
    #[must_use]
    pub fn is_emittable(&self) -> bool {
        self.name.is_some() && is_json_object(&self.args)
    }
}

/// One incremental fragment for a slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotUpdate<'a> {
    pub id: Option<&'a str>,
    pub name: Option<&'a str>,
    pub args: Option<&'a str>,
}

/// Which upstream family a slot key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyspace {
    /// Chat-completions `tool_calls[].index`.
    Index,
    /// Responses `call_id`.
    CallId,
}

impl SlotKey {
    #[must_use]
    pub fn keyspace(&self) -> Keyspace {
        match self {
            SlotKey::Index(_) => Keyspace::Index,
            SlotKey::CallId(_) => Keyspace::CallId,
        }
    }
}

enum Settled {
    Call(EmittedPart),
    Nameless,
    Unparsable(String),
}

/// Keyed accumulator that assembles fragmented function calls.
#[derive(Debug, Default)]
pub struct ToolCallReconstructor {
    slots: BTreeMap<SlotKey, ToolCallBuffer>,
    flushed: FxHashSet<SlotKey>,
}

impl ToolCallReconstructor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self, key: &SlotKey) -> SlotPhase {
        if self.flushed.contains(key) {
            SlotPhase::Emitted
        } else if self.slots.contains_key(key) {
            SlotPhase::Accumulating
        } else {
            SlotPhase::Empty
        }
    }

    /// Number of slots still accumulating.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn buffer(&self, key: &SlotKey) -> Option<&ToolCallBuffer> {
        self.slots.get(key)
    }

    /// Apply one fragment: create the slot if absent, overwrite `id`/`name`
    /// when provided, append `args`. Returns the call once it became emittable.
    pub fn apply(&mut self, key: SlotKey, update: SlotUpdate<'_>) -> Option<EmittedPart> {
        if self.flushed.contains(&key) {
            debug!(slot = %key, "fragment for already emitted tool call ignored");
            return None;
        }
        let buffer = self.slots.entry(key.clone()).or_default();
        if let Some(id) = update.id.filter(|id| !id.is_empty()) {
            buffer.id = Some(id.to_string());
        }
        if let Some(name) = update.name.filter(|name| !name.is_empty()) {
            buffer.name = Some(name.to_string());
        }
        if let Some(args) = update.args {
            buffer.args.push_str(args);
        }
        if buffer.is_emittable() {
            return self.emit(key);
        }
        None
    }

    /// Handle an authoritative "call finished" record carrying the full
    /// arguments. Missing fields fall back to what the slot buffered.
    /// Emits only when the resulting arguments form a JSON object.
    pub fn complete(&mut self, key: SlotKey, update: SlotUpdate<'_>) -> Option<EmittedPart> {
        if self.flushed.contains(&key) {
            return None;
        }
        let buffered = self.slots.get(&key);
        let name = update
            .name
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| buffered.and_then(|buffer| buffer.name.clone()))?;
        let id = update
            .id
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| buffered.and_then(|buffer| buffer.id.clone()));
        let args = match update.args {
            Some(args) => args.to_string(),
            None => buffered.map(|buffer| buffer.args.clone()).unwrap_or_default(),
        };
        if !is_json_object(&args) {
            debug!(slot = %key, "completed tool call has unparsable arguments; not emitted");
            return None;
        }
        self.slots.insert(
            key.clone(),
            ToolCallBuffer {
                id,
                name: Some(name),
                args,
            },
        );
        self.emit(key)
    }

    /// Drain the pending slots of one keyspace in key order. Used when the
    /// upstream claimed completion, so an unparsable buffer is fatal.
    ///
    /// Empty argument text counts as `{}`. Slots without a name are dropped.
    /// Slots of the other keyspace are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::IncompleteToolCall`] when a named slot's
    /// arguments do not parse as a JSON object.
    pub fn flush_forced(&mut self, keyspace: Keyspace) -> Result<Vec<EmittedPart>, AdapterError> {
        let mut out = Vec::new();
        for (key, buffer) in self.take_slots(Some(keyspace)) {
            match settle(&key, buffer) {
                Settled::Call(part) => out.push(part),
                Settled::Nameless => {}
                Settled::Unparsable(arguments) => {
                    return Err(AdapterError::IncompleteToolCall {
                        key: key.to_string(),
                        arguments,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Drain pending slots (one keyspace, or all with `None`) in key order,
    /// dropping buffers whose arguments do not parse.
    pub fn flush_lenient(&mut self, keyspace: Option<Keyspace>) -> Vec<EmittedPart> {
        self.take_slots(keyspace)
            .into_iter()
            .filter_map(|(key, buffer)| match settle(&key, buffer) {
                Settled::Call(part) => Some(part),
                Settled::Nameless => None,
                Settled::Unparsable(_) => {
                    debug!(slot = %key, "dropping tool call with unparsable arguments");
                    None
                }
            })
            .collect()
    }

    fn take_slots(&mut self, keyspace: Option<Keyspace>) -> BTreeMap<SlotKey, ToolCallBuffer> {
        let slots = std::mem::take(&mut self.slots);
        let (taken, kept): (BTreeMap<_, _>, BTreeMap<_, _>) = slots
            .into_iter()
            .partition(|(key, _)| keyspace.map_or(true, |space| key.keyspace() == space));
        self.slots = kept;
        self.flushed.extend(taken.keys().cloned());
        taken
    }

    fn emit(&mut self, key: SlotKey) -> Option<EmittedPart> {
        let buffer = self.slots.remove(&key)?;
        let name = buffer.name?;
        self.flushed.insert(key.clone());
        Some(EmittedPart::ToolCall {
            id: resolve_id(&key, buffer.id),
            name,
            arguments: buffer.args,
        })
    }
}

fn settle(key: &SlotKey, mut buffer: ToolCallBuffer) -> Settled {
    if buffer.args.trim().is_empty() {
        buffer.args = "{}".to_string();
    }
    let Some(name) = buffer.name.take() else {
        debug!(slot = %key, "dropping tool call buffer without a name");
        return Settled::Nameless;
    };
    if !is_json_object(&buffer.args) {
        return Settled::Unparsable(buffer.args);
    }
    Settled::Call(EmittedPart::ToolCall {
        id: resolve_id(key, buffer.id),
        name,
        arguments: buffer.args,
    })
}

fn resolve_id(key: &SlotKey, id: Option<String>) -> String {
    match (id, key) {
        (Some(id), _) => id,
        (None, SlotKey::CallId(call_id)) => call_id.clone(),
        (None, SlotKey::Index(_)) => next_call_id(),
    }
}
