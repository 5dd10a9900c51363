use memchr::{memchr, memmem};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::protocol::canonical::EmittedPart;
use crate::util::{canonical_json, next_call_id, parse_json_object};

// Inline tool-call markup parser.
//
// Some backends encode tool calls as control tokens inside plain text:
//
//   <|tool_call_begin|>name[:index]<|tool_call_argument_begin|>{...}<|tool_call_end|>
//
// The parser is an explicit state machine with one transition function per
// state. Input is appended to `carry`; each transition consumes a prefix of
// it and either continues or waits for more input.
//
// Key invariants:
// - Control tokens never reach visible output, including stray
//   `<|*_section_begin|>` / `<|*_section_end|>` markers.
// - A token split across chunks is held back, never leaked.
// - Visible text preceding a call is reported before the call.
// - A call key (`name:index`, or `name:canonicalJSON` without an index) is
//   emitted at most once per stream.

pub const TOOL_CALL_BEGIN: &str = "<|tool_call_begin|>";
pub const TOOL_CALL_ARGUMENT_BEGIN: &str = "<|tool_call_argument_begin|>";
pub const TOOL_CALL_END: &str = "<|tool_call_end|>";

const TOKEN_OPEN: &str = "<|";
const SECTION_BEGIN_SUFFIX: &str = "_section_begin|>";
const SECTION_END_SUFFIX: &str = "_section_end|>";
const FUNCTIONS_PREFIX: &str = "functions.";
/// Longest partial `<|name` run held back before it is treated as text.
const MAX_PENDING_TOKEN: usize = 64;
/// Header bytes tolerated before giving up on a `BEGIN` without `ARG`/`END`.
const MAX_HEADER_LEN: usize = 4 * 1024;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// State of the inline parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InlineState {
    /// Copying text to visible output and stripping bare control tokens.
    #[default]
    Scanning,
    /// Seen `BEGIN`, looking for `ARG` or `END`.
    HeaderPending,
    /// Seen `ARG`, collecting argument text until `END`.
    ArgAccumulating,
}

enum Step {
    Continue,
    Wait,
}

enum TokenScan {
    Complete(usize),
    Partial,
    NotToken,
}

#[derive(Debug)]
struct ActiveCall {
    name: String,
    index: Option<u32>,
    args: String,
    emitted: bool,
}

/// Streaming parser for inline tool-call markup.
#[derive(Debug, Default)]
pub struct InlineToolCallParser {
    state: InlineState,
    carry: String,
    visible: String,
    /// `None` while inside an argument span whose header was unusable.
    active: Option<ActiveCall>,
    emitted_keys: FxHashSet<String>,
}

impl InlineToolCallParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> InlineState {
        self.state
    }

    /// Bytes held back for the next chunk.
    #[must_use]
    pub fn carried(&self) -> &str {
        &self.carry
    }

    // -- public API ---------------------------------------------------------

    /// Feed one text delta. Visible text and completed calls are appended to
    /// `out` in stream order.
    pub fn feed(&mut self, text: &str, out: &mut Vec<EmittedPart>) {
        if text.is_empty() {
            return;
        }
        if self.state == InlineState::Scanning
            && self.carry.is_empty()
            && memchr(b'<', text.as_bytes()).is_none()
        {
            out.push(EmittedPart::text(text));
            return;
        }

        self.carry.push_str(text);
        loop {
            let step = match self.state {
                InlineState::Scanning => self.step_scanning(),
                InlineState::HeaderPending => self.step_header(out),
                InlineState::ArgAccumulating => self.step_arguments(out),
            };
            if matches!(step, Step::Wait) {
                break;
            }
        }
        self.flush_visible(out);
    }

    /// End of stream: force-flush an open argument span (emitted only if it
    /// parses), drop a dangling header or partial token, release other text.
    pub fn finish(&mut self, out: &mut Vec<EmittedPart>) {
        let rest = std::mem::take(&mut self.carry);
        match self.state {
            InlineState::ArgAccumulating => {
                if let Some(mut call) = self.active.take() {
                    if !call.emitted {
                        call.args.push_str(&rest);
                        self.finalize_call(call, out);
                    }
                }
            }
            InlineState::HeaderPending => {
                debug!(header_len = rest.len(), "unterminated inline tool call header dropped");
            }
            InlineState::Scanning => {
                if is_partial_known_token(&rest) {
                    debug!(partial = %rest, "dangling control token prefix dropped");
                } else {
                    self.visible.push_str(&rest);
                }
            }
        }
        self.state = InlineState::Scanning;
        self.active = None;
        self.flush_visible(out);
    }

    // -- Scanning state -----------------------------------------------------

    fn step_scanning(&mut self) -> Step {
        let Some(at) = memmem::find(self.carry.as_bytes(), TOKEN_OPEN.as_bytes()) else {
            // A trailing '<' may open a token in the next chunk.
            let keep = usize::from(self.carry.ends_with('<'));
            let split = self.carry.len() - keep;
            self.visible.push_str(&self.carry[..split]);
            self.carry.drain(..split);
            return Step::Wait;
        };
        self.visible.push_str(&self.carry[..at]);
        self.carry.drain(..at);

        match scan_control_token(&self.carry) {
            TokenScan::Complete(len) => {
                let token: String = self.carry.drain(..len).collect();
                self.on_control_token(&token);
            }
            TokenScan::Partial if self.carry.len() <= MAX_PENDING_TOKEN => {
                debug!(held = self.carry.len(), "holding partial control token");
                return Step::Wait;
            }
            TokenScan::Partial | TokenScan::NotToken => {
                self.visible.push_str(TOKEN_OPEN);
                self.carry.drain(..TOKEN_OPEN.len());
            }
        }
        Step::Continue
    }

    fn on_control_token(&mut self, token: &str) {
        if token == TOOL_CALL_BEGIN {
            self.state = InlineState::HeaderPending;
        } else if token == TOOL_CALL_ARGUMENT_BEGIN
            || token == TOOL_CALL_END
            || token.ends_with(SECTION_BEGIN_SUFFIX)
            || token.ends_with(SECTION_END_SUFFIX)
        {
            debug!(token, "stripped stray control token");
        } else {
            self.visible.push_str(token);
        }
    }

    // -- HeaderPending state ------------------------------------------------

    fn step_header(&mut self, out: &mut Vec<EmittedPart>) -> Step {
        let bytes = self.carry.as_bytes();
        let arg_at = memmem::find(bytes, TOOL_CALL_ARGUMENT_BEGIN.as_bytes());
        let end_at = memmem::find(bytes, TOOL_CALL_END.as_bytes());

        match (arg_at, end_at) {
            (Some(arg), end) if end.map_or(true, |end| arg < end) => {
                let header: String = self.carry.drain(..arg).collect();
                self.carry.drain(..TOOL_CALL_ARGUMENT_BEGIN.len());
                self.active = parse_header(&header).map(|(name, index)| ActiveCall {
                    name,
                    index,
                    args: String::new(),
                    emitted: false,
                });
                if self.active.is_none() {
                    debug!(header = %header, "inline tool call header has no name; skipping arguments");
                }
                self.state = InlineState::ArgAccumulating;
                Step::Continue
            }
            (_, Some(end)) => {
                let header: String = self.carry.drain(..end).collect();
                self.carry.drain(..TOOL_CALL_END.len());
                self.state = InlineState::Scanning;
                // `END` without `ARG`: arguments may be inlined after the name.
                let (head, args) = match header.find('{') {
                    Some(brace) => (&header[..brace], &header[brace..]),
                    None => (header.as_str(), ""),
                };
                match parse_header(head) {
                    Some((name, index)) => self.finalize_call(
                        ActiveCall {
                            name,
                            index,
                            args: args.to_string(),
                            emitted: false,
                        },
                        out,
                    ),
                    None => debug!(header = %header, "inline tool call header has no name; dropped"),
                }
                Step::Continue
            }
            (None, None) if self.carry.len() > MAX_HEADER_LEN => {
                debug!(
                    header_len = self.carry.len(),
                    "inline tool call header too long; treating as text"
                );
                let text = std::mem::take(&mut self.carry);
                self.visible.push_str(&text);
                self.state = InlineState::Scanning;
                Step::Continue
            }
            _ => Step::Wait,
        }
    }

    // -- ArgAccumulating state ----------------------------------------------

    fn step_arguments(&mut self, out: &mut Vec<EmittedPart>) -> Step {
        if let Some(end) = memmem::find(self.carry.as_bytes(), TOOL_CALL_END.as_bytes()) {
            let body: String = self.carry.drain(..end).collect();
            self.carry.drain(..TOOL_CALL_END.len());
            self.state = InlineState::Scanning;
            if let Some(mut call) = self.active.take() {
                if !call.emitted {
                    call.args.push_str(&body);
                    self.finalize_call(call, out);
                }
            }
            return Step::Continue;
        }

        let hold = partial_suffix_len(&self.carry, TOOL_CALL_END);
        let take = self.carry.len() - hold;
        let body: String = self.carry.drain(..take).collect();
        let ready = match self.active.as_mut() {
            Some(call) if !call.emitted => {
                call.args.push_str(&body);
                match parse_json_object(&call.args) {
                    Some(_) => {
                        call.emitted = true;
                        Some((call.name.clone(), call.index, call.args.clone()))
                    }
                    None => None,
                }
            }
            _ => None,
        };
        if let Some((name, index, args)) = ready {
            self.emit_call(&name, index, &args, out);
        }
        Step::Wait
    }

    // -- Emission -------------------------------------------------------------

    fn finalize_call(&mut self, call: ActiveCall, out: &mut Vec<EmittedPart>) {
        let args = if call.args.trim().is_empty() {
            "{}"
        } else {
            call.args.as_str()
        };
        if !self.emit_call(&call.name, call.index, args, out) {
            debug!(name = %call.name, "inline tool call arguments unparsable; dropped");
        }
    }

    /// Returns `false` only when `args` is not a JSON object.
    fn emit_call(
        &mut self,
        name: &str,
        index: Option<u32>,
        args: &str,
        out: &mut Vec<EmittedPart>,
    ) -> bool {
        let Some(map) = parse_json_object(args) else {
            return false;
        };
        let key = match index {
            Some(index) => format!("{name}:{index}"),
            None => format!("{name}:{}", canonical_json(&map)),
        };
        if !self.emitted_keys.insert(key) {
            debug!(name, "duplicate inline tool call suppressed");
            return true;
        }
        self.flush_visible(out);
        out.push(EmittedPart::ToolCall {
            id: next_call_id(),
            name: name.to_string(),
            arguments: args.trim().to_string(),
        });
        true
    }

    fn flush_visible(&mut self, out: &mut Vec<EmittedPart>) {
        if !self.visible.is_empty() {
            out.push(EmittedPart::Text {
                value: std::mem::take(&mut self.visible),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[inline]
fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Classify the `<|...` run at the start of `s`.
fn scan_control_token(s: &str) -> TokenScan {
    let bytes = s.as_bytes();
    let mut i = TOKEN_OPEN.len();
    while i < bytes.len() && is_token_byte(bytes[i]) {
        i += 1;
    }
    if i == bytes.len() {
        return TokenScan::Partial;
    }
    if bytes[i] != b'|' || i == TOKEN_OPEN.len() {
        return TokenScan::NotToken;
    }
    match bytes.get(i + 1) {
        None => TokenScan::Partial,
        Some(b'>') => TokenScan::Complete(i + 2),
        Some(_) => TokenScan::NotToken,
    }
}

/// Length of the longest suffix of `s` that is a proper prefix of `token`.
fn partial_suffix_len(s: &str, token: &str) -> usize {
    let max = s.len().min(token.len() - 1);
    (1..=max)
        .rev()
        .find(|&len| s.as_bytes().ends_with(&token.as_bytes()[..len]))
        .unwrap_or(0)
}

/// Whether `s` is an unambiguous prefix of one of the three call tokens. A bare
/// `<` or `<|` does not qualify and is released as text at end of stream.
fn is_partial_known_token(s: &str) -> bool {
    s.len() > TOKEN_OPEN.len()
        && [TOOL_CALL_BEGIN, TOOL_CALL_ARGUMENT_BEGIN, TOOL_CALL_END]
            .iter()
            .any(|token| token.starts_with(s))
}

/// Parse `name[:index]`, stripping a `functions.` namespace.
fn parse_header(header: &str) -> Option<(String, Option<u32>)> {
    let header = header.trim();
    let header = header.strip_prefix(FUNCTIONS_PREFIX).unwrap_or(header);
    let (name, index) = match header.rsplit_once(':') {
        Some((name, index)) => match index.trim().parse::<u32>() {
            Ok(index) => (name, Some(index)),
            Err(_) => (header, None),
        },
        None => (header, None),
    };
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), index))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
