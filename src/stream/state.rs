use super::inline::InlineToolCallParser;
use super::repetition::RepetitionGuard;
use super::tool_calls::ToolCallReconstructor;

/// Per-request accumulator threaded through the event interpreter.
///
/// Created at request start and dropped at request end or cancellation;
/// never shared across requests.
#[derive(Debug, Default)]
pub struct StreamingState {
    pub tool_calls: ToolCallReconstructor,
    pub inline: InlineToolCallParser,
    pub repetition: RepetitionGuard,
    /// Last finish reason reported by the upstream, if any.
    pub finish_reason: Option<String>,
    /// Whether a `Finish` part has been emitted.
    pub finished: bool,
    /// Tool calls emitted so far, from either reconstruction path.
    pub tool_calls_emitted: usize,
    pub frames: u64,
    pub malformed_frames: u64,
}

impl StreamingState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
