pub mod driver;
pub mod inline;
pub mod interpreter;
pub mod repetition;
pub mod sse;
pub mod state;
pub mod tool_calls;
pub mod watchdog;

pub use driver::{run_stream, PartSink, StreamInterpreter, StreamSummary};
pub use inline::{InlineState, InlineToolCallParser};
pub use interpreter::{finish_stream_into, interpret_value_into};
pub use repetition::{check_repetition, RepetitionGuard, RepetitionState};
pub use sse::{decode_payloads, sse_payload_stream, DataLineDecoder};
pub use state::StreamingState;
pub use tool_calls::{Keyspace, SlotKey, SlotPhase, SlotUpdate, ToolCallBuffer, ToolCallReconstructor};
pub use watchdog::{with_inactivity_timeout, InactivityWatchdog};
