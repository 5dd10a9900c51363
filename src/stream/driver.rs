use std::fmt::Display;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::interpreter::{finish_stream_into, interpret_value_into};
use super::sse::sse_payload_stream;
use super::state::StreamingState;
use super::watchdog::with_inactivity_timeout;
use crate::config::StreamConfig;
use crate::error::AdapterError;
use crate::observability::log_stream_complete;
use crate::protocol::canonical::EmittedPart;

/// Ordered consumer of emitted parts. Each call returns before the next begins.
pub trait PartSink {
    fn report(&mut self, part: EmittedPart);
}

impl<F> PartSink for F
where
    F: FnMut(EmittedPart),
{
    fn report(&mut self, part: EmittedPart) {
        self(part);
    }
}

/// Counters for one finished stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub frames: u64,
    pub malformed_frames: u64,
    pub parts: u64,
    pub tool_calls: u64,
    pub suppressed_repeats: u64,
    pub finish_reason: Option<String>,
    pub cancelled: bool,
    pub timed_out: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Synchronous frame-level driver: payload text in, parts out to a sink.
#[derive(Debug)]
pub struct StreamInterpreter {
    state: StreamingState,
    config: StreamConfig,
    scratch: Vec<EmittedPart>,
    parts: u64,
}

impl StreamInterpreter {
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self {
            state: StreamingState::new(),
            config,
            scratch: Vec::with_capacity(4),
            parts: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> &StreamingState {
        &self.state
    }

    /// Interpret one frame payload. Payloads that are not JSON are skipped.
    ///
    /// # Errors
    ///
    /// Propagates [`AdapterError::IncompleteToolCall`] from a forced flush.
    /// Parts produced by the frame before the failure are still reported.
    pub fn feed_frame(&mut self, payload: &str, sink: &mut impl PartSink) -> Result<(), AdapterError> {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(err) => {
                self.state.malformed_frames += 1;
                debug!(error = %err, payload_len = payload.len(), "skipping malformed frame");
                return Ok(());
            }
        };
        let result = interpret_value_into(&value, &mut self.state, &self.config, &mut self.scratch);
        self.drain(sink);
        result
    }

    /// Finalise the stream: flush what is still pending and emit the trailing
    /// `Finish` if the upstream never sent one. Safe to call more than once.
    pub fn finish(&mut self, sink: &mut impl PartSink) {
        finish_stream_into(&mut self.state, &self.config, &mut self.scratch);
        self.drain(sink);
    }

    #[must_use]
    pub fn summary(&self, elapsed: Duration) -> StreamSummary {
        StreamSummary {
            frames: self.state.frames,
            malformed_frames: self.state.malformed_frames,
            parts: self.parts,
            tool_calls: u64::try_from(self.state.tool_calls_emitted).unwrap_or(u64::MAX),
            suppressed_repeats: self.state.repetition.suppressed(),
            finish_reason: self.state.finish_reason.clone(),
            cancelled: false,
            timed_out: false,
            elapsed,
        }
    }

    fn drain(&mut self, sink: &mut impl PartSink) {
        for part in self.scratch.drain(..) {
            self.parts += 1;
            sink.report(part);
        }
    }
}

/// Drive a full upstream byte stream through decoding and interpretation.
///
/// When the stream is cancelled or the inactivity window elapses, pending
/// tool-call buffers are abandoned and no trailing `Finish` is emitted.
///
/// # Errors
///
/// Returns [`AdapterError::IncompleteToolCall`] when a `stop`/`tool_calls`
/// finish forces a flush of unparsable arguments.
pub async fn run_stream<S, E>(
    byte_stream: S,
    cancel: Option<CancellationToken>,
    config: &StreamConfig,
    sink: &mut impl PartSink,
) -> Result<StreamSummary, AdapterError>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let started = Instant::now();
    let frames = sse_payload_stream(byte_stream, cancel.clone());
    let mut interpreter = StreamInterpreter::new(config.clone());

    let timed_out = match config.inactivity_timeout_ms {
        Some(window_ms) => {
            let mut guarded = Box::pin(with_inactivity_timeout(
                frames,
                Duration::from_millis(window_ms),
            ));
            while let Some(frame) = guarded.next().await {
                interpreter.feed_frame(&frame, sink)?;
            }
            guarded.expired()
        }
        None => {
            let mut frames = Box::pin(frames);
            while let Some(frame) = frames.next().await {
                interpreter.feed_frame(&frame, sink)?;
            }
            false
        }
    };
    let cancelled = cancel.as_ref().is_some_and(CancellationToken::is_cancelled);

    if !cancelled && !timed_out {
        interpreter.finish(sink);
    }

    let mut summary = interpreter.summary(started.elapsed());
    summary.cancelled = cancelled;
    summary.timed_out = timed_out;
    log_stream_complete(&summary);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(frames: &[&str], config: StreamConfig) -> (Vec<EmittedPart>, StreamSummary) {
        let mut parts: Vec<EmittedPart> = Vec::new();
        let mut sink = |part: EmittedPart| parts.push(part);
        let mut interpreter = StreamInterpreter::new(config);
        for frame in frames {
            interpreter.feed_frame(frame, &mut sink).unwrap();
        }
        interpreter.finish(&mut sink);
        let summary = interpreter.summary(Duration::ZERO);
        (parts, summary)
    }

    #[test]
    fn test_malformed_frames_are_skipped() {
        let (parts, summary) = collect(
            &["not json", r#"{"choices":[{"delta":{"content":"ok"}}]}"#, "{"],
            StreamConfig::default(),
        );
        assert_eq!(parts[0], EmittedPart::text("ok"));
        assert_eq!(summary.malformed_frames, 2);
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.parts, 2);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut parts: Vec<EmittedPart> = Vec::new();
        let mut sink = |part: EmittedPart| parts.push(part);
        let mut interpreter = StreamInterpreter::new(StreamConfig::default());
        interpreter.finish(&mut sink);
        interpreter.finish(&mut sink);
        assert_eq!(parts, vec![EmittedPart::Finish { reason: None }]);
    }

    #[tokio::test]
    async fn test_run_stream_end_to_end() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
                    data: [DONE]\n\n";
        let chunks: Vec<Result<Bytes, std::io::Error>> = body
            .as_bytes()
            .chunks(7)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        let mut parts: Vec<EmittedPart> = Vec::new();
        let summary = run_stream(
            futures_util::stream::iter(chunks),
            None,
            &StreamConfig::default(),
            &mut |part: EmittedPart| parts.push(part),
        )
        .await
        .unwrap();
        assert_eq!(
            parts,
            vec![
                EmittedPart::text("Hi"),
                EmittedPart::Finish { reason: Some("stop".to_string()) }
            ]
        );
        assert_eq!(summary.finish_reason.as_deref(), Some("stop"));
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_run_stream_cancelled_emits_nothing_further() {
        let token = CancellationToken::new();
        token.cancel();
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"data: {\"content\":\"x\"}\n"))];
        let mut parts: Vec<EmittedPart> = Vec::new();
        let summary = run_stream(
            futures_util::stream::iter(chunks),
            Some(token),
            &StreamConfig::default(),
            &mut |part: EmittedPart| parts.push(part),
        )
        .await
        .unwrap();
        assert!(parts.is_empty());
        assert!(summary.cancelled);
    }

    #[tokio::test]
    async fn test_run_stream_inactivity_timeout() {
        let head = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"name\":\"f\",\"arguments\":\"{\"}}]}}]}\n",
        ))]);
        let stalled = head.chain(futures_util::stream::pending());
        let config = StreamConfig {
            inactivity_timeout_ms: Some(30),
            ..StreamConfig::default()
        };
        let mut parts: Vec<EmittedPart> = Vec::new();
        let summary = run_stream(stalled, None, &config, &mut |part: EmittedPart| parts.push(part))
            .await
            .unwrap();
        assert!(summary.timed_out);
        assert!(parts.is_empty());
    }
}
