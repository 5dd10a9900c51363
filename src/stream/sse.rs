//! SSE `data:` line decoder and the async byte-stream adapter built on it.
//!
//! Only `data:` lines matter to the upstreams this crate talks to: every such
//! line is one frame, `[DONE]` ends the sequence, and everything else
//! (`event:`, `id:`, comments, blank separators) is ignored.
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DONE_SENTINEL: &str = "[DONE]";

struct PendingFrames {
    frames: SmallVec<[String; 8]>,
    head: usize,
}

impl PendingFrames {
    #[inline]
    fn new() -> Self {
        Self {
            frames: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<String> {
        if self.head >= self.frames.len() {
            return None;
        }
        let frame = std::mem::take(&mut self.frames[self.head]);
        self.head += 1;
        if self.head == self.frames.len() {
            self.frames.clear();
            self.head = 0;
        }
        Some(frame)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<String>) {
        if parsed.is_empty() {
            return;
        }
        self.frames.reserve(parsed.len());
        self.frames.extend(parsed.drain(..));
    }
}

/// What a single complete line decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind<'a> {
    Payload(&'a str),
    Done,
    Ignored,
}

#[inline]
fn classify_line(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    let Some(payload) = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))
    else {
        return LineKind::Ignored;
    };
    if payload.trim() == DONE_SENTINEL {
        return LineKind::Done;
    }
    LineKind::Payload(payload)
}

// ---------------------------------------------------------------------------
// DataLineDecoder: incremental line splitter
// ---------------------------------------------------------------------------

/// Incremental `data:` line decoder.
///
/// Feed it text chunks split at arbitrary boundaries; it yields one payload
/// per complete `data:` line and stops for good at `[DONE]`. Payloads are
/// yielded verbatim, JSON or not.
pub struct DataLineDecoder {
    buffer: String,
    read_offset: usize,
    done: bool,
}

impl DataLineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            done: false,
        }
    }

    /// Whether the `[DONE]` sentinel has been seen.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw text and return the payloads it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append completed payloads into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<String>) {
        if self.done {
            return;
        }
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &self.buffer[processed_up_to..line_end];
            processed_up_to = line_end + 1;
            match classify_line(line) {
                LineKind::Payload(payload) => out.push(payload.to_string()),
                LineKind::Done => {
                    self.done = true;
                    break;
                }
                LineKind::Ignored => {}
            }
        }

        if self.done {
            self.buffer = String::new();
            self.read_offset = 0;
            return;
        }
        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Process the residual unterminated line once the source has closed.
    pub fn finish_into(&mut self, out: &mut Vec<String>) {
        if self.done {
            return;
        }
        let residual = std::mem::take(&mut self.buffer);
        self.read_offset = 0;
        match classify_line(&residual) {
            LineKind::Payload(payload) => out.push(payload.to_string()),
            LineKind::Done => self.done = true,
            LineKind::Ignored => {}
        }
    }
}

impl Default for DataLineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a complete SSE body in one pass.
#[must_use]
pub fn decode_payloads(body: &str) -> Vec<String> {
    let mut decoder = DataLineDecoder::new();
    let mut out = Vec::new();
    decoder.feed_into(body, &mut out);
    decoder.finish_into(&mut out);
    out
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Feed `bytes` to the decoder, carrying an incomplete trailing UTF-8
/// sequence over to the next chunk.
fn feed_utf8(
    decoder: &mut DataLineDecoder,
    remainder: &mut Vec<u8>,
    bytes: &[u8],
    out: &mut Vec<String>,
) {
    if remainder.is_empty() {
        if let Ok(text) = std::str::from_utf8(bytes) {
            decoder.feed_into(text, out);
            return;
        }
    }
    remainder.extend_from_slice(bytes);
    match std::str::from_utf8(remainder) {
        Ok(text) => {
            decoder.feed_into(text, out);
            remainder.clear();
        }
        Err(e) if e.error_len().is_none() => {
            let valid_up_to = e.valid_up_to();
            if let Ok(text) = std::str::from_utf8(&remainder[..valid_up_to]) {
                decoder.feed_into(text, out);
            }
            remainder.drain(..valid_up_to);
        }
        Err(_) => {
            let text = String::from_utf8_lossy(remainder).into_owned();
            decoder.feed_into(&text, out);
            remainder.clear();
        }
    }
}

/// Turn an upstream byte stream into a lazy stream of frame payloads.
///
/// The sequence ends at `[DONE]`, at source close (after the residual line is
/// decoded), on a source error, or when `cancel` fires. Cancellation is
/// checked before every read and also interrupts a pending read. The source
/// is dropped, releasing the reader, on every one of those paths.
pub fn sse_payload_stream<S, E>(
    byte_stream: S,
    cancel: Option<CancellationToken>,
) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use futures_util::StreamExt;

    struct State<S> {
        stream: std::pin::Pin<Box<S>>,
        decoder: DataLineDecoder,
        remainder: Vec<u8>,
        parsed: Vec<String>,
        pending: PendingFrames,
        cancel: Option<CancellationToken>,
        closed: bool,
    }

    let state = State {
        stream: Box::pin(byte_stream),
        decoder: DataLineDecoder::new(),
        remainder: Vec::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingFrames::new(),
        cancel,
        closed: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.pending.pop_front() {
                return Some((frame, st));
            }
            if st.closed || st.decoder.is_done() {
                return None;
            }

            let next = match st.cancel.as_ref() {
                Some(token) => {
                    if token.is_cancelled() {
                        debug!("sse stream cancelled before read");
                        return None;
                    }
                    tokio::select! {
                        biased;
                        () = token.cancelled() => {
                            debug!("sse stream cancelled during read");
                            return None;
                        }
                        item = st.stream.next() => item,
                    }
                }
                None => st.stream.next().await,
            };

            match next {
                Some(Ok(bytes)) => {
                    feed_utf8(&mut st.decoder, &mut st.remainder, &bytes, &mut st.parsed);
                }
                Some(Err(err)) => {
                    warn!(error = %err, "upstream byte stream failed; ending frame stream");
                    st.closed = true;
                }
                None => {
                    if !st.remainder.is_empty() {
                        let tail = String::from_utf8_lossy(&st.remainder).into_owned();
                        st.remainder.clear();
                        st.decoder.feed_into(&tail, &mut st.parsed);
                    }
                    st.decoder.finish_into(&mut st.parsed);
                    st.closed = true;
                }
            }
            st.pending.extend_from_vec(&mut st.parsed);
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
