use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::stream::StreamSummary;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// Output goes to stderr so stdout stays free for emitted parts.
pub fn init_tracing(log_level: &str) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let filter = EnvFilter::try_new(tracing_directive(&level))
        .unwrap_or_else(|_| EnvFilter::new("INFO"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

fn tracing_directive(level: &str) -> &str {
    match level {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    }
}

/// Log the per-stream summary once the stream has ended.
pub fn log_stream_complete(summary: &StreamSummary) {
    info!(
        frames = summary.frames,
        malformed_frames = summary.malformed_frames,
        parts = summary.parts,
        tool_calls = summary.tool_calls,
        suppressed_repeats = summary.suppressed_repeats,
        finish_reason = summary.finish_reason.as_deref().unwrap_or(""),
        cancelled = summary.cancelled,
        timed_out = summary.timed_out,
        duration_seconds = summary.elapsed.as_secs_f64(),
        "stream completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(tracing_directive("WARNING"), "WARN");
        assert_eq!(tracing_directive("CRITICAL"), "ERROR");
        assert_eq!(tracing_directive("DEBUG"), "DEBUG");
    }
}
