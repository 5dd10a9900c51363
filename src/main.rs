use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use serde_json::json;
use tokio::io::AsyncReadExt;
use toolstream::config::{load_config, AdapterConfig};
use toolstream::observability::init_tracing;
use toolstream::protocol::canonical::EmittedPart;
use toolstream::stream::run_stream;

const READ_CHUNK_SIZE: usize = 8 * 1024;

fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path).unwrap_or_else(|e| {
            eprintln!("Failed to load configuration from {path}: {e}");
            std::process::exit(1);
        }),
        None => AdapterConfig::default(),
    };

    init_tracing(&config.features.log_level);

    let runtime = build_runtime().unwrap_or_else(|e| {
        eprintln!("Failed to initialize Tokio runtime: {e}");
        std::process::exit(1);
    });

    let code = runtime.block_on(replay(config));
    std::process::exit(code);
}

/// Timer driver only; stdin reads run on the blocking pool.
fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
}

/// Replay an SSE capture from stdin, printing one JSON line per emitted part.
async fn replay(config: AdapterConfig) -> i32 {
    let mut print_part = |part: EmittedPart| match serde_json::to_string(&part) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::error!(error = %err, "failed to serialize emitted part"),
    };

    match run_stream(stdin_chunks(), None, &config.stream, &mut print_part).await {
        Ok(summary) => {
            println!("{}", json!({"type": "summary", "summary": summary}));
            0
        }
        Err(err) => {
            eprintln!("Stream failed: {err}");
            2
        }
    }
}

fn stdin_chunks() -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    futures_util::stream::unfold(tokio::io::stdin(), |mut stdin| async move {
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
        match stdin.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), stdin)),
            Err(err) => Some((Err(err), stdin)),
        }
    })
}
