use criterion::{black_box, criterion_group, criterion_main, Criterion};

use toolstream::budget::trim_to_budget;
use toolstream::config::{BudgetConfig, QuotaConfig, StreamConfig};
use toolstream::protocol::canonical::{EmittedPart, Role, ToolDefinition, Turn};
use toolstream::quota::redact_quota_limited_tools;
use toolstream::stream::{decode_payloads, InlineToolCallParser, StreamInterpreter};

fn chat_text_body(frames: usize) -> String {
    let mut body = String::with_capacity(frames * 64);
    for idx in 0..frames {
        body.push_str("data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"token ");
        body.push_str(&idx.to_string());
        body.push_str("\"}}]}\n\n");
    }
    body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n");
    body
}

fn chat_tool_call_body(fragments: usize) -> String {
    let mut body = String::from(
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"search\",\"arguments\":\"{\\\"q\\\":\\\"\"}}]}}]}\n\n",
    );
    for _ in 0..fragments {
        body.push_str(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"abc\"}}]}}]}\n\n",
        );
    }
    body.push_str(
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"}\"}}]}}]}\n\n",
    );
    body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\ndata: [DONE]\n\n");
    body
}

fn interpret_body(body: &str) -> usize {
    let mut interpreter = StreamInterpreter::new(StreamConfig::default());
    let mut count = 0usize;
    let mut sink = |part: EmittedPart| {
        black_box(&part);
        count += 1;
    };
    for payload in decode_payloads(body) {
        interpreter.feed_frame(&payload, &mut sink).expect("interpret");
    }
    interpreter.finish(&mut sink);
    count
}

fn bench_sse_decode(c: &mut Criterion) {
    let body_small = chat_text_body(64);
    let body_large = chat_text_body(4096);

    c.bench_function("sse_decode_64_frames", |b| {
        b.iter(|| black_box(decode_payloads(black_box(&body_small)).len()));
    });
    c.bench_function("sse_decode_4k_frames", |b| {
        b.iter(|| black_box(decode_payloads(black_box(&body_large)).len()));
    });
}

fn bench_interpret(c: &mut Criterion) {
    let text_body = chat_text_body(1024);
    let tool_body = chat_tool_call_body(256);

    c.bench_function("interpret_chat_text_1k_frames", |b| {
        b.iter(|| black_box(interpret_body(black_box(&text_body))));
    });
    c.bench_function("interpret_chat_tool_call_256_fragments", |b| {
        b.iter(|| black_box(interpret_body(black_box(&tool_body))));
    });
}

fn bench_inline_parser(c: &mut Criterion) {
    let plain: Vec<String> = (0..256).map(|idx| format!("plain chunk {idx} ")).collect();
    let markup = "Checking.<|tool_calls_section_begin|><|tool_call_begin|>functions.lookup:0\
                  <|tool_call_argument_begin|>{\"id\": 42, \"fields\": [\"a\", \"b\"]}\
                  <|tool_call_end|><|tool_calls_section_end|>";
    let markup_chunks: Vec<&str> = markup
        .as_bytes()
        .chunks(5)
        .map(|chunk| std::str::from_utf8(chunk).expect("ascii"))
        .collect();

    c.bench_function("inline_plain_256_chunks", |b| {
        b.iter(|| {
            let mut parser = InlineToolCallParser::new();
            let mut out = Vec::with_capacity(256);
            for chunk in &plain {
                parser.feed(black_box(chunk), &mut out);
            }
            parser.finish(&mut out);
            black_box(out.len())
        });
    });
    c.bench_function("inline_markup_5_byte_chunks", |b| {
        b.iter(|| {
            let mut parser = InlineToolCallParser::new();
            let mut out = Vec::new();
            for chunk in &markup_chunks {
                parser.feed(black_box(chunk), &mut out);
            }
            parser.finish(&mut out);
            black_box(out.len())
        });
    });
}

fn bench_outbound(c: &mut Criterion) {
    let mut turns = vec![Turn::text(Role::System, "You are a careful assistant.")];
    for idx in 0..512 {
        let role = if idx % 2 == 0 { Role::User } else { Role::Assistant };
        turns.push(Turn::text(role, "lorem ipsum dolor sit amet ".repeat(8)));
    }
    let tools: Vec<ToolDefinition> = (0..16)
        .map(|idx| ToolDefinition {
            name: format!("tool_{idx}"),
            description: Some("does a thing".to_string()),
            parameters: serde_json::json!({"type": "object"}),
        })
        .collect();
    let budget_config = BudgetConfig::default();
    let quota_config = QuotaConfig::default();

    c.bench_function("trim_512_turns_to_4k", |b| {
        b.iter(|| black_box(trim_to_budget(black_box(&turns), 4096, &budget_config).map(|t| t.len())));
    });
    c.bench_function("quota_scan_no_match_512_turns", |b| {
        b.iter(|| black_box(redact_quota_limited_tools(black_box(&turns), &tools, &quota_config).is_unchanged()));
    });
}

criterion_group!(
    benches,
    bench_sse_decode,
    bench_interpret,
    bench_inline_parser,
    bench_outbound
);
criterion_main!(benches);
