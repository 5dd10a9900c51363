use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

static CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
const HEX: &[u8; 16] = b"0123456789abcdef";

/// Fresh id for tool calls that arrive without one.
#[inline]
pub(crate) fn next_call_id() -> String {
    let id = CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut out = String::with_capacity(21);
    out.push_str("call_");
    push_u64_hex_16(&mut out, id);
    out
}

#[inline]
fn push_u64_hex_16(out: &mut String, mut value: u64) {
    let mut buf = [b'0'; 16];
    let mut idx = 16;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for byte in buf {
        out.push(char::from(byte));
    }
}

/// Parse `text` as a JSON object. Arrays, scalars and partial text yield `None`.
#[inline]
pub(crate) fn parse_json_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    // Cheap reject before handing partial argument text to serde.
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

#[inline]
pub(crate) fn is_json_object(text: &str) -> bool {
    parse_json_object(text).is_some()
}

/// Key-sorted serialisation of a JSON object, used as a dedup key.
#[inline]
pub(crate) fn canonical_json(map: &Map<String, Value>) -> String {
    // serde_json's default `Map` is ordered by key, so `to_string` is canonical.
    serde_json::to_string(map).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_ids_are_unique_and_prefixed() {
        let a = next_call_id();
        let b = next_call_id();
        assert!(a.starts_with("call_"));
        assert_eq!(a.len(), 21);
        assert_ne!(a, b);
    }

    #[test]
    fn json_object_detection() {
        assert!(is_json_object("{}"));
        assert!(is_json_object(" {\"a\": [1, 2]} "));
        assert!(!is_json_object("{\"a\":"));
        assert!(!is_json_object("[1]"));
        assert!(!is_json_object("\"{}\""));
        assert!(!is_json_object(""));
        assert!(!is_json_object("{} {}"));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let left = parse_json_object("{\"b\":1,\"a\":2}").unwrap();
        let right = parse_json_object("{ \"a\": 2, \"b\": 1 }").unwrap();
        assert_eq!(canonical_json(&left), canonical_json(&right));
        assert_eq!(canonical_json(&left), "{\"a\":2,\"b\":1}");
    }
}
