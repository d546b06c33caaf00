//! Opaque offset cursors: base64 over a tiny JSON object. Decoding is
//! tolerant; any malformed cursor means "start from the beginning" rather
//! than an error.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Cursor {
    #[serde(rename = "o")]
    offset: u64,
}

pub fn encode_cursor(offset: u64) -> String {
    let json = serde_json::to_string(&Cursor { offset }).unwrap_or_else(|_| "{\"o\":0}".into());
    STANDARD.encode(json)
}

/// Offsets are clamped to `i64::MAX` so a well-formed but absurd cursor
/// still binds cleanly into the query layer.
pub fn decode_cursor(cursor: &str) -> u64 {
    STANDARD
        .decode(cursor)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Cursor>(&bytes).ok())
        .map(|c| c.offset.min(i64::MAX as u64))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        assert_eq!(decode_cursor(&encode_cursor(42)), 42);
        assert_eq!(decode_cursor(&encode_cursor(0)), 0);
    }

    #[test]
    fn absurd_offsets_are_clamped() {
        assert_eq!(decode_cursor(&encode_cursor(u64::MAX)), i64::MAX as u64);
        assert_eq!(
            decode_cursor(&STANDARD.encode(format!("{{\"o\":{}}}", u64::MAX))),
            i64::MAX as u64
        );
    }

    #[test]
    fn garbage_decodes_to_zero() {
        assert_eq!(decode_cursor("not-base64-json"), 0);
        assert_eq!(decode_cursor(&STANDARD.encode("[1,2]")), 0);
        assert_eq!(decode_cursor(""), 0);
    }
}
