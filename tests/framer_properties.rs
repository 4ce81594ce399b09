// Property tests for stream framing
//
// Generated JSON texts are concatenated, cut at arbitrary points and fed to
// the framer chunk by chunk. Whatever the cuts, the same texts come out.

use dooz_lan_bridge::transport::{MessageBuffer, find_message_end};
use proptest::prelude::*;
use serde_json::{Value, json};

fn arb_text() -> impl Strategy<Value = String> {
    // Strings full of structural characters that must not count inside quotes
    "[a-z0-9 {}\\[\\]\"\\\\:,é☀]{0,16}"
}

fn arb_message() -> impl Strategy<Value = Value> {
    prop_oneof![
        (any::<u32>(), arb_text()).prop_map(|(id, s)| {
            json!({ "jsonrpc": "2.0", "id": id, "result": { "name": s, "nested": [s, { "k": [] }] } })
        }),
        arb_text().prop_map(|s| {
            json!({ "jsonrpc": "2.0", "method": "notify_state", "params": { "address": "0002", "raw": s } })
        }),
        proptest::collection::vec((any::<u16>(), arb_text()), 1..4).prop_map(|items| {
            Value::Array(
                items
                    .into_iter()
                    .map(|(id, s)| json!({ "jsonrpc": "2.0", "id": id, "result": s }))
                    .collect(),
            )
        }),
    ]
}

fn arb_separator() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just(""), Just(" "), Just("\n"), Just("\r\n\t")]
}

/// Move a byte offset back to the nearest char boundary.
fn floor_boundary(s: &str, mut at: usize) -> usize {
    at = at.min(s.len());
    while !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}

proptest! {
    /// Any chunking of a concatenated stream yields the original texts in order.
    #[test]
    fn chunking_never_changes_framing(
        messages in proptest::collection::vec((arb_message(), arb_separator()), 1..6),
        cuts in proptest::collection::vec(any::<proptest::sample::Index>(), 0..8),
    ) {
        let texts: Vec<String> = messages.iter().map(|(m, _)| m.to_string()).collect();
        let stream: String = messages
            .iter()
            .zip(&texts)
            .map(|((_, sep), text)| format!("{sep}{text}"))
            .collect();

        let mut offsets: Vec<usize> = cuts
            .iter()
            .map(|ix| floor_boundary(&stream, ix.index(stream.len() + 1)))
            .collect();
        offsets.push(stream.len());
        offsets.sort_unstable();

        let mut framer = MessageBuffer::new();
        let mut framed = Vec::new();
        let mut start = 0;
        for end in offsets {
            framer.push_str(&stream[start..end]);
            framed.extend(framer.messages());
            start = end;
        }

        prop_assert_eq!(framed, texts);
        prop_assert!(framer.is_empty());
    }

    /// A strict prefix of a text is never reported as complete.
    #[test]
    fn truncated_text_is_incomplete(message in arb_message(), cut in any::<proptest::sample::Index>()) {
        let text = message.to_string();
        let at = floor_boundary(&text, cut.index(text.len()));
        let prefix = &text[..at];

        prop_assert_eq!(find_message_end(prefix), None);

        let mut framer = MessageBuffer::new();
        framer.push_str(prefix);
        prop_assert_eq!(framer.next_message(), None);
        prop_assert_eq!(framer.remainder(), prefix);
    }

    /// Framed texts always parse back to the generated value.
    #[test]
    fn framed_texts_parse(message in arb_message(), sep in arb_separator()) {
        let mut framer = MessageBuffer::new();
        framer.push_str(sep);
        framer.push_str(&message.to_string());
        let framed = framer.next_message();
        prop_assert!(framed.is_some());
        let parsed: Value = serde_json::from_str(&framed.unwrap_or_default()).unwrap();
        prop_assert_eq!(parsed, message);
    }
}
