//! Newline-delimited JSON framing.
//!
//! Converts an unbounded, arbitrarily-chunked text stream into discrete
//! protocol messages: one JSON object per `\n`-terminated line, including
//! lines that span multiple reads. Non-JSON lines are treated as recoverable
//! noise — many providers interleave plain log output on stdout — and are
//! logged at debug severity, never surfaced to callers.

use crate::protocol::ServerMessage;

/// Incremental line framer. Feed it chunks as they arrive; it hands back the
/// messages completed by each chunk, in arrival order, and keeps any
/// incomplete trailing fragment buffered for the next call.
#[derive(Debug, Default)]
pub struct MessageFramer {
    buf: String,
}

impl MessageFramer {
    pub fn new() -> Self {
        Self { buf: String::new() }
    }

    /// Append `chunk` and extract every complete line. The result is
    /// identical for any chunking of the same input, one byte at a time
    /// included.
    pub fn feed(&mut self, chunk: &str) -> Vec<ServerMessage> {
        self.buf.push_str(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            if let Some(msg) = parse_line(line) {
                messages.push(msg);
            }
        }
        messages
    }

    /// Bytes of incomplete trailing fragment currently buffered.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

/// Parse one complete line. `None` means the line was noise (not JSON, or
/// JSON that is none of request/response/notification) and was discarded.
fn parse_line(line: &str) -> Option<ServerMessage> {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(err) => {
            tracing::debug!(error = %err, line, "discarding non-JSON line from server stream");
            return None;
        }
    };

    match ServerMessage::classify(value) {
        Some(msg) => Some(msg),
        None => {
            tracing::debug!(line, "discarding JSON line with unrecognized message shape");
            None
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn response_ids(messages: &[ServerMessage]) -> Vec<u64> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Response(r) => Some(r.id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_complete_line() {
        let mut framer = MessageFramer::new();
        let messages = framer.feed("{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n");
        assert_eq!(response_ids(&messages), vec![1]);
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_multiple_messages_in_one_chunk() {
        let mut framer = MessageFramer::new();
        let chunk = "{\"id\":1,\"result\":{}}\n{\"id\":2,\"result\":{}}\n{\"id\":3,\"result\":{}}\n";
        let messages = framer.feed(chunk);
        assert_eq!(response_ids(&messages), vec![1, 2, 3]);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut framer = MessageFramer::new();
        assert!(framer.feed("{\"id\":1,").is_empty());
        assert!(framer.feed("\"result\"").is_empty());
        let messages = framer.feed(":{}}\n");
        assert_eq!(response_ids(&messages), vec![1]);
    }

    #[test]
    fn test_one_byte_at_a_time_equals_whole_input() {
        let input = "{\"id\":1,\"result\":{}}\n{\"method\":\"note\"}\n{\"id\":2,\"error\":{\"code\":-1,\"message\":\"x\"}}\n";

        let mut whole = MessageFramer::new();
        let expected: Vec<String> = whole
            .feed(input)
            .iter()
            .map(|m| format!("{m:?}"))
            .collect();

        let mut byte_wise = MessageFramer::new();
        let mut got: Vec<String> = Vec::new();
        for ch in input.chars() {
            for msg in byte_wise.feed(&ch.to_string()) {
                got.push(format!("{msg:?}"));
            }
        }

        assert_eq!(got, expected);
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn test_incomplete_fragment_is_never_emitted() {
        let mut framer = MessageFramer::new();
        assert!(framer.feed("{\"id\":1,\"result\":{}}").is_empty());
        assert!(framer.buffered_len() > 0);
        // The newline completes it.
        let messages = framer.feed("\n");
        assert_eq!(response_ids(&messages), vec![1]);
    }

    #[test]
    fn test_non_json_lines_are_skipped() {
        let mut framer = MessageFramer::new();
        let chunk = "starting provider v1.2...\n{\"id\":1,\"result\":{}}\nWARN something\n";
        let messages = framer.feed(chunk);
        assert_eq!(response_ids(&messages), vec![1]);
    }

    #[test]
    fn test_json_without_message_shape_is_skipped() {
        let mut framer = MessageFramer::new();
        let messages = framer.feed("{\"jsonrpc\":\"2.0\"}\n[1,2,3]\n{\"id\":5,\"result\":null}\n");
        assert_eq!(response_ids(&messages), vec![5]);
    }

    #[test]
    fn test_crlf_and_blank_lines_tolerated() {
        let mut framer = MessageFramer::new();
        let messages = framer.feed("{\"id\":1,\"result\":{}}\r\n\r\n\n{\"id\":2,\"result\":{}}\r\n");
        assert_eq!(response_ids(&messages), vec![1, 2]);
    }

    #[test]
    fn test_notification_classified_at_parse_time() {
        let mut framer = MessageFramer::new();
        let messages =
            framer.feed("{\"jsonrpc\":\"2.0\",\"method\":\"notifications/tools/list_changed\"}\n");
        assert!(matches!(messages[0], ServerMessage::Notification(_)));
    }
}
