//! SSE framing for streaming `/chat/completions` output.

use crate::error::ApiError;
use crate::types::StreamChunk;
use serde_json::Value;

/// One decoded `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(StreamChunk),
    /// Valid payload with nothing to merge (usage-only frames etc.).
    Ignored,
    /// The `[DONE]` terminator.
    Done,
}

/// Incremental SSE decoder fed with raw network bytes.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network reads decode correctly. Multiple `data:`
/// lines in one event are joined with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns every event payload completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.feed_line(line, &mut payloads);
        }
        payloads
    }

    /// Flush whatever is left when the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        let mut payloads = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.feed_line(line.trim_end_matches('\r'), &mut payloads);
        }
        self.flush(&mut payloads);
        payloads.pop()
    }

    fn feed_line(&mut self, line: &str, payloads: &mut Vec<String>) {
        if line.is_empty() {
            self.flush(payloads);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
    }

    fn flush(&mut self, payloads: &mut Vec<String>) {
        if self.data_lines.is_empty() {
            return;
        }
        payloads.push(self.data_lines.join("\n"));
        self.data_lines.clear();
    }
}

/// Parse a complete SSE body into concatenated `data` payload blocks.
#[cfg(test)]
fn parse_sse_event_payloads(stream: &str) -> Vec<String> {
    let mut decoder = SseDecoder::new();
    let mut payloads = decoder.push(stream.as_bytes());
    payloads.extend(decoder.finish());
    payloads
}

/// Decode one `data:` payload of a chat-completions stream.
pub fn parse_chunk_payload(payload: &str) -> Result<StreamEvent, ApiError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(StreamEvent::Ignored);
    }
    if payload == "[DONE]" {
        return Ok(StreamEvent::Done);
    }
    let event: Value = serde_json::from_str(payload)
        .map_err(|err| ApiError::InvalidResponse(format!("invalid streaming chunk: {err}")))?;

    if let Some(error) = event.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("provider reported an error mid-stream");
        return Err(ApiError::InvalidResponse(format!(
            "streaming response failed: {message}"
        )));
    }

    let Some(choice) = event
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    else {
        return Ok(StreamEvent::Ignored);
    };
    let delta = choice.get("delta").cloned().unwrap_or(Value::Null);
    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(StreamEvent::Chunk(StreamChunk::from_delta(delta, finish_reason)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{sse_data_block, sse_done_block};
    use serde_json::json;

    #[test]
    fn parse_sse_event_payloads_joins_data_lines_and_skips_comments() {
        let payloads = parse_sse_event_payloads(
            ": ping\n\
             event: demo\n\
             data: one\n\
             data: two\n\
             id: 1\n\
             \n\
             data: [DONE]\n\
             \n",
        );
        assert_eq!(payloads, vec!["one\ntwo".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn decoder_handles_splits_inside_lines_and_utf8() {
        let body = format!("{}{}", sse_data_block(r#"{"x":"héllo"}"#), sse_done_block());
        let bytes = body.as_bytes();
        let mut decoder = SseDecoder::new();
        let mut payloads = Vec::new();
        for byte in bytes {
            payloads.extend(decoder.push(std::slice::from_ref(byte)));
        }
        assert!(decoder.finish().is_none());
        assert_eq!(payloads, vec![r#"{"x":"héllo"}"#.to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn decoder_flushes_unterminated_tail() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let payloads = parse_sse_event_payloads("data: a\r\n\r\ndata: b\r\n\r\n");
        assert_eq!(payloads, vec!["a", "b"]);
    }

    #[test]
    fn chunk_payload_extracts_delta_and_finish_reason() {
        let payload = json!({
            "id": "c1",
            "choices": [{"index": 0, "delta": {"content": "Hi"}, "finish_reason": null}]
        })
        .to_string();
        let StreamEvent::Chunk(chunk) = parse_chunk_payload(&payload).unwrap() else {
            panic!("expected chunk");
        };
        assert_eq!(chunk.text_delta.as_deref(), Some("Hi"));
        assert!(chunk.finish_reason.is_none());

        let payload = json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}).to_string();
        let StreamEvent::Chunk(chunk) = parse_chunk_payload(&payload).unwrap() else {
            panic!("expected chunk");
        };
        assert_eq!(chunk.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn chunk_payload_special_cases() {
        assert_eq!(parse_chunk_payload("[DONE]").unwrap(), StreamEvent::Done);
        assert_eq!(
            parse_chunk_payload(r#"{"choices":[],"usage":{"total_tokens":3}}"#).unwrap(),
            StreamEvent::Ignored
        );
        let err = parse_chunk_payload(r#"{"error":{"message":"overloaded"}}"#).unwrap_err();
        assert!(err.to_string().contains("overloaded"));
        assert!(parse_chunk_payload("{nope").is_err());
    }

    #[cfg(feature = "fuzz-tests")]
    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_sse_event_payloads_round_trips_data_blocks(
                payloads in proptest::collection::vec(
                    proptest::collection::vec(
                        proptest::string::string_regex("[ -~]{0,24}").expect("regex"),
                        1..4
                    ),
                    0..8
                )
            ) {
                let mut stream = String::new();
                let mut expected = Vec::new();
                for (idx, payload_lines) in payloads.iter().enumerate() {
                    stream.push_str(": keepalive\n");
                    stream.push_str(&format!("event: e{idx}\n"));
                    for line in payload_lines {
                        stream.push_str("data: ");
                        stream.push_str(line);
                        stream.push('\n');
                    }
                    stream.push_str("id: 1\n\n");
                    expected.push(payload_lines.join("\n"));
                }

                prop_assert_eq!(parse_sse_event_payloads(&stream), expected);
            }

            #[test]
            fn decoder_is_split_invariant(split in 0usize..200) {
                let body = "data: {\"a\":1}\n\n: c\ndata: x\ndata: y\n\ndata: [DONE]\n\n";
                let split = split.min(body.len());
                let mut decoder = SseDecoder::new();
                let mut got = decoder.push(&body.as_bytes()[..split]);
                got.extend(decoder.push(&body.as_bytes()[split..]));
                got.extend(decoder.finish());
                prop_assert_eq!(got, parse_sse_event_payloads(body));
            }
        }
    }
}
