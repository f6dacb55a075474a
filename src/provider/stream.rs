//! Stream decoders for provider responses.
//!
//! OpenAI and Anthropic stream Server-Sent Events (`data: {...}` lines);
//! Ollama streams newline-delimited JSON. Both decoders buffer raw bytes
//! across TCP chunk boundaries and decode only complete lines, so a UTF-8
//! sequence split between chunks survives intact.

use serde_json::Value;

/// Remove and return the next complete line (without its `\n`), if any.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line[..pos]).into_owned())
}

/// SSE decoder for `data: {...}` event streams.
///
/// Ignores `event:` lines, keep-alive blank lines, and the `[DONE]`
/// terminator. Payloads that are not valid JSON are dropped.
///
/// # Example
///
/// ```
/// use llm_nodes::provider::stream::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// let data = b"event: x\ndata: {\"a\":1}\n\ndata: [DONE]\n\n";
/// assert_eq!(decoder.decode(data).len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every complete `data:` payload.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let mut values = Vec::new();
        while let Some(line) = take_line(&mut self.buffer) {
            if let Some(value) = parse_data_line(&line) {
                values.push(value);
            }
        }
        values
    }

    /// Drain whatever is left once the stream ends.
    pub fn flush(&mut self) -> Vec<Value> {
        let remaining = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&remaining)
            .lines()
            .filter_map(parse_data_line)
            .collect()
    }
}

fn parse_data_line(line: &str) -> Option<Value> {
    let line = line.trim();
    let data = line
        .strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))?
        .trim();
    if data == "[DONE]" {
        return None;
    }
    serde_json::from_str(data).ok()
}

/// Decoder for newline-delimited JSON streams (Ollama).
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every complete JSON line.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let mut values = Vec::new();
        while let Some(line) = take_line(&mut self.buffer) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(value) = serde_json::from_str::<Value>(line) {
                values.push(value);
            }
        }
        values
    }

    /// Parse a trailing line that arrived without a newline.
    pub fn flush(&mut self) -> Option<Value> {
        let remaining = std::mem::take(&mut self.buffer);
        let remaining = String::from_utf8_lossy(&remaining);
        let remaining = remaining.trim();
        if remaining.is_empty() {
            return None;
        }
        serde_json::from_str(remaining).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_basic_and_done() {
        let mut decoder = SseDecoder::new();
        let chunk = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n";
        let values = decoder.decode(chunk);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["choices"][0]["delta"]["content"], "Hi");
    }

    #[test]
    fn sse_anthropic_event_lines() {
        let mut decoder = SseDecoder::new();
        let chunk = b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"x\"}}\n\nevent: ping\ndata: {\"type\":\"ping\"}\n\n";
        let values = decoder.decode(chunk);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["delta"]["text"], "x");
        assert_eq!(values[1]["type"], "ping");
    }

    #[test]
    fn sse_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"data: {\"a\"").is_empty());
        let values = decoder.decode(b":1}\n\n");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["a"], 1);
    }

    #[test]
    fn sse_multibyte_char_split_across_chunks() {
        let data = "data: {\"t\":\"café\"}\n\n".as_bytes();
        let split = data.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(&data[..split]).is_empty());
        let values = decoder.decode(&data[split..]);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["t"], "café");
    }

    #[test]
    fn ndjson_multibyte_char_split_across_chunks() {
        let data = "{\"response\":\"naïve\"}\n".as_bytes();
        let split = data.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.decode(&data[..split]).is_empty());
        assert_eq!(decoder.decode(&data[split..])[0]["response"], "naïve");
    }

    #[test]
    fn sse_flush_trailing_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"data: {\"a\":2}").is_empty());
        let values = decoder.flush();
        assert_eq!(values.len(), 1);
        assert!(decoder.flush().is_empty());
    }

    #[test]
    fn ndjson_partial_lines() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.decode(b"{\"response\":").is_empty());
        let values = decoder.decode(b"\"hello\"}\n{\"response\":\" world\"}\n");
        assert_eq!(values.len(), 2);
        assert_eq!(values[1]["response"], " world");
    }

    #[test]
    fn ndjson_flush() {
        let mut decoder = NdjsonDecoder::new();
        decoder.decode(b"{\"done\":true}");
        assert_eq!(decoder.flush().unwrap()["done"], true);
        assert!(decoder.flush().is_none());
    }
}
