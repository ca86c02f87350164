//! Line-oriented SSE decoding for streaming webhook responses.
//!
//! The workflow engines this runtime talks to emit one JSON object per
//! `data:` line rather than spec-compliant multi-line events, so decoding
//! works a line at a time. Known limitation: multi-line `data:` events
//! separated by blank lines are not assembled; a backend relying on that
//! framing would be misread.

use shared::chat::StreamEvent;

/// Stream terminator sent by OpenAI-style backends.
const DONE_SENTINEL: &str = "[DONE]";

/// Accumulates raw response bytes and yields complete newline-terminated
/// lines, retaining the trailing partial line for the next chunk.
///
/// Bytes are buffered and only complete lines are decoded, so a UTF-8
/// sequence split across chunk boundaries survives intact.
pub struct LineBuffer {
    carry: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self { carry: Vec::new() }
    }

    /// Feed one chunk; returns every line it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.carry.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Drain the unterminated trailing line, if any. Connections can close
    /// without a final newline.
    pub fn flush(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        Some(line)
    }
}

/// Decode a raw `data:` token as JSON, handing the original token back on
/// failure so the caller can treat it as literal text.
pub fn try_decode_json(token: &str) -> Result<serde_json::Value, &str> {
    serde_json::from_str(token).map_err(|_| token)
}

/// Incremental parser for single-line SSE events.
pub struct SseParser {
    lines: LineBuffer,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            lines: LineBuffer::new(),
        }
    }

    /// Feed raw bytes from the HTTP response. Returns the decoded events
    /// completed by this chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.lines
            .feed(chunk)
            .iter()
            .filter_map(|line| Self::decode_line(line))
            .collect()
    }

    /// Decode whatever is left in the buffer at end of stream.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        self.lines.flush().and_then(|line| Self::decode_line(&line))
    }

    fn decode_line(line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            // Event separator.
            return None;
        }
        if line.starts_with(':') {
            // Comment / keep-alive.
            return None;
        }
        let data = line.strip_prefix("data:")?;
        Self::decode_data(data.strip_prefix(' ').unwrap_or(data))
    }

    fn decode_data(token: &str) -> Option<StreamEvent> {
        if token.trim() == DONE_SENTINEL {
            return Some(StreamEvent::Done);
        }
        match try_decode_json(token) {
            Ok(value) => {
                if let Some(err) = value.get("error") {
                    let message = match err.as_str() {
                        Some(s) => s.to_string(),
                        None => err.to_string(),
                    };
                    return Some(StreamEvent::Error(message));
                }
                if let Some(text) = value.get("text").and_then(|t| t.as_str()) {
                    return Some(StreamEvent::Text(text.to_string()));
                }
                if let Some(calls) = value.get("tool_calls").and_then(|c| c.as_array()) {
                    return Some(StreamEvent::ToolCalls(calls.clone()));
                }
                // Valid JSON with no recognized field: nothing to surface.
                None
            }
            // Not JSON at all: degrade to literal text rather than failing
            // the run.
            Err(raw) => Some(StreamEvent::Text(raw.to_string())),
        }
    }
}
