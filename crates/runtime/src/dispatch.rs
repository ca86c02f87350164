//! Response-shape classification for completed webhook responses.
//!
//! Workflow engines are heterogeneous in how they finish a response: some
//! stream SSE, some return one JSON document, some return bare text. The
//! adapter never assumes a single shape.

use serde_json::Value;

/// The three decoding strategies for a webhook response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `text/event-stream`: pump through the SSE pipeline.
    Streaming,
    /// `application/json`: one document, reduced to its reply text.
    SingleJson,
    /// Anything else: the body verbatim.
    PlainText,
}

/// Classify by the declared content type. Status >= 400 responses are
/// rejected before this is consulted.
pub fn classify(content_type: &str) -> ResponseShape {
    if content_type.contains("text/event-stream") {
        ResponseShape::Streaming
    } else if content_type.contains("application/json") {
        ResponseShape::SingleJson
    } else {
        ResponseShape::PlainText
    }
}

/// Field probe order for single-document JSON replies.
const REPLY_FIELDS: [&str; 5] = ["output", "text", "message", "response", "content"];

/// Reduce a whole-JSON reply to its display text: the first known field that
/// holds a string, otherwise the serialized document.
pub fn extract_reply_text(doc: &Value) -> String {
    if let Value::String(s) = doc {
        return s.clone();
    }
    for field in REPLY_FIELDS {
        if let Some(value) = doc.get(field) {
            return match value.as_str() {
                Some(s) => s.to_string(),
                None => doc.to_string(),
            };
        }
    }
    doc.to_string()
}
