//! Conversation data model shared between the runtime and its hosts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block of message content.
///
/// Only `Text` blocks are sent to the webhook; attachments are referenced by
/// URL and rendered by the host, not inlined into the wire payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(default)]
        filename: Option<String>,
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    File {
        url: String,
        #[serde(default)]
        filename: Option<String>,
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

/// One turn of the conversation, owned by the host and passed by value into
/// the runtime. Immutable once sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ConversationMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::text(text)],
        }
    }

    /// Concatenated text blocks. Attachments are skipped.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if let ContentPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// One "as of now" snapshot of the full assistant reply.
///
/// Re-sent in full each time new content arrives; across one run the text is
/// append-only, never truncated or rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub content: Vec<ContentPart>,
}

impl RunResult {
    pub fn text_snapshot(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
        }
    }

    /// The snapshot's text, empty if the first block is not text.
    pub fn text(&self) -> &str {
        match self.content.first() {
            Some(ContentPart::Text { text }) => text,
            _ => "",
        }
    }
}

/// Transient decoded unit from the wire: produced per `data:` line, consumed
/// immediately, never persisted.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental reply text.
    Text(String),
    /// Tool invocations surfaced by the workflow; carried as raw JSON.
    ToolCalls(Vec<serde_json::Value>),
    /// Explicit failure reported inside the stream.
    Error(String),
    /// End-of-stream sentinel.
    Done,
}
