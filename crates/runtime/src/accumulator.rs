//! Incremental reconstruction of the assistant reply.

use shared::chat::{RunResult, StreamEvent};

/// Grows the reply text across stream events and snapshots the full total
/// after each increment. Created fresh for every run; never shared between
/// invocations.
#[derive(Default)]
pub struct TextAccumulator {
    text: String,
}

impl TextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded event. Returns a snapshot for content-bearing
    /// events, `None` for terminal markers.
    pub fn apply(&mut self, event: &StreamEvent) -> Option<RunResult> {
        match event {
            StreamEvent::Text(chunk) => {
                self.text.push_str(chunk);
                Some(self.snapshot())
            }
            // Tool calls are surfaced but do not mutate the visible text;
            // the current total is re-sent unchanged.
            StreamEvent::ToolCalls(_) => Some(self.snapshot()),
            StreamEvent::Error(_) | StreamEvent::Done => None,
        }
    }

    pub fn snapshot(&self) -> RunResult {
        RunResult::text_snapshot(self.text.clone())
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}
