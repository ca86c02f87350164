//! Streaming runtime for webhook-backed chat.
//!
//! One POST per conversation turn; the reply comes back as an SSE stream, a
//! single JSON document, or plain text, and is normalized into a sequence of
//! growing [`shared::chat::RunResult`] snapshots either way.

pub mod accumulator;
pub mod adapter;
pub mod dispatch;
pub mod error;
pub mod sse;

pub use adapter::{ErrorHook, WebhookRuntime};
pub use error::RuntimeError;
