//! The runtime adapter: one webhook POST per conversation turn, reply
//! snapshots out over a channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use shared::chat::{ConversationMessage, Role, RunResult, StreamEvent};
use shared::settings::RuntimeSettings;

use crate::accumulator::TextAccumulator;
use crate::dispatch::{classify, extract_reply_text, ResponseShape};
use crate::error::RuntimeError;
use crate::sse::SseParser;

/// Hook invoked exactly once per failed run, before the error is returned to
/// the caller. The runtime performs no retries and no suppression; what to
/// show the user is the host's decision.
pub type ErrorHook = Arc<dyn Fn(&RuntimeError) + Send + Sync>;

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    action: &'static str,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
    messages: Vec<WireMessage>,
    context: &'a Value,
}

/// History entry as the webhook sees it: text only, attachments stripped.
#[derive(Serialize)]
struct WireMessage {
    role: Role,
    content: String,
}

// ── Adapter ──────────────────────────────────────────────────────────

/// Outcome of one decoded stream event.
enum Flow {
    Continue,
    Finished,
}

struct ActiveRun {
    id: u64,
    token: CancellationToken,
}

/// Sends conversation turns to a workflow webhook and normalizes whatever
/// comes back (SSE stream, single JSON document, or plain text) into an
/// ordered sequence of growing [`RunResult`] snapshots.
pub struct WebhookRuntime {
    http: Client,
    settings: RuntimeSettings,
    session_id: String,
    on_error: Option<ErrorHook>,
    active: Mutex<Option<ActiveRun>>,
    run_counter: AtomicU64,
}

impl WebhookRuntime {
    pub fn new(settings: RuntimeSettings) -> Result<Self, RuntimeError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(settings.timeout_secs))
            .pool_max_idle_per_host(2)
            .build()?;
        let session_id = settings.resolve_session_id();
        Ok(Self {
            http,
            settings,
            session_id,
            on_error: None,
            active: Mutex::new(None),
            run_counter: AtomicU64::new(0),
        })
    }

    /// Install the host's error callback.
    pub fn on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send the conversation and deliver reply snapshots over `tx`, strictly
    /// in arrival order. Returns when the reply completes, the run fails, or
    /// cancellation is observed. Cancellation is not an error: the snapshot
    /// sequence simply ends and `Ok(())` is returned.
    ///
    /// Each invocation owns fresh state; hosts sharing one display surface
    /// are expected to `cancel()` before starting the next run.
    pub async fn run(
        &self,
        history: &[ConversationMessage],
        tx: UnboundedSender<RunResult>,
    ) -> Result<(), RuntimeError> {
        let (run_id, cancel) = self.begin_run();
        let result = self.run_inner(history, &tx, &cancel).await;
        self.end_run(run_id);
        if let Err(err) = &result {
            if let Some(hook) = &self.on_error {
                hook(err);
            }
        }
        result
    }

    /// Cancel the most recently started run, if one is still in flight.
    /// Aborts the network operation at its next suspension point.
    pub fn cancel(&self) {
        if let Some(active) = self.active.lock().take() {
            active.token.cancel();
        }
    }

    fn begin_run(&self) -> (u64, CancellationToken) {
        let id = self.run_counter.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *self.active.lock() = Some(ActiveRun {
            id,
            token: token.clone(),
        });
        (id, token)
    }

    fn end_run(&self, id: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }

    fn build_request<'a>(&'a self, history: &[ConversationMessage]) -> SendMessageRequest<'a> {
        let messages = history
            .iter()
            .map(|m| WireMessage {
                role: m.role,
                content: m.text(),
            })
            .collect();
        SendMessageRequest {
            action: "sendMessage",
            session_id: &self.session_id,
            messages,
            context: &self.settings.context,
        }
    }

    async fn run_inner(
        &self,
        history: &[ConversationMessage],
        tx: &UnboundedSender<RunResult>,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let request = self.build_request(history);
        debug!(
            url = %self.settings.webhook_url,
            messages = request.messages.len(),
            "sending conversation turn"
        );

        let send = self
            .http
            .post(&self.settings.webhook_url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&request)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("cancelled while awaiting response headers");
                return Ok(());
            }
            response = send => response?,
        };

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let shape = classify(&content_type);
        debug!(?shape, %content_type, "dispatching response");

        match shape {
            ResponseShape::Streaming => self.pump_stream(response, tx, cancel).await,
            ResponseShape::SingleJson => {
                let body = response.text().await?;
                let text = match serde_json::from_str::<Value>(&body) {
                    Ok(doc) => extract_reply_text(&doc),
                    // Mislabeled content type: fall back to the raw body.
                    Err(_) => body,
                };
                let _ = tx.send(RunResult::text_snapshot(text));
                Ok(())
            }
            ResponseShape::PlainText => {
                let body = response.text().await?;
                let _ = tx.send(RunResult::text_snapshot(body));
                Ok(())
            }
        }
    }

    async fn pump_stream(
        &self,
        response: reqwest::Response,
        tx: &UnboundedSender<RunResult>,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let mut parser = SseParser::new();
        let mut accumulator = TextAccumulator::new();
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("cancelled mid-stream");
                    return Ok(());
                }
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let bytes = chunk
                .map_err(|e| RuntimeError::Transport(format!("stream read error: {}", e)))?;
            for event in parser.feed(&bytes) {
                match Self::handle_event(event, &mut accumulator, tx)? {
                    Flow::Continue => {}
                    // Stop at the sentinel even when more bytes follow it.
                    Flow::Finished => return Ok(()),
                }
            }
        }

        // The connection can close without a trailing newline; the leftover
        // buffer may still carry one final event.
        if let Some(event) = parser.finish() {
            Self::handle_event(event, &mut accumulator, tx)?;
        }
        Ok(())
    }

    fn handle_event(
        event: StreamEvent,
        accumulator: &mut TextAccumulator,
        tx: &UnboundedSender<RunResult>,
    ) -> Result<Flow, RuntimeError> {
        match event {
            StreamEvent::Done => Ok(Flow::Finished),
            StreamEvent::Error(message) => Err(RuntimeError::Stream(message)),
            event => {
                if let Some(snapshot) = accumulator.apply(&event) {
                    let _ = tx.send(snapshot);
                }
                Ok(Flow::Continue)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::chat::ContentPart;
    use std::io::Write as _;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn runtime_for(url: String) -> WebhookRuntime {
        let mut settings = RuntimeSettings::new(url);
        settings.session_id = Some("test-session".into());
        WebhookRuntime::new(settings).unwrap()
    }

    fn drain(rx: &mut UnboundedReceiver<RunResult>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(snapshot) = rx.try_recv() {
            out.push(snapshot.text().to_string());
        }
        out
    }

    #[test]
    fn test_wire_payload_shape() {
        let mut settings = RuntimeSettings::new("https://example.test/hook");
        settings.session_id = Some("sess-1".into());
        settings.context = serde_json::json!({"page": "/pricing"});
        let runtime = WebhookRuntime::new(settings).unwrap();

        let history = vec![ConversationMessage {
            role: Role::User,
            content: vec![
                ContentPart::text("hello"),
                ContentPart::Image {
                    url: "https://cdn.example.test/x.png".into(),
                    filename: None,
                    mime_type: None,
                },
            ],
        }];
        let payload = serde_json::to_value(runtime.build_request(&history)).unwrap();

        assert_eq!(payload["action"], "sendMessage");
        assert_eq!(payload["sessionId"], "sess-1");
        assert_eq!(
            payload["messages"],
            serde_json::json!([{"role": "user", "content": "hello"}])
        );
        assert_eq!(payload["context"]["page"], "/pricing");
    }

    #[tokio::test]
    async fn test_sse_stream_accumulates_snapshots() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/hook")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"text\":\"Hel\"}\n\ndata: {\"text\":\"lo\"}\n\ndata: [DONE]\n\n")
            .create_async()
            .await;

        let runtime = runtime_for(format!("{}/hook", server.url()));
        let (tx, mut rx) = unbounded_channel();
        let history = vec![ConversationMessage::user("hi")];
        runtime.run(&history, tx).await.unwrap();

        assert_eq!(drain(&mut rx), vec!["Hel", "Hello"]);
    }

    #[tokio::test]
    async fn test_done_sentinel_stops_processing_trailing_bytes() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/hook")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"text\":\"hi\"}\ndata: [DONE]\ndata: {\"text\":\"ignored\"}\n")
            .create_async()
            .await;

        let runtime = runtime_for(format!("{}/hook", server.url()));
        let (tx, mut rx) = unbounded_channel();
        runtime
            .run(&[ConversationMessage::user("hi")], tx)
            .await
            .unwrap();

        assert_eq!(drain(&mut rx), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_stream_without_trailing_newline_is_flushed() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/hook")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"text\":\"partial\"}\ndata: {\"text\":\" tail\"}")
            .create_async()
            .await;

        let runtime = runtime_for(format!("{}/hook", server.url()));
        let (tx, mut rx) = unbounded_channel();
        runtime
            .run(&[ConversationMessage::user("hi")], tx)
            .await
            .unwrap();

        assert_eq!(drain(&mut rx), vec!["partial", "partial tail"]);
    }

    #[tokio::test]
    async fn test_json_response_single_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/hook")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{\"output\":\"hello\"}")
            .create_async()
            .await;

        let runtime = runtime_for(format!("{}/hook", server.url()));
        let (tx, mut rx) = unbounded_channel();
        runtime
            .run(&[ConversationMessage::user("hi")], tx)
            .await
            .unwrap();

        assert_eq!(drain(&mut rx), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_plain_text_response_single_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/hook")
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body("hi there")
            .create_async()
            .await;

        let runtime = runtime_for(format!("{}/hook", server.url()));
        let (tx, mut rx) = unbounded_channel();
        runtime
            .run(&[ConversationMessage::user("hi")], tx)
            .await
            .unwrap();

        assert_eq!(drain(&mut rx), vec!["hi there"]);
    }

    #[tokio::test]
    async fn test_http_error_short_circuits_with_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/hook")
            .with_status(503)
            .with_body("upstream down")
            .create_async()
            .await;

        let runtime = runtime_for(format!("{}/hook", server.url()));
        let (tx, mut rx) = unbounded_channel();
        let err = runtime
            .run(&[ConversationMessage::user("hi")], tx)
            .await
            .unwrap_err();

        assert!(drain(&mut rx).is_empty());
        match &err {
            RuntimeError::Http { status, body } => {
                assert_eq!(*status, 503);
                assert_eq!(body, "upstream down");
            }
            other => panic!("expected http error, got {:?}", other),
        }
        assert!(err.to_string().contains("upstream down"));
    }

    #[tokio::test]
    async fn test_mid_stream_error_keeps_partial_snapshots() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/hook")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"text\":\"partial\"}\ndata: {\"error\":\"boom\"}\n")
            .create_async()
            .await;

        let runtime = runtime_for(format!("{}/hook", server.url()));
        let (tx, mut rx) = unbounded_channel();
        let err = runtime
            .run(&[ConversationMessage::user("hi")], tx)
            .await
            .unwrap_err();

        assert_eq!(drain(&mut rx), vec!["partial"]);
        match err {
            RuntimeError::Stream(msg) => assert_eq!(msg, "boom"),
            other => panic!("expected stream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_hook_fires_exactly_once() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/hook")
            .with_status(500)
            .with_body("nope")
            .create_async()
            .await;

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut settings = RuntimeSettings::new(format!("{}/hook", server.url()));
        settings.session_id = Some("test-session".into());
        let runtime = WebhookRuntime::new(settings).unwrap().on_error(Arc::new(
            move |_err: &RuntimeError| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        ));

        let (tx, _rx) = unbounded_channel();
        assert!(runtime.run(&[ConversationMessage::user("hi")], tx).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_ends_run_cleanly() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/hook")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_chunked_body(|w| loop {
                w.write_all(b"data: {\"text\":\"tick\"}\n\n")?;
                w.flush()?;
                std::thread::sleep(Duration::from_millis(20));
            })
            .create_async()
            .await;

        let runtime = Arc::new(runtime_for(format!("{}/hook", server.url())));

        // Two full cancel/run cycles against the same endpoint.
        for _ in 0..2 {
            let (tx, mut rx) = unbounded_channel();
            let rt = runtime.clone();
            let handle = tokio::spawn(async move {
                rt.run(&[ConversationMessage::user("hi")], tx).await
            });

            // Observe two snapshots, then cancel.
            let first = rx.recv().await.expect("first snapshot");
            let second = rx.recv().await.expect("second snapshot");
            assert_eq!(first.text(), "tick");
            assert_eq!(second.text(), "ticktick");
            runtime.cancel();

            // Cancellation is not an error, and the sequence ends.
            handle.await.unwrap().unwrap();
            while rx.recv().await.is_some() {}
        }
    }

    #[tokio::test]
    async fn test_cancel_with_no_active_run_is_a_no_op() {
        let runtime = runtime_for("http://127.0.0.1:9/hook".into());
        runtime.cancel();
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Port 9 (discard) is not listening.
        let runtime = runtime_for("http://127.0.0.1:9/hook".into());
        let (tx, mut rx) = unbounded_channel();
        let err = runtime
            .run(&[ConversationMessage::user("hi")], tx)
            .await
            .unwrap_err();

        assert!(drain(&mut rx).is_empty());
        assert!(matches!(err, RuntimeError::Transport(_)));
    }
}
