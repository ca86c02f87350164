//! Terminal host for the webhook chat runtime.
//!
//! Stands in for an embedded chat widget: each typed line becomes a user
//! turn, reply snapshots stream to the terminal as they arrive, and Ctrl-C
//! cancels the in-flight turn without ending the session.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use runtime::WebhookRuntime;
use shared::chat::{ConversationMessage, RunResult};
use shared::settings::RuntimeSettings;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let webhook_url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WEBHOOK_URL").ok())
        .ok_or_else(|| anyhow!("usage: hookchat <webhook-url> (or set WEBHOOK_URL)"))?;

    let mut settings = RuntimeSettings::new(webhook_url);
    settings.context = serde_json::json!({
        "source": "terminal",
        "platform": std::env::consts::OS,
    });

    let runtime = Arc::new(
        WebhookRuntime::new(settings)?.on_error(Arc::new(|err| {
            eprintln!("\n[error] {}", err);
        })),
    );

    println!("session {}", runtime.session_id());
    println!("type a message and press enter; Ctrl-C cancels a streaming reply; /quit exits.\n");

    let mut history: Vec<ConversationMessage> = Vec::new();
    let stdin = io::stdin();

    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        history.push(ConversationMessage::user(line));

        let (tx, mut rx) = mpsc::unbounded_channel::<RunResult>();
        let rt = runtime.clone();
        let turn_history = history.clone();
        let run = tokio::spawn(async move { rt.run(&turn_history, tx).await });

        let mut shown = 0usize;
        let mut reply = String::new();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    runtime.cancel();
                }
                snapshot = rx.recv() => {
                    let Some(snapshot) = snapshot else { break };
                    let text = snapshot.text().to_string();
                    // Snapshots are append-only; print just the new tail.
                    let tail: String = text.chars().skip(shown).collect();
                    print!("{}", tail);
                    io::stdout().flush()?;
                    shown = text.chars().count();
                    reply = text;
                }
            }
        }
        println!();

        match run.await? {
            Ok(()) => {
                if !reply.is_empty() {
                    history.push(ConversationMessage::assistant(reply));
                }
            }
            Err(_) => {
                // The hook already reported it; keep the session alive so
                // the user can retry.
            }
        }
    }

    Ok(())
}
