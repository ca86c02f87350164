//! Failure taxonomy surfaced to hosts.

use thiserror::Error;

/// Terminal failures for one run. Cancellation is deliberate and is never
/// represented here; a cancelled run simply ends its snapshot sequence.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The request never completed: DNS, connect, TLS, or timeout failure.
    #[error("webhook request failed: {0}")]
    Transport(String),

    /// The endpoint answered with an error status. The body is kept as
    /// diagnostic text.
    #[error("webhook returned {status}: {body}")]
    Http { status: u16, body: String },

    /// The stream itself reported an error payload mid-flight. Snapshots
    /// already delivered remain valid.
    #[error("stream error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for RuntimeError {
    fn from(err: reqwest::Error) -> Self {
        RuntimeError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_message_carries_body() {
        let err = RuntimeError::Http {
            status: 503,
            body: "upstream down".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("upstream down"));
    }
}
