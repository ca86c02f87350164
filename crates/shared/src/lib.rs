pub mod chat;

pub mod settings {
    use serde::{Deserialize, Serialize};

    fn default_timeout_secs() -> u64 {
        120
    }

    /// Construction-time configuration for the webhook runtime.
    ///
    /// `context` is free-form key-value data describing the embedding site,
    /// user, and page; it is forwarded verbatim with every turn and never
    /// inspected by the runtime.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RuntimeSettings {
        pub webhook_url: String,
        /// Stable per-visitor conversation id. Generated when absent.
        #[serde(default)]
        pub session_id: Option<String>,
        #[serde(default)]
        pub context: serde_json::Value,
        /// Connect timeout for the webhook call.
        #[serde(default = "default_timeout_secs")]
        pub timeout_secs: u64,
    }

    impl RuntimeSettings {
        pub fn new(webhook_url: impl Into<String>) -> Self {
            Self {
                webhook_url: webhook_url.into(),
                session_id: None,
                context: serde_json::Value::Null,
                timeout_secs: default_timeout_secs(),
            }
        }

        /// The configured session id, or a fresh v4 UUID.
        pub fn resolve_session_id(&self) -> String {
            self.session_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
        }
    }

}
