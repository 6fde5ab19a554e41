//! Outbound notification channel.
//!
//! Best effort by contract: messages are sent in call order, delivery is
//! never confirmed, and failures are logged rather than propagated. The
//! notifier is always passed in explicitly as `Arc<dyn Notifier>`.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::warn;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Posts `{"text": ...}` to a chat webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    hook_url: String,
}

impl WebhookNotifier {
    pub fn new(hook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            hook_url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, text: &str) {
        let outcome = self
            .client
            .post(&self.hook_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await;

        if let Err(err) = outcome {
            warn!("notification delivery failed: {err}");
        }
    }
}

/// In-memory notifier for tests: records every message.
#[derive(Default)]
pub struct BufferNotifier {
    messages: Mutex<Vec<String>>,
}

impl BufferNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("notifier lock poisoned").clone()
    }
}

#[async_trait]
impl Notifier for BufferNotifier {
    async fn send(&self, text: &str) {
        self.messages
            .lock()
            .expect("notifier lock poisoned")
            .push(text.to_string());
    }
}
