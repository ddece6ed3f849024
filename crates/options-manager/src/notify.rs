//! Owner notifications.
//!
//! Delivery is fire-and-forget: [`notify_owner`] logs a failed send and never
//! returns it to the caller.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info};

/// Default Telegram Bot API base URL.
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Sends a text message to the owner of a schedule or execution.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, owner: &str, text: &str) -> Result<()>;
}

/// Sends and swallows the outcome.
pub async fn notify_owner(notifier: &dyn Notifier, owner: &str, text: &str) {
    if let Err(e) = notifier.send(owner, text).await {
        error!(owner, error = %e, "Failed to notify owner");
    }
}

/// Writes messages to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, owner: &str, text: &str) -> Result<()> {
        info!(owner, message = text, "Notification");
        Ok(())
    }
}

/// Keeps every message in memory, in send order.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl MemoryNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(owner, text)` pairs.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn messages_for(&self, owner: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(o, _)| o == owner)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, owner: &str, text: &str) -> Result<()> {
        self.sent.lock().push((owner.to_string(), text.to_string()));
        Ok(())
    }
}

/// Telegram Bot API sink; the owner id is the chat id.
pub struct TelegramNotifier {
    http: Client,
    base_url: String,
    bot_token: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: TELEGRAM_API_URL.to_string(),
            bot_token: bot_token.into(),
        }
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, owner: &str, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "chat_id": owner,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("telegram error {status}: {body}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn telegram_posts_html_message_to_chat() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(json!({
                "chat_id": "42",
                "text": "<b>done</b>",
                "parse_mode": "HTML"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let notifier = TelegramNotifier::new("TOKEN").with_base_url(mock_server.uri());
        notifier.send("42", "<b>done</b>").await.unwrap();
    }

    #[tokio::test]
    async fn telegram_error_status_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("bot was blocked"))
            .mount(&mock_server)
            .await;

        let notifier = TelegramNotifier::new("TOKEN").with_base_url(mock_server.uri());
        let err = notifier.send("42", "hi").await.unwrap_err();
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("bot was blocked"));
    }

    #[tokio::test]
    async fn notify_owner_swallows_failures() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let notifier = TelegramNotifier::new("TOKEN").with_base_url(mock_server.uri());
        // Returns unit; reaching the next line is the assertion.
        notify_owner(&notifier, "42", "hi").await;
    }

    #[tokio::test]
    async fn memory_notifier_records_in_order() {
        let notifier = MemoryNotifier::new();
        notify_owner(&notifier, "a", "one").await;
        notify_owner(&notifier, "b", "two").await;
        notify_owner(&notifier, "a", "three").await;
        assert_eq!(notifier.messages().len(), 3);
        assert_eq!(notifier.messages_for("a"), vec!["one", "three"]);
    }
}
