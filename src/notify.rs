//! Outbound notifications.
//!
//! The [`AlertDispatcher`] subscribes to alert events on the bus and
//! forwards them to whichever [`Notifier`] is configured. Delivery
//! failures surface as handler errors, which the bus isolates and logs —
//! a broken Telegram token can never stall the scan cycle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use tracing::debug;

use crate::events::{Event, EventHandler};
use crate::rate_limit::TokenBucketRateLimiter;

/// Delivery channel abstraction.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &str;
    async fn send_alert(&self, title: &str, body: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram bot notifier.
pub struct TelegramNotifier {
    http: Client,
    token: Secret<String>,
    chat_id: String,
    limiter: Arc<TokenBucketRateLimiter>,
}

impl TelegramNotifier {
    pub fn new(
        token: String,
        chat_id: String,
        limiter: Arc<TokenBucketRateLimiter>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build Telegram HTTP client")?;
        Ok(Self {
            http,
            token: Secret::new(token),
            chat_id,
            limiter,
        })
    }

    fn message_url(&self, text: &str) -> String {
        format!(
            "{TELEGRAM_API}/bot{}/sendMessage?chat_id={}&text={}",
            self.token.expose_secret(),
            self.chat_id,
            urlencoding::encode(text)
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn channel(&self) -> &str {
        "telegram"
    }

    async fn send_alert(&self, title: &str, body: &str) -> Result<()> {
        self.limiter.acquire().await;

        let text = format!("{title}\n{body}");
        let url = self.message_url(&text);
        self.http
            .get(&url)
            .send()
            .await
            .context("Telegram request failed")?
            .error_for_status()
            .context("Telegram rejected the message")?;

        debug!(chat_id = %self.chat_id, "Telegram alert delivered");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bus adapter
// ---------------------------------------------------------------------------

/// Bus subscriber that forwards alert events to the notifier.
pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler for AlertDispatcher {
    fn name(&self) -> &str {
        "alert_dispatcher"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        match event {
            Event::AlertMessage(alert) => {
                self.notifier
                    .send_alert(&format!("[{}] {}", alert.severity, alert.title), &alert.body)
                    .await
            }
            Event::ExitAlert(exit) => {
                self.notifier
                    .send_alert(&format!("Exit: {}", exit.symbol), &exit.message)
                    .await
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AlertMessageEvent, AlertSeverity, EventBus, EventKind};
    use chrono::Utc;
    use std::sync::Mutex;

    struct CollectingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for CollectingNotifier {
        fn channel(&self) -> &str {
            "collecting"
        }
        async fn send_alert(&self, title: &str, body: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((title.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatcher_forwards_alert_messages() {
        let bus = EventBus::new();
        let notifier = Arc::new(CollectingNotifier {
            sent: Mutex::new(Vec::new()),
        });
        bus.subscribe(
            EventKind::AlertMessage,
            Arc::new(AlertDispatcher::new(notifier.clone())),
        );

        bus.emit(Event::AlertMessage(AlertMessageEvent {
            severity: AlertSeverity::Critical,
            title: "Circuit breaker tripped".into(),
            body: "3 stop-losses today".into(),
            at: Utc::now(),
        }))
        .await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "[CRITICAL] Circuit breaker tripped");
        assert_eq!(sent[0].1, "3 stop-losses today");
    }

    #[test]
    fn test_telegram_url_encodes_message() {
        let limiter = Arc::new(TokenBucketRateLimiter::new(1.0, None));
        let notifier =
            TelegramNotifier::new("123:abc".into(), "42".into(), limiter).unwrap();
        let url = notifier.message_url("P&L -120.50\nnext line");
        assert!(url.starts_with("https://api.telegram.org/bot123:abc/sendMessage?chat_id=42"));
        assert!(url.contains("P%26L"));
        assert!(!url.contains('\n'));
    }
}
