//! Outbound notification
//!
//! Pushes alert summaries to a Telegram bot. Configured entirely from the
//! environment (`TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`); when either is
//! missing, notification degrades to a no-op. Failures are logged and
//! swallowed so the alert pipeline is never blocked.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::alert::Alert;
use crate::geoip::GeoInfo;

/// Alert notification transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert, geo: &GeoInfo);
}

/// Transport used when no notifier is configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _alert: &Alert, _geo: &GeoInfo) {}
}

/// Telegram bot transport.
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    /// Build from the environment; `None` when not configured.
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok()?;
        if bot_token.is_empty() || chat_id.is_empty() {
            return None;
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        Some(Self {
            bot_token,
            chat_id,
            client,
        })
    }

    fn format_message(alert: &Alert, geo: &GeoInfo) -> String {
        format!(
            "*Security Alert*\n\n\
             *Category:* {}\n\
             *Message:* {}\n\
             *Source:* `{}`\n\
             *Country:* {}\n\
             *Time:* {}\n\n\
             *Severity:* {}",
            alert.category,
            alert.message,
            alert.source,
            geo.country,
            alert.timestamp.to_rfc3339(),
            alert.severity.to_string().to_uppercase(),
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, alert: &Alert, geo: &GeoInfo) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": Self::format_message(alert, geo),
            "parse_mode": "Markdown",
        });

        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(category = %alert.category, "notification sent");
            }
            Ok(response) => {
                warn!(status = %response.status(), "notification API error");
            }
            Err(e) => {
                warn!(error = %e, "failed to send notification");
            }
        }
    }
}

/// Pick the configured transport, or the no-op fallback.
pub fn from_env() -> Arc<dyn Notifier> {
    match TelegramNotifier::from_env() {
        Some(notifier) => {
            info!("chat notifications enabled");
            Arc::new(notifier)
        }
        None => {
            debug!("chat notifications not configured");
            Arc::new(NullNotifier)
        }
    }
}
