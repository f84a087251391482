// =============================================================================
// NotificationPort — fire-and-forget trade/system alerts
// =============================================================================
//
// All methods are fire-and-forget: failures are logged and never propagate
// to the caller, per spec. `LoggingNotifier` is the always-available default;
// `WebhookNotifier` posts JSON payloads to a configured URL (e.g. Slack/
// Discord incoming webhook), grounded on the reqwest usage already present
// for the Binance REST client.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::position::Position;

#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify_trade_opened(&self, position: &Position);
    async fn notify_trade_closed(&self, position: &Position);
    async fn notify_system_status(&self, status: &str);
    async fn notify_daily_summary(&self, summary: &str);
}

pub struct LoggingNotifier;

#[async_trait]
impl NotificationPort for LoggingNotifier {
    async fn notify_trade_opened(&self, position: &Position) {
        info!(
            id = %position.id,
            symbol = %position.symbol,
            side = %position.side,
            entry_price = %position.entry_price,
            "[notify] trade opened"
        );
    }

    async fn notify_trade_closed(&self, position: &Position) {
        info!(
            id = %position.id,
            symbol = %position.symbol,
            close_reason = ?position.close_reason,
            exit_price = ?position.exit_price,
            "[notify] trade closed"
        );
    }

    async fn notify_system_status(&self, status: &str) {
        info!(status, "[notify] system status");
    }

    async fn notify_daily_summary(&self, summary: &str) {
        info!(summary, "[notify] daily summary");
    }
}

pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, payload: serde_json::Value) {
        if let Err(e) = self.client.post(&self.url).json(&payload).send().await {
            warn!(error = %e, url = %self.url, "webhook notification failed");
        }
    }
}

#[async_trait]
impl NotificationPort for WebhookNotifier {
    async fn notify_trade_opened(&self, position: &Position) {
        self.post(json!({
            "event": "trade_opened",
            "id": position.id,
            "symbol": position.symbol,
            "side": position.side.to_string(),
            "entry_price": position.entry_price.to_string(),
        }))
        .await;
    }

    async fn notify_trade_closed(&self, position: &Position) {
        self.post(json!({
            "event": "trade_closed",
            "id": position.id,
            "symbol": position.symbol,
            "close_reason": position.close_reason.map(|r| r.to_string()),
            "exit_price": position.exit_price.map(|p| p.to_string()),
        }))
        .await;
    }

    async fn notify_system_status(&self, status: &str) {
        self.post(json!({ "event": "system_status", "status": status })).await;
    }

    async fn notify_daily_summary(&self, summary: &str) {
        self.post(json!({ "event": "daily_summary", "summary": summary })).await;
    }
}
