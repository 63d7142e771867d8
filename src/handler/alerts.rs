//! Alert formatting and dispatch
//!
//! Delivery and retry semantics belong to the sink; the handler sends
//! once and swallows failures.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AlertConfig;
use crate::error::{Error, Result};
use crate::handler::{TokenOrigin, TokenRecord};
use crate::queue::MessagePayload;
use crate::scorer::TokenVerdict;

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, destination_id: i64, text: &str) -> Result<()>;
}

/// Render an alert message for a scored token
pub fn format_alert(record: &TokenRecord, verdict: &TokenVerdict, payload: &MessagePayload) -> String {
    let correlation_id = Uuid::new_v4();
    let origin = match record.origin {
        TokenOrigin::Text => "text",
        TokenOrigin::Image => "image",
    };

    let mut lines = vec![
        "🚨 Token mention alert".to_string(),
        format!("Address: `{}`", record.address),
        format!(
            "Matched by: {} (confidence {:.2}, {} path)",
            record.matcher_name, record.confidence, origin
        ),
        format!(
            "Scores: safety {} / hype {}",
            verdict.safety_score, verdict.hype_score
        ),
    ];

    if !verdict.risk_factors.is_empty() {
        lines.push(format!("Risk factors: {}", verdict.risk_factors.join(", ")));
    }

    if let Some(ctx) = &record.context {
        if ctx.sentiment != 0.0 {
            lines.push(format!("Sentiment: {:+.2}", ctx.sentiment));
        }
        for (label, mentions) in [
            ("Price", &ctx.price_mentions),
            ("Change", &ctx.percentage_mentions),
            ("Holders", &ctx.holder_mentions),
            ("Mcap", &ctx.mcap_mentions),
        ] {
            if !mentions.is_empty() {
                lines.push(format!("{}: {}", label, mentions.join(", ")));
            }
        }
    }

    lines.push(format!("Message: {}", payload.message_id));
    lines.push(format!("Ref: {}", correlation_id));

    lines.join("\n")
}

/// Telegram Bot API sink
pub struct TelegramAlertSink {
    client: reqwest::Client,
    bot_token: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramAlertSink {
    pub fn new(config: &AlertConfig) -> Result<Self> {
        if config.bot_token.is_empty() {
            return Err(Error::Config("alert bot_token is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::AlertDispatch(format!("client build failed: {e}")))?;

        Ok(Self {
            client,
            bot_token: config.bot_token.clone(),
        })
    }
}

#[async_trait]
impl AlertSink for TelegramAlertSink {
    async fn send(&self, destination_id: i64, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": destination_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await
            .map_err(|e| Error::AlertDispatch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::AlertDispatch(format!(
                "sendMessage returned {}",
                response.status()
            )));
        }

        let body: SendMessageResponse = response
            .json()
            .await
            .map_err(|e| Error::AlertDispatch(format!("bad sendMessage body: {e}")))?;

        if !body.ok {
            return Err(Error::AlertDispatch(
                body.description.unwrap_or_else(|| "ok=false".into()),
            ));
        }

        debug!(destination_id, "alert delivered");
        Ok(())
    }
}

/// Dry-run sink: logs instead of sending
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, destination_id: i64, text: &str) -> Result<()> {
        info!(destination_id, "[dry-run] alert:\n{}", text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::TokenContext;

    fn record(context: Option<TokenContext>) -> TokenRecord {
        TokenRecord {
            address: "7EYnhQoR9YM3N7UoaKRoA44Uy8JeaZV3qyouov87awMs".into(),
            matcher_name: "pump_fun",
            confidence: 1.0,
            context,
            origin: TokenOrigin::Text,
        }
    }

    fn payload() -> MessagePayload {
        MessagePayload {
            text: Some("hello".into()),
            attachment_urls: vec![],
            message_id: 42,
        }
    }

    #[test]
    fn test_format_alert_minimal() {
        let verdict = TokenVerdict {
            safety_score: 70,
            hype_score: 20,
            risk_factors: vec![],
        };
        let text = format_alert(&record(None), &verdict, &payload());

        assert!(text.contains("7EYnhQoR9YM3N7UoaKRoA44Uy8JeaZV3qyouov87awMs"));
        assert!(text.contains("safety 70 / hype 20"));
        assert!(!text.contains("Risk factors"));
        assert!(text.contains("Message: 42"));
    }

    #[test]
    fn test_format_alert_with_context() {
        let ctx = TokenContext::from_window(
            "7EYnhQoR9YM3N7UoaKRoA44Uy8JeaZV3qyouov87awMs".into(),
            "pump_fun",
            1.0,
            "moon gem, 50K holders, up 120%",
        );
        let verdict = TokenVerdict {
            safety_score: 80,
            hype_score: 90,
            risk_factors: vec!["fresh deployer".into()],
        };
        let text = format_alert(&record(Some(ctx)), &verdict, &payload());

        assert!(text.contains("Risk factors: fresh deployer"));
        assert!(text.contains("Holders: 50K holders"));
        assert!(text.contains("Change: 120%"));
        assert!(text.contains("Sentiment: +1.00"));
    }

    #[test]
    fn test_sink_requires_token() {
        let config = AlertConfig::default();
        assert!(TelegramAlertSink::new(&config).is_err());
    }
}
