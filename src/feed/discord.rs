//! Discord gateway feed
//!
//! Maintains a gateway websocket session (hello, identify, heartbeat)
//! and forwards MESSAGE_CREATE dispatches as inbound events. Bot
//! authors are ignored so the pipeline does not feed on its own
//! alerts or other bots' spam.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DiscordConfig;
use crate::error::{Error, Result};
use crate::feed::InboundEvent;

// Gateway intents: GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = 1 | (1 << 9) | (1 << 15);

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    d: Option<Value>,
    s: Option<u64>,
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    id: String,
    channel_id: String,
    content: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
    author: Option<Author>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Author {
    #[serde(default)]
    bot: bool,
}

/// Discord gateway websocket client feeding the ingest channel
pub struct DiscordFeed {
    config: DiscordConfig,
    event_tx: async_channel::Sender<InboundEvent>,
}

impl DiscordFeed {
    pub fn new(config: DiscordConfig, event_tx: async_channel::Sender<InboundEvent>) -> Result<Self> {
        if config.bot_token.is_empty() {
            return Err(Error::Config("discord bot_token is empty".into()));
        }

        Ok(Self { config, event_tx })
    }

    /// Connect and stream until shutdown, reconnecting on failure
    pub async fn run(&self, cancel: CancellationToken) {
        info!("discord feed started");

        let mut reconnect_attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.connect_and_stream(&cancel).await {
                Ok(()) => {
                    // Clean shutdown
                    break;
                }
                Err(e) => {
                    reconnect_attempts += 1;
                    warn!(error = %e, attempt = reconnect_attempts, "discord gateway dropped");

                    if self.config.max_reconnect_attempts > 0
                        && reconnect_attempts >= self.config.max_reconnect_attempts
                    {
                        error!(
                            "discord feed giving up after {} attempts",
                            reconnect_attempts
                        );
                        break;
                    }

                    sleep(Duration::from_millis(
                        self.config.reconnect_delay_ms * reconnect_attempts as u64,
                    ))
                    .await;
                }
            }
        }

        info!("discord feed stopped");
    }

    async fn connect_and_stream(&self, cancel: &CancellationToken) -> Result<()> {
        let url = url::Url::parse(&self.config.gateway_url)
            .map_err(|e| Error::DiscordGateway(format!("bad gateway url: {e}")))?;

        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| Error::DiscordGateway(format!("connect failed: {e}")))?;
        let (mut write, mut read) = ws.split();

        // First frame must be Hello with the heartbeat interval
        let heartbeat_ms = match read.next().await {
            Some(Ok(Message::Text(text))) => {
                let payload: GatewayPayload = serde_json::from_str(&text)
                    .map_err(|e| Error::DiscordGateway(format!("bad hello: {e}")))?;
                if payload.op != 10 {
                    return Err(Error::DiscordGateway(format!(
                        "expected hello, got op {}",
                        payload.op
                    )));
                }
                payload
                    .d
                    .as_ref()
                    .and_then(|d| d.get("heartbeat_interval"))
                    .and_then(Value::as_u64)
                    .ok_or_else(|| Error::DiscordGateway("hello missing interval".into()))?
            }
            other => {
                return Err(Error::DiscordGateway(format!(
                    "unexpected first frame: {other:?}"
                )))
            }
        };

        let identify = json!({
            "op": 2,
            "d": {
                "token": self.config.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "mention-radar",
                    "device": "mention-radar",
                },
            },
        });
        write
            .send(Message::Text(identify.to_string()))
            .await
            .map_err(|e| Error::DiscordGateway(format!("identify failed: {e}")))?;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_ms));
        let mut last_seq: Option<u64> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    let beat = json!({"op": 1, "d": last_seq});
                    write
                        .send(Message::Text(beat.to_string()))
                        .await
                        .map_err(|e| Error::DiscordGateway(format!("heartbeat failed: {e}")))?;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(seq) = self.handle_frame(&text).await? {
                            last_seq = Some(seq);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(Error::FeedDisconnected(format!(
                            "gateway closed: {frame:?}"
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(Error::DiscordGateway(e.to_string()));
                    }
                    None => {
                        return Err(Error::FeedDisconnected("gateway stream ended".into()));
                    }
                }
            }
        }
    }

    /// Process one gateway frame; returns the sequence number if the
    /// frame carried one.
    async fn handle_frame(&self, text: &str) -> Result<Option<u64>> {
        let payload: GatewayPayload = match serde_json::from_str(text) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "unparseable gateway frame");
                return Ok(None);
            }
        };

        match payload.op {
            // Dispatch
            0 => {
                if payload.t.as_deref() == Some("MESSAGE_CREATE") {
                    if let Some(d) = payload.d {
                        self.forward_message(d).await?;
                    }
                }
            }
            // Reconnect / invalid session: force a fresh connection
            7 | 9 => {
                return Err(Error::DiscordGateway(format!(
                    "gateway requested reconnect (op {})",
                    payload.op
                )));
            }
            // Heartbeat ack and anything else: nothing to do
            _ => {}
        }

        Ok(payload.s)
    }

    async fn forward_message(&self, d: Value) -> Result<()> {
        let message: MessageCreate = match serde_json::from_value(d) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "unparseable MESSAGE_CREATE");
                return Ok(());
            }
        };

        if message.author.as_ref().map(|a| a.bot).unwrap_or(false) {
            return Ok(());
        }

        let Some(event) = Self::to_event(message) else {
            return Ok(());
        };

        self.event_tx
            .send(event)
            .await
            .map_err(|_| Error::QueueClosed)
    }

    /// Snowflake ids are 64-bit; channel id becomes the source id
    fn to_event(message: MessageCreate) -> Option<InboundEvent> {
        let source_id = message.channel_id.parse::<i64>().ok()?;
        let message_id = message.id.parse::<i64>().ok()?;

        let text = if message.content.is_empty() {
            None
        } else {
            Some(message.content)
        };
        let attachment_urls: Vec<String> =
            message.attachments.into_iter().map(|a| a.url).collect();

        if text.is_none() && attachment_urls.is_empty() {
            return None;
        }

        Some(InboundEvent {
            source_id,
            text,
            attachment_urls,
            message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str, attachments: Vec<&str>, bot: bool) -> MessageCreate {
        MessageCreate {
            id: "111111111111111111".into(),
            channel_id: "222222222222222222".into(),
            content: content.into(),
            attachments: attachments
                .into_iter()
                .map(|url| Attachment { url: url.into() })
                .collect(),
            author: Some(Author { bot }),
        }
    }

    #[test]
    fn test_feed_requires_token() {
        let (tx, _rx) = async_channel::bounded(8);
        assert!(DiscordFeed::new(DiscordConfig::default(), tx).is_err());
    }

    #[test]
    fn test_to_event_parses_snowflakes() {
        let event = DiscordFeed::to_event(message("gm", vec![], false)).unwrap();
        assert_eq!(event.source_id, 222222222222222222);
        assert_eq!(event.message_id, 111111111111111111);
        assert_eq!(event.text.as_deref(), Some("gm"));
    }

    #[test]
    fn test_to_event_attachment_only() {
        let event =
            DiscordFeed::to_event(message("", vec!["https://cdn.discordapp.com/x.png"], false))
                .unwrap();
        assert!(event.text.is_none());
        assert_eq!(event.attachment_urls.len(), 1);
    }

    #[test]
    fn test_to_event_empty_message_is_skipped() {
        assert!(DiscordFeed::to_event(message("", vec![], false)).is_none());
    }

    #[test]
    fn test_gateway_payload_shapes() {
        let hello: GatewayPayload =
            serde_json::from_str(r#"{"op":10,"d":{"heartbeat_interval":41250},"s":null,"t":null}"#)
                .unwrap();
        assert_eq!(hello.op, 10);

        let dispatch: GatewayPayload = serde_json::from_str(
            r#"{"op":0,"s":3,"t":"MESSAGE_CREATE","d":{"id":"1","channel_id":"2","content":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(dispatch.s, Some(3));
        assert_eq!(dispatch.t.as_deref(), Some("MESSAGE_CREATE"));
    }
}
