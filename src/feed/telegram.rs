//! Telegram feed
//!
//! Long-polls the Bot API for updates and converts messages (and
//! channel posts) into inbound events. Photo attachments are resolved
//! to download URLs via getFile so the image path can fetch them later
//! without holding Telegram file handles.

use backoff::{future::retry, ExponentialBackoff};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TelegramConfig;
use crate::error::{Error, Result};
use crate::feed::InboundEvent;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    result: Option<Vec<Update>>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
    channel_post: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: TgChat,
    text: Option<String>,
    caption: Option<String>,
    photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct GetFileResponse {
    ok: bool,
    result: Option<TgFile>,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_path: Option<String>,
}

/// Telegram long-poll client feeding the ingest channel
pub struct TelegramFeed {
    config: TelegramConfig,
    client: reqwest::Client,
    event_tx: async_channel::Sender<InboundEvent>,
}

impl TelegramFeed {
    pub fn new(
        config: TelegramConfig,
        event_tx: async_channel::Sender<InboundEvent>,
    ) -> Result<Self> {
        if config.bot_token.is_empty() {
            return Err(Error::Config("telegram bot_token is empty".into()));
        }

        // Long poll: the HTTP timeout must outlive the poll timeout
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs as u64 + 10))
            .build()
            .map_err(|e| Error::TelegramApi(format!("client build failed: {e}")))?;

        Ok(Self {
            config,
            client,
            event_tx,
        })
    }

    /// Poll until shutdown. Transient API failures back off and retry;
    /// repeated failures past max_reconnect_attempts stop the feed.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("telegram feed started");

        let mut offset: Option<i64> = None;
        let mut failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let poll = tokio::select! {
                result = self.poll_once(&mut offset) => result,
                _ = cancel.cancelled() => break,
            };

            match poll {
                Ok(count) => {
                    failures = 0;
                    if count > 0 {
                        debug!(count, "telegram updates forwarded");
                    }
                }
                Err(Error::QueueClosed) => break,
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, attempt = failures, "telegram poll failed");

                    if self.config.max_reconnect_attempts > 0
                        && failures >= self.config.max_reconnect_attempts
                    {
                        error!("telegram feed giving up after {} failures", failures);
                        break;
                    }

                    sleep(Duration::from_millis(
                        self.config.reconnect_delay_ms * failures as u64,
                    ))
                    .await;
                }
            }
        }

        info!("telegram feed stopped");
    }

    /// One getUpdates round trip; advances the offset past everything
    /// received so updates are consumed exactly once.
    async fn poll_once(&self, offset: &mut Option<i64>) -> Result<usize> {
        let updates = self.get_updates(*offset).await?;

        if let Some(last) = updates.last() {
            *offset = Some(last.update_id + 1);
        }

        let mut forwarded = 0;
        for update in updates {
            if let Some(event) = self.update_to_event(update).await {
                self.event_tx
                    .send(event)
                    .await
                    .map_err(|_| Error::QueueClosed)?;
                forwarded += 1;
            }
        }

        Ok(forwarded)
    }

    async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let url = format!(
            "{}/bot{}/getUpdates",
            TELEGRAM_API_BASE, self.config.bot_token
        );

        let mut query = vec![("timeout", self.config.poll_timeout_secs.to_string())];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        // Retry transient transport errors with exponential backoff;
        // an HTTP-level error surfaces to the caller's failure counter
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let response = retry(policy, || async {
            self.client
                .get(&url)
                .query(&query)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(Error::TelegramApi(e.to_string())))
        })
        .await?;

        if !response.status().is_success() {
            return Err(Error::TelegramApi(format!(
                "getUpdates returned {}",
                response.status()
            )));
        }

        let body: GetUpdatesResponse = response
            .json()
            .await
            .map_err(|e| Error::TelegramApi(format!("bad getUpdates body: {e}")))?;

        if !body.ok {
            return Err(Error::TelegramApi("getUpdates ok=false".into()));
        }

        Ok(body.result.unwrap_or_default())
    }

    /// Convert an update to an inbound event. Returns None for updates
    /// with nothing to extract.
    async fn update_to_event(&self, update: Update) -> Option<InboundEvent> {
        let message = update.message.or(update.channel_post)?;
        let text = message.text.or(message.caption);

        let mut attachment_urls = Vec::new();
        if let Some(photo) = message.photo {
            // Telegram orders photo sizes ascending; take the largest
            if let Some(largest) = photo.last() {
                match self.resolve_file_url(&largest.file_id).await {
                    Ok(Some(url)) => attachment_urls.push(url),
                    Ok(None) => debug!(file_id = %largest.file_id, "photo has no file path"),
                    Err(e) => warn!(error = %e, "photo resolution failed"),
                }
            }
        }

        if text.is_none() && attachment_urls.is_empty() {
            return None;
        }

        Some(InboundEvent {
            source_id: message.chat.id,
            text,
            attachment_urls,
            message_id: message.message_id,
        })
    }

    async fn resolve_file_url(&self, file_id: &str) -> Result<Option<String>> {
        let url = format!("{}/bot{}/getFile", TELEGRAM_API_BASE, self.config.bot_token);

        let response = self
            .client
            .get(&url)
            .query(&[("file_id", file_id)])
            .send()
            .await
            .map_err(|e| Error::TelegramApi(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::TelegramApi(format!(
                "getFile returned {}",
                response.status()
            )));
        }

        let body: GetFileResponse = response
            .json()
            .await
            .map_err(|e| Error::TelegramApi(format!("bad getFile body: {e}")))?;

        Ok(body
            .result
            .filter(|_| body.ok)
            .and_then(|f| f.file_path)
            .map(|path| {
                format!(
                    "{}/file/bot{}/{}",
                    TELEGRAM_API_BASE, self.config.bot_token, path
                )
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> TelegramFeed {
        let (tx, _rx) = async_channel::bounded(8);
        TelegramFeed::new(
            TelegramConfig {
                enabled: true,
                bot_token: "123456:ABC-DEF1234ghIkl".into(),
                ..Default::default()
            },
            tx,
        )
        .unwrap()
    }

    #[test]
    fn test_feed_requires_token() {
        let (tx, _rx) = async_channel::bounded(8);
        assert!(TelegramFeed::new(TelegramConfig::default(), tx).is_err());
    }

    #[tokio::test]
    async fn test_update_to_event_text_message() {
        let feed = feed();
        let update = Update {
            update_id: 1,
            message: Some(TgMessage {
                message_id: 10,
                chat: TgChat { id: -100123 },
                text: Some("new gem pump.fun/token/abc".into()),
                caption: None,
                photo: None,
            }),
            channel_post: None,
        };

        let event = feed.update_to_event(update).await.unwrap();
        assert_eq!(event.source_id, -100123);
        assert_eq!(event.message_id, 10);
        assert!(event.text.unwrap().contains("pump.fun"));
        assert!(event.attachment_urls.is_empty());
    }

    #[tokio::test]
    async fn test_update_to_event_prefers_caption_fallback() {
        let feed = feed();
        let update = Update {
            update_id: 2,
            message: None,
            channel_post: Some(TgMessage {
                message_id: 11,
                chat: TgChat { id: 55 },
                text: None,
                caption: Some("chart attached".into()),
                photo: None,
            }),
        };

        let event = feed.update_to_event(update).await.unwrap();
        assert_eq!(event.text.as_deref(), Some("chart attached"));
    }

    #[tokio::test]
    async fn test_update_without_content_is_skipped() {
        let feed = feed();
        let update = Update {
            update_id: 3,
            message: Some(TgMessage {
                message_id: 12,
                chat: TgChat { id: 55 },
                text: None,
                caption: None,
                photo: None,
            }),
            channel_post: None,
        };

        assert!(feed.update_to_event(update).await.is_none());
    }

    #[test]
    fn test_getupdates_response_shape() {
        let body: GetUpdatesResponse = serde_json::from_str(
            r#"{"ok":true,"result":[{"update_id":7,"message":{"message_id":1,"chat":{"id":9},"text":"hi"}}]}"#,
        )
        .unwrap();
        assert!(body.ok);
        let updates = body.result.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_id, 7);
    }
}
