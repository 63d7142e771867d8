//! Source feeds and the ingest gate
//!
//! Feeds turn chat traffic into `InboundEvent`s and push them through a
//! shared channel. The gate sits between the channel and the queue: it
//! applies the per-source fixed-window limiter before anything is
//! enqueued, so a runaway source is shed at the door instead of
//! occupying queue capacity.

pub mod discord;
pub mod telegram;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::limiter::FixedWindowLimiter;
use crate::metrics::MetricsSink;
use crate::queue::{MessagePayload, MessageQueue};

pub use discord::DiscordFeed;
pub use telegram::TelegramFeed;

/// Inbound event shape shared by all feeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub source_id: i64,
    pub text: Option<String>,
    pub attachment_urls: Vec<String>,
    pub message_id: i64,
}

/// Outcome of submitting one event at the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Enqueued,
    RateLimited,
    QueueFull,
    Empty,
}

/// Ingest-side gate: fixed-window limiter + enqueue
pub struct IngestGate {
    limiter: Arc<FixedWindowLimiter>,
    queue: Arc<MessageQueue>,
    metrics: Arc<dyn MetricsSink>,
}

impl IngestGate {
    pub fn new(
        limiter: Arc<FixedWindowLimiter>,
        queue: Arc<MessageQueue>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            limiter,
            queue,
            metrics,
        }
    }

    /// Gate a single event. Rejections are counted, never raised.
    pub fn submit(&self, event: InboundEvent) -> GateOutcome {
        let source = event.source_id.to_string();

        if event.text.is_none() && event.attachment_urls.is_empty() {
            return GateOutcome::Empty;
        }

        if !self.limiter.check(event.source_id) {
            debug!(source_id = event.source_id, "ingest rate limited");
            self.metrics
                .increment("ingest_rate_limited", &[("source", &source)]);
            return GateOutcome::RateLimited;
        }

        let payload = MessagePayload {
            text: event.text,
            attachment_urls: event.attachment_urls,
            message_id: event.message_id,
        };

        match self.queue.put(event.source_id, payload) {
            Ok(()) => {
                self.metrics
                    .increment("ingest_accepted", &[("source", &source)]);
                GateOutcome::Enqueued
            }
            Err(e) => {
                warn!(source_id = event.source_id, error = %e, "queue full, shedding event");
                self.metrics
                    .increment("ingest_shed", &[("source", &source)]);
                GateOutcome::QueueFull
            }
        }
    }

    /// Pump events from the feed channel into the queue until the
    /// channel closes or shutdown is requested.
    pub async fn run(
        &self,
        events: async_channel::Receiver<InboundEvent>,
        cancel: CancellationToken,
    ) {
        info!("ingest gate started");

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        self.submit(event);
                    }
                    Err(_) => {
                        info!("feed channel closed");
                        break;
                    }
                },
                _ = cancel.cancelled() => break,
            }
        }

        info!("ingest gate stopped");
    }
}
