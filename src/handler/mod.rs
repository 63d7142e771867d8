//! Message handler: orchestrates extraction, scoring and alerting
//!
//! For every admitted message: extract token contexts, deduplicate,
//! merge with the canonical flat-mode list, walk the image path for
//! attachments, dedup across both paths, score each surviving record
//! and dispatch alerts for verdicts at or above the threshold. Every
//! call records latency and outcome, whichever branch it took.

pub mod alerts;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::HandlerConfig;
use crate::error::Result;
use crate::extract::{TokenContext, TokenExtractor};
use crate::metrics::MetricsSink;
use crate::ocr::OcrEngine;
use crate::queue::{QueueHandler, QueuedMessage};
use crate::scorer::TokenScorer;

pub use alerts::{AlertSink, LogAlertSink, TelegramAlertSink};

/// Where a token record was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenOrigin {
    Text,
    Image,
}

/// A token detection merged across extraction modes, ready for scoring
#[derive(Debug, Clone, Serialize)]
pub struct TokenRecord {
    pub address: String,
    pub matcher_name: &'static str,
    /// Matcher confidence; for image-path records, already discounted
    /// by the OCR region confidence
    pub confidence: f64,
    pub context: Option<TokenContext>,
    pub origin: TokenOrigin,
}

/// The orchestrating handler plugged into the queue worker
pub struct MessageHandler {
    extractor: TokenExtractor,
    scorer: Arc<dyn TokenScorer>,
    ocr: Option<Arc<dyn OcrEngine>>,
    alerts: Arc<dyn AlertSink>,
    metrics: Arc<dyn MetricsSink>,
    config: HandlerConfig,
}

impl MessageHandler {
    pub fn new(
        extractor: TokenExtractor,
        scorer: Arc<dyn TokenScorer>,
        ocr: Option<Arc<dyn OcrEngine>>,
        alerts: Arc<dyn AlertSink>,
        metrics: Arc<dyn MetricsSink>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            extractor,
            scorer,
            ocr,
            alerts,
            metrics,
            config,
        }
    }

    /// Extract token records from message text: context mode for the
    /// narrative signals, flat mode for the canonical validated list,
    /// merged per address.
    fn text_records(&self, text: &str) -> Vec<TokenRecord> {
        let contexts = self.extractor.extract_with_context(text);
        let contexts = self.extractor.filter_duplicates(contexts);
        let canonical = self.extractor.extract_tokens(text);

        canonical
            .into_iter()
            .map(|raw| {
                let context = contexts.iter().find(|c| c.address == raw.address).cloned();
                TokenRecord {
                    address: raw.address,
                    matcher_name: raw.matcher_name,
                    confidence: raw.confidence,
                    context,
                    origin: TokenOrigin::Text,
                }
            })
            .collect()
    }

    /// Walk one attachment through download -> OCR -> extraction.
    /// Match confidence is discounted by the region's OCR confidence.
    async fn image_records(&self, ocr: &Arc<dyn OcrEngine>, url: &str) -> Result<Vec<TokenRecord>> {
        let Some(bytes) = ocr.download(url).await? else {
            debug!(url, "attachment yielded no image");
            return Ok(Vec::new());
        };

        let regions = ocr.extract_text(&bytes).await?;
        let mut records = Vec::new();

        for region in regions {
            if region.confidence < self.config.ocr_confidence_floor {
                continue;
            }

            for raw in self.extractor.extract_tokens(&region.text) {
                records.push(TokenRecord {
                    address: raw.address,
                    matcher_name: raw.matcher_name,
                    confidence: raw.confidence * region.confidence,
                    context: None,
                    origin: TokenOrigin::Image,
                });
            }
        }

        Ok(records)
    }

    /// Process one message end to end. Returns the number of alerts
    /// dispatched.
    async fn process(&self, message: &QueuedMessage) -> Result<usize> {
        let source = message.source_id.to_string();
        let mut records: Vec<TokenRecord> = Vec::new();

        if let Some(text) = &message.payload.text {
            records.extend(self.text_records(text));
        }

        // Image path: each attachment fails independently; a broken
        // attachment never aborts the text path or its siblings
        if let Some(ocr) = &self.ocr {
            for url in &message.payload.attachment_urls {
                match self.image_records(ocr, url).await {
                    Ok(found) => records.extend(found),
                    Err(e) => {
                        warn!(url, error = %e, "attachment processing failed");
                        self.metrics
                            .increment("attachment_errors", &[("source", &source)]);
                    }
                }
            }
        }

        // Cross-path dedup: first occurrence wins, discovery order kept
        let mut seen: HashSet<String> = HashSet::new();
        records.retain(|r| seen.insert(r.address.clone()));

        let mut dispatched = 0;
        for record in &records {
            let verdict = match self.scorer.score(record).await {
                Ok(Some(verdict)) => verdict,
                Ok(None) => {
                    debug!(address = %record.address, "no verdict");
                    continue;
                }
                Err(e) => {
                    warn!(address = %record.address, error = %e, "scorer failed");
                    self.metrics
                        .increment("scorer_errors", &[("source", &source)]);
                    continue;
                }
            };

            if verdict.peak_score() < self.config.alert_threshold {
                debug!(
                    address = %record.address,
                    safety = verdict.safety_score,
                    hype = verdict.hype_score,
                    "below alert threshold"
                );
                continue;
            }

            let text = alerts::format_alert(record, &verdict, &message.payload);
            match self
                .alerts
                .send(self.config.alert_destination_id, &text)
                .await
            {
                Ok(()) => {
                    dispatched += 1;
                    info!(address = %record.address, score = verdict.peak_score(), "alert sent");
                    self.metrics
                        .increment("alerts_sent", &[("source", &source)]);
                }
                Err(e) => {
                    // Swallowed: the sink owns delivery semantics
                    warn!(address = %record.address, error = %e, "alert dispatch failed");
                    self.metrics
                        .increment("alert_errors", &[("source", &source)]);
                }
            }
        }

        Ok(dispatched)
    }
}

#[async_trait::async_trait]
impl QueueHandler for MessageHandler {
    async fn handle(&self, message: QueuedMessage) -> Result<()> {
        let source = message.source_id.to_string();
        let started = tokio::time::Instant::now();

        let result = self.process(&message).await;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics
            .observe("processing_time_ms", &[("operation", "handle_message")], elapsed_ms);

        match &result {
            Ok(dispatched) => {
                self.metrics
                    .increment("messages_processed", &[("source", &source), ("outcome", "ok")]);
                debug!(source_id = message.source_id, dispatched, "message processed");
            }
            Err(e) => {
                self.metrics
                    .increment("messages_processed", &[("source", &source), ("outcome", "error")]);
                warn!(source_id = message.source_id, error = %e, "message processing failed");
            }
        }

        result.map(|_| ())
    }
}
