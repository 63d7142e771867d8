//! End-to-end pipeline tests with mock collaborators

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mention_radar::config::{ExtractorConfig, HandlerConfig, QueueConfig};
use mention_radar::error::Result;
use mention_radar::extract::TokenExtractor;
use mention_radar::handler::{AlertSink, MessageHandler, TokenRecord};
use mention_radar::limiter::SlidingWindowLimiter;
use mention_radar::metrics::RecordingMetrics;
use mention_radar::queue::{
    MessagePayload, MessageQueue, QueueHandler, QueueWorker, QueuedMessage,
};
use mention_radar::scorer::{TokenScorer, TokenVerdict};

const VALID: &str = "7EYnhQoR9YM3N7UoaKRoA44Uy8JeaZV3qyouov87awMs";

fn payload(message_id: i64, text: &str) -> MessagePayload {
    MessagePayload {
        text: Some(text.to_string()),
        attachment_urls: vec![],
        message_id,
    }
}

fn queue_config() -> QueueConfig {
    QueueConfig {
        capacity: 1000,
        normal_priority: 5,
        requeue_delay_ms: 10,
    }
}

/// Handler that records what it saw
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<(i64, i64, u8)>>,
}

impl RecordingHandler {
    fn seen(&self) -> Vec<(i64, i64, u8)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueHandler for RecordingHandler {
    async fn handle(&self, message: QueuedMessage) -> Result<()> {
        self.seen.lock().unwrap().push((
            message.source_id,
            message.payload.message_id,
            message.priority,
        ));
        Ok(())
    }
}

struct FixedScorer {
    verdict: Option<TokenVerdict>,
    calls: AtomicUsize,
}

#[async_trait]
impl TokenScorer for FixedScorer {
    async fn score(&self, _record: &TokenRecord) -> Result<Option<TokenVerdict>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.verdict.clone())
    }
}

#[derive(Default)]
struct CollectingSink {
    sent: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl AlertSink for CollectingSink {
    async fn send(&self, destination_id: i64, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((destination_id, text.to_string()));
        Ok(())
    }
}

/// A slow source must not be starved by a flooding one: source B's
/// two messages drain within a bounded number of A's demotion cycles.
#[tokio::test(start_paused = true)]
async fn noisy_source_does_not_starve_quiet_one() {
    let queue = Arc::new(MessageQueue::new(&queue_config()));
    // Per-source admission: 2 per minute
    let limiter = Arc::new(SlidingWindowLimiter::new(2, Duration::from_secs(60)));
    let metrics = Arc::new(RecordingMetrics::default());
    let worker = Arc::new(QueueWorker::new(
        queue.clone(),
        limiter,
        metrics,
        &queue_config(),
    ));
    let handler = Arc::new(RecordingHandler::default());
    let cancel = CancellationToken::new();

    // Source A floods; source B trickles in behind the flood
    for id in 0..50 {
        queue.put(1, payload(id, "flood")).unwrap();
    }
    queue.put(2, payload(100, "quiet")).unwrap();
    queue.put(2, payload(101, "quiet")).unwrap();

    let run = {
        let worker = worker.clone();
        let handler = handler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(handler, cancel).await })
    };

    // Wait (in virtual time) until both of B's messages are through
    let mut waited = 0;
    loop {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let b_count = handler
            .seen()
            .iter()
            .filter(|(source, _, _)| *source == 2)
            .count();
        if b_count == 2 {
            break;
        }
        waited += 1;
        assert!(waited < 200, "source B starved: {:?}", handler.seen());
    }

    cancel.cancel();
    run.await.unwrap();

    let seen = handler.seen();
    // A was admitted up to its window, no further
    let a_immediate = seen
        .iter()
        .filter(|(source, _, priority)| *source == 1 && *priority == 5)
        .count();
    assert_eq!(a_immediate, 2);
}

/// A rate-limited message reappears with a strictly greater priority
/// number and is eventually admitted once the window has room.
#[tokio::test(start_paused = true)]
async fn demoted_message_is_eventually_processed() {
    let queue = Arc::new(MessageQueue::new(&queue_config()));
    // 1 admission per second: messages 2 and 3 must wait for the window
    let limiter = Arc::new(SlidingWindowLimiter::new(1, Duration::from_secs(1)));
    let metrics = Arc::new(RecordingMetrics::default());
    let worker = Arc::new(QueueWorker::new(
        queue.clone(),
        limiter,
        metrics,
        &queue_config(),
    ));
    let handler = Arc::new(RecordingHandler::default());
    let cancel = CancellationToken::new();

    for id in 0..3 {
        queue.put(7, payload(id, "steady")).unwrap();
    }

    let run = {
        let worker = worker.clone();
        let handler = handler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(handler, cancel).await })
    };

    let mut waited = 0;
    while handler.seen().len() < 3 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += 1;
        assert!(waited < 200, "messages lost: {:?}", handler.seen());
    }

    cancel.cancel();
    run.await.unwrap();

    let seen = handler.seen();
    assert_eq!(seen.len(), 3, "every message processed exactly once");

    // The first went straight through; the stragglers were demoted at
    // least one class below normal before admission
    assert_eq!(seen[0].2, 5);
    assert!(seen[1].2 > 5);
    assert!(seen[2].2 > 5);
}

/// Full path: queue -> worker -> handler -> scorer -> alert sink.
#[tokio::test]
async fn end_to_end_alert_flow() {
    let queue = Arc::new(MessageQueue::new(&queue_config()));
    let limiter = Arc::new(SlidingWindowLimiter::new(100, Duration::from_secs(60)));
    let metrics = Arc::new(RecordingMetrics::default());

    let scorer = Arc::new(FixedScorer {
        verdict: Some(TokenVerdict {
            safety_score: 72,
            hype_score: 30,
            risk_factors: vec!["new token".into()],
        }),
        calls: AtomicUsize::new(0),
    });
    let sink = Arc::new(CollectingSink::default());

    let handler = Arc::new(MessageHandler::new(
        TokenExtractor::new(ExtractorConfig::default(), metrics.clone()),
        scorer.clone(),
        None,
        sink.clone(),
        metrics.clone(),
        HandlerConfig {
            alert_threshold: 60,
            ocr_confidence_floor: 0.6,
            alert_destination_id: -42,
        },
    ));

    let worker = Arc::new(QueueWorker::new(
        queue.clone(),
        limiter,
        metrics.clone(),
        &queue_config(),
    ));
    let cancel = CancellationToken::new();

    queue
        .put(
            9,
            payload(
                1,
                &format!("ape in: pump.fun/token/{} 50K holders up 120%", VALID),
            ),
        )
        .unwrap();

    let run = {
        let worker = worker.clone();
        let handler = handler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(handler, cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    run.await.unwrap();

    assert_eq!(scorer.calls.load(Ordering::Relaxed), 1);

    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (destination, text) = &sent[0];
    assert_eq!(*destination, -42);
    assert!(text.contains(VALID));
    assert!(text.contains("safety 72"));
    assert!(text.contains("Holders: 50K holders"));

    assert_eq!(metrics.counter("alerts_sent"), 1);
    assert_eq!(metrics.observations("processing_time_ms").len(), 1);
}

/// A verdict below the threshold, or no verdict at all, produces no
/// alert but still counts as processed.
#[tokio::test]
async fn below_threshold_and_no_verdict_do_not_alert() {
    let metrics = Arc::new(RecordingMetrics::default());
    let sink = Arc::new(CollectingSink::default());

    for verdict in [
        None,
        Some(TokenVerdict {
            safety_score: 59,
            hype_score: 59,
            risk_factors: vec![],
        }),
    ] {
        let scorer = Arc::new(FixedScorer {
            verdict,
            calls: AtomicUsize::new(0),
        });
        let handler = MessageHandler::new(
            TokenExtractor::new(ExtractorConfig::default(), metrics.clone()),
            scorer.clone(),
            None,
            sink.clone(),
            metrics.clone(),
            HandlerConfig::default(),
        );

        handler
            .handle(QueuedMessage {
                source_id: 3,
                priority: 5,
                enqueued_at: chrono::Utc::now(),
                payload: payload(5, &format!("look {}", VALID)),
            })
            .await
            .unwrap();

        assert_eq!(scorer.calls.load(Ordering::Relaxed), 1);
    }

    assert!(sink.sent.lock().unwrap().is_empty());
}

/// Priority classes drain strictly in order; FIFO within a class.
#[tokio::test]
async fn queue_ordering_is_stable_under_mixed_priorities() {
    let queue = MessageQueue::new(&queue_config());

    queue.put_with_priority(1, payload(1, "low"), 9).unwrap();
    queue.put_with_priority(1, payload(2, "high"), 1).unwrap();
    queue.put_with_priority(1, payload(3, "normal"), 5).unwrap();
    queue.put_with_priority(1, payload(4, "high"), 1).unwrap();

    let order: Vec<i64> = std::iter::from_fn(|| queue.try_pop())
        .map(|m| m.payload.message_id)
        .collect();

    assert_eq!(order, vec![2, 4, 3, 1]);
}
