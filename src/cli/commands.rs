//! Command implementations for the radar binary

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::extract::TokenExtractor;
use crate::feed::{DiscordFeed, IngestGate, TelegramFeed};
use crate::handler::{AlertSink, LogAlertSink, MessageHandler, TelegramAlertSink};
use crate::limiter::{FixedWindowLimiter, SlidingWindowLimiter};
use crate::metrics::{LogMetrics, MetricsSink};
use crate::ocr::{HttpOcr, OcrEngine};
use crate::queue::{MessageQueue, QueueWorker};
use crate::scorer::{HttpScorer, TokenScorer};

/// Start the ingestion pipeline and run until ctrl-c
pub async fn start(config: &Config, dry_run: bool) -> Result<()> {
    if !config.telegram.enabled && !config.discord.enabled {
        warn!("no feed enabled; the pipeline will idle until one is configured");
    }

    let metrics: Arc<dyn MetricsSink> = Arc::new(LogMetrics);

    let ingest_limiter = Arc::new(FixedWindowLimiter::new(
        config.rate_limit.ingest_limit,
        Duration::from_secs(config.rate_limit.ingest_window_secs),
    ));
    let queue_limiter = Arc::new(SlidingWindowLimiter::new(
        config.rate_limit.queue_limit,
        Duration::from_secs(config.rate_limit.queue_window_secs),
    ));

    let queue = Arc::new(MessageQueue::new(&config.queue));
    let extractor = TokenExtractor::new(config.extractor.clone(), metrics.clone());

    let scorer: Arc<dyn TokenScorer> =
        Arc::new(HttpScorer::new(&config.scorer).context("scorer client")?);

    let ocr: Option<Arc<dyn OcrEngine>> = if config.ocr.enabled {
        Some(Arc::new(HttpOcr::new(&config.ocr).context("ocr client")?))
    } else {
        None
    };

    let alerts: Arc<dyn AlertSink> = if dry_run {
        info!("dry-run mode: alerts will be logged, not sent");
        Arc::new(LogAlertSink)
    } else {
        Arc::new(TelegramAlertSink::new(&config.alerts).context("alert sink")?)
    };

    let handler = Arc::new(MessageHandler::new(
        extractor,
        scorer,
        ocr,
        alerts,
        metrics.clone(),
        config.handler.clone(),
    ));

    let worker = Arc::new(QueueWorker::new(
        queue.clone(),
        queue_limiter,
        metrics.clone(),
        &config.queue,
    ));

    let gate = Arc::new(IngestGate::new(
        ingest_limiter,
        queue.clone(),
        metrics.clone(),
    ));

    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = async_channel::bounded(1024);
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn({
        let gate = gate.clone();
        let cancel = cancel.clone();
        async move { gate.run(event_rx, cancel).await }
    }));

    if config.telegram.enabled {
        let feed = TelegramFeed::new(config.telegram.clone(), event_tx.clone())
            .context("telegram feed")?;
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { feed.run(cancel).await }));
    }

    if config.discord.enabled {
        let feed =
            DiscordFeed::new(config.discord.clone(), event_tx.clone()).context("discord feed")?;
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { feed.run(cancel).await }));
    }

    // The gate holds the only receiver; feeds hold the senders
    drop(event_tx);

    tasks.push(tokio::spawn({
        let worker = worker.clone();
        let handler = handler.clone();
        let cancel = cancel.clone();
        async move { worker.run(handler, cancel).await }
    }));

    info!("pipeline running, press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutdown requested");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }

    let stats = worker.stats();
    info!(
        processed = stats.processed,
        requeued = stats.requeued,
        handler_errors = stats.handler_errors,
        pending = queue.len(),
        "pipeline stopped"
    );

    Ok(())
}

/// Print the loaded configuration with secrets masked
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Run a one-shot extraction over a text snippet (operator debugging)
pub fn scan(config: &Config, text: &str) -> Result<()> {
    let metrics: Arc<dyn MetricsSink> = Arc::new(LogMetrics);
    let extractor = TokenExtractor::new(config.extractor.clone(), metrics);

    let contexts = extractor.get_validated_matches(text, config.extractor.min_confidence);

    if contexts.is_empty() {
        println!("no validated token mentions");
        return Ok(());
    }

    for ctx in &contexts {
        println!("{}", serde_json::to_string_pretty(ctx)?);
    }

    Ok(())
}

/// Check collaborator reachability
pub async fn health(config: &Config) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    print_probe(&client, "scorer", &config.scorer.endpoint).await;

    if config.ocr.enabled {
        print_probe(&client, "ocr", &config.ocr.endpoint).await;
    } else {
        println!("ocr: disabled");
    }

    if config.telegram.enabled || !config.alerts.bot_token.is_empty() {
        let token = if !config.alerts.bot_token.is_empty() {
            &config.alerts.bot_token
        } else {
            &config.telegram.bot_token
        };
        let url = format!("https://api.telegram.org/bot{}/getMe", token);
        print_probe(&client, "telegram", &url).await;
    } else {
        println!("telegram: disabled");
    }

    Ok(())
}

async fn print_probe(client: &reqwest::Client, name: &str, url: &str) {
    match client.get(url).send().await {
        Ok(response) => println!("{}: reachable ({})", name, response.status()),
        Err(e) => println!("{}: UNREACHABLE ({})", name, e),
    }
}
