//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub handler: HandlerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

/// Token extractor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    /// Radius in characters of the context window around a match
    #[serde(default = "default_context_radius")]
    pub context_radius: usize,
    /// Minimum confidence for a match to survive `get_validated_matches`
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            context_radius: default_context_radius(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// Per-source rate limiting, both sides of the queue
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Fixed-window limit applied at ingest, before enqueue
    #[serde(default = "default_ingest_limit")]
    pub ingest_limit: u32,
    /// Fixed-window length in seconds (ingest side)
    #[serde(default = "default_ingest_window_secs")]
    pub ingest_window_secs: u64,
    /// Sliding-window limit applied at dequeue-time admission
    #[serde(default = "default_queue_limit")]
    pub queue_limit: u32,
    /// Sliding-window length in seconds (queue side)
    #[serde(default = "default_queue_window_secs")]
    pub queue_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ingest_limit: default_ingest_limit(),
            ingest_window_secs: default_ingest_window_secs(),
            queue_limit: default_queue_limit(),
            queue_window_secs: default_queue_window_secs(),
        }
    }
}

/// Priority queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued messages before `put` rejects
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// Priority assigned to fresh messages
    #[serde(default = "default_normal_priority")]
    pub normal_priority: u8,
    /// Delay before a rate-limited message is re-enqueued, in milliseconds
    #[serde(default = "default_requeue_delay_ms")]
    pub requeue_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            normal_priority: default_normal_priority(),
            requeue_delay_ms: default_requeue_delay_ms(),
        }
    }
}

/// Message handler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerConfig {
    /// Alert when safety or hype score reaches this value (0-100)
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u8,
    /// OCR regions below this confidence are ignored
    #[serde(default = "default_ocr_confidence_floor")]
    pub ocr_confidence_floor: f64,
    /// Destination chat for alerts
    #[serde(default)]
    pub alert_destination_id: i64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            alert_threshold: default_alert_threshold(),
            ocr_confidence_floor: default_ocr_confidence_floor(),
            alert_destination_id: 0,
        }
    }
}

/// Telegram feed configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Bot token; usually provided via RADAR__TELEGRAM__BOT_TOKEN
    #[serde(default)]
    pub bot_token: String,
    /// Long-poll timeout in seconds
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            poll_timeout_secs: default_poll_timeout_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// Discord gateway feed configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Bot token; usually provided via RADAR__DISCORD__BOT_TOKEN
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            gateway_url: default_gateway_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// OCR collaborator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    #[serde(default)]
    pub enabled: bool,
    /// OCR service endpoint
    #[serde(default = "default_ocr_url")]
    pub endpoint: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_ocr_url(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

/// Scorer collaborator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScorerConfig {
    /// Scoring service endpoint
    #[serde(default = "default_scorer_url")]
    pub endpoint: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_scorer_url(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

/// Alert sink configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Bot token used for sending alerts (may differ from the feed bot)
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

// Default value functions
fn default_context_radius() -> usize {
    50
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_ingest_limit() -> u32 {
    60
}

fn default_ingest_window_secs() -> u64 {
    60
}

fn default_queue_limit() -> u32 {
    30
}

fn default_queue_window_secs() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    10000
}

fn default_normal_priority() -> u8 {
    5
}

fn default_requeue_delay_ms() -> u64 {
    500
}

fn default_alert_threshold() -> u8 {
    60
}

fn default_ocr_confidence_floor() -> f64 {
    0.6
}

fn default_poll_timeout_secs() -> u32 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".into()
}

fn default_ocr_url() -> String {
    std::env::var("OCR_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:8801/ocr".into())
}

fn default_scorer_url() -> String {
    std::env::var("SCORER_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:8802/score".into())
}

fn default_http_timeout_ms() -> u64 {
    10000
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix RADAR_)
            .add_source(
                config::Environment::with_prefix("RADAR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.extractor.context_radius == 0 {
            anyhow::bail!("context_radius must be positive");
        }

        if !(0.0..=1.0).contains(&self.extractor.min_confidence) {
            anyhow::bail!("min_confidence must be within [0, 1]");
        }

        if self.rate_limit.ingest_limit == 0 || self.rate_limit.queue_limit == 0 {
            anyhow::bail!("rate limits must be positive");
        }

        if self.rate_limit.ingest_window_secs == 0 || self.rate_limit.queue_window_secs == 0 {
            anyhow::bail!("rate-limit windows must be positive");
        }

        if self.queue.capacity == 0 {
            anyhow::bail!("queue capacity must be positive");
        }

        if self.handler.alert_threshold > 100 {
            anyhow::bail!("alert_threshold cannot exceed 100");
        }

        if !(0.0..=1.0).contains(&self.handler.ocr_confidence_floor) {
            anyhow::bail!("ocr_confidence_floor must be within [0, 1]");
        }

        if self.telegram.enabled && self.telegram.bot_token.is_empty() {
            anyhow::bail!("telegram feed enabled but bot_token is empty");
        }

        if self.discord.enabled && self.discord.bot_token.is_empty() {
            anyhow::bail!("discord feed enabled but bot_token is empty");
        }

        if self.ocr.enabled {
            url::Url::parse(&self.ocr.endpoint)
                .with_context(|| format!("Invalid OCR endpoint: {}", self.ocr.endpoint))?;
        }

        url::Url::parse(&self.scorer.endpoint)
            .with_context(|| format!("Invalid scorer endpoint: {}", self.scorer.endpoint))?;

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Extractor:
    context_radius: {}
    min_confidence: {}
  Rate limits:
    ingest: {} per {}s (fixed window)
    queue: {} per {}s (sliding window)
  Queue:
    capacity: {}
    normal_priority: {}
    requeue_delay: {}ms
  Handler:
    alert_threshold: {}
    ocr_confidence_floor: {}
    alert_destination: {}
  Feeds:
    telegram: {} (token: {})
    discord: {} (token: {})
  Collaborators:
    ocr: {} ({})
    scorer: {}
"#,
            self.extractor.context_radius,
            self.extractor.min_confidence,
            self.rate_limit.ingest_limit,
            self.rate_limit.ingest_window_secs,
            self.rate_limit.queue_limit,
            self.rate_limit.queue_window_secs,
            self.queue.capacity,
            self.queue.normal_priority,
            self.queue.requeue_delay_ms,
            self.handler.alert_threshold,
            self.handler.ocr_confidence_floor,
            self.handler.alert_destination_id,
            self.telegram.enabled,
            mask_token(&self.telegram.bot_token),
            self.discord.enabled,
            mask_token(&self.discord.bot_token),
            self.ocr.enabled,
            self.ocr.endpoint,
            self.scorer.endpoint,
        )
    }
}

/// Mask a secret token for display
fn mask_token(token: &str) -> &'static str {
    if token.is_empty() {
        "(not set)"
    } else {
        "***"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extractor: ExtractorConfig::default(),
            rate_limit: RateLimitConfig::default(),
            queue: QueueConfig::default(),
            handler: HandlerConfig::default(),
            telegram: TelegramConfig::default(),
            discord: DiscordConfig::default(),
            ocr: OcrConfig::default(),
            scorer: ScorerConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}
