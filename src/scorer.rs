//! Scorer collaborator
//!
//! The scorer decides whether a detected token is worth alerting on.
//! Its internals (weighting, external data lookups) live behind the
//! `TokenScorer` trait; the pipeline only consumes the verdict. A
//! `None` verdict means "no alert".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ScorerConfig;
use crate::error::{Error, Result};
use crate::handler::TokenRecord;

/// Scoring verdict on a 0-100 scale per axis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenVerdict {
    pub safety_score: u8,
    pub hype_score: u8,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

impl TokenVerdict {
    /// The score an alert threshold is compared against
    pub fn peak_score(&self) -> u8 {
        self.safety_score.max(self.hype_score)
    }
}

#[async_trait]
pub trait TokenScorer: Send + Sync {
    async fn score(&self, record: &TokenRecord) -> Result<Option<TokenVerdict>>;
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    address: &'a str,
    matcher: &'a str,
    confidence: f64,
    sentiment: Option<f64>,
    price_mentions: Vec<String>,
    percentage_mentions: Vec<String>,
    holder_mentions: Vec<String>,
    mcap_mentions: Vec<String>,
}

/// Thin client for an external HTTP scoring service
pub struct HttpScorer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpScorer {
    pub fn new(config: &ScorerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Scorer(format!("client build failed: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl TokenScorer for HttpScorer {
    async fn score(&self, record: &TokenRecord) -> Result<Option<TokenVerdict>> {
        let ctx = record.context.as_ref();
        let request = ScoreRequest {
            address: &record.address,
            matcher: record.matcher_name,
            confidence: record.confidence,
            sentiment: ctx.map(|c| c.sentiment),
            price_mentions: ctx.map(|c| c.price_mentions.clone()).unwrap_or_default(),
            percentage_mentions: ctx
                .map(|c| c.percentage_mentions.clone())
                .unwrap_or_default(),
            holder_mentions: ctx.map(|c| c.holder_mentions.clone()).unwrap_or_default(),
            mcap_mentions: ctx.map(|c| c.mcap_mentions.clone()).unwrap_or_default(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Scorer(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(Error::Scorer(format!(
                "scoring service returned {}",
                response.status()
            )));
        }

        // The service replies with a verdict object or a JSON null
        let verdict: Option<TokenVerdict> = response
            .json()
            .await
            .map_err(|e| Error::Scorer(format!("bad verdict body: {e}")))?;

        debug!(address = %record.address, has_verdict = verdict.is_some(), "scored");
        Ok(verdict)
    }
}
