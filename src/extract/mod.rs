//! Token extraction engine
//!
//! Runs the matcher table over message text in two modes: flat mode for
//! latency-sensitive paths that only need validated addresses, and
//! context mode that additionally captures a window around each hit and
//! harvests secondary signals from it.

pub mod address;
pub mod context;
pub mod patterns;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::ExtractorConfig;
use crate::metrics::MetricsSink;

pub use context::TokenContext;
pub use patterns::{Matcher, MATCHERS};

/// A single pattern hit, not yet validated
#[derive(Debug, Clone, Serialize)]
pub struct RawMatch {
    /// Raw captured substring
    pub address: String,
    /// Name of the matcher that fired
    pub matcher_name: &'static str,
    /// The matcher's trust weight
    pub confidence: f64,
    /// Context window around the match span
    pub context_window: String,
}

/// Pattern-matching and confidence engine
pub struct TokenExtractor {
    config: ExtractorConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl TokenExtractor {
    pub fn new(config: ExtractorConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { config, metrics }
    }

    /// Run every matcher over the text independently. Matchers are not
    /// mutually exclusive: a URL matcher and the bare matcher may both
    /// fire on the same substring. Duplicates are resolved by the caller.
    pub fn find_matches(&self, text: &str) -> Vec<RawMatch> {
        let mut matches = Vec::new();

        for matcher in MATCHERS.iter() {
            for caps in matcher.regex.captures_iter(text) {
                let Some(capture) = caps.get(matcher.capture_index) else {
                    continue;
                };

                let window = context::window_around(
                    text,
                    capture.start(),
                    capture.end(),
                    self.config.context_radius,
                );

                matches.push(RawMatch {
                    address: capture.as_str().to_string(),
                    matcher_name: matcher.name,
                    confidence: matcher.confidence,
                    context_window: window.to_string(),
                });
            }
        }

        matches
    }

    /// Flat mode: validated, one record per unique address, keeping the
    /// highest-confidence matcher's record (ties broken by matcher
    /// declaration order). Deterministic for identical input.
    pub fn extract_tokens(&self, text: &str) -> Vec<RawMatch> {
        let mut by_address: HashMap<String, usize> = HashMap::new();
        let mut out: Vec<RawMatch> = Vec::new();

        for raw in self.find_matches(text) {
            if !address::validate(&raw.address) {
                self.count_rejection(raw.matcher_name);
                continue;
            }

            match by_address.get(&raw.address) {
                None => {
                    by_address.insert(raw.address.clone(), out.len());
                    out.push(raw);
                }
                Some(&idx) => {
                    // Strictly greater only: first-applied wins on ties
                    if raw.confidence > out[idx].confidence {
                        out[idx] = raw;
                    }
                }
            }
        }

        out
    }

    /// Context mode: one `TokenContext` per matcher hit, validated or
    /// not. Invalid addresses are filtered later, at the validation
    /// stage of `get_validated_matches` -- their windows still carry
    /// usable signal for operators.
    pub fn extract_with_context(&self, text: &str) -> Vec<TokenContext> {
        self.find_matches(text)
            .into_iter()
            .map(|raw| {
                TokenContext::from_window(
                    raw.address,
                    raw.matcher_name,
                    raw.confidence,
                    &raw.context_window,
                )
            })
            .collect()
    }

    /// Deduplicate context records by address. The highest confidence
    /// wins; on a tie, the record with more secondary signals wins.
    /// Never keeps a lower-confidence context over a higher one.
    pub fn filter_duplicates(&self, contexts: Vec<TokenContext>) -> Vec<TokenContext> {
        let mut by_address: HashMap<String, usize> = HashMap::new();
        let mut out: Vec<TokenContext> = Vec::new();

        for ctx in contexts {
            match by_address.get(&ctx.address) {
                None => {
                    by_address.insert(ctx.address.clone(), out.len());
                    out.push(ctx);
                }
                Some(&idx) => {
                    let kept = &out[idx];
                    let richer = ctx.confidence == kept.confidence
                        && ctx.signal_count() > kept.signal_count();
                    if ctx.confidence > kept.confidence || richer {
                        out[idx] = ctx;
                    }
                }
            }
        }

        out
    }

    /// Extraction + dedup + validation + confidence floor, composed.
    /// Anything below `min_confidence` is excluded.
    pub fn get_validated_matches(&self, text: &str, min_confidence: f64) -> Vec<TokenContext> {
        let contexts = self.extract_with_context(text);
        let deduped = self.filter_duplicates(contexts);

        deduped
            .into_iter()
            .filter(|ctx| {
                if !address::validate(&ctx.address) {
                    self.count_rejection(ctx.source_matcher);
                    return false;
                }
                ctx.confidence >= min_confidence
            })
            .collect()
    }

    /// The configured default confidence floor
    pub fn min_confidence(&self) -> f64 {
        self.config.min_confidence
    }

    fn count_rejection(&self, matcher_name: &'static str) {
        debug!(matcher = matcher_name, "address failed validation");
        self.metrics
            .increment("validation_rejections", &[("matcher", matcher_name)]);
    }
}
