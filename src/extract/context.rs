//! Context windows, secondary signals and lexical sentiment
//!
//! A context window is the text surrounding a match. Within it we harvest
//! price, percentage, holder-count and market-cap mentions, and estimate
//! sentiment by counting keyword occurrences. This is word-counting, not
//! semantic analysis; false positives are expected and acceptable.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::patterns::{HOLDERS_RE, MCAP_RE, NEGATIVE_RE, PERCENT_RE, POSITIVE_RE, PRICE_RE};

/// A token mention enriched with its surrounding context
#[derive(Debug, Clone, Serialize)]
pub struct TokenContext {
    /// Raw captured address (validated separately)
    pub address: String,
    /// Name of the matcher that produced the hit
    pub source_matcher: &'static str,
    /// The matcher's trust weight
    pub confidence: f64,
    /// Context window around the match
    pub surrounding_text: String,
    /// Currency amounts found in the window
    pub price_mentions: Vec<String>,
    /// Percentage / multiplier expressions found in the window
    pub percentage_mentions: Vec<String>,
    /// Holder counts found in the window
    pub holder_mentions: Vec<String>,
    /// Market-cap expressions found in the window
    pub mcap_mentions: Vec<String>,
    /// Lexical sentiment in [-1, 1]
    pub sentiment: f64,
    /// When this context was built
    pub observed_at: DateTime<Utc>,
}

impl TokenContext {
    /// Build a context record for a match by scanning its window
    pub fn from_window(
        address: String,
        source_matcher: &'static str,
        confidence: f64,
        window: &str,
    ) -> Self {
        Self {
            address,
            source_matcher,
            confidence,
            surrounding_text: window.to_string(),
            price_mentions: collect(&PRICE_RE, window),
            percentage_mentions: collect(&PERCENT_RE, window),
            holder_mentions: collect(&HOLDERS_RE, window),
            mcap_mentions: collect(&MCAP_RE, window),
            sentiment: sentiment(window),
            observed_at: Utc::now(),
        }
    }

    /// Combined count of secondary signals, used as the dedup tie-break:
    /// on equal confidence the richer context wins
    pub fn signal_count(&self) -> usize {
        self.price_mentions.len()
            + self.percentage_mentions.len()
            + self.holder_mentions.len()
            + self.mcap_mentions.len()
    }
}

fn collect(re: &regex::Regex, window: &str) -> Vec<String> {
    re.find_iter(window).map(|m| m.as_str().to_string()).collect()
}

/// Lexical sentiment: `(positive - negative) / (positive + negative)`,
/// 0.0 when neither keyword set occurs
pub fn sentiment(window: &str) -> f64 {
    let positive = POSITIVE_RE.find_iter(window).count() as f64;
    let negative = NEGATIVE_RE.find_iter(window).count() as f64;

    if positive + negative == 0.0 {
        return 0.0;
    }

    (positive - negative) / (positive + negative)
}

/// Slice a window of `radius` characters on each side of the byte span
/// `[start, end)`, staying on char boundaries for multi-byte input.
pub fn window_around(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let window_start = text[..start]
        .char_indices()
        .rev()
        .nth(radius.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);

    let window_end = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());

    &text[window_start..window_end]
}
