//! Matcher table and auxiliary context patterns
//!
//! Matchers are a declarative, immutable list compiled once at startup.
//! Declaration order encodes trust: URL matchers from known explorer and
//! trading sites first (confidence 1.0), then labeled addresses (0.9),
//! then bare identifier-shaped runs (0.7). Order is also the tie-break
//! for deduplication: on equal confidence, the earlier matcher wins.
//!
//! Capture patterns use a loose alphanumeric shape. Strict base-58
//! alphabet checks happen in `address::validate`, after capture, so a
//! near-miss still yields a context window (useful signal) before it is
//! filtered from validated output.

use regex::Regex;

/// Identifier-shaped run: the raw capture shape, before validation
const ADDRESS_SHAPE: &str = r"[A-Za-z0-9]{32,44}";

/// A named pattern with a capture rule and a trust weight
pub struct Matcher {
    pub name: &'static str,
    pub regex: Regex,
    pub capture_index: usize,
    pub confidence: f64,
}

lazy_static::lazy_static! {
    /// The matcher table. Ordering matters: first-declared wins on
    /// equal-confidence duplicates.
    pub static ref MATCHERS: Vec<Matcher> = vec![
        Matcher {
            name: "pump_fun",
            regex: Regex::new(&format!(
                r"(?i:pump\.fun/(?:token/)?)({ADDRESS_SHAPE})"
            )).expect("pump_fun pattern"),
            capture_index: 1,
            confidence: 1.0,
        },
        Matcher {
            name: "dexscreener",
            regex: Regex::new(&format!(
                r"(?i:dexscreener\.com/solana/)({ADDRESS_SHAPE})"
            )).expect("dexscreener pattern"),
            capture_index: 1,
            confidence: 1.0,
        },
        Matcher {
            name: "birdeye",
            regex: Regex::new(&format!(
                r"(?i:birdeye\.so/token/)({ADDRESS_SHAPE})"
            )).expect("birdeye pattern"),
            capture_index: 1,
            confidence: 1.0,
        },
        Matcher {
            name: "solscan",
            regex: Regex::new(&format!(
                r"(?i:solscan\.io/token/)({ADDRESS_SHAPE})"
            )).expect("solscan pattern"),
            capture_index: 1,
            confidence: 1.0,
        },
        Matcher {
            name: "labeled_address",
            regex: Regex::new(&format!(
                r"(?i:\b(?:token|contract|address|ca|mint)\b[^\r\n]{{0,30}}?)\b({ADDRESS_SHAPE})\b"
            )).expect("labeled_address pattern"),
            capture_index: 1,
            confidence: 0.9,
        },
        Matcher {
            name: "bare_address",
            regex: Regex::new(&format!(r"\b({ADDRESS_SHAPE})\b"))
                .expect("bare_address pattern"),
            capture_index: 1,
            confidence: 0.7,
        },
    ];

    /// Currency amounts: "$1.2M", "$450", "0.0043 SOL", "5000 usd"
    pub static ref PRICE_RE: Regex = Regex::new(
        r"(?i)\$\s?\d[\d,]*(?:\.\d+)?\s?[kmb]?\b|\b\d[\d,]*(?:\.\d+)?\s?(?:sol|usd|usdc)\b"
    ).expect("price pattern");

    /// Percentage and multiplier expressions: "120%", "up 3.5x"
    pub static ref PERCENT_RE: Regex = Regex::new(
        r"\b\d[\d,]*(?:\.\d+)?\s?(?:%|[xX]\b)"
    ).expect("percent pattern");

    /// Holder counts: "50K holders", "1,200 holders"
    pub static ref HOLDERS_RE: Regex = Regex::new(
        r"(?i)\b\d[\d,]*(?:\.\d+)?\s?k?\s?holders\b"
    ).expect("holders pattern");

    /// Market-cap expressions: "mcap 500k", "market cap $1.2M", "MC: 80k"
    pub static ref MCAP_RE: Regex = Regex::new(
        r"(?i)\b(?:mcap|mc|market\s?cap)\b\s?:?\s?\$?\d[\d,]*(?:\.\d+)?\s?[kmb]?\b"
    ).expect("mcap pattern");

    /// Positive sentiment keywords, matched on word boundaries
    pub static ref POSITIVE_RE: Regex = Regex::new(
        r"(?i)\b(?:moon|gem|rocket|pump|bullish|early|100x|lfg|send|ape|alpha)\b"
    ).expect("positive keyword pattern");

    /// Negative sentiment keywords, matched on word boundaries
    pub static ref NEGATIVE_RE: Regex = Regex::new(
        r"(?i)\b(?:rug|scam|dump|honeypot|rekt|bearish|avoid|fake|exit)\b"
    ).expect("negative keyword pattern");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matcher_order_is_decreasing_trust() {
        let confidences: Vec<f64> = MATCHERS.iter().map(|m| m.confidence).collect();
        for pair in confidences.windows(2) {
            assert!(pair[0] >= pair[1], "matcher table must be ordered by trust");
        }
    }

    #[test]
    fn test_pump_fun_url_forms() {
        let m = &MATCHERS[0];
        let addr = "So11111111111111111111111111111111111111112";
        for text in [
            format!("pump.fun/token/{}", addr),
            format!("https://pump.fun/{}", addr),
            format!("PUMP.FUN/token/{}", addr),
        ] {
            let caps = m.regex.captures(&text).expect("should match");
            assert_eq!(&caps[m.capture_index], addr);
        }
    }

    #[test]
    fn test_case_insensitivity_does_not_leak_into_capture() {
        // The (?i:) group covers the site literal only; the capture stays
        // a case-sensitive alphanumeric class.
        let m = &MATCHERS[0];
        let text = "pump.fun/token/So11111111111111111111111111111111111111112";
        assert!(m.regex.is_match(text));
    }

    #[test]
    fn test_labeled_address() {
        let m = MATCHERS.iter().find(|m| m.name == "labeled_address").unwrap();
        let text = "CA: 7EYnhQoR9YM3N7UoaKRoA44Uy8JeaZV3qyouov87awMs";
        let caps = m.regex.captures(text).unwrap();
        assert_eq!(&caps[1], "7EYnhQoR9YM3N7UoaKRoA44Uy8JeaZV3qyouov87awMs");
    }

    #[test]
    fn test_bare_address_requires_boundaries() {
        let m = MATCHERS.iter().find(|m| m.name == "bare_address").unwrap();
        // 45+ chars: the run exceeds the shape, the word boundary check
        // prevents a partial capture inside it
        let text = "x".repeat(60);
        assert!(m.regex.captures(&text).is_none());
    }

    #[test]
    fn test_aux_patterns() {
        assert!(PRICE_RE.is_match("$1.2M in volume"));
        assert!(PRICE_RE.is_match("0.0043 SOL"));
        assert!(PERCENT_RE.is_match("up 120%"));
        assert!(PERCENT_RE.is_match("did a 3.5x"));
        assert!(HOLDERS_RE.is_match("50K holders"));
        assert!(HOLDERS_RE.is_match("1,200 holders"));
        assert!(MCAP_RE.is_match("mcap 500k"));
        assert!(MCAP_RE.is_match("market cap $1.2M"));
        assert!(!HOLDERS_RE.is_match("shareholders meeting"));
    }

    #[test]
    fn test_sentiment_keywords_word_bounded() {
        assert_eq!(POSITIVE_RE.find_iter("moon gem rocket").count(), 3);
        // Substrings of longer words do not count
        assert_eq!(POSITIVE_RE.find_iter("moonshot gemstone").count(), 0);
        assert_eq!(NEGATIVE_RE.find_iter("total rug, obvious scam").count(), 2);
    }
}
