//! Pure classifier deciding whether a market is in-universe for surveillance.
//!
//! Patterns are plain substring/keyword matches rather than a `regex` crate
//! dependency (see DESIGN.md) — the rule set in spec.md §4.1 only needs
//! literal and near-literal phrase matching, no quantifiers or groups.

use crate::models::Market;

const EXCLUSION_PATTERNS: &[&str] = &[
    "win the game",
    "super bowl",
    "world cup",
    "nba",
    "nfl",
    "mlb",
    "box office",
    "album of the year",
    "grammy",
    "oscar",
    "rain in",
    "temperature in",
    "weather",
    "will btc reach",
    "will eth reach",
    "price target",
    "hit $",
];

const INCLUSION_KEYWORDS: &[&str] = &[
    "election",
    "president",
    "senate",
    "congress",
    "governor",
    "regulation",
    "regulatory",
    "legislation",
    "supreme court",
    "lawsuit",
    "indict",
    "sec ",
    "fomc",
    "federal reserve",
    "interest rate",
    "inflation",
    "recession",
    "gdp",
    "war",
    "ceasefire",
    "sanctions",
    "nato",
    "treaty",
    "crypto",
    "bitcoin",
    "ethereum",
    "sec approval",
];

const HOT_KEYWORDS: &[&str] = &["resign", "indicted", "fomc", "ceasefire"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterResult {
    pub in_universe: bool,
    pub priority: f64,
}

/// Decide in-universe status and priority multiplier for a market, given its
/// question/description/tags/end-time/volume. Pure and deterministic.
pub fn classify(market: &Market, tags: &[String], now_ms: i64) -> FilterResult {
    let haystack = format!(
        "{} {} {}",
        market.question.to_lowercase(),
        market.description.to_lowercase(),
        tags.join(" ").to_lowercase()
    );

    if EXCLUSION_PATTERNS.iter().any(|p| haystack.contains(p)) {
        return FilterResult {
            in_universe: false,
            priority: 1.0,
        };
    }

    if !INCLUSION_KEYWORDS.iter().any(|k| haystack.contains(k)) {
        return FilterResult {
            in_universe: false,
            priority: 1.0,
        };
    }

    let priority = if HOT_KEYWORDS.iter().any(|k| haystack.contains(k)) {
        2.0
    } else if market.end_time_ms - now_ms <= 7 * 24 * 60 * 60 * 1000 {
        1.5
    } else {
        1.0
    };

    FilterResult {
        in_universe: true,
        priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(question: &str, end_time_ms: i64) -> Market {
        Market {
            id: "m1".into(),
            condition_id: "c1".into(),
            slug: None,
            question: question.into(),
            description: String::new(),
            end_time_ms,
            yes_token_id: "y".into(),
            no_token_id: "n".into(),
            yes_price: 0.5,
            no_price: 0.5,
            volume_24hr: 0.0,
            closed: false,
        }
    }

    #[test]
    fn rejects_sports() {
        let m = market("Will the Lakers win the game tonight?", i64::MAX);
        let r = classify(&m, &[], 0);
        assert!(!r.in_universe);
    }

    #[test]
    fn accepts_politics() {
        let m = market("Will the president resign before January?", i64::MAX);
        let r = classify(&m, &[], 0);
        assert!(r.in_universe);
        assert_eq!(r.priority, 2.0);
    }

    #[test]
    fn boosts_priority_near_resolution() {
        let now = 0i64;
        let m = market("Will the FOMC cut rates?", now + 3 * 24 * 60 * 60 * 1000);
        let r = classify(&m, &[], now);
        assert!(r.in_universe);
        assert_eq!(r.priority, 2.0); // hot keyword wins over the 7-day boost
    }

    #[test]
    fn rejects_when_no_keyword_matches() {
        let m = market("Will it be a nice day downtown?", i64::MAX);
        let r = classify(&m, &[], 0);
        assert!(!r.in_universe);
    }
}
