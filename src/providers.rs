//! External collaborators named in spec.md §6, behind small traits so tests
//! can substitute fakes. Seam style grounded on
//! `vault::execution::ExecutionAdapter` (`#[async_trait] trait ... + Send + Sync`).

use crate::error::{Result, SurveilError};
use crate::models::Market;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const WS_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// GET the markets endpoint (paginated), per spec.md §6.
#[async_trait]
pub trait MarketsApi: Send + Sync {
    async fn fetch_active_markets(&self, cursor: Option<&str>) -> Result<(Vec<Market>, Option<String>)>;
}

/// GET the leader status endpoint by market id.
#[derive(Debug, Clone)]
pub struct LeaderStatus {
    pub id: String,
    pub question: String,
    pub closed: bool,
    pub resolved: bool,
    pub outcome: Option<String>,
    pub yes_price: Option<f64>,
}

#[async_trait]
pub trait LeaderStatusApi: Send + Sync {
    async fn fetch_status(&self, market_id: &str) -> Result<LeaderStatus>;
}

/// Maps texts to fixed-length embedding vectors, with provider-side caching
/// left to the caller (the Opportunity State owns the cache, per spec.md §4.9).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f64>>>;
}

/// Chat-completion style LLM used for cluster labeling and pair evaluation.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// One-way notification sink; may fail.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Downgrade path from spec.md §7: no notifier credentials configured, so
/// alerts are logged to stdout instead of crashing.
pub struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        println!("{text}");
        Ok(())
    }
}

/// Stand-in for when no embedding/LLM vendor is configured: every call fails,
/// which drives the discovery pipeline's documented degrade paths (rule-based
/// topic fallback, pairs treated as UNRELATED and left uncached) rather than
/// leaving the periodic scan unscheduled.
pub struct UnconfiguredEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for UnconfiguredEmbeddingProvider {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f64>>> {
        Err(SurveilError::Config("no embedding provider configured".into()))
    }
}

pub struct UnconfiguredLlmProvider;

#[async_trait]
impl LlmProvider for UnconfiguredLlmProvider {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(SurveilError::Config("no LLM provider configured".into()))
    }
}

/// reqwest-backed markets API client against the exchange's HTTPS endpoint.
pub struct HttpMarketsApi {
    client: Client,
    base_url: String,
}

impl HttpMarketsApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder().timeout(HTTP_TIMEOUT).build().unwrap(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    id: String,
    #[serde(rename = "conditionId")]
    condition_id: Option<String>,
    slug: Option<String>,
    question: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "endDate")]
    end_date: Option<String>,
    #[serde(rename = "clobTokenIds")]
    clob_token_ids: Option<String>,
    #[serde(rename = "outcomePrices")]
    outcome_prices: Option<String>,
    #[serde(rename = "volume24hr", default)]
    volume_24hr: f64,
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    markets: Vec<RawMarket>,
}

#[async_trait]
impl MarketsApi for HttpMarketsApi {
    async fn fetch_active_markets(&self, cursor: Option<&str>) -> Result<(Vec<Market>, Option<String>)> {
        let mut req = self.client.get(&self.base_url);
        if let Some(c) = cursor {
            req = req.query(&[("cursor", c)]);
        }

        let resp = req.send().await.map_err(|e| SurveilError::Transport {
            endpoint: self.base_url.clone(),
            source: e.into(),
        })?;

        if resp.status().as_u16() == 429 {
            return Err(SurveilError::RateLimited {
                endpoint: self.base_url.clone(),
            });
        }

        let events: Vec<RawEvent> = resp.json().await.map_err(|e| SurveilError::Schema {
            what: "markets response".to_string(),
            reason: e.to_string(),
        })?;

        let mut markets = Vec::new();
        for event in events {
            for m in event.markets {
                let token_ids: Vec<String> = m
                    .clob_token_ids
                    .as_deref()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_default();
                let prices: Vec<f64> = m
                    .outcome_prices
                    .as_deref()
                    .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
                    .map(|v| v.iter().filter_map(|p| p.parse().ok()).collect())
                    .unwrap_or_default();

                if token_ids.len() < 2 {
                    warn!(market_id = %m.id, "market missing two clob token ids, dropping");
                    continue;
                }

                let end_time_ms = m
                    .end_date
                    .as_deref()
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.timestamp_millis())
                    .unwrap_or(0);

                markets.push(Market {
                    id: m.id.clone(),
                    condition_id: m.condition_id.unwrap_or(m.id),
                    slug: m.slug,
                    question: m.question,
                    description: m.description,
                    end_time_ms,
                    yes_token_id: token_ids[0].clone(),
                    no_token_id: token_ids[1].clone(),
                    yes_price: prices.first().copied().unwrap_or(0.5),
                    no_price: prices.get(1).copied().unwrap_or(0.5),
                    volume_24hr: m.volume_24hr,
                    closed: m.closed,
                });
            }
        }

        Ok((markets, None))
    }
}

pub struct HttpLeaderStatusApi {
    client: Client,
    base_url: String,
}

impl HttpLeaderStatusApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder().timeout(HTTP_TIMEOUT).build().unwrap(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawToken {
    outcome: String,
    price: f64,
}

#[derive(Debug, Deserialize)]
struct RawLeaderStatus {
    id: String,
    question: String,
    #[serde(default)]
    closed: bool,
    #[serde(default)]
    resolved: bool,
    outcome: Option<String>,
    winning_outcome: Option<String>,
    #[serde(default)]
    tokens: Vec<RawToken>,
}

#[async_trait]
impl LeaderStatusApi for HttpLeaderStatusApi {
    async fn fetch_status(&self, market_id: &str) -> Result<LeaderStatus> {
        let url = format!("{}/{}", self.base_url, market_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SurveilError::Transport {
                endpoint: url.clone(),
                source: e.into(),
            })?
            .json::<RawLeaderStatus>()
            .await
            .map_err(|e| SurveilError::Schema {
                what: "leader status response".to_string(),
                reason: e.to_string(),
            })?;

        let yes_price = resp
            .tokens
            .iter()
            .find(|t| t.outcome.eq_ignore_ascii_case("yes"))
            .map(|t| t.price);

        Ok(LeaderStatus {
            id: resp.id,
            question: resp.question,
            closed: resp.closed,
            resolved: resp.resolved,
            outcome: resp.outcome.or(resp.winning_outcome),
            yes_price,
        })
    }
}

/// Parses an outcome string against the permissive set spec.md §4.11 names.
pub fn parse_outcome(raw: &str) -> Option<crate::models::LeaderOutcome> {
    match raw.trim().to_lowercase().as_str() {
        "yes" | "1" | "true" => Some(crate::models::LeaderOutcome::Yes),
        "no" | "0" | "false" => Some(crate::models::LeaderOutcome::No),
        _ => None,
    }
}

/// Strips a leading/trailing markdown code fence before JSON parsing, per
/// spec.md §9's "LLM as untrusted oracle" note.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

pub fn canonical_pair_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}{b}")
    } else {
        format!("{b}{a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn canonical_pair_id_is_order_independent() {
        assert_eq!(canonical_pair_id("a", "b"), canonical_pair_id("b", "a"));
    }

    #[test]
    fn parses_permissive_outcomes() {
        assert_eq!(parse_outcome("YES"), Some(crate::models::LeaderOutcome::Yes));
        assert_eq!(parse_outcome("0"), Some(crate::models::LeaderOutcome::No));
        assert_eq!(parse_outcome("maybe"), None);
    }
}
