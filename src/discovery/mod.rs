//! Periodic discovery pipeline (spec.md §4.9): ingest markets, embed
//! questions, cluster, label clusters, evaluate candidate pairs with an
//! LLM, filter to actionable relations, and register opportunities.

mod clustering;
mod topics;

use crate::config::Config;
use crate::market_filter;
use crate::models::{AnalyzedPair, Market, MarketRelation, RelationshipType, SeenMarket};
use crate::opportunity_state::OpportunityState;
use crate::providers::{canonical_pair_id, strip_code_fences, EmbeddingProvider, LlmProvider, MarketsApi, Notifier};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

pub struct DiscoveryPipeline {
    config: Arc<Config>,
    markets_api: Arc<dyn MarketsApi>,
    embeddings: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    state: Arc<OpportunityState>,
    notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Deserialize)]
struct LlmPairReply {
    #[serde(rename = "isSameEvent", default)]
    _is_same_event: bool,
    #[serde(rename = "areMutuallyExclusive", default)]
    _are_mutually_exclusive: bool,
    #[serde(rename = "relationshipType")]
    relationship_type: RelationshipType,
    #[serde(rename = "confidenceScore")]
    confidence_score: f64,
    #[serde(rename = "tradingRationale", default)]
    trading_rationale: String,
    #[serde(rename = "expectedEdge", default)]
    expected_edge: String,
}

impl DiscoveryPipeline {
    pub fn new(
        config: Arc<Config>,
        markets_api: Arc<dyn MarketsApi>,
        embeddings: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        state: Arc<OpportunityState>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            markets_api,
            embeddings,
            llm,
            state,
            notifier,
        }
    }

    /// One full scan: ingest -> embed -> cluster -> label -> evaluate pairs
    /// -> register opportunities -> cache maintenance.
    pub async fn run_scan(&self, now_ms: i64) -> anyhow::Result<usize> {
        let markets = self.ingest_markets(now_ms).await?;
        if markets.len() < 2 {
            info!("discovery scan: fewer than two in-universe markets, skipping");
            return Ok(0);
        }

        let vectors = self.embed_markets(&markets).await;
        let k = clustering::k_for(markets.len());
        let assignments = clustering::k_means(&vectors, k, now_ms as u64);

        let mut clusters: Vec<Vec<usize>> = vec![Vec::new(); k];
        for (idx, &cluster) in assignments.iter().enumerate() {
            clusters[cluster].push(idx);
        }

        let mut registered = 0;
        for member_indices in clusters.iter().filter(|c| c.len() >= 2) {
            let series_id = cluster_series_id(member_indices.iter().map(|&i| markets[i].id.as_str()));
            registered += self.evaluate_cluster(&markets, member_indices, &series_id).await?;
        }

        let purged = self
            .state
            .cleanup_ended_markets(now_ms, self.config.market_retention_days)?;
        if purged > 0 {
            info!(purged, "discovery cache: purged ended markets");
        }

        Ok(registered)
    }

    async fn ingest_markets(&self, now_ms: i64) -> anyhow::Result<Vec<Market>> {
        let mut out = Vec::new();
        let mut cursor = None;
        loop {
            let (page, next) = self.markets_api.fetch_active_markets(cursor.as_deref()).await?;
            for m in page {
                if m.closed {
                    continue;
                }
                let seven_days_ms = 7 * 24 * 60 * 60 * 1000;
                if m.end_time_ms - now_ms < seven_days_ms {
                    continue;
                }
                if m.volume_24hr < 10_000.0 {
                    continue;
                }
                let filter = market_filter::classify(&m, &[], now_ms);
                if !filter.in_universe {
                    continue;
                }
                self.state.mark_market_seen(
                    &m.id,
                    SeenMarket {
                        question: m.question.clone(),
                        end_time_ms: m.end_time_ms,
                        first_seen_ms: now_ms,
                    },
                )?;
                out.push(m);
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        out.sort_by(|a, b| b.volume_24hr.partial_cmp(&a.volume_24hr).unwrap());
        Ok(out)
    }

    async fn embed_markets(&self, markets: &[Market]) -> Vec<Vec<f64>> {
        let mut vectors = Vec::with_capacity(markets.len());
        let mut to_fetch = Vec::new();
        let mut to_fetch_idx = Vec::new();

        for (i, m) in markets.iter().enumerate() {
            if let Some(v) = self.state.get_embedding(&m.id) {
                vectors.push(Some(v));
            } else {
                vectors.push(None);
                to_fetch.push(m.question.clone());
                to_fetch_idx.push(i);
            }
        }

        if !to_fetch.is_empty() {
            match self.embeddings.embed(&to_fetch).await {
                Ok(fetched) => {
                    for (idx, vec) in to_fetch_idx.into_iter().zip(fetched) {
                        let _ = self.state.save_embedding(&markets[idx].id, vec.clone());
                        vectors[idx] = Some(vec);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "embedding provider failed, falling back to rule-based topics");
                }
            }
        }

        // Fallback: one-hot-ish vector over the closed taxonomy when the
        // provider failed or a slot is still empty.
        vectors
            .into_iter()
            .zip(markets.iter())
            .map(|(v, m)| v.unwrap_or_else(|| topic_fallback_vector(&m.question)))
            .collect()
    }

    async fn evaluate_cluster(
        &self,
        markets: &[Market],
        member_indices: &[usize],
        series_id: &str,
    ) -> anyhow::Result<usize> {
        let mut registered = 0;
        let max_pairs = self.config.max_pairs_per_cluster;
        let mut pairs_done = 0;

        for (a_pos, &a_idx) in member_indices.iter().enumerate() {
            for &b_idx in &member_indices[a_pos + 1..] {
                if pairs_done >= max_pairs {
                    return Ok(registered);
                }
                pairs_done += 1;

                let m1 = &markets[a_idx];
                let m2 = &markets[b_idx];
                let time_gap_days =
                    (m1.end_time_ms - m2.end_time_ms).unsigned_abs() as f64 / 86_400_000.0;
                if time_gap_days < self.config.min_time_gap_days {
                    continue;
                }

                let relation = self.evaluate_pair(m1, m2, time_gap_days, series_id).await?;
                if let Some(relation) = relation {
                    if self.register_if_actionable(relation).await? {
                        registered += 1;
                    }
                }
            }
        }
        Ok(registered)
    }

    async fn evaluate_pair(
        &self,
        m1: &Market,
        m2: &Market,
        time_gap_days: f64,
        series_id: &str,
    ) -> anyhow::Result<Option<MarketRelation>> {
        let both_seen_before = !self.state.is_market_new(&m1.id) && !self.state.is_market_new(&m2.id);
        if self.state.is_pair_analyzed(&m1.id, &m2.id) && both_seen_before {
            let cached = self.state.get_pair_result(&m1.id, &m2.id).unwrap();
            return Ok(self.to_relation(m1, m2, time_gap_days, cached.result, cached.confidence, series_id));
        }

        let system = "You are a prediction-market analyst judging whether two markets resolve on the same underlying event.";
        let user = format!(
            "Market 1: \"{}\"\nMarket 2: \"{}\"\nRespond with JSON: {{\"isSameEvent\": bool, \"areMutuallyExclusive\": bool, \"relationshipType\": \"SAME_OUTCOME\"|\"DIFFERENT_OUTCOME\"|\"UNRELATED\"|\"SAME_EVENT_REJECT\", \"confidenceScore\": number, \"tradingRationale\": string, \"expectedEdge\": string}}",
            m1.question, m2.question
        );

        let raw = self.llm.complete(system, &user).await?;
        let cleaned = strip_code_fences(&raw);

        let parsed: Result<LlmPairReply, _> = serde_json::from_str(cleaned);
        let reply = match parsed {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "unparseable LLM reply, treating pair as UNRELATED without caching");
                return Ok(None);
            }
        };

        self.state.save_pair_result(
            &m1.id,
            &m2.id,
            AnalyzedPair {
                market1_id: m1.id.clone(),
                market2_id: m2.id.clone(),
                result: reply.relationship_type,
                confidence: reply.confidence_score,
                analyzed_at_ms: chrono::Utc::now().timestamp_millis(),
            },
        )?;

        Ok(self.to_relation(
            m1,
            m2,
            time_gap_days,
            reply.relationship_type,
            reply.confidence_score,
            series_id,
        )
        .map(|mut r| {
            r.trading_rationale = reply.trading_rationale.clone();
            r.expected_edge = reply.expected_edge.clone();
            r
        }))
    }

    fn to_relation(
        &self,
        m1: &Market,
        m2: &Market,
        time_gap_days: f64,
        relationship: RelationshipType,
        confidence: f64,
        series_id: &str,
    ) -> Option<MarketRelation> {
        let (leader, follower) = if m1.end_time_ms <= m2.end_time_ms {
            (m1, m2)
        } else {
            (m2, m1)
        };
        Some(MarketRelation {
            relationship,
            confidence,
            trading_rationale: String::new(),
            expected_edge: String::new(),
            leader_id: leader.id.clone(),
            follower_id: follower.id.clone(),
            leader_end_time_ms: leader.end_time_ms,
            time_gap_days,
            series_id: Some(series_id.to_string()),
        })
    }

    /// Keep only SAME_OUTCOME/DIFFERENT_OUTCOME pairs with confidence >= min.
    async fn register_if_actionable(&self, relation: MarketRelation) -> anyhow::Result<bool> {
        let actionable = matches!(
            relation.relationship,
            RelationshipType::SameOutcome | RelationshipType::DifferentOutcome
        ) && relation.confidence >= self.config.min_confidence;

        if !actionable {
            return Ok(false);
        }

        let leader_id = relation.leader_id.clone();
        let follower_id = relation.follower_id.clone();
        if let Some(opp) = self.state.add_opportunity(relation)? {
            let _ = self
                .notifier
                .send(&format!(
                    "New opportunity {}: leader {} -> follower {}",
                    opp.pair_id, leader_id, follower_id
                ))
                .await;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Deterministic pseudo-embedding fallback: a one-hot-ish vector over the
/// closed topic taxonomy, so clustering still groups same-topic markets
/// together when the embedding provider is unavailable.
fn topic_fallback_vector(question: &str) -> Vec<f64> {
    const TAXONOMY: &[&str] = &[
        "politics", "finance", "geopolitics", "economy", "tech", "ai", "culture", "elections", "other",
    ];
    let topic = topics::classify(question);
    TAXONOMY
        .iter()
        .map(|t| if *t == topic { 1.0 } else { 0.0 })
        .collect()
}

pub fn canonical_pair(a: &str, b: &str) -> String {
    canonical_pair_id(a, b)
}

/// Stable id for the set of markets clustered together in one scan, so
/// pairs drawn from the same cluster share a `series_id` (e.g. a monthly
/// Fed-rate-cut series). Hash of the sorted member ids, independent of
/// enumeration order.
fn cluster_series_id<'a>(member_ids: impl Iterator<Item = &'a str>) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut ids: Vec<&str> = member_ids.collect();
    ids.sort_unstable();
    let mut hasher = DefaultHasher::new();
    for id in &ids {
        id.hash(&mut hasher);
    }
    format!("series-{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::StdoutNotifier;
    use async_trait::async_trait;

    fn market(id: &str, question: &str, end_time_ms: i64) -> Market {
        Market {
            id: id.to_string(),
            condition_id: id.to_string(),
            slug: None,
            question: question.to_string(),
            description: String::new(),
            end_time_ms,
            yes_token_id: "y".into(),
            no_token_id: "n".into(),
            yes_price: 0.5,
            no_price: 0.5,
            volume_24hr: 50_000.0,
            closed: false,
        }
    }

    struct FixedMarketsApi(Vec<Market>);

    #[async_trait]
    impl MarketsApi for FixedMarketsApi {
        async fn fetch_active_markets(
            &self,
            _cursor: Option<&str>,
        ) -> crate::error::Result<(Vec<Market>, Option<String>)> {
            Ok((self.0.clone(), None))
        }
    }

    struct FixedEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbeddings {
        async fn embed(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f64>>> {
            // Both questions land in the same synthetic cluster.
            Ok(texts.iter().map(|_| vec![1.0, 1.0]).collect())
        }
    }

    struct FixedLlm;

    #[async_trait]
    impl LlmProvider for FixedLlm {
        async fn complete(&self, _system: &str, _user: &str) -> crate::error::Result<String> {
            Ok(r#"{"isSameEvent": true, "areMutuallyExclusive": false, "relationshipType": "SAME_OUTCOME", "confidenceScore": 0.8, "tradingRationale": "same event", "expectedEdge": "buy follower"}"#.to_string())
        }
    }

    #[tokio::test]
    async fn discovers_leader_follower_scenario_s5() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(Config::default());
        let dec_31 = 1735689600000i64;
        let jan_31 = dec_31 + 31 * 86_400_000;
        let markets = vec![
            market("A", "Will the Federal Reserve cut interest rates in December?", dec_31),
            market("B", "Will the Federal Reserve cut interest rates in January?", jan_31),
        ];

        let pipeline = DiscoveryPipeline::new(
            config,
            Arc::new(FixedMarketsApi(markets)),
            Arc::new(FixedEmbeddings),
            Arc::new(FixedLlm),
            Arc::new(OpportunityState::load(dir.path().join("s.json")).unwrap()),
            Arc::new(StdoutNotifier),
        );

        let registered = pipeline.run_scan(dec_31 - 40 * 86_400_000).await.unwrap();
        assert_eq!(registered, 1);

        let opps = pipeline.state.get_active_opportunities();
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].relation.leader_id, "A");
        assert_eq!(opps[0].relation.follower_id, "B");
        assert!((opps[0].relation.time_gap_days - 31.0).abs() < 0.01);
    }
}
