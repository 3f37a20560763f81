//! Durable JSON state for discovered leader-follower opportunities plus the
//! discovery-pipeline cache (seen markets, analyzed pairs, embeddings), per
//! spec.md §4.10. Persistence follows the write-temp-then-rename idiom in
//! `bin/backtest_run.rs::write_output_atomic`.

use crate::models::{
    AnalyzedPair, LeaderOutcome, MarketRelation, Opportunity, OpportunityStatus, SeenMarket,
};
use crate::providers::canonical_pair_id;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheState {
    pub seen_markets: HashMap<String, SeenMarket>,
    pub analyzed_pairs: HashMap<String, AnalyzedPair>,
    pub embeddings: HashMap<String, Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub opportunities: Vec<Opportunity>,
    pub last_checked: String,
    pub cache: CacheState,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            opportunities: Vec::new(),
            last_checked: Utc::now().to_rfc3339(),
            cache: CacheState::default(),
        }
    }
}

pub struct OpportunityState {
    path: PathBuf,
    doc: RwLock<StateDocument>,
}

impl OpportunityState {
    /// Load-or-create a single JSON document on start.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Ok(Self {
            path,
            doc: RwLock::new(doc),
        })
    }

    pub fn has_opportunity(&self, market1: &str, market2: &str) -> bool {
        let pair_id = Opportunity::pair_id_for(market1, market2);
        self.doc.read().opportunities.iter().any(|o| o.pair_id == pair_id)
    }

    /// Idempotent insert keyed by `market1Id-market2Id`, per I8/opportunity
    /// round-trip property: `addOpportunity(r)` twice = once.
    pub fn add_opportunity(&self, relation: MarketRelation) -> anyhow::Result<Option<Opportunity>> {
        let pair_id = Opportunity::pair_id_for(&relation.leader_id, &relation.follower_id);
        {
            let doc = self.doc.read();
            if doc.opportunities.iter().any(|o| o.pair_id == pair_id) {
                return Ok(None);
            }
        }
        let now = Utc::now().timestamp_millis();
        let opp = Opportunity {
            pair_id: pair_id.clone(),
            relation,
            status: OpportunityStatus::Active,
            leader_outcome: None,
            threshold_trigger_price: None,
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.doc.write().opportunities.push(opp.clone());
        self.save()?;
        Ok(Some(opp))
    }

    pub fn get_unresolved_opportunities(&self) -> Vec<Opportunity> {
        self.doc
            .read()
            .opportunities
            .iter()
            .filter(|o| o.status != OpportunityStatus::Resolved)
            .cloned()
            .collect()
    }

    pub fn get_active_opportunities(&self) -> Vec<Opportunity> {
        self.doc
            .read()
            .opportunities
            .iter()
            .filter(|o| o.status == OpportunityStatus::Active)
            .cloned()
            .collect()
    }

    pub fn get_opportunities_in_series(&self, series_id: &str) -> Vec<Opportunity> {
        self.doc
            .read()
            .opportunities
            .iter()
            .filter(|o| o.relation.series_id.as_deref() == Some(series_id))
            .cloned()
            .collect()
    }

    /// Advance lifecycle forward-only (I8): active/threshold_triggered -> threshold_triggered.
    pub fn mark_threshold_triggered(&self, pair_id: &str, price: f64) -> anyhow::Result<bool> {
        let mut changed = false;
        {
            let mut doc = self.doc.write();
            if let Some(o) = doc.opportunities.iter_mut().find(|o| o.pair_id == pair_id) {
                if o.status == OpportunityStatus::Active {
                    o.status = OpportunityStatus::ThresholdTriggered;
                    o.threshold_trigger_price = Some(price);
                    o.updated_at_ms = Utc::now().timestamp_millis();
                    changed = true;
                }
            }
        }
        if changed {
            self.save()?;
        }
        Ok(changed)
    }

    /// active or threshold_triggered -> resolved.
    pub fn mark_leader_resolved(&self, pair_id: &str, outcome: LeaderOutcome) -> anyhow::Result<bool> {
        let mut changed = false;
        {
            let mut doc = self.doc.write();
            if let Some(o) = doc.opportunities.iter_mut().find(|o| o.pair_id == pair_id) {
                if o.status != OpportunityStatus::Resolved {
                    o.status = OpportunityStatus::Resolved;
                    o.leader_outcome = Some(outcome);
                    o.updated_at_ms = Utc::now().timestamp_millis();
                    changed = true;
                }
            }
        }
        if changed {
            self.save()?;
        }
        Ok(changed)
    }

    pub fn is_pair_analyzed(&self, id1: &str, id2: &str) -> bool {
        self.doc
            .read()
            .cache
            .analyzed_pairs
            .contains_key(&canonical_pair_id(id1, id2))
    }

    pub fn get_pair_result(&self, id1: &str, id2: &str) -> Option<AnalyzedPair> {
        self.doc
            .read()
            .cache
            .analyzed_pairs
            .get(&canonical_pair_id(id1, id2))
            .cloned()
    }

    pub fn save_pair_result(&self, id1: &str, id2: &str, result: AnalyzedPair) -> anyhow::Result<()> {
        self.doc
            .write()
            .cache
            .analyzed_pairs
            .insert(canonical_pair_id(id1, id2), result);
        self.save()
    }

    pub fn mark_market_seen(&self, market_id: &str, seen: SeenMarket) -> anyhow::Result<()> {
        self.doc
            .write()
            .cache
            .seen_markets
            .insert(market_id.to_string(), seen);
        self.save()
    }

    pub fn is_market_new(&self, market_id: &str) -> bool {
        !self.doc.read().cache.seen_markets.contains_key(market_id)
    }

    pub fn get_embedding(&self, market_id: &str) -> Option<Vec<f64>> {
        self.doc.read().cache.embeddings.get(market_id).cloned()
    }

    pub fn save_embedding(&self, market_id: &str, vector: Vec<f64>) -> anyhow::Result<()> {
        self.doc
            .write()
            .cache
            .embeddings
            .insert(market_id.to_string(), vector);
        self.save()
    }

    /// Purge SeenMarket and Embedding entries older than `retention_days`;
    /// walk markets first, then drop AnalyzedPair entries whose stored
    /// member ids reference a purged market (not a substring test against
    /// the concatenated pair key, which is unsound when one market id is a
    /// substring of another).
    pub fn cleanup_ended_markets(&self, now_ms: i64, retention_days: i64) -> anyhow::Result<usize> {
        let retention_ms = retention_days * 24 * 60 * 60 * 1000;
        let mut doc = self.doc.write();

        let purged: std::collections::HashSet<String> = doc
            .cache
            .seen_markets
            .iter()
            .filter(|(_, s)| now_ms - s.end_time_ms > retention_ms)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &purged {
            doc.cache.seen_markets.remove(id);
            doc.cache.embeddings.remove(id);
        }

        if !purged.is_empty() {
            doc.cache.analyzed_pairs.retain(|_, pair| {
                !purged.contains(&pair.market1_id) && !purged.contains(&pair.market2_id)
            });
        }

        let count = purged.len();
        drop(doc);
        if count > 0 {
            self.save()?;
        }
        Ok(count)
    }

    /// Atomic write: temp file, fsync, rename.
    pub fn save(&self) -> anyhow::Result<()> {
        let doc = self.doc.read();
        let mut to_write = (*doc).clone();
        to_write.last_checked = Utc::now().to_rfc3339();
        drop(doc);

        let json = serde_json::to_string_pretty(&to_write)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RelationshipType;

    fn relation(leader: &str, follower: &str) -> MarketRelation {
        MarketRelation {
            relationship: RelationshipType::SameOutcome,
            confidence: 0.8,
            trading_rationale: "r".into(),
            expected_edge: "e".into(),
            leader_id: leader.into(),
            follower_id: follower.into(),
            leader_end_time_ms: 0,
            time_gap_days: 31.0,
            series_id: None,
        }
    }

    #[test]
    fn add_opportunity_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let state = OpportunityState::load(dir.path().join("s.json")).unwrap();
        let first = state.add_opportunity(relation("A", "B")).unwrap();
        let second = state.add_opportunity(relation("A", "B")).unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(state.get_unresolved_opportunities().len(), 1);
    }

    #[test]
    fn pair_cache_is_order_independent() {
        let dir = tempfile::tempdir().unwrap();
        let state = OpportunityState::load(dir.path().join("s.json")).unwrap();
        state
            .save_pair_result(
                "A",
                "B",
                AnalyzedPair {
                    market1_id: "A".into(),
                    market2_id: "B".into(),
                    result: RelationshipType::SameOutcome,
                    confidence: 0.8,
                    analyzed_at_ms: 0,
                },
            )
            .unwrap();
        assert!(state.is_pair_analyzed("A", "B"));
        assert!(state.is_pair_analyzed("B", "A"));
        assert_eq!(
            state.get_pair_result("A", "B").unwrap().confidence,
            state.get_pair_result("B", "A").unwrap().confidence
        );
    }

    /// `mkt-1` is a substring of the canonical pair key for `mkt-10`/`mkt-11`
    /// (e.g. "mkt-1mkt-11"). Purging `mkt-1` must not drop that unrelated
    /// pair's cache entry.
    #[test]
    fn cleanup_does_not_false_positive_on_substring_ids() {
        let dir = tempfile::tempdir().unwrap();
        let state = OpportunityState::load(dir.path().join("s.json")).unwrap();

        state
            .save_pair_result(
                "mkt-10",
                "mkt-11",
                AnalyzedPair {
                    market1_id: "mkt-10".into(),
                    market2_id: "mkt-11".into(),
                    result: RelationshipType::SameOutcome,
                    confidence: 0.9,
                    analyzed_at_ms: 0,
                },
            )
            .unwrap();

        state.mark_market_seen(
            "mkt-1",
            SeenMarket {
                question: "unrelated, ended long ago".into(),
                end_time_ms: 0,
                first_seen_ms: 0,
            },
        ).unwrap();

        let purged = state.cleanup_ended_markets(100_000_000_000, 1).unwrap();
        assert_eq!(purged, 1);
        assert!(state.is_pair_analyzed("mkt-10", "mkt-11"));
    }

    #[test]
    fn lifecycle_is_monotonic_forward() {
        let dir = tempfile::tempdir().unwrap();
        let state = OpportunityState::load(dir.path().join("s.json")).unwrap();
        let opp = state.add_opportunity(relation("A", "B")).unwrap().unwrap();
        state.mark_threshold_triggered(&opp.pair_id, 0.92).unwrap();
        state.mark_leader_resolved(&opp.pair_id, LeaderOutcome::Yes).unwrap();
        let opps = state.get_unresolved_opportunities();
        assert!(opps.is_empty());
    }

    #[test]
    fn save_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let state = OpportunityState::load(&path).unwrap();
        state.add_opportunity(relation("A", "B")).unwrap();
        let reloaded = OpportunityState::load(&path).unwrap();
        assert_eq!(reloaded.get_unresolved_opportunities().len(), 1);
    }
}
