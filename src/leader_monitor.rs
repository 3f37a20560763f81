//! Periodic poller that reads a leader market's status and turns prior
//! discovery signals into actionable events, per spec.md §4.11.

use crate::models::{LeaderMonitorEvent, LeaderOutcome, Opportunity, OpportunityStatus, RelationshipType};
use crate::opportunity_state::OpportunityState;
use crate::providers::{parse_outcome, LeaderStatusApi, Notifier};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct LeaderMonitor {
    leader_status_api: Arc<dyn LeaderStatusApi>,
    state: Arc<OpportunityState>,
    notifier: Arc<dyn Notifier>,
    near_certainty_threshold: f64,
    per_market_delay: Duration,
}

impl LeaderMonitor {
    pub fn new(
        leader_status_api: Arc<dyn LeaderStatusApi>,
        state: Arc<OpportunityState>,
        notifier: Arc<dyn Notifier>,
        near_certainty_threshold: f64,
    ) -> Self {
        Self {
            leader_status_api,
            state,
            notifier,
            near_certainty_threshold,
            per_market_delay: Duration::from_millis(200),
        }
    }

    /// One scan over every unresolved opportunity.
    pub async fn run_scan(&self) -> anyhow::Result<Vec<LeaderMonitorEvent>> {
        let mut events = Vec::new();
        for opp in self.state.get_unresolved_opportunities() {
            if let Some(e) = self.check_one(&opp).await? {
                let _ = self.notifier.send(&format_event(&e)).await;
                events.push(e);
            }
            tokio::time::sleep(self.per_market_delay).await;
        }
        Ok(events)
    }

    async fn check_one(&self, opp: &Opportunity) -> anyhow::Result<Option<LeaderMonitorEvent>> {
        let status = match self.leader_status_api.fetch_status(&opp.relation.leader_id).await {
            Ok(s) => s,
            Err(e) => {
                warn!(pair_id = %opp.pair_id, error = %e, "leader status fetch failed");
                return Ok(None);
            }
        };

        if status.resolved || status.closed {
            return self.handle_resolution(opp, status.outcome.as_deref());
        }

        if let Some(yes_price) = status.yes_price {
            if yes_price >= self.near_certainty_threshold && opp.status == OpportunityStatus::Active {
                return self.handle_near_certainty(opp, yes_price);
            }
        }

        Ok(None)
    }

    fn handle_resolution(
        &self,
        opp: &Opportunity,
        outcome_raw: Option<&str>,
    ) -> anyhow::Result<Option<LeaderMonitorEvent>> {
        let outcome = match outcome_raw.and_then(parse_outcome) {
            Some(o) => o,
            None => {
                warn!(pair_id = %opp.pair_id, "leader resolved with ambiguous outcome, leaving unresolved");
                return Ok(None);
            }
        };

        let changed = self.state.mark_leader_resolved(&opp.pair_id, outcome)?;
        if !changed {
            return Ok(None);
        }

        let recommended_action = recommended_action(opp.relation.relationship, outcome);
        info!(pair_id = %opp.pair_id, ?outcome, "leader resolved");
        Ok(Some(LeaderMonitorEvent::Resolved {
            pair_id: opp.pair_id.clone(),
            leader_id: opp.relation.leader_id.clone(),
            follower_id: opp.relation.follower_id.clone(),
            outcome,
            recommended_action,
        }))
    }

    fn handle_near_certainty(
        &self,
        opp: &Opportunity,
        yes_price: f64,
    ) -> anyhow::Result<Option<LeaderMonitorEvent>> {
        let changed = self.state.mark_threshold_triggered(&opp.pair_id, yes_price)?;
        if !changed {
            return Ok(None);
        }

        info!(pair_id = %opp.pair_id, yes_price, "leader near certainty");

        if let Some(series_id) = &opp.relation.series_id {
            self.cascade(opp, series_id, yes_price)?;
        }

        Ok(Some(LeaderMonitorEvent::NearCertainty {
            pair_id: opp.pair_id.clone(),
            leader_id: opp.relation.leader_id.clone(),
            yes_price,
        }))
    }

    /// Later-dated siblings in the same series, still active, get
    /// threshold-triggered too; one CASCADE event per sibling.
    fn cascade(&self, opp: &Opportunity, series_id: &str, yes_price: f64) -> anyhow::Result<()> {
        let siblings = self.state.get_opportunities_in_series(series_id);
        for sib in siblings {
            if sib.pair_id == opp.pair_id {
                continue;
            }
            if sib.status != OpportunityStatus::Active {
                continue;
            }
            // Only siblings whose leader ends strictly later cascade: an
            // earlier leader resolving near-certainty says nothing about one
            // that already came and went.
            if sib.relation.leader_end_time_ms <= opp.relation.leader_end_time_ms {
                continue;
            }
            if self.state.mark_threshold_triggered(&sib.pair_id, yes_price)? {
                info!(pair_id = %sib.pair_id, triggered_by = %opp.pair_id, "cascade threshold trigger");
            }
        }
        Ok(())
    }
}

fn format_event(event: &LeaderMonitorEvent) -> String {
    match event {
        LeaderMonitorEvent::Resolved {
            pair_id,
            outcome,
            recommended_action,
            ..
        } => format!("{pair_id} leader resolved {outcome:?}: {recommended_action}"),
        LeaderMonitorEvent::NearCertainty { pair_id, yes_price, .. } => {
            format!("{pair_id} leader near certainty at {yes_price:.3}")
        }
        LeaderMonitorEvent::Cascade { pair_id, yes_price, .. } => {
            format!("{pair_id} cascade triggered at {yes_price:.3}")
        }
    }
}

fn recommended_action(relationship: RelationshipType, outcome: LeaderOutcome) -> String {
    match (relationship, outcome) {
        (RelationshipType::SameOutcome, LeaderOutcome::Yes) => "buy follower YES".to_string(),
        (RelationshipType::SameOutcome, LeaderOutcome::No) => "buy follower NO".to_string(),
        (RelationshipType::DifferentOutcome, LeaderOutcome::Yes) => "buy follower NO".to_string(),
        (RelationshipType::DifferentOutcome, LeaderOutcome::No) => "buy follower YES".to_string(),
        _ => "no action".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketRelation;
    use crate::providers::{LeaderStatus, StdoutNotifier};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct FakeLeaderStatusApi(Mutex<HashMap<String, LeaderStatus>>);

    #[async_trait]
    impl LeaderStatusApi for FakeLeaderStatusApi {
        async fn fetch_status(&self, market_id: &str) -> crate::error::Result<LeaderStatus> {
            Ok(self.0.lock().get(market_id).cloned().unwrap())
        }
    }

    fn relation(
        leader: &str,
        follower: &str,
        leader_end_time_ms: i64,
        series_id: Option<&str>,
    ) -> MarketRelation {
        MarketRelation {
            relationship: RelationshipType::SameOutcome,
            confidence: 0.8,
            trading_rationale: String::new(),
            expected_edge: String::new(),
            leader_id: leader.to_string(),
            follower_id: follower.to_string(),
            leader_end_time_ms,
            time_gap_days: 30.0,
            series_id: series_id.map(|s| s.to_string()),
        }
    }

    #[tokio::test]
    async fn cascade_scenario_s6() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(OpportunityState::load(dir.path().join("s.json")).unwrap());

        let jan_31 = 1738281600000i64;
        let feb_28 = jan_31 + 28 * 86_400_000;
        let mar_31 = feb_28 + 31 * 86_400_000;
        state
            .add_opportunity(relation("jan-leader", "jan-follower", jan_31, Some("maduro-out")))
            .unwrap();
        state
            .add_opportunity(relation("feb-leader", "feb-follower", feb_28, Some("maduro-out")))
            .unwrap();
        state
            .add_opportunity(relation("mar-leader", "mar-follower", mar_31, Some("maduro-out")))
            .unwrap();

        let mut statuses = HashMap::new();
        statuses.insert(
            "jan-leader".to_string(),
            LeaderStatus {
                id: "jan-leader".into(),
                question: "q".into(),
                closed: false,
                resolved: false,
                outcome: None,
                yes_price: Some(0.92),
            },
        );
        let api = Arc::new(FakeLeaderStatusApi(Mutex::new(statuses)));
        let monitor = LeaderMonitor::new(api, state.clone(), Arc::new(StdoutNotifier), 0.90);

        // Only the Jan opportunity has a fetchable status in this scan;
        // drive its near-certainty handling directly to exercise the cascade.
        let jan = state
            .get_active_opportunities()
            .into_iter()
            .find(|o| o.relation.leader_id == "jan-leader")
            .unwrap();
        let event = monitor.handle_near_certainty(&jan, 0.92).unwrap().unwrap();
        assert!(matches!(event, LeaderMonitorEvent::NearCertainty { .. }));

        let feb = state
            .get_unresolved_opportunities()
            .into_iter()
            .find(|o| o.relation.leader_id == "feb-leader")
            .unwrap();
        let mar = state
            .get_unresolved_opportunities()
            .into_iter()
            .find(|o| o.relation.leader_id == "mar-leader")
            .unwrap();
        assert_eq!(feb.status, OpportunityStatus::ThresholdTriggered);
        assert_eq!(mar.status, OpportunityStatus::ThresholdTriggered);

        let jan_after = state
            .get_unresolved_opportunities()
            .into_iter()
            .find(|o| o.relation.leader_id == "jan-leader")
            .unwrap();
        assert_eq!(jan_after.status, OpportunityStatus::ThresholdTriggered);
    }

    #[tokio::test]
    async fn ambiguous_outcome_leaves_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(OpportunityState::load(dir.path().join("s.json")).unwrap());
        let opp = state.add_opportunity(relation("L", "F", 0, None)).unwrap().unwrap();

        let mut statuses = HashMap::new();
        statuses.insert(
            "L".to_string(),
            LeaderStatus {
                id: "L".into(),
                question: "q".into(),
                closed: true,
                resolved: true,
                outcome: Some("maybe".into()),
                yes_price: None,
            },
        );
        let api = Arc::new(FakeLeaderStatusApi(Mutex::new(statuses)));
        let monitor = LeaderMonitor::new(api, state.clone(), Arc::new(StdoutNotifier), 0.90);
        let result = monitor.check_one(&opp).await.unwrap();
        assert!(result.is_none());
        assert_eq!(state.get_unresolved_opportunities().len(), 1);
    }
}
