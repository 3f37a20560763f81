//! Core data model shared across the trade path and the discovery path.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type MarketId = String;
pub type TokenId = String;

/// A binary-outcome market as tracked in memory by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub condition_id: String,
    pub slug: Option<String>,
    pub question: String,
    pub description: String,
    pub end_time_ms: i64,
    pub yes_token_id: TokenId,
    pub no_token_id: TokenId,
    pub yes_price: f64,
    pub no_price: f64,
    pub volume_24hr: f64,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// An executed trade, immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub market_id: MarketId,
    pub token_id: TokenId,
    pub timestamp_ms: i64,
    pub sequence: u64,
    pub price: f64,
    pub size: f64,
    pub side: Side,
}

impl Trade {
    pub fn usd_size(&self) -> f64 {
        self.price * self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Fixed severity order used by `meetsMinSeverity` in the anomaly engine.
    pub const ORDER: [Severity; 5] = [
        Severity::None,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn rank(self) -> usize {
        Self::ORDER.iter().position(|s| *s == self).unwrap_or(0)
    }

    pub fn meets_min(self, min: Severity) -> bool {
        self.rank() >= min.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Yes,
    No,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    LargeTrade,
    VolumeSpike,
    RapidPriceMove,
    UnusualLowPriceBuy,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnomalyKind::LargeTrade => "LARGE_TRADE",
            AnomalyKind::VolumeSpike => "VOLUME_SPIKE",
            AnomalyKind::RapidPriceMove => "RAPID_PRICE_MOVE",
            AnomalyKind::UnusualLowPriceBuy => "UNUSUAL_LOW_PRICE_BUY",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LargeTradeDetails {
    pub trade_size_usd: f64,
    pub z_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSpikeDetails {
    pub window_volume_usd: f64,
    pub expected_volume_usd: f64,
    pub volume_multiple: f64,
    pub z_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RapidPriceMoveDetails {
    pub price_delta: f64,
    pub price_delta_percent: f64,
    pub window_start_price: f64,
    pub window_end_price: f64,
    pub z_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusualLowPriceBuyDetails {
    pub trade_size_usd: f64,
    pub percentile: f64,
    pub rank: usize,
    pub total_trades: usize,
    pub median_size_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AnomalyDetails {
    LargeTrade(LargeTradeDetails),
    VolumeSpike(VolumeSpikeDetails),
    RapidPriceMove(RapidPriceMoveDetails),
    UnusualLowPriceBuy(UnusualLowPriceBuyDetails),
}

/// A single detector result. The orchestrator collects zero or more of
/// these per trade, in the fixed detector order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub market_id: MarketId,
    pub question_snapshot: String,
    pub anomaly_type: AnomalyKind,
    pub severity: Severity,
    pub timestamp_ms: i64,
    pub current_price: f64,
    pub implied_direction: Direction,
    pub triggering_trade: Option<Trade>,
    pub details: AnomalyDetails,
}

/// A persisted `Anomaly`, with a stable id and optional post-hoc outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAlert {
    pub id: String,
    pub anomaly: Anomaly,
    pub delivered_at_ms: i64,
    pub outcome: Option<String>,
}

impl StoredAlert {
    pub fn id_for(market_id: &str, anomaly_type: AnomalyKind, timestamp_ms: i64) -> String {
        format!("{market_id}:{anomaly_type}:{timestamp_ms}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    SameOutcome,
    DifferentOutcome,
    Unrelated,
    SameEventReject,
}

/// A directed-by-time link between two markets, discovered by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRelation {
    pub relationship: RelationshipType,
    pub confidence: f64,
    pub trading_rationale: String,
    pub expected_edge: String,
    pub leader_id: MarketId,
    pub follower_id: MarketId,
    pub leader_end_time_ms: i64,
    pub time_gap_days: f64,
    pub series_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Active,
    ThresholdTriggered,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LeaderOutcome {
    Yes,
    No,
}

/// A wrapper around one actionable `MarketRelation`, with lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub pair_id: String,
    pub relation: MarketRelation,
    pub status: OpportunityStatus,
    pub leader_outcome: Option<LeaderOutcome>,
    pub threshold_trigger_price: Option<f64>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Opportunity {
    pub fn pair_id_for(market1: &str, market2: &str) -> String {
        format!("{market1}-{market2}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenMarket {
    pub question: String,
    pub end_time_ms: i64,
    pub first_seen_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedPair {
    pub market1_id: MarketId,
    pub market2_id: MarketId,
    pub result: RelationshipType,
    pub confidence: f64,
    pub analyzed_at_ms: i64,
}

/// Events emitted by the leader monitor, one per scan that finds something
/// actionable; consumed by the notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LeaderMonitorEvent {
    Resolved {
        pair_id: String,
        leader_id: MarketId,
        follower_id: MarketId,
        outcome: LeaderOutcome,
        recommended_action: String,
    },
    NearCertainty {
        pair_id: String,
        leader_id: MarketId,
        yes_price: f64,
    },
    Cascade {
        pair_id: String,
        leader_id: MarketId,
        triggered_by_pair_id: String,
        yes_price: f64,
    },
}
