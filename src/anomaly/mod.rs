//! Pure detection functions. Given a new trade plus the trade store,
//! baseline calculator, and percentile tracker, the engine runs four
//! detectors in a fixed order and returns zero or more `Anomaly` records.
//!
//! Keeping the order a property of a static array (rather than four
//! sequential calls in `run_all`) is the "typed variants" design note from
//! spec.md §9: the order IS the array.

mod large_trade;
mod rapid_price_move;
mod unusual_low_price_buy;
mod volume_spike;

use crate::baseline::BaselineCalculator;
use crate::config::Config;
use crate::market_stats::PercentileTracker;
use crate::models::{Anomaly, Trade};
use crate::trade_store::TradeStore;

pub use large_trade::detect_large_trade;
pub use rapid_price_move::detect_rapid_price_move;
pub use unusual_low_price_buy::detect_unusual_low_price_buy;
pub use volume_spike::detect_volume_spike;

pub struct AnomalyEngine<'a> {
    pub config: &'a Config,
    pub trade_store: &'a TradeStore,
    pub baseline: &'a BaselineCalculator,
    pub percentile: &'a PercentileTracker,
}

impl<'a> AnomalyEngine<'a> {
    /// Run the four detectors in the fixed order
    /// [UNUSUAL_LOW_PRICE_BUY, LARGE_TRADE, VOLUME_SPIKE, RAPID_PRICE_MOVE],
    /// collect non-null results, and filter by `min_severity` (I3).
    pub fn detect(&self, trade: &Trade, question_snapshot: &str) -> Vec<Anomaly> {
        let candidates = [
            unusual_low_price_buy::detect_unusual_low_price_buy(
                self.percentile,
                trade,
                question_snapshot,
            ),
            large_trade::detect_large_trade(self.config, self.baseline, trade, question_snapshot),
            volume_spike::detect_volume_spike(
                self.config,
                self.trade_store,
                self.baseline,
                trade,
                question_snapshot,
            ),
            rapid_price_move::detect_rapid_price_move(
                self.config,
                self.trade_store,
                self.baseline,
                trade,
                question_snapshot,
            ),
        ];

        candidates
            .into_iter()
            .flatten()
            .filter(|a| meets_min_severity(a, self.config.min_severity))
            .collect()
    }
}

fn meets_min_severity(anomaly: &Anomaly, min_severity: crate::models::Severity) -> bool {
    anomaly.severity.meets_min(min_severity)
}
