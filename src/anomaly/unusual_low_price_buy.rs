use crate::market_stats::PercentileTracker;
use crate::models::{
    Anomaly, AnomalyDetails, AnomalyKind, Direction, Severity, Trade, UnusualLowPriceBuyDetails,
};

/// Updates the percentile tracker unconditionally (so later trades build
/// history), then emits an anomaly only when `should_alert` fires.
pub fn detect_unusual_low_price_buy(
    tracker: &PercentileTracker,
    trade: &Trade,
    question_snapshot: &str,
) -> Option<Anomaly> {
    let size_usd = trade.usd_size();
    tracker.add_trade(&trade.market_id, size_usd, trade.price, trade.side);

    let result = tracker.should_alert(&trade.market_id, size_usd, trade.price, trade.side)?;
    if result.severity == Severity::None {
        return None;
    }

    Some(Anomaly {
        market_id: trade.market_id.clone(),
        question_snapshot: question_snapshot.to_string(),
        anomaly_type: AnomalyKind::UnusualLowPriceBuy,
        severity: result.severity,
        timestamp_ms: trade.timestamp_ms,
        current_price: trade.price,
        implied_direction: Direction::Yes,
        triggering_trade: Some(trade.clone()),
        details: AnomalyDetails::UnusualLowPriceBuy(UnusualLowPriceBuyDetails {
            trade_size_usd: size_usd,
            percentile: result.percentile,
            rank: result.rank,
            total_trades: result.total,
            median_size_usd: result.median_size_usd,
        }),
    })
}
