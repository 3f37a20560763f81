use crate::baseline::BaselineCalculator;
use crate::config::Config;
use crate::models::{
    Anomaly, AnomalyDetails, AnomalyKind, Direction, RapidPriceMoveDetails, Severity, Trade,
};
use crate::trade_store::TradeStore;

pub fn detect_rapid_price_move(
    config: &Config,
    trade_store: &TradeStore,
    baseline: &BaselineCalculator,
    trade: &Trade,
    question_snapshot: &str,
) -> Option<Anomaly> {
    let change = trade_store.price_change_in_window(&trade.market_id, config.price_window_ms)?;
    let abs_percent = change.delta_percent.abs();
    if abs_percent < config.price_change_low {
        return None;
    }

    let z = baseline.price_change_z(&trade.market_id, change.delta);

    // Severity ladder analogous to Volume Spike's: a HIGH percentile move is
    // HIGH severity even when the raw percent alone reads MEDIUM.
    let severity = if abs_percent >= config.price_change_critical {
        Severity::Critical
    } else if abs_percent >= config.price_change_high
        || z.map(|z| z >= config.z_score_high).unwrap_or(false)
    {
        Severity::High
    } else {
        Severity::Medium
    };

    let implied_direction = if change.delta > 0.0 {
        Direction::Yes
    } else if change.delta < 0.0 {
        Direction::No
    } else {
        Direction::Unknown
    };

    Some(Anomaly {
        market_id: trade.market_id.clone(),
        question_snapshot: question_snapshot.to_string(),
        anomaly_type: AnomalyKind::RapidPriceMove,
        severity,
        timestamp_ms: trade.timestamp_ms,
        current_price: trade.price,
        implied_direction,
        triggering_trade: Some(trade.clone()),
        details: AnomalyDetails::RapidPriceMove(RapidPriceMoveDetails {
            price_delta: change.delta,
            price_delta_percent: change.delta_percent,
            window_start_price: change.start,
            window_end_price: change.end,
            z_score: z,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn trade(ts: i64, price: f64) -> Trade {
        Trade {
            market_id: "m".into(),
            token_id: "t".into(),
            timestamp_ms: ts,
            sequence: ts as u64,
            price,
            size: 1.0,
            side: Side::Buy,
        }
    }

    #[test]
    fn rapid_move_scenario_s4() {
        let cfg = Config::default();
        let store = TradeStore::new(10 * 60_000);
        store.set_simulated_time(0);
        store.add(trade(0, 0.40));
        store.set_simulated_time(60_000);
        store.add(trade(60_000, 0.41));
        store.set_simulated_time(120_000);
        store.add(trade(120_000, 0.42));
        store.set_simulated_time(240_000);
        let t = trade(240_000, 0.49);
        store.add(t.clone());

        let baseline = BaselineCalculator::new(86_400_000, 100);
        let a = detect_rapid_price_move(&cfg, &store, &baseline, &t, "q").unwrap();
        assert_eq!(a.severity, Severity::Critical);
        assert_eq!(a.implied_direction, Direction::Yes);
    }

    /// A move below `price_change_high` still promotes to HIGH when the
    /// baseline's z-score for the delta clears `z_score_high`, mirroring
    /// Volume Spike's `z >= zHigh` fallback.
    #[test]
    fn z_score_fallback_promotes_to_high() {
        let cfg = Config::default();

        let baseline = BaselineCalculator::new(10_000_000_000, 1);
        let baseline_trades = vec![
            trade(0, 0.40),
            trade(1_000, 0.40),
            trade(3_600_000, 0.40),
            trade(3_601_000, 0.401),
        ];
        baseline.update_baseline("m", 4_000_000, &baseline_trades);

        let store = TradeStore::new(10 * 60_000);
        store.set_simulated_time(0);
        store.add(trade(0, 0.40));
        store.set_simulated_time(60_000);
        let t = trade(60_000, 0.428); // 7% move: above price_change_low, below price_change_high
        store.add(t.clone());

        let a = detect_rapid_price_move(&cfg, &store, &baseline, &t, "q").unwrap();
        let AnomalyDetails::RapidPriceMove(details) = &a.details else {
            panic!("expected RapidPriceMove details");
        };
        assert!(details.z_score.unwrap() >= cfg.z_score_high);
        assert_eq!(a.severity, Severity::High);
    }
}
