use crate::baseline::BaselineCalculator;
use crate::config::Config;
use crate::models::{
    Anomaly, AnomalyDetails, AnomalyKind, Direction, LargeTradeDetails, Severity, Side, Trade,
};

pub fn detect_large_trade(
    config: &Config,
    baseline: &BaselineCalculator,
    trade: &Trade,
    question_snapshot: &str,
) -> Option<Anomaly> {
    let size_usd = trade.usd_size();
    if size_usd < config.large_trade_min {
        return None;
    }

    let z = baseline.trade_size_z(&trade.market_id, size_usd);

    let severity = if size_usd >= config.large_trade_critical {
        Severity::Critical
    } else if size_usd >= config.large_trade_high
        || z.map(|z| z >= config.z_score_high).unwrap_or(false)
    {
        Severity::High
    } else {
        Severity::Medium
    };

    let implied_direction = match trade.side {
        Side::Buy => Direction::Yes,
        Side::Sell => Direction::No,
    };

    Some(Anomaly {
        market_id: trade.market_id.clone(),
        question_snapshot: question_snapshot.to_string(),
        anomaly_type: AnomalyKind::LargeTrade,
        severity,
        timestamp_ms: trade.timestamp_ms,
        current_price: trade.price,
        implied_direction,
        triggering_trade: Some(trade.clone()),
        details: AnomalyDetails::LargeTrade(LargeTradeDetails {
            trade_size_usd: size_usd,
            z_score: z,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketId;

    fn trade(market_id: &str, price: f64, size: f64) -> Trade {
        Trade {
            market_id: market_id.to_string(),
            token_id: "t".into(),
            timestamp_ms: 0,
            sequence: 0,
            price,
            size,
            side: Side::Buy,
        }
    }

    #[test]
    fn ladder_scenario_s2() {
        let cfg = Config::default();
        let baseline = BaselineCalculator::new(cfg.baseline_window_ms, cfg.min_samples_for_baseline);
        let market: MarketId = "m".into();

        let t1 = trade(&market, 0.5, 50002.0); // $25001
        let a1 = detect_large_trade(&cfg, &baseline, &t1, "q").unwrap();
        assert_eq!(a1.severity, Severity::Critical);

        let t2 = trade(&market, 0.5, 19998.0); // $9999, above min but below high
        let a2 = detect_large_trade(&cfg, &baseline, &t2, "q").unwrap();
        assert_eq!(a2.severity, Severity::Medium);

        let t3 = trade(&market, 0.5, 20000.0); // $10000
        let a3 = detect_large_trade(&cfg, &baseline, &t3, "q").unwrap();
        assert_eq!(a3.severity, Severity::High);
    }
}
