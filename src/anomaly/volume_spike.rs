use crate::baseline::{self, BaselineCalculator};
use crate::config::Config;
use crate::models::{
    Anomaly, AnomalyDetails, AnomalyKind, Direction, Severity, Trade, VolumeSpikeDetails,
};
use crate::trade_store::TradeStore;

pub fn detect_volume_spike(
    config: &Config,
    trade_store: &TradeStore,
    baseline: &BaselineCalculator,
    trade: &Trade,
    question_snapshot: &str,
) -> Option<Anomaly> {
    if !baseline.is_ready(&trade.market_id) {
        return None;
    }

    let window_ms = config.volume_spike_window_ms;
    let window_volume = trade_store.volume_in_window(&trade.market_id, window_ms);
    let multiple = baseline.volume_multiple(&trade.market_id, window_volume, window_ms)?;
    let expected = baseline.expected_volume(&trade.market_id, window_ms)?;
    let z = baseline.volume_z(&trade.market_id, window_volume, window_ms);

    if multiple < config.volume_spike_low {
        return None;
    }

    let severity = if multiple >= config.volume_spike_critical {
        Severity::Critical
    } else if multiple >= config.volume_spike_high
        || z.map(|z| z >= config.z_score_high).unwrap_or(false)
    {
        Severity::High
    } else {
        Severity::Medium
    };

    let window_trades = trade_store.recent_trades(&trade.market_id, window_ms);
    let (buy, sell) = baseline::net_buy_sell_usd(&window_trades);
    let implied_direction = if buy > 1.5 * sell {
        Direction::Yes
    } else if sell > 1.5 * buy {
        Direction::No
    } else {
        Direction::Unknown
    };

    Some(Anomaly {
        market_id: trade.market_id.clone(),
        question_snapshot: question_snapshot.to_string(),
        anomaly_type: AnomalyKind::VolumeSpike,
        severity,
        timestamp_ms: trade.timestamp_ms,
        current_price: trade.price,
        implied_direction,
        triggering_trade: Some(trade.clone()),
        details: AnomalyDetails::VolumeSpike(VolumeSpikeDetails {
            window_volume_usd: window_volume,
            expected_volume_usd: expected,
            volume_multiple: multiple,
            z_score: z,
        }),
    })
}
