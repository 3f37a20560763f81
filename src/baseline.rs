//! Per-market rolling baseline statistics, grounded on
//! `route_quality::baseline::BaselineCalculator`'s sample/stats shape, with
//! the mean/stddev helpers reworked to the population formula spec.md §4.3
//! requires (divide-by-zero returns `None`, never ±∞).

use crate::models::{MarketId, Side, Trade};
use parking_lot::RwLock;
use statrs::statistics::Statistics;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct MarketBaseline {
    pub avg_hourly_volume: f64,
    pub stddev_hourly_volume: f64,
    pub avg_trade_size_usd: f64,
    pub stddev_trade_size_usd: f64,
    pub median_trade_size_usd: f64,
    pub avg_hourly_abs_price_change: f64,
    pub stddev_hourly_abs_price_change: f64,
    pub trades_per_hour: f64,
    pub first_trade_ms: i64,
    pub last_trade_ms: i64,
    pub sample_count: usize,
}

pub struct BaselineCalculator {
    window_ms: i64,
    min_samples: usize,
    baselines: RwLock<HashMap<MarketId, MarketBaseline>>,
}

impl BaselineCalculator {
    pub fn new(window_ms: i64, min_samples: usize) -> Self {
        Self {
            window_ms,
            min_samples,
            baselines: RwLock::new(HashMap::new()),
        }
    }

    /// Recompute the baseline for `market_id` from `incoming_trades`,
    /// intersected with the retention window.
    pub fn update_baseline(&self, market_id: &str, now_ms: i64, incoming_trades: &[Trade]) {
        let window_ms = self.window_ms;
        let trades: Vec<&Trade> = incoming_trades
            .iter()
            .filter(|t| now_ms - t.timestamp_ms <= window_ms)
            .collect();

        if trades.is_empty() {
            return;
        }

        let sizes: Vec<f64> = trades.iter().map(|t| t.usd_size()).collect();
        let (avg_size, stddev_size) = mean_stddev(&sizes);
        let median_size = median(&sizes);

        let mut hourly_volume: HashMap<i64, f64> = HashMap::new();
        let mut hourly_first_last: HashMap<i64, (f64, f64)> = HashMap::new();
        for t in &trades {
            let bucket = t.timestamp_ms / 3_600_000;
            *hourly_volume.entry(bucket).or_insert(0.0) += t.usd_size();
            hourly_first_last
                .entry(bucket)
                .and_modify(|(_, last)| *last = t.price)
                .or_insert((t.price, t.price));
        }
        let volumes: Vec<f64> = hourly_volume.values().copied().collect();
        let (avg_volume, stddev_volume) = mean_stddev(&volumes);

        let price_changes: Vec<f64> = hourly_first_last
            .values()
            .map(|(first, last)| (last - first).abs())
            .collect();
        let (avg_price_change, stddev_price_change) = mean_stddev(&price_changes);

        let first_ts = trades.iter().map(|t| t.timestamp_ms).min().unwrap();
        let last_ts = trades.iter().map(|t| t.timestamp_ms).max().unwrap();
        let window_hours = (self.window_ms as f64 / 3_600_000.0).max(1e-9);

        let baseline = MarketBaseline {
            avg_hourly_volume: avg_volume,
            stddev_hourly_volume: stddev_volume,
            avg_trade_size_usd: avg_size,
            stddev_trade_size_usd: stddev_size,
            median_trade_size_usd: median_size,
            avg_hourly_abs_price_change: avg_price_change,
            stddev_hourly_abs_price_change: stddev_price_change,
            trades_per_hour: trades.len() as f64 / window_hours,
            first_trade_ms: first_ts,
            last_trade_ms: last_ts,
            sample_count: trades.len(),
        };

        self.baselines
            .write()
            .insert(market_id.to_string(), baseline);
    }

    fn ready(&self, baseline: &MarketBaseline) -> bool {
        baseline.sample_count >= self.min_samples
    }

    pub fn get(&self, market_id: &str) -> Option<MarketBaseline> {
        let baselines = self.baselines.read();
        let b = baselines.get(market_id)?;
        if self.ready(b) {
            Some(b.clone())
        } else {
            None
        }
    }

    pub fn trade_size_z(&self, market_id: &str, size_usd: f64) -> Option<f64> {
        let b = self.get(market_id)?;
        z_score(size_usd, b.avg_trade_size_usd, b.stddev_trade_size_usd)
    }

    /// Scale expected volume and stddev by `window_ms / 1h` before scoring.
    pub fn volume_z(&self, market_id: &str, observed: f64, window_ms: i64) -> Option<f64> {
        let b = self.get(market_id)?;
        let scale = window_ms as f64 / 3_600_000.0;
        z_score(observed, b.avg_hourly_volume * scale, b.stddev_hourly_volume * scale)
    }

    pub fn price_change_z(&self, market_id: &str, delta: f64) -> Option<f64> {
        let b = self.get(market_id)?;
        z_score(delta.abs(), b.avg_hourly_abs_price_change, b.stddev_hourly_abs_price_change)
    }

    pub fn expected_volume(&self, market_id: &str, window_ms: i64) -> Option<f64> {
        let b = self.get(market_id)?;
        Some(b.avg_hourly_volume * (window_ms as f64 / 3_600_000.0))
    }

    pub fn volume_multiple(&self, market_id: &str, observed: f64, window_ms: i64) -> Option<f64> {
        let expected = self.expected_volume(market_id, window_ms)?;
        if expected.abs() < f64::EPSILON {
            None
        } else {
            Some(observed / expected)
        }
    }

    pub fn is_ready(&self, market_id: &str) -> bool {
        self.get(market_id).is_some()
    }
}

/// Population mean/stddev; `None` divide-by-zero collapses to `(mean, 0.0)`.
/// Population mean/stddev, per spec.md §4.3 (not the sample/n-1 formula).
fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.to_vec().mean();
    let stddev = values.to_vec().population_std_dev();
    (mean, stddev)
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len().is_multiple_of(2) {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn z_score(value: f64, mean: f64, stddev: f64) -> Option<f64> {
    if stddev.abs() < f64::EPSILON {
        None
    } else {
        Some((value - mean) / stddev)
    }
}

pub fn net_buy_sell_usd(trades: &[Trade]) -> (f64, f64) {
    let mut buy = 0.0;
    let mut sell = 0.0;
    for t in trades {
        match t.side {
            Side::Buy => buy += t.usd_size(),
            Side::Sell => sell += t.usd_size(),
        }
    }
    (buy, sell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn trade(ts: i64, price: f64, size: f64) -> Trade {
        Trade {
            market_id: "m".into(),
            token_id: "t".into(),
            timestamp_ms: ts,
            sequence: ts as u64,
            price,
            size,
            side: Side::Buy,
        }
    }

    #[test]
    fn returns_none_below_min_samples() {
        let calc = BaselineCalculator::new(86_400_000, 100);
        let trades: Vec<Trade> = (0..10).map(|i| trade(i * 1000, 0.5, 10.0)).collect();
        calc.update_baseline("m", 10_000, &trades);
        assert!(calc.get("m").is_none());
        assert!(calc.trade_size_z("m", 100.0).is_none());
    }

    #[test]
    fn computes_stats_once_ready() {
        let calc = BaselineCalculator::new(86_400_000, 5);
        let trades: Vec<Trade> = (0..10).map(|i| trade(i * 1000, 0.5, 10.0)).collect();
        calc.update_baseline("m", 10_000, &trades);
        let b = calc.get("m").unwrap();
        assert_eq!(b.sample_count, 10);
        assert!((b.avg_trade_size_usd - 5.0).abs() < 1e-9); // 0.5 * 10.0
    }

    #[test]
    fn zero_stddev_yields_null_z() {
        let calc = BaselineCalculator::new(86_400_000, 1);
        let trades: Vec<Trade> = (0..5).map(|i| trade(i * 1000, 0.5, 10.0)).collect();
        calc.update_baseline("m", 10_000, &trades);
        assert!(calc.trade_size_z("m", 5.0).is_none());
    }
}
