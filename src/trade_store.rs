//! Per-market bounded sliding window of trades, plus a parallel price
//! history. Grounded on `route_quality::baseline::BaselineCalculator`'s
//! `RwLock<HashMap<String, VecDeque<Sample>>>` shape.

use crate::models::{MarketId, Trade};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy)]
pub struct PriceChange {
    pub start: f64,
    pub end: f64,
    pub delta: f64,
    pub delta_percent: f64,
}

struct MarketWindow {
    trades: VecDeque<Trade>,
    prices: VecDeque<(i64, f64)>,
    inserts_since_cleanup: u32,
}

impl MarketWindow {
    fn new() -> Self {
        Self {
            trades: VecDeque::new(),
            prices: VecDeque::new(),
            inserts_since_cleanup: 0,
        }
    }
}

/// Every N additions, evict entries older than `window_ms` relative to
/// "now" (wall clock, or the simulated time set via `set_simulated_time`).
const CLEANUP_EVERY_N: u32 = 50;

pub struct TradeStore {
    window_ms: i64,
    markets: RwLock<HashMap<MarketId, MarketWindow>>,
    simulated_time_ms: RwLock<Option<i64>>,
}

impl TradeStore {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            markets: RwLock::new(HashMap::new()),
            simulated_time_ms: RwLock::new(None),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.simulated_time_ms
            .read()
            .unwrap_or_else(|| Utc::now().timestamp_millis())
    }

    pub fn set_simulated_time(&self, ts_ms: i64) {
        *self.simulated_time_ms.write() = Some(ts_ms);
    }

    pub fn clear_simulated_time(&self) {
        *self.simulated_time_ms.write() = None;
    }

    /// Append a trade to both sequences; periodically evict stale entries.
    pub fn add(&self, trade: Trade) {
        let now = self.now_ms();
        let window_ms = self.window_ms;
        let mut markets = self.markets.write();
        let w = markets
            .entry(trade.market_id.clone())
            .or_insert_with(MarketWindow::new);
        w.prices.push_back((trade.timestamp_ms, trade.price));
        w.trades.push_back(trade);
        w.inserts_since_cleanup += 1;
        if w.inserts_since_cleanup >= CLEANUP_EVERY_N {
            cleanup_window(w, now, window_ms);
            w.inserts_since_cleanup = 0;
        }
    }

    /// Append many trades, stable-sort by timestamp, then a single cleanup.
    pub fn bulk_add(&self, market_id: &str, mut trades: Vec<Trade>) {
        if trades.is_empty() {
            return;
        }
        trades.sort_by_key(|t| t.timestamp_ms);
        let now = self.now_ms();
        let window_ms = self.window_ms;
        let mut markets = self.markets.write();
        let w = markets
            .entry(market_id.to_string())
            .or_insert_with(MarketWindow::new);
        for t in trades {
            w.prices.push_back((t.timestamp_ms, t.price));
            w.trades.push_back(t);
        }
        cleanup_window(w, now, window_ms);
        w.inserts_since_cleanup = 0;
    }

    /// Evict everything older than `window_ms` across all markets.
    pub fn cleanup(&self) {
        let now = self.now_ms();
        let window_ms = self.window_ms;
        let mut markets = self.markets.write();
        for w in markets.values_mut() {
            cleanup_window(w, now, window_ms);
            w.inserts_since_cleanup = 0;
        }
    }

    /// Silent no-op on unknown markets, per spec.md §4.2's failure model.
    pub fn recent_trades(&self, market_id: &str, duration_ms: i64) -> Vec<Trade> {
        let now = self.now_ms();
        let markets = self.markets.read();
        match markets.get(market_id) {
            Some(w) => w
                .trades
                .iter()
                .filter(|t| now - t.timestamp_ms <= duration_ms)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn volume_in_window(&self, market_id: &str, duration_ms: i64) -> f64 {
        self.recent_trades(market_id, duration_ms)
            .iter()
            .map(|t| t.usd_size())
            .sum()
    }

    pub fn trade_count_in_window(&self, market_id: &str, duration_ms: i64) -> usize {
        self.recent_trades(market_id, duration_ms).len()
    }

    pub fn price_change_in_window(&self, market_id: &str, duration_ms: i64) -> Option<PriceChange> {
        let now = self.now_ms();
        let markets = self.markets.read();
        let w = markets.get(market_id)?;
        let mut in_window = w.prices.iter().filter(|(ts, _)| now - ts <= duration_ms);
        let (_, start) = in_window.next()?;
        let start = *start;
        let mut end = start;
        let mut count = 1;
        for (_, p) in in_window {
            end = *p;
            count += 1;
        }
        if count < 2 {
            return None;
        }
        let delta = end - start;
        let delta_percent = if start.abs() > f64::EPSILON {
            delta / start
        } else {
            0.0
        };
        Some(PriceChange {
            start,
            end,
            delta,
            delta_percent,
        })
    }

    pub fn latest_price(&self, market_id: &str) -> Option<f64> {
        let markets = self.markets.read();
        markets.get(market_id)?.prices.back().map(|(_, p)| *p)
    }

    pub fn price_range_in_window(&self, market_id: &str, duration_ms: i64) -> Option<(f64, f64)> {
        let now = self.now_ms();
        let markets = self.markets.read();
        let w = markets.get(market_id)?;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for (ts, p) in w.prices.iter() {
            if now - ts <= duration_ms {
                min = min.min(*p);
                max = max.max(*p);
            }
        }
        if min.is_finite() && max.is_finite() {
            Some((min, max))
        } else {
            None
        }
    }

    pub fn market_ids(&self) -> Vec<MarketId> {
        self.markets.read().keys().cloned().collect()
    }

    pub fn total_trades(&self) -> usize {
        self.markets.read().values().map(|w| w.trades.len()).sum()
    }
}

fn cleanup_window(w: &mut MarketWindow, now: i64, window_ms: i64) {
    while let Some(front) = w.trades.front() {
        if now - front.timestamp_ms > window_ms {
            w.trades.pop_front();
        } else {
            break;
        }
    }
    while let Some((ts, _)) = w.prices.front() {
        if now - ts > window_ms {
            w.prices.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn trade(market_id: &str, ts: i64, price: f64, size: f64, side: Side) -> Trade {
        Trade {
            market_id: market_id.to_string(),
            token_id: "tok".into(),
            timestamp_ms: ts,
            sequence: ts as u64,
            price,
            size,
            side,
        }
    }

    #[test]
    fn window_invariant_i1() {
        let store = TradeStore::new(1000);
        store.set_simulated_time(0);
        store.add(trade("m", 0, 0.5, 1.0, Side::Buy));
        store.set_simulated_time(2000);
        store.add(trade("m", 2000, 0.5, 1.0, Side::Buy));
        store.cleanup();
        for t in store.recent_trades("m", 10_000) {
            assert!(2000 - t.timestamp_ms <= 1000);
        }
    }

    #[test]
    fn unknown_market_is_silent_noop() {
        let store = TradeStore::new(1000);
        assert!(store.recent_trades("nope", 1000).is_empty());
        assert_eq!(store.volume_in_window("nope", 1000), 0.0);
        assert!(store.price_change_in_window("nope", 1000).is_none());
    }

    #[test]
    fn price_change_requires_two_points() {
        let store = TradeStore::new(10_000);
        store.set_simulated_time(0);
        store.add(trade("m", 0, 0.4, 1.0, Side::Buy));
        assert!(store.price_change_in_window("m", 10_000).is_none());
        store.add(trade("m", 100, 0.45, 1.0, Side::Buy));
        let pc = store.price_change_in_window("m", 10_000).unwrap();
        assert!((pc.delta - 0.05).abs() < 1e-9);
    }

    #[test]
    fn bulk_add_sorts_by_timestamp() {
        let store = TradeStore::new(100_000);
        store.set_simulated_time(1000);
        store.bulk_add(
            "m",
            vec![
                trade("m", 300, 0.5, 1.0, Side::Buy),
                trade("m", 100, 0.4, 1.0, Side::Buy),
                trade("m", 200, 0.45, 1.0, Side::Buy),
            ],
        );
        let trades = store.recent_trades("m", 100_000);
        let timestamps: Vec<_> = trades.iter().map(|t| t.timestamp_ms).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }
}
