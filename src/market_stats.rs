//! Percentile tracker: a per-market sorted multiset of low-price BUY trade
//! sizes plus a FIFO of recent trades, per spec.md §4.4. Insert/remove/query
//! are O(log n) via binary search on a sorted `Vec<f64>`.

use crate::models::{MarketId, Severity, Side};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy)]
struct RecentEntry {
    size_usd: f64,
    #[allow(dead_code)]
    price: f64,
    #[allow(dead_code)]
    side: Side,
    tracked_low_price_buy: bool,
}

struct MarketMultiset {
    sorted_sizes: Vec<f64>,
    recent: VecDeque<RecentEntry>,
}

impl MarketMultiset {
    fn new() -> Self {
        Self {
            sorted_sizes: Vec::new(),
            recent: VecDeque::new(),
        }
    }

    fn insert(&mut self, size: f64) {
        let idx = self
            .sorted_sizes
            .partition_point(|&v| v < size);
        self.sorted_sizes.insert(idx, size);
    }

    fn remove(&mut self, size: f64) {
        if let Ok(idx) = self
            .sorted_sizes
            .binary_search_by(|probe| probe.partial_cmp(&size).unwrap())
        {
            self.sorted_sizes.remove(idx);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileResult {
    pub percentile: f64,
    pub rank: usize,
    pub total: usize,
    pub severity: Severity,
    pub median_size_usd: f64,
}

pub struct PercentileTracker {
    low_price_threshold: f64,
    max_samples: usize,
    min_samples: usize,
    p90: f64,
    p95: f64,
    p99: f64,
    markets: RwLock<HashMap<MarketId, MarketMultiset>>,
}

impl PercentileTracker {
    pub fn new(
        low_price_threshold: f64,
        max_samples: usize,
        min_samples: usize,
        p90: f64,
        p95: f64,
        p99: f64,
    ) -> Self {
        Self {
            low_price_threshold,
            max_samples,
            min_samples,
            p90,
            p95,
            p99,
            markets: RwLock::new(HashMap::new()),
        }
    }

    /// Append `(size, price, side)` to the recent buffer; binary-insert into
    /// the sorted multiset when it's a low-price BUY; evict the oldest entry
    /// once the buffer exceeds `max_samples`.
    pub fn add_trade(&self, market_id: &str, size_usd: f64, price: f64, side: Side) {
        let mut markets = self.markets.write();
        let m = markets
            .entry(market_id.to_string())
            .or_insert_with(MarketMultiset::new);

        let tracked = side == Side::Buy && price < self.low_price_threshold;
        if tracked {
            m.insert(size_usd);
        }
        m.recent.push_back(RecentEntry {
            size_usd,
            price,
            side,
            tracked_low_price_buy: tracked,
        });

        if m.recent.len() > self.max_samples {
            if let Some(popped) = m.recent.pop_front() {
                if popped.tracked_low_price_buy {
                    m.remove(popped.size_usd);
                }
            }
        }
    }

    /// Only meaningful once the multiset has at least `min_samples` entries.
    pub fn percentile(&self, market_id: &str, size: f64) -> Option<PercentileResult> {
        let markets = self.markets.read();
        let m = markets.get(market_id)?;
        let total = m.sorted_sizes.len();
        if total < self.min_samples {
            return None;
        }

        let smaller = m.sorted_sizes.partition_point(|&v| v < size);
        let percentile = smaller as f64 / total as f64;
        let rank = total - smaller;

        let severity = if percentile >= self.p99 {
            Severity::Critical
        } else if percentile >= self.p95 {
            Severity::High
        } else if percentile >= self.p90 {
            Severity::Medium
        } else {
            Severity::None
        };

        let median_idx = m.sorted_sizes.len() / 2;
        let median_size_usd = if m.sorted_sizes.len() % 2 == 0 && median_idx > 0 {
            (m.sorted_sizes[median_idx - 1] + m.sorted_sizes[median_idx]) / 2.0
        } else {
            m.sorted_sizes[median_idx]
        };

        Some(PercentileResult {
            percentile,
            rank,
            total,
            severity,
            median_size_usd,
        })
    }

    /// The element at index `floor(|S| * q)` for a reported threshold `q`.
    pub fn threshold_at(&self, market_id: &str, q: f64) -> Option<f64> {
        let markets = self.markets.read();
        let m = markets.get(market_id)?;
        if m.sorted_sizes.is_empty() {
            return None;
        }
        let idx = ((m.sorted_sizes.len() as f64) * q) as usize;
        let idx = idx.min(m.sorted_sizes.len() - 1);
        Some(m.sorted_sizes[idx])
    }

    /// Returns `Some` only when side=BUY, price below threshold, and
    /// severity != NONE.
    pub fn should_alert(
        &self,
        market_id: &str,
        size_usd: f64,
        price: f64,
        side: Side,
    ) -> Option<PercentileResult> {
        if side != Side::Buy || price >= self.low_price_threshold {
            return None;
        }
        let result = self.percentile(market_id, size_usd)?;
        if result.severity == Severity::None {
            None
        } else {
            Some(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PercentileTracker {
        PercentileTracker::new(0.25, 10_000, 50, 0.90, 0.95, 0.99)
    }

    #[test]
    fn severity_none_below_min_samples() {
        let t = tracker();
        for i in 0..10 {
            t.add_trade("m", 3.0 + i as f64, 0.05, Side::Buy);
        }
        assert!(t.percentile("m", 500.0).is_none());
    }

    #[test]
    fn unusual_low_price_buy_scenario_s1() {
        let t = tracker();
        let mut x: u32 = 12345;
        for _ in 0..200 {
            x = x.wrapping_mul(1103515245).wrapping_add(12345);
            let size = 3.0 + (x % 3) as f64;
            t.add_trade("m", size, 0.05, Side::Buy);
        }
        let result = t.should_alert("m", 500.0, 0.06, Side::Buy).unwrap();
        assert!(result.percentile >= 0.99);
        assert!(result.rank <= 2);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn percentile_monotonicity() {
        let t = tracker();
        for i in 0..60 {
            t.add_trade("m", 10.0 + i as f64, 0.1, Side::Buy);
        }
        let before = t.percentile("m", 40.0).unwrap().percentile;
        t.add_trade("m", 5.0, 0.1, Side::Buy);
        let after = t.percentile("m", 40.0).unwrap().percentile;
        assert!(after >= before);
    }

    #[test]
    fn ignores_non_buy_or_high_price() {
        let t = tracker();
        for i in 0..60 {
            t.add_trade("m", 10.0 + i as f64, 0.1, Side::Buy);
        }
        assert!(t.should_alert("m", 1000.0, 0.5, Side::Buy).is_none());
        assert!(t.should_alert("m", 1000.0, 0.1, Side::Sell).is_none());
    }

    #[test]
    fn eviction_removes_tracked_entry() {
        let t = PercentileTracker::new(0.25, 5, 1, 0.90, 0.95, 0.99);
        for i in 0..5 {
            t.add_trade("m", 10.0 + i as f64, 0.1, Side::Buy);
        }
        // Pushing a 6th entry evicts the first tracked low-price buy (size 10.0).
        t.add_trade("m", 999.0, 0.1, Side::Buy);
        let markets = t.markets.read();
        let m = markets.get("m").unwrap();
        assert!(!m.sorted_sizes.contains(&10.0));
    }
}
