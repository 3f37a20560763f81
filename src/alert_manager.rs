//! Deduplicates, rate-limits, formats, and delivers anomalies, per
//! spec.md §4.6. Delivery failure never updates dedup state — the Alert
//! Manager surfaces the error upward instead, per spec.md §7.

use crate::alert_store::AlertStore;
use crate::models::{Anomaly, AnomalyDetails};
use crate::providers::Notifier;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{info, warn};

struct RateLimitState {
    count_this_hour: usize,
    hour_reset_at_ms: i64,
}

pub struct AlertManager {
    cooldown_ms: i64,
    max_alerts_per_hour: usize,
    last_sent: Mutex<HashMap<String, i64>>,
    rate_limit: Mutex<RateLimitState>,
    notifier: Box<dyn Notifier>,
    store: AlertStore,
}

impl AlertManager {
    pub fn new(
        cooldown_ms: i64,
        max_alerts_per_hour: usize,
        notifier: Box<dyn Notifier>,
        store: AlertStore,
    ) -> Self {
        Self {
            cooldown_ms,
            max_alerts_per_hour,
            last_sent: Mutex::new(HashMap::new()),
            rate_limit: Mutex::new(RateLimitState {
                count_this_hour: 0,
                hour_reset_at_ms: Utc::now().timestamp_millis(),
            }),
            notifier,
            store,
        }
    }

    fn dedup_key(anomaly: &Anomaly) -> String {
        format!("{}:{}", anomaly.market_id, anomaly.anomaly_type)
    }

    /// Returns `true` if the alert was delivered and persisted.
    pub async fn send(&self, anomaly: Anomaly) -> anyhow::Result<bool> {
        let now = Utc::now().timestamp_millis();
        let key = Self::dedup_key(&anomaly);

        {
            let last_sent = self.last_sent.lock();
            if let Some(&last) = last_sent.get(&key) {
                if now - last < self.cooldown_ms {
                    return Ok(false);
                }
            }
        }

        {
            let mut rl = self.rate_limit.lock();
            if now - rl.hour_reset_at_ms > 3_600_000 {
                rl.count_this_hour = 0;
                rl.hour_reset_at_ms = now;
            }
            if rl.count_this_hour >= self.max_alerts_per_hour {
                warn!("hourly alert cap reached, dropping alert");
                return Ok(false);
            }
            rl.count_this_hour += 1;
        }

        let message = format_message(&anomaly);

        match self.notifier.send(&message).await {
            Ok(()) => {
                self.store.add(anomaly)?;
                self.last_sent.lock().insert(key, now);
                info!(%message, "alert delivered");
                Ok(true)
            }
            Err(e) => {
                // Roll back the rate-limit slot we reserved; do not touch dedup.
                self.rate_limit.lock().count_this_hour -= 1;
                Err(anyhow::anyhow!(e))
            }
        }
    }

    pub fn store(&self) -> &AlertStore {
        &self.store
    }

    /// Read-only peek at the current hour's delivered-alert count, for the
    /// health endpoint. Must not mutate `RateLimitState` as a side effect of
    /// being read (spec.md §5: HTTP readout handlers see a consistent
    /// snapshot of counters).
    pub fn alerts_this_hour(&self) -> usize {
        let rl = self.rate_limit.lock();
        let now = Utc::now().timestamp_millis();
        if now - rl.hour_reset_at_ms > 3_600_000 {
            0
        } else {
            rl.count_this_hour
        }
    }
}

/// Formats one message per anomaly variant. Never panics; missing fields
/// render as '?' or 0, per spec.md §4.6.
fn format_message(anomaly: &Anomaly) -> String {
    let header = format!(
        "[{:?}] {} — {}",
        anomaly.severity, anomaly.anomaly_type, anomaly.question_snapshot
    );
    let body = match &anomaly.details {
        AnomalyDetails::LargeTrade(d) => format!(
            "large trade ${:.0} (z={})",
            d.trade_size_usd,
            d.z_score.map(|z| format!("{z:.2}")).unwrap_or_else(|| "?".into())
        ),
        AnomalyDetails::VolumeSpike(d) => format!(
            "volume ${:.0} vs expected ${:.0} ({:.1}x)",
            d.window_volume_usd, d.expected_volume_usd, d.volume_multiple
        ),
        AnomalyDetails::RapidPriceMove(d) => format!(
            "price {:.3} -> {:.3} ({:+.1}%)",
            d.window_start_price,
            d.window_end_price,
            d.price_delta_percent * 100.0
        ),
        AnomalyDetails::UnusualLowPriceBuy(d) => format!(
            "low-price buy ${:.0}, p{:.0} (rank {}/{})",
            d.trade_size_usd,
            d.percentile * 100.0,
            d.rank,
            d.total_trades
        ),
    };
    format!("{header} | {body} | price={:.3}", anomaly.current_price)
}
