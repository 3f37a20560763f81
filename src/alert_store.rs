//! Bounded in-memory alert log with an on-disk JSON snapshot, per spec.md
//! §4.7. Shape follows `signals::db_storage::DbSignalStorage` (a
//! get_recent/get_stats API behind an internal lock); persistence follows
//! the write-temp-then-rename idiom in `bin/backtest_run.rs::write_output_atomic`.

use crate::models::{Anomaly, Severity, StoredAlert};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertStats {
    pub by_type: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
    pub last_24h: usize,
    pub last_7d: usize,
}

#[derive(Serialize, Deserialize)]
pub struct Snapshot {
    pub last_updated: String,
    pub total_alerts: usize,
    pub alerts: Vec<StoredAlert>,
    pub stats: AlertStats,
}

struct Inner {
    alerts: Vec<StoredAlert>,
    total_ever: usize,
}

pub struct AlertStore {
    max_alerts: usize,
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl AlertStore {
    pub fn new(path: impl AsRef<Path>, max_alerts: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let alerts = fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<Snapshot>(&s).ok())
            .map(|s| s.alerts)
            .unwrap_or_default();

        Self {
            max_alerts,
            path,
            inner: RwLock::new(Inner {
                total_ever: alerts.len(),
                alerts,
            }),
        }
    }

    /// Prepend a normalized `StoredAlert`; truncate at `max_alerts`; persist.
    pub fn add(&self, anomaly: Anomaly) -> anyhow::Result<StoredAlert> {
        let now = Utc::now().timestamp_millis();
        let stored = StoredAlert {
            id: StoredAlert::id_for(&anomaly.market_id, anomaly.anomaly_type, anomaly.timestamp_ms),
            anomaly,
            delivered_at_ms: now,
            outcome: None,
        };

        {
            let mut inner = self.inner.write();
            inner.alerts.insert(0, stored.clone());
            inner.total_ever += 1;
            if inner.alerts.len() > self.max_alerts {
                inner.alerts.truncate(self.max_alerts);
            }
        }

        self.persist()?;
        Ok(stored)
    }

    pub fn recent(&self, n: usize) -> Vec<StoredAlert> {
        self.inner.read().alerts.iter().take(n).cloned().collect()
    }

    pub fn stats(&self) -> AlertStats {
        let inner = self.inner.read();
        let now = Utc::now().timestamp_millis();
        let day_ms = 24 * 60 * 60 * 1000;

        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut last_24h = 0;
        let mut last_7d = 0;

        for a in inner.alerts.iter() {
            *by_type
                .entry(a.anomaly.anomaly_type.to_string())
                .or_insert(0) += 1;
            *by_severity
                .entry(severity_label(a.anomaly.severity))
                .or_insert(0) += 1;
            let age = now - a.delivered_at_ms;
            if age <= day_ms {
                last_24h += 1;
            }
            if age <= 7 * day_ms {
                last_7d += 1;
            }
        }

        AlertStats {
            by_type,
            by_severity,
            last_24h,
            last_7d,
        }
    }

    /// Force a write of the current state to disk, for the shutdown path.
    /// Every mutating call already persists synchronously, so this mostly
    /// documents the shutdown contract rather than changing durability.
    pub fn flush(&self) -> anyhow::Result<()> {
        self.persist()
    }

    fn persist(&self) -> anyhow::Result<()> {
        let inner = self.inner.read();
        let snapshot = Snapshot {
            last_updated: Utc::now().to_rfc3339(),
            total_alerts: inner.total_ever,
            alerts: inner.alerts.clone(),
            stats: self.stats_locked(&inner.alerts),
        };
        drop(inner);

        let json = serde_json::to_string_pretty(&snapshot)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn stats_locked(&self, alerts: &[StoredAlert]) -> AlertStats {
        let now = Utc::now().timestamp_millis();
        let day_ms = 24 * 60 * 60 * 1000;
        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut last_24h = 0;
        let mut last_7d = 0;
        for a in alerts {
            *by_type
                .entry(a.anomaly.anomaly_type.to_string())
                .or_insert(0) += 1;
            *by_severity
                .entry(severity_label(a.anomaly.severity))
                .or_insert(0) += 1;
            let age = now - a.delivered_at_ms;
            if age <= day_ms {
                last_24h += 1;
            }
            if age <= 7 * day_ms {
                last_7d += 1;
            }
        }
        AlertStats {
            by_type,
            by_severity,
            last_24h,
            last_7d,
        }
    }
}

fn severity_label(s: Severity) -> String {
    match s {
        Severity::None => "NONE",
        Severity::Low => "LOW",
        Severity::Medium => "MEDIUM",
        Severity::High => "HIGH",
        Severity::Critical => "CRITICAL",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnomalyDetails, AnomalyKind, Direction, LargeTradeDetails};

    fn anomaly(market_id: &str, ts: i64) -> Anomaly {
        Anomaly {
            market_id: market_id.to_string(),
            question_snapshot: "q".into(),
            anomaly_type: AnomalyKind::LargeTrade,
            severity: Severity::High,
            timestamp_ms: ts,
            current_price: 0.5,
            implied_direction: Direction::Yes,
            triggering_trade: None,
            details: AnomalyDetails::LargeTrade(LargeTradeDetails {
                trade_size_usd: 10000.0,
                z_score: None,
            }),
        }
    }

    #[test]
    fn add_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        let store = AlertStore::new(&path, 100);
        store.add(anomaly("m", 1)).unwrap();
        store.add(anomaly("m", 2)).unwrap();

        let reloaded = AlertStore::new(&path, 100);
        assert_eq!(reloaded.recent(10).len(), 2);
    }

    #[test]
    fn truncates_at_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        let store = AlertStore::new(&path, 2);
        store.add(anomaly("m", 1)).unwrap();
        store.add(anomaly("m", 2)).unwrap();
        store.add(anomaly("m", 3)).unwrap();
        assert_eq!(store.recent(10).len(), 2);
    }
}
