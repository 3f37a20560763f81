//! Offline trade recording seam, per SPEC_FULL.md §4.14. The engine calls
//! this on every trade regardless of whether an anomaly fired; the default
//! implementation is a no-op so running without a configured sink never
//! blocks the hot path.

use crate::models::Trade;
use async_trait::async_trait;

#[async_trait]
pub trait Recorder: Send + Sync {
    async fn record(&self, trade: &Trade);
}

pub struct NullRecorder;

#[async_trait]
impl Recorder for NullRecorder {
    async fn record(&self, _trade: &Trade) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    #[tokio::test]
    async fn null_recorder_does_nothing() {
        let recorder = NullRecorder;
        let trade = Trade {
            market_id: "m".into(),
            token_id: "t".into(),
            timestamp_ms: 0,
            sequence: 0,
            price: 0.5,
            size: 1.0,
            side: Side::Buy,
        };
        recorder.record(&trade).await;
    }
}
