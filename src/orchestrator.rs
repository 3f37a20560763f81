//! Market universe + trade-stream lifecycle (spec.md §4.8): connect to the
//! trade WS, dispatch each trade through the detection pipeline in order,
//! and run the periodic maintenance tickers. Reconnect-with-backoff is
//! grounded on `scrapers::polymarket_ws::PolymarketMarketWsCache::run`.

use crate::alert_manager::AlertManager;
use crate::anomaly::AnomalyEngine;
use crate::baseline::BaselineCalculator;
use crate::config::Config;
use crate::market_stats::PercentileTracker;
use crate::models::{Market, MarketId, Trade};
use crate::providers::MarketsApi;
use crate::recorder::Recorder;
use crate::trade_store::TradeStore;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{interval, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Exchange trade-stream subscribe messages carry at most this many
/// token ids each, per spec.md §6.
const SUBSCRIBE_CHUNK_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct WsTradeMsg {
    #[serde(rename = "asset_id")]
    token_id: String,
    #[serde(default)]
    market: Option<String>,
    price: String,
    size: String,
    side: String,
    #[serde(default)]
    timestamp: Option<String>,
}

pub struct Orchestrator {
    config: Arc<Config>,
    trade_store: Arc<TradeStore>,
    baseline: Arc<BaselineCalculator>,
    percentile: Arc<PercentileTracker>,
    alert_manager: Arc<AlertManager>,
    recorder: Arc<dyn Recorder>,
    markets_api: Arc<dyn MarketsApi>,
    universe: RwLock<HashMap<MarketId, Market>>,
    token_to_market: RwLock<HashMap<String, MarketId>>,
    ws_writer: AsyncMutex<Option<WsSink>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        trade_store: Arc<TradeStore>,
        baseline: Arc<BaselineCalculator>,
        percentile: Arc<PercentileTracker>,
        alert_manager: Arc<AlertManager>,
        recorder: Arc<dyn Recorder>,
        markets_api: Arc<dyn MarketsApi>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            trade_store,
            baseline,
            percentile,
            alert_manager,
            recorder,
            markets_api,
            universe: RwLock::new(HashMap::new()),
            token_to_market: RwLock::new(HashMap::new()),
            ws_writer: AsyncMutex::new(None),
            shutdown,
        }
    }

    /// Refresh the tracked market universe; called on start and every 30min.
    pub async fn refresh_universe(&self) -> anyhow::Result<usize> {
        let mut cursor: Option<String> = None;
        let mut count = 0;
        loop {
            let (markets, next_cursor) =
                self.markets_api.fetch_active_markets(cursor.as_deref()).await?;
            if markets.is_empty() {
                break;
            }
            let mut universe = self.universe.write();
            let mut tokens = self.token_to_market.write();
            for m in markets {
                if m.closed {
                    continue;
                }
                tokens.insert(m.yes_token_id.clone(), m.id.clone());
                tokens.insert(m.no_token_id.clone(), m.id.clone());
                count += 1;
                universe.insert(m.id.clone(), m);
            }
            drop(universe);
            drop(tokens);
            match next_cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        info!(markets = count, "refreshed market universe");
        Ok(count)
    }

    fn question_for(&self, market_id: &str) -> String {
        self.universe
            .read()
            .get(market_id)
            .map(|m| m.question.clone())
            .unwrap_or_default()
    }

    /// Run detection + alerting for one trade, in the order spec.md §4.8
    /// mandates: trade store, then detectors, then alert manager, then the
    /// offline recorder.
    ///
    /// Baseline updates only happen when the trade cleared every detector
    /// (spec.md §4.5): a trade that itself triggered an anomaly must not be
    /// folded into the baseline it was just compared against, or the
    /// baseline drifts toward whatever is currently anomalous.
    pub async fn handle_trade(&self, trade: Trade) -> anyhow::Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }

        self.trade_store.add(trade.clone());

        let question = self.question_for(&trade.market_id);
        let anomalies = {
            let engine = AnomalyEngine {
                config: &self.config,
                trade_store: &self.trade_store,
                baseline: &self.baseline,
                percentile: &self.percentile,
            };
            engine.detect(&trade, &question)
        };

        if anomalies.is_empty() {
            let now_ms = self.trade_store.now_ms();
            let trades = self
                .trade_store
                .recent_trades(&trade.market_id, self.config.baseline_window_ms);
            self.baseline.update_baseline(&trade.market_id, now_ms, &trades);
        }

        for anomaly in anomalies {
            match self.alert_manager.send(anomaly).await {
                Ok(_) => {}
                Err(e) => warn!(error = %e, "alert delivery failed"),
            }
        }

        self.recorder.record(&trade).await;
        Ok(())
    }

    /// Resolve a WS trade-channel asset_id to a tracked market id.
    fn market_id_for_token(&self, token_id: &str) -> Option<MarketId> {
        self.token_to_market.read().get(token_id).cloned()
    }

    /// Connect to the trade-stream WebSocket and dispatch every trade,
    /// reconnecting with exponential backoff on disconnect. Runs forever,
    /// until cancelled.
    pub async fn run_trade_stream(self: Arc<Self>) {
        let mut reconnect_delay = Duration::from_secs(1);
        let max_reconnect_delay = Duration::from_secs(30);

        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            match self.connect_and_stream().await {
                Ok(()) => {
                    reconnect_delay = Duration::from_secs(1);
                }
                Err(e) => {
                    if self.shutdown.is_cancelled() {
                        return;
                    }
                    warn!(error = %e, "trade stream disconnected, reconnecting");
                    tokio::select! {
                        _ = sleep(reconnect_delay) => {}
                        _ = self.shutdown.cancelled() => return,
                    }
                    reconnect_delay = (reconnect_delay * 2).min(max_reconnect_delay);
                }
            }
        }
    }

    /// Send one `{"type": "subscribe", "channel": "market", "assets_ids": [...]}`
    /// message per chunk of up to `SUBSCRIBE_CHUNK_SIZE` token ids, per
    /// spec.md §6. No-op while disconnected.
    async fn subscribe_tokens(&self, token_ids: &[String]) -> anyhow::Result<()> {
        if token_ids.is_empty() {
            return Ok(());
        }
        let mut guard = self.ws_writer.lock().await;
        let Some(write) = guard.as_mut() else {
            return Ok(());
        };
        for chunk in token_ids.chunks(SUBSCRIBE_CHUNK_SIZE) {
            let sub_msg = serde_json::json!({
                "type": "subscribe",
                "channel": "market",
                "assets_ids": chunk,
            });
            write.send(Message::Text(sub_msg.to_string())).await?;
        }
        Ok(())
    }

    async fn connect_and_stream(&self) -> anyhow::Result<()> {
        info!(url = %self.config.trade_stream_ws_url, "connecting to trade stream");
        let (ws_stream, _resp) = connect_async(&self.config.trade_stream_ws_url).await?;
        let (write, mut read) = ws_stream.split();
        *self.ws_writer.lock().await = Some(write);

        let result = self.drive_connection(&mut read).await;
        *self.ws_writer.lock().await = None;
        result
    }

    async fn drive_connection(&self, read: &mut WsStream) -> anyhow::Result<()> {
        let token_ids: Vec<String> = self.token_to_market.read().keys().cloned().collect();
        self.subscribe_tokens(&token_ids).await?;

        let mut ping = interval(Duration::from_secs(5));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut sequence: u64 = 0;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let mut guard = self.ws_writer.lock().await;
                    if let Some(write) = guard.as_mut() {
                        let _ = write.send(Message::Close(None)).await;
                    }
                    return Ok(());
                }
                _ = ping.tick() => {
                    let mut guard = self.ws_writer.lock().await;
                    if let Some(write) = guard.as_mut() {
                        let _ = write.send(Message::Text("PING".to_string())).await;
                    }
                }
                ws_msg = read.next() => {
                    let Some(ws_msg) = ws_msg else {
                        return Err(anyhow::anyhow!("trade stream ended"));
                    };
                    match ws_msg {
                        Ok(Message::Text(text)) => {
                            sequence += 1;
                            self.handle_text_message(&text, sequence).await;
                        }
                        Ok(Message::Ping(payload)) => {
                            let mut guard = self.ws_writer.lock().await;
                            if let Some(write) = guard.as_mut() {
                                let _ = write.send(Message::Pong(payload)).await;
                            }
                        }
                        Ok(Message::Close(frame)) => {
                            debug!(?frame, "trade stream close");
                            return Ok(());
                        }
                        Ok(_) => {}
                        Err(e) => return Err(anyhow::anyhow!("trade stream error: {e}")),
                    }
                }
            }
        }
    }

    async fn handle_text_message(&self, text: &str, sequence: u64) {
        if text.eq_ignore_ascii_case("PONG") {
            return;
        }
        let msg: WsTradeMsg = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return,
        };

        let market_id = match msg.market.or_else(|| self.market_id_for_token(&msg.token_id)) {
            Some(id) => id,
            None => {
                debug!(token_id = %msg.token_id, "trade for unknown market, dropping");
                return;
            }
        };

        let price: f64 = match msg.price.parse() {
            Ok(p) => p,
            Err(_) => return,
        };
        let size: f64 = match msg.size.parse() {
            Ok(s) => s,
            Err(_) => return,
        };
        // Default side to BUY when absent, per the open question resolved in DESIGN.md.
        let side = match msg.side.to_uppercase().as_str() {
            "SELL" => crate::models::Side::Sell,
            _ => crate::models::Side::Buy,
        };

        let timestamp_ms = msg
            .timestamp
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or_else(|| self.trade_store.now_ms());

        let trade = Trade {
            market_id,
            token_id: msg.token_id,
            timestamp_ms,
            sequence,
            price,
            size,
            side,
        };

        if let Err(e) = self.handle_trade(trade).await {
            warn!(error = %e, "trade handling failed");
        }
    }

    /// Every hour: evict stale trade-store entries and publish the alert
    /// snapshot. Runs until cancelled.
    pub async fn run_hourly_maintenance(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.trade_store.cleanup();
            info!("hourly maintenance: trade store cleaned up");
        }
    }

    /// Every 5 minutes: log coarse throughput stats.
    pub async fn run_stats_log(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            info!(
                markets = self.trade_store.market_ids().len(),
                trades = self.trade_store.total_trades(),
                "stats tick"
            );
        }
    }

    /// Every 30 minutes: refresh the market universe and push subscribe
    /// messages for any newly-discovered tokens to the live connection
    /// (spec.md §4.8 step 5) — baselines are never recomputed here, only
    /// incrementally in `handle_trade`, to preserve the anti-pollution
    /// invariant (spec.md §4.5).
    pub async fn run_universe_refresh(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(1800));
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let before: HashSet<String> = self.token_to_market.read().keys().cloned().collect();
            if let Err(e) = self.refresh_universe().await {
                warn!(error = %e, "universe refresh failed");
                continue;
            }
            let new_tokens: Vec<String> = self
                .token_to_market
                .read()
                .keys()
                .filter(|t| !before.contains(*t))
                .cloned()
                .collect();
            if !new_tokens.is_empty() {
                if let Err(e) = self.subscribe_tokens(&new_tokens).await {
                    warn!(error = %e, "failed to subscribe newly discovered tokens");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_store::AlertStore;
    use crate::models::Side;
    use crate::providers::StdoutNotifier;
    use crate::recorder::NullRecorder;
    use async_trait::async_trait;

    struct EmptyMarketsApi;

    #[async_trait]
    impl MarketsApi for EmptyMarketsApi {
        async fn fetch_active_markets(
            &self,
            _cursor: Option<&str>,
        ) -> crate::error::Result<(Vec<Market>, Option<String>)> {
            Ok((Vec::new(), None))
        }
    }

    fn orchestrator(dir: &std::path::Path) -> Orchestrator {
        let config = Arc::new(Config::default());
        let trade_store = Arc::new(TradeStore::new(config.trade_store_window_ms));
        let baseline = Arc::new(BaselineCalculator::new(config.baseline_window_ms, 1));
        let percentile = Arc::new(PercentileTracker::new(
            config.low_price_threshold,
            config.max_samples,
            config.min_samples,
            config.p90,
            config.p95,
            config.p99,
        ));
        let alert_manager = Arc::new(AlertManager::new(
            config.alert_cooldown_ms,
            config.max_alerts_per_hour,
            Box::new(StdoutNotifier),
            AlertStore::new(dir.join("a.json"), 100),
        ));
        Orchestrator::new(
            config,
            trade_store,
            baseline,
            percentile,
            alert_manager,
            Arc::new(NullRecorder),
            Arc::new(EmptyMarketsApi),
            CancellationToken::new(),
        )
    }

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

    #[tokio::test]
    async fn clean_trades_build_up_a_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        orch.trade_store.set_simulated_time(0);
        for i in 0..5 {
            orch.handle_trade(trade(i * 1000, 0.5, 10.0)).await.unwrap();
            orch.trade_store.set_simulated_time((i + 1) * 1000);
        }
        assert!(orch.baseline.get("m").is_some());
    }

    #[tokio::test]
    async fn anomalous_trade_does_not_pollute_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        orch.trade_store.set_simulated_time(0);
        for i in 0..5 {
            orch.handle_trade(trade(i * 1000, 0.5, 10.0)).await.unwrap();
        }
        let before = orch.baseline.get("m").unwrap();

        // Far above large_trade_critical: this trade itself is anomalous and
        // must not be folded into the baseline.
        orch.trade_store.set_simulated_time(6000);
        orch.handle_trade(trade(6000, 0.5, 1_000_000.0)).await.unwrap();

        let after = orch.baseline.get("m").unwrap();
        assert_eq!(before.sample_count, after.sample_count);
        assert!((before.avg_trade_size_usd - after.avg_trade_size_usd).abs() < 1e-9);
    }

    #[tokio::test]
    async fn shutdown_stops_accepting_new_work() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        orch.shutdown.cancel();
        orch.handle_trade(trade(0, 0.5, 10.0)).await.unwrap();
        assert_eq!(orch.trade_store.total_trades(), 0);
    }
}
