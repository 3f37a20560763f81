//! Runtime configuration: every knob in spec.md §6, loaded from environment
//! variables (teacher's `main.rs` convention) with CLI overrides parsed by
//! `clap` (teacher's `src/bin/route_quality_monitor.rs` convention).

use crate::models::Severity;
use clap::Parser;
use std::env;

#[derive(Debug, Parser)]
#[command(name = "surveil")]
#[command(about = "Real-time market-surveillance engine for a prediction-market exchange")]
pub struct CliArgs {
    /// Override largeTradeMin (USD)
    #[arg(long = "min-trade")]
    pub min_trade: Option<f64>,

    /// Override minSeverity (LOW|MEDIUM|HIGH|CRITICAL)
    #[arg(long = "min-severity")]
    pub min_severity: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Large trade detector
    pub large_trade_min: f64,
    pub large_trade_high: f64,
    pub large_trade_critical: f64,

    // Volume spike detector
    pub volume_spike_window_ms: i64,
    pub volume_spike_low: f64,
    pub volume_spike_high: f64,
    pub volume_spike_critical: f64,

    // Rapid price move detector
    pub price_window_ms: i64,
    pub price_change_low: f64,
    pub price_change_high: f64,
    pub price_change_critical: f64,

    // Shared z-score ladder
    pub z_score_low: f64,
    pub z_score_high: f64,
    pub z_score_critical: f64,

    // Baseline
    pub baseline_window_ms: i64,
    pub min_samples_for_baseline: usize,

    // Alert manager
    pub alert_cooldown_ms: i64,
    pub max_alerts_per_hour: usize,
    pub min_severity: Severity,

    // Percentile tracker
    pub low_price_threshold: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max_samples: usize,
    pub min_samples: usize,

    // Discovery
    pub min_time_gap_days: f64,
    pub min_confidence: f64,
    pub max_pairs_per_cluster: usize,
    pub rescan_interval_ms: i64,

    // Leader monitor
    pub resolution_check_interval_ms: i64,
    pub near_certainty_threshold: f64,

    // Cache retention
    pub market_retention_days: i64,

    // Trade store
    pub trade_store_window_ms: i64,

    // Endpoints
    pub markets_api_url: String,
    pub trade_stream_ws_url: String,
    pub leader_status_api_url: String,

    // State files
    pub opportunity_state_path: String,
    pub alert_store_path: String,

    // Health endpoint
    pub health_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            large_trade_min: 5000.0,
            large_trade_high: 10000.0,
            large_trade_critical: 25000.0,

            volume_spike_window_ms: 300_000,
            volume_spike_low: 5.0,
            volume_spike_high: 10.0,
            volume_spike_critical: 20.0,

            price_window_ms: 300_000,
            price_change_low: 0.05,
            price_change_high: 0.10,
            price_change_critical: 0.20,

            z_score_low: 2.0,
            z_score_high: 3.0,
            z_score_critical: 4.0,

            baseline_window_ms: 86_400_000,
            min_samples_for_baseline: 100,

            alert_cooldown_ms: 300_000,
            max_alerts_per_hour: 20,
            min_severity: Severity::Medium,

            low_price_threshold: 0.25,
            p90: 0.90,
            p95: 0.95,
            p99: 0.99,
            max_samples: 10_000,
            min_samples: 50,

            min_time_gap_days: 0.0,
            min_confidence: 0.5,
            max_pairs_per_cluster: 10,
            rescan_interval_ms: 86_400_000,

            resolution_check_interval_ms: 1_800_000,
            near_certainty_threshold: 0.90,

            market_retention_days: 30,

            trade_store_window_ms: 86_400_000,

            markets_api_url: "https://gamma-api.polymarket.com/events".to_string(),
            trade_stream_ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            leader_status_api_url: "https://gamma-api.polymarket.com/markets".to_string(),

            opportunity_state_path: "opportunity_state.json".to_string(),
            alert_store_path: "smart-money-alerts.json".to_string(),

            health_port: 8080,
        }
    }
}

impl Config {
    /// Load defaults, overlay `SURVEIL_*` environment variables, then
    /// overlay CLI flags. Mirrors the teacher's `BookStoreConfig::from_env`.
    pub fn load(args: &CliArgs) -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("SURVEIL_MARKETS_API_URL") {
            cfg.markets_api_url = v;
        }
        if let Ok(v) = env::var("SURVEIL_TRADE_STREAM_WS_URL") {
            cfg.trade_stream_ws_url = v;
        }
        if let Ok(v) = env::var("SURVEIL_LEADER_STATUS_API_URL") {
            cfg.leader_status_api_url = v;
        }
        if let Ok(v) = env::var("SURVEIL_OPPORTUNITY_STATE_PATH") {
            cfg.opportunity_state_path = v;
        }
        if let Ok(v) = env::var("SURVEIL_ALERT_STORE_PATH") {
            cfg.alert_store_path = v;
        }
        if let Ok(v) = env::var("SURVEIL_HEALTH_PORT") {
            if let Ok(p) = v.parse() {
                cfg.health_port = p;
            }
        }
        if let Ok(v) = env::var("SURVEIL_MIN_TRADE") {
            if let Ok(f) = v.parse() {
                cfg.large_trade_min = f;
            }
        }
        if let Ok(v) = env::var("SURVEIL_MIN_SEVERITY") {
            if let Some(s) = parse_severity(&v) {
                cfg.min_severity = s;
            }
        }

        if let Some(min_trade) = args.min_trade {
            cfg.large_trade_min = min_trade;
        }
        if let Some(sev) = &args.min_severity {
            if let Some(s) = parse_severity(sev) {
                cfg.min_severity = s;
            }
        }

        cfg
    }
}

fn parse_severity(s: &str) -> Option<Severity> {
    match s.to_uppercase().as_str() {
        "LOW" => Some(Severity::Low),
        "MEDIUM" => Some(Severity::Medium),
        "HIGH" => Some(Severity::High),
        "CRITICAL" => Some(Severity::Critical),
        _ => None,
    }
}
