//! Entry point: load config, wire every collaborator, and run the
//! orchestrator/discovery/leader-monitor/health-server tasks concurrently
//! until Ctrl-C, per spec.md §4.8/§4.9/§4.11/§4.12.

use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use surveil_backend::alert_manager::AlertManager;
use surveil_backend::alert_store::AlertStore;
use surveil_backend::baseline::BaselineCalculator;
use surveil_backend::config::{CliArgs, Config};
use surveil_backend::discovery::DiscoveryPipeline;
use surveil_backend::health::{self, HealthState};
use surveil_backend::leader_monitor::LeaderMonitor;
use surveil_backend::market_stats::PercentileTracker;
use surveil_backend::opportunity_state::OpportunityState;
use surveil_backend::orchestrator::Orchestrator;
use surveil_backend::providers::{
    HttpLeaderStatusApi, HttpMarketsApi, StdoutNotifier, UnconfiguredEmbeddingProvider,
    UnconfiguredLlmProvider,
};
use surveil_backend::recorder::NullRecorder;
use surveil_backend::trade_store::TradeStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let _ = dotenv();
    init_tracing();

    let args = CliArgs::parse();
    let config = Arc::new(Config::load(&args));

    info!("starting market-surveillance engine");

    if let Err(e) = run(config).await {
        error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let trade_store = Arc::new(TradeStore::new(config.trade_store_window_ms));
    let baseline = Arc::new(BaselineCalculator::new(
        config.baseline_window_ms,
        config.min_samples_for_baseline,
    ));
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
        AlertStore::new(&config.alert_store_path, 10_000),
    ));
    let opportunity_state = Arc::new(OpportunityState::load(&config.opportunity_state_path)?);

    let markets_api = Arc::new(HttpMarketsApi::new(config.markets_api_url.clone()));
    let leader_status_api = Arc::new(HttpLeaderStatusApi::new(config.leader_status_api_url.clone()));

    let shutdown = CancellationToken::new();

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        trade_store.clone(),
        baseline.clone(),
        percentile.clone(),
        alert_manager.clone(),
        Arc::new(NullRecorder),
        markets_api.clone(),
        shutdown.clone(),
    ));
    orchestrator.refresh_universe().await?;

    let health_state = HealthState {
        trade_store: trade_store.clone(),
        alert_manager: alert_manager.clone(),
        opportunity_state: opportunity_state.clone(),
        started_at_ms: trade_store.now_ms(),
    };

    let trade_stream_task = tokio::spawn(orchestrator.clone().run_trade_stream());
    let hourly_task = tokio::spawn(orchestrator.clone().run_hourly_maintenance());
    let stats_task = tokio::spawn(orchestrator.clone().run_stats_log());
    let universe_task = tokio::spawn(orchestrator.clone().run_universe_refresh());

    let leader_monitor = Arc::new(LeaderMonitor::new(
        leader_status_api,
        opportunity_state.clone(),
        Arc::new(StdoutNotifier),
        config.near_certainty_threshold,
    ));
    let leader_monitor_task = {
        let interval_ms = config.resolution_check_interval_ms as u64;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = leader_monitor.run_scan().await {
                    error!(error = %e, "leader monitor scan failed");
                }
            }
        })
    };

    // The embedding/LLM vendors are external collaborators specified only
    // via their interfaces (spec.md, Non-goals), so no concrete HTTP client
    // exists for them here. Unconfigured stand-ins drive the pipeline's own
    // degrade paths (rule-based topic fallback, pairs left UNRELATED and
    // uncached) so the scan still runs on schedule rather than being dead
    // code; swap in a real `EmbeddingProvider`/`LlmProvider` to light it up.
    let discovery = Arc::new(DiscoveryPipeline::new(
        config.clone(),
        markets_api.clone(),
        Arc::new(UnconfiguredEmbeddingProvider),
        Arc::new(UnconfiguredLlmProvider),
        opportunity_state.clone(),
        Arc::new(StdoutNotifier),
    ));
    let discovery_task = {
        let trade_store = trade_store.clone();
        let interval_ms = config.rescan_interval_ms as u64;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match discovery.run_scan(trade_store.now_ms()).await {
                    Ok(n) => info!(opportunities = n, "discovery scan complete"),
                    Err(e) => error!(error = %e, "discovery scan failed"),
                }
            }
        })
    };

    let addr = format!("0.0.0.0:{}", config.health_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "health endpoint listening");
    let health_router = health::router(health_state);
    let health_task = tokio::spawn(async move {
        axum::serve(listener, health_router).await
    });

    // `trade_stream_task` is kept outside this select! so it survives
    // whichever branch wins; once shutdown is requested it's awaited
    // (bounded) below instead of being raced against the others.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        res = hourly_task => {
            error!(?res, "hourly maintenance task exited unexpectedly");
        }
        res = stats_task => {
            error!(?res, "stats task exited unexpectedly");
        }
        res = universe_task => {
            error!(?res, "universe refresh task exited unexpectedly");
        }
        res = leader_monitor_task => {
            error!(?res, "leader monitor task exited unexpectedly");
        }
        res = discovery_task => {
            error!(?res, "discovery task exited unexpectedly");
        }
        res = health_task => {
            error!(?res, "health server task exited unexpectedly");
        }
    }

    info!("shutting down: stopping new work, closing trade stream");
    shutdown.cancel();
    if tokio::time::timeout(std::time::Duration::from_secs(5), trade_stream_task)
        .await
        .is_err()
    {
        warn!("trade stream task did not exit within the shutdown grace period");
    }

    if let Err(e) = alert_manager.store().flush() {
        error!(error = %e, "failed to flush alert store on shutdown");
    }
    if let Err(e) = opportunity_state.save() {
        error!(error = %e, "failed to persist opportunity state on shutdown");
    }
    info!("shutdown complete");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surveil_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
