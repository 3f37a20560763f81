//! Public HTTP surface (spec.md §4.12): `/health`, `/stats`, `/alerts`.
//! Router assembly follows the teacher's `main.rs` (permissive CORS,
//! `with_state`, public routes separate from any authenticated ones).

use crate::alert_manager::AlertManager;
use crate::alert_store::AlertStats;
use crate::models::StoredAlert;
use crate::opportunity_state::OpportunityState;
use crate::trade_store::TradeStore;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct HealthState {
    pub trade_store: Arc<TradeStore>,
    pub alert_manager: Arc<AlertManager>,
    pub opportunity_state: Arc<OpportunityState>,
    pub started_at_ms: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_ms: i64,
    markets: usize,
    trades: usize,
    alerts_this_hour: usize,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/alerts", get(alerts))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_ms: state.trade_store.now_ms() - state.started_at_ms,
        markets: state.trade_store.market_ids().len(),
        trades: state.trade_store.total_trades(),
        alerts_this_hour: state.alert_manager.alerts_this_hour(),
    })
}

async fn stats(State(state): State<HealthState>) -> Json<AlertStats> {
    Json(state.alert_manager.store().stats())
}

async fn alerts(State(state): State<HealthState>) -> Json<Vec<StoredAlert>> {
    Json(state.alert_manager.store().recent(50))
}
