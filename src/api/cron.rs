//! Cycle triggers for external schedulers.
//!
//! - POST /api/cron/risk-monitor - Evaluate every account once
//! - POST /api/cron/strategies - Run every active exit strategy once
//! - POST /api/cron/daily-snapshot - Record daily equity and apply alert retention
//!
//! GET is accepted as well for schedulers that can only issue GETs.

use axum::{extract::State, routing::get, Json, Router};
use tracing::info;

use crate::api::auth::ServiceAuth;
use crate::api::ApiResponse;
use crate::types::{RiskCycleSummary, SnapshotCycleSummary, StrategyCycleSummary};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/risk-monitor", get(risk_monitor).post(risk_monitor))
        .route("/strategies", get(strategies).post(strategies))
        .route("/daily-snapshot", get(daily_snapshot).post(daily_snapshot))
}

async fn risk_monitor(
    State(state): State<AppState>,
    auth: ServiceAuth,
) -> Json<ApiResponse<RiskCycleSummary>> {
    info!("Risk cycle triggered by {:?}", auth.caller);
    Json(ApiResponse::new(state.risk_monitor.run_cycle().await))
}

async fn strategies(
    State(state): State<AppState>,
    auth: ServiceAuth,
) -> Json<ApiResponse<StrategyCycleSummary>> {
    info!("Strategy cycle triggered by {:?}", auth.caller);
    Json(ApiResponse::new(state.strategy_engine.run_cycle().await))
}

async fn daily_snapshot(
    State(state): State<AppState>,
    auth: ServiceAuth,
) -> Json<ApiResponse<SnapshotCycleSummary>> {
    info!("Daily snapshot triggered by {:?}", auth.caller);
    Json(ApiResponse::new(state.snapshots.run_cycle().await))
}
