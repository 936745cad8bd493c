//! Alerts API
//!
//! - GET /api/alerts?accountId=&unacknowledged=&limit= - List alerts, newest first
//! - POST /api/alerts/:id/acknowledge - Acknowledge one alert

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::auth::ServiceAuth;
use crate::api::ApiResponse;
use crate::error::{AppError, Result};
use crate::types::RiskAlert;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_alerts))
        .route("/:id/acknowledge", post(acknowledge_alert))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertQuery {
    pub account_id: Option<String>,
    #[serde(default)]
    pub unacknowledged: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeResponse {
    pub id: String,
    pub acknowledged: bool,
}

async fn list_alerts(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Query(query): Query<AlertQuery>,
) -> Result<Json<ApiResponse<Vec<RiskAlert>>>> {
    let limit = query.limit.unwrap_or(50).min(500);
    let alerts = state
        .store
        .list_alerts(query.account_id.as_deref(), query.unacknowledged, limit)?;
    Ok(Json(ApiResponse::new(alerts)))
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<AcknowledgeResponse>>> {
    if !state.store.acknowledge_alert(&id)? {
        return Err(AppError::NotFound(format!("Alert {}", id)));
    }
    Ok(Json(ApiResponse::new(AcknowledgeResponse {
        id,
        acknowledged: true,
    })))
}
