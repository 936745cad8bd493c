//! Policies API
//!
//! - PUT /api/accounts/:id/policy - Store a new policy (append-only; latest wins)
//! - GET /api/accounts/:id/policy - Effective policy (default when none stored)
//! - POST /api/accounts/:id/policy/check - Validate a proposed trade without executing

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use crate::api::accounts::require_account;
use crate::api::auth::ServiceAuth;
use crate::api::ApiResponse;
use crate::error::{AppError, Result};
use crate::services::policy::check_trade;
use crate::types::{Policy, PolicyCheck, TradeProposal};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/policy", get(get_policy).put(set_policy))
        .route("/:id/policy/check", post(check_policy))
}

async fn set_policy(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
    Json(mut policy): Json<Policy>,
) -> Result<Json<ApiResponse<Policy>>> {
    require_account(&state, &id)?;
    policy.validate().map_err(AppError::Unprocessable)?;
    policy.id = Uuid::new_v4().to_string();
    policy.account_id = id;
    policy.created_at = Utc::now();
    state.store.insert_policy(&policy)?;
    Ok(Json(ApiResponse::new(policy)))
}

async fn get_policy(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Policy>>> {
    require_account(&state, &id)?;
    Ok(Json(ApiResponse::new(state.store.effective_policy(&id)?)))
}

async fn check_policy(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
    Json(proposal): Json<TradeProposal>,
) -> Result<Json<ApiResponse<PolicyCheck>>> {
    require_account(&state, &id)?;
    let policy = state.store.effective_policy(&id)?;
    let today = state.store.today_notional(&id, Utc::now().date_naive())?;
    Ok(Json(ApiResponse::new(check_trade(&proposal, &policy, today))))
}
