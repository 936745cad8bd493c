//! Trades API
//!
//! - POST /api/accounts/:id/trades - Execute a basket trade through the policy enforcer
//!
//! A rejected trade answers 422 with the full policy check so callers can show
//! every violation at once.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};

use crate::api::accounts::require_account;
use crate::api::auth::ServiceAuth;
use crate::api::ApiResponse;
use crate::error::Result;
use crate::types::{TradeExecution, TradeProposal};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/:id/trades", post(execute_trade))
}

async fn execute_trade(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
    Json(proposal): Json<TradeProposal>,
) -> Result<(StatusCode, Json<ApiResponse<TradeExecution>>)> {
    let account = require_account(&state, &id)?;
    let execution = state.trade_executor.execute(&account, &proposal).await?;
    let status = if execution.check.valid {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(ApiResponse::new(execution))))
}
