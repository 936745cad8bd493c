//! Accounts API
//!
//! - POST /api/accounts - Register a wallet (idempotent per wallet)
//! - GET /api/accounts - List accounts
//! - GET /api/accounts/:id - Get one account
//! - GET /api/accounts/:id/snapshots - Daily risk snapshots, newest first

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::auth::ServiceAuth;
use crate::api::ApiResponse;
use crate::error::{AppError, Result};
use crate::types::{Account, DailySnapshot, RegisterAccountRequest};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_accounts).post(register_account))
        .route("/:id", get(get_account))
        .route("/:id/snapshots", get(list_snapshots))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Load an account or fail with 404.
pub fn require_account(state: &AppState, id: &str) -> Result<Account> {
    state
        .store
        .get_account(id)?
        .ok_or_else(|| AppError::NotFound(format!("Account {}", id)))
}

async fn register_account(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Json(request): Json<RegisterAccountRequest>,
) -> Result<Json<ApiResponse<Account>>> {
    let wallet = request.wallet_ref.trim();
    if wallet.is_empty() {
        return Err(AppError::BadRequest("walletRef is required".to_string()));
    }
    let account = state
        .store
        .register_account(wallet, request.label.as_deref())?;
    Ok(Json(ApiResponse::new(account)))
}

async fn list_accounts(
    State(state): State<AppState>,
    _auth: ServiceAuth,
) -> Result<Json<ApiResponse<Vec<Account>>>> {
    Ok(Json(ApiResponse::new(state.store.list_accounts()?)))
}

async fn get_account(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Account>>> {
    Ok(Json(ApiResponse::new(require_account(&state, &id)?)))
}

async fn list_snapshots(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<DailySnapshot>>>> {
    require_account(&state, &id)?;
    let limit = query.limit.unwrap_or(30).min(365);
    Ok(Json(ApiResponse::new(state.store.list_snapshots(&id, limit)?)))
}
