//! Strategies API
//!
//! Account scoped:
//! - POST /api/accounts/:id/strategies - Attach an exit strategy
//! - GET /api/accounts/:id/strategies - List strategies
//!
//! By strategy id:
//! - PATCH /api/strategies/:id - Toggle `active`
//! - DELETE /api/strategies/:id - Remove a strategy
//! - GET /api/strategies/:id/runs - Run history, newest first

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;

use crate::api::accounts::{require_account, LimitQuery};
use crate::api::auth::ServiceAuth;
use crate::api::ApiResponse;
use crate::error::{AppError, Result};
use crate::types::{CreateStrategyRequest, StrategyDefinition, StrategyRun};
use crate::AppState;

pub fn account_router() -> Router<AppState> {
    Router::new().route("/:id/strategies", get(list_strategies).post(create_strategy))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id", patch(toggle_strategy).delete(delete_strategy))
        .route("/:id/runs", get(list_runs))
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub active: bool,
}

async fn create_strategy(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
    Json(request): Json<CreateStrategyRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StrategyDefinition>>)> {
    require_account(&state, &id)?;
    if !request.params.is_object() {
        return Err(AppError::BadRequest("params must be an object".to_string()));
    }
    let mut strategy = StrategyDefinition::new(&id, request.strategy_type, request.params);
    strategy.active = request.active;
    state.store.insert_strategy(&strategy)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(strategy))))
}

async fn list_strategies(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<StrategyDefinition>>>> {
    require_account(&state, &id)?;
    Ok(Json(ApiResponse::new(state.store.list_strategies(&id)?)))
}

async fn toggle_strategy(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<ApiResponse<StrategyDefinition>>> {
    if !state.store.set_strategy_active(&id, request.active)? {
        return Err(AppError::NotFound(format!("Strategy {}", id)));
    }
    let strategy = state
        .store
        .get_strategy(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Strategy {}", id)))?;
    Ok(Json(ApiResponse::new(strategy)))
}

async fn delete_strategy(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if state.store.delete_strategy(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Strategy {}", id)))
    }
}

async fn list_runs(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<StrategyRun>>>> {
    if state.store.get_strategy(&id)?.is_none() {
        return Err(AppError::NotFound(format!("Strategy {}", id)));
    }
    let limit = query.limit.unwrap_or(20).min(200);
    Ok(Json(ApiResponse::new(state.store.list_runs(&id, limit)?)))
}
