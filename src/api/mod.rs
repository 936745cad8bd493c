pub mod accounts;
pub mod alerts;
pub mod auth;
pub mod cron;
pub mod health;
pub mod policies;
pub mod strategies;
pub mod trades;

use crate::AppState;
use axum::Router;
use serde::Serialize;

/// Standard success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/cron", cron::router())
        .nest(
            "/api/accounts",
            accounts::router()
                .merge(policies::router())
                .merge(strategies::account_router())
                .merge(trades::router()),
        )
        .nest("/api/strategies", strategies::router())
        .nest("/api/alerts", alerts::router())
}
