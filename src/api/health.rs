use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    ledger: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ledger = match state.store.list_accounts() {
        Ok(_) => "ok",
        Err(_) => "unavailable",
    };
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        ledger,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health))
}
