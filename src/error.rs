use crate::services::{GatewayError, LedgerError, StrategyError, TradeError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Trade(#[from] TradeError),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Ledger(LedgerError::Conflict(msg)) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Ledger(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Gateway(e) if e.is_transient() => {
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            AppError::Gateway(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            AppError::Strategy(StrategyError::UnknownStrategy(_))
            | AppError::Strategy(StrategyError::InvalidParams { .. }) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::Strategy(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Trade(TradeError::NoCredentials(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            AppError::Trade(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::SerdeJson(e) => (StatusCode::BAD_REQUEST, e.to_string()),
        };

        if status.is_server_error() {
            tracing::error!("{}", message);
        }

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
