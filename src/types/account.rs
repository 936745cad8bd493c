use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A monitored trading account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    /// Wallet address used for clearinghouse reads and order writes.
    pub wallet_ref: String,
    pub label: Option<String>,
    /// Highest equity ever observed. Only increases.
    pub peak_equity: f64,
    pub current_drawdown_pct: f64,
    pub last_equity: f64,
    pub last_equity_update: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(wallet_ref: impl Into<String>, label: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            wallet_ref: wallet_ref.into(),
            label,
            peak_equity: 0.0,
            current_drawdown_pct: 0.0,
            last_equity: 0.0,
            last_equity_update: None,
            created_at: Utc::now(),
        }
    }
}

/// Request body for registering an account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAccountRequest {
    pub wallet_ref: String,
    pub label: Option<String>,
}
