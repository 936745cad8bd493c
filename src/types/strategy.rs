//! Exit strategy definitions, runs and outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Known exit strategy kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyType {
    #[serde(rename = "take-profit")]
    TakeProfit,
    #[serde(rename = "trailing-stop")]
    TrailingStop,
    #[serde(rename = "vwap-exit")]
    VwapExit,
    #[serde(rename = "adx-momentum")]
    AdxMomentum,
}

impl StrategyType {
    pub const ALL: [StrategyType; 4] = [
        StrategyType::TakeProfit,
        StrategyType::TrailingStop,
        StrategyType::VwapExit,
        StrategyType::AdxMomentum,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyType::TakeProfit => "take-profit",
            StrategyType::TrailingStop => "trailing-stop",
            StrategyType::VwapExit => "vwap-exit",
            StrategyType::AdxMomentum => "adx-momentum",
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// A user-configured strategy attached to an account.
///
/// `strategy_type` is kept as the raw stored string so rows with an
/// unrecognised type can still be loaded and failed explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDefinition {
    pub id: String,
    pub account_id: String,
    pub strategy_type: String,
    pub params: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StrategyDefinition {
    pub fn new(account_id: &str, strategy_type: StrategyType, params: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            strategy_type: strategy_type.as_str().to_string(),
            params,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Request body for creating a strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStrategyRequest {
    pub strategy_type: StrategyType,
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn empty_params() -> serde_json::Value {
    serde_json::json!({})
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// One execution attempt of one strategy. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRun {
    pub id: String,
    pub strategy_id: String,
    pub account_id: String,
    pub status: RunStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyAction {
    None,
    PositionClosed,
}

/// Per-position note recorded in a strategy outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitDetail {
    pub asset: String,
    pub pnl_pct: f64,
    pub closed: bool,
    pub note: String,
}

/// Result of executing one strategy for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyOutcome {
    pub success: bool,
    pub action: StrategyAction,
    pub positions_closed: u32,
    pub details: Vec<ExitDetail>,
    pub error: Option<String>,
}

impl StrategyOutcome {
    /// Nothing to do.
    pub fn idle(details: Vec<ExitDetail>) -> Self {
        Self {
            success: true,
            action: StrategyAction::None,
            positions_closed: 0,
            details,
            error: None,
        }
    }

    /// Operational failure before any decision could be made.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            action: StrategyAction::None,
            positions_closed: 0,
            details: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_type_round_trip_str() {
        for t in StrategyType::ALL {
            assert_eq!(t.as_str().parse::<StrategyType>().unwrap(), t);
        }
        assert!("grid-bot".parse::<StrategyType>().is_err());
    }

    #[test]
    fn test_strategy_type_serde_uses_kebab_names() {
        let json = serde_json::to_string(&StrategyType::AdxMomentum).unwrap();
        assert_eq!(json, "\"adx-momentum\"");
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }
}
