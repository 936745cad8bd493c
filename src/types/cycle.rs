//! Cycle summaries returned by the scheduled entry points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RiskAction, RiskMetrics, RiskTier};

/// Outcome of closing a set of positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseReport {
    pub attempted: u32,
    pub closed: u32,
    pub errors: Vec<String>,
}

impl CloseReport {
    pub fn fully_succeeded(&self) -> bool {
        self.errors.is_empty() && self.closed == self.attempted
    }
}

/// Risk evaluation result for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRiskResult {
    pub account_id: String,
    pub tier: RiskTier,
    pub action: RiskAction,
    pub reason: String,
    pub metrics: Option<RiskMetrics>,
    pub alert_id: Option<String>,
    pub close_report: Option<CloseReport>,
}

impl AccountRiskResult {
    /// Account could not be evaluated this cycle.
    pub fn skipped(account_id: &str, reason: impl Into<String>) -> Self {
        Self {
            account_id: account_id.to_string(),
            tier: RiskTier::None,
            action: RiskAction::Monitor,
            reason: reason.into(),
            metrics: None,
            alert_id: None,
            close_report: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskCycleSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts_checked: u32,
    pub accounts_skipped_locked: u32,
    pub alerts_created: u32,
    pub positions_closed: u32,
    pub results: Vec<AccountRiskResult>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyCycleSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts_processed: u32,
    pub accounts_skipped_locked: u32,
    pub strategies_executed: u32,
    pub trades_executed: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCycleSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts_snapshotted: u32,
    pub alerts_deleted: usize,
    pub alerts_resolved: usize,
    pub errors: Vec<String>,
}
