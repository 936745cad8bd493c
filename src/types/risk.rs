//! Risk metrics, tiers, alerts and daily snapshots.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Derived risk snapshot for one account at one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetrics {
    pub current_equity: f64,
    pub peak_equity: f64,
    /// Always >= 0.
    pub current_drawdown_pct: f64,
    /// Closest position to liquidation (100 when flat).
    pub nearest_liquidation_pct: f64,
    /// Notional-weighted liquidation distance.
    pub weighted_liquidation_distance: f64,
    pub largest_position_pct: f64,
    /// Category -> share of gross notional in percent.
    pub sector_concentration: BTreeMap<String, f64>,
    pub largest_sector: Option<String>,
    pub largest_sector_pct: f64,
    /// Gross notional.
    pub total_notional: f64,
    pub position_count: usize,
    /// Notional-weighted leverage.
    pub avg_leverage: f64,
    pub total_unrealized_pnl: f64,
    pub total_unrealized_pnl_pct: f64,
}

/// Ordered risk severity. Each tier maps to exactly one [`RiskAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    None,
    Info,
    Warning,
    Action,
    Partial,
    Full,
}

impl RiskTier {
    pub fn action(self) -> RiskAction {
        match self {
            RiskTier::None => RiskAction::Monitor,
            RiskTier::Info => RiskAction::Log,
            RiskTier::Warning => RiskAction::Notify,
            RiskTier::Action => RiskAction::AlertRebalance,
            RiskTier::Partial => RiskAction::Close50Pct,
            RiskTier::Full => RiskAction::CloseAll,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskTier::None => "none",
            RiskTier::Info => "info",
            RiskTier::Warning => "warning",
            RiskTier::Action => "action",
            RiskTier::Partial => "partial",
            RiskTier::Full => "full",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protective action bound to a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskAction {
    #[serde(rename = "monitor")]
    Monitor,
    #[serde(rename = "log")]
    Log,
    #[serde(rename = "notify")]
    Notify,
    #[serde(rename = "alert_rebalance")]
    AlertRebalance,
    #[serde(rename = "close_50_pct")]
    Close50Pct,
    #[serde(rename = "close_all")]
    CloseAll,
}

impl RiskAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskAction::Monitor => "monitor",
            RiskAction::Log => "log",
            RiskAction::Notify => "notify",
            RiskAction::AlertRebalance => "alert_rebalance",
            RiskAction::Close50Pct => "close_50_pct",
            RiskAction::CloseAll => "close_all",
        }
    }
}

impl fmt::Display for RiskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of threshold produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Drawdown,
    LiquidationProximity,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::Drawdown => "drawdown",
            AlertType::LiquidationProximity => "liquidation_proximity",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "liquidation_proximity" => AlertType::LiquidationProximity,
            _ => AlertType::Drawdown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "critical" => AlertSeverity::Critical,
            "warning" => AlertSeverity::Warning,
            _ => AlertSeverity::Info,
        }
    }
}

/// Output of the tier classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierDecision {
    pub tier: RiskTier,
    pub action: RiskAction,
    pub reason: String,
    pub alert_type: AlertType,
    /// Threshold that was crossed (percent).
    pub threshold: f64,
    /// Observed value (percent).
    pub actual: f64,
}

/// Persisted risk alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAlert {
    pub id: String,
    pub account_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub threshold_value: f64,
    pub actual_value: f64,
    pub message: String,
    pub action_taken: String,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl RiskAlert {
    pub fn new(
        account_id: &str,
        decision: &TierDecision,
        severity: AlertSeverity,
        action_taken: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            alert_type: decision.alert_type,
            severity,
            threshold_value: decision.threshold,
            actual_value: decision.actual,
            message: decision.reason.clone(),
            action_taken: action_taken.into(),
            acknowledged: false,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

/// Per-account, per-day equity summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySnapshot {
    pub account_id: String,
    pub date: NaiveDate,
    pub opening_equity: f64,
    pub closing_equity: f64,
    pub high_equity: f64,
    pub low_equity: f64,
    pub daily_pnl: f64,
    pub max_drawdown_pct: f64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(RiskTier::None < RiskTier::Info);
        assert!(RiskTier::Info < RiskTier::Warning);
        assert!(RiskTier::Warning < RiskTier::Action);
        assert!(RiskTier::Action < RiskTier::Partial);
        assert!(RiskTier::Partial < RiskTier::Full);
    }

    #[test]
    fn test_tier_action_binding() {
        assert_eq!(RiskTier::None.action(), RiskAction::Monitor);
        assert_eq!(RiskTier::Partial.action(), RiskAction::Close50Pct);
        assert_eq!(RiskTier::Full.action(), RiskAction::CloseAll);
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&RiskAction::Close50Pct).unwrap();
        assert_eq!(json, "\"close_50_pct\"");
        let json = serde_json::to_string(&RiskTier::Partial).unwrap();
        assert_eq!(json, "\"partial\"");
    }
}
