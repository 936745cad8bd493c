//! Trading policy and trade-validation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default minimum liquidation distance in percent.
pub const DEFAULT_MIN_LIQUIDATION_DISTANCE_PCT: f64 = 10.0;

/// Per-account trading limits. Policies are append-only; the latest row is effective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub account_id: String,
    pub max_leverage: f64,
    pub max_daily_notional_usd: f64,
    /// Empty means no asset restriction.
    #[serde(default)]
    pub allowed_assets: Vec<String>,
    pub max_drawdown_pct: f64,
    #[serde(default)]
    pub warning_drawdown_pct: Option<f64>,
    #[serde(default)]
    pub rebalance_drawdown_pct: Option<f64>,
    #[serde(default)]
    pub partial_close_drawdown_pct: Option<f64>,
    #[serde(default)]
    pub min_liquidation_distance_pct: Option<f64>,
    #[serde(default)]
    pub auto_close_enabled: bool,
    #[serde(default)]
    pub auto_partial_close_enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl Policy {
    /// Conservative policy used when an account has never stored one.
    pub fn default_for(account_id: &str) -> Self {
        Self {
            id: new_id(),
            account_id: account_id.to_string(),
            max_leverage: 5.0,
            max_daily_notional_usd: 10_000.0,
            allowed_assets: Vec::new(),
            max_drawdown_pct: 20.0,
            warning_drawdown_pct: None,
            rebalance_drawdown_pct: None,
            partial_close_drawdown_pct: None,
            min_liquidation_distance_pct: None,
            auto_close_enabled: false,
            auto_partial_close_enabled: false,
            created_at: Utc::now(),
        }
    }

    /// Resolve optional thresholds against `max_drawdown_pct`.
    pub fn thresholds(&self) -> RiskThresholds {
        let max = self.max_drawdown_pct;
        RiskThresholds {
            max_drawdown_pct: max,
            warning_drawdown_pct: self.warning_drawdown_pct.unwrap_or(max * 0.5),
            rebalance_drawdown_pct: self.rebalance_drawdown_pct.unwrap_or(max * 0.9),
            partial_close_drawdown_pct: self.partial_close_drawdown_pct.unwrap_or(max),
            min_liquidation_distance_pct: self
                .min_liquidation_distance_pct
                .unwrap_or(DEFAULT_MIN_LIQUIDATION_DISTANCE_PCT),
        }
    }

    /// Reject structurally invalid limits.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_leverage.is_finite() && self.max_leverage > 0.0) {
            return Err("maxLeverage must be positive".to_string());
        }
        if !(self.max_daily_notional_usd.is_finite() && self.max_daily_notional_usd > 0.0) {
            return Err("maxDailyNotionalUsd must be positive".to_string());
        }
        if !(self.max_drawdown_pct.is_finite() && self.max_drawdown_pct > 0.0) {
            return Err("maxDrawdownPct must be positive".to_string());
        }
        let optional = [
            ("warningDrawdownPct", self.warning_drawdown_pct),
            ("rebalanceDrawdownPct", self.rebalance_drawdown_pct),
            ("partialCloseDrawdownPct", self.partial_close_drawdown_pct),
            ("minLiquidationDistancePct", self.min_liquidation_distance_pct),
        ];
        for (name, value) in optional {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(format!("{} must be non-negative", name));
                }
            }
        }
        Ok(())
    }
}

/// Drawdown and liquidation thresholds with defaults applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskThresholds {
    pub max_drawdown_pct: f64,
    pub warning_drawdown_pct: f64,
    pub rebalance_drawdown_pct: f64,
    pub partial_close_drawdown_pct: f64,
    pub min_liquidation_distance_pct: f64,
}

/// A proposed basket trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeProposal {
    #[serde(default)]
    pub long_assets: Vec<String>,
    #[serde(default)]
    pub short_assets: Vec<String>,
    pub stake_usd: f64,
    pub leverage: f64,
}

impl TradeProposal {
    pub fn estimated_notional(&self) -> f64 {
        self.stake_usd * self.leverage
    }

    pub fn assets(&self) -> impl Iterator<Item = &String> {
        self.long_assets.iter().chain(self.short_assets.iter())
    }
}

/// One reason a trade is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyViolation {
    LeverageExceeded { requested: f64, max: f64 },
    DailyNotionalExceeded { projected: f64, max: f64 },
    AssetNotAllowed { asset: String },
    InvalidProposal { reason: String },
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::LeverageExceeded { requested, max } => {
                write!(f, "Leverage {:.2}x exceeds max {:.2}x", requested, max)
            }
            PolicyViolation::DailyNotionalExceeded { projected, max } => write!(
                f,
                "Projected daily notional ${:.2} exceeds max ${:.2}",
                projected, max
            ),
            PolicyViolation::AssetNotAllowed { asset } => {
                write!(f, "Asset {} is not in the allowed list", asset)
            }
            PolicyViolation::InvalidProposal { reason } => write!(f, "Invalid trade: {}", reason),
        }
    }
}

/// Result of checking a proposal against a policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCheck {
    pub valid: bool,
    pub violations: Vec<PolicyViolation>,
    pub warnings: Vec<String>,
    pub today_notional: f64,
    pub remaining_notional: f64,
    pub estimated_notional: f64,
    pub projected_daily_notional: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_defaults_relative_to_max() {
        let policy = Policy {
            max_drawdown_pct: 20.0,
            ..Policy::default_for("acct")
        };
        let t = policy.thresholds();
        assert_eq!(t.warning_drawdown_pct, 10.0);
        assert_eq!(t.rebalance_drawdown_pct, 18.0);
        assert_eq!(t.partial_close_drawdown_pct, 20.0);
        assert_eq!(t.min_liquidation_distance_pct, 10.0);
    }

    #[test]
    fn test_explicit_thresholds_win() {
        let policy = Policy {
            warning_drawdown_pct: Some(4.0),
            min_liquidation_distance_pct: Some(15.0),
            ..Policy::default_for("acct")
        };
        let t = policy.thresholds();
        assert_eq!(t.warning_drawdown_pct, 4.0);
        assert_eq!(t.min_liquidation_distance_pct, 15.0);
    }

    #[test]
    fn test_policy_deserialize_minimal() {
        let json = r#"{"maxLeverage":5,"maxDailyNotionalUsd":10000,"maxDrawdownPct":15}"#;
        let policy: Policy = serde_json::from_str(json).unwrap();
        assert!(policy.allowed_assets.is_empty());
        assert!(!policy.auto_close_enabled);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_validate_rejects_zero_drawdown() {
        let policy = Policy {
            max_drawdown_pct: 0.0,
            ..Policy::default_for("acct")
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_violation_serialization_is_tagged() {
        let v = PolicyViolation::AssetNotAllowed {
            asset: "PEPE".to_string(),
        };
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains("\"kind\":\"asset_not_allowed\""));
    }
}
