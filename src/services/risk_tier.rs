//! Risk Tier Classifier
//!
//! Maps drawdown and liquidation distance onto one of six ordered tiers.
//! Rules are checked in priority order and the first match wins:
//!
//! | # | condition                                           | tier    |
//! |---|-----------------------------------------------------|---------|
//! | 1 | drawdown >= 1.2x max and auto-close enabled         | full    |
//! | 2 | drawdown >= partial threshold and auto-partial on   | partial |
//! | 3 | drawdown >= rebalance threshold                     | action  |
//! | 4 | nearest liquidation < min liquidation distance      | action  |
//! | 5 | drawdown >= 0.75x max                               | warning |
//! | 6 | drawdown >= warning threshold                       | info    |
//! | 7 | otherwise                                           | none    |
//!
//! With default thresholds rules 2, 3 and 6 fire at 1.0x, 0.9x and 0.5x of max.

use crate::types::{AlertType, Policy, RiskMetrics, RiskTier, TierDecision};

/// Drawdown ratio at which every position is closed.
pub const FULL_CLOSE_RATIO: f64 = 1.2;
/// Drawdown ratio at which the account owner is notified.
pub const WARNING_RATIO: f64 = 0.75;

/// Classify an account from its computed metrics.
pub fn classify_metrics(metrics: &RiskMetrics, policy: &Policy) -> TierDecision {
    classify(
        metrics.current_drawdown_pct,
        metrics.nearest_liquidation_pct,
        policy,
    )
}

/// Classify from raw drawdown and liquidation distance. Total: never fails.
pub fn classify(drawdown_pct: f64, nearest_liquidation_pct: f64, policy: &Policy) -> TierDecision {
    let t = policy.thresholds();
    let dd = if drawdown_pct.is_finite() { drawdown_pct.max(0.0) } else { 0.0 };
    let liq = if nearest_liquidation_pct.is_finite() {
        nearest_liquidation_pct
    } else {
        100.0
    };
    // Drawdown rules are disabled when there is no usable limit.
    let limit_ok = t.max_drawdown_pct.is_finite() && t.max_drawdown_pct > 0.0;
    let ratio = if limit_ok { dd / t.max_drawdown_pct } else { 0.0 };

    let drawdown = |tier: RiskTier, threshold: f64, what: &str| TierDecision {
        tier,
        action: tier.action(),
        reason: format!(
            "Drawdown {:.2}% is {:.2}x the {:.2}% limit ({} threshold {:.2}%)",
            dd, ratio, t.max_drawdown_pct, what, threshold
        ),
        alert_type: AlertType::Drawdown,
        threshold,
        actual: dd,
    };

    if limit_ok {
        let full_at = t.max_drawdown_pct * FULL_CLOSE_RATIO;
        if dd >= full_at && policy.auto_close_enabled {
            return drawdown(RiskTier::Full, full_at, "full close");
        }
        if dd >= t.partial_close_drawdown_pct && policy.auto_partial_close_enabled {
            return drawdown(RiskTier::Partial, t.partial_close_drawdown_pct, "partial close");
        }
        if dd >= t.rebalance_drawdown_pct {
            return drawdown(RiskTier::Action, t.rebalance_drawdown_pct, "rebalance");
        }
    }

    if liq < t.min_liquidation_distance_pct {
        return TierDecision {
            tier: RiskTier::Action,
            action: RiskTier::Action.action(),
            reason: format!(
                "Nearest liquidation {:.2}% away, below the {:.2}% minimum",
                liq, t.min_liquidation_distance_pct
            ),
            alert_type: AlertType::LiquidationProximity,
            threshold: t.min_liquidation_distance_pct,
            actual: liq,
        };
    }

    if limit_ok {
        let warn_at = t.max_drawdown_pct * WARNING_RATIO;
        if dd >= warn_at {
            return drawdown(RiskTier::Warning, warn_at, "warning");
        }
        if dd >= t.warning_drawdown_pct {
            return drawdown(RiskTier::Info, t.warning_drawdown_pct, "info");
        }
    }

    TierDecision {
        tier: RiskTier::None,
        action: RiskTier::None.action(),
        reason: format!(
            "Drawdown {:.2}% ({:.2}x limit), nearest liquidation {:.2}%",
            dd, ratio, liq
        ),
        alert_type: AlertType::Drawdown,
        threshold: t.warning_drawdown_pct,
        actual: dd,
    }
}
