//! Policy Enforcer
//!
//! Validates a proposed trade against an account's effective policy and the
//! notional it has already traded today. All checks run independently and are
//! reported together; the enforcer never mutates state.

use crate::types::{Policy, PolicyCheck, PolicyViolation, TradeProposal};

/// Share of the daily cap above which a non-blocking warning is raised.
pub const NOTIONAL_WARNING_RATIO: f64 = 0.8;

const QUOTE_SUFFIXES: &[&str] = &["-PERP", "-USDC", "-USDT", "-USD", "/USDC", "/USDT", "/USD"];

/// Reduce an asset symbol to its stem ("eth-perp" -> "ETH").
pub fn asset_stem(asset: &str) -> String {
    let upper = asset.trim().to_uppercase();
    QUOTE_SUFFIXES
        .iter()
        .find_map(|suffix| upper.strip_suffix(*suffix))
        .unwrap_or(upper.as_str())
        .to_string()
}

/// Whether `asset` is permitted by `allowed`. An empty list allows everything.
pub fn asset_allowed(asset: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let stem = asset_stem(asset);
    allowed
        .iter()
        .any(|entry| entry.trim() == "*" || asset_stem(entry) == stem)
}

/// Check a proposal. `today_notional` is notional already executed today.
pub fn check_trade(proposal: &TradeProposal, policy: &Policy, today_notional: f64) -> PolicyCheck {
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    let today_notional = today_notional.max(0.0);
    let estimated_notional = proposal.estimated_notional();
    let projected_daily_notional = today_notional + estimated_notional;
    let remaining_notional = (policy.max_daily_notional_usd - today_notional).max(0.0);

    if !(proposal.stake_usd.is_finite() && proposal.stake_usd > 0.0) {
        violations.push(PolicyViolation::InvalidProposal {
            reason: "stakeUsd must be positive".to_string(),
        });
    }
    if !(proposal.leverage.is_finite() && proposal.leverage > 0.0) {
        violations.push(PolicyViolation::InvalidProposal {
            reason: "leverage must be positive".to_string(),
        });
    }
    if proposal.assets().next().is_none() {
        violations.push(PolicyViolation::InvalidProposal {
            reason: "no assets selected".to_string(),
        });
    }

    if proposal.leverage > policy.max_leverage {
        violations.push(PolicyViolation::LeverageExceeded {
            requested: proposal.leverage,
            max: policy.max_leverage,
        });
    }

    if projected_daily_notional > policy.max_daily_notional_usd {
        violations.push(PolicyViolation::DailyNotionalExceeded {
            projected: projected_daily_notional,
            max: policy.max_daily_notional_usd,
        });
    } else if projected_daily_notional > policy.max_daily_notional_usd * NOTIONAL_WARNING_RATIO {
        warnings.push(format!(
            "Projected daily notional ${:.2} is above {:.0}% of the ${:.2} cap",
            projected_daily_notional,
            NOTIONAL_WARNING_RATIO * 100.0,
            policy.max_daily_notional_usd
        ));
    }

    let mut seen = Vec::new();
    for asset in proposal.assets() {
        let stem = asset_stem(asset);
        if seen.contains(&stem) {
            continue;
        }
        seen.push(stem);
        if !asset_allowed(asset, &policy.allowed_assets) {
            violations.push(PolicyViolation::AssetNotAllowed {
                asset: asset.clone(),
            });
        }
    }

    PolicyCheck {
        valid: violations.is_empty(),
        violations,
        warnings,
        today_notional,
        remaining_notional,
        estimated_notional,
        projected_daily_notional,
    }
}
