//! Risk Metrics Calculator
//!
//! Pure functions turning a position snapshot and account equity into
//! drawdown, liquidation distance, concentration, leverage and P&L metrics.
//! Every division is guarded; nothing here can fail.

use crate::types::{Position, RiskMetrics};
use std::collections::BTreeMap;

/// Distance reported when a position has no liquidation risk.
pub const NO_LIQUIDATION_RISK: f64 = 100.0;

/// Asset -> sector table used for concentration.
const SECTORS: &[(&str, &str)] = &[
    ("BTC", "store_of_value"),
    ("ETH", "layer1"),
    ("SOL", "layer1"),
    ("AVAX", "layer1"),
    ("SUI", "layer1"),
    ("APT", "layer1"),
    ("SEI", "layer1"),
    ("NEAR", "layer1"),
    ("ATOM", "layer1"),
    ("DOT", "layer1"),
    ("ADA", "layer1"),
    ("TON", "layer1"),
    ("TRX", "layer1"),
    ("BNB", "exchange"),
    ("HYPE", "exchange"),
    ("ARB", "layer2"),
    ("OP", "layer2"),
    ("MATIC", "layer2"),
    ("POL", "layer2"),
    ("STRK", "layer2"),
    ("UNI", "defi"),
    ("AAVE", "defi"),
    ("MKR", "defi"),
    ("LDO", "defi"),
    ("CRV", "defi"),
    ("PENDLE", "defi"),
    ("JUP", "defi"),
    ("LINK", "oracle"),
    ("PYTH", "oracle"),
    ("DOGE", "meme"),
    ("SHIB", "meme"),
    ("PEPE", "meme"),
    ("KPEPE", "meme"),
    ("WIF", "meme"),
    ("BONK", "meme"),
    ("POPCAT", "meme"),
    ("FET", "ai"),
    ("RNDR", "ai"),
    ("RENDER", "ai"),
    ("TAO", "ai"),
    ("WLD", "ai"),
    ("XRP", "payments"),
    ("XLM", "payments"),
    ("LTC", "payments"),
    ("BCH", "payments"),
];

const OTHER_SECTOR: &str = "other";

/// Look up the sector bucket for an asset symbol.
pub fn sector_for(asset: &str) -> &'static str {
    let upper = asset.to_uppercase();
    let stem = upper
        .trim_end_matches("-PERP")
        .trim_end_matches("-USD")
        .trim_end_matches("-USDC");
    SECTORS
        .iter()
        .find(|(a, _)| *a == stem)
        .map(|(_, s)| *s)
        .unwrap_or(OTHER_SECTOR)
}

/// Ratchet the peak and compute drawdown from it.
///
/// Returns `(peak_equity, drawdown_pct)`; the peak never decreases and the
/// drawdown is never negative.
pub fn update_peak(prior_peak: f64, current_equity: f64) -> (f64, f64) {
    let prior = if prior_peak.is_finite() { prior_peak } else { 0.0 };
    let current = if current_equity.is_finite() { current_equity } else { 0.0 };
    let peak = prior.max(current);
    (peak, calculate_drawdown(peak, current))
}

/// Percentage decline of `current` from `peak`, clamped to >= 0.
pub fn calculate_drawdown(peak: f64, current: f64) -> f64 {
    if peak > 0.0 {
        ((peak - current) / peak * 100.0).max(0.0)
    } else {
        0.0
    }
}

/// Distance between mark price and liquidation price, in percent of mark.
///
/// Missing or non-positive liquidation prices mean no liquidation risk (100).
/// A price at or beyond liquidation yields 0.
pub fn calculate_liquidation_distance(position: &Position) -> f64 {
    let liq = match position.liquidation_price {
        Some(p) if p > 0.0 && p.is_finite() => p,
        _ => return NO_LIQUIDATION_RISK,
    };
    let price = position.current_price;
    if !(price > 0.0 && price.is_finite()) {
        return NO_LIQUIDATION_RISK;
    }

    if position.is_long {
        if price <= liq {
            return 0.0;
        }
        ((price - liq) / price * 100.0).clamp(0.0, 100.0)
    } else {
        if price >= liq {
            return 0.0;
        }
        ((liq - price) / price * 100.0).clamp(0.0, 100.0)
    }
}

/// Compute the full metric set for one evaluation.
pub fn calculate_risk_metrics(
    positions: &[Position],
    current_equity: f64,
    prior_peak_equity: f64,
) -> RiskMetrics {
    let (peak_equity, current_drawdown_pct) = update_peak(prior_peak_equity, current_equity);

    let total_notional: f64 = positions.iter().map(Position::abs_notional).sum();
    let total_unrealized_pnl: f64 = positions.iter().map(|p| p.unrealized_pnl).sum();

    let distances: Vec<f64> = positions.iter().map(calculate_liquidation_distance).collect();
    let nearest_liquidation_pct = distances
        .iter()
        .copied()
        .fold(NO_LIQUIDATION_RISK, f64::min);

    let weighted_liquidation_distance = if total_notional > 0.0 {
        positions
            .iter()
            .zip(&distances)
            .map(|(p, d)| d * p.abs_notional())
            .sum::<f64>()
            / total_notional
    } else {
        nearest_liquidation_pct
    };

    let largest_position_pct = if total_notional > 0.0 {
        positions
            .iter()
            .map(Position::abs_notional)
            .fold(0.0, f64::max)
            / total_notional
            * 100.0
    } else {
        0.0
    };

    let avg_leverage = if total_notional > 0.0 {
        positions
            .iter()
            .map(|p| p.leverage * p.abs_notional())
            .sum::<f64>()
            / total_notional
    } else {
        0.0
    };

    let mut sector_concentration: BTreeMap<String, f64> = BTreeMap::new();
    if total_notional > 0.0 {
        for p in positions {
            *sector_concentration
                .entry(sector_for(&p.asset).to_string())
                .or_insert(0.0) += p.abs_notional();
        }
        for value in sector_concentration.values_mut() {
            *value = *value / total_notional * 100.0;
        }
    }
    let (largest_sector, largest_sector_pct) = sector_concentration
        .iter()
        .fold((None, 0.0), |(best, best_pct), (sector, pct)| {
            if *pct > best_pct {
                (Some(sector.clone()), *pct)
            } else {
                (best, best_pct)
            }
        });

    let cost_basis = current_equity - total_unrealized_pnl;
    let total_unrealized_pnl_pct = if cost_basis > 0.0 {
        total_unrealized_pnl / cost_basis * 100.0
    } else {
        0.0
    };

    RiskMetrics {
        current_equity,
        peak_equity,
        current_drawdown_pct,
        nearest_liquidation_pct,
        weighted_liquidation_distance,
        largest_position_pct,
        sector_concentration,
        largest_sector,
        largest_sector_pct,
        total_notional,
        position_count: positions.len(),
        avg_leverage,
        total_unrealized_pnl,
        total_unrealized_pnl_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(asset: &str, is_long: bool, price: f64, liq: Option<f64>, notional: f64) -> Position {
        Position {
            asset: asset.to_string(),
            size: notional.abs() / price,
            entry_price: price,
            current_price: price,
            notional: if is_long { notional.abs() } else { -notional.abs() },
            unrealized_pnl: 0.0,
            leverage: 2.0,
            liquidation_price: liq,
            is_long,
        }
    }

    #[test]
    fn test_peak_is_monotonic_and_drawdown_non_negative() {
        let mut peak = 0.0;
        for equity in [1000.0, 1200.0, 900.0, 1100.0, 1300.0, 0.0, 50.0] {
            let (next, dd) = update_peak(peak, equity);
            assert!(next >= peak);
            assert!(dd >= 0.0);
            peak = next;
        }
        assert_eq!(peak, 1300.0);
    }

    #[test]
    fn test_drawdown_scenario() {
        let mut peak = 0.0;
        let mut dd = 0.0;
        for equity in [1000.0, 1200.0, 900.0] {
            let (p, d) = update_peak(peak, equity);
            peak = p;
            dd = d;
        }
        assert_eq!(peak, 1200.0);
        assert!((dd - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_zero_peak() {
        assert_eq!(calculate_drawdown(0.0, 0.0), 0.0);
        assert_eq!(calculate_drawdown(-5.0, 10.0), 0.0);
    }

    #[test]
    fn test_liquidation_distance_long() {
        let p = pos("BTC", true, 100.0, Some(95.0), 1000.0);
        assert!((calculate_liquidation_distance(&p) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_liquidation_distance_short() {
        let p = pos("BTC", false, 100.0, Some(120.0), 1000.0);
        assert!((calculate_liquidation_distance(&p) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_liquidation_distance_no_liq_price() {
        assert_eq!(calculate_liquidation_distance(&pos("BTC", true, 100.0, None, 10.0)), 100.0);
        assert_eq!(calculate_liquidation_distance(&pos("BTC", false, 100.0, Some(0.0), 10.0)), 100.0);
        assert_eq!(calculate_liquidation_distance(&pos("BTC", true, 100.0, Some(-3.0), 10.0)), 100.0);
    }

    #[test]
    fn test_liquidation_distance_crossed() {
        assert_eq!(calculate_liquidation_distance(&pos("BTC", true, 100.0, Some(100.0), 10.0)), 0.0);
        assert_eq!(calculate_liquidation_distance(&pos("BTC", true, 90.0, Some(95.0), 10.0)), 0.0);
        assert_eq!(calculate_liquidation_distance(&pos("BTC", false, 100.0, Some(100.0), 10.0)), 0.0);
        assert_eq!(calculate_liquidation_distance(&pos("BTC", false, 130.0, Some(120.0), 10.0)), 0.0);
    }

    #[test]
    fn test_liquidation_distance_capped_at_100() {
        let p = pos("BTC", false, 10.0, Some(100.0), 10.0);
        assert_eq!(calculate_liquidation_distance(&p), 100.0);
    }

    #[test]
    fn test_metrics_empty_portfolio() {
        let m = calculate_risk_metrics(&[], 1000.0, 800.0);
        assert_eq!(m.peak_equity, 1000.0);
        assert_eq!(m.current_drawdown_pct, 0.0);
        assert_eq!(m.nearest_liquidation_pct, 100.0);
        assert_eq!(m.largest_position_pct, 0.0);
        assert_eq!(m.avg_leverage, 0.0);
        assert!(m.sector_concentration.is_empty());
        assert_eq!(m.position_count, 0);
    }

    #[test]
    fn test_metrics_concentration_and_weighting() {
        let mut btc = pos("BTC", true, 100.0, Some(95.0), 3000.0);
        btc.leverage = 4.0;
        let mut doge = pos("DOGE", false, 1.0, Some(1.5), 1000.0);
        doge.leverage = 2.0;
        let m = calculate_risk_metrics(&[btc, doge], 5000.0, 5000.0);

        assert_eq!(m.total_notional, 4000.0);
        assert!((m.largest_position_pct - 75.0).abs() < 1e-9);
        assert!((m.nearest_liquidation_pct - 5.0).abs() < 1e-9);
        // (5 * 3000 + 50 * 1000) / 4000
        assert!((m.weighted_liquidation_distance - 16.25).abs() < 1e-9);
        assert!((m.avg_leverage - 3.5).abs() < 1e-9);
        assert_eq!(m.largest_sector.as_deref(), Some("store_of_value"));
        assert!((m.sector_concentration["meme"] - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_unrealized_pnl_pct_uses_cost_basis() {
        let mut p = pos("ETH", true, 100.0, None, 1000.0);
        p.unrealized_pnl = 100.0;
        let m = calculate_risk_metrics(&[p.clone()], 1100.0, 1100.0);
        assert!((m.total_unrealized_pnl_pct - 10.0).abs() < 1e-9);

        p.unrealized_pnl = 2000.0;
        let m = calculate_risk_metrics(&[p], 1100.0, 1100.0);
        assert_eq!(m.total_unrealized_pnl_pct, 0.0);
    }

    #[test]
    fn test_sector_lookup() {
        assert_eq!(sector_for("btc"), "store_of_value");
        assert_eq!(sector_for("SOL-PERP"), "layer1");
        assert_eq!(sector_for("UNKNOWNCOIN"), "other");
    }
}
