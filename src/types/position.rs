use serde::{Deserialize, Serialize};

/// A live position read from the exchange clearinghouse.
///
/// Positions are never persisted; every evaluation reads them fresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Asset symbol (e.g. "BTC").
    pub asset: String,
    /// Absolute position size in base units.
    pub size: f64,
    /// Average entry price.
    pub entry_price: f64,
    /// Current mark price.
    pub current_price: f64,
    /// Position value in quote currency, negative for shorts.
    pub notional: f64,
    /// Unrealized P&L in quote currency.
    pub unrealized_pnl: f64,
    /// Effective leverage.
    pub leverage: f64,
    /// Price at which the position is force-closed (None for spot/cross without liq).
    pub liquidation_price: Option<f64>,
    /// Direction.
    pub is_long: bool,
}

impl Position {
    /// Direction-adjusted price return since entry, in percent.
    pub fn pnl_pct(&self) -> f64 {
        if self.entry_price <= 0.0 || !self.current_price.is_finite() {
            return 0.0;
        }
        let raw = (self.current_price - self.entry_price) / self.entry_price * 100.0;
        if self.is_long {
            raw
        } else {
            -raw
        }
    }

    /// Unsigned notional.
    pub fn abs_notional(&self) -> f64 {
        self.notional.abs()
    }

    /// Short label used in logs and alert messages.
    pub fn side_label(&self) -> &'static str {
        if self.is_long {
            "long"
        } else {
            "short"
        }
    }
}

/// Clearinghouse view of one wallet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    /// Total account value.
    pub equity: f64,
    pub positions: Vec<Position>,
}

/// OHLCV candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time (Unix ms).
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Typical price: (high + low + close) / 3.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Reduce-only close request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
    pub wallet_ref: String,
    pub asset: String,
    /// Size to close in base units (may be a fraction of the position).
    pub size: f64,
    pub is_long: bool,
    pub leverage: f64,
    pub reduce_only: bool,
}

impl CloseRequest {
    /// Close `fraction` (0..=1] of a position.
    pub fn for_position(wallet_ref: &str, position: &Position, fraction: f64) -> Self {
        Self {
            wallet_ref: wallet_ref.to_string(),
            asset: position.asset.clone(),
            size: position.size.abs() * fraction.clamp(0.0, 1.0),
            is_long: position.is_long,
            leverage: position.leverage,
            reduce_only: true,
        }
    }
}

/// Market open request for one leg of a trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequest {
    pub wallet_ref: String,
    pub asset: String,
    pub is_long: bool,
    /// Margin committed to this leg in USD.
    pub stake_usd: f64,
    pub leverage: f64,
}

impl OpenRequest {
    /// Notional exposure this leg adds.
    pub fn notional(&self) -> f64 {
        self.stake_usd * self.leverage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(is_long: bool, entry: f64, current: f64) -> Position {
        Position {
            asset: "ETH".to_string(),
            size: 2.0,
            entry_price: entry,
            current_price: current,
            notional: if is_long { 2.0 * current } else { -2.0 * current },
            unrealized_pnl: 0.0,
            leverage: 3.0,
            liquidation_price: None,
            is_long,
        }
    }

    #[test]
    fn test_pnl_pct_long_and_short() {
        assert!((position(true, 100.0, 105.0).pnl_pct() - 5.0).abs() < 1e-9);
        assert!((position(false, 100.0, 105.0).pnl_pct() + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_pnl_pct_without_entry_is_zero() {
        assert_eq!(position(true, 0.0, 105.0).pnl_pct(), 0.0);
    }

    #[test]
    fn test_close_request_fraction() {
        let p = position(false, 100.0, 90.0);
        let req = CloseRequest::for_position("0xabc", &p, 0.5);
        assert_eq!(req.size, 1.0);
        assert!(!req.is_long);
        assert!(req.reduce_only);
    }

    #[test]
    fn test_typical_price() {
        let c = Candle {
            time: 0,
            open: 1.0,
            high: 12.0,
            low: 6.0,
            close: 9.0,
            volume: 1.0,
        };
        assert_eq!(c.typical_price(), 9.0);
    }
}
