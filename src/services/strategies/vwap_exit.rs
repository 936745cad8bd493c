//! VWAP mean-reversion exit.

use super::{ExitSignal, ExitStrategy, StrategyContext, StrategyError};
use crate::services::indicators::Vwap;
use crate::types::{Position, StrategyType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Fewer candles than this is "no decision".
pub const MIN_CANDLES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossDirection {
    /// Longs exit when price falls below VWAP.
    Below,
    /// Shorts exit when price rises above VWAP.
    Above,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VwapExitParams {
    pub lookback: usize,
    pub interval: String,
    pub min_profit_pct: f64,
    pub exit_on_cross: CrossDirection,
}

impl Default for VwapExitParams {
    fn default() -> Self {
        Self {
            lookback: 50,
            interval: "15m".to_string(),
            min_profit_pct: 1.0,
            exit_on_cross: CrossDirection::Both,
        }
    }
}

/// Close reason, if the position should exit. Never exits below `min_profit_pct`.
pub fn decide(position: &Position, vwap: f64, params: &VwapExitParams) -> Option<String> {
    let pnl = position.pnl_pct();
    if pnl < params.min_profit_pct {
        return None;
    }

    let price = position.current_price;
    let long_exit = position.is_long
        && price < vwap
        && matches!(params.exit_on_cross, CrossDirection::Below | CrossDirection::Both);
    let short_exit = !position.is_long
        && price > vwap
        && matches!(params.exit_on_cross, CrossDirection::Above | CrossDirection::Both);

    if long_exit || short_exit {
        Some(format!(
            "VWAP cross: price {:.4} {} VWAP {:.4} with {:.2}% profit",
            price,
            if long_exit { "<" } else { ">" },
            vwap,
            pnl
        ))
    } else {
        None
    }
}

pub struct VwapExit;

#[async_trait]
impl ExitStrategy for VwapExit {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::VwapExit
    }

    async fn evaluate(
        &self,
        ctx: &StrategyContext,
        positions: &[Position],
    ) -> Result<Vec<ExitSignal>, StrategyError> {
        let params: VwapExitParams = ctx.params(self.strategy_type())?;
        let indicator = Vwap::new(params.lookback);

        let mut signals = Vec::with_capacity(positions.len());
        for position in positions {
            if position.pnl_pct() < params.min_profit_pct {
                signals.push(ExitSignal::hold(
                    position,
                    format!("Below min profit {:.2}%", params.min_profit_pct),
                ));
                continue;
            }

            let candles = match ctx
                .gateway
                .candles(&position.asset, &params.interval, params.lookback)
                .await
            {
                Ok(candles) => candles,
                Err(e) => {
                    signals.push(ExitSignal::fault(
                        position,
                        format!("Candles unavailable: {}", e),
                    ));
                    continue;
                }
            };

            if candles.len() < MIN_CANDLES {
                signals.push(ExitSignal::hold(
                    position,
                    format!("Insufficient data: {} candles", candles.len()),
                ));
                continue;
            }

            signals.push(match indicator.calculate(&candles) {
                Some(vwap) => match decide(position, vwap, &params) {
                    Some(reason) => ExitSignal::close(position, reason),
                    None => ExitSignal::hold(position, format!("No VWAP cross (VWAP {:.4})", vwap)),
                },
                None => ExitSignal::hold(position, "Insufficient data: no candles"),
            });
        }
        Ok(signals)
    }
}
