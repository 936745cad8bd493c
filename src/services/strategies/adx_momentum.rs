//! ADX trend-exhaustion exit.

use super::{ExitSignal, ExitStrategy, StrategyContext, StrategyError};
use crate::services::indicators::{Adx, AdxReading};
use crate::types::{Position, StrategyType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdxMomentumParams {
    pub period: usize,
    pub adx_threshold: f64,
    pub min_profit_pct: f64,
    pub interval: String,
}

impl Default for AdxMomentumParams {
    fn default() -> Self {
        Self {
            period: 14,
            adx_threshold: 25.0,
            min_profit_pct: 2.0,
            interval: "15m".to_string(),
        }
    }
}

impl AdxMomentumParams {
    /// Candles requested per asset; enough for the smoothed average to settle.
    pub fn candle_limit(&self) -> usize {
        self.period.max(1) * 3
    }
}

/// Close reason, if the trend has exhausted on a profitable position.
///
/// The insufficient-data sentinel reads as a strong trend and never exits.
pub fn decide(pnl_pct: f64, reading: &AdxReading, params: &AdxMomentumParams) -> Option<String> {
    if !reading.sufficient_data || pnl_pct < params.min_profit_pct {
        return None;
    }
    if reading.adx < params.adx_threshold {
        Some(format!(
            "Trend exhausted: ADX {:.1} < {:.1} with {:.2}% profit",
            reading.adx, params.adx_threshold, pnl_pct
        ))
    } else {
        None
    }
}

pub struct AdxMomentumExit;

#[async_trait]
impl ExitStrategy for AdxMomentumExit {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::AdxMomentum
    }

    async fn evaluate(
        &self,
        ctx: &StrategyContext,
        positions: &[Position],
    ) -> Result<Vec<ExitSignal>, StrategyError> {
        let params: AdxMomentumParams = ctx.params(self.strategy_type())?;
        let indicator = Adx::new(params.period);

        let mut signals = Vec::with_capacity(positions.len());
        for position in positions {
            let pnl = position.pnl_pct();
            if pnl < params.min_profit_pct {
                signals.push(ExitSignal::hold(
                    position,
                    format!("Below min profit {:.2}%", params.min_profit_pct),
                ));
                continue;
            }

            let candles = match ctx
                .gateway
                .candles(&position.asset, &params.interval, params.candle_limit())
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

            let reading = indicator.calculate(&candles);
            signals.push(match decide(pnl, &reading, &params) {
                Some(reason) => ExitSignal::close(position, reason),
                None if !reading.sufficient_data => ExitSignal::hold(
                    position,
                    format!("Insufficient data: {} candles", candles.len()),
                ),
                None => ExitSignal::hold(position, format!("Trend intact: ADX {:.1}", reading.adx)),
            });
        }
        Ok(signals)
    }
}
