//! Trailing-stop exit backed by the durable peak tracker.

use super::{ExitSignal, ExitStrategy, StrategyContext, StrategyError};
use crate::types::{Position, StrategyType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrailingStopParams {
    /// Peak P&L that arms the stop.
    pub activation_pct: f64,
    /// Give-back from the peak that triggers the exit.
    pub trail_pct: f64,
}

impl Default for TrailingStopParams {
    fn default() -> Self {
        Self {
            activation_pct: 2.0,
            trail_pct: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrailDecision {
    Hold(String),
    Close(String),
}

/// Decide against the running peak (which already includes `pnl_pct`).
///
/// Once armed, the stop closes when P&L falls `trail_pct` below the peak, or
/// when it drops back under the activation level (a floor under the stop).
pub fn decide(pnl_pct: f64, peak_pct: f64, params: &TrailingStopParams) -> TrailDecision {
    if peak_pct < params.activation_pct {
        return TrailDecision::Hold(format!(
            "Not armed: peak {:.2}% < activation {:.2}%",
            peak_pct, params.activation_pct
        ));
    }

    let stop = peak_pct - params.trail_pct;
    if pnl_pct <= stop {
        TrailDecision::Close(format!(
            "Trailing stop: {:.2}% <= peak {:.2}% - trail {:.2}%",
            pnl_pct, peak_pct, params.trail_pct
        ))
    } else if pnl_pct < params.activation_pct {
        TrailDecision::Close(format!(
            "Trailing stop: {:.2}% fell below activation {:.2}% after peak {:.2}%",
            pnl_pct, params.activation_pct, peak_pct
        ))
    } else {
        TrailDecision::Hold(format!(
            "Armed: peak {:.2}%, stop at {:.2}%",
            peak_pct,
            stop.max(params.activation_pct)
        ))
    }
}

pub struct TrailingStopExit;

#[async_trait]
impl ExitStrategy for TrailingStopExit {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::TrailingStop
    }

    async fn evaluate(
        &self,
        ctx: &StrategyContext,
        positions: &[Position],
    ) -> Result<Vec<ExitSignal>, StrategyError> {
        let params: TrailingStopParams = ctx.params(self.strategy_type())?;
        if params.trail_pct < 0.0 {
            return Err(StrategyError::InvalidParams {
                strategy: self.strategy_type(),
                reason: "trailPct must be non-negative".to_string(),
            });
        }

        let open: Vec<String> = positions.iter().map(|p| p.asset.clone()).collect();
        let dropped = ctx.peaks.retain_open(&ctx.account.id, &open)?;
        if dropped > 0 {
            debug!("Dropped {} stale peaks for {}", dropped, ctx.account.id);
        }

        let mut signals = Vec::with_capacity(positions.len());
        for position in positions {
            let pnl = position.pnl_pct();
            let peak = ctx.peaks.observe(&ctx.account.id, &position.asset, pnl)?;
            signals.push(match decide(pnl, peak, &params) {
                TrailDecision::Close(reason) => ExitSignal::close(position, reason),
                TrailDecision::Hold(note) => ExitSignal::hold(position, note),
            });
        }
        Ok(signals)
    }

    async fn on_closed(&self, ctx: &StrategyContext, asset: &str) -> Result<(), StrategyError> {
        ctx.peaks.clear(&ctx.account.id, asset)?;
        Ok(())
    }
}
