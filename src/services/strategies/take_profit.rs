//! Take-profit / stop-loss exit.

use super::{ExitSignal, ExitStrategy, StrategyContext, StrategyError};
use crate::types::{Position, StrategyType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TakeProfitParams {
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
}

impl Default for TakeProfitParams {
    fn default() -> Self {
        Self {
            take_profit_pct: 5.0,
            stop_loss_pct: 10.0,
        }
    }
}

/// Close reason, if the position should exit.
pub fn decide(pnl_pct: f64, params: &TakeProfitParams) -> Option<String> {
    if pnl_pct >= params.take_profit_pct {
        Some(format!(
            "Take profit: {:.2}% >= {:.2}%",
            pnl_pct, params.take_profit_pct
        ))
    } else if pnl_pct <= -params.stop_loss_pct {
        Some(format!(
            "Stop loss: {:.2}% <= -{:.2}%",
            pnl_pct, params.stop_loss_pct
        ))
    } else {
        None
    }
}

pub struct TakeProfitExit;

#[async_trait]
impl ExitStrategy for TakeProfitExit {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::TakeProfit
    }

    async fn evaluate(
        &self,
        ctx: &StrategyContext,
        positions: &[Position],
    ) -> Result<Vec<ExitSignal>, StrategyError> {
        let params: TakeProfitParams = ctx.params(self.strategy_type())?;
        Ok(positions
            .iter()
            .map(|p| match decide(p.pnl_pct(), &params) {
                Some(reason) => ExitSignal::close(p, reason),
                None => ExitSignal::hold(p, "Within take-profit/stop-loss band"),
            })
            .collect())
    }
}
