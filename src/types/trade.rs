//! Basket trade execution results.

use serde::{Deserialize, Serialize};

use super::PolicyCheck;

/// Outcome of opening one leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegResult {
    pub asset: String,
    pub is_long: bool,
    pub stake_usd: f64,
    pub notional: f64,
    pub opened: bool,
    pub error: Option<String>,
}

/// Result of a trade request: the policy check and, if it passed, every leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeExecution {
    pub check: PolicyCheck,
    /// True when at least one leg opened.
    pub executed: bool,
    pub legs: Vec<LegResult>,
    /// Ledger id of the recorded notional, when anything opened.
    pub trade_id: Option<String>,
}

impl TradeExecution {
    pub fn rejected(check: PolicyCheck) -> Self {
        Self {
            check,
            executed: false,
            legs: Vec::new(),
            trade_id: None,
        }
    }

    pub fn opened_notional(&self) -> f64 {
        self.legs
            .iter()
            .filter(|leg| leg.opened)
            .map(|leg| leg.notional)
            .sum()
    }
}
