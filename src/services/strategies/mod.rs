//! Exit strategies.
//!
//! Each strategy turns live positions (and, for some, candles) into per-position
//! exit signals. The shared [`execute`] driver fetches positions, applies the
//! closes, and folds everything into a [`StrategyOutcome`]; it never returns
//! an error.

pub mod adx_momentum;
pub mod take_profit;
pub mod trailing_stop;
pub mod vwap_exit;

pub use adx_momentum::AdxMomentumExit;
pub use take_profit::TakeProfitExit;
pub use trailing_stop::TrailingStopExit;
pub use vwap_exit::VwapExit;

use crate::services::gateway::{CredentialProvider, GatewayError, MarketGateway};
use crate::services::peak_tracker::PeakTracker;
use crate::services::sqlite_store::LedgerError;
use crate::types::{
    Account, CloseRequest, ExitDetail, Position, StrategyAction, StrategyOutcome, StrategyType,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Strategy errors.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// Configuration bug; never retried.
    #[error("Unknown strategy type: {0}")]
    UnknownStrategy(String),
    #[error("Invalid {strategy} params: {reason}")]
    InvalidParams {
        strategy: StrategyType,
        reason: String,
    },
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Everything a strategy needs for one account.
#[derive(Clone)]
pub struct StrategyContext {
    pub account: Account,
    pub params: serde_json::Value,
    pub gateway: Arc<dyn MarketGateway>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub peaks: Arc<PeakTracker>,
}

impl StrategyContext {
    /// Deserialize params, filling omitted fields with defaults.
    pub fn params<P: DeserializeOwned>(&self, strategy: StrategyType) -> Result<P, StrategyError> {
        let value = if self.params.is_null() {
            serde_json::json!({})
        } else {
            self.params.clone()
        };
        serde_json::from_value(value).map_err(|e| StrategyError::InvalidParams {
            strategy,
            reason: e.to_string(),
        })
    }
}

/// Per-position decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSignal {
    pub position: Position,
    pub pnl_pct: f64,
    pub close: bool,
    pub note: String,
    /// Fault that prevented a decision (e.g. candles unavailable).
    pub fault: Option<String>,
}

impl ExitSignal {
    pub fn hold(position: &Position, note: impl Into<String>) -> Self {
        Self {
            pnl_pct: position.pnl_pct(),
            position: position.clone(),
            close: false,
            note: note.into(),
            fault: None,
        }
    }

    pub fn close(position: &Position, reason: impl Into<String>) -> Self {
        Self {
            close: true,
            ..Self::hold(position, reason)
        }
    }

    pub fn fault(position: &Position, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            fault: Some(error.clone()),
            ..Self::hold(position, error)
        }
    }
}

/// A pluggable exit strategy.
#[async_trait]
pub trait ExitStrategy: Send + Sync {
    fn strategy_type(&self) -> StrategyType;

    /// Decide, per open position, whether to exit.
    async fn evaluate(
        &self,
        ctx: &StrategyContext,
        positions: &[Position],
    ) -> Result<Vec<ExitSignal>, StrategyError>;

    /// Called after a position was successfully closed.
    async fn on_closed(&self, _ctx: &StrategyContext, _asset: &str) -> Result<(), StrategyError> {
        Ok(())
    }
}

/// Strategies keyed by type, built once at startup.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<StrategyType, Arc<dyn ExitStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in exits.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TakeProfitExit));
        registry.register(Arc::new(TrailingStopExit));
        registry.register(Arc::new(VwapExit));
        registry.register(Arc::new(AdxMomentumExit));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn ExitStrategy>) {
        self.strategies.insert(strategy.strategy_type(), strategy);
    }

    /// Look up by stored type name. Unknown names fail fast.
    pub fn resolve(&self, strategy_type: &str) -> Result<Arc<dyn ExitStrategy>, StrategyError> {
        strategy_type
            .parse::<StrategyType>()
            .ok()
            .and_then(|t| self.strategies.get(&t).cloned())
            .ok_or_else(|| StrategyError::UnknownStrategy(strategy_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

/// Run one strategy for one account: read positions, decide, close.
///
/// `success` is false only for operational failures. Partial close failures
/// still count as success when at least one position was closed.
pub async fn execute(strategy: &dyn ExitStrategy, ctx: &StrategyContext) -> StrategyOutcome {
    let kind = strategy.strategy_type();
    let wallet = ctx.account.wallet_ref.as_str();

    let state = match ctx.gateway.clearinghouse_state(wallet).await {
        Ok(state) => state,
        Err(e) => {
            warn!("[{}] {}: position fetch failed: {}", kind, ctx.account.id, e);
            return StrategyOutcome::failed(format!("Failed to fetch positions: {}", e));
        }
    };

    let signals = match strategy.evaluate(ctx, &state.positions).await {
        Ok(signals) => signals,
        Err(e) => {
            warn!("[{}] {}: evaluation failed: {}", kind, ctx.account.id, e);
            return StrategyOutcome::failed(e.to_string());
        }
    };

    if !signals.iter().any(|s| s.close) {
        let errors: Vec<String> = signals.iter().filter_map(|s| s.fault.clone()).collect();
        let mut outcome = StrategyOutcome::idle(signals.into_iter().map(detail).collect());
        if !errors.is_empty() && errors.len() == outcome.details.len() {
            outcome.success = false;
            outcome.error = Some(errors.join("; "));
        }
        return outcome;
    }

    let mut token: Option<Option<String>> = None;
    let mut closed = 0u32;
    let mut errors = Vec::new();
    let mut details = Vec::with_capacity(signals.len());

    for signal in signals {
        if let Some(fault) = &signal.fault {
            errors.push(format!("{}: {}", signal.position.asset, fault));
        }
        if !signal.close {
            details.push(detail(signal));
            continue;
        }

        let access = match &token {
            Some(t) => t.clone(),
            None => {
                let fetched = ctx.credentials.access_token(wallet).await;
                token = Some(fetched.clone());
                fetched
            }
        };
        let Some(access) = access else {
            errors.push(format!("{}: no valid access token", signal.position.asset));
            details.push(ExitDetail {
                closed: false,
                note: format!("{} (not closed: no valid access token)", signal.note),
                ..detail(signal)
            });
            continue;
        };

        let request = CloseRequest::for_position(wallet, &signal.position, 1.0);
        match ctx.gateway.close_position(&request, &access).await {
            Ok(true) => {
                closed += 1;
                info!(
                    "[{}] {}: closed {} {} at {:.2}% ({})",
                    kind,
                    ctx.account.id,
                    signal.position.side_label(),
                    signal.position.asset,
                    signal.pnl_pct,
                    signal.note
                );
                if let Err(e) = strategy.on_closed(ctx, &signal.position.asset).await {
                    warn!("[{}] post-close bookkeeping failed: {}", kind, e);
                }
                details.push(ExitDetail {
                    closed: true,
                    ..detail(signal)
                });
            }
            Ok(false) => {
                errors.push(format!("{}: close not accepted", signal.position.asset));
                details.push(detail(signal));
            }
            Err(e) => {
                warn!(
                    "[{}] {}: close {} failed: {}",
                    kind, ctx.account.id, signal.position.asset, e
                );
                errors.push(format!("{}: {}", signal.position.asset, e));
                details.push(detail(signal));
            }
        }
    }

    debug!(
        "[{}] {}: closed {} with {} errors",
        kind,
        ctx.account.id,
        closed,
        errors.len()
    );

    StrategyOutcome {
        success: closed > 0 || errors.is_empty(),
        action: if closed > 0 {
            StrategyAction::PositionClosed
        } else {
            StrategyAction::None
        },
        positions_closed: closed,
        details,
        error: if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        },
    }
}

fn detail(signal: ExitSignal) -> ExitDetail {
    ExitDetail {
        asset: signal.position.asset,
        pnl_pct: signal.pnl_pct,
        closed: false,
        note: signal.note,
    }
}
