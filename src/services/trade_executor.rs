//! Trade Executor
//!
//! Opens a basket trade only after the policy enforcer approves it. The stake
//! is split evenly across legs and the notional of every leg that actually
//! opened is booked against today's cap.

use crate::services::gateway::{CredentialProvider, MarketGateway};
use crate::services::policy::check_trade;
use crate::services::sqlite_store::{LedgerError, SqliteStore};
use crate::types::{Account, LegResult, OpenRequest, TradeExecution, TradeProposal};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TradeError {
    #[error("No valid access token for wallet {0}")]
    NoCredentials(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct TradeExecutor {
    store: Arc<SqliteStore>,
    gateway: Arc<dyn MarketGateway>,
    credentials: Arc<dyn CredentialProvider>,
}

impl TradeExecutor {
    pub fn new(
        store: Arc<SqliteStore>,
        gateway: Arc<dyn MarketGateway>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            store,
            gateway,
            credentials,
        }
    }

    /// Validate and, if allowed, execute `proposal` for `account`.
    ///
    /// A rejected proposal is not an error: the returned execution carries the
    /// violations and `executed == false`.
    pub async fn execute(
        &self,
        account: &Account,
        proposal: &TradeProposal,
    ) -> Result<TradeExecution, TradeError> {
        let now = Utc::now();
        let policy = self.store.effective_policy(&account.id)?;
        let today = self.store.today_notional(&account.id, now.date_naive())?;
        let check = check_trade(proposal, &policy, today);
        if !check.valid {
            info!(
                "Trade for {} rejected: {}",
                account.id,
                check
                    .violations
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            return Ok(TradeExecution::rejected(check));
        }

        let token = self
            .credentials
            .access_token(&account.wallet_ref)
            .await
            .ok_or_else(|| TradeError::NoCredentials(account.wallet_ref.clone()))?;

        let legs: Vec<(&String, bool)> = proposal
            .long_assets
            .iter()
            .map(|a| (a, true))
            .chain(proposal.short_assets.iter().map(|a| (a, false)))
            .collect();
        let stake_per_leg = proposal.stake_usd / legs.len() as f64;

        let mut results = Vec::with_capacity(legs.len());
        for (asset, is_long) in legs {
            let request = OpenRequest {
                wallet_ref: account.wallet_ref.clone(),
                asset: asset.clone(),
                is_long,
                stake_usd: stake_per_leg,
                leverage: proposal.leverage,
            };
            let (opened, error) = match self.gateway.open_position(&request, &token).await {
                Ok(true) => (true, None),
                Ok(false) => (false, Some("open not accepted".to_string())),
                Err(e) => {
                    warn!("Open {} for {} failed: {}", asset, account.id, e);
                    (false, Some(e.to_string()))
                }
            };
            results.push(LegResult {
                asset: asset.clone(),
                is_long,
                stake_usd: stake_per_leg,
                notional: request.notional(),
                opened,
                error,
            });
        }

        let mut execution = TradeExecution {
            check,
            executed: results.iter().any(|leg| leg.opened),
            legs: results,
            trade_id: None,
        };

        if execution.executed {
            let assets: Vec<String> = execution
                .legs
                .iter()
                .filter(|leg| leg.opened)
                .map(|leg| leg.asset.clone())
                .collect();
            let notional = execution.opened_notional();
            execution.trade_id = Some(self.store.record_trade(&account.id, &assets, notional, now)?);
            info!(
                "Trade for {}: {}/{} legs opened, ${:.2} notional",
                account.id,
                assets.len(),
                execution.legs.len(),
                notional
            );
        }

        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::{InMemoryGateway, StaticCredentials};
    use crate::types::{Policy, PolicyViolation};

    const WALLET: &str = "0xtrader";

    fn setup(with_token: bool) -> (Arc<SqliteStore>, InMemoryGateway, TradeExecutor, Account) {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let gateway = InMemoryGateway::new();
        let creds = StaticCredentials::new();
        if with_token {
            creds.insert(WALLET, "token");
        }
        let executor = TradeExecutor::new(store.clone(), Arc::new(gateway.clone()), Arc::new(creds));
        let account = store.register_account(WALLET, None).unwrap();
        let policy = Policy {
            max_leverage: 5.0,
            max_daily_notional_usd: 10_000.0,
            allowed_assets: vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()],
            ..Policy::default_for(&account.id)
        };
        store.insert_policy(&policy).unwrap();
        (store, gateway, executor, account)
    }

    fn proposal(longs: &[&str], shorts: &[&str], stake: f64, leverage: f64) -> TradeProposal {
        TradeProposal {
            long_assets: longs.iter().map(|s| s.to_string()).collect(),
            short_assets: shorts.iter().map(|s| s.to_string()).collect(),
            stake_usd: stake,
            leverage,
        }
    }

    #[tokio::test]
    async fn test_opens_each_leg_with_even_stake() {
        let (store, gateway, executor, account) = setup(true);
        let execution = executor
            .execute(&account, &proposal(&["BTC", "ETH"], &["SOL"], 900.0, 3.0))
            .await
            .unwrap();

        assert!(execution.check.valid);
        assert!(execution.executed);
        assert!(execution.trade_id.is_some());
        let opens = gateway.open_requests();
        assert_eq!(opens.len(), 3);
        assert!(opens.iter().all(|o| o.stake_usd == 300.0));
        assert!(!opens[2].is_long);

        let today = store
            .today_notional(&account.id, Utc::now().date_naive())
            .unwrap();
        assert_eq!(today, 2700.0);
    }

    #[tokio::test]
    async fn test_rejected_trade_never_touches_gateway() {
        let (store, gateway, executor, account) = setup(true);
        let execution = executor
            .execute(&account, &proposal(&["DOGE"], &[], 1000.0, 10.0))
            .await
            .unwrap();

        assert!(!execution.executed);
        assert!(execution
            .check
            .violations
            .iter()
            .any(|v| matches!(v, PolicyViolation::LeverageExceeded { .. })));
        assert!(execution
            .check
            .violations
            .iter()
            .any(|v| matches!(v, PolicyViolation::AssetNotAllowed { .. })));
        assert!(gateway.open_requests().is_empty());
        let today = store
            .today_notional(&account.id, Utc::now().date_naive())
            .unwrap();
        assert_eq!(today, 0.0);
    }

    #[tokio::test]
    async fn test_daily_cap_accumulates() {
        let (_store, _gateway, executor, account) = setup(true);
        let first = executor
            .execute(&account, &proposal(&["BTC"], &[], 2000.0, 4.0))
            .await
            .unwrap();
        assert!(first.executed);

        let second = executor
            .execute(&account, &proposal(&["ETH"], &[], 1000.0, 3.0))
            .await
            .unwrap();
        assert!(!second.executed);
        assert_eq!(second.check.today_notional, 8000.0);
        assert!(second
            .check
            .violations
            .iter()
            .any(|v| matches!(v, PolicyViolation::DailyNotionalExceeded { .. })));
    }

    #[tokio::test]
    async fn test_only_opened_legs_are_booked() {
        let (store, gateway, executor, account) = setup(true);
        gateway.reject_opens_for("ETH", "insufficient margin");
        let execution = executor
            .execute(&account, &proposal(&["BTC", "ETH"], &[], 1000.0, 2.0))
            .await
            .unwrap();

        assert!(execution.executed);
        assert_eq!(execution.legs.iter().filter(|l| l.opened).count(), 1);
        assert!(execution.legs[1].error.as_deref().unwrap().contains("insufficient margin"));
        let today = store
            .today_notional(&account.id, Utc::now().date_naive())
            .unwrap();
        assert_eq!(today, 1000.0);
    }

    #[tokio::test]
    async fn test_missing_token_is_an_error() {
        let (_store, gateway, executor, account) = setup(false);
        let result = executor
            .execute(&account, &proposal(&["BTC"], &[], 100.0, 2.0))
            .await;
        assert!(matches!(result, Err(TradeError::NoCredentials(_))));
        assert!(gateway.open_requests().is_empty());
    }
}
