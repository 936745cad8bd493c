//! Strategy Engine
//!
//! Runs every active exit strategy for every account that has one.
//!
//! Features:
//! - Per-account lease so overlapping cycles skip busy accounts
//! - Running -> terminal run bookkeeping that survives panics and timeouts
//! - Per-cycle deadline
//! - Failures captured per strategy and aggregated into the cycle summary

use crate::services::gateway::{CredentialProvider, MarketGateway};
use crate::services::peak_tracker::PeakTracker;
use crate::services::sqlite_store::SqliteStore;
use crate::services::strategies::{self, StrategyContext, StrategyRegistry};
use crate::types::{Account, RunStatus, StrategyCycleSummary, StrategyDefinition, StrategyOutcome};
use chrono::Utc;
use futures_util::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lease scope for strategy cycles.
pub const STRATEGY_LEASE_SCOPE: &str = "strategies";

/// Timing limits for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub cycle_deadline: Duration,
    /// Upper bound for a single strategy execution.
    pub strategy_timeout: Duration,
    pub lease_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cycle_deadline: Duration::from_secs(240),
            strategy_timeout: Duration::from_secs(60),
            lease_ttl: Duration::from_secs(600),
        }
    }
}

/// Terminal record of one strategy execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRunReport {
    pub run_id: Option<String>,
    pub strategy_id: String,
    pub status: RunStatus,
    pub positions_closed: u32,
    pub error: Option<String>,
}

/// Strategy engine for executing exit strategies.
pub struct StrategyEngine {
    store: Arc<SqliteStore>,
    gateway: Arc<dyn MarketGateway>,
    credentials: Arc<dyn CredentialProvider>,
    registry: StrategyRegistry,
    peaks: Arc<PeakTracker>,
    settings: EngineSettings,
}

impl StrategyEngine {
    pub fn new(
        store: Arc<SqliteStore>,
        gateway: Arc<dyn MarketGateway>,
        credentials: Arc<dyn CredentialProvider>,
        registry: StrategyRegistry,
        settings: EngineSettings,
    ) -> Self {
        Self {
            peaks: Arc::new(PeakTracker::new(store.clone())),
            store,
            gateway,
            credentials,
            registry,
            settings,
        }
    }

    /// Execute one cycle across all accounts with active strategies. Never fails.
    pub async fn run_cycle(&self) -> StrategyCycleSummary {
        let started_at = Utc::now();
        let deadline = Instant::now() + self.settings.cycle_deadline;
        // Fresh per cycle: overlapping cycles on one engine must not share a lease.
        let holder = format!("engine-{}", Uuid::new_v4());
        let mut summary = StrategyCycleSummary {
            started_at,
            finished_at: started_at,
            accounts_processed: 0,
            accounts_skipped_locked: 0,
            strategies_executed: 0,
            trades_executed: 0,
            errors: Vec::new(),
        };

        let accounts = match self.store.accounts_with_active_strategies() {
            Ok(accounts) => accounts,
            Err(e) => {
                error!("Strategy cycle could not list accounts: {}", e);
                summary.errors.push(format!("Failed to list accounts: {}", e));
                summary.finished_at = Utc::now();
                return summary;
            }
        };

        for account in &accounts {
            match self.store.try_acquire_lease(
                &account.id,
                STRATEGY_LEASE_SCOPE,
                &holder,
                self.settings.lease_ttl,
                Utc::now(),
            ) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Account {} is leased by another cycle; skipping", account.id);
                    summary.accounts_skipped_locked += 1;
                    continue;
                }
                Err(e) => {
                    summary
                        .errors
                        .push(format!("Account {}: lease failed: {}", account.id, e));
                    continue;
                }
            }

            self.process_account(account, deadline, &mut summary).await;

            if let Err(e) = self
                .store
                .release_lease(&account.id, STRATEGY_LEASE_SCOPE, &holder)
            {
                warn!("Failed to release lease for {}: {}", account.id, e);
            }
        }

        summary.finished_at = Utc::now();
        info!(
            "Strategy cycle: {} accounts, {} strategies, {} trades, {} skipped, {} errors",
            summary.accounts_processed,
            summary.strategies_executed,
            summary.trades_executed,
            summary.accounts_skipped_locked,
            summary.errors.len()
        );
        summary
    }

    async fn process_account(
        &self,
        account: &Account,
        deadline: Instant,
        summary: &mut StrategyCycleSummary,
    ) {
        let loaded = self
            .store
            .effective_policy(&account.id)
            .and_then(|policy| Ok((policy, self.store.active_strategies(&account.id)?)));
        let (policy, definitions) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                summary
                    .errors
                    .push(format!("Account {}: {}", account.id, e));
                return;
            }
        };
        summary.accounts_processed += 1;

        for definition in &definitions {
            let report = if Instant::now() >= deadline {
                self.record_skipped(definition, "cycle deadline exceeded")
            } else {
                let budget = deadline.saturating_duration_since(Instant::now());
                self.run_strategy(account, &policy.id, definition, budget).await
            };

            summary.strategies_executed += 1;
            summary.trades_executed += report.positions_closed;
            if let Some(err) = &report.error {
                summary.errors.push(format!(
                    "Strategy {} ({}): {}",
                    definition.id, definition.strategy_type, err
                ));
            }
        }
    }

    /// Run one strategy with guaranteed finalization of its run record.
    pub async fn run_strategy(
        &self,
        account: &Account,
        policy_id: &str,
        definition: &StrategyDefinition,
        budget: Duration,
    ) -> StrategyRunReport {
        let run = match self.store.start_run(&definition.id, &account.id) {
            Ok(run) => run,
            Err(e) => {
                error!("Could not record run for strategy {}: {}", definition.id, e);
                return StrategyRunReport {
                    run_id: None,
                    strategy_id: definition.id.clone(),
                    status: RunStatus::Failed,
                    positions_closed: 0,
                    error: Some(format!("Failed to record run: {}", e)),
                };
            }
        };
        debug!(
            "Run {} started: {} for account {}",
            run.id, definition.strategy_type, account.id
        );

        let strategy = match self.registry.resolve(&definition.strategy_type) {
            Ok(strategy) => strategy,
            Err(e) => {
                warn!("Strategy {}: {}", definition.id, e);
                return self.finalize(
                    &run.id,
                    definition,
                    RunStatus::Failed,
                    None,
                    Some(e.to_string()),
                    0,
                );
            }
        };

        let ctx = StrategyContext {
            account: account.clone(),
            params: definition.params.clone(),
            gateway: self.gateway.clone(),
            credentials: self.credentials.clone(),
            peaks: self.peaks.clone(),
        };
        let limit = self.settings.strategy_timeout.min(budget);

        let guarded = AssertUnwindSafe(timeout(limit, strategies::execute(strategy.as_ref(), &ctx)))
            .catch_unwind()
            .await;

        match guarded {
            Ok(Ok(outcome)) => {
                let status = if outcome.success {
                    RunStatus::Completed
                } else {
                    RunStatus::Failed
                };
                let result = run_result(&outcome, policy_id);
                let closed = outcome.positions_closed;
                self.finalize(&run.id, definition, status, Some(result), outcome.error, closed)
            }
            Ok(Err(_)) => {
                let reason = format!("timed out after {}ms", limit.as_millis());
                warn!("Strategy {} {}", definition.id, reason);
                self.finalize(&run.id, definition, RunStatus::Failed, None, Some(reason), 0)
            }
            Err(panic) => {
                let reason = format!("crashed: {}", panic_message(panic.as_ref()));
                error!("Strategy {} {}", definition.id, reason);
                self.finalize(&run.id, definition, RunStatus::Failed, None, Some(reason), 0)
            }
        }
    }

    fn record_skipped(&self, definition: &StrategyDefinition, reason: &str) -> StrategyRunReport {
        match self.store.start_run(&definition.id, &definition.account_id) {
            Ok(run) => self.finalize(
                &run.id,
                definition,
                RunStatus::Failed,
                None,
                Some(reason.to_string()),
                0,
            ),
            Err(e) => StrategyRunReport {
                run_id: None,
                strategy_id: definition.id.clone(),
                status: RunStatus::Failed,
                positions_closed: 0,
                error: Some(format!("{} (run not recorded: {})", reason, e)),
            },
        }
    }

    fn finalize(
        &self,
        run_id: &str,
        definition: &StrategyDefinition,
        status: RunStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
        positions_closed: u32,
    ) -> StrategyRunReport {
        let mut error = error;
        match self
            .store
            .finish_run(run_id, status, result.as_ref(), error.as_deref())
        {
            Ok(true) => {}
            Ok(false) => warn!("Run {} was already finalized", run_id),
            Err(e) => {
                error!("Failed to finalize run {}: {}", run_id, e);
                let note = format!("run not finalized: {}", e);
                error = Some(match error {
                    Some(existing) => format!("{}; {}", existing, note),
                    None => note,
                });
            }
        }
        info!(
            "Run {} for strategy {} -> {} ({} closed)",
            run_id,
            definition.id,
            status.as_str(),
            positions_closed
        );
        StrategyRunReport {
            run_id: Some(run_id.to_string()),
            strategy_id: definition.id.clone(),
            status,
            positions_closed,
            error,
        }
    }
}

fn run_result(outcome: &StrategyOutcome, policy_id: &str) -> serde_json::Value {
    let mut value = serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null);
    if let Some(map) = value.as_object_mut() {
        map.insert("policyId".to_string(), serde_json::json!(policy_id));
    }
    value
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::{InMemoryGateway, StaticCredentials};
    use crate::types::{Position, StrategyType};
    use serde_json::json;

    const WALLET: &str = "0xengine";

    struct Harness {
        store: Arc<SqliteStore>,
        gateway: InMemoryGateway,
        engine: StrategyEngine,
        account: Account,
    }

    fn harness(settings: EngineSettings) -> Harness {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let gateway = InMemoryGateway::new();
        let creds = StaticCredentials::new();
        creds.insert(WALLET, "token");
        let engine = StrategyEngine::new(
            store.clone(),
            Arc::new(gateway.clone()),
            Arc::new(creds),
            StrategyRegistry::with_defaults(),
            settings,
        );
        let account = store.register_account(WALLET, None).unwrap();
        Harness {
            store,
            gateway,
            engine,
            account,
        }
    }

    fn long(asset: &str, entry: f64, current: f64) -> Position {
        Position {
            asset: asset.to_string(),
            size: 1.0,
            entry_price: entry,
            current_price: current,
            notional: current,
            unrealized_pnl: current - entry,
            leverage: 2.0,
            liquidation_price: None,
            is_long: true,
        }
    }

    fn add_strategy(h: &Harness, t: StrategyType, params: serde_json::Value) -> StrategyDefinition {
        let def = StrategyDefinition::new(&h.account.id, t, params);
        h.store.insert_strategy(&def).unwrap();
        def
    }

    #[tokio::test]
    async fn test_cycle_completes_runs_and_counts_trades() {
        let h = harness(EngineSettings::default());
        h.gateway.set_positions(WALLET, vec![long("BTC", 100.0, 106.0)]);
        let def = add_strategy(&h, StrategyType::TakeProfit, json!({}));

        let summary = h.engine.run_cycle().await;
        assert_eq!(summary.accounts_processed, 1);
        assert_eq!(summary.strategies_executed, 1);
        assert_eq!(summary.trades_executed, 1);
        assert!(summary.errors.is_empty());

        let runs = h.store.list_runs(&def.id, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert!(runs[0].completed_at.is_some());
        let result = runs[0].result.as_ref().unwrap();
        assert_eq!(result["positionsClosed"], 1);
        assert!(result["policyId"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_type_fails_without_aborting_cycle() {
        let h = harness(EngineSettings::default());
        h.gateway.set_positions(WALLET, vec![long("BTC", 100.0, 106.0)]);
        let mut bogus = StrategyDefinition::new(&h.account.id, StrategyType::TakeProfit, json!({}));
        bogus.strategy_type = "grid-martingale".to_string();
        h.store.insert_strategy(&bogus).unwrap();
        let good = add_strategy(&h, StrategyType::TakeProfit, json!({}));

        let summary = h.engine.run_cycle().await;
        assert_eq!(summary.strategies_executed, 2);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("Unknown strategy type"));

        let bogus_run = &h.store.list_runs(&bogus.id, 1).unwrap()[0];
        assert_eq!(bogus_run.status, RunStatus::Failed);
        let good_run = &h.store.list_runs(&good.id, 1).unwrap()[0];
        assert_eq!(good_run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_panicking_strategy_is_finalized_as_crashed() {
        let h = harness(EngineSettings::default());
        h.gateway.set_positions(WALLET, vec![long("BTC", 100.0, 106.0)]);
        h.gateway.panic_on_candles(true);
        let def = add_strategy(&h, StrategyType::VwapExit, json!({}));

        let summary = h.engine.run_cycle().await;
        assert_eq!(summary.errors.len(), 1);

        let run = &h.store.list_runs(&def.id, 1).unwrap()[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.as_deref().unwrap().starts_with("crashed"));
    }

    #[tokio::test]
    async fn test_slow_strategy_times_out() {
        let h = harness(EngineSettings {
            strategy_timeout: Duration::from_millis(20),
            ..Default::default()
        });
        h.gateway.set_read_delay(Duration::from_millis(200));
        let def = add_strategy(&h, StrategyType::TakeProfit, json!({}));

        h.engine.run_cycle().await;
        let run = &h.store.list_runs(&def.id, 1).unwrap()[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_expired_deadline_fails_remaining_strategies() {
        let h = harness(EngineSettings {
            cycle_deadline: Duration::ZERO,
            ..Default::default()
        });
        let def = add_strategy(&h, StrategyType::TakeProfit, json!({}));

        let summary = h.engine.run_cycle().await;
        assert_eq!(summary.errors.len(), 1);
        let run = &h.store.list_runs(&def.id, 1).unwrap()[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("cycle deadline exceeded"));
    }

    #[tokio::test]
    async fn test_leased_account_is_skipped() {
        let h = harness(EngineSettings::default());
        add_strategy(&h, StrategyType::TakeProfit, json!({}));
        h.store
            .try_acquire_lease(
                &h.account.id,
                STRATEGY_LEASE_SCOPE,
                "other-instance",
                Duration::from_secs(600),
                Utc::now(),
            )
            .unwrap();

        let summary = h.engine.run_cycle().await;
        assert_eq!(summary.accounts_skipped_locked, 1);
        assert_eq!(summary.accounts_processed, 0);
    }

    #[tokio::test]
    async fn test_lease_released_after_cycle() {
        let h = harness(EngineSettings::default());
        add_strategy(&h, StrategyType::TakeProfit, json!({}));
        h.engine.run_cycle().await;

        assert!(h
            .store
            .try_acquire_lease(
                &h.account.id,
                STRATEGY_LEASE_SCOPE,
                "other-instance",
                Duration::from_secs(600),
                Utc::now(),
            )
            .unwrap());
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }

    #[tokio::test]
    async fn test_overlapping_cycles_on_one_engine_skip_busy_account() {
        let h = harness(EngineSettings::default());
        h.gateway.set_positions(WALLET, vec![long("BTC", 100.0, 106.0)]);
        let def = add_strategy(&h, StrategyType::TakeProfit, json!({}));
        h.gateway.set_read_delay(Duration::from_millis(200));

        let (a, b) = tokio::join!(h.engine.run_cycle(), h.engine.run_cycle());

        assert_eq!(a.accounts_skipped_locked + b.accounts_skipped_locked, 1);
        assert_eq!(a.strategies_executed + b.strategies_executed, 1);
        assert_eq!(h.gateway.close_requests().len(), 1);
        assert_eq!(h.store.list_runs(&def.id, 10).unwrap().len(), 1);
    }
}
