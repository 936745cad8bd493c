//! Vigil - risk monitoring and policy-enforced exit strategies for perpetuals accounts

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod types;

use axum::Router;
use config::Config;
use services::{
    CredentialProvider, DailySnapshotService, EngineSettings, MarketGateway, RetentionSettings,
    RiskMonitor, ScheduleSettings, Scheduler, SqliteStore, StrategyEngine, StrategyRegistry,
    TradeExecutor,
};
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SqliteStore>,
    pub gateway: Arc<dyn MarketGateway>,
    pub risk_monitor: Arc<RiskMonitor>,
    pub strategy_engine: Arc<StrategyEngine>,
    pub snapshots: Arc<DailySnapshotService>,
    pub trade_executor: Arc<TradeExecutor>,
}

impl AppState {
    /// Wire every service over one ledger, gateway and credential source.
    pub fn new(
        config: Arc<Config>,
        store: Arc<SqliteStore>,
        gateway: Arc<dyn MarketGateway>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let risk_monitor = Arc::new(RiskMonitor::new(
            store.clone(),
            gateway.clone(),
            credentials.clone(),
            config.cycles.deadline,
            config.cycles.lease_ttl,
        ));
        let strategy_engine = Arc::new(StrategyEngine::new(
            store.clone(),
            gateway.clone(),
            credentials.clone(),
            StrategyRegistry::with_defaults(),
            EngineSettings {
                cycle_deadline: config.cycles.deadline,
                lease_ttl: config.cycles.lease_ttl,
                ..EngineSettings::default()
            },
        ));
        let snapshots = Arc::new(DailySnapshotService::new(
            store.clone(),
            gateway.clone(),
            RetentionSettings {
                delete_acknowledged_after_days: config.alerts.delete_acknowledged_after_days,
                auto_resolve_after_days: config.alerts.auto_resolve_after_days,
            },
        ));
        let trade_executor = Arc::new(TradeExecutor::new(
            store.clone(),
            gateway.clone(),
            credentials,
        ));

        Self {
            config,
            store,
            gateway,
            risk_monitor,
            strategy_engine,
            snapshots,
            trade_executor,
        }
    }

    /// Interval scheduler over this state's cycle services.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.risk_monitor.clone(),
            self.strategy_engine.clone(),
            self.snapshots.clone(),
            ScheduleSettings {
                risk_interval: self.config.cycles.risk_interval,
                strategy_interval: self.config.cycles.strategy_interval,
                snapshot_interval: self.config.cycles.snapshot_interval,
            },
        )
    }
}

/// Build the HTTP router with state attached.
pub fn create_router(state: AppState) -> Router {
    api::router().with_state(state)
}

pub use error::{AppError, Result};
