pub mod cache;
pub mod daily_snapshot;
pub mod gateway;
pub mod indicators;
pub mod peak_tracker;
pub mod policy;
pub mod risk_metrics;
pub mod risk_monitor;
pub mod risk_tier;
pub mod scheduler;
pub mod sqlite_store;
pub mod strategies;
pub mod strategy_engine;
pub mod trade_executor;

pub use cache::Cache;
pub use daily_snapshot::{DailySnapshotService, RetentionSettings};
pub use gateway::{
    CredentialProvider, GatewayError, HyperliquidGateway, InMemoryGateway, MarketGateway,
    ResilientGateway, RetryPolicy, StaticCredentials,
};
pub use peak_tracker::PeakTracker;
pub use risk_monitor::RiskMonitor;
pub use scheduler::{ScheduleSettings, Scheduler};
pub use sqlite_store::{LedgerError, SqliteStore};
pub use strategies::{StrategyError, StrategyRegistry};
pub use strategy_engine::{EngineSettings, StrategyEngine, StrategyRunReport};
pub use trade_executor::{TradeError, TradeExecutor};
