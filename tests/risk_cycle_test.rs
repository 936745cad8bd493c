//! Integration tests for the risk monitor cycle

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use vigil::services::risk_metrics::calculate_risk_metrics;
use vigil::services::risk_tier::classify_metrics;
use vigil::services::{InMemoryGateway, RiskMonitor, SqliteStore, StaticCredentials};
use vigil::types::{AlertSeverity, Policy, Position, RiskAction, RiskTier};

const WALLET: &str = "0xabc";

fn long(asset: &str, size: f64, price: f64, liq: Option<f64>) -> Position {
    Position {
        asset: asset.to_string(),
        size,
        entry_price: price,
        current_price: price,
        notional: size * price,
        unrealized_pnl: 0.0,
        leverage: 2.0,
        liquidation_price: liq,
        is_long: true,
    }
}

fn monitor(store: &Arc<SqliteStore>, gateway: &InMemoryGateway) -> RiskMonitor {
    let creds = StaticCredentials::new();
    creds.insert(WALLET, "token");
    RiskMonitor::new(
        store.clone(),
        Arc::new(gateway.clone()),
        Arc::new(creds),
        Duration::from_secs(30),
        Duration::from_secs(300),
    )
}

async fn run_equity_path(
    store: &Arc<SqliteStore>,
    gateway: &InMemoryGateway,
    path: &[f64],
) -> vigil::types::RiskCycleSummary {
    let monitor = monitor(store, gateway);
    let mut last = None;
    for &equity in path {
        gateway.set_equity(WALLET, equity);
        last = Some(monitor.run_cycle().await);
    }
    last.unwrap()
}

// =============================================================================
// Drawdown path: [1000, 1200, 900] against a 15% limit
// =============================================================================

#[tokio::test]
async fn test_drawdown_path_closes_everything_with_auto_close() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let gateway = InMemoryGateway::new();
    let account = store.register_account(WALLET, Some("main")).unwrap();
    store
        .insert_policy(&Policy {
            max_drawdown_pct: 15.0,
            auto_close_enabled: true,
            ..Policy::default_for(&account.id)
        })
        .unwrap();
    gateway.set_positions(WALLET, vec![long("BTC", 0.5, 60_000.0, None)]);

    let summary = run_equity_path(&store, &gateway, &[1000.0, 1200.0, 900.0]).await;

    let result = &summary.results[0];
    assert_eq!(result.tier, RiskTier::Full);
    assert_eq!(result.action, RiskAction::CloseAll);
    let metrics = result.metrics.as_ref().unwrap();
    assert_eq!(metrics.peak_equity, 1200.0);
    assert!((metrics.current_drawdown_pct - 25.0).abs() < 1e-9);
    assert_eq!(summary.positions_closed, 1);
    assert_eq!(summary.alerts_created, 1);

    let account = store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(account.peak_equity, 1200.0);
    assert_eq!(account.last_equity, 900.0);

    let alerts = store.list_alerts(Some(&account.id), true, 10).unwrap();
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    assert!(gateway.close_requests()[0].reduce_only);
}

#[tokio::test]
async fn test_drawdown_path_without_auto_close_only_alerts() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let gateway = InMemoryGateway::new();
    let account = store.register_account(WALLET, None).unwrap();
    store
        .insert_policy(&Policy {
            max_drawdown_pct: 15.0,
            auto_close_enabled: false,
            ..Policy::default_for(&account.id)
        })
        .unwrap();
    gateway.set_positions(WALLET, vec![long("BTC", 0.5, 60_000.0, None)]);

    let summary = run_equity_path(&store, &gateway, &[1000.0, 1200.0, 900.0]).await;

    assert_eq!(summary.results[0].tier, RiskTier::Action);
    assert_eq!(summary.results[0].action, RiskAction::AlertRebalance);
    assert_eq!(summary.positions_closed, 0);
    assert!(gateway.close_requests().is_empty());
}

#[tokio::test]
async fn test_peak_is_durable_across_monitor_instances() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let gateway = InMemoryGateway::new();
    let account = store.register_account(WALLET, None).unwrap();

    run_equity_path(&store, &gateway, &[1000.0, 1200.0]).await;
    // A fresh monitor still sees the stored peak.
    let summary = run_equity_path(&store, &gateway, &[1100.0]).await;
    let metrics = summary.results[0].metrics.as_ref().unwrap();
    assert_eq!(metrics.peak_equity, 1200.0);
    assert!(metrics.current_drawdown_pct > 8.0);

    let account = store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(account.peak_equity, 1200.0);
}

// =============================================================================
// Liquidation proximity
// =============================================================================

#[test]
fn test_liquidation_distance_escalates_to_action() {
    let positions = vec![long("ETH", 1.0, 100.0, Some(95.0))];
    let metrics = calculate_risk_metrics(&positions, 1000.0, 1000.0);
    assert!((metrics.nearest_liquidation_pct - 5.0).abs() < 1e-9);

    let policy = Policy {
        min_liquidation_distance_pct: Some(10.0),
        ..Policy::default_for("acct")
    };
    let decision = classify_metrics(&metrics, &policy);
    assert!(decision.tier >= RiskTier::Action);
}

// =============================================================================
// Cycle resilience
// =============================================================================

#[tokio::test]
async fn test_one_failing_account_does_not_block_others() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let gateway = InMemoryGateway::new();
    store.register_account(WALLET, None).unwrap();
    store.register_account("0xdef", None).unwrap();
    gateway.set_equity(WALLET, 1000.0);
    gateway.set_equity("0xdef", 2000.0);
    gateway.fail_next_reads(1);

    let summary = monitor(&store, &gateway).run_cycle().await;
    assert_eq!(summary.accounts_checked, 2);
    assert_eq!(summary.results.iter().filter(|r| r.metrics.is_some()).count(), 1);
    assert_eq!(summary.errors.len(), 1);
}

#[tokio::test]
async fn test_risk_cycle_feeds_daily_snapshot() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let gateway = InMemoryGateway::new();
    let account = store.register_account(WALLET, None).unwrap();

    run_equity_path(&store, &gateway, &[1000.0, 950.0, 1020.0]).await;

    let snap = store
        .get_snapshot(&account.id, Utc::now().date_naive())
        .unwrap()
        .unwrap();
    assert_eq!(snap.opening_equity, 1000.0);
    assert_eq!(snap.low_equity, 950.0);
    assert_eq!(snap.closing_equity, 1020.0);
    assert!((snap.daily_pnl - 20.0).abs() < 1e-9);
    assert!((snap.max_drawdown_pct - 5.0).abs() < 1e-9);
}
