//! Risk Monitor
//!
//! One cycle evaluates every account: fetch equity and positions, update the
//! durable peak/drawdown, compute metrics, classify the tier and apply its
//! action. Accounts are independent; one failing never blocks the others.

use crate::services::gateway::{CredentialProvider, MarketGateway};
use crate::services::risk_metrics::calculate_risk_metrics;
use crate::services::risk_tier::classify_metrics;
use crate::services::sqlite_store::SqliteStore;
use crate::types::{
    Account, AccountRiskResult, AlertSeverity, CloseReport, CloseRequest, Position, RiskAction,
    RiskAlert, RiskCycleSummary, RiskMetrics, TierDecision,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lease scope for risk cycles.
pub const RISK_LEASE_SCOPE: &str = "risk";

/// Fraction of each position closed by the partial tier.
pub const PARTIAL_CLOSE_FRACTION: f64 = 0.5;

pub struct RiskMonitor {
    store: Arc<SqliteStore>,
    gateway: Arc<dyn MarketGateway>,
    credentials: Arc<dyn CredentialProvider>,
    cycle_deadline: Duration,
    lease_ttl: Duration,
}

/// Classified account state, ready for its tier action.
struct Assessment {
    decision: TierDecision,
    metrics: RiskMetrics,
    positions: Vec<Position>,
}

impl RiskMonitor {
    pub fn new(
        store: Arc<SqliteStore>,
        gateway: Arc<dyn MarketGateway>,
        credentials: Arc<dyn CredentialProvider>,
        cycle_deadline: Duration,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            credentials,
            cycle_deadline,
            lease_ttl,
        }
    }

    /// Evaluate every registered account once. Never fails.
    pub async fn run_cycle(&self) -> RiskCycleSummary {
        let started_at = Utc::now();
        let deadline = Instant::now() + self.cycle_deadline;
        // Fresh per cycle: overlapping cycles on one monitor must not share a lease.
        let holder = format!("risk-{}", Uuid::new_v4());
        let mut summary = RiskCycleSummary {
            started_at,
            finished_at: started_at,
            accounts_checked: 0,
            accounts_skipped_locked: 0,
            alerts_created: 0,
            positions_closed: 0,
            results: Vec::new(),
            errors: Vec::new(),
        };

        let accounts = match self.store.list_accounts() {
            Ok(accounts) => accounts,
            Err(e) => {
                error!("Risk cycle could not list accounts: {}", e);
                summary.errors.push(format!("Failed to list accounts: {}", e));
                summary.finished_at = Utc::now();
                return summary;
            }
        };

        for account in &accounts {
            if Instant::now() >= deadline {
                summary.errors.push(format!(
                    "Account {}: skipped, cycle deadline exceeded",
                    account.id
                ));
                summary.results.push(AccountRiskResult::skipped(
                    &account.id,
                    "Cycle deadline exceeded",
                ));
                continue;
            }

            match self.store.try_acquire_lease(
                &account.id,
                RISK_LEASE_SCOPE,
                &holder,
                self.lease_ttl,
                Utc::now(),
            ) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Account {} is leased by another risk cycle", account.id);
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

            // The deadline bounds reads and classification only; once an
            // action starts it runs to completion and records its alert.
            let budget = deadline.saturating_duration_since(Instant::now());
            let result = match tokio::time::timeout(budget, self.assess(account)).await {
                Ok(Ok(assessment)) => self.act(account, assessment).await,
                Ok(Err(skipped)) => skipped,
                Err(_) => AccountRiskResult::skipped(&account.id, "Cycle deadline exceeded"),
            };

            if let Err(e) = self
                .store
                .release_lease(&account.id, RISK_LEASE_SCOPE, &holder)
            {
                warn!("Failed to release risk lease for {}: {}", account.id, e);
            }

            summary.accounts_checked += 1;
            if result.alert_id.is_some() {
                summary.alerts_created += 1;
            }
            if let Some(report) = &result.close_report {
                summary.positions_closed += report.closed;
                summary.errors.extend(
                    report
                        .errors
                        .iter()
                        .map(|e| format!("Account {}: {}", account.id, e)),
                );
            }
            if result.metrics.is_none() {
                summary
                    .errors
                    .push(format!("Account {}: {}", account.id, result.reason));
            }
            summary.results.push(result);
        }

        summary.finished_at = Utc::now();
        info!(
            "Risk cycle: {} checked, {} skipped, {} alerts, {} positions closed, {} errors",
            summary.accounts_checked,
            summary.accounts_skipped_locked,
            summary.alerts_created,
            summary.positions_closed,
            summary.errors.len()
        );
        summary
    }

    /// Evaluate one account and apply its tier action.
    pub async fn evaluate_account(&self, account: &Account) -> AccountRiskResult {
        match self.assess(account).await {
            Ok(assessment) => self.act(account, assessment).await,
            Err(skipped) => skipped,
        }
    }

    /// Fetch, record and classify. `Err` carries the result for an account
    /// that cannot be classified this cycle.
    async fn assess(&self, account: &Account) -> Result<Assessment, AccountRiskResult> {
        let state = match self.gateway.clearinghouse_state(&account.wallet_ref).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Risk: equity fetch failed for {}: {}", account.id, e);
                return Err(AccountRiskResult::skipped(
                    &account.id,
                    format!("Failed to fetch equity: {}", e),
                ));
            }
        };

        if !(state.equity.is_finite() && state.equity > 0.0) {
            return Err(AccountRiskResult::skipped(
                &account.id,
                format!("No equity reported ({})", state.equity),
            ));
        }

        let now = Utc::now();
        let peak = match self.store.record_equity(&account.id, state.equity, now) {
            Ok(Some(updated)) => updated.peak_equity,
            Ok(None) => {
                return Err(AccountRiskResult::skipped(
                    &account.id,
                    "Account no longer exists",
                ))
            }
            Err(e) => {
                return Err(AccountRiskResult::skipped(
                    &account.id,
                    format!("Failed to record equity: {}", e),
                ))
            }
        };

        let metrics = calculate_risk_metrics(&state.positions, state.equity, peak);
        if let Err(e) = self.store.record_equity_observation(
            &account.id,
            now.date_naive(),
            state.equity,
            metrics.current_drawdown_pct,
            now,
        ) {
            warn!("Risk: daily observation failed for {}: {}", account.id, e);
        }

        let policy = match self.store.effective_policy(&account.id) {
            Ok(policy) => policy,
            Err(e) => {
                return Err(AccountRiskResult {
                    metrics: Some(metrics),
                    ..AccountRiskResult::skipped(
                        &account.id,
                        format!("Failed to load policy: {}", e),
                    )
                })
            }
        };

        let decision = classify_metrics(&metrics, &policy);
        debug!(
            "Risk {}: equity={:.2} peak={:.2} dd={:.2}% liq={:.2}% -> {}",
            account.id,
            state.equity,
            peak,
            metrics.current_drawdown_pct,
            metrics.nearest_liquidation_pct,
            decision.tier
        );

        Ok(Assessment {
            decision,
            metrics,
            positions: state.positions,
        })
    }

    /// Apply the tier action. Not cancelled by the cycle deadline.
    async fn act(&self, account: &Account, assessment: Assessment) -> AccountRiskResult {
        let Assessment {
            decision,
            metrics,
            positions,
        } = assessment;
        let (alert_id, close_report) = self.apply_action(account, &decision, &positions).await;

        AccountRiskResult {
            account_id: account.id.clone(),
            tier: decision.tier,
            action: decision.action,
            reason: decision.reason,
            metrics: Some(metrics),
            alert_id,
            close_report,
        }
    }

    async fn apply_action(
        &self,
        account: &Account,
        decision: &TierDecision,
        positions: &[Position],
    ) -> (Option<String>, Option<CloseReport>) {
        match decision.action {
            RiskAction::Monitor => (None, None),
            RiskAction::Log => {
                info!("Risk {} [{}]: {}", account.id, decision.tier, decision.reason);
                (None, None)
            }
            RiskAction::Notify => (
                self.record_alert(account, decision, AlertSeverity::Info, "notify"),
                None,
            ),
            RiskAction::AlertRebalance => (
                self.record_alert(account, decision, AlertSeverity::Warning, "alert_rebalance"),
                None,
            ),
            RiskAction::Close50Pct | RiskAction::CloseAll => {
                let fraction = if decision.action == RiskAction::CloseAll {
                    1.0
                } else {
                    PARTIAL_CLOSE_FRACTION
                };
                let report = self
                    .close_positions(&account.wallet_ref, positions, fraction)
                    .await;
                let action_taken = format!(
                    "{}: closed {}/{}",
                    decision.action, report.closed, report.attempted
                );
                warn!("Risk {} [{}]: {} ({})", account.id, decision.tier, decision.reason, action_taken);
                let alert_id =
                    self.record_alert(account, decision, AlertSeverity::Critical, &action_taken);
                (alert_id, Some(report))
            }
        }
    }

    /// Reduce-only close of `fraction` of every position, continuing past failures.
    pub async fn close_positions(
        &self,
        wallet_ref: &str,
        positions: &[Position],
        fraction: f64,
    ) -> CloseReport {
        let mut report = CloseReport {
            attempted: positions.len() as u32,
            ..CloseReport::default()
        };
        if positions.is_empty() {
            return report;
        }

        let Some(token) = self.credentials.access_token(wallet_ref).await else {
            report
                .errors
                .push("No valid access token; positions left open".to_string());
            return report;
        };

        for position in positions {
            let request = CloseRequest::for_position(wallet_ref, position, fraction);
            match self.gateway.close_position(&request, &token).await {
                Ok(true) => {
                    report.closed += 1;
                    info!(
                        "Closed {:.0}% of {} {} ({} units)",
                        fraction * 100.0,
                        position.side_label(),
                        position.asset,
                        request.size
                    );
                }
                Ok(false) => report
                    .errors
                    .push(format!("{}: close not accepted", position.asset)),
                Err(e) => {
                    warn!("Close {} failed: {}", position.asset, e);
                    report.errors.push(format!("{}: {}", position.asset, e));
                }
            }
        }
        report
    }

    fn record_alert(
        &self,
        account: &Account,
        decision: &TierDecision,
        severity: AlertSeverity,
        action_taken: &str,
    ) -> Option<String> {
        let alert = RiskAlert::new(&account.id, decision, severity, action_taken);
        match self.store.insert_alert(&alert) {
            Ok(()) => {
                info!(
                    "Alert {} [{}] for {}: {} (threshold {:.2}, actual {:.2})",
                    alert.id,
                    severity.as_str(),
                    account.id,
                    alert.message,
                    alert.threshold_value,
                    alert.actual_value
                );
                Some(alert.id)
            }
            Err(e) => {
                error!("Failed to store alert for {}: {}", account.id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::{InMemoryGateway, StaticCredentials};
    use crate::types::{Policy, RiskTier};

    const WALLET: &str = "0xrisk";

    struct Harness {
        store: Arc<SqliteStore>,
        gateway: InMemoryGateway,
        monitor: RiskMonitor,
        account: Account,
    }

    fn harness(with_token: bool) -> Harness {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let gateway = InMemoryGateway::new();
        let creds = StaticCredentials::new();
        if with_token {
            creds.insert(WALLET, "token");
        }
        let monitor = RiskMonitor::new(
            store.clone(),
            Arc::new(gateway.clone()),
            Arc::new(creds),
            Duration::from_secs(60),
            Duration::from_secs(600),
        );
        let account = store.register_account(WALLET, None).unwrap();
        Harness {
            store,
            gateway,
            monitor,
            account,
        }
    }

    fn position(asset: &str, size: f64, price: f64, liq: Option<f64>) -> Position {
        Position {
            asset: asset.to_string(),
            size,
            entry_price: price,
            current_price: price,
            notional: size * price,
            unrealized_pnl: 0.0,
            leverage: 3.0,
            liquidation_price: liq,
            is_long: true,
        }
    }

    fn set_policy(h: &Harness, max_dd: f64, auto_close: bool, auto_partial: bool) {
        let policy = Policy {
            max_drawdown_pct: max_dd,
            auto_close_enabled: auto_close,
            auto_partial_close_enabled: auto_partial,
            ..Policy::default_for(&h.account.id)
        };
        h.store.insert_policy(&policy).unwrap();
    }

    async fn walk_equity(h: &Harness, equities: &[f64]) -> AccountRiskResult {
        let mut last = None;
        for &equity in equities {
            h.gateway.set_equity(WALLET, equity);
            let account = h.store.get_account(&h.account.id).unwrap().unwrap();
            last = Some(h.monitor.evaluate_account(&account).await);
        }
        last.unwrap()
    }

    #[tokio::test]
    async fn test_drawdown_full_close_when_enabled() {
        let h = harness(true);
        set_policy(&h, 15.0, true, false);
        h.gateway.set_positions(
            WALLET,
            vec![position("BTC", 1.0, 100.0, None), position("ETH", 2.0, 50.0, None)],
        );

        let result = walk_equity(&h, &[1000.0, 1200.0, 900.0]).await;
        assert_eq!(result.tier, RiskTier::Full);
        let report = result.close_report.unwrap();
        assert_eq!(report.closed, 2);
        assert!(report.fully_succeeded());
        assert!(h.gateway.close_requests().iter().all(|r| r.reduce_only));

        let alerts = h.store.list_alerts(Some(&h.account.id), false, 10).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert!(alerts[0].action_taken.starts_with("close_all"));
    }

    #[tokio::test]
    async fn test_drawdown_without_auto_close_is_rebalance_alert() {
        let h = harness(true);
        set_policy(&h, 15.0, false, false);

        let result = walk_equity(&h, &[1000.0, 1200.0, 900.0]).await;
        assert_eq!(result.tier, RiskTier::Action);
        assert!(result.close_report.is_none());
        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.peak_equity, 1200.0);
        assert!((metrics.current_drawdown_pct - 25.0).abs() < 1e-9);

        let alerts = h.store.list_alerts(None, true, 10).unwrap();
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert!(h.gateway.close_requests().is_empty());
    }

    #[tokio::test]
    async fn test_partial_tier_closes_half() {
        let h = harness(true);
        set_policy(&h, 10.0, false, true);
        h.gateway
            .set_positions(WALLET, vec![position("BTC", 2.0, 100.0, None)]);

        let result = walk_equity(&h, &[1000.0, 890.0]).await;
        assert_eq!(result.tier, RiskTier::Partial);
        let closes = h.gateway.close_requests();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].size, 1.0);

        let state = h.gateway.clearinghouse_state(WALLET).await.unwrap();
        assert_eq!(state.positions[0].size, 1.0);
    }

    #[tokio::test]
    async fn test_close_all_without_token_still_alerts() {
        let h = harness(false);
        set_policy(&h, 10.0, true, false);
        h.gateway
            .set_positions(WALLET, vec![position("BTC", 1.0, 100.0, None)]);

        let result = walk_equity(&h, &[1000.0, 800.0]).await;
        assert_eq!(result.tier, RiskTier::Full);
        let report = result.close_report.unwrap();
        assert_eq!(report.closed, 0);
        assert_eq!(report.attempted, 1);
        assert!(result.alert_id.is_some());
        assert!(h.gateway.close_requests().is_empty());
    }

    #[tokio::test]
    async fn test_close_continues_past_failures() {
        let h = harness(true);
        h.gateway.reject_closes_for("ETH", "rejected");
        let positions = vec![
            position("BTC", 1.0, 100.0, None),
            position("ETH", 1.0, 100.0, None),
            position("SOL", 1.0, 100.0, None),
        ];
        let report = h.monitor.close_positions(WALLET, &positions, 1.0).await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.closed, 2);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_liquidation_proximity_is_action() {
        let h = harness(true);
        set_policy(&h, 20.0, false, false);
        h.gateway
            .set_positions(WALLET, vec![position("BTC", 1.0, 100.0, Some(95.0))]);

        let result = walk_equity(&h, &[1000.0]).await;
        assert_eq!(result.tier, RiskTier::Action);
        assert!((result.metrics.unwrap().nearest_liquidation_pct - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_zero_equity_short_circuits_without_blocking_others() {
        let h = harness(true);
        let other = h.store.register_account("0xother", None).unwrap();
        h.gateway.set_equity("0xother", 500.0);

        let summary = h.monitor.run_cycle().await;
        assert_eq!(summary.accounts_checked, 2);
        let first = summary
            .results
            .iter()
            .find(|r| r.account_id == h.account.id)
            .unwrap();
        assert_eq!(first.tier, RiskTier::None);
        assert!(first.metrics.is_none());
        let second = summary
            .results
            .iter()
            .find(|r| r.account_id == other.id)
            .unwrap();
        assert!(second.metrics.is_some());
        assert_eq!(summary.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_observation_feeds_daily_snapshot() {
        let h = harness(true);
        walk_equity(&h, &[1000.0, 1100.0, 1050.0]).await;
        let snap = h
            .store
            .get_snapshot(&h.account.id, Utc::now().date_naive())
            .unwrap()
            .unwrap();
        assert_eq!(snap.opening_equity, 1000.0);
        assert_eq!(snap.high_equity, 1100.0);
        assert_eq!(snap.closing_equity, 1050.0);
    }

    #[tokio::test]
    async fn test_leased_account_skipped() {
        let h = harness(true);
        h.gateway.set_equity(WALLET, 1000.0);
        h.store
            .try_acquire_lease(
                &h.account.id,
                RISK_LEASE_SCOPE,
                "someone-else",
                Duration::from_secs(600),
                Utc::now(),
            )
            .unwrap();
        let summary = h.monitor.run_cycle().await;
        assert_eq!(summary.accounts_skipped_locked, 1);
        assert_eq!(summary.accounts_checked, 0);
    }

    #[tokio::test]
    async fn test_overlapping_cycles_on_one_monitor_do_not_share_account() {
        let h = harness(true);
        walk_equity(&h, &[1200.0]).await;
        set_policy(&h, 15.0, false, true);
        h.gateway.set_equity(WALLET, 900.0);
        h.gateway
            .set_positions(WALLET, vec![position("BTC", 2.0, 100.0, None)]);
        h.gateway.set_read_delay(Duration::from_millis(200));

        let (a, b) = tokio::join!(h.monitor.run_cycle(), h.monitor.run_cycle());

        assert_eq!(a.accounts_skipped_locked + b.accounts_skipped_locked, 1);
        assert_eq!(a.accounts_checked + b.accounts_checked, 1);
        let closes = h.gateway.close_requests();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].size, 1.0);
    }

    #[tokio::test]
    async fn test_slow_closes_finish_and_alert_past_deadline() {
        let h = harness(true);
        walk_equity(&h, &[1000.0]).await;
        set_policy(&h, 10.0, true, false);
        let monitor = RiskMonitor::new(
            h.store.clone(),
            Arc::new(h.gateway.clone()),
            Arc::new(StaticCredentials::from_pairs(&format!("{}=token", WALLET))),
            Duration::from_millis(100),
            Duration::from_secs(600),
        );
        h.gateway.set_equity(WALLET, 800.0);
        h.gateway.set_positions(
            WALLET,
            vec![position("BTC", 1.0, 100.0, None), position("ETH", 1.0, 100.0, None)],
        );
        h.gateway.set_write_delay(Duration::from_millis(80));

        let summary = monitor.run_cycle().await;

        assert_eq!(summary.positions_closed, 2);
        assert_eq!(summary.alerts_created, 1);
        let result = &summary.results[0];
        assert_eq!(result.tier, RiskTier::Full);
        assert_eq!(result.close_report.as_ref().unwrap().closed, 2);

        let alerts = h.store.list_alerts(Some(&h.account.id), false, 10).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].action_taken, "close_all: closed 2/2");
    }
}
