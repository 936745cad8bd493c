//! Daily equity snapshots and alert retention.

use crate::services::gateway::MarketGateway;
use crate::services::sqlite_store::SqliteStore;
use crate::types::SnapshotCycleSummary;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// How long acknowledged and stale alerts are kept.
#[derive(Debug, Clone, Copy)]
pub struct RetentionSettings {
    /// Acknowledged alerts older than this are deleted.
    pub delete_acknowledged_after_days: i64,
    /// Unacknowledged info/warning alerts older than this are auto-resolved.
    pub auto_resolve_after_days: i64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            delete_acknowledged_after_days: 30,
            auto_resolve_after_days: 7,
        }
    }
}

pub struct DailySnapshotService {
    store: Arc<SqliteStore>,
    gateway: Arc<dyn MarketGateway>,
    retention: RetentionSettings,
}

impl DailySnapshotService {
    pub fn new(
        store: Arc<SqliteStore>,
        gateway: Arc<dyn MarketGateway>,
        retention: RetentionSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            retention,
        }
    }

    /// Record today's equity for every account, then apply alert retention.
    pub async fn run_cycle(&self) -> SnapshotCycleSummary {
        let started_at = Utc::now();
        let mut summary = SnapshotCycleSummary {
            started_at,
            finished_at: started_at,
            accounts_snapshotted: 0,
            alerts_deleted: 0,
            alerts_resolved: 0,
            errors: Vec::new(),
        };

        match self.store.list_accounts() {
            Ok(accounts) => {
                for account in accounts {
                    let equity = match self.gateway.clearinghouse_state(&account.wallet_ref).await
                    {
                        Ok(state) => state.equity,
                        Err(e) => {
                            summary
                                .errors
                                .push(format!("Account {}: {}", account.id, e));
                            continue;
                        }
                    };
                    if !(equity.is_finite() && equity > 0.0) {
                        continue;
                    }

                    let now = Utc::now();
                    let drawdown = match self.store.record_equity(&account.id, equity, now) {
                        Ok(Some(updated)) => updated.current_drawdown_pct,
                        Ok(None) => continue,
                        Err(e) => {
                            summary
                                .errors
                                .push(format!("Account {}: {}", account.id, e));
                            continue;
                        }
                    };
                    match self.store.record_equity_observation(
                        &account.id,
                        now.date_naive(),
                        equity,
                        drawdown,
                        now,
                    ) {
                        Ok(_) => summary.accounts_snapshotted += 1,
                        Err(e) => summary
                            .errors
                            .push(format!("Account {}: {}", account.id, e)),
                    }
                }
            }
            Err(e) => summary
                .errors
                .push(format!("Failed to list accounts: {}", e)),
        }

        let now = Utc::now();
        let delete_cutoff =
            now - ChronoDuration::days(self.retention.delete_acknowledged_after_days);
        match self.store.delete_acknowledged_before(delete_cutoff) {
            Ok(n) => summary.alerts_deleted = n,
            Err(e) => {
                warn!("Alert cleanup failed: {}", e);
                summary.errors.push(format!("Alert cleanup failed: {}", e));
            }
        }
        let resolve_cutoff = now - ChronoDuration::days(self.retention.auto_resolve_after_days);
        match self.store.auto_resolve_before(resolve_cutoff) {
            Ok(n) => summary.alerts_resolved = n,
            Err(e) => {
                warn!("Alert auto-resolve failed: {}", e);
                summary.errors.push(format!("Alert auto-resolve failed: {}", e));
            }
        }

        summary.finished_at = Utc::now();
        info!(
            "Daily snapshot: {} accounts, {} alerts deleted, {} resolved, {} errors",
            summary.accounts_snapshotted,
            summary.alerts_deleted,
            summary.alerts_resolved,
            summary.errors.len()
        );
        summary
    }
}
