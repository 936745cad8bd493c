//! SQLite run ledger.
//!
//! Durable state for the engine:
//! - Accounts (equity, peak, drawdown)
//! - Policies (append-only, latest row is effective)
//! - Strategy definitions and the append-only strategy run log
//! - Risk alerts and daily risk snapshots
//! - Trade executions (for the daily notional cap)
//! - Trailing-stop peaks (versioned for compare-and-swap)
//! - Per-account cycle leases
//!
//! Timestamps are stored as Unix milliseconds.

use crate::services::risk_metrics::update_peak;
use crate::types::{
    Account, AlertSeverity, AlertType, DailySnapshot, Policy, RiskAlert, RunStatus,
    StrategyDefinition, StrategyRun,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Write conflict: {0}")]
    Conflict(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Versioned trailing-stop peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakRecord {
    pub peak_pnl_pct: f64,
    pub version: i64,
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// SQLite store for the run ledger.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the ledger at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite ledger initialized");
        Ok(store)
    }

    /// Create an in-memory ledger (for testing).
    pub fn new_in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite ledger initialized");
        Ok(store)
    }

    /// A panicked holder does not corrupt SQLite state, so recover the guard.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("Ledger mutex was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn init_schema(&self) -> LedgerResult<()> {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                wallet_ref TEXT UNIQUE NOT NULL,
                label TEXT,
                peak_equity REAL NOT NULL DEFAULT 0,
                current_drawdown_pct REAL NOT NULL DEFAULT 0,
                last_equity REAL NOT NULL DEFAULT 0,
                last_equity_update INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS policies (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                policy_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_policies_account
                ON policies(account_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS strategies (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                strategy_type TEXT NOT NULL,
                params_json TEXT NOT NULL DEFAULT '{}',
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_strategies_account ON strategies(account_id, active);

            CREATE TABLE IF NOT EXISTS strategy_runs (
                id TEXT PRIMARY KEY,
                strategy_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                status TEXT NOT NULL,
                result_json TEXT,
                error TEXT,
                started_at INTEGER NOT NULL,
                completed_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_runs_strategy
                ON strategy_runs(strategy_id, started_at DESC);
            CREATE INDEX IF NOT EXISTS idx_runs_status ON strategy_runs(status);

            CREATE TABLE IF NOT EXISTS risk_alerts (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                threshold_value REAL NOT NULL,
                actual_value REAL NOT NULL,
                message TEXT NOT NULL,
                action_taken TEXT NOT NULL,
                acknowledged INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                resolved_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_account
                ON risk_alerts(account_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS daily_risk_snapshots (
                account_id TEXT NOT NULL,
                date TEXT NOT NULL,
                opening_equity REAL NOT NULL,
                closing_equity REAL NOT NULL,
                high_equity REAL NOT NULL,
                low_equity REAL NOT NULL,
                daily_pnl REAL NOT NULL,
                max_drawdown_pct REAL NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (account_id, date)
            );

            CREATE TABLE IF NOT EXISTS trade_executions (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                assets TEXT NOT NULL,
                notional REAL NOT NULL,
                day TEXT NOT NULL,
                executed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_account_day
                ON trade_executions(account_id, day);

            CREATE TABLE IF NOT EXISTS peak_trackers (
                account_id TEXT NOT NULL,
                asset TEXT NOT NULL,
                peak_pnl_pct REAL NOT NULL,
                version INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (account_id, asset)
            );

            CREATE TABLE IF NOT EXISTS account_leases (
                account_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                holder TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (account_id, scope)
            );",
        )?;
        info!("SQLite schema initialized");
        Ok(())
    }

    // ========== Account Methods ==========

    fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
        Ok(Account {
            id: row.get(0)?,
            wallet_ref: row.get(1)?,
            label: row.get(2)?,
            peak_equity: row.get(3)?,
            current_drawdown_pct: row.get(4)?,
            last_equity: row.get(5)?,
            last_equity_update: row.get::<_, Option<i64>>(6)?.map(from_millis),
            created_at: from_millis(row.get(7)?),
        })
    }

    const ACCOUNT_COLUMNS: &'static str = "id, wallet_ref, label, peak_equity, current_drawdown_pct,
         last_equity, last_equity_update, created_at";

    /// Register a wallet, or return the existing account for it.
    pub fn register_account(&self, wallet_ref: &str, label: Option<&str>) -> LedgerResult<Account> {
        if let Some(existing) = self.account_by_wallet(wallet_ref)? {
            if let Some(label) = label {
                self.conn().execute(
                    "UPDATE accounts SET label = ?1 WHERE id = ?2",
                    params![label, existing.id],
                )?;
                return Ok(Account {
                    label: Some(label.to_string()),
                    ..existing
                });
            }
            return Ok(existing);
        }

        let account = Account::new(wallet_ref, label.map(str::to_string));
        self.conn().execute(
            "INSERT INTO accounts (id, wallet_ref, label, peak_equity, current_drawdown_pct,
                 last_equity, last_equity_update, created_at)
             VALUES (?1, ?2, ?3, 0, 0, 0, NULL, ?4)",
            params![
                account.id,
                account.wallet_ref,
                account.label,
                to_millis(account.created_at)
            ],
        )?;
        info!("Registered account {} for {}", account.id, wallet_ref);
        Ok(account)
    }

    pub fn get_account(&self, id: &str) -> LedgerResult<Option<Account>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM accounts WHERE id = ?1", Self::ACCOUNT_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::account_from_row)
            .optional()?)
    }

    pub fn account_by_wallet(&self, wallet_ref: &str) -> LedgerResult<Option<Account>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM accounts WHERE wallet_ref = ?1",
            Self::ACCOUNT_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![wallet_ref], Self::account_from_row)
            .optional()?)
    }

    pub fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM accounts ORDER BY created_at, id",
            Self::ACCOUNT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::account_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Fold a new equity observation into the account. Peak equity never decreases.
    pub fn record_equity(
        &self,
        account_id: &str,
        equity: f64,
        at: DateTime<Utc>,
    ) -> LedgerResult<Option<Account>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let prior: Option<f64> = tx
            .query_row(
                "SELECT peak_equity FROM accounts WHERE id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(prior_peak) = prior else {
            return Ok(None);
        };

        let (peak, drawdown) = update_peak(prior_peak, equity);
        tx.execute(
            "UPDATE accounts
             SET peak_equity = MAX(peak_equity, ?1), current_drawdown_pct = ?2,
                 last_equity = ?3, last_equity_update = ?4
             WHERE id = ?5",
            params![peak, drawdown, equity, to_millis(at), account_id],
        )?;
        let sql = format!("SELECT {} FROM accounts WHERE id = ?1", Self::ACCOUNT_COLUMNS);
        let account = tx
            .query_row(&sql, params![account_id], Self::account_from_row)
            .optional()?;
        tx.commit()?;
        Ok(account)
    }

    // ========== Policy Methods ==========

    /// Append a policy version. The newest row becomes effective.
    pub fn insert_policy(&self, policy: &Policy) -> LedgerResult<()> {
        let json = serde_json::to_string(policy)?;
        self.conn().execute(
            "INSERT INTO policies (id, account_id, policy_json, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                policy.id,
                policy.account_id,
                json,
                to_millis(policy.created_at)
            ],
        )?;
        debug!("Stored policy {} for account {}", policy.id, policy.account_id);
        Ok(())
    }

    pub fn latest_policy(&self, account_id: &str) -> LedgerResult<Option<Policy>> {
        let json: Option<String> = self
            .conn()
            .query_row(
                "SELECT policy_json FROM policies WHERE account_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![account_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(LedgerError::from)
    }

    /// Latest policy, or the conservative default when none was ever stored.
    pub fn effective_policy(&self, account_id: &str) -> LedgerResult<Policy> {
        Ok(self
            .latest_policy(account_id)?
            .unwrap_or_else(|| Policy::default_for(account_id)))
    }

    // ========== Strategy Methods ==========

    fn strategy_from_row(row: &Row<'_>) -> rusqlite::Result<StrategyDefinition> {
        let params_json: String = row.get(3)?;
        Ok(StrategyDefinition {
            id: row.get(0)?,
            account_id: row.get(1)?,
            strategy_type: row.get(2)?,
            params: serde_json::from_str(&params_json).unwrap_or_else(|_| serde_json::json!({})),
            active: row.get::<_, i64>(4)? != 0,
            created_at: from_millis(row.get(5)?),
            updated_at: from_millis(row.get(6)?),
        })
    }

    const STRATEGY_COLUMNS: &'static str =
        "id, account_id, strategy_type, params_json, active, created_at, updated_at";

    pub fn insert_strategy(&self, strategy: &StrategyDefinition) -> LedgerResult<()> {
        let params_json = serde_json::to_string(&strategy.params)?;
        self.conn().execute(
            "INSERT INTO strategies (id, account_id, strategy_type, params_json, active,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                strategy.id,
                strategy.account_id,
                strategy.strategy_type,
                params_json,
                strategy.active as i64,
                to_millis(strategy.created_at),
                to_millis(strategy.updated_at)
            ],
        )?;
        Ok(())
    }

    pub fn get_strategy(&self, id: &str) -> LedgerResult<Option<StrategyDefinition>> {
        let sql = format!(
            "SELECT {} FROM strategies WHERE id = ?1",
            Self::STRATEGY_COLUMNS
        );
        Ok(self
            .conn()
            .query_row(&sql, params![id], Self::strategy_from_row)
            .optional()?)
    }

    pub fn list_strategies(&self, account_id: &str) -> LedgerResult<Vec<StrategyDefinition>> {
        self.query_strategies(account_id, false)
    }

    pub fn active_strategies(&self, account_id: &str) -> LedgerResult<Vec<StrategyDefinition>> {
        self.query_strategies(account_id, true)
    }

    fn query_strategies(
        &self,
        account_id: &str,
        active_only: bool,
    ) -> LedgerResult<Vec<StrategyDefinition>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM strategies WHERE account_id = ?1 {} ORDER BY created_at, rowid",
            Self::STRATEGY_COLUMNS,
            if active_only { "AND active = 1" } else { "" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![account_id], Self::strategy_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Returns false when the strategy does not exist.
    pub fn set_strategy_active(&self, id: &str, active: bool) -> LedgerResult<bool> {
        let changed = self.conn().execute(
            "UPDATE strategies SET active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active as i64, to_millis(Utc::now()), id],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_strategy(&self, id: &str) -> LedgerResult<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM strategies WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Accounts with at least one active strategy.
    pub fn accounts_with_active_strategies(&self) -> LedgerResult<Vec<Account>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM accounts a WHERE EXISTS (
                 SELECT 1 FROM strategies s WHERE s.account_id = a.id AND s.active = 1)
             ORDER BY a.created_at, a.id",
            Self::ACCOUNT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::account_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ========== Strategy Run Methods ==========

    fn run_from_row(row: &Row<'_>) -> rusqlite::Result<StrategyRun> {
        let status: String = row.get(3)?;
        let result_json: Option<String> = row.get(4)?;
        Ok(StrategyRun {
            id: row.get(0)?,
            strategy_id: row.get(1)?,
            account_id: row.get(2)?,
            status: RunStatus::parse(&status),
            result: result_json.and_then(|j| serde_json::from_str(&j).ok()),
            error: row.get(5)?,
            started_at: from_millis(row.get(6)?),
            completed_at: row.get::<_, Option<i64>>(7)?.map(from_millis),
        })
    }

    const RUN_COLUMNS: &'static str =
        "id, strategy_id, account_id, status, result_json, error, started_at, completed_at";

    /// Record the start of an execution attempt.
    pub fn start_run(&self, strategy_id: &str, account_id: &str) -> LedgerResult<StrategyRun> {
        let run = StrategyRun {
            id: Uuid::new_v4().to_string(),
            strategy_id: strategy_id.to_string(),
            account_id: account_id.to_string(),
            status: RunStatus::Running,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.conn().execute(
            "INSERT INTO strategy_runs (id, strategy_id, account_id, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.id,
                run.strategy_id,
                run.account_id,
                run.status.as_str(),
                to_millis(run.started_at)
            ],
        )?;
        Ok(run)
    }

    /// Move a running run to its terminal state. A run is finalized at most once;
    /// returns false if it was already terminal.
    pub fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> LedgerResult<bool> {
        if !status.is_terminal() {
            return Err(LedgerError::Conflict(format!(
                "run {} cannot be finished as {}",
                run_id,
                status.as_str()
            )));
        }
        let result_json = result.map(serde_json::to_string).transpose()?;
        let changed = self.conn().execute(
            "UPDATE strategy_runs SET status = ?1, result_json = ?2, error = ?3, completed_at = ?4
             WHERE id = ?5 AND status = 'running'",
            params![
                status.as_str(),
                result_json,
                error,
                to_millis(Utc::now()),
                run_id
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_run(&self, run_id: &str) -> LedgerResult<Option<StrategyRun>> {
        let sql = format!("SELECT {} FROM strategy_runs WHERE id = ?1", Self::RUN_COLUMNS);
        Ok(self
            .conn()
            .query_row(&sql, params![run_id], Self::run_from_row)
            .optional()?)
    }

    /// Most recent runs for a strategy, newest first.
    pub fn list_runs(&self, strategy_id: &str, limit: usize) -> LedgerResult<Vec<StrategyRun>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM strategy_runs WHERE strategy_id = ?1
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
            Self::RUN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![strategy_id, limit as i64], Self::run_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Finalize runs a previous process left in `running`.
    pub fn fail_dangling_runs(&self, reason: &str) -> LedgerResult<usize> {
        let count = self.conn().execute(
            "UPDATE strategy_runs SET status = 'failed', error = ?1, completed_at = ?2
             WHERE status = 'running'",
            params![reason, to_millis(Utc::now())],
        )?;
        if count > 0 {
            warn!("Marked {} dangling strategy runs as failed", count);
        }
        Ok(count)
    }

    // ========== Alert Methods ==========

    fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<RiskAlert> {
        let alert_type: String = row.get(2)?;
        let severity: String = row.get(3)?;
        Ok(RiskAlert {
            id: row.get(0)?,
            account_id: row.get(1)?,
            alert_type: AlertType::parse(&alert_type),
            severity: AlertSeverity::parse(&severity),
            threshold_value: row.get(4)?,
            actual_value: row.get(5)?,
            message: row.get(6)?,
            action_taken: row.get(7)?,
            acknowledged: row.get::<_, i64>(8)? != 0,
            created_at: from_millis(row.get(9)?),
            resolved_at: row.get::<_, Option<i64>>(10)?.map(from_millis),
        })
    }

    pub fn insert_alert(&self, alert: &RiskAlert) -> LedgerResult<()> {
        self.conn().execute(
            "INSERT INTO risk_alerts (id, account_id, alert_type, severity, threshold_value,
                 actual_value, message, action_taken, acknowledged, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                alert.id,
                alert.account_id,
                alert.alert_type.as_str(),
                alert.severity.as_str(),
                alert.threshold_value,
                alert.actual_value,
                alert.message,
                alert.action_taken,
                alert.acknowledged as i64,
                to_millis(alert.created_at),
                alert.resolved_at.map(to_millis)
            ],
        )?;
        Ok(())
    }

    /// Alerts, newest first. Optionally scoped to an account and to open alerts.
    pub fn list_alerts(
        &self,
        account_id: Option<&str>,
        unacknowledged_only: bool,
        limit: usize,
    ) -> LedgerResult<Vec<RiskAlert>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, account_id, alert_type, severity, threshold_value, actual_value,
                    message, action_taken, acknowledged, created_at, resolved_at
             FROM risk_alerts
             WHERE (?1 IS NULL OR account_id = ?1) AND (?2 = 0 OR acknowledged = 0)
             ORDER BY created_at DESC, rowid DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![account_id, unacknowledged_only as i64, limit as i64],
            Self::alert_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn acknowledge_alert(&self, id: &str) -> LedgerResult<bool> {
        let changed = self.conn().execute(
            "UPDATE risk_alerts SET acknowledged = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(changed > 0)
    }

    /// Permanently delete acknowledged alerts created before `cutoff`.
    pub fn delete_acknowledged_before(&self, cutoff: DateTime<Utc>) -> LedgerResult<usize> {
        let count = self.conn().execute(
            "DELETE FROM risk_alerts WHERE acknowledged = 1 AND created_at < ?1",
            params![to_millis(cutoff)],
        )?;
        if count > 0 {
            info!("Deleted {} acknowledged alerts", count);
        }
        Ok(count)
    }

    /// Resolve open info/warning alerts created before `cutoff`.
    pub fn auto_resolve_before(&self, cutoff: DateTime<Utc>) -> LedgerResult<usize> {
        let count = self.conn().execute(
            "UPDATE risk_alerts SET resolved_at = ?1
             WHERE acknowledged = 0 AND resolved_at IS NULL
               AND severity IN ('info', 'warning') AND created_at < ?2",
            params![to_millis(Utc::now()), to_millis(cutoff)],
        )?;
        if count > 0 {
            info!("Auto-resolved {} stale alerts", count);
        }
        Ok(count)
    }

    // ========== Daily Snapshot Methods ==========

    fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<DailySnapshot> {
        let date: String = row.get(1)?;
        Ok(DailySnapshot {
            account_id: row.get(0)?,
            date: NaiveDate::parse_from_str(&date, "%Y-%m-%d").unwrap_or_default(),
            opening_equity: row.get(2)?,
            closing_equity: row.get(3)?,
            high_equity: row.get(4)?,
            low_equity: row.get(5)?,
            daily_pnl: row.get(6)?,
            max_drawdown_pct: row.get(7)?,
            updated_at: from_millis(row.get(8)?),
        })
    }

    /// Fold one equity observation into the day's snapshot row.
    ///
    /// The first observation of a day sets the opening equity; later ones move
    /// closing/high/low and the day's worst drawdown.
    pub fn record_equity_observation(
        &self,
        account_id: &str,
        date: NaiveDate,
        equity: f64,
        drawdown_pct: f64,
        at: DateTime<Utc>,
    ) -> LedgerResult<DailySnapshot> {
        let conn = self.conn();
        let day = day_key(date);
        conn.execute(
            "INSERT INTO daily_risk_snapshots (account_id, date, opening_equity, closing_equity,
                 high_equity, low_equity, daily_pnl, max_drawdown_pct, updated_at)
             VALUES (?1, ?2, ?3, ?3, ?3, ?3, 0, ?4, ?5)
             ON CONFLICT(account_id, date) DO UPDATE SET
                 closing_equity = excluded.closing_equity,
                 high_equity = MAX(high_equity, excluded.closing_equity),
                 low_equity = MIN(low_equity, excluded.closing_equity),
                 daily_pnl = excluded.closing_equity - opening_equity,
                 max_drawdown_pct = MAX(max_drawdown_pct, excluded.max_drawdown_pct),
                 updated_at = excluded.updated_at",
            params![account_id, day, equity, drawdown_pct, to_millis(at)],
        )?;
        Ok(conn.query_row(
            "SELECT account_id, date, opening_equity, closing_equity, high_equity, low_equity,
                    daily_pnl, max_drawdown_pct, updated_at
             FROM daily_risk_snapshots WHERE account_id = ?1 AND date = ?2",
            params![account_id, day],
            Self::snapshot_from_row,
        )?)
    }

    pub fn get_snapshot(
        &self,
        account_id: &str,
        date: NaiveDate,
    ) -> LedgerResult<Option<DailySnapshot>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT account_id, date, opening_equity, closing_equity, high_equity, low_equity,
                        daily_pnl, max_drawdown_pct, updated_at
                 FROM daily_risk_snapshots WHERE account_id = ?1 AND date = ?2",
                params![account_id, day_key(date)],
                Self::snapshot_from_row,
            )
            .optional()?)
    }

    /// Most recent snapshots for an account, newest first.
    pub fn list_snapshots(&self, account_id: &str, limit: usize) -> LedgerResult<Vec<DailySnapshot>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT account_id, date, opening_equity, closing_equity, high_equity, low_equity,
                    daily_pnl, max_drawdown_pct, updated_at
             FROM daily_risk_snapshots WHERE account_id = ?1
             ORDER BY date DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![account_id, limit as i64], Self::snapshot_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ========== Trade Methods ==========

    /// Record an executed trade's notional against the day's cap.
    pub fn record_trade(
        &self,
        account_id: &str,
        assets: &[String],
        notional: f64,
        at: DateTime<Utc>,
    ) -> LedgerResult<String> {
        let id = Uuid::new_v4().to_string();
        self.conn().execute(
            "INSERT INTO trade_executions (id, account_id, assets, notional, day, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                account_id,
                assets.join(","),
                notional,
                day_key(at.date_naive()),
                to_millis(at)
            ],
        )?;
        Ok(id)
    }

    /// Notional already executed on `day` (UTC).
    pub fn today_notional(&self, account_id: &str, day: NaiveDate) -> LedgerResult<f64> {
        Ok(self.conn().query_row(
            "SELECT COALESCE(SUM(notional), 0) FROM trade_executions
             WHERE account_id = ?1 AND day = ?2",
            params![account_id, day_key(day)],
            |row| row.get(0),
        )?)
    }

    // ========== Peak Tracker Methods ==========

    pub fn get_peak(&self, account_id: &str, asset: &str) -> LedgerResult<Option<PeakRecord>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT peak_pnl_pct, version FROM peak_trackers
                 WHERE account_id = ?1 AND asset = ?2",
                params![account_id, asset],
                |row| {
                    Ok(PeakRecord {
                        peak_pnl_pct: row.get(0)?,
                        version: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    /// Write `peak` only if the row is still at `expected_version`
    /// (`None` = the row must not exist yet). Returns false on conflict.
    pub fn compare_and_set_peak(
        &self,
        account_id: &str,
        asset: &str,
        expected_version: Option<i64>,
        peak: f64,
    ) -> LedgerResult<bool> {
        let now = to_millis(Utc::now());
        let changed = match expected_version {
            None => self.conn().execute(
                "INSERT OR IGNORE INTO peak_trackers (account_id, asset, peak_pnl_pct, version, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                params![account_id, asset, peak, now],
            )?,
            Some(version) => self.conn().execute(
                "UPDATE peak_trackers SET peak_pnl_pct = ?1, version = version + 1, updated_at = ?2
                 WHERE account_id = ?3 AND asset = ?4 AND version = ?5",
                params![peak, now, account_id, asset, version],
            )?,
        };
        Ok(changed == 1)
    }

    pub fn clear_peak(&self, account_id: &str, asset: &str) -> LedgerResult<bool> {
        let changed = self.conn().execute(
            "DELETE FROM peak_trackers WHERE account_id = ?1 AND asset = ?2",
            params![account_id, asset],
        )?;
        Ok(changed > 0)
    }

    /// Drop peaks for assets that are no longer open.
    pub fn retain_peaks(&self, account_id: &str, open_assets: &[String]) -> LedgerResult<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let tracked: Vec<String> = {
            let mut stmt = tx.prepare("SELECT asset FROM peak_trackers WHERE account_id = ?1")?;
            let rows = stmt.query_map(params![account_id], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        let mut removed = 0;
        for asset in tracked.iter().filter(|a| !open_assets.contains(a)) {
            removed += tx.execute(
                "DELETE FROM peak_trackers WHERE account_id = ?1 AND asset = ?2",
                params![account_id, asset],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    // ========== Lease Methods ==========

    /// Acquire (or renew) the `(account, scope)` lease for `holder`.
    /// Fails while another holder's lease is unexpired.
    pub fn try_acquire_lease(
        &self,
        account_id: &str,
        scope: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let now_ms = to_millis(now);
        let expires_at = now_ms + ttl.as_millis() as i64;
        let changed = self.conn().execute(
            "INSERT INTO account_leases (account_id, scope, holder, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account_id, scope) DO UPDATE SET
                 holder = excluded.holder, expires_at = excluded.expires_at
             WHERE account_leases.expires_at <= ?5 OR account_leases.holder = excluded.holder",
            params![account_id, scope, holder, expires_at, now_ms],
        )?;
        Ok(changed == 1)
    }

    pub fn release_lease(&self, account_id: &str, scope: &str, holder: &str) -> LedgerResult<bool> {
        let changed = self.conn().execute(
            "DELETE FROM account_leases WHERE account_id = ?1 AND scope = ?2 AND holder = ?3",
            params![account_id, scope, holder],
        )?;
        Ok(changed > 0)
    }
}
