//! Durable trailing-stop peaks keyed by (account, asset).
//!
//! Read-modify-write against the ledger under a version check, so restarts
//! and concurrent engine instances observe one consistent peak.

use crate::services::sqlite_store::{LedgerError, LedgerResult, SqliteStore};
use std::sync::Arc;
use tracing::debug;

/// Attempts before giving up on a contended peak.
const MAX_CAS_ATTEMPTS: usize = 5;

pub struct PeakTracker {
    store: Arc<SqliteStore>,
}

impl PeakTracker {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Fold a P&L observation in and return the running peak.
    ///
    /// The first observation seeds the peak; afterwards it only ratchets up.
    pub fn observe(&self, account_id: &str, asset: &str, pnl_pct: f64) -> LedgerResult<f64> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.get_peak(account_id, asset)?;
            let (expected, next) = match current {
                None => (None, pnl_pct),
                Some(rec) if pnl_pct <= rec.peak_pnl_pct => return Ok(rec.peak_pnl_pct),
                Some(rec) => (Some(rec.version), pnl_pct),
            };
            if self
                .store
                .compare_and_set_peak(account_id, asset, expected, next)?
            {
                debug!("Peak {}/{} -> {:.2}%", account_id, asset, next);
                return Ok(next);
            }
        }
        Err(LedgerError::Conflict(format!(
            "peak for {}/{} kept changing",
            account_id, asset
        )))
    }

    pub fn peak(&self, account_id: &str, asset: &str) -> LedgerResult<Option<f64>> {
        Ok(self
            .store
            .get_peak(account_id, asset)?
            .map(|rec| rec.peak_pnl_pct))
    }

    /// Forget the peak once the position is closed.
    pub fn clear(&self, account_id: &str, asset: &str) -> LedgerResult<()> {
        self.store.clear_peak(account_id, asset)?;
        Ok(())
    }

    /// Forget peaks of positions that are no longer open.
    pub fn retain_open(&self, account_id: &str, open_assets: &[String]) -> LedgerResult<usize> {
        self.store.retain_peaks(account_id, open_assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PeakTracker {
        PeakTracker::new(Arc::new(SqliteStore::new_in_memory().unwrap()))
    }

    #[test]
    fn test_peak_only_ratchets_up() {
        let t = tracker();
        assert_eq!(t.observe("a", "BTC", 1.0).unwrap(), 1.0);
        assert_eq!(t.observe("a", "BTC", 3.0).unwrap(), 3.0);
        assert_eq!(t.observe("a", "BTC", 0.5).unwrap(), 3.0);
        assert_eq!(t.peak("a", "BTC").unwrap(), Some(3.0));
    }

    #[test]
    fn test_first_observation_seeds_negative_peak() {
        let t = tracker();
        assert_eq!(t.observe("a", "ETH", -2.0).unwrap(), -2.0);
        assert_eq!(t.observe("a", "ETH", -1.0).unwrap(), -1.0);
    }

    #[test]
    fn test_clear_resets() {
        let t = tracker();
        t.observe("a", "BTC", 5.0).unwrap();
        t.clear("a", "BTC").unwrap();
        assert_eq!(t.peak("a", "BTC").unwrap(), None);
        assert_eq!(t.observe("a", "BTC", 1.0).unwrap(), 1.0);
    }

    #[test]
    fn test_peaks_survive_a_new_tracker() {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        PeakTracker::new(store.clone()).observe("a", "BTC", 4.0).unwrap();
        assert_eq!(PeakTracker::new(store).peak("a", "BTC").unwrap(), Some(4.0));
    }

    #[test]
    fn test_keys_are_per_account() {
        let t = tracker();
        t.observe("a", "BTC", 4.0).unwrap();
        assert_eq!(t.observe("b", "BTC", 1.0).unwrap(), 1.0);
    }
}
