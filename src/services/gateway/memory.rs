//! In-process gateway backed by maps. Drives tests and `GATEWAY_MODE=memory` dry runs.

use super::{GatewayError, MarketGateway};
use crate::types::{Candle, ClearinghouseState, CloseRequest, OpenRequest, Position};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct Inner {
    states: DashMap<String, ClearinghouseState>,
    candles: DashMap<String, Vec<Candle>>,
    rejected_closes: DashMap<String, String>,
    rejected_opens: DashMap<String, String>,
    pending_read_failures: AtomicU32,
    read_delay_ms: AtomicU64,
    write_delay_ms: AtomicU64,
    panic_on_candles: AtomicBool,
    candle_fetches: AtomicUsize,
    closes: Mutex<Vec<CloseRequest>>,
    opens: Mutex<Vec<OpenRequest>>,
}

/// Cloneable handle; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_equity(&self, wallet_ref: &str, equity: f64) {
        self.inner
            .states
            .entry(wallet_ref.to_lowercase())
            .or_default()
            .equity = equity;
    }

    pub fn set_positions(&self, wallet_ref: &str, positions: Vec<Position>) {
        self.inner
            .states
            .entry(wallet_ref.to_lowercase())
            .or_default()
            .positions = positions;
    }

    /// Move a position's mark price (and notional) without touching anything else.
    pub fn set_price(&self, wallet_ref: &str, asset: &str, price: f64) {
        if let Some(mut state) = self.inner.states.get_mut(&wallet_ref.to_lowercase()) {
            for p in state.positions.iter_mut().filter(|p| p.asset == asset) {
                p.current_price = price;
                let notional = p.size * price;
                p.notional = if p.is_long { notional } else { -notional };
            }
        }
    }

    pub fn set_candles(&self, asset: &str, candles: Vec<Candle>) {
        self.inner.candles.insert(asset.to_uppercase(), candles);
    }

    /// The next `n` reads fail with a transient error.
    pub fn fail_next_reads(&self, n: u32) {
        self.inner.pending_read_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.inner
            .read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.inner
            .write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn reject_closes_for(&self, asset: &str, reason: &str) {
        self.inner
            .rejected_closes
            .insert(asset.to_uppercase(), reason.to_string());
    }

    pub fn reject_opens_for(&self, asset: &str, reason: &str) {
        self.inner
            .rejected_opens
            .insert(asset.to_uppercase(), reason.to_string());
    }

    pub fn panic_on_candles(&self, enabled: bool) {
        self.inner.panic_on_candles.store(enabled, Ordering::SeqCst);
    }

    pub fn close_requests(&self) -> Vec<CloseRequest> {
        lock(&self.inner.closes).clone()
    }

    pub fn open_requests(&self) -> Vec<OpenRequest> {
        lock(&self.inner.opens).clone()
    }

    pub fn candle_fetches(&self) -> usize {
        self.inner.candle_fetches.load(Ordering::SeqCst)
    }

    async fn before_read(&self, operation: &str) -> Result<(), GatewayError> {
        let delay = self.inner.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let failed = self
            .inner
            .pending_read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(GatewayError::Unavailable(format!("{} injected failure", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketGateway for InMemoryGateway {
    async fn clearinghouse_state(
        &self,
        wallet_ref: &str,
    ) -> Result<ClearinghouseState, GatewayError> {
        self.before_read("clearinghouseState").await?;
        Ok(self
            .inner
            .states
            .get(&wallet_ref.to_lowercase())
            .map(|s| s.value().clone())
            .unwrap_or_default())
    }

    async fn candles(
        &self,
        asset: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        if self.inner.panic_on_candles.load(Ordering::SeqCst) {
            panic!("candle feed crashed for {}", asset);
        }
        self.before_read("candleSnapshot").await?;
        self.inner.candle_fetches.fetch_add(1, Ordering::SeqCst);

        let candles = self
            .inner
            .candles
            .get(&asset.to_uppercase())
            .map(|c| c.value().clone())
            .unwrap_or_default();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn close_position(
        &self,
        request: &CloseRequest,
        _access_token: &str,
    ) -> Result<bool, GatewayError> {
        let delay = self.inner.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if let Some(reason) = self.inner.rejected_closes.get(&request.asset.to_uppercase()) {
            return Err(GatewayError::Rejected(reason.value().clone()));
        }
        lock(&self.inner.closes).push(request.clone());

        if let Some(mut state) = self.inner.states.get_mut(&request.wallet_ref.to_lowercase()) {
            for p in state.positions.iter_mut().filter(|p| p.asset == request.asset) {
                let remaining = (p.size - request.size).max(0.0);
                let ratio = if p.size > 0.0 { remaining / p.size } else { 0.0 };
                p.size = remaining;
                p.notional *= ratio;
                p.unrealized_pnl *= ratio;
            }
            state.positions.retain(|p| p.size > 1e-12);
        }
        debug!("Closed {} {} of {}", request.size, request.asset, request.wallet_ref);
        Ok(true)
    }

    async fn open_position(
        &self,
        request: &OpenRequest,
        _access_token: &str,
    ) -> Result<bool, GatewayError> {
        if let Some(reason) = self.inner.rejected_opens.get(&request.asset.to_uppercase()) {
            return Err(GatewayError::Rejected(reason.value().clone()));
        }
        lock(&self.inner.opens).push(request.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(asset: &str, size: f64) -> Position {
        Position {
            asset: asset.to_string(),
            size,
            entry_price: 100.0,
            current_price: 100.0,
            notional: size * 100.0,
            unrealized_pnl: 0.0,
            leverage: 2.0,
            liquidation_price: None,
            is_long: true,
        }
    }

    #[tokio::test]
    async fn test_partial_close_reduces_size() {
        let gw = InMemoryGateway::new();
        gw.set_equity("0xA", 1000.0);
        gw.set_positions("0xA", vec![position("BTC", 2.0)]);

        let state = gw.clearinghouse_state("0xa").await.unwrap();
        let req = CloseRequest::for_position("0xA", &state.positions[0], 0.5);
        assert!(gw.close_position(&req, "tok").await.unwrap());

        let state = gw.clearinghouse_state("0xa").await.unwrap();
        assert_eq!(state.positions[0].size, 1.0);
        assert_eq!(state.positions[0].notional, 100.0);
    }

    #[tokio::test]
    async fn test_full_close_removes_position() {
        let gw = InMemoryGateway::new();
        gw.set_positions("0xA", vec![position("BTC", 2.0), position("ETH", 1.0)]);
        let req = CloseRequest::for_position("0xA", &position("BTC", 2.0), 1.0);
        gw.close_position(&req, "tok").await.unwrap();

        let state = gw.clearinghouse_state("0xA").await.unwrap();
        assert_eq!(state.positions.len(), 1);
        assert_eq!(state.positions[0].asset, "ETH");
        assert_eq!(gw.close_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_close() {
        let gw = InMemoryGateway::new();
        gw.reject_closes_for("BTC", "insufficient margin");
        let req = CloseRequest::for_position("0xA", &position("BTC", 1.0), 1.0);
        let err = gw.close_position(&req, "tok").await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
        assert!(gw.close_requests().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let gw = InMemoryGateway::new();
        gw.fail_next_reads(1);
        assert!(gw.clearinghouse_state("0xA").await.is_err());
        assert!(gw.clearinghouse_state("0xA").await.is_ok());
    }
}
