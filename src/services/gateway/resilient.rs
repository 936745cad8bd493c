//! Timeout, retry and candle caching around any [`MarketGateway`].

use super::{GatewayError, MarketGateway};
use crate::services::cache::Cache;
use crate::types::{Candle, ClearinghouseState, CloseRequest, OpenRequest};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Retry settings for idempotent reads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: base * attempt.
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Wraps a gateway with per-call timeouts, read retries and a candle cache.
///
/// Writes are bounded by the timeout but never retried: a close that timed
/// out may still have been filled.
pub struct ResilientGateway<G> {
    inner: G,
    call_timeout: Duration,
    retry: RetryPolicy,
    candles: Cache<Arc<Vec<Candle>>>,
}

impl<G: MarketGateway> ResilientGateway<G> {
    pub fn new(inner: G, call_timeout: Duration, retry: RetryPolicy, candle_ttl: Duration) -> Self {
        Self::with_cache(inner, call_timeout, retry, Cache::new(candle_ttl))
    }

    pub fn with_cache(
        inner: G,
        call_timeout: Duration,
        retry: RetryPolicy,
        candles: Cache<Arc<Vec<Candle>>>,
    ) -> Self {
        Self {
            inner,
            call_timeout,
            retry,
            candles,
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                operation: operation.to_string(),
                after_ms: self.call_timeout.as_millis() as u64,
            }),
        }
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            match self.bounded(operation, call()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} failed ({}), retry {}/{}",
                        operation, e, attempt, self.retry.max_retries
                    );
                    sleep(self.retry.delay_for(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<G: MarketGateway> MarketGateway for ResilientGateway<G> {
    async fn clearinghouse_state(
        &self,
        wallet_ref: &str,
    ) -> Result<ClearinghouseState, GatewayError> {
        self.with_retry("clearinghouseState", || self.inner.clearinghouse_state(wallet_ref))
            .await
    }

    async fn candles(
        &self,
        asset: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        let key = format!("{}:{}:{}", asset.to_uppercase(), interval, limit);
        if let Some(cached) = self.candles.get(&key) {
            debug!("Candle cache hit {}", key);
            return Ok(cached.as_ref().clone());
        }

        let candles = self
            .with_retry("candleSnapshot", || self.inner.candles(asset, interval, limit))
            .await?;
        self.candles.set(key, Arc::new(candles.clone()));
        Ok(candles)
    }

    async fn close_position(
        &self,
        request: &CloseRequest,
        access_token: &str,
    ) -> Result<bool, GatewayError> {
        self.bounded("closePosition", self.inner.close_position(request, access_token))
            .await
    }

    async fn open_position(
        &self,
        request: &OpenRequest,
        access_token: &str,
    ) -> Result<bool, GatewayError> {
        self.bounded("openPosition", self.inner.open_position(request, access_token))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::InMemoryGateway;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_transient_read_is_retried() {
        let inner = InMemoryGateway::new();
        inner.set_equity("0xabc", 1000.0);
        inner.fail_next_reads(2);
        let gw = ResilientGateway::new(inner, Duration::from_secs(1), fast_retry(), Duration::from_secs(60));

        let state = gw.clearinghouse_state("0xabc").await.unwrap();
        assert_eq!(state.equity, 1000.0);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let inner = InMemoryGateway::new();
        inner.set_equity("0xabc", 1000.0);
        inner.fail_next_reads(3);
        let gw = ResilientGateway::new(inner, Duration::from_secs(1), fast_retry(), Duration::from_secs(60));

        assert!(gw.clearinghouse_state("0xabc").await.is_err());
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let inner = InMemoryGateway::new();
        inner.set_equity("0xabc", 1000.0);
        inner.set_read_delay(Duration::from_millis(200));
        let gw = ResilientGateway::new(
            inner,
            Duration::from_millis(20),
            RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            },
            Duration::from_secs(60),
        );

        let err = gw.clearinghouse_state("0xabc").await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_candles_are_cached() {
        let inner = InMemoryGateway::new();
        inner.set_candles(
            "BTC",
            vec![Candle {
                time: 0,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            }],
        );
        let gw = ResilientGateway::new(inner, Duration::from_secs(1), fast_retry(), Duration::from_secs(60));

        gw.candles("BTC", "15m", 50).await.unwrap();
        gw.candles("btc", "15m", 50).await.unwrap();
        assert_eq!(gw.inner().candle_fetches(), 1);
    }
}
