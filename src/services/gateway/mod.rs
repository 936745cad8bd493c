//! Market/Position Gateway
//!
//! Read access to clearinghouse state and candles, authenticated writes for
//! opening and closing positions. The exchange itself is a black box.

pub mod credentials;
pub mod hyperliquid;
pub mod memory;
pub mod resilient;

pub use credentials::{CredentialProvider, StaticCredentials};
pub use hyperliquid::HyperliquidGateway;
pub use memory::InMemoryGateway;
pub use resilient::{ResilientGateway, RetryPolicy};

use crate::types::{Candle, ClearinghouseState, CloseRequest, OpenRequest};
use async_trait::async_trait;
use thiserror::Error;

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },
    #[error("Exchange API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Malformed response: {0}")]
    Decode(String),
    #[error("Order rejected: {0}")]
    Rejected(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Transient failures may succeed on retry; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout { .. } | GatewayError::Unavailable(_) => true,
            GatewayError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            GatewayError::Api { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Decode(_) | GatewayError::Rejected(_) => false,
        }
    }
}

/// Exchange access used by the risk monitor, strategies and trade executor.
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Equity and open positions for a wallet.
    async fn clearinghouse_state(&self, wallet_ref: &str)
        -> Result<ClearinghouseState, GatewayError>;

    /// Most recent `limit` candles, oldest first.
    async fn candles(
        &self,
        asset: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError>;

    /// Reduce-only close. Returns whether the exchange accepted the order.
    async fn close_position(
        &self,
        request: &CloseRequest,
        access_token: &str,
    ) -> Result<bool, GatewayError>;

    /// Market open. Returns whether the exchange accepted the order.
    async fn open_position(
        &self,
        request: &OpenRequest,
        access_token: &str,
    ) -> Result<bool, GatewayError>;
}

/// Milliseconds per candle interval ("1m", "15m", "1h", "1d", ...).
pub fn interval_millis(interval: &str) -> Option<i64> {
    if !interval.is_ascii() {
        return None;
    }
    let (num, unit) = interval.split_at(interval.len().checked_sub(1)?);
    let n: i64 = num.parse().ok()?;
    let unit_ms = match unit {
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => return None,
    };
    n.checked_mul(unit_ms).filter(|ms| *ms > 0)
}
