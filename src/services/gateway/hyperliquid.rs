//! HTTP gateway: Hyperliquid-style `/info` reads plus an authenticated order relay.

use super::{interval_millis, GatewayError, MarketGateway};
use crate::types::{Candle, ClearinghouseState, CloseRequest, OpenRequest, Position};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Clearinghouse response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearinghouseResponse {
    margin_summary: MarginSummary,
    #[serde(default)]
    asset_positions: Vec<AssetPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginSummary {
    account_value: String,
}

#[derive(Debug, Deserialize)]
struct AssetPosition {
    position: RawPosition,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    coin: String,
    szi: String,
    entry_px: Option<String>,
    position_value: String,
    unrealized_pnl: String,
    leverage: RawLeverage,
    liquidation_px: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLeverage {
    value: f64,
}

/// Candle snapshot entry.
#[derive(Debug, Deserialize)]
struct RawCandle {
    t: i64,
    o: String,
    h: String,
    l: String,
    c: String,
    v: String,
}

/// Relay response for order writes.
#[derive(Debug, Deserialize)]
struct RelayResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn parse_num(field: &str, value: &str) -> Result<f64, GatewayError> {
    value
        .parse::<f64>()
        .map_err(|_| GatewayError::Decode(format!("{} is not a number: {:?}", field, value)))
}

impl RawPosition {
    fn into_position(self) -> Result<Position, GatewayError> {
        let signed_size = parse_num("szi", &self.szi)?;
        let position_value = parse_num("positionValue", &self.position_value)?;
        let size = signed_size.abs();
        let is_long = signed_size >= 0.0;
        let current_price = if size > 0.0 { position_value / size } else { 0.0 };
        let entry_price = match self.entry_px.as_deref() {
            Some(px) => parse_num("entryPx", px)?,
            None => current_price,
        };
        let liquidation_price = match self.liquidation_px.as_deref() {
            Some(px) => Some(parse_num("liquidationPx", px)?),
            None => None,
        };

        Ok(Position {
            asset: self.coin,
            size,
            entry_price,
            current_price,
            notional: if is_long { position_value } else { -position_value },
            unrealized_pnl: parse_num("unrealizedPnl", &self.unrealized_pnl)?,
            leverage: self.leverage.value,
            liquidation_price,
            is_long,
        })
    }
}

impl RawCandle {
    fn into_candle(self) -> Result<Candle, GatewayError> {
        Ok(Candle {
            time: self.t,
            open: parse_num("o", &self.o)?,
            high: parse_num("h", &self.h)?,
            low: parse_num("l", &self.l)?,
            close: parse_num("c", &self.c)?,
            volume: parse_num("v", &self.v)?,
        })
    }
}

/// Exchange client.
#[derive(Clone)]
pub struct HyperliquidGateway {
    client: Client,
    info_url: String,
    exec_url: String,
    timeout: Duration,
}

impl HyperliquidGateway {
    pub fn new(info_url: impl Into<String>, exec_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent("Vigil/1.0")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            info_url: info_url.into(),
            exec_url: exec_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn map_send_error(&self, operation: &str, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout {
                operation: operation.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }
        } else {
            GatewayError::Http(e)
        }
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(
                "{} returned {}: {}",
                operation,
                status,
                &text[..text.len().min(200)]
            );
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(format!("{}: {}", operation, e)))
    }

    async fn info<T: DeserializeOwned>(
        &self,
        operation: &str,
        body: serde_json::Value,
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .post(&self.info_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(operation, e))?;
        self.read_json(operation, response).await
    }

    async fn relay<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
        access_token: &str,
    ) -> Result<bool, GatewayError> {
        let url = format!("{}{}", self.exec_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(operation, e))?;
        let relay: RelayResponse = self.read_json(operation, response).await?;
        if !relay.success {
            return Err(GatewayError::Rejected(
                relay.error.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }
        Ok(true)
    }
}

#[async_trait]
impl MarketGateway for HyperliquidGateway {
    async fn clearinghouse_state(
        &self,
        wallet_ref: &str,
    ) -> Result<ClearinghouseState, GatewayError> {
        let raw: ClearinghouseResponse = self
            .info(
                "clearinghouseState",
                json!({ "type": "clearinghouseState", "user": wallet_ref }),
            )
            .await?;

        let equity = parse_num("accountValue", &raw.margin_summary.account_value)?;
        let positions = raw
            .asset_positions
            .into_iter()
            .map(|ap| ap.position.into_position())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|p| p.size > 0.0)
            .collect::<Vec<_>>();

        debug!(
            "Clearinghouse {}: equity={:.2} positions={}",
            wallet_ref,
            equity,
            positions.len()
        );
        Ok(ClearinghouseState { equity, positions })
    }

    async fn candles(
        &self,
        asset: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        let step = interval_millis(interval)
            .ok_or_else(|| GatewayError::Decode(format!("unsupported interval {}", interval)))?;
        let end_time = chrono::Utc::now().timestamp_millis();
        let start_time = window_start(end_time, step, limit)?;

        let raw: Vec<RawCandle> = self
            .info(
                "candleSnapshot",
                json!({
                    "type": "candleSnapshot",
                    "req": {
                        "coin": asset,
                        "interval": interval,
                        "startTime": start_time,
                        "endTime": end_time,
                    }
                }),
            )
            .await?;

        let mut candles = raw
            .into_iter()
            .map(RawCandle::into_candle)
            .collect::<Result<Vec<_>, _>>()?;
        candles.sort_by_key(|c| c.time);
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    async fn close_position(
        &self,
        request: &CloseRequest,
        access_token: &str,
    ) -> Result<bool, GatewayError> {
        self.relay("closePosition", "/positions/close", request, access_token)
            .await
    }

    async fn open_position(
        &self,
        request: &OpenRequest,
        access_token: &str,
    ) -> Result<bool, GatewayError> {
        self.relay("openPosition", "/positions/open", request, access_token)
            .await
    }
}

/// Start of a `limit`-candle window ending at `end_time`.
fn window_start(end_time: i64, step: i64, limit: usize) -> Result<i64, GatewayError> {
    i64::try_from(limit)
        .ok()
        .and_then(|limit| step.checked_mul(limit))
        .and_then(|span| end_time.checked_sub(span))
        .ok_or_else(|| {
            GatewayError::Decode(format!("candle window too large: {} x {}ms", limit, step))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clearinghouse_short_position() {
        let json = r#"{
            "marginSummary": {"accountValue": "10250.5", "totalNtlPos": "6000"},
            "assetPositions": [{
                "type": "oneWay",
                "position": {
                    "coin": "ETH",
                    "szi": "-2.0",
                    "entryPx": "3100.0",
                    "positionValue": "6000.0",
                    "unrealizedPnl": "200.0",
                    "leverage": {"type": "cross", "value": 5},
                    "liquidationPx": "3900.0"
                }
            }]
        }"#;
        let raw: ClearinghouseResponse = serde_json::from_str(json).unwrap();
        assert_eq!(raw.margin_summary.account_value, "10250.5");
        let position = raw
            .asset_positions
            .into_iter()
            .next()
            .unwrap()
            .position
            .into_position()
            .unwrap();

        assert!(!position.is_long);
        assert_eq!(position.size, 2.0);
        assert_eq!(position.current_price, 3000.0);
        assert_eq!(position.notional, -6000.0);
        assert_eq!(position.liquidation_price, Some(3900.0));
        assert_eq!(position.leverage, 5.0);
    }

    #[test]
    fn test_parse_position_without_liquidation() {
        let json = r#"{"coin":"BTC","szi":"0.1","entryPx":null,"positionValue":"6500",
            "unrealizedPnl":"0","leverage":{"type":"isolated","value":1},"liquidationPx":null}"#;
        let raw: RawPosition = serde_json::from_str(json).unwrap();
        let p = raw.into_position().unwrap();
        assert!(p.is_long);
        assert_eq!(p.liquidation_price, None);
        assert_eq!(p.entry_price, p.current_price);
    }

    #[test]
    fn test_parse_candle() {
        let json = r#"{"t":1700000000000,"T":1700000899999,"s":"BTC","i":"15m",
            "o":"100.0","c":"101.5","h":"102.0","l":"99.5","v":"12.5","n":42}"#;
        let raw: RawCandle = serde_json::from_str(json).unwrap();
        let c = raw.into_candle().unwrap();
        assert_eq!(c.close, 101.5);
        assert_eq!(c.volume, 12.5);
    }

    #[test]
    fn test_bad_number_is_decode_error() {
        let err = parse_num("szi", "abc").unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
    }

    #[test]
    fn test_window_start_rejects_overflow() {
        assert_eq!(window_start(1_000_000, 60_000, 10).unwrap(), 400_000);
        assert!(matches!(
            window_start(1_000_000, 604_800_000, usize::MAX),
            Err(GatewayError::Decode(_))
        ));
        assert!(matches!(
            window_start(i64::MIN + 1, 60_000, 1),
            Err(GatewayError::Decode(_))
        ));
    }
}
