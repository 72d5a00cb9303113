//! Swap-service client (FixedFloat-style fixed-rate API)
//!
//! Creates stablecoin -> destination-asset orders and polls their status.
//! Requests are JSON POSTs signed with an HMAC-SHA256 of the body. Pair
//! limits are cached so the tick loop does not hammer the API.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use moka::future::Cache;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::services::networks::NetworkConfig;

type HmacSha256 = Hmac<Sha256>;

/// Pair-limit cache TTL
const LIMITS_CACHE_TTL_SECS: u64 = 600;

/// API codes the service uses for "pair temporarily unavailable"
const UNAVAILABLE_CODES: &[i64] = &[311, 312];

/// Swap-service currency codes per registry network key
fn source_ccy(network_key: &str) -> String {
    network_key.replace('-', "")
}

#[derive(Debug, Clone)]
pub enum SwapError {
    /// Transport failure or server-side error; safe to retry next tick
    Transient(String),
    /// Pair temporarily disabled on the service side
    Unavailable(String),
    /// The service rejected the request (limits, bad params); user must act
    Rejected(String),
}

impl SwapError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SwapError::Transient(_) | SwapError::Unavailable(_))
    }
}

impl std::fmt::Display for SwapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapError::Transient(msg) => write!(f, "Swap service unreachable: {}", msg),
            SwapError::Unavailable(msg) => write!(f, "Swap pair unavailable: {}", msg),
            SwapError::Rejected(msg) => write!(f, "Swap order rejected: {}", msg),
        }
    }
}

impl std::error::Error for SwapError {}

/// A created swap order: where to deposit, exactly how much, until when
#[derive(Debug, Clone)]
pub struct SwapOrder {
    pub order_id: String,
    pub deposit_address: String,
    pub required_amount: Decimal,
    /// Destination address the service reports it will deliver to
    pub destination_address: String,
    pub expires_at: DateTime<Utc>,
    pub order_url: String,
}

#[derive(Debug, Clone)]
pub struct OrderStatus {
    pub order_id: String,
    pub status: String,
    /// Transaction id on the destination chain, once the service has sent
    pub destination_tx_id: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct PairLimits {
    pub min: Decimal,
    pub max: Decimal,
}

/// Order operations the executor consumes, substitutable in tests
#[async_trait::async_trait]
pub trait SwapOrderGateway: Send + Sync {
    async fn pair_limits(&self, network: &NetworkConfig) -> Result<PairLimits, SwapError>;

    async fn create_order(
        &self,
        network: &NetworkConfig,
        amount: Decimal,
        dest_asset: &str,
        dest_address: &str,
    ) -> Result<SwapOrder, SwapError>;

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, SwapError>;
}

// API data payloads (the {code, msg, data} envelope is handled untyped)
#[derive(Debug, Deserialize)]
struct OrderData {
    id: String,
    from: OrderSide,
    to: Option<OrderSide>,
    time: Option<OrderTime>,
}

#[derive(Debug, Deserialize)]
struct OrderSide {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    amount: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderTime {
    #[serde(default)]
    left: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PriceData {
    from: PriceSide,
}

#[derive(Debug, Deserialize)]
struct PriceSide {
    #[serde(default)]
    min: Option<String>,
    #[serde(default)]
    max: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    id: String,
    status: String,
    #[serde(default)]
    to: Option<StatusSide>,
}

#[derive(Debug, Deserialize)]
struct StatusSide {
    #[serde(default)]
    tx: Option<StatusTx>,
}

#[derive(Debug, Deserialize)]
struct StatusTx {
    #[serde(default)]
    id: Option<String>,
}

/// HTTP client for the swap service
#[derive(Clone)]
pub struct FixedRateSwapClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    limits_cache: Arc<Cache<String, PairLimits>>,
}

impl FixedRateSwapClient {
    pub fn new(base_url: String, api_key: String, api_secret: String) -> Self {
        let limits_cache = Cache::builder()
            .max_capacity(16)
            .time_to_live(Duration::from_secs(LIMITS_CACHE_TTL_SECS))
            .build();

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url,
            api_key,
            api_secret,
            limits_cache: Arc::new(limits_cache),
        }
    }

    fn sign(&self, body: &str) -> Result<String, SwapError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| SwapError::Rejected(format!("bad API secret: {}", e)))?;
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, SwapError> {
        let body = params.to_string();
        let signature = self.sign(&body)?;
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), method);

        debug!(method = method, "Swap API request");
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .header("X-API-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SwapError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(SwapError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(SwapError::Rejected(format!("HTTP {}", status)));
        }

        // Error payloads do not share the success data shape; check the
        // envelope before deserializing data
        let envelope: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SwapError::Transient(format!("bad response body: {}", e)))?;
        let code = envelope.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
        let msg = envelope
            .get("msg")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();

        if code != 0 {
            warn!(method = method, code = code, msg = %msg, "Swap API error");
            if UNAVAILABLE_CODES.contains(&code) {
                return Err(SwapError::Unavailable(format!("code {}: {}", code, msg)));
            }
            return Err(SwapError::Rejected(format!("code {}: {}", code, msg)));
        }

        let data = envelope
            .get("data")
            .filter(|d| !d.is_null())
            .cloned()
            .ok_or_else(|| SwapError::Transient("empty data in response".to_string()))?;
        serde_json::from_value(data)
            .map_err(|e| SwapError::Transient(format!("unexpected data shape: {}", e)))
    }
}

fn parse_amount(raw: Option<&str>, what: &str) -> Result<Decimal, SwapError> {
    raw.ok_or_else(|| SwapError::Transient(format!("missing {}", what)))?
        .parse()
        .map_err(|e| SwapError::Transient(format!("unparseable {}: {}", what, e)))
}

#[async_trait::async_trait]
impl SwapOrderGateway for FixedRateSwapClient {
    async fn pair_limits(&self, network: &NetworkConfig) -> Result<PairLimits, SwapError> {
        let ccy = source_ccy(network.key);
        if let Some(limits) = self.limits_cache.get(&ccy).await {
            return Ok(limits);
        }

        let data: PriceData = self
            .request(
                "price",
                json!({
                    "type": "fixed",
                    "fromCcy": ccy,
                    "toCcy": "BTC",
                    "direction": "from",
                    "amount": 1.0,
                }),
            )
            .await?;

        let limits = PairLimits {
            min: parse_amount(data.from.min.as_deref(), "pair minimum")?,
            max: parse_amount(data.from.max.as_deref(), "pair maximum")?,
        };
        self.limits_cache.insert(ccy, limits).await;
        Ok(limits)
    }

    async fn create_order(
        &self,
        network: &NetworkConfig,
        amount: Decimal,
        dest_asset: &str,
        dest_address: &str,
    ) -> Result<SwapOrder, SwapError> {
        let data: OrderData = self
            .request(
                "create",
                json!({
                    "type": "fixed",
                    "fromCcy": source_ccy(network.key),
                    "toCcy": dest_asset,
                    "direction": "from",
                    "amount": amount,
                    "toAddress": dest_address,
                }),
            )
            .await?;

        let deposit_address = data
            .from
            .address
            .ok_or_else(|| SwapError::Transient("order missing deposit address".to_string()))?;
        let required_amount = parse_amount(data.from.amount.as_deref(), "required amount")?;
        let destination_address = data
            .to
            .and_then(|side| side.address)
            .unwrap_or_else(|| dest_address.to_string());

        let time_left = data
            .time
            .and_then(|t| t.left)
            .filter(|left| *left > 0)
            .unwrap_or(0);
        let expires_at = Utc::now() + ChronoDuration::seconds(time_left);

        let order = SwapOrder {
            order_url: format!("https://fixedfloat.com/order/{}", data.id),
            order_id: data.id,
            deposit_address,
            required_amount,
            destination_address,
            expires_at,
        };
        info!(
            order_id = %order.order_id,
            required = %order.required_amount,
            expires_at = %order.expires_at,
            "Swap order created"
        );
        Ok(order)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, SwapError> {
        let data: StatusData = self.request("order", json!({ "id": order_id })).await?;
        Ok(OrderStatus {
            order_id: data.id,
            status: data.status,
            destination_tx_id: data.to.and_then(|s| s.tx).and_then(|tx| tx.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_source_ccy_mapping() {
        assert_eq!(source_ccy("USDT-ARB"), "USDTARB");
        assert_eq!(source_ccy("USDT-MATIC"), "USDTMATIC");
    }

    #[test]
    fn test_envelope_error_codes() {
        assert!(SwapError::Unavailable("code 311".into()).is_retryable());
        assert!(SwapError::Transient("timeout".into()).is_retryable());
        assert!(!SwapError::Rejected("out of limits".into()).is_retryable());
    }

    #[test]
    fn test_order_data_deserialization() {
        let raw = serde_json::json!({
            "id": "ABCDEF",
            "from": {"code": "USDTARB", "address": "0xdeposit", "amount": "50.123456"},
            "to": {"address": "bc1qdest"},
            "time": {"left": 1800}
        });
        let data: OrderData = serde_json::from_value(raw).unwrap();
        assert_eq!(data.id, "ABCDEF");
        assert_eq!(data.from.address.as_deref(), Some("0xdeposit"));
        assert_eq!(
            parse_amount(data.from.amount.as_deref(), "amount").unwrap(),
            dec!(50.123456)
        );
        assert_eq!(data.time.unwrap().left, Some(1800));
    }

    #[test]
    fn test_status_data_deserialization() {
        let raw = serde_json::json!({
            "id": "ABCDEF",
            "status": "DONE",
            "to": {"tx": {"id": "btc-txid"}}
        });
        let data: StatusData = serde_json::from_value(raw).unwrap();
        assert_eq!(data.status, "DONE");
        assert_eq!(
            data.to.and_then(|s| s.tx).and_then(|t| t.id).as_deref(),
            Some("btc-txid")
        );
    }

    #[test]
    fn test_missing_amount_is_transient() {
        let err = parse_amount(None, "required amount").unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("required amount"));
    }
}
