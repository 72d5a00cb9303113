//! Per-network RPC façade for ERC-20 and native-balance operations
//!
//! Thin wrappers over alloy providers plus the error classification the
//! executor depends on: every transport/JSON-RPC failure is mapped into
//! [`ChainError`] structurally (error variants, JSON-RPC codes, HTTP status,
//! reqwest error kinds), never by scanning error text. Anything the
//! classifier does not recognize is terminal.

use alloy::{
    contract,
    primitives::{Address, TxHash, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    sol,
    transports::{
        http::{Client, Http},
        RpcError, TransportError, TransportErrorKind,
    },
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::services::networks::{self, NetworkConfig};
use crate::services::signer::KeystoreSigner;

/// How long to poll for a transfer/approval receipt before giving up
const RECEIPT_TIMEOUT_MS: u64 = 120_000;

/// Polling interval for receipt checks (ms)
const POLL_INTERVAL_MS: u64 = 2000;

// Minimal ERC-20 surface: balance, allowance, approve, transfer
sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 value) external returns (bool);
        function transfer(address to, uint256 value) external returns (bool);
    }
}

/// Error taxonomy consumed by the executor's blocked-vs-failed branch
#[derive(Debug, Clone)]
pub enum ChainError {
    /// Plan/order/wallet configuration problem; requires user correction
    InvalidConfiguration(String),
    /// Source token or native gas balance too low
    InsufficientFunds {
        asset: String,
        required: Decimal,
        available: Decimal,
    },
    /// Timeout, connection failure, 5xx, node temporarily unavailable
    RpcTransient(String),
    /// Revert, nonce/signature problem, malformed transaction
    ChainRejected(String),
    /// Broadcast returned a hash but the receipt could not be fetched;
    /// never resend, reconcile against on-chain state instead
    AmbiguousBroadcast { tx_hash: String, detail: String },
}

impl ChainError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::RpcTransient(_) | ChainError::AmbiguousBroadcast { .. }
        )
    }
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            ChainError::InsufficientFunds {
                asset,
                required,
                available,
            } => write!(
                f,
                "Insufficient {} balance. Required: {}, available: {}, shortfall: {}",
                asset,
                required,
                available,
                required - available
            ),
            ChainError::RpcTransient(msg) => write!(f, "RPC error (will retry): {}", msg),
            ChainError::ChainRejected(msg) => write!(f, "Transaction rejected: {}", msg),
            ChainError::AmbiguousBroadcast { tx_hash, detail } => write!(
                f,
                "Broadcast {} confirmed but receipt unavailable: {}",
                tx_hash, detail
            ),
        }
    }
}

impl std::error::Error for ChainError {}

/// Outcome of a receipt lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Confirmed,
    Reverted,
    Pending,
    NotFound,
}

/// RPC operations the executor needs, substitutable in tests
#[async_trait::async_trait]
pub trait ChainGateway: Send + Sync {
    /// Source-token balance in human units
    async fn token_balance(&self, network_key: &str, owner: &str) -> Result<Decimal, ChainError>;

    /// Native balance in wei
    async fn native_balance(&self, network_key: &str, owner: &str) -> Result<u128, ChainError>;

    /// Current allowance owner -> spender in human units
    async fn allowance(
        &self,
        network_key: &str,
        owner: &str,
        spender: &str,
    ) -> Result<Decimal, ChainError>;

    async fn estimate_approve_gas(
        &self,
        network_key: &str,
        owner: &str,
        spender: &str,
        amount: Decimal,
    ) -> Result<u64, ChainError>;

    async fn estimate_transfer_gas(
        &self,
        network_key: &str,
        owner: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<u64, ChainError>;

    /// Current gas price in wei
    async fn gas_price(&self, network_key: &str) -> Result<u128, ChainError>;

    /// Sign, broadcast and confirm an approval for exactly `amount`.
    /// Returns the approval tx hash.
    async fn send_approval(
        &self,
        network_key: &str,
        owner_id: i64,
        spender: &str,
        amount: Decimal,
    ) -> Result<String, ChainError>;

    /// Sign and broadcast a transfer, returning the tx hash without waiting
    /// for a receipt (the caller persists the hash first).
    async fn broadcast_transfer(
        &self,
        network_key: &str,
        owner_id: i64,
        to: &str,
        amount: Decimal,
    ) -> Result<String, ChainError>;

    /// One-shot receipt lookup
    async fn receipt_status(
        &self,
        network_key: &str,
        tx_hash: &str,
    ) -> Result<ReceiptStatus, ChainError>;

    /// Poll for a receipt until confirmed/reverted or the timeout elapses
    async fn await_confirmation(
        &self,
        network_key: &str,
        tx_hash: &str,
    ) -> Result<ReceiptStatus, ChainError>;
}

/// alloy-backed implementation over the network registry
pub struct EvmChainClient {
    providers: HashMap<&'static str, RootProvider<Http<Client>>>,
    signer: Arc<KeystoreSigner>,
}

impl EvmChainClient {
    pub fn new(signer: Arc<KeystoreSigner>) -> Result<Self, ChainError> {
        let mut providers = HashMap::new();
        for key in networks::network_keys() {
            let config = networks::get_network(key)
                .map_err(|e| ChainError::InvalidConfiguration(e.to_string()))?;
            let provider = ProviderBuilder::new().on_http(
                config.rpc_url.parse().map_err(|e| {
                    ChainError::InvalidConfiguration(format!(
                        "Invalid RPC URL for {}: {}",
                        key, e
                    ))
                })?,
            );
            providers.insert(config.key, provider);
        }
        info!(networks = providers.len(), "EvmChainClient initialized");
        Ok(Self { providers, signer })
    }

    fn network(&self, key: &str) -> Result<&'static NetworkConfig, ChainError> {
        networks::get_network(key).map_err(|e| ChainError::InvalidConfiguration(e.to_string()))
    }

    fn provider(&self, key: &str) -> Result<&RootProvider<Http<Client>>, ChainError> {
        self.providers
            .get(key)
            .ok_or_else(|| ChainError::InvalidConfiguration(format!("No provider for {}", key)))
    }

    fn token_address(config: &NetworkConfig) -> Result<Address, ChainError> {
        Address::from_str(config.token_contract).map_err(|e| {
            ChainError::InvalidConfiguration(format!(
                "Invalid token contract for {}: {}",
                config.key, e
            ))
        })
    }
}

#[async_trait::async_trait]
impl ChainGateway for EvmChainClient {
    async fn token_balance(&self, network_key: &str, owner: &str) -> Result<Decimal, ChainError> {
        let config = self.network(network_key)?;
        let provider = self.provider(network_key)?;
        let owner = parse_address(owner)?;
        let erc20 = IERC20::new(Self::token_address(config)?, provider);
        let raw = erc20
            .balanceOf(owner)
            .call()
            .await
            .map_err(classify_contract_error)?
            ._0;
        let balance = from_base_units(raw, config.token_decimals);
        debug!(
            owner = %mask_address(&owner.to_string()),
            network = network_key,
            balance = %balance,
            "Token balance fetched"
        );
        Ok(balance)
    }

    async fn native_balance(&self, network_key: &str, owner: &str) -> Result<u128, ChainError> {
        let provider = self.provider(network_key)?;
        let owner = parse_address(owner)?;
        let wei = provider
            .get_balance(owner)
            .await
            .map_err(|e| classify_transport_error(&e))?;
        Ok(wei.try_into().unwrap_or(u128::MAX))
    }

    async fn allowance(
        &self,
        network_key: &str,
        owner: &str,
        spender: &str,
    ) -> Result<Decimal, ChainError> {
        let config = self.network(network_key)?;
        let provider = self.provider(network_key)?;
        let erc20 = IERC20::new(Self::token_address(config)?, provider);
        let raw = erc20
            .allowance(parse_address(owner)?, parse_address(spender)?)
            .call()
            .await
            .map_err(classify_contract_error)?
            ._0;
        Ok(from_base_units(raw, config.token_decimals))
    }

    async fn estimate_approve_gas(
        &self,
        network_key: &str,
        owner: &str,
        spender: &str,
        amount: Decimal,
    ) -> Result<u64, ChainError> {
        let config = self.network(network_key)?;
        let provider = self.provider(network_key)?;
        let value = to_base_units(amount, config.token_decimals)?;
        let erc20 = IERC20::new(Self::token_address(config)?, provider);
        erc20
            .approve(parse_address(spender)?, value)
            .from(parse_address(owner)?)
            .estimate_gas()
            .await
            .map_err(classify_contract_error)
    }

    async fn estimate_transfer_gas(
        &self,
        network_key: &str,
        owner: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<u64, ChainError> {
        let config = self.network(network_key)?;
        let provider = self.provider(network_key)?;
        let value = to_base_units(amount, config.token_decimals)?;
        let erc20 = IERC20::new(Self::token_address(config)?, provider);
        erc20
            .transfer(parse_address(to)?, value)
            .from(parse_address(owner)?)
            .estimate_gas()
            .await
            .map_err(classify_contract_error)
    }

    async fn gas_price(&self, network_key: &str) -> Result<u128, ChainError> {
        let provider = self.provider(network_key)?;
        provider
            .get_gas_price()
            .await
            .map_err(|e| classify_transport_error(&e))
    }

    async fn send_approval(
        &self,
        network_key: &str,
        owner_id: i64,
        spender: &str,
        amount: Decimal,
    ) -> Result<String, ChainError> {
        let config = self.network(network_key)?;
        let spender_addr = parse_address(spender)?;
        let value = to_base_units(amount, config.token_decimals)?;

        // Key material lives only inside this call
        let wallet = self
            .signer
            .wallet_for(owner_id)
            .map_err(|e| ChainError::InvalidConfiguration(e.to_string()))?;
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(config.rpc_url.parse().map_err(|e| {
                ChainError::InvalidConfiguration(format!("Invalid RPC URL: {}", e))
            })?);

        let erc20 = IERC20::new(Self::token_address(config)?, &provider);
        info!(
            network = network_key,
            spender = %mask_address(spender),
            amount = %amount,
            "Broadcasting approval"
        );
        let pending = erc20
            .approve(spender_addr, value)
            .send()
            .await
            .map_err(classify_contract_error)?;
        let tx_hash = format!("{:?}", pending.tx_hash());

        match pending.get_receipt().await {
            Ok(receipt) if receipt.status() => {
                info!(tx_hash = %tx_hash, "Approval confirmed");
                Ok(tx_hash)
            }
            Ok(_) => Err(ChainError::ChainRejected(format!(
                "Approval transaction {} reverted",
                tx_hash
            ))),
            Err(e) => Err(ChainError::AmbiguousBroadcast {
                tx_hash,
                detail: e.to_string(),
            }),
        }
    }

    async fn broadcast_transfer(
        &self,
        network_key: &str,
        owner_id: i64,
        to: &str,
        amount: Decimal,
    ) -> Result<String, ChainError> {
        let config = self.network(network_key)?;
        let to_addr = parse_address(to)?;
        let value = to_base_units(amount, config.token_decimals)?;

        let wallet = self
            .signer
            .wallet_for(owner_id)
            .map_err(|e| ChainError::InvalidConfiguration(e.to_string()))?;
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(config.rpc_url.parse().map_err(|e| {
                ChainError::InvalidConfiguration(format!("Invalid RPC URL: {}", e))
            })?);

        let erc20 = IERC20::new(Self::token_address(config)?, &provider);
        info!(
            network = network_key,
            to = %mask_address(to),
            amount = %amount,
            "Broadcasting transfer"
        );
        let pending = erc20
            .transfer(to_addr, value)
            .send()
            .await
            .map_err(classify_contract_error)?;
        let tx_hash = format!("{:?}", pending.tx_hash());
        info!(tx_hash = %tx_hash, "Transfer broadcast");
        Ok(tx_hash)
    }

    async fn receipt_status(
        &self,
        network_key: &str,
        tx_hash: &str,
    ) -> Result<ReceiptStatus, ChainError> {
        let provider = self.provider(network_key)?;
        let hash = TxHash::from_str(tx_hash)
            .map_err(|e| ChainError::InvalidConfiguration(format!("Invalid tx hash: {}", e)))?;

        match provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| classify_transport_error(&e))?
        {
            Some(receipt) if receipt.status() => Ok(ReceiptStatus::Confirmed),
            Some(_) => Ok(ReceiptStatus::Reverted),
            None => {
                // Distinguish a mempool transaction from one the node never saw
                let known = provider
                    .get_transaction_by_hash(hash)
                    .await
                    .map_err(|e| classify_transport_error(&e))?
                    .is_some();
                if known {
                    Ok(ReceiptStatus::Pending)
                } else {
                    Ok(ReceiptStatus::NotFound)
                }
            }
        }
    }

    async fn await_confirmation(
        &self,
        network_key: &str,
        tx_hash: &str,
    ) -> Result<ReceiptStatus, ChainError> {
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(RECEIPT_TIMEOUT_MS);

        while start.elapsed() < timeout {
            match self.receipt_status(network_key, tx_hash).await {
                Ok(ReceiptStatus::Confirmed) => return Ok(ReceiptStatus::Confirmed),
                Ok(ReceiptStatus::Reverted) => return Ok(ReceiptStatus::Reverted),
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    warn!(tx_hash = %tx_hash, error = %e, "Receipt poll failed, retrying");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }

        error!(tx_hash = %tx_hash, "Timed out waiting for receipt");
        Err(ChainError::AmbiguousBroadcast {
            tx_hash: tx_hash.to_string(),
            detail: format!("no receipt after {}ms", RECEIPT_TIMEOUT_MS),
        })
    }
}

fn parse_address(addr: &str) -> Result<Address, ChainError> {
    Address::from_str(addr)
        .map_err(|e| ChainError::InvalidConfiguration(format!("Invalid address {}: {}", addr, e)))
}

/// Convert a human-unit amount to on-chain base units
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<U256, ChainError> {
    let scale = Decimal::from(10u64.pow(decimals));
    let scaled = amount
        .checked_mul(scale)
        .ok_or_else(|| {
            ChainError::InvalidConfiguration(format!("Amount {} overflows token units", amount))
        })?
        .trunc();
    let units = scaled.to_u128().ok_or_else(|| {
        ChainError::InvalidConfiguration(format!("Amount {} is not representable", amount))
    })?;
    Ok(U256::from(units))
}

/// Convert on-chain base units to a human-unit amount. Values beyond i128
/// are clamped; comparisons against plan amounts are unaffected.
pub fn from_base_units(value: U256, decimals: u32) -> Decimal {
    let units: u128 = value.try_into().unwrap_or(u128::MAX);
    let units = units.min(i128::MAX as u128) as i128;
    Decimal::from_i128_with_scale(units, decimals)
}

/// Shorten an address for logs
pub fn mask_address(addr: &str) -> String {
    if addr.len() > 10 {
        format!("{}...{}", &addr[..6], &addr[addr.len() - 4..])
    } else {
        addr.to_string()
    }
}

/// Classify a raw transport/JSON-RPC failure. Fail closed: anything not
/// recognized as transient is terminal.
pub fn classify_transport_error(err: &TransportError) -> ChainError {
    match err {
        RpcError::ErrorResp(payload) => {
            classify_error_payload(payload.code, payload.message.as_ref())
        }
        RpcError::Transport(kind) => classify_transport_kind(kind),
        other => ChainError::ChainRejected(other.to_string()),
    }
}

fn classify_transport_kind(kind: &TransportErrorKind) -> ChainError {
    match kind {
        TransportErrorKind::BackendGone | TransportErrorKind::PubsubUnavailable => {
            ChainError::RpcTransient(kind.to_string())
        }
        TransportErrorKind::HttpError(http) => classify_http_status(http.status, &http.body),
        TransportErrorKind::Custom(inner) => {
            if let Some(req) = inner.downcast_ref::<reqwest::Error>() {
                if req.is_timeout() || req.is_connect() {
                    return ChainError::RpcTransient(req.to_string());
                }
            }
            ChainError::ChainRejected(inner.to_string())
        }
        other => ChainError::ChainRejected(other.to_string()),
    }
}

/// HTTP-level classification: rate limiting and server-side failures are
/// transient, everything else is terminal.
pub fn classify_http_status(status: u16, body: &str) -> ChainError {
    if status == 429 || status >= 500 {
        ChainError::RpcTransient(format!("RPC endpoint returned {}: {}", status, body))
    } else {
        ChainError::ChainRejected(format!("RPC endpoint returned {}: {}", status, body))
    }
}

/// JSON-RPC error classification by code (EIP-1474): -32002 resource
/// unavailable and -32005 limit exceeded are transient; 3 is an execution
/// revert; the rest (nonce, signature, malformed tx, insufficient funds at
/// submission) require intervention.
pub fn classify_error_payload(code: i64, message: &str) -> ChainError {
    match code {
        -32002 | -32005 => ChainError::RpcTransient(format!("node busy ({}): {}", code, message)),
        3 => ChainError::ChainRejected(format!("execution reverted: {}", message)),
        _ => ChainError::ChainRejected(format!("node rejected request ({}): {}", code, message)),
    }
}

fn classify_contract_error(err: contract::Error) -> ChainError {
    match err {
        contract::Error::TransportError(te) => classify_transport_error(&te),
        other => ChainError::ChainRejected(other.to_string()),
    }
}
