//! Preflight checks run before any signing occurs
//!
//! A pure function of the plan, the order and current chain readings; no
//! side effects, so the live executor and dry-run mode share it verbatim.
//! Checks run in order and the first failure wins. Every failure is
//! terminal for the attempt: the user has to fix the address, the balance
//! or the gas before this order can be satisfied.

use alloy::primitives::Address;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::services::chain_client::ChainError;

/// Gas-cost safety margin: estimate sum x 1.2
const GAS_COST_MARGIN_NUM: u128 = 6;
const GAS_COST_MARGIN_DEN: u128 = 5;

/// Native-balance requirement: estimated cost x 1.5
const NATIVE_RESERVE_NUM: u128 = 3;
const NATIVE_RESERVE_DEN: u128 = 2;

/// Everything the checks need, gathered by the caller
#[derive(Debug, Clone)]
pub struct PreflightInput {
    /// Exact amount the order requires, human token units
    pub required_amount: Decimal,
    /// Deposit address reported by the swap order
    pub deposit_address: String,
    /// Destination address the order claims it will deliver to
    pub order_destination: String,
    /// Destination address the plan was created with
    pub plan_destination: String,
    /// Source-token balance of the wallet, human units
    pub token_balance: Decimal,
    /// Native balance of the wallet, wei
    pub native_balance_wei: u128,
    pub approve_gas: u64,
    pub transfer_gas: u64,
    /// Current gas price, wei
    pub gas_price_wei: u128,
    pub token_symbol: String,
    pub native_symbol: String,
}

/// Successful preflight: the validated deposit address plus the gas budget
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub deposit_address: Address,
    /// (approve + transfer) estimate x gas price x margin
    pub estimated_cost_wei: u128,
    /// Native balance the wallet must hold before broadcasting
    pub required_native_wei: u128,
}

#[derive(Debug, Clone)]
pub enum PreflightFailure {
    InvalidDepositAddress { address: String, reason: String },
    DestinationMismatch { expected: String, actual: String },
    InsufficientToken { symbol: String, required: Decimal, available: Decimal },
    InsufficientNative { symbol: String, required_wei: u128, available_wei: u128 },
}

impl std::fmt::Display for PreflightFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreflightFailure::InvalidDepositAddress { address, reason } => {
                write!(f, "Invalid deposit address {}: {}", address, reason)
            }
            PreflightFailure::DestinationMismatch { expected, actual } => write!(
                f,
                "Order destination {} does not match plan destination {}",
                actual, expected
            ),
            PreflightFailure::InsufficientToken {
                symbol,
                required,
                available,
            } => write!(
                f,
                "Insufficient {} balance. Required: {}, available: {}, shortfall: {}",
                symbol,
                required,
                available,
                required - available
            ),
            PreflightFailure::InsufficientNative {
                symbol,
                required_wei,
                available_wei,
            } => write!(
                f,
                "Insufficient {} for gas. Required: {} wei, available: {} wei",
                symbol, required_wei, available_wei
            ),
        }
    }
}

impl std::error::Error for PreflightFailure {}

impl From<PreflightFailure> for ChainError {
    fn from(failure: PreflightFailure) -> Self {
        match &failure {
            PreflightFailure::InsufficientToken {
                symbol,
                required,
                available,
            } => ChainError::InsufficientFunds {
                asset: symbol.clone(),
                required: *required,
                available: *available,
            },
            PreflightFailure::InsufficientNative { .. } => {
                // Reported in wei to avoid lying about decimals
                ChainError::ChainRejected(failure.to_string())
            }
            _ => ChainError::InvalidConfiguration(failure.to_string()),
        }
    }
}

/// Gas budget math shared with dry-run previews
pub fn gas_budget(approve_gas: u64, transfer_gas: u64, gas_price_wei: u128) -> (u128, u128) {
    let raw = (approve_gas as u128 + transfer_gas as u128).saturating_mul(gas_price_wei);
    let cost = raw
        .saturating_mul(GAS_COST_MARGIN_NUM)
        .checked_div(GAS_COST_MARGIN_DEN)
        .unwrap_or(u128::MAX);
    let required = cost
        .saturating_mul(NATIVE_RESERVE_NUM)
        .checked_div(NATIVE_RESERVE_DEN)
        .unwrap_or(u128::MAX);
    (cost, required)
}

/// Run every check in order; first failure aborts with that reason.
pub fn run_preflight(input: &PreflightInput) -> Result<PreflightReport, PreflightFailure> {
    // Check 1: deposit address must be a valid EVM address
    let deposit_address = Address::from_str(&input.deposit_address).map_err(|e| {
        PreflightFailure::InvalidDepositAddress {
            address: input.deposit_address.clone(),
            reason: e.to_string(),
        }
    })?;

    // Check 2: the order must deliver to the plan's destination, exactly.
    // A mismatch means a tampered or mixed-up order; funds must not move.
    if input.order_destination != input.plan_destination {
        return Err(PreflightFailure::DestinationMismatch {
            expected: input.plan_destination.clone(),
            actual: input.order_destination.clone(),
        });
    }

    // Check 3: source token balance covers the required amount
    if input.token_balance < input.required_amount {
        return Err(PreflightFailure::InsufficientToken {
            symbol: input.token_symbol.clone(),
            required: input.required_amount,
            available: input.token_balance,
        });
    }

    // Check 4+5: gas budget with safety margins against the native balance
    let (estimated_cost_wei, required_native_wei) =
        gas_budget(input.approve_gas, input.transfer_gas, input.gas_price_wei);
    if input.native_balance_wei < required_native_wei {
        return Err(PreflightFailure::InsufficientNative {
            symbol: input.native_symbol.clone(),
            required_wei: required_native_wei,
            available_wei: input.native_balance_wei,
        });
    }

    Ok(PreflightReport {
        deposit_address,
        estimated_cost_wei,
        required_native_wei,
    })
}
