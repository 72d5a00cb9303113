//! Request/response models for the plan command surface

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entities::{attempts, dca_plans};

lazy_static! {
    // Legacy base58 and bech32 mainnet forms
    static ref BTC_ADDRESS: Regex =
        Regex::new(r"^(1|3)[a-km-zA-HJ-NP-Z1-9]{25,34}$|^bc1[a-z0-9]{39,59}$").unwrap();
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    pub owner_id: i64,
    pub network_key: String,
    /// Source amount per interval, human token units
    pub amount: Decimal,
    /// Defaults to BTC, the only destination the swap pair list covers today
    #[serde(default = "default_destination_asset")]
    pub destination_asset: String,
    pub destination_address: String,
    pub interval_hours: i64,
}

fn default_destination_asset() -> String {
    "BTC".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub id: i32,
    pub owner_id: i64,
    pub network_key: String,
    pub amount: Decimal,
    pub destination_asset: String,
    pub destination_address: String,
    pub interval_hours: i64,
    pub next_run_at: String,
    pub state: String,
    pub active_order_id: Option<String>,
    pub active: bool,
    pub last_attempt: Option<AttemptSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub order_id: String,
    pub state: String,
    pub required_amount: Decimal,
    pub approve_tx_hash: Option<String>,
    pub transfer_tx_hash: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
}

impl PlanResponse {
    pub fn from_models(plan: dca_plans::Model, last_attempt: Option<attempts::Model>) -> Self {
        Self {
            id: plan.id,
            owner_id: plan.owner_id,
            network_key: plan.network_key,
            amount: plan.amount,
            destination_asset: plan.destination_asset,
            destination_address: plan.destination_address,
            interval_hours: plan.interval_secs / 3600,
            next_run_at: plan.next_run_at.to_rfc3339(),
            state: plan.state,
            active_order_id: plan.active_order_id,
            active: plan.active && !plan.deleted,
            last_attempt: last_attempt.map(|a| AttemptSummary {
                order_id: a.order_id,
                state: a.state,
                required_amount: a.required_amount,
                approve_tx_hash: a.approve_tx_hash,
                transfer_tx_hash: a.transfer_tx_hash,
                error_message: a.error_message,
                created_at: a.created_at.to_rfc3339(),
            }),
        }
    }
}

/// Destination addresses are validated exactly once, at plan creation.
pub fn validate_destination(asset: &str, address: &str) -> Result<(), String> {
    if address.trim().is_empty() {
        return Err("destination address must not be empty".to_string());
    }
    if asset.eq_ignore_ascii_case("BTC") && !BTC_ADDRESS.is_match(address) {
        return Err(format!("{} is not a valid BTC address", address));
    }
    Ok(())
}
