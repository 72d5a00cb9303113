//! Request/response models for wallet setup

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWalletRequest {
    pub owner_id: i64,
    /// Standard encrypted Ethereum keystore JSON
    pub keystore: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub owner_id: i64,
    pub address: String,
    pub password_cached: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPasswordRequest {
    pub password: String,
    /// Also store in the OS keyring so restarts pick it up
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_persist() -> bool {
    true
}
