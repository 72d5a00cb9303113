//! SeaORM Entity for execution attempts
//!
//! One row per execution try, tied to exactly one swap order. The state
//! column carries the core correctness contract: `sending` is a durable lock
//! written before any network call, `sent`/`failed` are terminal, `blocked`
//! rows are never reset to `scheduled`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "attempts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub plan_id: i32,
    /// Swap order id; unique across all attempts
    pub order_id: String,
    /// "scheduled" | "sending" | "sent" | "failed" | "blocked"
    pub state: String,
    /// Exact amount the order requires, in human token units
    pub required_amount: Decimal,
    /// Swap-service deposit address for this order
    pub deposit_address: String,
    /// Destination address the order declared; re-checked on every execution
    pub order_destination: String,
    pub approve_tx_hash: Option<String>,
    /// Set immediately after broadcast; once set, never reassigned
    pub transfer_tx_hash: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
