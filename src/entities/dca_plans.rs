//! SeaORM Entity for DCA plans (recurring purchase intents)
//!
//! A plan is mutated only by the executor or by explicit cancellation; it is
//! soft-deactivated rather than deleted while attempts reference it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dca_plans")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Owner (chat-platform user id)
    pub owner_id: i64,
    /// Network key from the registry (e.g. "USDT-ARB")
    pub network_key: String,
    /// Source amount per interval, in human token units
    pub amount: Decimal,
    /// Asset delivered by the swap service (e.g. "BTC")
    pub destination_asset: String,
    /// Destination address on the target asset's chain; validated once at
    /// creation and immutable afterwards
    pub destination_address: String,
    /// Interval between purchases, in seconds
    pub interval_secs: i64,
    /// Next scheduled execution; only ever moves forward
    pub next_run_at: DateTimeWithTimeZone,
    /// Plan execution state: "idle" | "awaiting-order" | "attempt-in-progress"
    pub state: String,
    /// Swap order currently governing execution, if any
    pub active_order_id: Option<String>,
    pub active_order_expires_at: Option<DateTimeWithTimeZone>,
    pub active: bool,
    pub deleted: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
