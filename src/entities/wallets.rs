//! SeaORM Entity for owner wallets
//!
//! One EVM wallet per owner, the same address reused across all supported
//! chains. The row stores only the checksummed address and the location of
//! the encrypted key file; no plaintext secret ever lands here.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "wallets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub owner_id: i64,
    /// Checksummed EVM address
    pub address: String,
    /// Path to the encrypted keystore JSON file
    pub keystore_path: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
