//! Migration to create the wallets table (one EVM wallet per owner)

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Wallets::Table)
                    .if_not_exists()
                    .col(pk_auto(Wallets::Id))
                    .col(big_integer(Wallets::OwnerId).not_null())
                    .col(string(Wallets::Address).not_null())
                    .col(string(Wallets::KeystorePath).not_null())
                    .col(timestamp_with_time_zone(Wallets::CreatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_wallets_owner_id")
                    .table(Wallets::Table)
                    .col(Wallets::OwnerId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Wallets::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Wallets {
    Table,
    Id,
    OwnerId,
    Address,
    KeystorePath,
    CreatedAt,
}
