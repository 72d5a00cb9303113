//! Migration to create the dca_plans table for recurring purchase plans

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DcaPlans::Table)
                    .if_not_exists()
                    .col(pk_auto(DcaPlans::Id))
                    .col(big_integer(DcaPlans::OwnerId).not_null())
                    .col(string(DcaPlans::NetworkKey).not_null())
                    .col(decimal_len(DcaPlans::Amount, 28, 8).not_null())
                    .col(string(DcaPlans::DestinationAsset).not_null())
                    .col(string(DcaPlans::DestinationAddress).not_null())
                    .col(big_integer(DcaPlans::IntervalSecs).not_null())
                    .col(timestamp_with_time_zone(DcaPlans::NextRunAt).not_null())
                    .col(string(DcaPlans::State).not_null().default("idle"))
                    .col(string_null(DcaPlans::ActiveOrderId))
                    .col(timestamp_with_time_zone_null(DcaPlans::ActiveOrderExpiresAt))
                    .col(boolean(DcaPlans::Active).default(true))
                    .col(boolean(DcaPlans::Deleted).default(false))
                    .col(timestamp_with_time_zone(DcaPlans::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(DcaPlans::UpdatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        // Index for the due-plan scan (active plans ordered by next run)
        manager
            .create_index(
                Index::create()
                    .name("idx_dca_plans_next_run")
                    .table(DcaPlans::Table)
                    .col(DcaPlans::Active)
                    .col(DcaPlans::NextRunAt)
                    .to_owned(),
            )
            .await?;

        // Index for querying by owner
        manager
            .create_index(
                Index::create()
                    .name("idx_dca_plans_owner")
                    .table(DcaPlans::Table)
                    .col(DcaPlans::OwnerId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DcaPlans::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DcaPlans {
    Table,
    Id,
    OwnerId,
    NetworkKey,
    Amount,
    DestinationAsset,
    DestinationAddress,
    IntervalSecs,
    NextRunAt,
    State,
    ActiveOrderId,
    ActiveOrderExpiresAt,
    Active,
    Deleted,
    CreatedAt,
    UpdatedAt,
}
