//! Migration to create the attempts table (one row per execution try)

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Attempts::Table)
                    .if_not_exists()
                    .col(pk_auto(Attempts::Id))
                    .col(integer(Attempts::PlanId).not_null())
                    .col(string(Attempts::OrderId).not_null())
                    .col(string(Attempts::State).not_null().default("scheduled"))
                    .col(decimal_len(Attempts::RequiredAmount, 28, 8).not_null())
                    .col(string(Attempts::DepositAddress).not_null())
                    .col(string(Attempts::OrderDestination).not_null())
                    .col(string_null(Attempts::ApproveTxHash))
                    .col(string_null(Attempts::TransferTxHash))
                    .col(string_null(Attempts::ErrorMessage))
                    .col(timestamp_with_time_zone(Attempts::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(Attempts::UpdatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        // One attempt row per swap order, ever
        manager
            .create_index(
                Index::create()
                    .name("idx_attempts_order_id")
                    .table(Attempts::Table)
                    .col(Attempts::OrderId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Attempt history per plan
        manager
            .create_index(
                Index::create()
                    .name("idx_attempts_plan_id")
                    .table(Attempts::Table)
                    .col(Attempts::PlanId)
                    .to_owned(),
            )
            .await?;

        // Reconciliation scan over non-terminal states
        manager
            .create_index(
                Index::create()
                    .name("idx_attempts_state")
                    .table(Attempts::Table)
                    .col(Attempts::State)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Attempts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Attempts {
    Table,
    Id,
    PlanId,
    OrderId,
    State,
    RequiredAmount,
    DepositAddress,
    OrderDestination,
    ApproveTxHash,
    TransferTxHash,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}
