pub use sea_orm_migration::prelude::*;

mod m20260601_000001_create_dca_plans;
mod m20260601_000002_create_attempts;
mod m20260601_000003_create_wallets;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260601_000001_create_dca_plans::Migration),
            Box::new(m20260601_000002_create_attempts::Migration),
            Box::new(m20260601_000003_create_wallets::Migration),
        ]
    }
}
