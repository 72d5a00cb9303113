pub use super::attempts::Entity as Attempts;
pub use super::dca_plans::Entity as DcaPlans;
pub use super::wallets::Entity as Wallets;
