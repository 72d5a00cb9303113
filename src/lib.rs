// src/lib.rs

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use services::credential_store::CredentialStore;
use services::signer::KeystoreSigner;
use services::swap_gateway::SwapOrderGateway;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub signer: Arc<KeystoreSigner>,
    pub credentials: Arc<dyn CredentialStore>,
    pub swap: Arc<dyn SwapOrderGateway>,
}

pub mod entities {
    pub mod prelude;
    pub mod attempts;
    pub mod dca_plans;
    pub mod wallets;
}

pub mod services {
    pub mod chain_client;
    pub mod credential_store;
    pub mod executor;
    pub mod networks;
    pub mod plan_store;
    pub mod preflight;
    pub mod signer;
    pub mod state_machine;
    pub mod swap_gateway;
}

pub mod models {
    pub mod notification;
    pub mod plan;
    pub mod wallet;
}

pub mod handlers {
    pub mod order;
    pub mod plan;
    pub mod wallet;
}

pub mod jobs;
