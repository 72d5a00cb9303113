use axum::{
    routing::{delete, get, post},
    Router,
};
use sea_orm::{Database, EntityTrait};
use sea_orm_migration::MigratorTrait;
use std::env;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autodca_backend::entities::prelude::Wallets;
use autodca_backend::handlers;
use autodca_backend::jobs::executor_tick::start_executor_job;
use autodca_backend::services::chain_client::EvmChainClient;
use autodca_backend::services::credential_store::{CredentialStore, KeyringCredentialStore};
use autodca_backend::services::executor::DcaExecutor;
use autodca_backend::services::plan_store::SeaPlanStore;
use autodca_backend::services::signer::{KeystoreSigner, PasswordCache};
use autodca_backend::services::swap_gateway::FixedRateSwapClient;
use autodca_backend::models::notification::LogNotifier;
use autodca_backend::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,autodca_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Connect to database
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    tracing::info!("Connecting to database...");
    let db = Database::connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    let keystore_dir = env::var("KEYSTORE_DIR").unwrap_or_else(|_| "keystores".to_string());
    let tick_secs: u64 = env::var("TICK_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);
    let dry_run = env::var("DRY_RUN")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let swap_api_url =
        env::var("SWAP_API_URL").unwrap_or_else(|_| "https://ff.io/api/v2".to_string());
    let swap_api_key = env::var("SWAP_API_KEY").unwrap_or_default();
    let swap_api_secret = env::var("SWAP_API_SECRET").unwrap_or_default();
    if swap_api_key.is_empty() {
        tracing::warn!("SWAP_API_KEY not set; order creation will be rejected by the service");
    }

    // Startup recovery: wallet passwords come back from the OS keyring into
    // the in-memory cache. Attempt state is NOT touched here; the tick loop
    // resumes blocked orders on its own.
    let passwords = PasswordCache::new();
    let credentials: Arc<dyn CredentialStore> = Arc::new(KeyringCredentialStore);
    let wallets = Wallets::find()
        .all(&db)
        .await
        .expect("Failed to load wallets");
    for wallet in &wallets {
        match credentials.load(wallet.owner_id) {
            Ok(Some(password)) => passwords.set(wallet.owner_id, password),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                owner_id = wallet.owner_id,
                error = %e,
                "Could not load wallet password from keyring"
            ),
        }
    }
    tracing::info!(
        wallets = wallets.len(),
        cached_passwords = passwords.len(),
        "Wallet passwords restored"
    );

    let signer = Arc::new(KeystoreSigner::new(keystore_dir, passwords));
    let chain = Arc::new(
        EvmChainClient::new(signer.clone()).expect("Failed to initialize chain client"),
    );
    let swap = Arc::new(FixedRateSwapClient::new(
        swap_api_url,
        swap_api_key,
        swap_api_secret,
    ));
    let store = Arc::new(SeaPlanStore::new(db.clone()));

    let executor = Arc::new(DcaExecutor::new(
        store,
        chain,
        swap.clone(),
        Arc::new(LogNotifier),
        dry_run,
    ));
    start_executor_job(executor, tick_secs).await;
    tracing::info!(tick_secs = tick_secs, dry_run = dry_run, "Executor started");

    let state = AppState {
        db,
        signer,
        credentials,
        swap,
    };

    // Build router
    let app = Router::new()
        .route(
            "/api/plans",
            post(handlers::plan::create_plan).get(handlers::plan::list_plans),
        )
        .route("/api/plans/{plan_id}", delete(handlers::plan::cancel_plan))
        .route("/api/wallets", post(handlers::wallet::register_wallet))
        .route(
            "/api/wallets/{owner_id}/password",
            post(handlers::wallet::set_password),
        )
        .route(
            "/api/wallets/{owner_id}",
            delete(handlers::wallet::delete_wallet),
        )
        .route(
            "/api/orders/{order_id}",
            get(handlers::order::get_order_status),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind");

    tracing::info!("Server listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
