//! In-memory fakes for executor tests
//!
//! The executor only talks to traits, so the whole state machine can be
//! exercised without a database, an RPC node or the swap service.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use autodca_backend::entities::{attempts, dca_plans, wallets};
use autodca_backend::models::notification::{Notification, Notifier};
use autodca_backend::services::chain_client::{ChainError, ChainGateway, ReceiptStatus};
use autodca_backend::services::networks::NetworkConfig;
use autodca_backend::services::plan_store::{NewAttempt, PlanStore, StoreError};
use autodca_backend::services::state_machine::AttemptState;
use autodca_backend::services::swap_gateway::{
    OrderStatus, PairLimits, SwapError, SwapOrder, SwapOrderGateway,
};

pub const OWNER: i64 = 1;
pub const WALLET_ADDRESS: &str = "0x1111111111111111111111111111111111111111";
pub const DEPOSIT_ADDRESS: &str = "0x2222222222222222222222222222222222222222";
pub const DESTINATION: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

// ---------------------------------------------------------------------------
// Plan store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryStore {
    pub plans: Mutex<HashMap<i32, dca_plans::Model>>,
    pub attempts: Mutex<HashMap<i32, attempts::Model>>,
    pub wallets: Mutex<HashMap<i64, wallets::Model>>,
    next_attempt_id: AtomicI32,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_attempt_id: AtomicI32::new(1),
            ..Default::default()
        })
    }

    pub fn seed_wallet(&self, owner_id: i64) {
        self.wallets.lock().insert(
            owner_id,
            wallets::Model {
                id: owner_id as i32,
                owner_id,
                address: WALLET_ADDRESS.to_string(),
                keystore_path: format!("keystores/user_{}_wallet.json", owner_id),
                created_at: Utc::now().into(),
            },
        );
    }

    pub fn seed_plan(&self, id: i32, amount: Decimal, next_run_at: DateTime<Utc>) {
        self.plans.lock().insert(
            id,
            dca_plans::Model {
                id,
                owner_id: OWNER,
                network_key: "USDT-ARB".to_string(),
                amount,
                destination_asset: "BTC".to_string(),
                destination_address: DESTINATION.to_string(),
                interval_secs: 3600,
                next_run_at: next_run_at.into(),
                state: "idle".to_string(),
                active_order_id: None,
                active_order_expires_at: None,
                active: true,
                deleted: false,
                created_at: Utc::now().into(),
                updated_at: Utc::now().into(),
            },
        );
    }

    /// Insert an attempt row directly, bypassing the normal lifecycle
    /// (simulates state left behind by an earlier process run)
    pub fn seed_attempt(
        &self,
        plan_id: i32,
        order_id: &str,
        state: AttemptState,
        required_amount: Decimal,
        transfer_tx_hash: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> i32 {
        let id = self.next_attempt_id.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().insert(
            id,
            attempts::Model {
                id,
                plan_id,
                order_id: order_id.to_string(),
                state: state.as_str().to_string(),
                required_amount,
                deposit_address: DEPOSIT_ADDRESS.to_string(),
                order_destination: DESTINATION.to_string(),
                approve_tx_hash: None,
                transfer_tx_hash: transfer_tx_hash.map(|s| s.to_string()),
                error_message: None,
                created_at: updated_at.into(),
                updated_at: updated_at.into(),
            },
        );
        id
    }

    pub fn set_active_order_raw(&self, plan_id: i32, order_id: &str, expires_at: DateTime<Utc>) {
        let mut plans = self.plans.lock();
        let plan = plans.get_mut(&plan_id).expect("plan seeded");
        plan.active_order_id = Some(order_id.to_string());
        plan.active_order_expires_at = Some(expires_at.into());
    }

    pub fn plan(&self, plan_id: i32) -> dca_plans::Model {
        self.plans.lock().get(&plan_id).expect("plan exists").clone()
    }

    pub fn attempt_by_order(&self, order_id: &str) -> Option<attempts::Model> {
        self.attempts
            .lock()
            .values()
            .find(|a| a.order_id == order_id)
            .cloned()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    fn cas(
        &self,
        attempt_id: i32,
        from: &[AttemptState],
        to: AttemptState,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut attempts = self.attempts.lock();
        let Some(attempt) = attempts.get_mut(&attempt_id) else {
            return Ok(false);
        };
        if !from.iter().any(|s| attempt.state == s.as_str()) {
            return Ok(false);
        }
        attempt.state = to.as_str().to_string();
        if let Some(error) = error {
            attempt.error_message = Some(error.to_string());
        }
        attempt.updated_at = Utc::now().into();
        Ok(true)
    }
}

#[async_trait::async_trait]
impl PlanStore for InMemoryStore {
    async fn due_plans(&self, now: DateTime<Utc>) -> Result<Vec<dca_plans::Model>, StoreError> {
        let mut due: Vec<_> = self
            .plans
            .lock()
            .values()
            .filter(|p| p.active && !p.deleted && p.next_run_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|p| p.next_run_at);
        Ok(due)
    }

    async fn plan_by_id(&self, plan_id: i32) -> Result<Option<dca_plans::Model>, StoreError> {
        Ok(self.plans.lock().get(&plan_id).cloned())
    }

    async fn wallet_for(&self, owner_id: i64) -> Result<Option<wallets::Model>, StoreError> {
        Ok(self.wallets.lock().get(&owner_id).cloned())
    }

    async fn find_attempt_by_order(
        &self,
        order_id: &str,
    ) -> Result<Option<attempts::Model>, StoreError> {
        Ok(self.attempt_by_order(order_id))
    }

    async fn insert_attempt(&self, new: NewAttempt) -> Result<attempts::Model, StoreError> {
        let id = self.next_attempt_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let model = attempts::Model {
            id,
            plan_id: new.plan_id,
            order_id: new.order_id,
            state: AttemptState::Scheduled.as_str().to_string(),
            required_amount: new.required_amount,
            deposit_address: new.deposit_address,
            order_destination: new.order_destination,
            approve_tx_hash: None,
            transfer_tx_hash: None,
            error_message: None,
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.attempts.lock().insert(id, model.clone());
        Ok(model)
    }

    async fn try_mark_sending(
        &self,
        attempt_id: i32,
        from: AttemptState,
    ) -> Result<bool, StoreError> {
        self.cas(attempt_id, &[from], AttemptState::Sending, None)
    }

    async fn record_approve_hash(&self, attempt_id: i32, hash: &str) -> Result<(), StoreError> {
        if let Some(attempt) = self.attempts.lock().get_mut(&attempt_id) {
            attempt.approve_tx_hash = Some(hash.to_string());
            attempt.updated_at = Utc::now().into();
        }
        Ok(())
    }

    async fn record_transfer_hash(&self, attempt_id: i32, hash: &str) -> Result<(), StoreError> {
        if let Some(attempt) = self.attempts.lock().get_mut(&attempt_id) {
            if attempt.transfer_tx_hash.is_none() {
                attempt.transfer_tx_hash = Some(hash.to_string());
                attempt.updated_at = Utc::now().into();
            }
        }
        Ok(())
    }

    async fn mark_sent(&self, attempt_id: i32) -> Result<bool, StoreError> {
        self.cas(
            attempt_id,
            &[AttemptState::Sending, AttemptState::Blocked],
            AttemptState::Sent,
            None,
        )
    }

    async fn mark_blocked(&self, attempt_id: i32, error: &str) -> Result<bool, StoreError> {
        self.cas(
            attempt_id,
            &[AttemptState::Sending],
            AttemptState::Blocked,
            Some(error),
        )
    }

    async fn mark_failed(&self, attempt_id: i32, error: &str) -> Result<bool, StoreError> {
        self.cas(
            attempt_id,
            &[AttemptState::Sending, AttemptState::Blocked],
            AttemptState::Failed,
            Some(error),
        )
    }

    async fn set_active_order(
        &self,
        plan_id: i32,
        order_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut plans = self.plans.lock();
        if let Some(plan) = plans.get_mut(&plan_id) {
            plan.active_order_id = Some(order_id.to_string());
            plan.active_order_expires_at = Some(expires_at.into());
            plan.state = "awaiting-order".to_string();
            plan.updated_at = Utc::now().into();
        }
        Ok(())
    }

    async fn clear_active_order(&self, plan_id: i32, order_id: &str) -> Result<(), StoreError> {
        let mut plans = self.plans.lock();
        if let Some(plan) = plans.get_mut(&plan_id) {
            if plan.active_order_id.as_deref() == Some(order_id) {
                plan.active_order_id = None;
                plan.active_order_expires_at = None;
                plan.state = "idle".to_string();
                plan.updated_at = Utc::now().into();
            }
        }
        Ok(())
    }

    async fn set_plan_state(&self, plan_id: i32, state: &str) -> Result<(), StoreError> {
        if let Some(plan) = self.plans.lock().get_mut(&plan_id) {
            plan.state = state.to_string();
        }
        Ok(())
    }

    async fn advance_schedule(&self, plan_id: i32, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut plans = self.plans.lock();
        let Some(plan) = plans.get_mut(&plan_id) else {
            return Err(StoreError(format!("plan {} not found", plan_id)));
        };
        let next_run = now + Duration::seconds(plan.interval_secs);
        if plan.next_run_at < next_run {
            plan.next_run_at = next_run.into();
        }
        Ok(())
    }

    async fn stale_inflight_attempts(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<attempts::Model>, StoreError> {
        let mut stale: Vec<_> = self
            .attempts
            .lock()
            .values()
            .filter(|a| {
                (a.state == AttemptState::Sending.as_str()
                    || a.state == AttemptState::Blocked.as_str())
                    && a.updated_at < cutoff
            })
            .cloned()
            .collect();
        stale.sort_by_key(|a| a.updated_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }
}

// ---------------------------------------------------------------------------
// Chain gateway
// ---------------------------------------------------------------------------

pub struct FakeChain {
    pub token_balance: Mutex<Decimal>,
    pub native_balance: Mutex<u128>,
    pub allowance: Mutex<Decimal>,
    /// Injected failure for broadcast_transfer calls
    pub transfer_failure: Mutex<Option<ChainError>>,
    /// When set, await_confirmation fails with this error (hash stays valid)
    pub confirmation_failure: Mutex<Option<ChainError>>,
    /// What one-shot receipt lookups report (reconciliation path)
    pub receipt: Mutex<ReceiptStatus>,
    pub approvals: Mutex<Vec<(String, Decimal)>>,
    pub broadcasts: Mutex<Vec<(String, Decimal)>>,
    tx_counter: AtomicU64,
}

impl FakeChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            token_balance: Mutex::new(dec!(1000)),
            native_balance: Mutex::new(10_000_000_000_000_000), // 0.01 ETH
            allowance: Mutex::new(Decimal::ZERO),
            transfer_failure: Mutex::new(None),
            confirmation_failure: Mutex::new(None),
            receipt: Mutex::new(ReceiptStatus::Confirmed),
            approvals: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
            tx_counter: AtomicU64::new(1),
        })
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().len()
    }

    fn next_hash(&self, prefix: &str) -> String {
        format!(
            "0x{}{:04}",
            prefix,
            self.tx_counter.fetch_add(1, Ordering::SeqCst)
        )
    }
}

#[async_trait::async_trait]
impl ChainGateway for FakeChain {
    async fn token_balance(&self, _network: &str, _owner: &str) -> Result<Decimal, ChainError> {
        Ok(*self.token_balance.lock())
    }

    async fn native_balance(&self, _network: &str, _owner: &str) -> Result<u128, ChainError> {
        Ok(*self.native_balance.lock())
    }

    async fn allowance(
        &self,
        _network: &str,
        _owner: &str,
        _spender: &str,
    ) -> Result<Decimal, ChainError> {
        Ok(*self.allowance.lock())
    }

    async fn estimate_approve_gas(
        &self,
        _network: &str,
        _owner: &str,
        _spender: &str,
        _amount: Decimal,
    ) -> Result<u64, ChainError> {
        Ok(60_000)
    }

    async fn estimate_transfer_gas(
        &self,
        _network: &str,
        _owner: &str,
        _to: &str,
        _amount: Decimal,
    ) -> Result<u64, ChainError> {
        Ok(65_000)
    }

    async fn gas_price(&self, _network: &str) -> Result<u128, ChainError> {
        Ok(1_000_000_000) // 1 gwei
    }

    async fn send_approval(
        &self,
        _network: &str,
        _owner_id: i64,
        spender: &str,
        amount: Decimal,
    ) -> Result<String, ChainError> {
        self.approvals.lock().push((spender.to_string(), amount));
        *self.allowance.lock() = amount;
        Ok(self.next_hash("aaaa"))
    }

    async fn broadcast_transfer(
        &self,
        _network: &str,
        _owner_id: i64,
        to: &str,
        amount: Decimal,
    ) -> Result<String, ChainError> {
        if let Some(failure) = self.transfer_failure.lock().clone() {
            return Err(failure);
        }
        self.broadcasts.lock().push((to.to_string(), amount));
        // The allowance is consumed by the transfer
        *self.allowance.lock() = Decimal::ZERO;
        Ok(self.next_hash("bbbb"))
    }

    async fn receipt_status(
        &self,
        _network: &str,
        _tx_hash: &str,
    ) -> Result<ReceiptStatus, ChainError> {
        Ok(*self.receipt.lock())
    }

    async fn await_confirmation(
        &self,
        _network: &str,
        _tx_hash: &str,
    ) -> Result<ReceiptStatus, ChainError> {
        if let Some(failure) = self.confirmation_failure.lock().clone() {
            return Err(failure);
        }
        Ok(*self.receipt.lock())
    }
}

// ---------------------------------------------------------------------------
// Swap gateway
// ---------------------------------------------------------------------------

pub struct FakeSwap {
    pub limits: Mutex<PairLimits>,
    pub create_failure: Mutex<Option<SwapError>>,
    /// Overrides the required amount (defaults to the requested amount)
    pub required_amount: Mutex<Option<Decimal>>,
    /// Overrides the destination the order claims (tamper simulation)
    pub destination_override: Mutex<Option<String>>,
    pub order_ttl_secs: i64,
    pub created: Mutex<Vec<SwapOrder>>,
    order_counter: AtomicU64,
}

impl FakeSwap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            limits: Mutex::new(PairLimits {
                min: dec!(10),
                max: dec!(500),
            }),
            create_failure: Mutex::new(None),
            required_amount: Mutex::new(None),
            destination_override: Mutex::new(None),
            order_ttl_secs: 1800,
            created: Mutex::new(Vec::new()),
            order_counter: AtomicU64::new(1),
        })
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

#[async_trait::async_trait]
impl SwapOrderGateway for FakeSwap {
    async fn pair_limits(&self, _network: &NetworkConfig) -> Result<PairLimits, SwapError> {
        Ok(*self.limits.lock())
    }

    async fn create_order(
        &self,
        _network: &NetworkConfig,
        amount: Decimal,
        _dest_asset: &str,
        dest_address: &str,
    ) -> Result<SwapOrder, SwapError> {
        if let Some(failure) = self.create_failure.lock().clone() {
            return Err(failure);
        }
        let n = self.order_counter.fetch_add(1, Ordering::SeqCst);
        let order = SwapOrder {
            order_id: format!("ORD{}", n),
            deposit_address: DEPOSIT_ADDRESS.to_string(),
            required_amount: self.required_amount.lock().unwrap_or(amount),
            destination_address: self
                .destination_override
                .lock()
                .clone()
                .unwrap_or_else(|| dest_address.to_string()),
            expires_at: Utc::now() + Duration::seconds(self.order_ttl_secs),
            order_url: format!("https://fixedfloat.com/order/ORD{}", n),
        };
        self.created.lock().push(order.clone());
        Ok(order)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, SwapError> {
        Ok(OrderStatus {
            order_id: order_id.to_string(),
            status: "NEW".to_string(),
            destination_tx_id: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(i64, Notification)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn last(&self) -> Option<Notification> {
        self.sent.lock().last().map(|(_, n)| n.clone())
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, owner_id: i64, notification: Notification) {
        self.sent.lock().push((owner_id, notification));
    }
}
