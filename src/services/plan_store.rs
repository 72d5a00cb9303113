//! Durable store for plans and attempts
//!
//! The executor never touches the database directly; it goes through
//! [`PlanStore`] so tests can substitute an in-memory implementation. The
//! sea-orm implementation below is the single source of truth across ticks
//! and restarts. State transitions on attempts are compare-and-set updates
//! (`UPDATE ... WHERE id = ? AND state = ?`), which is what makes the
//! `sending` lock observable by any process instance.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use sea_orm::sea_query::Expr;

use crate::entities::{attempts, dca_plans, prelude::*, wallets};
use crate::services::state_machine::AttemptState;

/// Plan execution states persisted on the plan row
pub mod plan_states {
    pub const IDLE: &str = "idle";
    pub const AWAITING_ORDER: &str = "awaiting-order";
    pub const ATTEMPT_IN_PROGRESS: &str = "attempt-in-progress";
}

#[derive(Debug)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

impl From<sea_orm::DbErr> for StoreError {
    fn from(e: sea_orm::DbErr) -> Self {
        StoreError(e.to_string())
    }
}

/// Fields for a fresh attempt row (always starts `scheduled`)
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub plan_id: i32,
    pub order_id: String,
    pub required_amount: Decimal,
    pub deposit_address: String,
    pub order_destination: String,
}

#[async_trait::async_trait]
pub trait PlanStore: Send + Sync {
    /// Active, non-deleted plans with next_run_at <= now
    async fn due_plans(&self, now: DateTime<Utc>)
        -> Result<Vec<dca_plans::Model>, StoreError>;

    async fn plan_by_id(&self, plan_id: i32) -> Result<Option<dca_plans::Model>, StoreError>;

    async fn wallet_for(&self, owner_id: i64) -> Result<Option<wallets::Model>, StoreError>;

    async fn find_attempt_by_order(
        &self,
        order_id: &str,
    ) -> Result<Option<attempts::Model>, StoreError>;

    async fn insert_attempt(&self, new: NewAttempt) -> Result<attempts::Model, StoreError>;

    /// Compare-and-set `from` -> `sending`. Returns false if another
    /// execution won the row first.
    async fn try_mark_sending(
        &self,
        attempt_id: i32,
        from: AttemptState,
    ) -> Result<bool, StoreError>;

    async fn record_approve_hash(&self, attempt_id: i32, hash: &str) -> Result<(), StoreError>;

    /// Persisted immediately after broadcast, before the receipt wait
    async fn record_transfer_hash(&self, attempt_id: i32, hash: &str) -> Result<(), StoreError>;

    /// Compare-and-set to a terminal/blocked state. `mark_sent` and
    /// `mark_failed` accept `sending` or `blocked` as the prior state (the
    /// latter is the reconciliation path); `mark_blocked` only `sending`.
    /// Each returns false if the row had already been settled elsewhere.
    async fn mark_sent(&self, attempt_id: i32) -> Result<bool, StoreError>;
    async fn mark_blocked(&self, attempt_id: i32, error: &str) -> Result<bool, StoreError>;
    async fn mark_failed(&self, attempt_id: i32, error: &str) -> Result<bool, StoreError>;

    async fn set_active_order(
        &self,
        plan_id: i32,
        order_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Release the plan's active-order reference, but only while it still
    /// points at `order_id` (a later order must not be clobbered)
    async fn clear_active_order(&self, plan_id: i32, order_id: &str) -> Result<(), StoreError>;

    async fn set_plan_state(&self, plan_id: i32, state: &str) -> Result<(), StoreError>;

    /// next_run_at moves to now + interval; never backwards
    async fn advance_schedule(&self, plan_id: i32, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Non-terminal attempts untouched since `cutoff`, oldest first, for the
    /// bounded reconciliation pass
    async fn stale_inflight_attempts(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<attempts::Model>, StoreError>;
}

/// sea-orm implementation over Postgres
#[derive(Clone)]
pub struct SeaPlanStore {
    db: DatabaseConnection,
}

impl SeaPlanStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn cas_attempt_state(
        &self,
        attempt_id: i32,
        from: &[AttemptState],
        to: AttemptState,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let from_strs: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let mut update = Attempts::update_many()
            .col_expr(attempts::Column::State, Expr::value(to.as_str()))
            .col_expr(attempts::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(error) = error {
            update = update.col_expr(attempts::Column::ErrorMessage, Expr::value(error));
        }
        let result = update
            .filter(attempts::Column::Id.eq(attempt_id))
            .filter(attempts::Column::State.is_in(from_strs))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }
}

#[async_trait::async_trait]
impl PlanStore for SeaPlanStore {
    async fn due_plans(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<dca_plans::Model>, StoreError> {
        Ok(DcaPlans::find()
            .filter(dca_plans::Column::Active.eq(true))
            .filter(dca_plans::Column::Deleted.eq(false))
            .filter(dca_plans::Column::NextRunAt.lte(now))
            .order_by_asc(dca_plans::Column::NextRunAt)
            .all(&self.db)
            .await?)
    }

    async fn plan_by_id(&self, plan_id: i32) -> Result<Option<dca_plans::Model>, StoreError> {
        Ok(DcaPlans::find_by_id(plan_id).one(&self.db).await?)
    }

    async fn wallet_for(&self, owner_id: i64) -> Result<Option<wallets::Model>, StoreError> {
        Ok(Wallets::find()
            .filter(wallets::Column::OwnerId.eq(owner_id))
            .one(&self.db)
            .await?)
    }

    async fn find_attempt_by_order(
        &self,
        order_id: &str,
    ) -> Result<Option<attempts::Model>, StoreError> {
        Ok(Attempts::find()
            .filter(attempts::Column::OrderId.eq(order_id))
            .one(&self.db)
            .await?)
    }

    async fn insert_attempt(&self, new: NewAttempt) -> Result<attempts::Model, StoreError> {
        let now: DateTime<Utc> = Utc::now();
        let model = attempts::ActiveModel {
            plan_id: Set(new.plan_id),
            order_id: Set(new.order_id),
            state: Set(AttemptState::Scheduled.as_str().to_string()),
            required_amount: Set(new.required_amount),
            deposit_address: Set(new.deposit_address),
            order_destination: Set(new.order_destination),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };
        Ok(model.insert(&self.db).await?)
    }

    async fn try_mark_sending(
        &self,
        attempt_id: i32,
        from: AttemptState,
    ) -> Result<bool, StoreError> {
        self.cas_attempt_state(attempt_id, &[from], AttemptState::Sending, None)
            .await
    }

    async fn record_approve_hash(&self, attempt_id: i32, hash: &str) -> Result<(), StoreError> {
        Attempts::update_many()
            .col_expr(attempts::Column::ApproveTxHash, Expr::value(hash))
            .col_expr(attempts::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(attempts::Column::Id.eq(attempt_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn record_transfer_hash(&self, attempt_id: i32, hash: &str) -> Result<(), StoreError> {
        // Only ever set once; the hash is never reassigned
        Attempts::update_many()
            .col_expr(attempts::Column::TransferTxHash, Expr::value(hash))
            .col_expr(attempts::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(attempts::Column::Id.eq(attempt_id))
            .filter(attempts::Column::TransferTxHash.is_null())
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn mark_sent(&self, attempt_id: i32) -> Result<bool, StoreError> {
        self.cas_attempt_state(
            attempt_id,
            &[AttemptState::Sending, AttemptState::Blocked],
            AttemptState::Sent,
            None,
        )
        .await
    }

    async fn mark_blocked(&self, attempt_id: i32, error: &str) -> Result<bool, StoreError> {
        self.cas_attempt_state(
            attempt_id,
            &[AttemptState::Sending],
            AttemptState::Blocked,
            Some(error),
        )
        .await
    }

    async fn mark_failed(&self, attempt_id: i32, error: &str) -> Result<bool, StoreError> {
        self.cas_attempt_state(
            attempt_id,
            &[AttemptState::Sending, AttemptState::Blocked],
            AttemptState::Failed,
            Some(error),
        )
        .await
    }

    async fn set_active_order(
        &self,
        plan_id: i32,
        order_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        DcaPlans::update_many()
            .col_expr(dca_plans::Column::ActiveOrderId, Expr::value(order_id))
            .col_expr(
                dca_plans::Column::ActiveOrderExpiresAt,
                Expr::value(expires_at),
            )
            .col_expr(
                dca_plans::Column::State,
                Expr::value(plan_states::AWAITING_ORDER),
            )
            .col_expr(dca_plans::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(dca_plans::Column::Id.eq(plan_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn clear_active_order(&self, plan_id: i32, order_id: &str) -> Result<(), StoreError> {
        DcaPlans::update_many()
            .col_expr(
                dca_plans::Column::ActiveOrderId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                dca_plans::Column::ActiveOrderExpiresAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(dca_plans::Column::State, Expr::value(plan_states::IDLE))
            .col_expr(dca_plans::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(dca_plans::Column::Id.eq(plan_id))
            .filter(dca_plans::Column::ActiveOrderId.eq(order_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn set_plan_state(&self, plan_id: i32, state: &str) -> Result<(), StoreError> {
        DcaPlans::update_many()
            .col_expr(dca_plans::Column::State, Expr::value(state))
            .col_expr(dca_plans::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(dca_plans::Column::Id.eq(plan_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn advance_schedule(&self, plan_id: i32, now: DateTime<Utc>) -> Result<(), StoreError> {
        let plan = DcaPlans::find_by_id(plan_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError(format!("plan {} not found", plan_id)))?;

        let next_run = now + Duration::seconds(plan.interval_secs);
        // Monotonic guard: never move the schedule backwards
        DcaPlans::update_many()
            .col_expr(dca_plans::Column::NextRunAt, Expr::value(next_run))
            .col_expr(dca_plans::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(dca_plans::Column::Id.eq(plan_id))
            .filter(dca_plans::Column::NextRunAt.lt(next_run))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn stale_inflight_attempts(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<attempts::Model>, StoreError> {
        Ok(Attempts::find()
            .filter(attempts::Column::State.is_in([
                AttemptState::Sending.as_str(),
                AttemptState::Blocked.as_str(),
            ]))
            .filter(attempts::Column::UpdatedAt.lt(cutoff))
            .order_by_asc(attempts::Column::UpdatedAt)
            .limit(limit)
            .all(&self.db)
            .await?)
    }
}
