//! Executor / scheduler core
//!
//! One tick scans the store for due plans and drives each through the
//! execution state machine: open a swap order, preflight, approve, transfer,
//! classify failures, advance or hold the schedule. The store is the single
//! source of truth; nothing here survives a tick except what was written
//! through it, which is what makes restarts and duplicated ticks safe.
//!
//! The at-most-once-send contract rests on two writes:
//! - the `sending` compare-and-set happens *before* any network call, so a
//!   concurrent tick (or another process instance) observes the lock;
//! - the transfer hash is persisted immediately after broadcast, before the
//!   receipt wait, so a crash can never lead to a second broadcast for the
//!   same attempt.

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::entities::{attempts, dca_plans, wallets};
use crate::models::notification::{Notification, Notifier};
use crate::services::chain_client::{ChainError, ChainGateway, ReceiptStatus};
use crate::services::networks::{self, NetworkConfig};
use crate::services::plan_store::{plan_states, NewAttempt, PlanStore, StoreError};
use crate::services::preflight::{run_preflight, PreflightInput, PreflightReport};
use crate::services::state_machine::{transition, AttemptState, ExecEvent, ScheduleAction};
use crate::services::swap_gateway::{SwapOrder, SwapOrderGateway};

/// Hard cap on a single order's source amount, on top of the pair maximum
const MAX_ORDER_SOURCE_UNITS: u32 = 500;

/// Reconciliation only looks at attempts untouched for this long
const STALE_AFTER_SECS: i64 = 600;

/// Rows per reconciliation pass; the rest wait for the next tick
const RECONCILE_BATCH: u64 = 20;

pub struct DcaExecutor {
    store: Arc<dyn PlanStore>,
    chain: Arc<dyn ChainGateway>,
    swap: Arc<dyn SwapOrderGateway>,
    notifier: Arc<dyn Notifier>,
    dry_run: bool,
}

/// Outcome of the approve+transfer pipeline for one attempt
struct TransferOutcome {
    approve_tx_hash: Option<String>,
    transfer_tx_hash: String,
    /// Broadcast returned a hash but no receipt was observed; counted as
    /// sent and reconciled out of band
    receipt_pending: bool,
}

impl DcaExecutor {
    pub fn new(
        store: Arc<dyn PlanStore>,
        chain: Arc<dyn ChainGateway>,
        swap: Arc<dyn SwapOrderGateway>,
        notifier: Arc<dyn Notifier>,
        dry_run: bool,
    ) -> Self {
        if dry_run {
            warn!("Executor running in DRY RUN mode: nothing will be broadcast or persisted");
        }
        Self {
            store,
            chain,
            swap,
            notifier,
            dry_run,
        }
    }

    /// One tick: reconcile stale attempts, then process every due plan.
    /// Plans of one owner run sequentially (one signing key, one nonce
    /// sequence); independent owners run concurrently.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.reconcile(now).await;

        let due = self.store.due_plans(now).await?;
        if due.is_empty() {
            return Ok(());
        }
        debug!(count = due.len(), "Processing due plans");

        let mut by_owner: BTreeMap<i64, Vec<dca_plans::Model>> = BTreeMap::new();
        for plan in due {
            by_owner.entry(plan.owner_id).or_default().push(plan);
        }

        join_all(by_owner.into_iter().map(|(owner_id, plans)| async move {
            for plan in plans {
                let plan_id = plan.id;
                if let Err(e) = self.process_plan(plan, now).await {
                    error!(
                        owner_id = owner_id,
                        plan_id = plan_id,
                        error = %e,
                        "Plan processing failed"
                    );
                }
            }
        }))
        .await;

        Ok(())
    }

    async fn process_plan(
        &self,
        plan: dca_plans::Model,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let wallet = match self.store.wallet_for(plan.owner_id).await? {
            Some(wallet) => wallet,
            None => {
                // Without a wallet nothing can be sent; the interval is
                // consumed and the user has to finish setup
                let error = format!(
                    "No wallet configured for owner {}; register one before the next interval",
                    plan.owner_id
                );
                self.fail_without_attempt(&plan, now, error).await?;
                return Ok(());
            }
        };

        match plan.active_order_id.clone() {
            None => self.start_new_order(plan, wallet, now).await,
            Some(order_id) => self.resume_order(plan, wallet, order_id, now).await,
        }
    }

    /// Step 1 of the tick: no order governs this plan yet, open one and
    /// execute it in the same tick.
    async fn start_new_order(
        &self,
        plan: dca_plans::Model,
        wallet: wallets::Model,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let config = match networks::get_network(&plan.network_key) {
            Ok(config) => config,
            Err(e) => {
                self.fail_without_attempt(&plan, now, e.to_string()).await?;
                return Ok(());
            }
        };

        // Pair limits gate order creation; a transient swap-service problem
        // leaves the plan untouched for the next tick
        match self.swap.pair_limits(config).await {
            Ok(limits) => {
                let effective_max = limits.max.min(Decimal::from(MAX_ORDER_SOURCE_UNITS));
                if plan.amount < limits.min || plan.amount > effective_max {
                    let error = format!(
                        "Amount {} {} is outside the allowed range ({} - {})",
                        plan.amount, config.token_symbol, limits.min, effective_max
                    );
                    self.reject_order(&plan, now, error).await?;
                    return Ok(());
                }
            }
            Err(e) if e.is_retryable() => {
                info!(plan_id = plan.id, error = %e, "Swap service not ready, will retry next tick");
                return Ok(());
            }
            Err(e) => {
                self.reject_order(&plan, now, e.to_string()).await?;
                return Ok(());
            }
        }

        let order = match self
            .swap
            .create_order(
                config,
                plan.amount,
                &plan.destination_asset,
                &plan.destination_address,
            )
            .await
        {
            Ok(order) => order,
            Err(e) if e.is_retryable() => {
                info!(plan_id = plan.id, error = %e, "Order creation deferred: {}", e);
                return Ok(());
            }
            Err(e) => {
                self.reject_order(&plan, now, e.to_string()).await?;
                return Ok(());
            }
        };

        info!(
            plan_id = plan.id,
            order_id = %order.order_id,
            required = %order.required_amount,
            "Order opened for plan"
        );

        if self.dry_run {
            // Previews only: no attempt row, no active-order reference,
            // nothing broadcast. The schedule still advances so the loop
            // does not re-run the same interval forever.
            self.dry_run_pass(&plan, &wallet, config, &order).await;
            self.store.advance_schedule(plan.id, now).await?;
            return Ok(());
        }

        let attempt = self
            .store
            .insert_attempt(NewAttempt {
                plan_id: plan.id,
                order_id: order.order_id.clone(),
                required_amount: order.required_amount,
                deposit_address: order.deposit_address.clone(),
                order_destination: order.destination_address.clone(),
            })
            .await?;
        self.store
            .set_active_order(plan.id, &order.order_id, order.expires_at)
            .await?;

        self.execute_attempt(&plan, &wallet, attempt, config, now)
            .await
    }

    /// Step 2 of the tick: an order already governs this plan; decide
    /// whether to execute, wait, or let go of it.
    async fn resume_order(
        &self,
        plan: dca_plans::Model,
        wallet: wallets::Model,
        order_id: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let attempt = match self.store.find_attempt_by_order(&order_id).await? {
            Some(attempt) => attempt,
            None => {
                // Order reference without an attempt row: a crash between
                // the two writes. Release the order; next tick starts clean.
                warn!(
                    plan_id = plan.id,
                    order_id = %order_id,
                    "Active order has no attempt row, releasing"
                );
                self.store.clear_active_order(plan.id, &order_id).await?;
                return Ok(());
            }
        };

        let state = match AttemptState::parse(&attempt.state) {
            Some(state) => state,
            None => {
                error!(
                    attempt_id = attempt.id,
                    state = %attempt.state,
                    "Unparseable attempt state"
                );
                return Ok(());
            }
        };

        match state {
            AttemptState::Sending => {
                // Another execution is in flight; mutual exclusion
                info!(
                    plan_id = plan.id,
                    order_id = %order_id,
                    "Attempt still sending, skipping this tick"
                );
                Ok(())
            }
            AttemptState::Sent => {
                // The schedule advanced when it was marked sent; holding on
                // to the order here is a consistency fault
                warn!(
                    plan_id = plan.id,
                    order_id = %order_id,
                    "Sent attempt still referenced as active order, clearing"
                );
                self.store.clear_active_order(plan.id, &order_id).await
            }
            AttemptState::Failed => self.store.clear_active_order(plan.id, &order_id).await,
            AttemptState::Blocked => {
                let expired = plan
                    .active_order_expires_at
                    .map(|expires| expires <= now)
                    .unwrap_or(true);
                if expired {
                    // A fresh order (and a fresh attempt row) next tick;
                    // this row stays blocked as history
                    let t = transition(AttemptState::Blocked, ExecEvent::OrderExpired)
                        .expect("blocked order expiry is a valid transition");
                    debug_assert!(t.clear_active_order);
                    info!(
                        plan_id = plan.id,
                        order_id = %order_id,
                        "Blocked order expired, releasing for a new order"
                    );
                    self.store.clear_active_order(plan.id, &order_id).await
                } else if attempt.transfer_tx_hash.is_some() {
                    // A broadcast may be on chain; reconciliation owns this
                    // row, re-sending is never allowed
                    debug!(
                        plan_id = plan.id,
                        order_id = %order_id,
                        "Blocked attempt has a broadcast hash, leaving to reconciliation"
                    );
                    Ok(())
                } else {
                    let config = match networks::get_network(&plan.network_key) {
                        Ok(config) => config,
                        Err(e) => {
                            error!(plan_id = plan.id, error = %e, "Network vanished from registry");
                            return Ok(());
                        }
                    };
                    self.execute_attempt(&plan, &wallet, attempt, config, now)
                        .await
                }
            }
            AttemptState::Scheduled => {
                let config = match networks::get_network(&plan.network_key) {
                    Ok(config) => config,
                    Err(e) => {
                        error!(plan_id = plan.id, error = %e, "Network vanished from registry");
                        return Ok(());
                    }
                };
                self.execute_attempt(&plan, &wallet, attempt, config, now)
                    .await
            }
        }
    }

    /// Step 3: run one attempt through preflight, approval and transfer.
    async fn execute_attempt(
        &self,
        plan: &dca_plans::Model,
        wallet: &wallets::Model,
        attempt: attempts::Model,
        config: &'static NetworkConfig,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let from_state = match AttemptState::parse(&attempt.state) {
            Some(state) => state,
            None => return Ok(()),
        };
        if transition(from_state, ExecEvent::StartExecution).is_err() {
            warn!(
                attempt_id = attempt.id,
                state = %attempt.state,
                "Attempt not executable from this state"
            );
            return Ok(());
        }

        // Durability point: the lock is written before any network call. If
        // the CAS loses, another tick/process already owns this attempt.
        if !self.store.try_mark_sending(attempt.id, from_state).await? {
            info!(
                attempt_id = attempt.id,
                "Lost the sending race, skipping"
            );
            return Ok(());
        }
        self.store
            .set_plan_state(plan.id, plan_states::ATTEMPT_IN_PROGRESS)
            .await?;

        info!(
            plan_id = plan.id,
            order_id = %attempt.order_id,
            amount = %attempt.required_amount,
            "Executing attempt"
        );

        match self.perform_transfer(plan, wallet, &attempt, config).await {
            Ok(outcome) => {
                let t = transition(AttemptState::Sending, ExecEvent::BroadcastConfirmed)
                    .expect("confirmed broadcast is a valid transition");
                if self.store.mark_sent(attempt.id).await? {
                    if t.schedule == ScheduleAction::Advance {
                        self.store.advance_schedule(plan.id, now).await?;
                    }
                    if t.clear_active_order {
                        self.store
                            .clear_active_order(plan.id, &attempt.order_id)
                            .await?;
                    }
                    info!(
                        order_id = %attempt.order_id,
                        transfer_tx = %outcome.transfer_tx_hash,
                        receipt_pending = outcome.receipt_pending,
                        "Attempt sent"
                    );
                    self.notifier
                        .notify(
                            plan.owner_id,
                            self.success_notification(plan, &attempt, config, &outcome),
                        )
                        .await;
                }
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                let t = transition(AttemptState::Sending, ExecEvent::RetryableFailure)
                    .expect("retryable failure is a valid transition");
                debug_assert_eq!(t.schedule, ScheduleAction::Hold);
                if self.store.mark_blocked(attempt.id, &e.to_string()).await? {
                    self.store
                        .set_plan_state(plan.id, plan_states::AWAITING_ORDER)
                        .await?;
                    warn!(
                        order_id = %attempt.order_id,
                        error = %e,
                        "Attempt blocked, schedule held"
                    );
                    self.notifier
                        .notify(
                            plan.owner_id,
                            Notification::ExecutionBlocked {
                                plan_id: plan.id,
                                order_id: attempt.order_id.clone(),
                                error: e.to_string(),
                            },
                        )
                        .await;
                }
                Ok(())
            }
            Err(e) => {
                let t = transition(AttemptState::Sending, ExecEvent::TerminalFailure)
                    .expect("terminal failure is a valid transition");
                if self.store.mark_failed(attempt.id, &e.to_string()).await? {
                    if t.schedule == ScheduleAction::Advance {
                        self.store.advance_schedule(plan.id, now).await?;
                    }
                    if t.clear_active_order {
                        self.store
                            .clear_active_order(plan.id, &attempt.order_id)
                            .await?;
                    }
                    error!(
                        order_id = %attempt.order_id,
                        error = %e,
                        "Attempt failed, interval consumed"
                    );
                    self.notifier
                        .notify(
                            plan.owner_id,
                            Notification::ExecutionFailed {
                                plan_id: plan.id,
                                order_id: Some(attempt.order_id.clone()),
                                error: e.to_string(),
                            },
                        )
                        .await;
                }
                Ok(())
            }
        }
    }

    /// Preflight, optional approval, transfer. Pure of store writes except
    /// for tx-hash persistence, which must happen mid-flight.
    async fn perform_transfer(
        &self,
        plan: &dca_plans::Model,
        wallet: &wallets::Model,
        attempt: &attempts::Model,
        config: &'static NetworkConfig,
    ) -> Result<TransferOutcome, ChainError> {
        let report = self.gather_and_check(plan, wallet, attempt, config).await?;
        let deposit = report.deposit_address.to_checksum(None);

        // Approval for exactly the required amount, never more
        let mut approve_tx_hash = None;
        let allowance = self
            .chain
            .allowance(&plan.network_key, &wallet.address, &deposit)
            .await?;
        if allowance < attempt.required_amount {
            match self
                .chain
                .send_approval(
                    &plan.network_key,
                    plan.owner_id,
                    &deposit,
                    attempt.required_amount,
                )
                .await
            {
                Ok(hash) => {
                    self.store
                        .record_approve_hash(attempt.id, &hash)
                        .await
                        .map_err(|e| ChainError::RpcTransient(e.to_string()))?;
                    approve_tx_hash = Some(hash);
                }
                Err(ChainError::AmbiguousBroadcast { tx_hash, detail }) => {
                    // The approval may have landed; keep the hash and retry
                    // the whole attempt later (allowance check will skip a
                    // confirmed approval)
                    let _ = self.store.record_approve_hash(attempt.id, &tx_hash).await;
                    return Err(ChainError::RpcTransient(format!(
                        "approval {} unconfirmed: {}",
                        tx_hash, detail
                    )));
                }
                Err(e) => return Err(e),
            }
        } else {
            debug!(
                order_id = %attempt.order_id,
                allowance = %allowance,
                "Sufficient allowance, no approval needed"
            );
        }

        let transfer_tx_hash = self
            .chain
            .broadcast_transfer(
                &plan.network_key,
                plan.owner_id,
                &deposit,
                attempt.required_amount,
            )
            .await?;
        // The hash must be durable before anything can go wrong while
        // waiting; this is what rules out a re-broadcast after a crash
        self.store
            .record_transfer_hash(attempt.id, &transfer_tx_hash)
            .await
            .map_err(|e| ChainError::AmbiguousBroadcast {
                tx_hash: transfer_tx_hash.clone(),
                detail: e.to_string(),
            })?;

        match self
            .chain
            .await_confirmation(&plan.network_key, &transfer_tx_hash)
            .await
        {
            Ok(ReceiptStatus::Confirmed) => Ok(TransferOutcome {
                approve_tx_hash,
                transfer_tx_hash,
                receipt_pending: false,
            }),
            Ok(ReceiptStatus::Reverted) => Err(ChainError::ChainRejected(format!(
                "transfer {} reverted on chain",
                transfer_tx_hash
            ))),
            // Hash in hand: the transfer counts as sent and is never
            // re-broadcast; the receipt is reconciled out of band
            Ok(_) | Err(_) => {
                warn!(
                    transfer_tx = %transfer_tx_hash,
                    "Broadcast accepted but receipt unavailable, counting as sent"
                );
                Ok(TransferOutcome {
                    approve_tx_hash,
                    transfer_tx_hash,
                    receipt_pending: true,
                })
            }
        }
    }

    /// Collect balances and gas readings, then run the pure preflight set.
    async fn gather_and_check(
        &self,
        plan: &dca_plans::Model,
        wallet: &wallets::Model,
        attempt: &attempts::Model,
        config: &'static NetworkConfig,
    ) -> Result<PreflightReport, ChainError> {
        let token_balance = self
            .chain
            .token_balance(&plan.network_key, &wallet.address)
            .await?;
        let native_balance_wei = self
            .chain
            .native_balance(&plan.network_key, &wallet.address)
            .await?;
        let approve_gas = self
            .chain
            .estimate_approve_gas(
                &plan.network_key,
                &wallet.address,
                &attempt.deposit_address,
                attempt.required_amount,
            )
            .await?;
        let transfer_gas = self
            .chain
            .estimate_transfer_gas(
                &plan.network_key,
                &wallet.address,
                &attempt.deposit_address,
                attempt.required_amount,
            )
            .await?;
        let gas_price_wei = self.chain.gas_price(&plan.network_key).await?;

        let input = PreflightInput {
            required_amount: attempt.required_amount,
            deposit_address: attempt.deposit_address.clone(),
            order_destination: attempt.order_destination.clone(),
            plan_destination: plan.destination_address.clone(),
            token_balance,
            native_balance_wei,
            approve_gas,
            transfer_gas,
            gas_price_wei,
            token_symbol: config.token_symbol.to_string(),
            native_symbol: config.native_symbol.to_string(),
        };
        let report = run_preflight(&input)?;
        debug!(
            order_id = %attempt.order_id,
            estimated_cost_wei = report.estimated_cost_wei,
            "Preflight passed"
        );
        Ok(report)
    }

    /// Dry-run: every check and every transaction preview, zero broadcasts,
    /// zero persisted attempts.
    async fn dry_run_pass(
        &self,
        plan: &dca_plans::Model,
        wallet: &wallets::Model,
        config: &'static NetworkConfig,
        order: &SwapOrder,
    ) {
        let preview = attempts::Model {
            id: 0,
            plan_id: plan.id,
            order_id: order.order_id.clone(),
            state: AttemptState::Scheduled.as_str().to_string(),
            required_amount: order.required_amount,
            deposit_address: order.deposit_address.clone(),
            order_destination: order.destination_address.clone(),
            approve_tx_hash: None,
            transfer_tx_hash: None,
            error_message: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        };

        let report = match self.gather_and_check(plan, wallet, &preview, config).await {
            Ok(report) => {
                info!(
                    order_id = %order.order_id,
                    "[DRY RUN] Preflight passed"
                );
                report
            }
            Err(e) => {
                warn!(order_id = %order.order_id, error = %e, "[DRY RUN] Preflight failed");
                self.notifier
                    .notify(
                        plan.owner_id,
                        Notification::ExecutionFailed {
                            plan_id: plan.id,
                            order_id: Some(order.order_id.clone()),
                            error: format!("[DRY RUN] {}", e),
                        },
                    )
                    .await;
                return;
            }
        };

        let approval_needed = match self
            .chain
            .allowance(&plan.network_key, &wallet.address, &order.deposit_address)
            .await
        {
            Ok(allowance) => allowance < order.required_amount,
            Err(_) => true,
        };
        if approval_needed {
            info!(
                order_id = %order.order_id,
                amount = %order.required_amount,
                spender = %order.deposit_address,
                "[DRY RUN] Approval preview (not sent)"
            );
        }
        info!(
            order_id = %order.order_id,
            amount = %order.required_amount,
            to = %order.deposit_address,
            estimated_cost_wei = report.estimated_cost_wei,
            "[DRY RUN] Transfer preview (not sent)"
        );

        self.notifier
            .notify(
                plan.owner_id,
                Notification::DryRunReport {
                    plan_id: plan.id,
                    order_id: order.order_id.clone(),
                    amount: order.required_amount.to_string(),
                    deposit_address: order.deposit_address.clone(),
                    approval_needed,
                    estimated_cost_wei: report.estimated_cost_wei.to_string(),
                },
            )
            .await;
    }

    /// Bounded pass over stale non-terminal attempts: settle anything with a
    /// broadcast hash against on-chain state, demote interrupted `sending`
    /// rows that never broadcast.
    async fn reconcile(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(STALE_AFTER_SECS);
        let stale = match self
            .store
            .stale_inflight_attempts(cutoff, RECONCILE_BATCH)
            .await
        {
            Ok(stale) => stale,
            Err(e) => {
                error!(error = %e, "Reconciliation scan failed");
                return;
            }
        };

        for attempt in stale {
            if let Err(e) = self.reconcile_attempt(&attempt, now).await {
                error!(
                    attempt_id = attempt.id,
                    order_id = %attempt.order_id,
                    error = %e,
                    "Reconciliation failed for attempt"
                );
            }
        }
    }

    async fn reconcile_attempt(
        &self,
        attempt: &attempts::Model,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let state = match AttemptState::parse(&attempt.state) {
            Some(state) => state,
            None => return Ok(()),
        };

        let plan = match self.store.plan_by_id(attempt.plan_id).await? {
            Some(plan) => plan,
            None => return Ok(()),
        };

        let Some(hash) = attempt.transfer_tx_hash.clone() else {
            // Interrupted before broadcast (crash mid-`sending`); safe to
            // retry the same order later
            if state == AttemptState::Sending {
                warn!(
                    attempt_id = attempt.id,
                    order_id = %attempt.order_id,
                    "Stale sending attempt without broadcast, demoting to blocked"
                );
                self.store
                    .mark_blocked(attempt.id, "execution interrupted before broadcast")
                    .await?;
                self.store
                    .set_plan_state(plan.id, plan_states::AWAITING_ORDER)
                    .await?;
            }
            return Ok(());
        };

        let status = match self.chain.receipt_status(&plan.network_key, &hash).await {
            Ok(status) => status,
            Err(e) => {
                debug!(tx_hash = %hash, error = %e, "Receipt check deferred");
                return Ok(());
            }
        };

        match status {
            ReceiptStatus::Confirmed => {
                if self.store.mark_sent(attempt.id).await? {
                    info!(
                        order_id = %attempt.order_id,
                        tx_hash = %hash,
                        "Reconciliation confirmed broadcast, settling as sent"
                    );
                    self.store.advance_schedule(plan.id, now).await?;
                    self.store
                        .clear_active_order(plan.id, &attempt.order_id)
                        .await?;
                    let config = networks::get_network(&plan.network_key).ok();
                    self.notifier
                        .notify(
                            plan.owner_id,
                            Notification::ExecutionSucceeded {
                                plan_id: plan.id,
                                order_id: attempt.order_id.clone(),
                                order_url: format!(
                                    "https://fixedfloat.com/order/{}",
                                    attempt.order_id
                                ),
                                amount: attempt.required_amount.to_string(),
                                deposit_address: attempt.deposit_address.clone(),
                                approve_tx_url: attempt.approve_tx_hash.as_ref().and_then(|h| {
                                    config.map(|c| networks::explorer_tx_url(c, h))
                                }),
                                transfer_tx_url: config
                                    .map(|c| networks::explorer_tx_url(c, &hash))
                                    .unwrap_or_else(|| hash.clone()),
                                receipt_pending: false,
                            },
                        )
                        .await;
                }
            }
            ReceiptStatus::Reverted => {
                if self
                    .store
                    .mark_failed(
                        attempt.id,
                        &format!("transfer {} reverted on chain", hash),
                    )
                    .await?
                {
                    self.store.advance_schedule(plan.id, now).await?;
                    self.store
                        .clear_active_order(plan.id, &attempt.order_id)
                        .await?;
                    self.notifier
                        .notify(
                            plan.owner_id,
                            Notification::ExecutionFailed {
                                plan_id: plan.id,
                                order_id: Some(attempt.order_id.clone()),
                                error: format!("transfer {} reverted on chain", hash),
                            },
                        )
                        .await;
                }
            }
            // Still in the mempool or not yet visible; keep waiting
            ReceiptStatus::Pending | ReceiptStatus::NotFound => {}
        }
        Ok(())
    }

    async fn fail_without_attempt(
        &self,
        plan: &dca_plans::Model,
        now: DateTime<Utc>,
        error: String,
    ) -> Result<(), StoreError> {
        warn!(plan_id = plan.id, error = %error, "Plan cannot execute");
        self.store.advance_schedule(plan.id, now).await?;
        self.notifier
            .notify(
                plan.owner_id,
                Notification::ExecutionFailed {
                    plan_id: plan.id,
                    order_id: None,
                    error,
                },
            )
            .await;
        Ok(())
    }

    async fn reject_order(
        &self,
        plan: &dca_plans::Model,
        now: DateTime<Utc>,
        error: String,
    ) -> Result<(), StoreError> {
        warn!(plan_id = plan.id, error = %error, "Order rejected by swap service");
        self.store.advance_schedule(plan.id, now).await?;
        self.notifier
            .notify(
                plan.owner_id,
                Notification::OrderRejected {
                    plan_id: plan.id,
                    error,
                },
            )
            .await;
        Ok(())
    }

    fn success_notification(
        &self,
        plan: &dca_plans::Model,
        attempt: &attempts::Model,
        config: &'static NetworkConfig,
        outcome: &TransferOutcome,
    ) -> Notification {
        Notification::ExecutionSucceeded {
            plan_id: plan.id,
            order_id: attempt.order_id.clone(),
            order_url: format!("https://fixedfloat.com/order/{}", attempt.order_id),
            amount: attempt.required_amount.to_string(),
            deposit_address: attempt.deposit_address.clone(),
            approve_tx_url: outcome
                .approve_tx_hash
                .as_ref()
                .map(|h| networks::explorer_tx_url(config, h)),
            transfer_tx_url: networks::explorer_tx_url(config, &outcome.transfer_tx_hash),
            receipt_pending: outcome.receipt_pending,
        }
    }
}
