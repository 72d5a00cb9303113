//! Executor scheduling and state-machine properties
//!
//! Everything runs against in-memory fakes; the properties here are the
//! ones that make the recurring-purchase loop safe to re-run, restart and
//! retry: at most one broadcast per order, schedule advanced exactly once
//! per terminal outcome, blocked rows never silently reset.

mod common;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use autodca_backend::models::notification::Notification;
use autodca_backend::services::chain_client::{ChainError, ReceiptStatus};
use autodca_backend::services::executor::DcaExecutor;
use autodca_backend::services::state_machine::AttemptState;
use autodca_backend::services::swap_gateway::SwapError;

use common::*;

struct Harness {
    store: Arc<InMemoryStore>,
    chain: Arc<FakeChain>,
    swap: Arc<FakeSwap>,
    notifier: Arc<RecordingNotifier>,
    executor: DcaExecutor,
}

fn harness(dry_run: bool) -> Harness {
    let store = InMemoryStore::new();
    let chain = FakeChain::new();
    let swap = FakeSwap::new();
    let notifier = RecordingNotifier::new();
    store.seed_wallet(OWNER);
    let executor = DcaExecutor::new(
        store.clone(),
        chain.clone(),
        swap.clone(),
        notifier.clone(),
        dry_run,
    );
    Harness {
        store,
        chain,
        swap,
        notifier,
        executor,
    }
}

#[tokio::test]
async fn successful_execution_sends_once_and_advances_once() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50), now - Duration::seconds(5));

    h.executor.run_once(now).await.unwrap();

    let attempt = h.store.attempt_by_order("ORD1").expect("attempt created");
    assert_eq!(attempt.state, AttemptState::Sent.as_str());
    assert!(attempt.transfer_tx_hash.is_some());
    assert_eq!(h.chain.broadcast_count(), 1);
    // Approval was for exactly the required amount
    let approvals = h.chain.approvals.lock().clone();
    assert_eq!(approvals, vec![(DEPOSIT_ADDRESS.to_string(), dec!(50))]);

    let plan = h.store.plan(1);
    assert_eq!(plan.next_run_at, now + Duration::seconds(3600));
    assert!(plan.active_order_id.is_none());

    match h.notifier.last() {
        Some(Notification::ExecutionSucceeded {
            receipt_pending, ..
        }) => assert!(!receipt_pending),
        other => panic!("unexpected notification: {:?}", other),
    }

    // A duplicate tick at the same instant finds nothing due and sends
    // nothing new
    h.executor.run_once(now).await.unwrap();
    assert_eq!(h.chain.broadcast_count(), 1);
    assert_eq!(h.store.attempt_count(), 1);
}

#[tokio::test]
async fn sending_attempt_excludes_new_execution() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50), now - Duration::seconds(5));
    h.store
        .seed_attempt(1, "ORD-LOCK", AttemptState::Sending, dec!(50), None, now);
    h.store
        .set_active_order_raw(1, "ORD-LOCK", now + Duration::seconds(1800));
    let next_run_before = h.store.plan(1).next_run_at;

    h.executor.run_once(now).await.unwrap();

    // No new attempt, no broadcast, schedule untouched
    assert_eq!(h.store.attempt_count(), 1);
    assert_eq!(h.chain.broadcast_count(), 0);
    assert_eq!(h.swap.created_count(), 0);
    assert_eq!(h.store.plan(1).next_run_at, next_run_before);
}

#[tokio::test]
async fn transient_failure_blocks_then_same_order_succeeds() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50), now - Duration::seconds(5));
    *h.chain.transfer_failure.lock() =
        Some(ChainError::RpcTransient("connect timeout".to_string()));

    h.executor.run_once(now).await.unwrap();

    let attempt = h.store.attempt_by_order("ORD1").unwrap();
    assert_eq!(attempt.state, AttemptState::Blocked.as_str());
    assert!(attempt.transfer_tx_hash.is_none());
    assert!(attempt.error_message.unwrap().contains("will retry"));
    // Schedule held
    assert_eq!(h.store.plan(1).next_run_at, now - Duration::seconds(5));
    match h.notifier.last() {
        Some(Notification::ExecutionBlocked { order_id, .. }) => assert_eq!(order_id, "ORD1"),
        other => panic!("unexpected notification: {:?}", other),
    }

    // Failure clears; a later tick retries the SAME order and attempt row
    *h.chain.transfer_failure.lock() = None;
    let later = now + Duration::seconds(60);
    h.executor.run_once(later).await.unwrap();

    let attempt = h.store.attempt_by_order("ORD1").unwrap();
    assert_eq!(attempt.state, AttemptState::Sent.as_str());
    assert_eq!(h.store.attempt_count(), 1);
    assert_eq!(h.swap.created_count(), 1);
    // Advanced exactly one interval from the tick that completed it
    assert_eq!(h.store.plan(1).next_run_at, later + Duration::seconds(3600));
}

#[tokio::test]
async fn blocked_attempt_survives_restart_unchanged() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50), now - Duration::seconds(5));
    *h.chain.transfer_failure.lock() = Some(ChainError::RpcTransient("rpc down".to_string()));
    h.executor.run_once(now).await.unwrap();
    assert_eq!(
        h.store.attempt_by_order("ORD1").unwrap().state,
        AttemptState::Blocked.as_str()
    );

    // Simulated restart: a fresh executor over the same durable state. The
    // blocked row must not be reset to scheduled.
    let restarted = DcaExecutor::new(
        h.store.clone(),
        h.chain.clone(),
        h.swap.clone(),
        h.notifier.clone(),
        false,
    );
    assert_eq!(
        h.store.attempt_by_order("ORD1").unwrap().state,
        AttemptState::Blocked.as_str()
    );

    *h.chain.transfer_failure.lock() = None;
    let later = now + Duration::seconds(120);
    restarted.run_once(later).await.unwrap();

    let attempt = h.store.attempt_by_order("ORD1").unwrap();
    assert_eq!(attempt.state, AttemptState::Sent.as_str());
    assert_eq!(h.store.attempt_count(), 1);
    assert_eq!(h.store.plan(1).next_run_at, later + Duration::seconds(3600));
}

#[tokio::test]
async fn expired_blocked_order_yields_fresh_attempt_row() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50), now - Duration::seconds(5));
    *h.chain.transfer_failure.lock() = Some(ChainError::RpcTransient("rpc down".to_string()));
    h.executor.run_once(now).await.unwrap();

    // The order expires while the attempt is blocked
    h.store
        .set_active_order_raw(1, "ORD1", now - Duration::seconds(1));
    let tick2 = now + Duration::seconds(30);
    h.executor.run_once(tick2).await.unwrap();

    // The plan let go of the order; the blocked row is untouched history
    assert!(h.store.plan(1).active_order_id.is_none());
    assert_eq!(
        h.store.attempt_by_order("ORD1").unwrap().state,
        AttemptState::Blocked.as_str()
    );

    *h.chain.transfer_failure.lock() = None;
    let tick3 = now + Duration::seconds(60);
    h.executor.run_once(tick3).await.unwrap();

    // A new order got a NEW attempt row; the old one is still blocked
    assert_eq!(h.store.attempt_count(), 2);
    let fresh = h.store.attempt_by_order("ORD2").unwrap();
    assert_eq!(fresh.state, AttemptState::Sent.as_str());
    assert_eq!(
        h.store.attempt_by_order("ORD1").unwrap().state,
        AttemptState::Blocked.as_str()
    );
}

#[tokio::test]
async fn insufficient_funds_fails_and_consumes_interval() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50), now - Duration::seconds(5));
    *h.chain.token_balance.lock() = dec!(10);

    h.executor.run_once(now).await.unwrap();

    let attempt = h.store.attempt_by_order("ORD1").unwrap();
    assert_eq!(attempt.state, AttemptState::Failed.as_str());
    assert_eq!(h.chain.broadcast_count(), 0);
    assert_eq!(h.chain.approvals.lock().len(), 0);
    // A failed attempt still consumes the interval
    assert_eq!(h.store.plan(1).next_run_at, now + Duration::seconds(3600));
    assert!(h.store.plan(1).active_order_id.is_none());
    match h.notifier.last() {
        Some(Notification::ExecutionFailed { error, .. }) => {
            assert!(error.contains("shortfall"), "got: {}", error);
        }
        other => panic!("unexpected notification: {:?}", other),
    }
}

#[tokio::test]
async fn tampered_order_destination_never_moves_funds() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50), now - Duration::seconds(5));
    *h.swap.destination_override.lock() = Some("bc1qattacker000000000000000000000000000000".to_string());

    h.executor.run_once(now).await.unwrap();

    let attempt = h.store.attempt_by_order("ORD1").unwrap();
    assert_eq!(attempt.state, AttemptState::Failed.as_str());
    assert_eq!(h.chain.broadcast_count(), 0);
    assert_eq!(h.chain.approvals.lock().len(), 0);
    assert!(attempt
        .error_message
        .unwrap()
        .contains("does not match plan destination"));
}

#[tokio::test]
async fn approvals_always_match_required_amount_exactly() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50), now - Duration::seconds(5));

    // First cycle: the order requires a bit more than the plan amount
    *h.swap.required_amount.lock() = Some(dec!(50.25));
    h.executor.run_once(now).await.unwrap();

    // Second cycle, next interval, different required amount
    *h.swap.required_amount.lock() = Some(dec!(49.8));
    let next_cycle = now + Duration::seconds(3601);
    h.executor.run_once(next_cycle).await.unwrap();

    let approvals = h.chain.approvals.lock().clone();
    assert_eq!(approvals.len(), 2);
    assert_eq!(approvals[0].1, dec!(50.25));
    assert_eq!(approvals[1].1, dec!(49.8));
}

#[tokio::test]
async fn ambiguous_receipt_counts_as_sent_and_never_rebroadcasts() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50), now - Duration::seconds(5));
    *h.chain.confirmation_failure.lock() = Some(ChainError::AmbiguousBroadcast {
        tx_hash: "0xbbbb0002".to_string(),
        detail: "no receipt after timeout".to_string(),
    });

    h.executor.run_once(now).await.unwrap();

    let attempt = h.store.attempt_by_order("ORD1").unwrap();
    assert_eq!(attempt.state, AttemptState::Sent.as_str());
    assert!(attempt.transfer_tx_hash.is_some());
    assert_eq!(h.chain.broadcast_count(), 1);
    match h.notifier.last() {
        Some(Notification::ExecutionSucceeded {
            receipt_pending, ..
        }) => assert!(receipt_pending),
        other => panic!("unexpected notification: {:?}", other),
    }

    // Even with the plan due again, the settled order is never re-broadcast
    h.executor.run_once(now + Duration::seconds(3601)).await.unwrap();
    let first_order_broadcasts = h
        .chain
        .broadcasts
        .lock()
        .iter()
        .filter(|(to, _)| to == DEPOSIT_ADDRESS)
        .count();
    assert_eq!(h.store.attempt_by_order("ORD1").unwrap().state, "sent");
    assert_eq!(first_order_broadcasts, 2); // one per order, not two for ORD1
    assert_eq!(h.store.attempt_count(), 2);
}

#[tokio::test]
async fn dry_run_previews_everything_and_persists_nothing() {
    let h = harness(true);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50.0), now - Duration::seconds(5));

    h.executor.run_once(now).await.unwrap();

    // Zero broadcasts, zero approvals, zero persisted attempts
    assert_eq!(h.chain.broadcast_count(), 0);
    assert_eq!(h.chain.approvals.lock().len(), 0);
    assert_eq!(h.store.attempt_count(), 0);
    assert!(h.store.plan(1).active_order_id.is_none());
    // The schedule still moves so the loop does not spin on this interval
    assert_eq!(h.store.plan(1).next_run_at, now + Duration::seconds(3600));

    match h.notifier.last() {
        Some(Notification::DryRunReport {
            order_id,
            amount,
            approval_needed,
            ..
        }) => {
            assert_eq!(order_id, "ORD1");
            assert_eq!(amount, "50.0");
            assert!(approval_needed);
        }
        other => panic!("unexpected notification: {:?}", other),
    }
}

#[tokio::test]
async fn transient_order_creation_failure_holds_the_schedule() {
    let h = harness(false);
    let now = Utc::now();
    let due = now - Duration::seconds(5);
    h.store.seed_plan(1, dec!(50), due);
    *h.swap.create_failure.lock() = Some(SwapError::Transient("503".to_string()));

    h.executor.run_once(now).await.unwrap();

    // Nothing happened; the interval was NOT consumed and was NOT skipped
    assert_eq!(h.store.attempt_count(), 0);
    assert_eq!(h.store.plan(1).next_run_at, due);

    *h.swap.create_failure.lock() = None;
    h.executor.run_once(now + Duration::seconds(60)).await.unwrap();
    assert_eq!(
        h.store.attempt_by_order("ORD1").unwrap().state,
        AttemptState::Sent.as_str()
    );
}

#[tokio::test]
async fn rejected_order_advances_schedule_with_notification() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(700), now - Duration::seconds(5));

    h.executor.run_once(now).await.unwrap();

    // 700 is above the 500 cap; no order, no attempt, interval consumed
    assert_eq!(h.swap.created_count(), 0);
    assert_eq!(h.store.attempt_count(), 0);
    assert_eq!(h.store.plan(1).next_run_at, now + Duration::seconds(3600));
    match h.notifier.last() {
        Some(Notification::OrderRejected { error, .. }) => {
            assert!(error.contains("outside the allowed range"));
        }
        other => panic!("unexpected notification: {:?}", other),
    }
}

#[tokio::test]
async fn next_run_is_monotonic_across_mixed_outcomes() {
    let h = harness(false);
    let start = Utc::now();
    h.store.seed_plan(1, dec!(50), start - Duration::seconds(5));

    let mut observed = vec![h.store.plan(1).next_run_at];

    // Blocked tick
    *h.chain.transfer_failure.lock() = Some(ChainError::RpcTransient("down".to_string()));
    h.executor.run_once(start).await.unwrap();
    observed.push(h.store.plan(1).next_run_at);

    // Recovery tick
    *h.chain.transfer_failure.lock() = None;
    h.executor.run_once(start + Duration::seconds(30)).await.unwrap();
    observed.push(h.store.plan(1).next_run_at);

    // Terminal-failure cycle
    *h.chain.token_balance.lock() = dec!(1);
    h.executor
        .run_once(start + Duration::seconds(3700))
        .await
        .unwrap();
    observed.push(h.store.plan(1).next_run_at);

    // Duplicate late tick
    h.executor
        .run_once(start + Duration::seconds(3700))
        .await
        .unwrap();
    observed.push(h.store.plan(1).next_run_at);

    for pair in observed.windows(2) {
        assert!(pair[0] <= pair[1], "next_run went backwards: {:?}", observed);
    }
}

#[tokio::test]
async fn reconciliation_settles_blocked_attempt_with_confirmed_hash() {
    let h = harness(false);
    let now = Utc::now();
    // Plan not due; only reconciliation acts this tick
    h.store.seed_plan(1, dec!(50), now + Duration::seconds(1800));
    let stale = now - Duration::seconds(3600);
    h.store.seed_attempt(
        1,
        "ORD-OLD",
        AttemptState::Blocked,
        dec!(50),
        Some("0xdeadfeed"),
        stale,
    );
    h.store
        .set_active_order_raw(1, "ORD-OLD", now + Duration::seconds(600));
    *h.chain.receipt.lock() = ReceiptStatus::Confirmed;

    h.executor.run_once(now).await.unwrap();

    let attempt = h.store.attempt_by_order("ORD-OLD").unwrap();
    assert_eq!(attempt.state, AttemptState::Sent.as_str());
    assert!(h.store.plan(1).active_order_id.is_none());
    assert_eq!(h.store.plan(1).next_run_at, now + Duration::seconds(3600));
    assert_eq!(h.chain.broadcast_count(), 0);
}

#[tokio::test]
async fn reconciliation_fails_blocked_attempt_with_reverted_hash() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50), now + Duration::seconds(1800));
    let stale = now - Duration::seconds(3600);
    h.store.seed_attempt(
        1,
        "ORD-OLD",
        AttemptState::Blocked,
        dec!(50),
        Some("0xdeadfeed"),
        stale,
    );
    h.store
        .set_active_order_raw(1, "ORD-OLD", now + Duration::seconds(600));
    *h.chain.receipt.lock() = ReceiptStatus::Reverted;

    h.executor.run_once(now).await.unwrap();

    let attempt = h.store.attempt_by_order("ORD-OLD").unwrap();
    assert_eq!(attempt.state, AttemptState::Failed.as_str());
    assert!(attempt.error_message.unwrap().contains("reverted"));
    assert_eq!(h.store.plan(1).next_run_at, now + Duration::seconds(3600));
}

#[tokio::test]
async fn reconciliation_demotes_interrupted_sending_without_hash() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50), now + Duration::seconds(1800));
    let next_run_before = h.store.plan(1).next_run_at;
    let stale = now - Duration::seconds(3600);
    h.store
        .seed_attempt(1, "ORD-CRASH", AttemptState::Sending, dec!(50), None, stale);
    h.store
        .set_active_order_raw(1, "ORD-CRASH", now + Duration::seconds(600));

    h.executor.run_once(now).await.unwrap();

    // Demoted to blocked (safe to retry later), schedule untouched
    let attempt = h.store.attempt_by_order("ORD-CRASH").unwrap();
    assert_eq!(attempt.state, AttemptState::Blocked.as_str());
    assert_eq!(h.store.plan(1).next_run_at, next_run_before);
    assert_eq!(h.chain.broadcast_count(), 0);
}

#[tokio::test]
async fn blocked_attempt_with_hash_is_left_to_reconciliation() {
    let h = harness(false);
    let now = Utc::now();
    // Due plan whose blocked attempt already broadcast; freshly touched so
    // the reconciliation staleness cutoff does not apply yet
    h.store.seed_plan(1, dec!(50), now - Duration::seconds(5));
    h.store.seed_attempt(
        1,
        "ORD-WAIT",
        AttemptState::Blocked,
        dec!(50),
        Some("0xfeedbeef"),
        now,
    );
    h.store
        .set_active_order_raw(1, "ORD-WAIT", now + Duration::seconds(600));

    h.executor.run_once(now).await.unwrap();

    // No re-send, no new order, no state change
    assert_eq!(h.chain.broadcast_count(), 0);
    assert_eq!(h.swap.created_count(), 0);
    assert_eq!(
        h.store.attempt_by_order("ORD-WAIT").unwrap().state,
        AttemptState::Blocked.as_str()
    );
}

#[tokio::test]
async fn missing_wallet_consumes_interval_with_remediation() {
    let h = harness(false);
    let now = Utc::now();
    h.store.seed_plan(1, dec!(50), now - Duration::seconds(5));
    h.store.wallets.lock().clear();

    h.executor.run_once(now).await.unwrap();

    assert_eq!(h.store.attempt_count(), 0);
    assert_eq!(h.store.plan(1).next_run_at, now + Duration::seconds(3600));
    match h.notifier.last() {
        Some(Notification::ExecutionFailed { error, .. }) => {
            assert!(error.contains("No wallet configured"));
        }
        other => panic!("unexpected notification: {:?}", other),
    }
}
