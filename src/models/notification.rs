//! Notification payloads emitted by the executor
//!
//! The chat-platform integration consumes these; the executor only produces
//! them. Each payload carries enough for a human-readable message with a
//! remediation hint.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notification {
    /// Both transactions confirmed; schedule advanced
    #[serde(rename_all = "camelCase")]
    ExecutionSucceeded {
        plan_id: i32,
        order_id: String,
        order_url: String,
        amount: String,
        deposit_address: String,
        approve_tx_url: Option<String>,
        transfer_tx_url: String,
        /// Set when the receipt could not be fetched after broadcast; the
        /// transfer is counted as sent and reconciled out of band
        receipt_pending: bool,
    },
    /// Retryable infrastructure failure; the schedule is held and the same
    /// order will be retried automatically
    #[serde(rename_all = "camelCase")]
    ExecutionBlocked {
        plan_id: i32,
        order_id: String,
        error: String,
    },
    /// Terminal failure; this interval is consumed and the user must act
    #[serde(rename_all = "camelCase")]
    ExecutionFailed {
        plan_id: i32,
        order_id: Option<String>,
        error: String,
    },
    /// The swap service refused to open an order (limits, bad params)
    #[serde(rename_all = "camelCase")]
    OrderRejected {
        plan_id: i32,
        error: String,
    },
    /// Dry-run pass completed: previews only, nothing broadcast or persisted
    #[serde(rename_all = "camelCase")]
    DryRunReport {
        plan_id: i32,
        order_id: String,
        amount: String,
        deposit_address: String,
        approval_needed: bool,
        estimated_cost_wei: String,
    },
}

impl Notification {
    pub fn plan_id(&self) -> i32 {
        match self {
            Notification::ExecutionSucceeded { plan_id, .. }
            | Notification::ExecutionBlocked { plan_id, .. }
            | Notification::ExecutionFailed { plan_id, .. }
            | Notification::OrderRejected { plan_id, .. }
            | Notification::DryRunReport { plan_id, .. } => *plan_id,
        }
    }
}

/// Delivery seam towards the chat platform
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, owner_id: i64, notification: Notification);
}

/// Default sink: structured log lines the operator can follow
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, owner_id: i64, notification: Notification) {
        let payload = serde_json::to_string(&notification).unwrap_or_default();
        tracing::info!(
            owner_id = owner_id,
            plan_id = notification.plan_id(),
            payload = %payload,
            "User notification"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_serializes_with_kind_tag() {
        let n = Notification::ExecutionBlocked {
            plan_id: 3,
            order_id: "ORD1".to_string(),
            error: "RPC error (will retry): timeout".to_string(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["kind"], "executionBlocked");
        assert_eq!(json["planId"], 3);
        assert_eq!(json["orderId"], "ORD1");
    }

    #[test]
    fn test_plan_id_accessor() {
        let n = Notification::OrderRejected {
            plan_id: 9,
            error: "out of limits".to_string(),
        };
        assert_eq!(n.plan_id(), 9);
    }
}
