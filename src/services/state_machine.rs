//! Execution state machine for attempts
//!
//! Every attempt-state write in the executor goes through [`transition`], a
//! single pure function from (current state, event) to (next state, schedule
//! action, active-order disposition). Keeping the table in one place makes
//! the at-most-once-send contract auditable and unit-testable without any
//! network or storage in the picture.
//!
//! The contract encoded here:
//! - `sending` is a transient lock; it is entered only from `scheduled` or
//!   `blocked` and no second execution may start while it holds.
//! - `sent` and `failed` are terminal and are the only outcomes that advance
//!   the plan's schedule.
//! - `blocked` holds the schedule and is never reset to `scheduled`; an
//!   expired order releases the plan's active-order reference so a *new*
//!   attempt row is created, the blocked row stays as history.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptState {
    Scheduled,
    Sending,
    Sent,
    Failed,
    Blocked,
}

impl AttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Scheduled => "scheduled",
            AttemptState::Sending => "sending",
            AttemptState::Sent => "sent",
            AttemptState::Failed => "failed",
            AttemptState::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<AttemptState> {
        match s {
            "scheduled" => Some(AttemptState::Scheduled),
            "sending" => Some(AttemptState::Sending),
            "sent" => Some(AttemptState::Sent),
            "failed" => Some(AttemptState::Failed),
            "blocked" => Some(AttemptState::Blocked),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Sent | AttemptState::Failed)
    }
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events the executor can observe for an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecEvent {
    /// Execution is being picked up (durable lock is about to be taken)
    StartExecution,
    /// Transfer broadcast and outcome accepted as final
    BroadcastConfirmed,
    /// Retryable infrastructure failure; the governing order stays valid
    RetryableFailure,
    /// Failure that requires user intervention
    TerminalFailure,
    /// The governing swap order expired before the attempt completed
    OrderExpired,
}

/// What the plan's schedule does as a result of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleAction {
    /// next_run_at moves forward by one interval
    Advance,
    /// next_run_at is untouched
    Hold,
}

/// Outcome of a valid transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: AttemptState,
    pub schedule: ScheduleAction,
    /// Whether the plan's active-order reference is released
    pub clear_active_order: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub state: AttemptState,
    pub event: ExecEvent,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid attempt transition: {:?} in state {}",
            self.event, self.state
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// The transition table. Everything not listed is a consistency fault.
pub fn transition(state: AttemptState, event: ExecEvent) -> Result<Transition, InvalidTransition> {
    use AttemptState::*;
    use ExecEvent::*;

    let t = match (state, event) {
        (Scheduled, StartExecution) => Transition {
            next: Sending,
            schedule: ScheduleAction::Hold,
            clear_active_order: false,
        },
        // Retry of a blocked attempt against the same, still-valid order
        (Blocked, StartExecution) => Transition {
            next: Sending,
            schedule: ScheduleAction::Hold,
            clear_active_order: false,
        },
        (Sending, BroadcastConfirmed) => Transition {
            next: Sent,
            schedule: ScheduleAction::Advance,
            clear_active_order: true,
        },
        // Reconciliation found the broadcast of a blocked attempt on chain
        (Blocked, BroadcastConfirmed) => Transition {
            next: Sent,
            schedule: ScheduleAction::Advance,
            clear_active_order: true,
        },
        (Blocked, TerminalFailure) => Transition {
            next: Failed,
            schedule: ScheduleAction::Advance,
            clear_active_order: true,
        },
        (Sending, RetryableFailure) => Transition {
            next: Blocked,
            schedule: ScheduleAction::Hold,
            clear_active_order: false,
        },
        (Sending, TerminalFailure) => Transition {
            next: Failed,
            schedule: ScheduleAction::Advance,
            clear_active_order: true,
        },
        // The blocked row stays blocked forever; only the plan lets go of the
        // order so the next tick opens a fresh one
        (Blocked, OrderExpired) => Transition {
            next: Blocked,
            schedule: ScheduleAction::Hold,
            clear_active_order: true,
        },
        (state, event) => return Err(InvalidTransition { state, event }),
    };
    Ok(t)
}
