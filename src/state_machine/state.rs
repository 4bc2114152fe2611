use std::fmt;

use serde::{Deserialize, Serialize};

use super::stage::StageRole;

/// The lifecycle phases of a stage actor.
///
/// There is no terminal phase: every path leads back to the role's resting
/// phase (`IDLE` for producers, `AWAIT_ITEM` otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    AwaitItem,
    Processing,
    Failed,
    Repairing,
    Maintaining,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "IDLE"),
            Phase::AwaitItem => write!(f, "AWAIT_ITEM"),
            Phase::Processing => write!(f, "PROCESSING"),
            Phase::Failed => write!(f, "FAILED"),
            Phase::Repairing => write!(f, "REPAIRING"),
            Phase::Maintaining => write!(f, "MAINTAINING"),
        }
    }
}

/// What just happened to the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A producer generated a new item.
    ItemGenerated,
    /// An item was popped from the inbound queue.
    ItemReceived,
    StepSucceeded,
    StepFailed,
    RepairStarted,
    /// Repair or maintenance finished and wear was reset.
    Recovered,
    /// An external request or the policy asked for maintenance.
    MaintenanceDue,
    /// The cycle was aborted by an error.
    Aborted,
}

/// The result of evaluating a signal against the current phase.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Next(Phase),
    /// The signal makes no sense in this phase; the phase is unchanged.
    Rejected { phase: Phase, signal: Signal },
}

/// Transition table of a stage actor.
pub struct StageMachine;

impl StageMachine {
    /// Computes the phase that follows `phase` when `signal` occurs.
    ///
    /// - `IDLE` accepts generated items, `AWAIT_ITEM` received ones.
    /// - A failed step always goes through `FAILED` and `REPAIRING`.
    /// - Maintenance can only start from the resting phase.
    /// - `Aborted` returns to the resting phase from anywhere.
    pub fn next(role: StageRole, phase: Phase, signal: Signal) -> Transition {
        let rest = role.resting_phase();
        let next = match (phase, signal) {
            (_, Signal::Aborted) => Some(rest),
            (Phase::Idle, Signal::ItemGenerated) if role == StageRole::Producer => {
                Some(Phase::Processing)
            }
            (Phase::AwaitItem, Signal::ItemReceived) if role.has_inbound() => {
                Some(Phase::Processing)
            }
            (p, Signal::MaintenanceDue) if p == rest => Some(Phase::Maintaining),
            (Phase::Processing, Signal::StepSucceeded) => Some(rest),
            (Phase::Processing, Signal::StepFailed) => Some(Phase::Failed),
            (Phase::Failed, Signal::RepairStarted) => Some(Phase::Repairing),
            (Phase::Repairing | Phase::Maintaining, Signal::Recovered) => Some(rest),
            _ => None,
        };

        match next {
            Some(p) => Transition::Next(p),
            None => Transition::Rejected { phase, signal },
        }
    }
}
