//! Seed operation lifecycle.
//!
//! The phase of an operation is derived from its current stage and that
//! stage's status. A new stage may start whenever nothing is in flight;
//! failed stages do not block later ones.
//!
//! # State Machine
//!
//! ```text
//!     ┌──────┐ prepare  ┌───────────┐ backup  ┌────────────┐ restore ┌───────────┐ cleanup ┌─────────────┐
//!     │ Idle │─────────▶│ Preparing │────────▶│ Backing-up │────────▶│ Restoring │────────▶│ Cleaning-up │
//!     └──────┘          └─────┬─────┘         └─────┬──────┘         └─────┬─────┘         └──────┬──────┘
//!                             │                     │                      │                      │
//!                             └─────────────────────┴──────────┬───────────┴──────────────────────┘
//!                                                              ▼
//!                                         ┌──────────────────────────────────┐
//!                                         │ Completed │ Error │ Cancelled    │──▶ any stage
//!                                         └──────────────────────────────────┘
//! ```
//!
//! `MetadataFetch` is a query, not a phase: it is legal once Backup has
//! completed and never moves the operation.

use std::fmt;

use seed_agent_core::{SeedId, StageKind, StageStatus};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// Externally visible phase of the agent's seed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// No operation held.
    Idle,
    /// Prepare is running.
    Preparing,
    /// Backup is running.
    BackingUp,
    /// Restore is running.
    Restoring,
    /// Cleanup is running.
    CleaningUp,
    /// The current stage completed.
    Completed,
    /// The current stage failed.
    Error,
    /// The current stage was aborted.
    Cancelled,
}

impl Phase {
    /// Phase of an operation whose current stage is `stage` with `status`.
    #[must_use]
    pub const fn of(stage: StageKind, status: StageStatus) -> Self {
        match status {
            StageStatus::Running => match stage {
                StageKind::Prepare => Self::Preparing,
                StageKind::Backup | StageKind::MetadataFetch => Self::BackingUp,
                StageKind::Restore => Self::Restoring,
                StageKind::Cleanup => Self::CleaningUp,
            },
            StageStatus::Completed => Self::Completed,
            StageStatus::Error => Self::Error,
            StageStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Preparing => "Preparing",
            Self::BackingUp => "Backing-up",
            Self::Restoring => "Restoring",
            Self::CleaningUp => "Cleaning-up",
            Self::Completed => "Completed",
            Self::Error => "Error",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Validates that `to` may start while the operation is in `from`.
///
/// # Errors
///
/// Returns `ControlError::InvalidTransition` if the stage cannot start.
pub fn validate_transition(seed_id: SeedId, from: Phase, to: StageKind) -> Result<StageKind> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidTransition { seed_id, from, to })
    }
}

/// Check if a stage may start from the given phase.
#[must_use]
pub const fn is_valid_transition(from: Phase, to: StageKind) -> bool {
    use Phase::{BackingUp, Cancelled, CleaningUp, Completed, Error, Idle, Preparing, Restoring};
    use StageKind::{Backup, Cleanup, MetadataFetch, Prepare, Restore};

    matches!(
        (from, to),
        // A fresh operation always starts with Prepare
        (Idle, Prepare)
            // Once the current stage settled, anything may follow, including a retry
            | (Completed | Error | Cancelled, Prepare | Backup | Restore | Cleanup)
            // Metadata can be read alongside any phase of a live operation
            | (
                Preparing | BackingUp | Restoring | CleaningUp | Completed | Error | Cancelled,
                MetadataFetch
            )
    )
}

/// Returns true if a stage of the operation is in flight.
#[must_use]
pub const fn is_active(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::Preparing | Phase::BackingUp | Phase::Restoring | Phase::CleaningUp
    )
}

/// Returns true if the current stage has settled.
#[must_use]
pub const fn is_settled(phase: Phase) -> bool {
    matches!(phase, Phase::Completed | Phase::Error | Phase::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use Phase::*;

        assert!(is_valid_transition(Idle, StageKind::Prepare));
        assert!(is_valid_transition(Completed, StageKind::Backup));
        // Cleanup after a failed restore
        assert!(is_valid_transition(Error, StageKind::Cleanup));
        // Retry after abort
        assert!(is_valid_transition(Cancelled, StageKind::Backup));
        assert!(is_valid_transition(Restoring, StageKind::MetadataFetch));
    }

    #[test]
    fn invalid_transitions() {
        use Phase::*;

        // Nothing but Prepare starts an operation
        assert!(!is_valid_transition(Idle, StageKind::Backup));
        assert!(!is_valid_transition(Idle, StageKind::MetadataFetch));
        // One stage at a time
        assert!(!is_valid_transition(Preparing, StageKind::Backup));
        assert!(!is_valid_transition(BackingUp, StageKind::Restore));
        assert!(!is_valid_transition(CleaningUp, StageKind::Prepare));
    }

    #[test]
    fn validate_transition_err() {
        let result = validate_transition(SeedId::new(3), Phase::BackingUp, StageKind::Restore);
        match result {
            Err(ControlError::InvalidTransition { seed_id, from, to }) => {
                assert_eq!(seed_id, SeedId::new(3));
                assert_eq!(from, Phase::BackingUp);
                assert_eq!(to, StageKind::Restore);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn phase_follows_stage_and_status() {
        assert_eq!(
            Phase::of(StageKind::Backup, StageStatus::Running),
            Phase::BackingUp
        );
        assert_eq!(
            Phase::of(StageKind::Backup, StageStatus::Cancelled),
            Phase::Cancelled
        );
        assert_eq!(Phase::CleaningUp.to_string(), "Cleaning-up");
    }

    #[test]
    fn active_and_settled() {
        assert!(is_active(Phase::Restoring));
        assert!(!is_active(Phase::Idle));
        assert!(!is_active(Phase::Error));
        assert!(is_settled(Phase::Cancelled));
        assert!(!is_settled(Phase::Preparing));
        assert!(!is_settled(Phase::Idle));
    }
}
