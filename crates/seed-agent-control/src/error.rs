//! Error types for the seed state machine.
//!
//! Every rejection names the identifier, stage or method it is about, so the
//! control plane can tell a typo from a conflict.

use seed_agent_core::{MethodKind, SeedId, StageKind};
use seed_agent_exec::ExecError;
use seed_agent_methods::MethodError;
use thiserror::Error;

use crate::lifecycle::Phase;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in seed control operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// No operation with this ID is held by the agent.
    #[error("SeedID not found: {0}")]
    SeedNotFound(SeedId),

    /// The operation exists but the stage was never started.
    #[error("stage {stage} not found for seed {seed_id}")]
    StageNotFound {
        /// The operation.
        seed_id: SeedId,
        /// The missing stage.
        stage: StageKind,
    },

    /// The method name does not match any registered method.
    #[error("unknown seed method: {0}")]
    UnknownMethod(String),

    /// The method is registered but its last probe failed.
    #[error("seed method {0} is not available on this host")]
    MethodUnavailable(MethodKind),

    /// A later stage named a different method than the operation's Prepare.
    #[error("seed {seed_id} uses {expected}, not {requested}")]
    MethodMismatch {
        /// The operation.
        seed_id: SeedId,
        /// Method fixed at Prepare.
        expected: MethodKind,
        /// Method named by the request.
        requested: MethodKind,
    },

    /// Another seed still has a stage in flight.
    #[error("seed {running} is still running {stage}")]
    OperationRunning {
        /// The operation holding the agent.
        running: SeedId,
        /// Its running stage.
        stage: StageKind,
    },

    /// The stage cannot start from the operation's current phase.
    #[error("seed {seed_id} cannot start {to} while {from}")]
    InvalidTransition {
        /// The operation.
        seed_id: SeedId,
        /// Current phase.
        from: Phase,
        /// Requested stage.
        to: StageKind,
    },

    /// Abort was requested for a stage without a live process.
    #[error("stage {stage} of seed {seed_id} is not running")]
    NotRunning {
        /// The operation.
        seed_id: SeedId,
        /// The stage.
        stage: StageKind,
    },

    /// A stage this request depends on has not completed.
    #[error("stage {stage} of seed {seed_id} has not completed")]
    StageNotCompleted {
        /// The operation.
        seed_id: SeedId,
        /// The prerequisite stage.
        stage: StageKind,
    },

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A seed method failed.
    #[error(transparent)]
    Method(#[from] MethodError),

    /// Signalling a process failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Talking to the control plane failed.
    #[error("control plane error: {0}")]
    ControlPlane(String),
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::SeedNotFound(_) | Self::StageNotFound { .. } | Self::UnknownMethod(_) => 404,
            Self::InvalidRequest(_) => 400,
            Self::MethodMismatch { .. }
            | Self::OperationRunning { .. }
            | Self::InvalidTransition { .. }
            | Self::NotRunning { .. }
            | Self::StageNotCompleted { .. } => 409,
            Self::MethodUnavailable(_) => 503,
            Self::Method(_) | Self::Exec(_) => 500,
            Self::ControlPlane(_) => 502,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::OperationRunning { .. } | Self::MethodUnavailable(_) | Self::ControlPlane(_)
        )
    }
}
