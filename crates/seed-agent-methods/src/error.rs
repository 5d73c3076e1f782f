//! Error types for seed methods.

use std::path::PathBuf;

use seed_agent_core::{MethodKind, Side, StageKind};
use thiserror::Error;

/// A result type using `MethodError`.
pub type Result<T> = std::result::Result<T, MethodError>;

/// Errors raised by a seed method while running a stage.
///
/// The state machine records these as the stage's `Error` details; none of
/// them ever escapes as a panic.
#[derive(Debug, Error)]
pub enum MethodError {
    /// An external tool failed, was cancelled or could not be started.
    #[error(transparent)]
    Exec(#[from] seed_agent_exec::ExecError),

    /// A SQL step failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The backup artifact or sidecar is missing.
    #[error("backup artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// The artifact exists but its replication coordinates are malformed.
    #[error("malformed backup metadata in {}: {reason}", .path.display())]
    MalformedMetadata {
        /// The file that was parsed.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Reading or writing a local file failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The method cannot run this stage on this side.
    #[error("{method} does not support {stage} on the {side} side")]
    Unsupported {
        /// The method.
        method: MethodKind,
        /// The requested stage.
        stage: StageKind,
        /// The side it was requested on.
        side: Side,
    },

    /// The method is misconfigured.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MethodError {
    /// Returns true if the failure was an operator cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Exec(e) if e.is_cancelled())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::MissingArtifact(path)
        } else {
            Self::Io { path, source }
        }
    }
}
