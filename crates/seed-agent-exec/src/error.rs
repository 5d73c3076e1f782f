//! Error types for process execution.

use std::time::Duration;

use thiserror::Error;

/// A result type using `ExecError`.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Errors raised while parsing or running a command line.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command line could not be tokenized. Nothing was spawned.
    #[error("invalid command line: {0}")]
    InvalidCommand(String),

    /// A pipeline stage could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Reading output or waiting on a child failed.
    #[error("I/O error while running `{command}`: {source}")]
    Io {
        /// The (masked) command line.
        command: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A pipeline stage exited unsuccessfully.
    #[error("command `{command}` failed ({}): {stderr}", exit_label(.code))]
    Failed {
        /// The (masked) command line.
        command: String,
        /// Exit code, or `None` if the process was killed by a signal.
        code: Option<i32>,
        /// Captured standard error of the pipeline.
        stderr: String,
    },

    /// The command was cancelled through its handle.
    #[error("command `{command}` was cancelled")]
    Cancelled {
        /// The (masked) command line.
        command: String,
    },

    /// The command did not finish within its time limit.
    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout {
        /// The (masked) command line.
        command: String,
        /// The limit that elapsed.
        timeout: Duration,
    },

    /// Signalling the process group failed for a reason other than it being gone.
    #[error("failed to signal process group {pgid}: {errno}")]
    Signal {
        /// The process group.
        pgid: i32,
        /// The errno returned by `killpg`.
        errno: nix::errno::Errno,
    },
}

impl ExecError {
    /// Returns true if the command was stopped through its handle.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "killed by signal".to_string(), |c| format!("exit code {c}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_message_carries_exit_code_and_stderr() {
        let err = ExecError::Failed {
            command: "false".into(),
            code: Some(1),
            stderr: "boom".into(),
        };
        assert_eq!(err.to_string(), "command `false` failed (exit code 1): boom");

        let err = ExecError::Failed {
            command: "sleep 10".into(),
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("killed by signal"));
    }

    #[test]
    fn cancelled_is_distinct() {
        assert!(ExecError::Cancelled { command: "x".into() }.is_cancelled());
        assert!(!ExecError::InvalidCommand("x".into()).is_cancelled());
    }
}
