//! Process lifecycle management for seed stages.
//!
//! Every external tool a seed method invokes (`mysqldump`, `xtrabackup`,
//! `lvcreate`, `socat`, ...) goes through a [`CommandRunner`]. Command lines
//! use a small shell-like syntax: words, single and double quotes, pipelines
//! (`a | b | c`) and a trailing output redirection (`a > file`, `a >> file`).
//! No shell is ever spawned; the line is tokenized up front and a malformed
//! line is rejected before any process starts.
//!
//! # Architecture
//!
//! ```text
//!   "mysqldump ... | gzip > /backup/dump.sql.gz"
//!                        │
//!                        ▼
//!              ┌───────────────────┐
//!              │   CommandLine     │  tokenize, validate, elevate
//!              └─────────┬─────────┘
//!                        ▼
//!              ┌───────────────────┐
//!              │  ProcessRunner    │  one process group per pipeline
//!              └─────────┬─────────┘
//!                        │ on_start(ProcessHandle)
//!                        ▼
//!              ┌───────────────────┐
//!              │  ProcessHandle    │  cancel() -> SIGTERM to the group
//!              └───────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use seed_agent_exec::{CommandRunner, ProcessRunner};
//!
//! # async fn example() -> seed_agent_exec::Result<()> {
//! let runner = ProcessRunner::new();
//! let out = runner.run("echo A B | cut -d ' ' -f1", false).await?;
//! assert_eq!(out.stdout_text().trim(), "A");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod command;
pub mod error;
pub mod handle;
pub mod runner;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use command::{quote, CommandLine, Redirect};
pub use error::{ExecError, Result};
pub use handle::ProcessHandle;
pub use runner::{CommandOutput, CommandRunner, OnStart, ProcessRunner};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{RecordedCommand, RecordingRunner};
