//! Recording command runner for tests.
//!
//! Nothing is spawned. Every call is parsed exactly as the real runner would
//! parse it, recorded, and answered from scripted responses.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::command::CommandLine;
use crate::error::{ExecError, Result};
use crate::handle::ProcessHandle;
use crate::runner::{CommandOutput, CommandRunner, OnStart};

/// A command seen by [`RecordingRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    /// The command line as passed in.
    pub command: String,
    /// Whether elevation was requested.
    pub elevate: bool,
    /// Whether it went through `run_tracked`.
    pub tracked: bool,
}

#[derive(Debug, Clone)]
enum Reply {
    Output(Vec<u8>),
    Fail(String),
    BlockUntilCancelled,
}

/// A [`CommandRunner`] that records commands instead of running them.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<RecordedCommand>>,
    replies: Mutex<Vec<(String, Reply)>>,
}

impl RecordingRunner {
    /// Create a runner that answers every command with empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `output`.
    pub fn respond(&self, pattern: impl Into<String>, output: impl AsRef<[u8]>) {
        self.replies
            .lock()
            .push((pattern.into(), Reply::Output(output.as_ref().to_vec())));
    }

    /// Fail commands containing `pattern` with the given stderr.
    pub fn fail(&self, pattern: impl Into<String>, stderr: impl Into<String>) {
        self.replies
            .lock()
            .push((pattern.into(), Reply::Fail(stderr.into())));
    }

    /// Keep tracked commands containing `pattern` running until their handle
    /// is cancelled.
    pub fn block_until_cancelled(&self, pattern: impl Into<String>) {
        self.replies
            .lock()
            .push((pattern.into(), Reply::BlockUntilCancelled));
    }

    /// Every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCommand> {
        self.calls.lock().clone()
    }

    /// The command lines seen so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.command.clone()).collect()
    }

    /// Returns true if some recorded command contains `needle`.
    #[must_use]
    pub fn saw(&self, needle: &str) -> bool {
        self.calls.lock().iter().any(|c| c.command.contains(needle))
    }

    fn record(&self, command: &str, elevate: bool, tracked: bool) -> Result<Reply> {
        CommandLine::parse(command)?;
        self.calls.lock().push(RecordedCommand {
            command: command.to_string(),
            elevate,
            tracked,
        });
        let reply = self
            .replies
            .lock()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map_or_else(|| Reply::Output(Vec::new()), |(_, reply)| reply.clone());
        Ok(reply)
    }

    fn answer(command: &str, reply: Reply) -> Result<CommandOutput> {
        match reply {
            Reply::Output(stdout) => Ok(CommandOutput {
                stdout,
                stderr: Vec::new(),
            }),
            Reply::Fail(stderr) => Err(ExecError::Failed {
                command: command.to_string(),
                code: Some(1),
                stderr,
            }),
            Reply::BlockUntilCancelled => Ok(CommandOutput::default()),
        }
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &str, elevate: bool) -> Result<CommandOutput> {
        let reply = self.record(command, elevate, false)?;
        Self::answer(command, reply)
    }

    async fn run_tracked(&self, command: &str, elevate: bool, on_start: OnStart) -> Result<()> {
        let reply = self.record(command, elevate, true)?;
        let handle = ProcessHandle::detached(command);
        on_start(handle.clone());

        if matches!(reply, Reply::BlockUntilCancelled) {
            while !handle.was_cancelled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        handle.mark_exited();

        if handle.was_cancelled() {
            return Err(ExecError::Cancelled {
                command: command.to_string(),
            });
        }
        Self::answer(command, reply).map(drop)
    }

    async fn run_with_timeout(
        &self,
        command: &str,
        elevate: bool,
        _timeout: Duration,
    ) -> Result<CommandOutput> {
        let reply = self.record(command, elevate, false)?;
        Self::answer(command, reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn records_and_answers() {
        let runner = RecordingRunner::new();
        runner.respond("--version", "xtrabackup version 8.0.14");
        runner.fail("lvs", "volume group not found");

        let out = runner.run("xtrabackup --version", false).await.unwrap();
        assert_eq!(out.stdout_text(), "xtrabackup version 8.0.14");
        assert!(runner.run("lvs vg0", true).await.is_err());
        assert!(runner.run("true", false).await.unwrap().stdout.is_empty());

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].elevate);
        assert!(runner.saw("lvs vg0"));
    }

    #[tokio::test]
    async fn rejects_malformed_lines_like_the_real_runner() {
        let runner = RecordingRunner::new();
        assert!(runner.run("echo a |", false).await.is_err());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn blocked_command_ends_on_cancel() {
        let runner = Arc::new(RecordingRunner::new());
        runner.block_until_cancelled("sleep");
        let (tx, rx) = tokio::sync::oneshot::channel();

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                runner
                    .run_tracked(
                        "sleep 30",
                        false,
                        Box::new(move |h| {
                            let _ = tx.send(h);
                        }),
                    )
                    .await
            })
        };

        let handle = rx.await.unwrap();
        handle.cancel().unwrap();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(ExecError::Cancelled { .. })));
    }
}
