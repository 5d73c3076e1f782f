//! Spawning and waiting on pipelines.

use std::fs::{File, OpenOptions};
use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::command::{CommandLine, Redirect, ELEVATE_PREFIX};
use crate::error::{ExecError, Result};
use crate::handle::ProcessHandle;

/// Callback receiving the handle of a tracked pipeline before it exits.
pub type OnStart = Box<dyn FnOnce(ProcessHandle) + Send>;

/// Output captured from a finished pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output of the last stage, empty when redirected to a file.
    pub stdout: Vec<u8>,
    /// Standard error of every stage, in stage order.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Standard output as lossy UTF-8.
    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard output followed by standard error, as lossy UTF-8.
    ///
    /// Tools such as `xtrabackup --version` print their banner on stderr.
    #[must_use]
    pub fn combined_text(&self) -> String {
        let mut text = self.stdout_text();
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        text
    }
}

/// Runs command lines on behalf of seed methods.
///
/// This trait abstracts process spawning so seed methods can be exercised
/// against a recording runner in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command line and return its captured output.
    ///
    /// With `elevate`, every pipeline stage runs under `sudo -n`.
    ///
    /// # Errors
    ///
    /// Returns an error if the line does not parse, a stage cannot be
    /// spawned, or any stage exits unsuccessfully.
    async fn run(&self, command: &str, elevate: bool) -> Result<CommandOutput>;

    /// Run a command line, handing its live handle to `on_start` before
    /// waiting on it.
    ///
    /// # Errors
    ///
    /// As for [`CommandRunner::run`]; additionally returns
    /// `ExecError::Cancelled` if the handle was cancelled.
    async fn run_tracked(&self, command: &str, elevate: bool, on_start: OnStart) -> Result<()>;

    /// Run a command line, killing it if it outlives `timeout`.
    ///
    /// # Errors
    ///
    /// As for [`CommandRunner::run`]; additionally returns
    /// `ExecError::Timeout` when the limit elapses.
    async fn run_with_timeout(
        &self,
        command: &str,
        elevate: bool,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}

/// Runs command lines as real OS processes.
///
/// Each pipeline is placed in its own process group so that cancellation
/// reaches every stage, including children spawned by `sudo`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a new process runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn prepare(command: &str, elevate: bool) -> Result<CommandLine> {
        let line = CommandLine::parse(command)?;
        Ok(if elevate { line.elevate() } else { line })
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &str, elevate: bool) -> Result<CommandOutput> {
        let line = Self::prepare(command, elevate)?;
        tracing::debug!(command = %line, "Running command");
        Pipeline::spawn(&line)?.wait().await
    }

    async fn run_tracked(&self, command: &str, elevate: bool, on_start: OnStart) -> Result<()> {
        let line = Self::prepare(command, elevate)?;
        tracing::debug!(command = %line, "Running tracked command");
        let pipeline = Pipeline::spawn(&line)?;
        on_start(pipeline.handle.clone());
        pipeline.wait().await.map(drop)
    }

    async fn run_with_timeout(
        &self,
        command: &str,
        elevate: bool,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let line = Self::prepare(command, elevate)?;
        let pipeline = Pipeline::spawn(&line)?;
        let handle = pipeline.handle.clone();

        if let Ok(result) = tokio::time::timeout(timeout, pipeline.wait()).await {
            result
        } else {
            if let Err(e) = handle.cancel() {
                tracing::warn!(error = %e, command = %line, "Failed to terminate timed-out command");
            }
            Err(ExecError::Timeout {
                command: line.to_string(),
                timeout,
            })
        }
    }
}

// =============================================================================
// Pipeline plumbing
// =============================================================================

enum Sink {
    Capture,
    File(File),
    Discard,
}

type OutputTask = JoinHandle<io::Result<Vec<u8>>>;

struct Pipeline {
    command: String,
    children: Vec<(String, Child)>,
    stdout: Option<OutputTask>,
    stderr: Vec<OutputTask>,
    handle: ProcessHandle,
}

impl Pipeline {
    fn spawn(line: &CommandLine) -> Result<Self> {
        let command = line.to_string();
        let io_error = |source: io::Error| ExecError::Io {
            command: command.clone(),
            source,
        };

        let mut argvs = line.stages().to_vec();
        let mut sink = match line.redirect() {
            None => Some(Sink::Capture),
            // The agent itself may not be able to write where an elevated
            // command writes, so the file is written by an elevated `tee`.
            Some(redirect) if line.is_elevated() => {
                argvs.push(tee_stage(redirect));
                Some(Sink::Discard)
            }
            Some(redirect) => Some(Sink::File(open_redirect(redirect).map_err(io_error)?)),
        };

        let last = argvs.len() - 1;
        let mut upstream: Option<Stdio> = None;
        let mut pgid: Option<i32> = None;
        let mut children = Vec::with_capacity(argvs.len());
        let mut stdout_task = None;
        let mut stderr_tasks = Vec::with_capacity(argvs.len());

        for (index, argv) in argvs.iter().enumerate() {
            let Some((program, args)) = argv.split_first() else {
                return Err(ExecError::InvalidCommand("empty pipeline stage".into()));
            };

            let mut cmd = Command::new(program);
            cmd.args(args)
                .stdin(upstream.take().unwrap_or_else(Stdio::null))
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .process_group(pgid.unwrap_or(0));

            let capture = index == last && matches!(sink, Some(Sink::Capture));
            if index == last {
                match sink.take() {
                    Some(Sink::File(file)) => cmd.stdout(Stdio::from(file)),
                    Some(Sink::Discard) => cmd.stdout(Stdio::null()),
                    _ => cmd.stdout(Stdio::piped()),
                };
            } else {
                cmd.stdout(Stdio::piped());
            }

            let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
                program: program.clone(),
                source,
            })?;

            if pgid.is_none() {
                let pid = child
                    .id()
                    .and_then(|id| i32::try_from(id).ok())
                    .ok_or_else(|| io_error(io::Error::other("child has no pid")))?;
                pgid = Some(pid);
            }

            if let Some(stderr) = child.stderr.take() {
                stderr_tasks.push(tokio::spawn(read_all(stderr)));
            }
            if index < last {
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| io_error(io::Error::other("stage stdout not piped")))?;
                upstream = Some(stdout.try_into().map_err(io_error)?);
            } else if capture {
                if let Some(stdout) = child.stdout.take() {
                    stdout_task = Some(tokio::spawn(read_all(stdout)));
                }
            }

            children.push((program.clone(), child));
        }

        let pgid = pgid.ok_or_else(|| ExecError::InvalidCommand("empty command".into()))?;
        Ok(Self {
            handle: ProcessHandle::new(pgid, command.clone()),
            command,
            children,
            stdout: stdout_task,
            stderr: stderr_tasks,
        })
    }

    async fn wait(self) -> Result<CommandOutput> {
        let Self {
            command,
            children,
            stdout,
            stderr,
            handle,
        } = self;

        let mut failure: Option<Option<i32>> = None;
        for (program, mut child) in children {
            let status = child.wait().await.map_err(|source| ExecError::Io {
                command: command.clone(),
                source,
            })?;
            if !status.success() && failure.is_none() {
                tracing::debug!(program = %program, status = %status, "Pipeline stage failed");
                failure = Some(status.code());
            }
        }
        handle.mark_exited();

        let stdout = match stdout {
            Some(task) => join_output(task, &command).await?,
            None => Vec::new(),
        };
        let mut errors = Vec::new();
        for task in stderr {
            errors.extend(join_output(task, &command).await?);
        }

        if handle.was_cancelled() {
            return Err(ExecError::Cancelled { command });
        }
        if let Some(code) = failure {
            return Err(ExecError::Failed {
                command,
                code,
                stderr: String::from_utf8_lossy(&errors).trim().to_string(),
            });
        }
        Ok(CommandOutput {
            stdout,
            stderr: errors,
        })
    }
}

fn tee_stage(redirect: &Redirect) -> Vec<String> {
    let mut argv: Vec<String> = ELEVATE_PREFIX.iter().map(ToString::to_string).collect();
    argv.push("tee".into());
    if redirect.append {
        argv.push("-a".into());
    }
    argv.push(redirect.path.to_string_lossy().into_owned());
    argv
}

fn open_redirect(redirect: &Redirect) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(redirect.append)
        .truncate(!redirect.append)
        .open(&redirect.path)
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

async fn join_output(task: OutputTask, command: &str) -> Result<Vec<u8>> {
    match task.await {
        Ok(result) => result.map_err(|source| ExecError::Io {
            command: command.to_string(),
            source,
        }),
        Err(join) => Err(ExecError::Io {
            command: command.to_string(),
            source: io::Error::other(join.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::TempDir;

    #[tokio::test]
    async fn pipeline_captures_last_stage_output() {
        let runner = ProcessRunner::new();
        let out = runner.run("echo A B | cut -d ' ' -f1", false).await.unwrap();
        assert_eq!(out.stdout_text().trim(), "A");
    }

    #[tokio::test]
    async fn three_stage_pipeline() {
        let runner = ProcessRunner::new();
        let out = runner
            .run("printf 'b\\na\\n' | sort | tr a-z A-Z", false)
            .await
            .unwrap();
        assert_eq!(out.stdout_text(), "A\nB\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let runner = ProcessRunner::new();
        let err = runner.run("false", false).await.unwrap_err();
        assert!(matches!(err, ExecError::Failed { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn failure_carries_stderr() {
        let runner = ProcessRunner::new();
        let err = runner
            .run("ls /definitely/not/a/real/path", false)
            .await
            .unwrap_err();
        match err {
            ExecError::Failed { stderr, .. } => assert!(!stderr.is_empty()),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn redirect_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        let runner = ProcessRunner::new();

        let out = runner
            .run(
                &format!("echo HELLO WORLD | cut -f 2 -d ' ' > '{}'", path.display()),
                false,
            )
            .await
            .unwrap();
        assert!(out.stdout.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "WORLD\n");

        runner
            .run(&format!("echo AGAIN >> '{}'", path.display()), false)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "WORLD\nAGAIN\n");
    }

    #[tokio::test]
    async fn stderr_is_captured_on_success() {
        let runner = ProcessRunner::new();
        let out = runner
            .run("sh -c 'echo banner 1>&2'", false)
            .await
            .unwrap();
        assert!(out.stdout.is_empty());
        assert_eq!(out.combined_text().trim(), "banner");
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let runner = ProcessRunner::new();
        let err = runner
            .run("definitely-not-a-binary-on-this-host", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn malformed_line_is_rejected_before_spawning() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let runner = ProcessRunner::new();

        let err = runner
            .run(&format!("touch '{}' |", marker.display()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::InvalidCommand(_)));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn tracked_handle_arrives_before_exit_and_cancels() {
        let runner = Arc::new(ProcessRunner::new());
        let (tx, rx) = tokio::sync::oneshot::channel();

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                runner
                    .run_tracked(
                        "sleep 30",
                        false,
                        Box::new(move |handle| {
                            let _ = tx.send(handle);
                        }),
                    )
                    .await
            })
        };

        let handle = rx.await.unwrap();
        assert!(!handle.is_finished());
        assert!(handle.pgid().is_some());

        let started = Instant::now();
        handle.cancel().unwrap();
        let result = task.await.unwrap();

        assert!(matches!(result, Err(ExecError::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn cancel_after_exit_is_not_an_error() {
        let runner = ProcessRunner::new();
        let slot = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&slot);

        runner
            .run_tracked(
                "true",
                false,
                Box::new(move |handle| {
                    *sink.lock() = Some(handle);
                }),
            )
            .await
            .unwrap();

        let handle = slot.lock().take().unwrap();
        assert!(handle.is_finished());
        assert!(handle.cancel().is_ok());
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let runner = ProcessRunner::new();
        let started = Instant::now();
        let err = runner
            .run_with_timeout("sleep 30", false, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
