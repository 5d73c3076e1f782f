//! Cancellable handles to running pipelines.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

use crate::error::{ExecError, Result};

/// A handle to a running pipeline.
///
/// Every stage of a pipeline shares one process group, so cancelling the
/// handle terminates the whole pipeline. Handles are cheap to clone and remain
/// valid after the pipeline exits; cancelling an exited pipeline is a no-op.
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    pgid: Option<i32>,
    command: String,
    cancelled: AtomicBool,
    exited: AtomicBool,
}

impl ProcessHandle {
    pub(crate) fn new(pgid: i32, command: String) -> Self {
        Self::build(Some(pgid), command)
    }

    /// A handle with no OS process behind it.
    ///
    /// Used by runners that do not spawn anything; cancelling it only records
    /// the request.
    #[must_use]
    pub fn detached(command: impl Into<String>) -> Self {
        Self::build(None, command.into())
    }

    fn build(pgid: Option<i32>, command: String) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                pgid,
                command,
                cancelled: AtomicBool::new(false),
                exited: AtomicBool::new(false),
            }),
        }
    }

    /// The process group of the pipeline, if one was spawned.
    #[must_use]
    pub fn pgid(&self) -> Option<i32> {
        self.inner.pgid
    }

    /// The masked command line.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.inner.command
    }

    /// Returns true once every stage of the pipeline has been reaped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.exited.load(Ordering::Acquire)
    }

    /// Returns true if `cancel` was called while the pipeline was running.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Send `SIGTERM` to the pipeline's process group.
    ///
    /// A pipeline that already exited, or whose group is already gone, is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns `ExecError::Signal` if the kernel refuses the signal, e.g.
    /// with `EPERM`.
    pub fn cancel(&self) -> Result<()> {
        if self.is_finished() {
            tracing::debug!(command = %self.command(), "Cancel requested after exit; ignoring");
            return Ok(());
        }
        self.inner.cancelled.store(true, Ordering::Release);

        let Some(pgid) = self.inner.pgid else {
            return Ok(());
        };

        match killpg(Pid::from_raw(pgid), Signal::SIGTERM) {
            Ok(()) => {
                tracing::info!(pgid, command = %self.command(), "Sent SIGTERM to process group");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                tracing::debug!(pgid, "Process group already gone");
                Ok(())
            }
            Err(errno) => Err(ExecError::Signal { pgid, errno }),
        }
    }

    pub(crate) fn mark_exited(&self) {
        self.inner.exited.store(true, Ordering::Release);
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pgid", &self.inner.pgid)
            .field("command", &self.inner.command)
            .field("finished", &self.is_finished())
            .field("cancelled", &self.was_cancelled())
            .finish()
    }
}
