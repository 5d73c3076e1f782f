//! Stage context and the helpers every method shares.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use seed_agent_exec::{quote, CommandOutput, CommandRunner, ProcessHandle};

use crate::config::BaseConfig;
use crate::database::Database;
use crate::error::Result;

/// Receives process and progress events from a running stage.
///
/// The state machine implements this to record the live handle of the
/// stage's current command, so that an abort request can find it.
pub trait StageObserver: Send + Sync {
    /// A tracked command was spawned.
    fn process_started(&self, handle: ProcessHandle);

    /// Free-form progress for the stage's details.
    fn progress(&self, details: &str);
}

struct NoopObserver;

impl StageObserver for NoopObserver {
    fn process_started(&self, _handle: ProcessHandle) {}

    fn progress(&self, _details: &str) {}
}

/// Handed to a method for the duration of one stage.
#[derive(Clone)]
pub struct StageContext {
    observer: Arc<dyn StageObserver>,
}

impl StageContext {
    /// Create a context reporting to `observer`.
    #[must_use]
    pub fn new(observer: Arc<dyn StageObserver>) -> Self {
        Self { observer }
    }

    /// A context nobody listens to.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(Arc::new(NoopObserver))
    }

    /// Report progress.
    pub fn progress(&self, details: impl AsRef<str>) {
        let details = details.as_ref();
        tracing::debug!(details, "Stage progress");
        self.observer.progress(details);
    }

    fn on_start(&self) -> seed_agent_exec::OnStart {
        let observer = Arc::clone(&self.observer);
        Box::new(move |handle| observer.process_started(handle))
    }
}

impl fmt::Debug for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext").finish_non_exhaustive()
    }
}

/// Runner, database and shared settings.
///
/// Every method owns a `MethodBase`; it is cheap to clone.
#[derive(Clone)]
pub struct MethodBase {
    runner: Arc<dyn CommandRunner>,
    database: Arc<dyn Database>,
    config: Arc<BaseConfig>,
}

impl MethodBase {
    /// Create a new base.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        database: Arc<dyn Database>,
        config: BaseConfig,
    ) -> Self {
        Self {
            runner,
            database,
            config: Arc::new(config),
        }
    }

    /// Shared settings.
    #[must_use]
    pub fn config(&self) -> &BaseConfig {
        &self.config
    }

    /// The local database.
    #[must_use]
    pub fn database(&self) -> &dyn Database {
        self.database.as_ref()
    }

    /// Run a stage-bound command, reporting its handle to the context.
    ///
    /// # Errors
    ///
    /// Returns the runner's error, including `Cancelled` after an abort.
    pub async fn exec(&self, ctx: &StageContext, command: &str) -> Result<()> {
        self.runner
            .run_tracked(command, self.config.exec_with_sudo, ctx.on_start())
            .await?;
        Ok(())
    }

    /// Run a short command and capture its output.
    ///
    /// # Errors
    ///
    /// Returns the runner's error.
    pub async fn capture(&self, command: &str) -> Result<CommandOutput> {
        Ok(self.runner.run(command, self.config.exec_with_sudo).await?)
    }

    /// Run an availability probe, bounded by the probe timeout.
    ///
    /// Any failure, including the timeout, is reported as `None`.
    pub async fn probe_output(&self, command: &str) -> Option<CommandOutput> {
        match self
            .runner
            .run_with_timeout(command, self.config.exec_with_sudo, self.config.probe_timeout)
            .await
        {
            Ok(output) => Some(output),
            Err(e) => {
                tracing::debug!(error = %e, "Availability probe failed");
                None
            }
        }
    }

    /// Returns true if the probe command succeeds within the timeout.
    pub async fn probe(&self, command: &str) -> bool {
        self.probe_output(command).await.is_some()
    }

    /// Stop the local database service.
    ///
    /// # Errors
    ///
    /// Returns the runner's error.
    pub async fn stop_service(&self, ctx: &StageContext) -> Result<()> {
        ctx.progress("Stopping database service");
        self.exec(ctx, &self.config.mysql.service_stop_command).await
    }

    /// Start the local database service.
    ///
    /// # Errors
    ///
    /// Returns the runner's error.
    pub async fn start_service(&self, ctx: &StageContext) -> Result<()> {
        ctx.progress("Starting database service");
        self.exec(ctx, &self.config.mysql.service_start_command).await
    }

    /// Empty the data directory, or move it aside when configured to keep it.
    ///
    /// # Errors
    ///
    /// Returns the runner's error.
    pub async fn clear_datadir(&self, ctx: &StageContext) -> Result<()> {
        let datadir = &self.config.mysql.datadir;
        if self.config.backup_old_datadir {
            let aside = datadir.with_extension("seed-old");
            ctx.progress(format!("Moving {} aside", datadir.display()));
            self.remove_path(ctx, &aside).await?;
            self.exec(ctx, &format!("mv {} {}", path_arg(datadir), path_arg(&aside)))
                .await?;
            self.exec(ctx, &format!("mkdir -p {}", path_arg(datadir)))
                .await?;
            return self.chown_datadir(ctx).await;
        }

        ctx.progress(format!("Clearing {}", datadir.display()));
        self.exec(ctx, &format!("find {} -mindepth 1 -delete", path_arg(datadir)))
            .await
    }

    /// Hand the data directory back to the database's OS user.
    ///
    /// # Errors
    ///
    /// Returns the runner's error.
    pub async fn chown_datadir(&self, ctx: &StageContext) -> Result<()> {
        let mysql = &self.config.mysql;
        let owner = format!("{0}:{0}", mysql.os_user);
        self.exec(
            ctx,
            &format!("chown -R {} {}", quote(&owner), path_arg(&mysql.datadir)),
        )
        .await
    }

    /// Remove a file or directory tree; a missing path is not an error.
    ///
    /// # Errors
    ///
    /// Returns the runner's error.
    pub async fn remove_path(&self, ctx: &StageContext, path: &Path) -> Result<()> {
        self.exec(ctx, &format!("rm -rf {}", path_arg(path))).await
    }

    /// Client connection flags for `host:port` as the seed account.
    #[must_use]
    pub fn client_args(&self, host: &str, port: u16) -> String {
        let mysql = &self.config.mysql;
        format!(
            "--host={} --port={port} --user={} --password={}",
            quote(host),
            quote(&mysql.seed_user),
            quote(&mysql.seed_password),
        )
    }

    /// Client connection flags for the local server.
    #[must_use]
    pub fn local_client_args(&self) -> String {
        let mysql = &self.config.mysql;
        self.client_args(&mysql.host, mysql.port)
    }

    /// `socat` stage listening on the seed port, writing to stdout.
    #[must_use]
    pub fn stream_receiver(&self) -> String {
        format!("socat -u TCP-LISTEN:{},reuseaddr stdio", self.config.seed_port)
    }

    /// `socat` stage sending stdin to `peer` on the seed port.
    #[must_use]
    pub fn stream_sender(&self, peer: &str) -> String {
        format!("socat -u stdio TCP:{}:{}", quote(peer), self.config.seed_port)
    }
}

impl fmt::Debug for MethodBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodBase")
            .field("exec_with_sudo", &self.config.exec_with_sudo)
            .field("backup_dir", &self.config.backup_dir)
            .finish_non_exhaustive()
    }
}

/// Quote a path for a command line.
pub(crate) fn path_arg(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDatabase;
    use parking_lot::Mutex;
    use seed_agent_exec::RecordingRunner;
    use std::path::PathBuf;

    fn base(runner: &Arc<RecordingRunner>, config: BaseConfig) -> MethodBase {
        MethodBase::new(
            Arc::clone(runner) as Arc<dyn CommandRunner>,
            Arc::new(MockDatabase::new()),
            config,
        )
    }

    #[derive(Default)]
    struct Collecting {
        handles: Mutex<Vec<ProcessHandle>>,
        progress: Mutex<Vec<String>>,
    }

    impl StageObserver for Collecting {
        fn process_started(&self, handle: ProcessHandle) {
            self.handles.lock().push(handle);
        }

        fn progress(&self, details: &str) {
            self.progress.lock().push(details.to_string());
        }
    }

    #[tokio::test]
    async fn exec_reports_handles_and_elevates() {
        let runner = Arc::new(RecordingRunner::new());
        let config = BaseConfig {
            exec_with_sudo: true,
            ..BaseConfig::default()
        };
        let base = base(&runner, config);
        let observer = Arc::new(Collecting::default());
        let ctx = StageContext::new(Arc::clone(&observer) as Arc<dyn StageObserver>);

        base.stop_service(&ctx).await.unwrap();

        assert_eq!(observer.handles.lock().len(), 1);
        assert_eq!(observer.progress.lock()[0], "Stopping database service");
        let calls = runner.calls();
        assert!(calls[0].elevate && calls[0].tracked);
        assert_eq!(calls[0].command, "systemctl stop mysql");
    }

    #[tokio::test]
    async fn clear_datadir_deletes_contents_by_default() {
        let runner = Arc::new(RecordingRunner::new());
        let base = base(&runner, BaseConfig::default());
        base.clear_datadir(&StageContext::detached()).await.unwrap();
        assert_eq!(runner.commands(), vec!["find /var/lib/mysql -mindepth 1 -delete"]);
    }

    #[tokio::test]
    async fn clear_datadir_can_keep_old_copy() {
        let runner = Arc::new(RecordingRunner::new());
        let mut config = BaseConfig {
            backup_old_datadir: true,
            ..BaseConfig::default()
        };
        config.mysql.datadir = PathBuf::from("/data/my sql");
        let base = base(&runner, config);
        base.clear_datadir(&StageContext::detached()).await.unwrap();

        let commands = runner.commands();
        assert_eq!(commands[0], "rm -rf '/data/my sql.seed-old'");
        assert_eq!(commands[1], "mv '/data/my sql' '/data/my sql.seed-old'");
        assert_eq!(commands[2], "mkdir -p '/data/my sql'");
        assert!(commands[3].starts_with("chown -R mysql:mysql"));
    }

    #[tokio::test]
    async fn failing_probe_is_unavailable() {
        let runner = Arc::new(RecordingRunner::new());
        runner.fail("xtrabackup", "command not found");
        let base = base(&runner, BaseConfig::default());
        assert!(!base.probe("xtrabackup --version").await);
        assert!(base.probe("mysqldump --version").await);
    }

    #[test]
    fn client_args_quote_credentials() {
        let runner = Arc::new(RecordingRunner::new());
        let mut config = BaseConfig::default();
        config.mysql.seed_user = "seed".into();
        config.mysql.seed_password = "p a$$".into();
        let base = base(&runner, config);
        assert_eq!(
            base.client_args("db1", 3307),
            "--host=db1 --port=3307 --user=seed --password='p a$$'"
        );
    }
}
