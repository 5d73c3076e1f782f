//! Test doubles for seed methods.
//!
//! [`MockDatabase`] answers the [`Database`] queries from in-memory state.
//! [`ScriptedMethod`] is a [`SeedMethod`] whose stages do whatever the test
//! scripts, so the state machine can be driven deterministically.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use seed_agent_core::{BackupMetadata, Engine, MethodKind, Side, StageKind};
use tokio::sync::Notify;

use crate::context::{MethodBase, StageContext};
use crate::database::{Database, SnapshotLock};
use crate::error::{MethodError, Result};
use crate::method::{BackupRequest, SeedMethod};

// ============================================================================
// Database
// ============================================================================

#[derive(Debug, Default)]
struct DbState {
    plugins: HashMap<String, String>,
    master_status: BackupMetadata,
    clone_status: Option<BackupMetadata>,
    sql_mode: String,
    statements: Vec<String>,
    locks_taken: usize,
    locks_released: usize,
}

/// In-memory [`Database`].
#[derive(Debug, Default)]
pub struct MockDatabase {
    state: std::sync::Arc<Mutex<DbState>>,
}

impl MockDatabase {
    /// A server with no plugins, binary logging off and an empty `sql_mode`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a plugin's `PLUGIN_STATUS`.
    pub fn set_plugin_status(&self, plugin: &str, status: &str) {
        self.state
            .lock()
            .plugins
            .insert(plugin.to_string(), status.to_string());
    }

    /// Set the coordinates `SHOW MASTER STATUS` returns.
    pub fn set_master_status(&self, meta: BackupMetadata) {
        self.state.lock().master_status = meta;
    }

    /// Set the coordinates recorded by the last clone.
    pub fn set_clone_status(&self, meta: BackupMetadata) {
        self.state.lock().clone_status = Some(meta);
    }

    /// Set the global `sql_mode`.
    pub fn set_sql_mode(&self, mode: &str) {
        self.state.lock().sql_mode = mode.to_string();
    }

    /// Statements passed to [`Database::execute`], in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    /// Number of read locks taken.
    #[must_use]
    pub fn locks_taken(&self) -> usize {
        self.state.lock().locks_taken
    }

    /// Number of read locks released.
    #[must_use]
    pub fn locks_released(&self) -> usize {
        self.state.lock().locks_released
    }
}

#[async_trait]
impl Database for MockDatabase {
    async fn plugin_status(&self, plugin: &str) -> Result<Option<String>> {
        Ok(self.state.lock().plugins.get(plugin).cloned())
    }

    async fn master_status(&self) -> Result<BackupMetadata> {
        Ok(self.state.lock().master_status.clone())
    }

    async fn clone_status(&self) -> Result<Option<BackupMetadata>> {
        Ok(self.state.lock().clone_status.clone())
    }

    async fn sql_mode(&self) -> Result<String> {
        Ok(self.state.lock().sql_mode.clone())
    }

    async fn execute(&self, statement: &str) -> Result<()> {
        self.state.lock().statements.push(statement.to_string());
        Ok(())
    }

    async fn lock_for_snapshot(&self) -> Result<Box<dyn SnapshotLock>> {
        let mut state = self.state.lock();
        state.locks_taken += 1;
        Ok(Box::new(MockLock {
            coordinates: state.master_status.clone(),
            state: std::sync::Arc::clone(&self.state),
        }))
    }
}

struct MockLock {
    coordinates: BackupMetadata,
    state: std::sync::Arc<Mutex<DbState>>,
}

#[async_trait]
impl SnapshotLock for MockLock {
    fn coordinates(&self) -> &BackupMetadata {
        &self.coordinates
    }

    async fn release(self: Box<Self>) -> Result<()> {
        self.state.lock().locks_released += 1;
        Ok(())
    }
}

// ============================================================================
// Scripted method
// ============================================================================

/// What a scripted stage does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Return `Ok(())` at once.
    Succeed,
    /// Return a configuration error with this text.
    Fail(String),
    /// Run this command line through the base's runner, tracked.
    RunCommand(String),
    /// Wait until [`ScriptedMethod::release`] is called, without a process.
    Hold,
    /// Run this command tracked, then hold like [`Script::Hold`].
    RunThenHold(String),
}

/// A [`SeedMethod`] driven by per-stage [`Script`]s. Unscripted stages succeed.
#[derive(Debug)]
pub struct ScriptedMethod {
    kind: MethodKind,
    base: MethodBase,
    into_datadir: bool,
    available: AtomicBool,
    scripts: Mutex<HashMap<StageKind, Script>>,
    calls: Mutex<Vec<(StageKind, Option<Side>)>>,
    metadata: Mutex<Option<BackupMetadata>>,
    gate: Notify,
}

impl ScriptedMethod {
    /// An available method of the given kind that backs up outside the datadir.
    #[must_use]
    pub fn new(kind: MethodKind, base: MethodBase) -> Self {
        Self {
            kind,
            base,
            into_datadir: false,
            available: AtomicBool::new(true),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            metadata: Mutex::new(None),
            gate: Notify::new(),
        }
    }

    /// Declare that backups land in the data directory.
    #[must_use]
    pub fn into_datadir(mut self) -> Self {
        self.into_datadir = true;
        self
    }

    /// Set what availability probes report.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Script a stage.
    pub fn script(&self, stage: StageKind, script: Script) {
        self.scripts.lock().insert(stage, script);
    }

    /// Set what [`SeedMethod::get_metadata`] returns.
    pub fn set_metadata(&self, meta: BackupMetadata) {
        *self.metadata.lock() = Some(meta);
    }

    /// Let one held stage finish.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    /// Stage invocations so far.
    #[must_use]
    pub fn calls(&self) -> Vec<(StageKind, Option<Side>)> {
        self.calls.lock().clone()
    }

    /// How many times `stage` was invoked.
    #[must_use]
    pub fn call_count(&self, stage: StageKind) -> usize {
        self.calls.lock().iter().filter(|(s, _)| *s == stage).count()
    }

    async fn play(&self, stage: StageKind, side: Option<Side>, ctx: &StageContext) -> Result<()> {
        self.calls.lock().push((stage, side));
        let script = self
            .scripts
            .lock()
            .get(&stage)
            .cloned()
            .unwrap_or(Script::Succeed);

        match script {
            Script::Succeed => Ok(()),
            Script::Fail(message) => Err(MethodError::Config(message)),
            Script::RunCommand(command) => self.base.exec(ctx, &command).await,
            Script::Hold => {
                self.gate.notified().await;
                Ok(())
            }
            Script::RunThenHold(command) => {
                self.base.exec(ctx, &command).await?;
                self.gate.notified().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SeedMethod for ScriptedMethod {
    fn kind(&self) -> MethodKind {
        self.kind
    }

    fn supported_engines(&self) -> BTreeSet<Engine> {
        [Engine::InnoDb].into_iter().collect()
    }

    fn backups_into_datadir(&self) -> bool {
        self.into_datadir
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn prepare(&self, side: Side, ctx: &StageContext) -> Result<()> {
        self.play(StageKind::Prepare, Some(side), ctx).await
    }

    async fn backup(&self, request: &BackupRequest, ctx: &StageContext) -> Result<()> {
        self.play(StageKind::Backup, Some(request.side), ctx).await
    }

    async fn restore(&self, ctx: &StageContext) -> Result<()> {
        self.play(StageKind::Restore, None, ctx).await
    }

    async fn get_metadata(&self) -> Result<BackupMetadata> {
        self.calls.lock().push((StageKind::MetadataFetch, None));
        self.metadata
            .lock()
            .clone()
            .ok_or_else(|| MethodError::MissingArtifact(PathBuf::from("scripted")))
    }

    async fn cleanup(&self, side: Side, ctx: &StageContext) -> Result<()> {
        self.play(StageKind::Cleanup, Some(side), ctx).await
    }
}
