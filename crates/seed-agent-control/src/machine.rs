//! The seed stage state machine.
//!
//! This module provides the `SeedControl` trait and the `SeedCoordinator`
//! implementation that owns the agent's single seed operation.
//!
//! Every mutation happens under one lock that is never held across a process
//! call or I/O. Stage work runs on its own task; requests return as soon as
//! the stage is recorded as running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use seed_agent_core::{
    BackupMetadata, MethodKind, SeedId, SeedMethodDescriptor, Side, StageKind, StageStatus,
};
use seed_agent_exec::ProcessHandle;
use seed_agent_methods::{BackupRequest, SeedMethod, SeedMethodRegistry, StageContext, StageObserver};
use tokio::sync::broadcast;

use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::types::{SeedOperation, StageOutcome, StageRecord, StageRequest};

const EVENT_CAPACITY: usize = 256;

/// Operations the HTTP layer drives.
#[async_trait]
pub trait SeedControl: Send + Sync {
    // =========================================================================
    // Stage Operations
    // =========================================================================

    /// Start Prepare, creating or replacing the operation.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::OperationRunning` if another seed has a stage in flight.
    fn prepare(&self, seed_id: SeedId, method: &str, side: Side) -> Result<StageOutcome>;

    /// Start Backup against `host:port`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::SeedNotFound` if the agent does not hold `seed_id`.
    fn backup(&self, seed_id: SeedId, method: &str, host: &str, port: u16)
        -> Result<StageOutcome>;

    /// Start Restore.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::SeedNotFound` if the agent does not hold `seed_id`.
    fn restore(&self, seed_id: SeedId, method: &str) -> Result<StageOutcome>;

    /// Start Cleanup.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::SeedNotFound` if the agent does not hold `seed_id`.
    fn cleanup(&self, seed_id: SeedId, method: &str, side: Side) -> Result<StageOutcome>;

    /// Read the binlog coordinates of a completed backup.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::StageNotCompleted` before Backup has completed.
    async fn get_metadata(&self, seed_id: SeedId, method: &str) -> Result<BackupMetadata>;

    /// Cancel the live process of a running stage.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotRunning` if the stage has no live process.
    fn abort_stage(&self, seed_id: SeedId, stage: StageKind) -> Result<()>;

    // =========================================================================
    // Queries
    // =========================================================================

    /// Record of one stage.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::SeedNotFound` or `ControlError::StageNotFound`.
    fn stage(&self, seed_id: SeedId, stage: StageKind) -> Result<StageRecord>;

    /// Snapshot of the operation the agent holds.
    fn active_operation(&self) -> Option<SeedOperation>;

    /// Descriptors of the registered methods.
    fn methods(&self) -> Vec<SeedMethodDescriptor>;

    /// Stage record updates, as they happen.
    fn subscribe(&self) -> broadcast::Receiver<StageRecord>;
}

/// Identifies one dispatch of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordKey {
    seed_id: SeedId,
    stage: StageKind,
    generation: u64,
}

struct Inner {
    registry: Arc<SeedMethodRegistry>,
    hostname: String,
    state: Mutex<Option<SeedOperation>>,
    events: broadcast::Sender<StageRecord>,
    generation: AtomicU64,
}

/// The agent's seed state machine.
#[derive(Clone)]
pub struct SeedCoordinator {
    inner: Arc<Inner>,
}

impl SeedCoordinator {
    /// Create a coordinator holding no operation.
    #[must_use]
    pub fn new(registry: Arc<SeedMethodRegistry>, hostname: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                registry,
                hostname: hostname.into(),
                state: Mutex::new(None),
                events,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// The method registry.
    #[must_use]
    pub fn registry(&self) -> &SeedMethodRegistry {
        &self.inner.registry
    }

    fn resolve_available(&self, name: &str) -> Result<Arc<dyn SeedMethod>> {
        let method = self
            .inner
            .registry
            .resolve(name)
            .ok_or_else(|| ControlError::UnknownMethod(name.to_string()))?;
        if !self.inner.registry.is_available(method.kind()) {
            return Err(ControlError::MethodUnavailable(method.kind()));
        }
        Ok(method)
    }

    fn start(&self, seed_id: SeedId, name: &str, request: StageRequest) -> Result<StageOutcome> {
        let method = self.resolve_available(name)?;
        let stage = request.stage();
        let key = RecordKey {
            seed_id,
            stage,
            generation: self.inner.next_generation(),
        };

        let (side, record) = {
            let mut state = self.inner.state.lock();
            let operation = match &request {
                StageRequest::Prepare { side } => {
                    operation_for_prepare(&mut state, seed_id, *side, method.kind())?
                }
                _ => operation_for_stage(&mut state, seed_id, method.kind())?,
            };

            if operation
                .record(stage)
                .is_some_and(|r| r.status.blocks_restart())
            {
                return Ok(StageOutcome::AlreadyStarted(stage));
            }
            lifecycle::validate_transition(seed_id, operation.phase(), stage)?;

            if let StageRequest::Prepare { side } = &request {
                operation.side = *side;
            }
            let record =
                StageRecord::running(operation, stage, &self.inner.hostname, key.generation);
            operation.stage = stage;
            operation.status = StageStatus::Running;
            operation.records.insert(stage, record.clone());
            (operation.side, record)
        };

        tracing::info!(
            seed_id = %seed_id,
            stage = %stage,
            method = %method.kind(),
            side = %side,
            "Seed stage started"
        );
        self.inner.publish(record);
        self.dispatch(method, request, side, key);
        Ok(StageOutcome::Started)
    }

    fn dispatch(
        &self,
        method: Arc<dyn SeedMethod>,
        request: StageRequest,
        side: Side,
        key: RecordKey,
    ) {
        let inner = Arc::clone(&self.inner);
        let ctx = StageContext::new(Arc::new(RecordObserver {
            inner: Arc::clone(&inner),
            key,
        }));

        tokio::spawn(async move {
            let registry = Arc::clone(&inner.registry);
            let work = tokio::spawn(run_stage(registry, method, request, side, ctx));

            let (status, details) = match work.await {
                Ok(Ok(())) => (StageStatus::Completed, format!("{} completed", key.stage)),
                Ok(Err(e)) if e.is_cancelled() => (StageStatus::Cancelled, e.to_string()),
                Ok(Err(e)) => (StageStatus::Error, e.to_string()),
                Err(e) => (StageStatus::Error, format!("{} task failed: {e}", key.stage)),
            };
            inner.finish(key, status, details);
        });
    }
}

impl std::fmt::Debug for SeedCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedCoordinator")
            .field("hostname", &self.inner.hostname)
            .field("operation", &self.inner.state.lock().as_ref().map(|op| op.seed_id))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SeedControl for SeedCoordinator {
    fn prepare(&self, seed_id: SeedId, method: &str, side: Side) -> Result<StageOutcome> {
        self.start(seed_id, method, StageRequest::Prepare { side })
    }

    fn backup(
        &self,
        seed_id: SeedId,
        method: &str,
        host: &str,
        port: u16,
    ) -> Result<StageOutcome> {
        if host.is_empty() {
            return Err(ControlError::InvalidRequest("backup host is empty".into()));
        }
        self.start(
            seed_id,
            method,
            StageRequest::Backup {
                host: host.to_string(),
                port,
            },
        )
    }

    fn restore(&self, seed_id: SeedId, method: &str) -> Result<StageOutcome> {
        self.start(seed_id, method, StageRequest::Restore)
    }

    fn cleanup(&self, seed_id: SeedId, method: &str, side: Side) -> Result<StageOutcome> {
        self.start(seed_id, method, StageRequest::Cleanup { side })
    }

    async fn get_metadata(&self, seed_id: SeedId, name: &str) -> Result<BackupMetadata> {
        let method = self
            .inner
            .registry
            .resolve(name)
            .ok_or_else(|| ControlError::UnknownMethod(name.to_string()))?;
        let key = RecordKey {
            seed_id,
            stage: StageKind::MetadataFetch,
            generation: self.inner.next_generation(),
        };

        let record = {
            let mut state = self.inner.state.lock();
            let operation = operation_for_stage(&mut state, seed_id, method.kind())?;
            let backup_done = operation
                .record(StageKind::Backup)
                .is_some_and(|r| r.status == StageStatus::Completed);
            if !backup_done {
                return Err(ControlError::StageNotCompleted {
                    seed_id,
                    stage: StageKind::Backup,
                });
            }
            lifecycle::validate_transition(seed_id, operation.phase(), key.stage)?;

            let record =
                StageRecord::running(operation, key.stage, &self.inner.hostname, key.generation);
            operation.records.insert(key.stage, record.clone());
            record
        };
        self.inner.publish(record);

        let result = method.get_metadata().await;
        match &result {
            Ok(meta) => self.inner.finish(
                key,
                StageStatus::Completed,
                format!("{}:{}", meta.log_file, meta.log_pos),
            ),
            Err(e) => self.inner.finish(key, StageStatus::Error, e.to_string()),
        }
        result.map_err(ControlError::from)
    }

    fn abort_stage(&self, seed_id: SeedId, stage: StageKind) -> Result<()> {
        let (handle, record) = {
            let mut state = self.inner.state.lock();
            let operation = state
                .as_mut()
                .filter(|op| op.seed_id == seed_id)
                .ok_or(ControlError::SeedNotFound(seed_id))?;
            let record = operation
                .records
                .get_mut(&stage)
                .ok_or(ControlError::StageNotFound { seed_id, stage })?;
            if record.status != StageStatus::Running {
                return Err(ControlError::NotRunning { seed_id, stage });
            }
            // A finished handle means the stage is between commands.
            let Some(handle) = record.process.take_if(|h| !h.is_finished()) else {
                return Err(ControlError::NotRunning { seed_id, stage });
            };

            record.settle(StageStatus::Cancelled, format!("{stage} aborted"));
            let record = record.clone();
            if operation.stage == stage {
                operation.status = StageStatus::Cancelled;
            }
            (handle, record)
        };

        tracing::warn!(
            seed_id = %seed_id,
            stage = %stage,
            command = %handle.command(),
            "Aborting seed stage"
        );
        self.inner.publish(record);
        handle.cancel()?;
        Ok(())
    }

    fn stage(&self, seed_id: SeedId, stage: StageKind) -> Result<StageRecord> {
        let state = self.inner.state.lock();
        let operation = state
            .as_ref()
            .filter(|op| op.seed_id == seed_id)
            .ok_or(ControlError::SeedNotFound(seed_id))?;
        operation
            .record(stage)
            .cloned()
            .ok_or(ControlError::StageNotFound { seed_id, stage })
    }

    fn active_operation(&self) -> Option<SeedOperation> {
        self.inner.state.lock().clone()
    }

    fn methods(&self) -> Vec<SeedMethodDescriptor> {
        self.inner.registry.descriptors()
    }

    fn subscribe(&self) -> broadcast::Receiver<StageRecord> {
        self.inner.events.subscribe()
    }
}

// =============================================================================
// Operation lookup
// =============================================================================

fn operation_for_prepare(
    state: &mut Option<SeedOperation>,
    seed_id: SeedId,
    side: Side,
    method: MethodKind,
) -> Result<&mut SeedOperation> {
    let replace = match state.as_ref() {
        Some(op) if op.seed_id == seed_id => {
            if op.method != method {
                return Err(ControlError::MethodMismatch {
                    seed_id,
                    expected: op.method,
                    requested: method,
                });
            }
            false
        }
        Some(op) => {
            if let Some(stage) = op.running_stage() {
                return Err(ControlError::OperationRunning {
                    running: op.seed_id,
                    stage,
                });
            }
            tracing::info!(previous = %op.seed_id, seed_id = %seed_id, "Replacing seed operation");
            true
        }
        None => true,
    };

    if replace {
        *state = Some(SeedOperation::new(seed_id, side, method));
    }
    state.as_mut().ok_or(ControlError::SeedNotFound(seed_id))
}

fn operation_for_stage(
    state: &mut Option<SeedOperation>,
    seed_id: SeedId,
    method: MethodKind,
) -> Result<&mut SeedOperation> {
    let operation = state
        .as_mut()
        .filter(|op| op.seed_id == seed_id)
        .ok_or(ControlError::SeedNotFound(seed_id))?;
    if operation.method != method {
        return Err(ControlError::MethodMismatch {
            seed_id,
            expected: operation.method,
            requested: method,
        });
    }
    Ok(operation)
}

fn record_mut(state: &mut Option<SeedOperation>, key: RecordKey) -> Option<&mut StageRecord> {
    state
        .as_mut()
        .filter(|op| op.seed_id == key.seed_id)?
        .records
        .get_mut(&key.stage)
        .filter(|r| r.generation == key.generation)
}

// =============================================================================
// Stage execution
// =============================================================================

async fn run_stage(
    registry: Arc<SeedMethodRegistry>,
    method: Arc<dyn SeedMethod>,
    request: StageRequest,
    side: Side,
    ctx: StageContext,
) -> seed_agent_methods::Result<()> {
    match request {
        StageRequest::Prepare { side } => method.prepare(side, &ctx).await,
        StageRequest::Backup { host, port } => {
            method
                .backup(&BackupRequest { side, host, port }, &ctx)
                .await
        }
        StageRequest::Restore => {
            if method.backups_into_datadir() {
                registry.base().stop_service(&ctx).await?;
            }
            method.restore(&ctx).await
        }
        StageRequest::Cleanup { side } => method.cleanup(side, &ctx).await,
    }
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn publish(&self, record: StageRecord) {
        // No subscribers is fine.
        let _ = self.events.send(record);
    }

    fn finish(&self, key: RecordKey, status: StageStatus, details: String) {
        let record = {
            let mut state = self.state.lock();
            let Some(record) = record_mut(&mut state, key) else {
                tracing::debug!(
                    seed_id = %key.seed_id,
                    stage = %key.stage,
                    "Dropping completion of superseded stage"
                );
                return;
            };
            // An abort has already settled the record.
            if record.status == StageStatus::Cancelled {
                return;
            }
            record.settle(status, details);
            let record = record.clone();

            if let Some(operation) = state.as_mut() {
                if operation.stage == key.stage {
                    operation.status = status;
                }
            }
            record
        };

        match status {
            StageStatus::Completed => tracing::info!(
                seed_id = %key.seed_id,
                stage = %key.stage,
                "Seed stage completed"
            ),
            _ => tracing::warn!(
                seed_id = %key.seed_id,
                stage = %key.stage,
                status = %status,
                details = %record.details,
                "Seed stage did not complete"
            ),
        }
        self.publish(record);
    }
}

struct RecordObserver {
    inner: Arc<Inner>,
    key: RecordKey,
}

impl StageObserver for RecordObserver {
    fn process_started(&self, handle: ProcessHandle) {
        let live = {
            let mut state = self.inner.state.lock();
            match record_mut(&mut state, self.key) {
                Some(record) if record.status == StageStatus::Running => {
                    record.process = Some(handle.clone());
                    record.updated_at = Utc::now();
                    true
                }
                _ => false,
            }
        };

        if !live {
            tracing::warn!(
                seed_id = %self.key.seed_id,
                stage = %self.key.stage,
                command = %handle.command(),
                "Stage no longer running; cancelling its new process"
            );
            if let Err(e) = handle.cancel() {
                tracing::warn!(error = %e, "Failed to cancel orphaned process");
            }
        }
    }

    fn progress(&self, details: &str) {
        let record = {
            let mut state = self.inner.state.lock();
            match record_mut(&mut state, self.key) {
                Some(record) if record.status == StageStatus::Running => {
                    details.clone_into(&mut record.details);
                    record.updated_at = Utc::now();
                    record.clone()
                }
                _ => return,
            }
        };
        self.inner.publish(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Phase;
    use seed_agent_exec::{CommandRunner, RecordingRunner};
    use seed_agent_methods::{BaseConfig, Database, MethodBase, MockDatabase, Script, ScriptedMethod};
    use std::time::Duration;

    struct Fixture {
        coordinator: SeedCoordinator,
        method: Arc<ScriptedMethod>,
        runner: Arc<RecordingRunner>,
    }

    async fn fixture_with(build: impl FnOnce(ScriptedMethod) -> ScriptedMethod) -> Fixture {
        let runner = Arc::new(RecordingRunner::new());
        let base = MethodBase::new(
            Arc::clone(&runner) as Arc<dyn CommandRunner>,
            Arc::new(MockDatabase::new()) as Arc<dyn Database>,
            BaseConfig::default(),
        );
        let method = Arc::new(build(ScriptedMethod::new(MethodKind::Mysqldump, base.clone())));
        let mut registry = SeedMethodRegistry::new(base);
        registry.register(Arc::clone(&method) as Arc<dyn SeedMethod>);
        registry.refresh_availability().await;

        Fixture {
            coordinator: SeedCoordinator::new(Arc::new(registry), "db-test"),
            method,
            runner,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(|m| m).await
    }

    async fn settled(c: &SeedCoordinator, seed_id: SeedId, stage: StageKind) -> StageRecord {
        for _ in 0..400 {
            if let Ok(record) = c.stage(seed_id, stage) {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{stage} of seed {seed_id} did not settle");
    }

    async fn with_process(c: &SeedCoordinator, seed_id: SeedId, stage: StageKind) {
        for _ in 0..400 {
            if c.stage(seed_id, stage).is_ok_and(|r| r.process().is_some()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{stage} of seed {seed_id} never started a process");
    }

    const ID: SeedId = SeedId::new(42);

    #[tokio::test]
    async fn duplicate_request_is_already_started() {
        let f = fixture().await;
        f.method.script(StageKind::Prepare, Script::Hold);

        let first = f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        let second = f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        assert_eq!(first, StageOutcome::Started);
        assert_eq!(second, StageOutcome::AlreadyStarted(StageKind::Prepare));

        f.method.release();
        let record = settled(&f.coordinator, ID, StageKind::Prepare).await;
        assert_eq!(record.status, StageStatus::Completed);

        let third = f.coordinator.prepare(ID, "Mysqldump", Side::Target).unwrap();
        assert_eq!(third, StageOutcome::AlreadyStarted(StageKind::Prepare));
        assert_eq!(f.method.call_count(StageKind::Prepare), 1);
    }

    #[tokio::test]
    async fn stage_for_other_id_is_not_found() {
        let f = fixture().await;
        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        settled(&f.coordinator, ID, StageKind::Prepare).await;

        let err = f
            .coordinator
            .backup(SeedId::new(7), "mysqldump", "db-source", 3306)
            .unwrap_err();
        assert!(matches!(err, ControlError::SeedNotFound(id) if id == SeedId::new(7)));
        assert!(err.to_string().starts_with("SeedID not found"));
    }

    #[tokio::test]
    async fn unknown_and_unavailable_methods_are_rejected() {
        let f = fixture_with(|m| {
            m.set_available(false);
            m
        })
        .await;

        assert!(matches!(
            f.coordinator.prepare(ID, "rsync", Side::Target),
            Err(ControlError::UnknownMethod(name)) if name == "rsync"
        ));
        assert!(matches!(
            f.coordinator.prepare(ID, "mysqldump", Side::Target),
            Err(ControlError::MethodUnavailable(MethodKind::Mysqldump))
        ));
        assert!(f.coordinator.active_operation().is_none());
    }

    #[tokio::test]
    async fn full_sequence_runs_every_stage_in_order() {
        let f = fixture().await;
        let mut events = f.coordinator.subscribe();

        f.coordinator.prepare(ID, "mysqldump", Side::Source).unwrap();
        settled(&f.coordinator, ID, StageKind::Prepare).await;
        f.coordinator.backup(ID, "mysqldump", "db-target", 3306).unwrap();
        settled(&f.coordinator, ID, StageKind::Backup).await;
        f.coordinator.restore(ID, "mysqldump").unwrap();
        settled(&f.coordinator, ID, StageKind::Restore).await;
        f.coordinator.cleanup(ID, "mysqldump", Side::Source).unwrap();
        let cleanup = settled(&f.coordinator, ID, StageKind::Cleanup).await;
        assert_eq!(cleanup.status, StageStatus::Completed);
        assert_eq!(cleanup.hostname, "db-test");

        assert_eq!(
            f.method.calls(),
            vec![
                (StageKind::Prepare, Some(Side::Source)),
                (StageKind::Backup, Some(Side::Source)),
                (StageKind::Restore, None),
                (StageKind::Cleanup, Some(Side::Source)),
            ]
        );

        let mut seen = Vec::new();
        while let Ok(record) = events.try_recv() {
            seen.push((record.stage, record.status));
        }
        for stage in [
            StageKind::Prepare,
            StageKind::Backup,
            StageKind::Restore,
            StageKind::Cleanup,
        ] {
            let statuses: Vec<_> = seen
                .iter()
                .filter(|(s, _)| *s == stage)
                .map(|(_, status)| *status)
                .collect();
            assert_eq!(statuses.first(), Some(&StageStatus::Running));
            assert_eq!(statuses.last(), Some(&StageStatus::Completed));
        }

        let op = f.coordinator.active_operation().unwrap();
        assert_eq!(op.stage, StageKind::Cleanup);
        assert_eq!(op.phase(), Phase::Completed);
    }

    #[tokio::test]
    async fn failure_is_recorded_and_does_not_block_cleanup() {
        let f = fixture().await;
        f.method
            .script(StageKind::Backup, Script::Fail("disk full".into()));

        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        settled(&f.coordinator, ID, StageKind::Prepare).await;
        f.coordinator.backup(ID, "mysqldump", "db-source", 3306).unwrap();
        let backup = settled(&f.coordinator, ID, StageKind::Backup).await;
        assert_eq!(backup.status, StageStatus::Error);
        assert!(backup.details.contains("disk full"));
        assert_eq!(f.coordinator.active_operation().unwrap().status, StageStatus::Error);

        assert_eq!(
            f.coordinator.cleanup(ID, "mysqldump", Side::Target).unwrap(),
            StageOutcome::Started
        );
    }

    #[tokio::test]
    async fn failed_stage_can_be_retried() {
        let f = fixture().await;
        f.method
            .script(StageKind::Prepare, Script::Fail("not yet".into()));
        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        settled(&f.coordinator, ID, StageKind::Prepare).await;

        f.method.script(StageKind::Prepare, Script::Succeed);
        assert_eq!(
            f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap(),
            StageOutcome::Started
        );
        let record = settled(&f.coordinator, ID, StageKind::Prepare).await;
        assert_eq!(record.status, StageStatus::Completed);
        assert_eq!(f.method.call_count(StageKind::Prepare), 2);
    }

    #[tokio::test]
    async fn one_stage_at_a_time() {
        let f = fixture().await;
        f.method.script(StageKind::Prepare, Script::Hold);
        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();

        let err = f
            .coordinator
            .backup(ID, "mysqldump", "db-source", 3306)
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::InvalidTransition {
                from: Phase::Preparing,
                to: StageKind::Backup,
                ..
            }
        ));
        f.method.release();
    }

    #[tokio::test]
    async fn new_seed_waits_for_running_one() {
        let f = fixture().await;
        f.method.script(StageKind::Prepare, Script::Hold);
        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();

        let other = SeedId::new(43);
        assert!(matches!(
            f.coordinator.prepare(other, "mysqldump", Side::Target),
            Err(ControlError::OperationRunning { running, stage: StageKind::Prepare }) if running == ID
        ));

        f.method.release();
        settled(&f.coordinator, ID, StageKind::Prepare).await;
        f.method.script(StageKind::Prepare, Script::Succeed);

        assert_eq!(
            f.coordinator.prepare(other, "mysqldump", Side::Source).unwrap(),
            StageOutcome::Started
        );
        assert!(matches!(
            f.coordinator.stage(ID, StageKind::Prepare),
            Err(ControlError::SeedNotFound(_))
        ));
        assert_eq!(f.coordinator.active_operation().unwrap().side, Side::Source);
    }

    #[tokio::test]
    async fn method_must_match_prepare() {
        let runner = Arc::new(RecordingRunner::new());
        let base = MethodBase::new(
            runner as Arc<dyn CommandRunner>,
            Arc::new(MockDatabase::new()) as Arc<dyn Database>,
            BaseConfig::default(),
        );
        let mut registry = SeedMethodRegistry::new(base.clone());
        registry.register(Arc::new(ScriptedMethod::new(MethodKind::Mysqldump, base.clone())));
        registry.register(Arc::new(ScriptedMethod::new(MethodKind::Mydumper, base)));
        registry.refresh_availability().await;
        let c = SeedCoordinator::new(Arc::new(registry), "db-test");

        c.prepare(ID, "mysqldump", Side::Target).unwrap();
        settled(&c, ID, StageKind::Prepare).await;
        assert!(matches!(
            c.restore(ID, "mydumper"),
            Err(ControlError::MethodMismatch {
                expected: MethodKind::Mysqldump,
                requested: MethodKind::Mydumper,
                ..
            })
        ));
        assert!(matches!(
            c.prepare(ID, "mydumper", Side::Target),
            Err(ControlError::MethodMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn abort_cancels_the_live_process() {
        let f = fixture().await;
        f.runner.block_until_cancelled("mysqldump --all-databases");
        f.method.script(
            StageKind::Backup,
            Script::RunCommand("mysqldump --all-databases".into()),
        );

        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        settled(&f.coordinator, ID, StageKind::Prepare).await;
        f.coordinator.backup(ID, "mysqldump", "db-source", 3306).unwrap();
        with_process(&f.coordinator, ID, StageKind::Backup).await;

        f.coordinator.abort_stage(ID, StageKind::Backup).unwrap();

        let record = settled(&f.coordinator, ID, StageKind::Backup).await;
        assert_eq!(record.status, StageStatus::Cancelled);
        assert!(record.process().is_none());
        // The runner notices the cancel and the stage task winds down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let record = f.coordinator.stage(ID, StageKind::Backup).unwrap();
        assert_eq!(record.status, StageStatus::Cancelled);
        assert_eq!(
            f.coordinator.active_operation().unwrap().status,
            StageStatus::Cancelled
        );

        assert!(matches!(
            f.coordinator.abort_stage(ID, StageKind::Backup),
            Err(ControlError::NotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn abort_between_commands_is_not_running() {
        let f = fixture().await;
        f.method.script(
            StageKind::Backup,
            Script::RunThenHold("mysqldump --all-databases".into()),
        );

        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        settled(&f.coordinator, ID, StageKind::Prepare).await;
        f.coordinator.backup(ID, "mysqldump", "db-source", 3306).unwrap();
        with_process(&f.coordinator, ID, StageKind::Backup).await;
        for _ in 0..400 {
            let record = f.coordinator.stage(ID, StageKind::Backup).unwrap();
            if record.process().is_some_and(ProcessHandle::is_finished) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(matches!(
            f.coordinator.abort_stage(ID, StageKind::Backup),
            Err(ControlError::NotRunning { .. })
        ));
        assert_eq!(
            f.coordinator.stage(ID, StageKind::Backup).unwrap().status,
            StageStatus::Running
        );

        f.method.release();
        let record = settled(&f.coordinator, ID, StageKind::Backup).await;
        assert_eq!(record.status, StageStatus::Completed);
    }

    #[tokio::test]
    async fn abort_without_process_is_not_running() {
        let f = fixture().await;
        f.method.script(StageKind::Prepare, Script::Hold);
        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();

        assert!(matches!(
            f.coordinator.abort_stage(ID, StageKind::Prepare),
            Err(ControlError::NotRunning { .. })
        ));
        assert!(matches!(
            f.coordinator.abort_stage(ID, StageKind::Restore),
            Err(ControlError::StageNotFound { .. })
        ));
        assert!(matches!(
            f.coordinator.abort_stage(SeedId::new(1), StageKind::Prepare),
            Err(ControlError::SeedNotFound(_))
        ));
        f.method.release();
    }

    #[tokio::test]
    async fn stale_completion_is_dropped() {
        let f = fixture().await;
        f.runner.block_until_cancelled("sleep");
        f.method
            .script(StageKind::Prepare, Script::RunCommand("sleep 600".into()));

        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        with_process(&f.coordinator, ID, StageKind::Prepare).await;
        f.coordinator.abort_stage(ID, StageKind::Prepare).unwrap();

        f.method.script(StageKind::Prepare, Script::Hold);
        assert_eq!(
            f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap(),
            StageOutcome::Started
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            f.coordinator.stage(ID, StageKind::Prepare).unwrap().status,
            StageStatus::Running
        );

        f.method.release();
        let record = settled(&f.coordinator, ID, StageKind::Prepare).await;
        assert_eq!(record.status, StageStatus::Completed);
    }

    #[tokio::test]
    async fn restore_stops_service_for_datadir_methods() {
        let f = fixture_with(ScriptedMethod::into_datadir).await;
        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        settled(&f.coordinator, ID, StageKind::Prepare).await;
        f.coordinator.restore(ID, "mysqldump").unwrap();
        settled(&f.coordinator, ID, StageKind::Restore).await;
        assert_eq!(f.runner.commands(), vec!["systemctl stop mysql"]);

        let g = fixture().await;
        g.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        settled(&g.coordinator, ID, StageKind::Prepare).await;
        g.coordinator.restore(ID, "mysqldump").unwrap();
        settled(&g.coordinator, ID, StageKind::Restore).await;
        assert!(g.runner.commands().is_empty());
    }

    #[tokio::test]
    async fn metadata_requires_completed_backup() {
        let f = fixture().await;
        let meta = BackupMetadata::positional("mysql-bin.000003", 1337);
        f.method.set_metadata(meta.clone());

        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        settled(&f.coordinator, ID, StageKind::Prepare).await;
        assert!(matches!(
            f.coordinator.get_metadata(ID, "mysqldump").await,
            Err(ControlError::StageNotCompleted {
                stage: StageKind::Backup,
                ..
            })
        ));

        f.coordinator.backup(ID, "mysqldump", "db-source", 3306).unwrap();
        settled(&f.coordinator, ID, StageKind::Backup).await;
        assert_eq!(f.coordinator.get_metadata(ID, "mysqldump").await.unwrap(), meta);

        let record = f.coordinator.stage(ID, StageKind::MetadataFetch).unwrap();
        assert_eq!(record.status, StageStatus::Completed);
        assert_eq!(record.details, "mysql-bin.000003:1337");
        // A metadata query does not move the operation.
        assert_eq!(f.coordinator.active_operation().unwrap().stage, StageKind::Backup);
    }

    #[tokio::test]
    async fn metadata_failure_is_recorded() {
        let f = fixture().await;
        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        settled(&f.coordinator, ID, StageKind::Prepare).await;
        f.coordinator.backup(ID, "mysqldump", "db-source", 3306).unwrap();
        settled(&f.coordinator, ID, StageKind::Backup).await;

        let err = f.coordinator.get_metadata(ID, "mysqldump").await.unwrap_err();
        assert!(matches!(err, ControlError::Method(_)));
        assert_eq!(
            f.coordinator
                .stage(ID, StageKind::MetadataFetch)
                .unwrap()
                .status,
            StageStatus::Error
        );
    }

    #[tokio::test]
    async fn progress_updates_details() {
        let f = fixture().await;
        f.method.script(StageKind::Prepare, Script::Hold);
        f.coordinator.prepare(ID, "mysqldump", Side::Target).unwrap();
        assert_eq!(
            f.coordinator.stage(ID, StageKind::Prepare).unwrap().details,
            "Prepare started"
        );
        f.method.release();
        let record = settled(&f.coordinator, ID, StageKind::Prepare).await;
        assert_eq!(record.details, "Prepare completed");
    }
}
