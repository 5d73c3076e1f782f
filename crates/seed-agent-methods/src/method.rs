//! The seed method contract.

use std::collections::BTreeSet;

use async_trait::async_trait;
use seed_agent_core::{BackupMetadata, Engine, MethodKind, SeedMethodDescriptor, Side};

use crate::context::StageContext;
use crate::error::Result;

/// Parameters of a Backup stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    /// The side this agent plays in the seed.
    pub side: Side,
    /// The peer host: the source to pull from, or the target to stream to.
    pub host: String,
    /// The peer's database port.
    pub port: u16,
}

/// A pluggable backup engine.
///
/// Stage methods run to completion inside the task the state machine
/// spawns for them. Commands that do real work go through
/// [`MethodBase::exec`](crate::MethodBase::exec) so they can be aborted.
#[async_trait]
pub trait SeedMethod: Send + Sync {
    /// Which method this is.
    fn kind(&self) -> MethodKind;

    /// Storage engines whose tables survive the method intact.
    ///
    /// May depend on the installed tool version once [`Self::is_available`]
    /// has probed it.
    fn supported_engines(&self) -> BTreeSet<Engine>;

    /// Whether the backup lands in the live data directory, which requires
    /// the database service to be stopped before Restore.
    fn backups_into_datadir(&self) -> bool;

    /// Cheap, bounded probe for the method's tooling.
    async fn is_available(&self) -> bool;

    /// Pre-flight work. Never destructive on the Source side.
    async fn prepare(&self, side: Side, ctx: &StageContext) -> Result<()>;

    /// Produce or stream the backup.
    async fn backup(&self, request: &BackupRequest, ctx: &StageContext) -> Result<()>;

    /// Apply the backup to the local instance.
    async fn restore(&self, ctx: &StageContext) -> Result<()>;

    /// Replication coordinates of the backup.
    async fn get_metadata(&self) -> Result<BackupMetadata>;

    /// Release whatever Backup or Restore acquired. Safe after a partial failure.
    async fn cleanup(&self, side: Side, ctx: &StageContext) -> Result<()>;

    /// Describe the method for the control plane.
    fn describe(&self, is_available: bool) -> SeedMethodDescriptor {
        SeedMethodDescriptor {
            name: self.kind(),
            supported_engines: self.supported_engines(),
            backups_into_datadir: self.backups_into_datadir(),
            is_available,
        }
    }
}
