//! Logical dump with `mysqldump`, pulled by the target.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use seed_agent_core::{BackupMetadata, Engine, MethodKind, Side};

use crate::config::MysqldumpConfig;
use crate::context::{path_arg, MethodBase, StageContext};
use crate::error::Result;
use crate::metadata;
use crate::method::{BackupRequest, SeedMethod};

/// Name of the dump inside the backup directory.
pub const BACKUP_FILE: &str = "mysqldump.sql";

/// The `mysqldump` seed method.
#[derive(Debug, Clone)]
pub struct Mysqldump {
    base: MethodBase,
    config: MysqldumpConfig,
}

impl Mysqldump {
    /// Create the method.
    #[must_use]
    pub const fn new(base: MethodBase, config: MysqldumpConfig) -> Self {
        Self { base, config }
    }

    fn backup_file(&self) -> PathBuf {
        self.base.config().backup_dir.join(BACKUP_FILE)
    }

    fn backup_command(&self, host: &str, port: u16) -> String {
        let mut cmd = format!(
            "mysqldump {} --single-transaction --default-character-set=utf8mb4 \
             --master-data=2 --routines --events --triggers --all-databases",
            self.base.client_args(host, port)
        );
        if self.config.compress {
            cmd.push_str(" -C");
        }
        cmd.push_str(&format!(" > {}", path_arg(&self.backup_file())));
        cmd
    }
}

#[async_trait]
impl SeedMethod for Mysqldump {
    fn kind(&self) -> MethodKind {
        MethodKind::Mysqldump
    }

    fn supported_engines(&self) -> BTreeSet<Engine> {
        logical_engines()
    }

    fn backups_into_datadir(&self) -> bool {
        false
    }

    async fn is_available(&self) -> bool {
        self.base.probe("mysqldump --version").await
    }

    async fn prepare(&self, side: Side, ctx: &StageContext) -> Result<()> {
        if side == Side::Target {
            let dir = &self.base.config().backup_dir;
            self.base
                .exec(ctx, &format!("mkdir -p {}", path_arg(dir)))
                .await?;
            self.base.remove_path(ctx, &self.backup_file()).await?;
        }
        Ok(())
    }

    async fn backup(&self, request: &BackupRequest, ctx: &StageContext) -> Result<()> {
        if request.side == Side::Source {
            ctx.progress("Dump is pulled by the target");
            return Ok(());
        }
        ctx.progress(format!("Dumping {}:{}", request.host, request.port));
        self.base
            .exec(ctx, &self.backup_command(&request.host, request.port))
            .await
    }

    async fn restore(&self, ctx: &StageContext) -> Result<()> {
        let local = self.base.local_client_args();
        // GTID_PURGED in the dump can only be applied to an empty gtid_executed.
        self.base.database().execute("RESET MASTER").await?;
        ctx.progress("Loading dump");
        self.base
            .exec(
                ctx,
                &format!("cat {} | mysql {local}", path_arg(&self.backup_file())),
            )
            .await
    }

    async fn get_metadata(&self) -> Result<BackupMetadata> {
        metadata::read_mysqldump(&self.backup_file()).await
    }

    async fn cleanup(&self, side: Side, ctx: &StageContext) -> Result<()> {
        if side == Side::Target {
            self.base.remove_path(ctx, &self.backup_file()).await?;
        }
        Ok(())
    }
}

/// Engines a logical dump carries.
pub(crate) fn logical_engines() -> BTreeSet<Engine> {
    [
        Engine::RocksDb,
        Engine::MrgMyIsam,
        Engine::Csv,
        Engine::Blackhole,
        Engine::InnoDb,
        Engine::Memory,
        Engine::Archive,
        Engine::MyIsam,
        Engine::Federated,
        Engine::TokuDb,
    ]
    .into_iter()
    .collect()
}
