//! Parallel logical dump with `mydumper` / `myloader`.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use seed_agent_core::{BackupMetadata, Engine, MethodKind, Side};

use crate::config::MydumperConfig;
use crate::context::{path_arg, MethodBase, StageContext};
use crate::error::Result;
use crate::metadata;
use crate::method::{BackupRequest, SeedMethod};
use crate::methods::mysqldump::logical_engines;

/// Directory of the dump inside the backup directory.
pub const BACKUP_SUBDIR: &str = "mydumper";

/// The `mydumper` seed method.
#[derive(Debug, Clone)]
pub struct Mydumper {
    base: MethodBase,
    config: MydumperConfig,
}

impl Mydumper {
    /// Create the method.
    #[must_use]
    pub const fn new(base: MethodBase, config: MydumperConfig) -> Self {
        Self { base, config }
    }

    fn dump_dir(&self) -> PathBuf {
        self.base.config().backup_dir.join(BACKUP_SUBDIR)
    }

    fn backup_command(&self, host: &str, port: u16) -> String {
        let mut cmd = format!(
            "mydumper {} --threads={} --outputdir={} --triggers --events --routines",
            self.base.client_args(host, port),
            self.config.parallel_threads,
            path_arg(&self.dump_dir()),
        );
        if self.config.compress {
            cmd.push_str(" --compress");
        }
        if self.config.rows_chunk_size != 0 {
            cmd.push_str(&format!(" --rows={}", self.config.rows_chunk_size));
        }
        cmd
    }

    fn restore_command(&self) -> String {
        format!(
            "myloader {} --overwrite-tables --threads={} --directory={}",
            self.base.local_client_args(),
            self.config.parallel_threads,
            path_arg(&self.dump_dir()),
        )
    }
}

#[async_trait]
impl SeedMethod for Mydumper {
    fn kind(&self) -> MethodKind {
        MethodKind::Mydumper
    }

    fn supported_engines(&self) -> BTreeSet<Engine> {
        logical_engines()
    }

    fn backups_into_datadir(&self) -> bool {
        false
    }

    async fn is_available(&self) -> bool {
        self.base.probe("mydumper --version").await && self.base.probe("myloader --version").await
    }

    async fn prepare(&self, side: Side, ctx: &StageContext) -> Result<()> {
        if side == Side::Target {
            self.base.remove_path(ctx, &self.dump_dir()).await?;
            self.base
                .exec(ctx, &format!("mkdir -p {}", path_arg(&self.dump_dir())))
                .await?;
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
        // myloader does not set sql_mode itself; zero must stay a value, not a sequence.
        let db = self.base.database();
        let sql_mode = db.sql_mode().await?;
        db.execute("SET GLOBAL sql_mode = 'NO_AUTO_VALUE_ON_ZERO'")
            .await?;

        ctx.progress("Loading dump");
        let loaded = self.base.exec(ctx, &self.restore_command()).await;

        let restored = db
            .execute(&format!("SET GLOBAL sql_mode = '{}'", sql_mode.replace('\'', "")))
            .await;
        loaded?;
        restored
    }

    async fn get_metadata(&self) -> Result<BackupMetadata> {
        metadata::read_mydumper(&self.dump_dir()).await
    }

    async fn cleanup(&self, side: Side, ctx: &StageContext) -> Result<()> {
        if side == Side::Target {
            self.base.remove_path(ctx, &self.dump_dir()).await?;
        }
        Ok(())
    }
}
