//! Physical backup streamed with `xtrabackup` and `xbstream`.
//!
//! The target listens on the seed port and unpacks straight into its data
//! directory; the source streams a hot backup to it.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use seed_agent_core::{BackupMetadata, Engine, MethodKind, Side};

use crate::config::XtrabackupConfig;
use crate::context::{path_arg, MethodBase, StageContext};
use crate::error::Result;
use crate::metadata;
use crate::method::{BackupRequest, SeedMethod};

/// Scratch directory used by the sending side.
pub const SCRATCH_SUBDIR: &str = "xtrabackup";

/// The `xtrabackup` seed method.
#[derive(Debug)]
pub struct Xtrabackup {
    base: MethodBase,
    config: XtrabackupConfig,
    major_version: Mutex<Option<u32>>,
}

impl Xtrabackup {
    /// Create the method. The tool version is probed on first availability check.
    #[must_use]
    pub fn new(base: MethodBase, config: XtrabackupConfig) -> Self {
        Self {
            base,
            config,
            major_version: Mutex::new(None),
        }
    }

    /// Major version of the installed tool, once probed.
    #[must_use]
    pub fn major_version(&self) -> Option<u32> {
        *self.major_version.lock()
    }

    fn scratch_dir(&self) -> PathBuf {
        self.base.config().backup_dir.join(SCRATCH_SUBDIR)
    }

    fn datadir(&self) -> &std::path::Path {
        &self.base.config().mysql.datadir
    }

    fn sender_command(&self, peer: &str) -> String {
        let mut cmd = format!(
            "xtrabackup --backup --stream=xbstream {} --parallel={} --target-dir={}",
            self.base.local_client_args(),
            self.config.parallel_threads,
            path_arg(&self.scratch_dir()),
        );
        if self.config.compress {
            cmd.push_str(" --compress");
        }
        format!("{cmd} | {}", self.base.stream_sender(peer))
    }

    fn receiver_command(&self) -> String {
        format!(
            "{} | xbstream -x --parallel={} -C {}",
            self.base.stream_receiver(),
            self.config.parallel_threads,
            path_arg(self.datadir()),
        )
    }
}

#[async_trait]
impl SeedMethod for Xtrabackup {
    fn kind(&self) -> MethodKind {
        MethodKind::Xtrabackup
    }

    fn supported_engines(&self) -> BTreeSet<Engine> {
        let mut engines: BTreeSet<Engine> = [
            Engine::InnoDb,
            Engine::MyIsam,
            Engine::MrgMyIsam,
            Engine::Csv,
            Engine::Archive,
            Engine::Memory,
            Engine::Blackhole,
        ]
        .into_iter()
        .collect();
        if self.major_version().is_some_and(|major| major >= 8) {
            engines.insert(Engine::RocksDb);
        }
        engines
    }

    fn backups_into_datadir(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        if self.major_version().is_some() {
            return true;
        }
        let Some(output) = self.base.probe_output("xtrabackup --version").await else {
            return false;
        };
        // The banner goes to stderr.
        match parse_major_version(&output.combined_text()) {
            Some(major) => {
                tracing::info!(major, "Detected xtrabackup");
                *self.major_version.lock() = Some(major);
                true
            }
            None => false,
        }
    }

    async fn prepare(&self, side: Side, ctx: &StageContext) -> Result<()> {
        match side {
            Side::Source => {
                self.base.remove_path(ctx, &self.scratch_dir()).await?;
                self.base
                    .exec(ctx, &format!("mkdir -p {}", path_arg(&self.scratch_dir())))
                    .await
            }
            Side::Target => {
                self.base.stop_service(ctx).await?;
                self.base.clear_datadir(ctx).await
            }
        }
    }

    async fn backup(&self, request: &BackupRequest, ctx: &StageContext) -> Result<()> {
        match request.side {
            Side::Source => {
                ctx.progress(format!("Streaming backup to {}", request.host));
                self.base.exec(ctx, &self.sender_command(&request.host)).await
            }
            Side::Target => {
                ctx.progress(format!(
                    "Receiving backup on port {}",
                    self.base.config().seed_port
                ));
                self.base.exec(ctx, &self.receiver_command()).await
            }
        }
    }

    async fn restore(&self, ctx: &StageContext) -> Result<()> {
        let datadir = path_arg(self.datadir());
        if self.config.compress {
            ctx.progress("Decompressing backup");
            self.base
                .exec(
                    ctx,
                    &format!(
                        "xtrabackup --decompress --remove-original --parallel={} --target-dir={datadir}",
                        self.config.parallel_threads
                    ),
                )
                .await?;
        }
        ctx.progress("Applying redo log");
        self.base
            .exec(ctx, &format!("xtrabackup --prepare --target-dir={datadir}"))
            .await?;
        self.base.chown_datadir(ctx).await?;
        self.base.start_service(ctx).await
    }

    async fn get_metadata(&self) -> Result<BackupMetadata> {
        metadata::read_xtrabackup(self.datadir()).await
    }

    async fn cleanup(&self, side: Side, ctx: &StageContext) -> Result<()> {
        if side == Side::Source {
            self.base.remove_path(ctx, &self.scratch_dir()).await?;
        }
        Ok(())
    }
}

/// `xtrabackup version 8.0.14 based on ...` -> 8
fn parse_major_version(banner: &str) -> Option<u32> {
    let idx = banner.find("version ")?;
    banner[idx + "version ".len()..]
        .split('.')
        .next()
        .and_then(|major| major.trim().parse().ok())
}
