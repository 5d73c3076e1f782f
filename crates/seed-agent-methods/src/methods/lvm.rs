//! Filesystem snapshot of the data volume, streamed with `tar`.
//!
//! Source side: take a global read lock, record the binlog coordinates in a
//! sidecar, snapshot the volume, unlock, mount the snapshot and stream it
//! together with the sidecar. Target side: receive into the data directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use seed_agent_core::{BackupMetadata, Engine, MethodKind, Side};
use seed_agent_exec::quote;

use crate::config::LvmConfig;
use crate::context::{path_arg, MethodBase, StageContext};
use crate::error::{MethodError, Result};
use crate::metadata::{self, LVM_SIDECAR};
use crate::method::{BackupRequest, SeedMethod};

/// The LVM snapshot seed method.
#[derive(Debug, Clone)]
pub struct Lvm {
    base: MethodBase,
    config: LvmConfig,
}

impl Lvm {
    /// Create the method.
    #[must_use]
    pub const fn new(base: MethodBase, config: LvmConfig) -> Self {
        Self { base, config }
    }

    /// Device path of the snapshot volume, next to the origin volume.
    fn snapshot_device(&self) -> PathBuf {
        Path::new(&self.config.logical_volume)
            .parent()
            .unwrap_or_else(|| Path::new("/dev"))
            .join(&self.config.snapshot_name)
    }

    fn create_command(&self) -> String {
        if self.config.create_snapshot_command.is_empty() {
            format!(
                "lvcreate --snapshot --size {} --name {} {}",
                quote(&self.config.snapshot_size),
                quote(&self.config.snapshot_name),
                quote(&self.config.logical_volume),
            )
        } else {
            self.config.create_snapshot_command.clone()
        }
    }

    fn mount_command(&self) -> String {
        let options = if self.config.mount_options.is_empty() {
            String::new()
        } else {
            format!("-o {} ", quote(&self.config.mount_options))
        };
        format!(
            "mount {options}{} {}",
            path_arg(&self.snapshot_device()),
            path_arg(&self.config.snapshot_mount_point),
        )
    }

    fn sender_command(&self, peer: &str) -> String {
        format!(
            "tar cf - -C {} . -C {} {LVM_SIDECAR} | {}",
            path_arg(&self.config.snapshot_mount_point),
            path_arg(&self.base.config().backup_dir),
            self.base.stream_sender(peer),
        )
    }

    fn receiver_command(&self) -> String {
        format!(
            "{} | tar xf - -C {}",
            self.base.stream_receiver(),
            path_arg(&self.base.config().mysql.datadir),
        )
    }

    async fn snapshot(&self, ctx: &StageContext) -> Result<()> {
        let lock = self.base.database().lock_for_snapshot().await?;
        let coordinates = lock.coordinates().clone();

        let recorded = metadata::write_sidecar(&self.base.config().backup_dir, &coordinates).await;
        let created = match recorded {
            Ok(_) => {
                ctx.progress(format!("Creating snapshot {}", self.config.snapshot_name));
                self.base.exec(ctx, &self.create_command()).await
            }
            Err(e) => Err(e),
        };
        let released = lock.release().await;

        created?;
        released?;
        tracing::info!(
            log_file = %coordinates.log_file,
            log_pos = coordinates.log_pos,
            "Snapshot taken"
        );
        Ok(())
    }

    async fn is_mounted(&self) -> bool {
        self.base
            .capture(&format!(
                "mountpoint -q {}",
                path_arg(&self.config.snapshot_mount_point)
            ))
            .await
            .is_ok()
    }

    async fn snapshot_exists(&self) -> bool {
        self.base
            .capture(&format!("lvs {}", path_arg(&self.snapshot_device())))
            .await
            .is_ok()
    }
}

#[async_trait]
impl SeedMethod for Lvm {
    fn kind(&self) -> MethodKind {
        MethodKind::Lvm
    }

    fn supported_engines(&self) -> BTreeSet<Engine> {
        [Engine::InnoDb, Engine::MyIsam, Engine::RocksDb, Engine::TokuDb]
            .into_iter()
            .collect()
    }

    fn backups_into_datadir(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        if self.config.logical_volume.is_empty() {
            return false;
        }
        self.base
            .probe(&format!(
                "lvs --noheading -o lv_name,vg_name,lv_path,snap_percent,time --sort -time {}",
                quote(&self.config.snapshot_volumes_filter)
            ))
            .await
    }

    async fn prepare(&self, side: Side, ctx: &StageContext) -> Result<()> {
        if self.config.logical_volume.is_empty() {
            return Err(MethodError::Config("lvm.logical-volume is not set".into()));
        }
        match side {
            Side::Source => {
                self.base
                    .exec(
                        ctx,
                        &format!("mkdir -p {}", path_arg(&self.config.snapshot_mount_point)),
                    )
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
                self.snapshot(ctx).await?;
                ctx.progress("Mounting snapshot");
                self.base.exec(ctx, &self.mount_command()).await?;
                ctx.progress(format!("Streaming snapshot to {}", request.host));
                self.base.exec(ctx, &self.sender_command(&request.host)).await
            }
            Side::Target => {
                ctx.progress(format!(
                    "Receiving snapshot on port {}",
                    self.base.config().seed_port
                ));
                self.base.exec(ctx, &self.receiver_command()).await
            }
        }
    }

    async fn restore(&self, ctx: &StageContext) -> Result<()> {
        let datadir = &self.base.config().mysql.datadir;
        // The copied server UUID must not be reused.
        self.base
            .exec(ctx, &format!("rm -f {}", path_arg(&datadir.join("auto.cnf"))))
            .await?;
        self.base.chown_datadir(ctx).await?;
        self.base.start_service(ctx).await
    }

    async fn get_metadata(&self) -> Result<BackupMetadata> {
        metadata::read_sidecar(&self.base.config().mysql.datadir).await
    }

    async fn cleanup(&self, side: Side, ctx: &StageContext) -> Result<()> {
        if side == Side::Target {
            return Ok(());
        }
        if self.is_mounted().await {
            ctx.progress("Unmounting snapshot");
            self.base
                .exec(
                    ctx,
                    &format!("umount {}", path_arg(&self.config.snapshot_mount_point)),
                )
                .await?;
        }
        if self.snapshot_exists().await {
            ctx.progress("Removing snapshot");
            self.base
                .exec(
                    ctx,
                    &format!("lvremove --force {}", path_arg(&self.snapshot_device())),
                )
                .await?;
        }
        self.base
            .remove_path(ctx, &self.base.config().backup_dir.join(LVM_SIDECAR))
            .await
    }
}
