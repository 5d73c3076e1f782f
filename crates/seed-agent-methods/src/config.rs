//! Seed method configuration.
//!
//! Each method has its own table in the agent's TOML file (`[mysqldump]`,
//! `[mydumper]`, `[xtrabackup]`, `[lvm]`, `[clone-plugin]`). Shared settings
//! are collected into [`BaseConfig`] by the agent at startup.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Settings shared by every seed method.
#[derive(Debug, Clone)]
pub struct BaseConfig {
    /// Run external tools under `sudo -n`.
    pub exec_with_sudo: bool,
    /// Directory backup artifacts are written to.
    pub backup_dir: PathBuf,
    /// TCP port streaming methods listen on / connect to.
    pub seed_port: u16,
    /// Move the old data directory aside instead of deleting its contents.
    pub backup_old_datadir: bool,
    /// Upper bound on availability probes.
    pub probe_timeout: Duration,
    /// Local database settings.
    pub mysql: MysqlConfig,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            exec_with_sudo: false,
            backup_dir: PathBuf::from("/var/lib/seed-agent/backup"),
            seed_port: 21234,
            backup_old_datadir: false,
            probe_timeout: Duration::from_secs(5),
            mysql: MysqlConfig::default(),
        }
    }
}

/// The `[mysql]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MysqlConfig {
    /// Host of the local server.
    #[serde(default = "MysqlConfig::default_host")]
    pub host: String,

    /// Port of the local server, also used when pulling from a source.
    #[serde(default = "MysqlConfig::default_port")]
    pub port: u16,

    /// The server's data directory.
    #[serde(default = "MysqlConfig::default_datadir")]
    pub datadir: PathBuf,

    /// OS user owning the data directory.
    #[serde(default = "MysqlConfig::default_os_user")]
    pub os_user: String,

    /// Account used for seeding, on both source and target.
    #[serde(default)]
    pub seed_user: String,

    /// Password of `seed_user`.
    #[serde(default)]
    pub seed_password: String,

    /// Account the target replicates with after the seed.
    #[serde(default)]
    pub replication_user: String,

    /// Password of `replication_user`.
    #[serde(default)]
    pub replication_password: String,

    /// Command that starts the server.
    #[serde(default = "MysqlConfig::default_start_command")]
    pub service_start_command: String,

    /// Command that stops the server.
    #[serde(default = "MysqlConfig::default_stop_command")]
    pub service_stop_command: String,
}

impl MysqlConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    const fn default_port() -> u16 {
        3306
    }

    fn default_datadir() -> PathBuf {
        PathBuf::from("/var/lib/mysql")
    }

    fn default_os_user() -> String {
        "mysql".to_string()
    }

    fn default_start_command() -> String {
        "systemctl start mysql".to_string()
    }

    fn default_stop_command() -> String {
        "systemctl stop mysql".to_string()
    }
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            datadir: Self::default_datadir(),
            os_user: Self::default_os_user(),
            seed_user: String::new(),
            seed_password: String::new(),
            replication_user: String::new(),
            replication_password: String::new(),
            service_start_command: Self::default_start_command(),
            service_stop_command: Self::default_stop_command(),
        }
    }
}

/// The `[mysqldump]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MysqldumpConfig {
    /// Register the method.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Compress the client/server protocol (`-C`).
    #[serde(default = "default_true")]
    pub compress: bool,
}

impl Default for MysqldumpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compress: true,
        }
    }
}

/// The `[mydumper]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MydumperConfig {
    /// Register the method.
    #[serde(default)]
    pub enabled: bool,
    /// `--threads` for both mydumper and myloader.
    #[serde(default = "default_threads")]
    pub parallel_threads: u32,
    /// `--rows`; zero disables chunking.
    #[serde(default)]
    pub rows_chunk_size: u64,
    /// Compress dump files.
    #[serde(default)]
    pub compress: bool,
}

impl Default for MydumperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            parallel_threads: default_threads(),
            rows_chunk_size: 0,
            compress: false,
        }
    }
}

/// The `[xtrabackup]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct XtrabackupConfig {
    /// Register the method.
    #[serde(default)]
    pub enabled: bool,
    /// `--parallel` for backup and copy phases.
    #[serde(default = "default_threads")]
    pub parallel_threads: u32,
    /// Compress the stream (`--compress`), decompressed on restore.
    #[serde(default)]
    pub compress: bool,
}

impl Default for XtrabackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            parallel_threads: default_threads(),
            compress: false,
        }
    }
}

/// The `[lvm]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LvmConfig {
    /// Register the method.
    #[serde(default)]
    pub enabled: bool,

    /// Logical volume holding the data directory, e.g. `/dev/vg0/mysql`.
    #[serde(default)]
    pub logical_volume: String,

    /// Volume group / filter passed to `lvs` by the availability probe.
    #[serde(default)]
    pub snapshot_volumes_filter: String,

    /// Snapshot size passed to `lvcreate --size`.
    #[serde(default = "LvmConfig::default_snapshot_size")]
    pub snapshot_size: String,

    /// Name of the snapshot volume.
    #[serde(default = "LvmConfig::default_snapshot_name")]
    pub snapshot_name: String,

    /// Where the snapshot is mounted while it is streamed.
    #[serde(default = "LvmConfig::default_mount_point")]
    pub snapshot_mount_point: PathBuf,

    /// Extra `mount -o` options, e.g. `nouuid` for XFS.
    #[serde(default)]
    pub mount_options: String,

    /// Replaces the built-in `lvcreate` invocation when set.
    #[serde(default)]
    pub create_snapshot_command: String,
}

impl LvmConfig {
    fn default_snapshot_size() -> String {
        "10G".to_string()
    }

    fn default_snapshot_name() -> String {
        "seed_snapshot".to_string()
    }

    fn default_mount_point() -> PathBuf {
        PathBuf::from("/mnt/seed-snapshot")
    }
}

impl Default for LvmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            logical_volume: String::new(),
            snapshot_volumes_filter: String::new(),
            snapshot_size: Self::default_snapshot_size(),
            snapshot_name: Self::default_snapshot_name(),
            snapshot_mount_point: Self::default_mount_point(),
            mount_options: String::new(),
            create_snapshot_command: String::new(),
        }
    }
}

/// The `[clone-plugin]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClonePluginConfig {
    /// Register the method.
    #[serde(default)]
    pub enabled: bool,
}

/// Every method table, as they appear at the top level of the agent config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MethodsConfig {
    /// `[mysqldump]`
    #[serde(default)]
    pub mysqldump: MysqldumpConfig,
    /// `[mydumper]`
    #[serde(default)]
    pub mydumper: MydumperConfig,
    /// `[xtrabackup]`
    #[serde(default)]
    pub xtrabackup: XtrabackupConfig,
    /// `[lvm]`
    #[serde(default)]
    pub lvm: LvmConfig,
    /// `[clone-plugin]`
    #[serde(default)]
    pub clone_plugin: ClonePluginConfig,
}

const fn default_true() -> bool {
    true
}

const fn default_threads() -> u32 {
    1
}
