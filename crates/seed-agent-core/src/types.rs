//! Stage, side, status, method and engine enumerations.
//!
//! All of these arrive as path parameters from the control plane, so each
//! implements `FromStr` with case-insensitive matching and `Display` with the
//! canonical spelling used in responses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// =============================================================================
// Stage
// =============================================================================

/// One phase of a seed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageKind {
    /// Pre-flight work on either side.
    Prepare,
    /// Produce or stream the backup.
    Backup,
    /// Apply the backup to the local instance.
    Restore,
    /// Release temp files, mounts and snapshots.
    Cleanup,
    /// Extract binlog coordinates from the artifact.
    MetadataFetch,
}

impl StageKind {
    /// Every stage, in forward order.
    pub const ALL: [Self; 5] = [
        Self::Prepare,
        Self::Backup,
        Self::Restore,
        Self::Cleanup,
        Self::MetadataFetch,
    ];

    /// Canonical name of the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "Prepare",
            Self::Backup => "Backup",
            Self::Restore => "Restore",
            Self::Cleanup => "Cleanup",
            Self::MetadataFetch => "MetadataFetch",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "prepare" => Ok(Self::Prepare),
            "backup" => Ok(Self::Backup),
            "restore" => Ok(Self::Restore),
            "cleanup" => Ok(Self::Cleanup),
            "metadatafetch" | "metadata" | "getmetadata" => Ok(Self::MetadataFetch),
            _ => Err(CoreError::UnknownStage(s.to_string())),
        }
    }
}

// =============================================================================
// Side
// =============================================================================

/// Which end of the seed this agent is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The host providing data.
    Source,
    /// The host receiving data.
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("Source"),
            Self::Target => f.write_str("Target"),
        }
    }
}

impl FromStr for Side {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "source" => Ok(Self::Source),
            "target" => Ok(Self::Target),
            _ => Err(CoreError::UnknownSide(s.to_string())),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of a stage, and of the operation as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageStatus {
    /// Work is in flight.
    Running,
    /// Work finished successfully.
    Completed,
    /// Work failed; details carry the error text.
    Error,
    /// Work was aborted by an operator.
    Cancelled,
}

impl StageStatus {
    /// Returns true once no further progress will be reported.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns true if a repeated request for the stage must not re-run it.
    #[must_use]
    pub const fn blocks_restart(self) -> bool {
        matches!(self, Self::Running | Self::Completed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Error => "Error",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Method
// =============================================================================

/// The backup engines a seed can be performed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    /// Logical dump with `mysqldump`.
    Mysqldump,
    /// Parallel logical dump with `mydumper`/`myloader`.
    Mydumper,
    /// Physical hot backup with Percona `xtrabackup`.
    Xtrabackup,
    /// Filesystem snapshot of the data directory volume.
    Lvm,
    /// The MySQL 8 clone plugin.
    ClonePlugin,
}

impl MethodKind {
    /// Every method, in registration order.
    pub const ALL: [Self; 5] = [
        Self::Mysqldump,
        Self::Mydumper,
        Self::Xtrabackup,
        Self::Lvm,
        Self::ClonePlugin,
    ];

    /// Canonical name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mysqldump => "mysqldump",
            Self::Mydumper => "mydumper",
            Self::Xtrabackup => "xtrabackup",
            Self::Lvm => "lvm",
            Self::ClonePlugin => "clone_plugin",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "mysqldump" => Ok(Self::Mysqldump),
            "mydumper" => Ok(Self::Mydumper),
            "xtrabackup" => Ok(Self::Xtrabackup),
            "lvm" => Ok(Self::Lvm),
            "cloneplugin" | "clone" => Ok(Self::ClonePlugin),
            _ => Err(CoreError::UnknownMethod(s.to_string())),
        }
    }
}

// =============================================================================
// Storage engines
// =============================================================================

/// A MySQL storage engine a seed method can carry over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Engine {
    /// `InnoDB`.
    #[serde(rename = "InnoDB")]
    InnoDb,
    /// `MyISAM`.
    #[serde(rename = "MyISAM")]
    MyIsam,
    /// `MRG_MYISAM`.
    #[serde(rename = "MRG_MYISAM")]
    MrgMyIsam,
    /// `CSV`.
    #[serde(rename = "CSV")]
    Csv,
    /// `BLACKHOLE`.
    #[serde(rename = "BLACKHOLE")]
    Blackhole,
    /// `MEMORY`.
    #[serde(rename = "MEMORY")]
    Memory,
    /// `ARCHIVE`.
    #[serde(rename = "ARCHIVE")]
    Archive,
    /// `FEDERATED`.
    #[serde(rename = "FEDERATED")]
    Federated,
    /// `ROCKSDB` (`MyRocks`).
    #[serde(rename = "ROCKSDB")]
    RocksDb,
    /// `TokuDB`.
    #[serde(rename = "TokuDB")]
    TokuDb,
}

impl Engine {
    /// Name as reported by `SHOW ENGINES`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InnoDb => "InnoDB",
            Self::MyIsam => "MyISAM",
            Self::MrgMyIsam => "MRG_MYISAM",
            Self::Csv => "CSV",
            Self::Blackhole => "BLACKHOLE",
            Self::Memory => "MEMORY",
            Self::Archive => "ARCHIVE",
            Self::Federated => "FEDERATED",
            Self::RocksDb => "ROCKSDB",
            Self::TokuDb => "TokuDB",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INNODB" => Ok(Self::InnoDb),
            "MYISAM" => Ok(Self::MyIsam),
            "MRG_MYISAM" => Ok(Self::MrgMyIsam),
            "CSV" => Ok(Self::Csv),
            "BLACKHOLE" => Ok(Self::Blackhole),
            "MEMORY" => Ok(Self::Memory),
            "ARCHIVE" => Ok(Self::Archive),
            "FEDERATED" => Ok(Self::Federated),
            "ROCKSDB" => Ok(Self::RocksDb),
            "TOKUDB" => Ok(Self::TokuDb),
            _ => Err(CoreError::UnknownEngine(s.to_string())),
        }
    }
}

/// Lowercase and drop separators so `clone_plugin`, `ClonePlugin` and
/// `clone-plugin` compare equal.
fn normalize(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
