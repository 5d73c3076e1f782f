//! Replication coordinates and method descriptors.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{Engine, MethodKind};

/// Binlog coordinates a backup corresponds to.
///
/// The serialized form is the sidecar contract: field names are `LogFile`,
/// `LogPos` and `GtidExecuted`. `Default` is the zero value returned next to
/// any metadata error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupMetadata {
    /// Binary log file name, e.g. `mysql-bin.000005`.
    pub log_file: String,
    /// Position inside `log_file`.
    pub log_pos: i64,
    /// GTID-executed set; empty for positional replication.
    #[serde(default)]
    pub gtid_executed: String,
}

impl BackupMetadata {
    /// Coordinates without a GTID set.
    #[must_use]
    pub fn positional(log_file: impl Into<String>, log_pos: i64) -> Self {
        Self {
            log_file: log_file.into(),
            log_pos,
            gtid_executed: String::new(),
        }
    }

    /// Attach a GTID-executed set.
    #[must_use]
    pub fn with_gtid(mut self, gtid_executed: impl Into<String>) -> Self {
        self.gtid_executed = gtid_executed.into();
        self
    }

    /// Returns true if no binlog file was recovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log_file.is_empty()
    }

    /// Returns true if a GTID set was recovered.
    #[must_use]
    pub fn has_gtid(&self) -> bool {
        !self.gtid_executed.is_empty()
    }
}

/// Static description of a registered seed method.
///
/// Computed once at startup or on an explicit availability refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedMethodDescriptor {
    /// The method.
    pub name: MethodKind,
    /// Storage engines whose tables survive the method intact.
    pub supported_engines: BTreeSet<Engine>,
    /// Whether the backup lands directly in the live data directory.
    pub backups_into_datadir: bool,
    /// Whether the method's tooling answered the availability probe.
    pub is_available: bool,
}

impl SeedMethodDescriptor {
    /// Returns true if every engine in `engines` is carried by this method.
    #[must_use]
    pub fn supports_all<'a>(&self, engines: impl IntoIterator<Item = &'a Engine>) -> bool {
        engines
            .into_iter()
            .all(|engine| self.supported_engines.contains(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_field_names() {
        let meta = BackupMetadata::positional("mysql-bin.000009", 701);
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(
            json,
            r#"{"LogFile":"mysql-bin.000009","LogPos":701,"GtidExecuted":""}"#
        );
    }

    #[test]
    fn sidecar_without_gtid_field() {
        let meta: BackupMetadata =
            serde_json::from_str(r#"{"LogFile":"mysql-bin.000001","LogPos":4}"#).unwrap();
        assert_eq!(meta, BackupMetadata::positional("mysql-bin.000001", 4));
        assert!(!meta.has_gtid());
    }

    #[test]
    fn zero_value_is_empty() {
        assert!(BackupMetadata::default().is_empty());
        let meta = BackupMetadata::positional("f", 1).with_gtid("uuid:1-5");
        assert!(!meta.is_empty());
        assert!(meta.has_gtid());
    }

    #[test]
    fn descriptor_engine_coverage() {
        let descriptor = SeedMethodDescriptor {
            name: MethodKind::ClonePlugin,
            supported_engines: [Engine::InnoDb].into_iter().collect(),
            backups_into_datadir: true,
            is_available: true,
        };
        assert!(descriptor.supports_all(&[Engine::InnoDb]));
        assert!(!descriptor.supports_all(&[Engine::InnoDb, Engine::MyIsam]));
    }
}
