//! Seed method strategies for the seed agent.
//!
//! A seed method knows how to move a database from a Source host to a
//! Target host with one particular tool. Every method implements the same
//! stage contract ([`SeedMethod`]) and is looked up at runtime through the
//! [`SeedMethodRegistry`].
//!
//! # Architecture
//!
//! ```text
//!   SeedMethodRegistry ── resolve("xtrabackup") ──► Arc<dyn SeedMethod>
//!          │                                              │
//!          │ refresh_availability()                       │ prepare / backup /
//!          ▼                                              │ restore / cleanup
//!   SeedMethodDescriptor                                  ▼
//!                                              ┌─────────────────────┐
//!                                              │     MethodBase      │
//!                                              │  runner  │ database │
//!                                              └────┬─────┴────┬─────┘
//!                                                   ▼          ▼
//!                                          CommandRunner   Database (sqlx)
//! ```
//!
//! | Method       | Runs Backup on   | Into datadir | Coordinates from             |
//! |--------------|------------------|--------------|------------------------------|
//! | mysqldump    | Target (pull)    | no           | dump header                  |
//! | mydumper     | Target (pull)    | no           | `metadata`                   |
//! | xtrabackup   | both (stream)    | yes          | `xtrabackup_binlog_info`     |
//! | LVM          | both (stream)    | yes          | `binlog_info.json` sidecar   |
//! | clone plugin | Target (pull)    | yes          | `performance_schema`         |
//!
//! Stage commands go through [`MethodBase::exec`], which hands the live
//! [`ProcessHandle`](seed_agent_exec::ProcessHandle) to the stage's
//! [`StageObserver`] so the state machine can abort it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod metadata;
pub mod method;
pub mod methods;
pub mod registry;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use config::{
    BaseConfig, ClonePluginConfig, LvmConfig, MethodsConfig, MydumperConfig, MysqlConfig,
    MysqldumpConfig, XtrabackupConfig,
};
pub use context::{MethodBase, StageContext, StageObserver};
pub use database::{Database, MySqlDatabase, SnapshotLock};
pub use error::{MethodError, Result};
pub use method::{BackupRequest, SeedMethod};
pub use registry::SeedMethodRegistry;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockDatabase, Script, ScriptedMethod};
