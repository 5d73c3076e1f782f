//! Core types for the seed agent.
//!
//! This crate provides the vocabulary shared by every other seed agent crate:
//!
//! - **Identifiers**: the numeric [`SeedId`] assigned by the control plane
//! - **Stage model**: [`StageKind`], [`Side`] and [`StageStatus`]
//! - **Methods**: [`MethodKind`], storage [`Engine`]s and [`SeedMethodDescriptor`]
//! - **Replication coordinates**: [`BackupMetadata`]
//!
//! # Example
//!
//! ```
//! use seed_agent_core::{MethodKind, SeedId, Side, StageKind};
//!
//! let seed_id: SeedId = "42".parse().unwrap();
//! let method: MethodKind = "Mysqldump".parse().unwrap();
//! let side: Side = "target".parse().unwrap();
//!
//! assert_eq!(seed_id.get(), 42);
//! assert_eq!(method, MethodKind::Mysqldump);
//! assert_eq!(side, Side::Target);
//! assert_eq!(StageKind::Prepare.to_string(), "Prepare");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod metadata;
pub mod types;

pub use error::{CoreError, Result};
pub use ids::SeedId;
pub use metadata::{BackupMetadata, SeedMethodDescriptor};
pub use types::{Engine, MethodKind, Side, StageKind, StageStatus};
