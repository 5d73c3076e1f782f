//! Seed stage state machine and control plane heartbeat.
//!
//! This crate owns the agent's single seed operation and the loop that keeps
//! the agent registered with the control plane.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    HTTP adapter (axum)                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SeedCoordinator                        │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Operation  │ │   Stage     │ │    Lifecycle        │    │
//! │  │  + records  │ │  dispatch   │ │    transitions      │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!     ┌──────────────────┐          ┌──────────────────┐
//!     │  Seed methods    │          │  Stage observers │
//!     │  (registry)      │          │  (broadcast)     │
//!     └──────────────────┘          └──────────────────┘
//!
//! ┌──────────────┐   submit / ping   ┌──────────────────────────┐
//! │  Heartbeat   │──────────────────▶│  Control plane agents API│
//! └──────────────┘                   └──────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use seed_agent_control::{SeedControl, SeedCoordinator};
//! use seed_agent_core::{SeedId, Side};
//! use seed_agent_methods::SeedMethodRegistry;
//!
//! # async fn example(registry: SeedMethodRegistry) -> Result<(), Box<dyn std::error::Error>> {
//! registry.refresh_availability().await;
//! let coordinator = SeedCoordinator::new(Arc::new(registry), "db-2");
//!
//! let outcome = coordinator.prepare(SeedId::new(42), "mysqldump", Side::Target)?;
//! println!("{}", outcome.message());
//! # Ok(())
//! # }
//! ```
//!
//! # Stage rules
//!
//! - A Prepare with a new ID replaces an operation that has nothing in flight
//! - Any other stage must name the current ID and the method it was prepared with
//! - A stage already running or completed is reported as already started
//! - Only one stage runs at a time; a failed stage never blocks the next one

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod lifecycle;
pub mod machine;
pub mod types;

pub use error::{ControlError, Result};
pub use heartbeat::{
    ControlPlaneClient, Heartbeat, HeartbeatConfig, HttpControlPlaneClient,
    NoopControlPlaneClient,
};
pub use identity::{AgentIdentity, AgentToken, Health};
pub use lifecycle::Phase;
pub use machine::{SeedControl, SeedCoordinator};
pub use types::{SeedOperation, StageOutcome, StageRecord, StageRequest};
