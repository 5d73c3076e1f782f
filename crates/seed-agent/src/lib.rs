//! HTTP adapter and startup wiring for the seed agent.
//!
//! The agent runs on every database host. The control plane drives a seed
//! operation by calling the agents on the Source and Target hosts stage by
//! stage, polling each stage until it settles.
//!
//! This crate handles:
//!
//! - Loading the TOML configuration
//! - Token checks on every stage endpoint
//! - Translating HTTP requests into [`SeedControl`](seed_agent_control::SeedControl) calls
//! - The unauthenticated status endpoint
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Control plane                          │
//! └─────────────────────────────────────────────────────────────┘
//!            │ GET /api/<stage>/...            ▲ submit / ping
//!            ▼                                 │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        seed-agent                           │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │   Token     │ │   Router    │ │     Heartbeat       │    │
//! │  │  Extractor  │ │  + Handlers │ │     loop            │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                    ┌──────────────────┐
//!                    │ SeedCoordinator  │──► seed methods ──► processes
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use seed_agent::{create_router, AgentConfig, AgentState};
//! use seed_agent_control::{AgentIdentity, AgentToken, SeedCoordinator};
//! use seed_agent_methods::SeedMethodRegistry;
//!
//! # async fn example(registry: SeedMethodRegistry) -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentConfig::load("/etc/seed-agent.toml")?;
//! let control = Arc::new(SeedCoordinator::new(Arc::new(registry), "db-1"));
//! let identity = Arc::new(AgentIdentity::new("db-1", 3002, AgentToken::generate()));
//!
//! let app = create_router(AgentState::new(control, identity, config.api_config()));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3002").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::{AgentConfig, ApiConfig, ConfigError};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AgentState;

pub use auth::AgentAuth;
pub use events::log_stage_events;
