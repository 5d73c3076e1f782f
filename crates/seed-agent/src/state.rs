//! Agent application state.
//!
//! This module defines the shared state that is available to all request handlers.

use std::sync::Arc;

use seed_agent_control::{AgentIdentity, SeedControl};

use crate::config::ApiConfig;

/// Shared application state for the agent's HTTP API.
pub struct AgentState<C>
where
    C: SeedControl,
{
    /// The seed state machine.
    pub control: Arc<C>,
    /// Identity advertised to the control plane, holding the token and last contact.
    pub identity: Arc<AgentIdentity>,
    /// HTTP adapter configuration.
    pub config: ApiConfig,
}

impl<C> AgentState<C>
where
    C: SeedControl,
{
    /// Create a new agent state.
    #[must_use]
    pub fn new(control: Arc<C>, identity: Arc<AgentIdentity>, config: ApiConfig) -> Self {
        Self {
            control,
            identity,
            config,
        }
    }
}

impl<C> Clone for AgentState<C>
where
    C: SeedControl,
{
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
            identity: Arc::clone(&self.identity),
            config: self.config.clone(),
        }
    }
}
