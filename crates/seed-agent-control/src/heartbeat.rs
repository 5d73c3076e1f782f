//! Registration with the control plane and the liveness loop.
//!
//! The agent registers once at startup, pings on every poll tick and
//! re-registers whenever the resubmit interval has elapsed, so a restarted
//! control plane relearns it without an agent restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{ControlError, Result};
use crate::identity::AgentIdentity;

/// Trait for control plane communication.
///
/// This trait abstracts the HTTP client, allowing the loop to run against a
/// disabled or fake control plane.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Advertise the agent's hostname, port and token.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or is answered with a non-2xx status.
    async fn submit_agent(&self, identity: &AgentIdentity) -> Result<()>;

    /// Check connectivity back to the control plane.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or is answered with a non-2xx status.
    async fn ping(&self) -> Result<()>;
}

/// HTTP client for the control plane's agents API.
#[derive(Debug, Clone)]
pub struct HttpControlPlaneClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpControlPlaneClient {
    /// Create a client for `{url}:{agents_port}`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ControlPlane` if the HTTP client cannot be built.
    pub fn new(url: &str, agents_port: u16, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| ControlError::ControlPlane(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(
            client,
            format!("{}:{agents_port}", url.trim_end_matches('/')),
        ))
    }

    /// Create a client with a custom reqwest client and full base URL.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Get the base URL of the agents API.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, url: &str) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ControlError::ControlPlane(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ControlError::ControlPlane(format!(
                "control plane returned status {status}"
            )))
        }
    }
}

#[async_trait]
impl ControlPlaneClient for HttpControlPlaneClient {
    async fn submit_agent(&self, identity: &AgentIdentity) -> Result<()> {
        let url = format!(
            "{}/api/submit-agent/{}/{}/{}",
            self.base_url,
            identity.hostname(),
            identity.port(),
            identity.token().as_str()
        );
        self.get(&url).await?;
        tracing::debug!(hostname = %identity.hostname(), "Submitted agent to control plane");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.get(&format!("{}/api/agent-ping", self.base_url)).await
    }
}

/// A no-op client for when no control plane is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopControlPlaneClient;

impl NoopControlPlaneClient {
    /// Create a new no-op client.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ControlPlaneClient for NoopControlPlaneClient {
    async fn submit_agent(&self, identity: &AgentIdentity) -> Result<()> {
        tracing::warn!(
            hostname = %identity.hostname(),
            "NoopControlPlaneClient: submit_agent called but no control plane configured"
        );
        Ok(())
    }

    /// Always fails: with nothing to answer, no contact is ever recorded.
    async fn ping(&self) -> Result<()> {
        Err(ControlError::ControlPlane("no control plane configured".into()))
    }
}

/// Heartbeat periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Period between pings.
    pub poll_interval: Duration,
    /// Minimum period between registrations.
    pub resubmit_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            resubmit_interval: Duration::from_secs(3600),
        }
    }
}

/// The registration and liveness loop.
pub struct Heartbeat {
    client: Arc<dyn ControlPlaneClient>,
    identity: Arc<AgentIdentity>,
    config: HeartbeatConfig,
    last_submit: Mutex<Option<Instant>>,
}

impl Heartbeat {
    /// Create a loop that has not registered yet.
    #[must_use]
    pub fn new(
        client: Arc<dyn ControlPlaneClient>,
        identity: Arc<AgentIdentity>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            client,
            identity,
            config,
            last_submit: Mutex::new(None),
        }
    }

    /// Register with the control plane. Failures are logged and retried on
    /// the next resubmission.
    pub async fn submit(&self) -> bool {
        *self.last_submit.lock() = Some(Instant::now());
        match self.client.submit_agent(&self.identity).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to submit agent to control plane");
                false
            }
        }
    }

    /// One poll step: ping, then re-register if the resubmit interval elapsed.
    pub async fn tick(&self) {
        match self.client.ping().await {
            Ok(()) => self.identity.record_contact(Utc::now()),
            Err(e) => tracing::warn!(error = %e, "Failed to ping control plane"),
        }

        if self.resubmit_due() {
            tracing::debug!("Resubmitting agent");
            self.submit().await;
        }
    }

    /// Register, then tick forever.
    pub async fn run(&self) {
        tracing::info!(
            poll_interval = ?self.config.poll_interval,
            resubmit_interval = ?self.config.resubmit_interval,
            "Starting heartbeat"
        );
        self.submit().await;

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    fn resubmit_due(&self) -> bool {
        self.last_submit
            .lock()
            .is_none_or(|at| at.elapsed() >= self.config.resubmit_interval)
    }
}

impl std::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("identity", &self.identity)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
