//! Agent configuration.
//!
//! The agent reads one TOML file. Shared settings live in `[common]`, the
//! control plane in `[control-plane]`, the local database in `[mysql]`, and
//! each seed method in its own table.
//!
//! ```toml
//! [common]
//! port = 3002
//! backup-dir = "/var/lib/seed-agent/backup"
//!
//! [control-plane]
//! url = "http://orchestrator.internal"
//!
//! [mysql]
//! seed-user = "seed"
//! seed-password = "..."
//!
//! [xtrabackup]
//! enabled = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use seed_agent_control::HeartbeatConfig;
use seed_agent_methods::{BaseConfig, MethodsConfig, MysqlConfig};
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The config path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or inconsistent with another.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AgentConfig {
    /// `[common]`
    #[serde(default)]
    pub common: CommonConfig,

    /// `[control-plane]`
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// `[logging]`
    #[serde(default)]
    pub logging: LoggingConfig,

    /// `[mysql]`
    #[serde(default)]
    pub mysql: MysqlConfig,

    /// One table per seed method.
    #[serde(flatten)]
    pub methods: MethodsConfig,
}

impl AgentConfig {
    /// Read, parse and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the text is not valid TOML or fails validation.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let common = &self.common;
        if common.port == 0 {
            return Err(ConfigError::Invalid("common.port must not be 0".into()));
        }
        if common.seed_port == 0 {
            return Err(ConfigError::Invalid("common.seed-port must not be 0".into()));
        }
        for (key, value) in [
            ("common.poll-interval", common.poll_interval),
            ("common.resubmit-interval", common.resubmit_interval),
            ("common.http-timeout", common.http_timeout),
            ("common.status-bad-seconds", common.status_bad_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be positive")));
            }
        }
        if !common.status_endpoint.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "common.status-endpoint must start with '/': {}",
                common.status_endpoint
            )));
        }

        let writes_backups = self.methods.mysqldump.enabled
            || self.methods.mydumper.enabled
            || self.methods.xtrabackup.enabled;
        if writes_backups && common.backup_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "common.backup-dir is required when a dump method is enabled".into(),
            ));
        }
        if self.methods.lvm.enabled && self.methods.lvm.logical_volume.is_empty() {
            return Err(ConfigError::Invalid(
                "lvm.logical-volume is required when lvm is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Settings handed to every seed method.
    #[must_use]
    pub fn base_config(&self) -> BaseConfig {
        BaseConfig {
            exec_with_sudo: self.common.exec_with_sudo,
            backup_dir: self.common.backup_dir.clone(),
            seed_port: self.common.seed_port,
            backup_old_datadir: self.common.backup_old_datadir,
            probe_timeout: self.common.probe_timeout(),
            mysql: self.mysql.clone(),
        }
    }

    /// Heartbeat periods.
    #[must_use]
    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            poll_interval: self.common.poll_interval(),
            resubmit_interval: self.common.resubmit_interval(),
        }
    }

    /// Settings read by the HTTP adapter.
    #[must_use]
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            token_http_header: self.common.token_http_header.clone(),
            status_endpoint: self.common.status_endpoint.clone(),
            status_bad_seconds: self.common.status_bad_seconds,
        }
    }
}

/// The `[common]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommonConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "CommonConfig::default_bind_address")]
    pub bind_address: String,

    /// HTTP port, also advertised to the control plane.
    #[serde(default = "CommonConfig::default_port")]
    pub port: u16,

    /// Port streaming methods transfer on.
    #[serde(default = "CommonConfig::default_seed_port")]
    pub seed_port: u16,

    /// Seconds between control plane pings.
    #[serde(default = "CommonConfig::default_poll_interval")]
    pub poll_interval: u64,

    /// Seconds between re-registrations.
    #[serde(default = "CommonConfig::default_resubmit_interval")]
    pub resubmit_interval: u64,

    /// Timeout in seconds for control plane requests.
    #[serde(default = "CommonConfig::default_http_timeout")]
    pub http_timeout: u64,

    /// Timeout in seconds for method availability probes.
    #[serde(default = "CommonConfig::default_probe_timeout")]
    pub probe_timeout: u64,

    /// Seconds without a successful ping before the status endpoint reports `BAD`.
    #[serde(default = "CommonConfig::default_status_bad_seconds")]
    pub status_bad_seconds: u64,

    /// Run external tools under `sudo -n`.
    #[serde(default)]
    pub exec_with_sudo: bool,

    /// Directory backup artifacts are written to.
    #[serde(default = "CommonConfig::default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Move the old data directory aside on restore instead of emptying it.
    #[serde(default)]
    pub backup_old_datadir: bool,

    /// Header the control plane sends the token in. Empty means query parameter only.
    #[serde(default)]
    pub token_http_header: String,

    /// File the generated token is written to at startup.
    #[serde(default)]
    pub token_hint_file: Option<PathBuf>,

    /// Path of the unauthenticated status endpoint.
    #[serde(default = "CommonConfig::default_status_endpoint")]
    pub status_endpoint: String,
}

impl CommonConfig {
    fn default_bind_address() -> String {
        "0.0.0.0".to_string()
    }

    const fn default_port() -> u16 {
        3002
    }

    const fn default_seed_port() -> u16 {
        21234
    }

    const fn default_poll_interval() -> u64 {
        60
    }

    const fn default_resubmit_interval() -> u64 {
        3600 // 1 hour
    }

    const fn default_http_timeout() -> u64 {
        10
    }

    const fn default_probe_timeout() -> u64 {
        5
    }

    const fn default_status_bad_seconds() -> u64 {
        300
    }

    fn default_backup_dir() -> PathBuf {
        PathBuf::from("/var/lib/seed-agent/backup")
    }

    fn default_status_endpoint() -> String {
        "/api/status".to_string()
    }

    /// Get the poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Get the resubmit interval as a `Duration`.
    #[must_use]
    pub const fn resubmit_interval(&self) -> Duration {
        Duration::from_secs(self.resubmit_interval)
    }

    /// Get the control plane request timeout as a `Duration`.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }

    /// Get the probe timeout as a `Duration`.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            bind_address: Self::default_bind_address(),
            port: Self::default_port(),
            seed_port: Self::default_seed_port(),
            poll_interval: Self::default_poll_interval(),
            resubmit_interval: Self::default_resubmit_interval(),
            http_timeout: Self::default_http_timeout(),
            probe_timeout: Self::default_probe_timeout(),
            status_bad_seconds: Self::default_status_bad_seconds(),
            exec_with_sudo: false,
            backup_dir: Self::default_backup_dir(),
            backup_old_datadir: false,
            token_http_header: String::new(),
            token_hint_file: None,
            status_endpoint: Self::default_status_endpoint(),
        }
    }
}

/// The `[control-plane]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControlPlaneConfig {
    /// Base URL without port. Empty disables registration.
    #[serde(default)]
    pub url: String,

    /// Port of the control plane's agents API.
    #[serde(default = "ControlPlaneConfig::default_agents_port")]
    pub agents_port: u16,
}

impl ControlPlaneConfig {
    const fn default_agents_port() -> u16 {
        3001
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            agents_port: Self::default_agents_port(),
        }
    }
}

/// The `[logging]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info,seed_agent=debug".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// What the HTTP adapter needs from the configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Header carrying the token. Empty means query parameter only.
    pub token_http_header: String,
    /// Path of the status endpoint.
    pub status_endpoint: String,
    /// Seconds without contact before health turns bad.
    pub status_bad_seconds: u64,
}

impl ApiConfig {
    /// Get the health threshold as a `Duration`.
    #[must_use]
    pub const fn status_bad_after(&self) -> Duration {
        Duration::from_secs(self.status_bad_seconds)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        AgentConfig::default().api_config()
    }
}
