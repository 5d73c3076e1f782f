//! Seed agent - per-host seeding daemon
//!
//! This is the main entry point for the agent. It loads the configuration,
//! probes the configured seed methods, registers with the control plane and
//! serves the stage API.
//!
//! # Control plane
//!
//! Set `[control-plane] url` to enable registration. Without it the agent
//! serves requests but never registers, and its status stays `BAD`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seed_agent::{create_router, log_stage_events, AgentConfig, AgentState};
use seed_agent_control::{
    AgentIdentity, AgentToken, ControlPlaneClient, Heartbeat, HttpControlPlaneClient,
    NoopControlPlaneClient, SeedControl, SeedCoordinator,
};
use seed_agent_exec::{CommandRunner, ProcessRunner};
use seed_agent_methods::{Database, MethodBase, MySqlDatabase, SeedMethodRegistry};

#[derive(Parser, Debug)]
#[command(name = "seed-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SEED_AGENT_CONFIG", default_value = "/etc/seed-agent.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = AgentConfig::load(&args.config)?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(config = %args.config.display(), "Starting seed agent");

    let hostname = nix::unistd::gethostname()?
        .into_string()
        .map_err(|raw| format!("hostname is not valid UTF-8: {raw:?}"))?;

    tracing::info!(
        hostname = %hostname,
        port = config.common.port,
        seed_port = config.common.seed_port,
        exec_with_sudo = config.common.exec_with_sudo,
        control_plane = %config.control_plane.url,
        "Agent configuration loaded"
    );

    // Token shared with the control plane on registration
    let token = AgentToken::generate();
    if let Some(path) = &config.common.token_hint_file {
        tokio::fs::write(path, token.as_str()).await?;
        tracing::info!(path = %path.display(), "Wrote token hint file");
    }

    // Seed methods
    let database: Arc<dyn Database> = Arc::new(MySqlDatabase::connect_lazy(&config.mysql));
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
    let base = MethodBase::new(runner, database, config.base_config());
    let registry = SeedMethodRegistry::from_config(base, &config.methods);
    for descriptor in registry.refresh_availability().await {
        tracing::info!(
            method = %descriptor.name,
            available = descriptor.is_available,
            "Seed method registered"
        );
    }

    let coordinator = Arc::new(SeedCoordinator::new(Arc::new(registry), hostname.clone()));
    tokio::spawn(log_stage_events(coordinator.subscribe()));

    // Registration and heartbeat
    let identity = Arc::new(AgentIdentity::new(hostname, config.common.port, token));
    let client: Arc<dyn ControlPlaneClient> = if config.control_plane.url.is_empty() {
        tracing::warn!("No control plane URL set - running without registration");
        Arc::new(NoopControlPlaneClient::new())
    } else {
        Arc::new(HttpControlPlaneClient::new(
            &config.control_plane.url,
            config.control_plane.agents_port,
            config.common.http_timeout(),
        )?)
    };
    let heartbeat = Heartbeat::new(client, Arc::clone(&identity), config.heartbeat_config());
    tokio::spawn(async move { heartbeat.run().await });

    // HTTP API
    let state = AgentState::new(coordinator, identity, config.api_config());
    let app = create_router(state);

    let listener =
        tokio::net::TcpListener::bind((config.common.bind_address.as_str(), config.common.port))
            .await?;
    tracing::info!(addr = %listener.local_addr()?, "Starting HTTP server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Seed agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
