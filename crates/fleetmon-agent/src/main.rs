use anyhow::{Context, Result};
use fleetmon_agent::{Agent, AgentConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fleetmon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = AgentConfig::load(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;
    let mut agent = Agent::from_config(config)?;
    tracing::info!(
        agent_id = agent.identity().id(),
        monitor_type = %agent.identity().monitor_type(),
        version = agent.identity().version(),
        "fleetmon-agent starting"
    );

    tokio::select! {
        res = agent.start() => res.context("agent failed to start")?,
        res = shutdown_signal() => {
            res?;
            tracing::info!("Interrupted during startup");
            return Ok(());
        }
    }

    shutdown_signal().await?;
    tracing::info!("Shutting down gracefully");
    if let Err(e) = agent.stop().await {
        tracing::warn!(error = %e, "Shutdown incomplete");
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
