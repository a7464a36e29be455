use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use packetfall_agent::agent::{Agent, Outcome};
use packetfall_agent::capture::JsonLinesSource;
use packetfall_agent::config::{AgentConfig, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::load(&cli);
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    let source = match config.input_path() {
        Some(path) => JsonLinesSource::open(path)
            .with_context(|| format!("open capture input {}", path.display()))?,
        None => JsonLinesSource::stdin(),
    };

    tracing::info!(
        source_id = %config.source_id,
        source_name = %config.source_name,
        discover = config.should_discover(),
        "PacketFall agent starting"
    );

    let agent = Agent::new(config);
    agent.start_capture(source).context("start capture thread")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                let _ = shutdown_tx.send(true);
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                // A dropped sender reads as shutdown, so park while holding it.
                std::future::pending::<()>().await;
            },
        }
    });

    match agent.run(shutdown_rx).await {
        Outcome::Shutdown => tracing::info!("PacketFall agent stopped"),
        Outcome::ReconnectExhausted { attempts } => {
            tracing::warn!(attempts, "Giving up on the hub, exiting");
        },
    }
    Ok(())
}
