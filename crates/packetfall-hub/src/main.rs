use std::net::SocketAddr;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use packetfall_hub::build_app;
use packetfall_hub::config::HubConfig;
use packetfall_hub::discovery::spawn_responder;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = HubConfig::load();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %config.listen_addr, error = %e, "Failed to bind");
            return ExitCode::FAILURE;
        },
    };
    let local = match listener.local_addr() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(error = %e, "Listener has no local address");
            return ExitCode::FAILURE;
        },
    };

    let (app, state) = build_app(config);
    let _discovery = spawn_responder(&state.config, local.port(), state.stats.clone()).await;

    tracing::info!(
        addr = %local,
        name = %state.config.hub_name,
        tick_rate = state.config.world.tick_rate_hz,
        "PacketFall hub listening"
    );

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Err(e) = result {
        tracing::error!(error = %e, "Server error");
        return ExitCode::FAILURE;
    }
    tracing::info!("PacketFall hub stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
