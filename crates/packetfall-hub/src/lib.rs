pub mod config;
pub mod discovery;
pub mod health;
pub mod hub;
pub mod leaderboard;
pub mod player;
pub mod rate_limit;
pub mod registry;
pub mod sim;
pub mod state;
pub mod transform;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use tokio::sync::{mpsc, watch};

use config::HubConfig;
use hub::{Hub, HubStats, run_hub_loop};
use state::AppState;

/// Build the Axum router and application state from a config, and start the
/// hub task that owns the world. The task stops once every clone of the
/// returned state (and the router holding one) is dropped.
pub fn build_app(config: HubConfig) -> (Router<()>, AppState) {
    let config = Arc::new(config);
    let (hub_tx, hub_rx) = mpsc::channel(config.limits.command_queue);
    let (stats_tx, stats_rx) = watch::channel(HubStats::default());

    let hub = Hub::new(Arc::clone(&config), stats_tx);
    tokio::spawn(run_hub_loop(hub, hub_rx));

    let state = AppState::new(config, hub_tx, stats_rx);

    // Game clients connect to the bare host; `/ws` is kept as an alias.
    let app = Router::new()
        .route("/", axum::routing::get(ws::ws_handler))
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .with_state(state.clone());

    (app, state)
}
