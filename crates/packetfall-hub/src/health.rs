use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::hub::HubStats;
use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: ConnectionInfo,
    pub hub: HubInfo,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub websocket: usize,
}

#[derive(Serialize)]
pub struct HubInfo {
    pub players_online: usize,
    pub spectators: usize,
    pub captures_active: usize,
    pub bullets: usize,
}

impl From<HubStats> for HubInfo {
    fn from(s: HubStats) -> Self {
        Self {
            players_online: s.players_online,
            spectators: s.spectators,
            captures_active: s.captures_active,
            bullets: s.bullets,
        }
    }
}

/// Connection counts plus the last stats the hub task published.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ws = state.ws_connection_count.load(Ordering::Relaxed);
    let stats = *state.stats.borrow();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        connections: ConnectionInfo { websocket: ws },
        hub: stats.into(),
    })
}
