use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{mpsc, watch};

use packetfall_core::ids::SessionId;

use crate::config::HubConfig;
use crate::hub::{HubCommand, HubStats};

/// Shared handle given to every HTTP/WebSocket handler. Handlers never see
/// world state; they talk to the hub task through `hub_tx`.
#[derive(Clone)]
pub struct AppState {
    pub hub_tx: mpsc::Sender<HubCommand>,
    pub stats: watch::Receiver<HubStats>,
    pub config: Arc<HubConfig>,
    next_session_id: Arc<AtomicU64>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        config: Arc<HubConfig>,
        hub_tx: mpsc::Sender<HubCommand>,
        stats: watch::Receiver<HubStats>,
    ) -> Self {
        Self {
            hub_tx,
            stats,
            config,
            next_session_id: Arc::new(AtomicU64::new(0)),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Collision-free session id shared by all handlers. Ids start at 1.
    pub fn alloc_session_id(&self) -> SessionId {
        SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Counts one live WebSocket for as long as it is held.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_state() -> AppState {
        let (hub_tx, _hub_rx) = mpsc::channel(8);
        let (_stats_tx, stats_rx) = watch::channel(HubStats::default());
        AppState::new(Arc::new(HubConfig::default()), hub_tx, stats_rx)
    }

    #[test]
    fn session_ids_are_unique_across_clones() {
        let state = make_state();
        let other = state.clone();
        let a = state.alloc_session_id();
        let b = other.alloc_session_id();
        let c = state.alloc_session_id();
        assert_eq!(a, SessionId(1));
        assert_eq!(b, SessionId(2));
        assert_eq!(c, SessionId(3));
    }

    #[test]
    fn connection_guard_counts() {
        let state = make_state();
        let count = Arc::clone(&state.ws_connection_count);
        {
            let _a = ConnectionGuard::new(Arc::clone(&count));
            let _b = ConnectionGuard::new(Arc::clone(&count));
            assert_eq!(count.load(Ordering::Relaxed), 2);
        }
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }
}
