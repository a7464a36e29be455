//! Live sessions owned by the hub task.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;

use packetfall_core::ids::SessionId;
use packetfall_core::net::messages::{CaptureSourceView, GameMode};

use crate::player::PlayerState;

/// Bounded queue drained by a session's writer task.
pub type Outbound = mpsc::Sender<Utf8Bytes>;

/// Shortest span the packet rate is averaged over.
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// One connected capture agent.
#[derive(Debug)]
pub struct CaptureSession {
    pub source_id: String,
    pub source_name: String,
    pub remote_ip: IpAddr,
    pub packets_received: u64,
    /// Admitted records per second over the last completed window.
    pub packet_rate: f32,
    pub last_activity: Option<Instant>,
    window_start: Instant,
    window_count: u64,
    pub sender: Outbound,
}

impl CaptureSession {
    pub fn new(
        source_id: String,
        source_name: String,
        remote_ip: IpAddr,
        sender: Outbound,
        now: Instant,
    ) -> Self {
        Self {
            source_id,
            source_name,
            remote_ip,
            packets_received: 0,
            packet_rate: 0.0,
            last_activity: None,
            window_start: now,
            window_count: 0,
            sender,
        }
    }

    /// Account for `admitted` records arriving at `now`.
    pub fn record_batch(&mut self, admitted: usize, now: Instant) {
        self.packets_received += admitted as u64;
        self.window_count += admitted as u64;
        self.last_activity = Some(now);

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= RATE_WINDOW {
            self.packet_rate = (self.window_count as f64 / elapsed.as_secs_f64()) as f32;
            self.window_start = now;
            self.window_count = 0;
        }
    }

    pub fn is_active(&self, now: Instant, window: Duration) -> bool {
        self.last_activity
            .is_some_and(|t| now.saturating_duration_since(t) < window)
    }

    pub fn view(&self, now: Instant, window: Duration) -> CaptureSourceView {
        CaptureSourceView {
            name: self.source_name.clone(),
            active: self.is_active(now, window),
            packet_rate: self.packet_rate,
            ip_address: self.remote_ip.to_string(),
        }
    }
}

/// One connected viewer or player. Spectators never own a `PlayerState`.
#[derive(Debug)]
pub struct GameSession {
    pub mode: GameMode,
    pub player: Option<PlayerState>,
    pub sender: Outbound,
}

/// Session removed from the registry.
#[derive(Debug)]
pub enum Removed {
    Capture(CaptureSession),
    Game(GameSession),
}

#[derive(Debug, Default)]
pub struct Registry {
    captures: BTreeMap<SessionId, CaptureSession>,
    games: BTreeMap<SessionId, GameSession>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_capture(&mut self, id: SessionId, session: CaptureSession) {
        self.captures.insert(id, session);
    }

    pub fn insert_game(&mut self, id: SessionId, session: GameSession) {
        self.games.insert(id, session);
    }

    /// Remove a session of either kind. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: SessionId) -> Option<Removed> {
        if let Some(c) = self.captures.remove(&id) {
            return Some(Removed::Capture(c));
        }
        self.games.remove(&id).map(Removed::Game)
    }

    pub fn capture(&self, id: SessionId) -> Option<&CaptureSession> {
        self.captures.get(&id)
    }

    pub fn capture_mut(&mut self, id: SessionId) -> Option<&mut CaptureSession> {
        self.captures.get_mut(&id)
    }

    pub fn game_mut(&mut self, id: SessionId) -> Option<&mut GameSession> {
        self.games.get_mut(&id)
    }

    pub fn game(&self, id: SessionId) -> Option<&GameSession> {
        self.games.get(&id)
    }

    pub fn captures(&self) -> impl Iterator<Item = (SessionId, &CaptureSession)> {
        self.captures.iter().map(|(id, c)| (*id, c))
    }

    pub fn games(&self) -> impl Iterator<Item = (SessionId, &GameSession)> {
        self.games.iter().map(|(id, g)| (*id, g))
    }

    pub fn game_ids(&self) -> Vec<SessionId> {
        self.games.keys().copied().collect()
    }

    /// Sessions that own a player, in session id order.
    pub fn players(&self) -> impl Iterator<Item = (SessionId, &PlayerState)> {
        self.games
            .iter()
            .filter_map(|(id, g)| g.player.as_ref().map(|p| (*id, p)))
    }

    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut PlayerState> {
        self.games.values_mut().filter_map(|g| g.player.as_mut())
    }

    /// Position of a capture session in id order; selects its palette.
    pub fn source_index(&self, id: SessionId) -> Option<usize> {
        self.captures.keys().position(|k| *k == id)
    }

    /// Display name of the capture session publishing under `source_id`.
    pub fn source_name(&self, source_id: &str) -> Option<&str> {
        self.captures
            .values()
            .find(|c| c.source_id == source_id)
            .map(|c| c.source_name.as_str())
    }

    pub fn capture_count(&self) -> usize {
        self.captures.len()
    }

    pub fn game_count(&self) -> usize {
        self.games.len()
    }

    pub fn player_count(&self) -> usize {
        self.players().count()
    }

    pub fn spectator_count(&self) -> usize {
        self.games.len() - self.player_count()
    }

    pub fn alive_count(&self) -> usize {
        self.players().filter(|(_, p)| p.alive).count()
    }
}
