//! The authoritative hub task.
//!
//! All world state lives in [`Hub`], owned by a single task running
//! [`run_hub_loop`]. WebSocket handlers never touch it directly; they enqueue
//! [`HubCommand`]s. Every method here is synchronous, so a command or tick runs
//! to completion before the next one is looked at.

use std::collections::{BTreeMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Utf8Bytes;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use packetfall_core::ids::{BulletId, SessionId};
use packetfall_core::net::messages::{
    AuthSuccessMsg, CaptureAuthMsg, CaptureStatsMsg, ChatBroadcastMsg, ControlAction,
    GameAuthMsg, GameConfigPayload, GameMode, GameStateMsg, PlayerEventKind, PlayerEventMsg,
    ServerMessage,
};
use packetfall_core::net::protocol::encode_server_message;
use packetfall_core::packet::PacketRecord;
use packetfall_core::time::unix_millis;

use crate::config::HubConfig;
use crate::leaderboard::Leaderboard;
use crate::player::{HitOutcome, PlayerState, sanitize_avatar, sanitize_name};
use crate::registry::{CaptureSession, GameSession, Outbound, Registry, Removed};
use crate::sim::{BulletField, FieldLimits};
use crate::transform::{self, BulletIds, SourceContext};

/// Intents sent from WebSocket handlers to the hub task.
#[derive(Debug)]
pub enum HubCommand {
    CaptureJoined {
        session_id: SessionId,
        auth: CaptureAuthMsg,
        remote_ip: IpAddr,
        sender: Outbound,
    },
    GameJoined {
        session_id: SessionId,
        auth: GameAuthMsg,
        sender: Outbound,
    },
    PacketData {
        session_id: SessionId,
        packets: Vec<PacketRecord>,
    },
    GameInput {
        session_id: SessionId,
        input: GameInput,
    },
    Disconnect {
        session_id: SessionId,
    },
}

/// Post-handshake messages from a game client.
#[derive(Debug, Clone, PartialEq)]
pub enum GameInput {
    Move { x: Option<f32>, y: Option<f32> },
    Hit { bullet_id: Option<BulletId> },
    Graze,
    Control(ControlAction),
    Chat(String),
}

/// Read-only snapshot published after every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub players_online: usize,
    pub spectators: usize,
    pub captures_active: usize,
    pub bullets: usize,
}

pub struct Hub {
    config: Arc<HubConfig>,
    registry: Registry,
    field: BulletField,
    limits: FieldLimits,
    bullet_ids: BulletIds,
    leaderboard: Leaderboard,
    rng: StdRng,
    stats_tx: watch::Sender<HubStats>,
}

impl Hub {
    pub fn new(config: Arc<HubConfig>, stats_tx: watch::Sender<HubStats>) -> Self {
        Self::with_rng(config, stats_tx, StdRng::from_os_rng())
    }

    /// Deterministic hub for tests.
    pub fn with_seed(config: Arc<HubConfig>, stats_tx: watch::Sender<HubStats>, seed: u64) -> Self {
        Self::with_rng(config, stats_tx, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: Arc<HubConfig>, stats_tx: watch::Sender<HubStats>, rng: StdRng) -> Self {
        let limits = FieldLimits::from(&config.world);
        Self {
            config,
            registry: Registry::new(),
            field: BulletField::new(),
            limits,
            bullet_ids: BulletIds::new(),
            leaderboard: Leaderboard::new(),
            rng,
            stats_tx,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn bullet_count(&self) -> usize {
        self.field.len()
    }

    pub fn handle(&mut self, cmd: HubCommand, now: Instant) {
        match cmd {
            HubCommand::CaptureJoined {
                session_id,
                auth,
                remote_ip,
                sender,
            } => self.capture_joined(session_id, auth, remote_ip, sender, now),
            HubCommand::GameJoined {
                session_id,
                auth,
                sender,
            } => self.game_joined(session_id, auth, sender),
            HubCommand::PacketData {
                session_id,
                packets,
            } => self.packet_data(session_id, &packets, now),
            HubCommand::GameInput { session_id, input } => {
                self.game_input(session_id, input, now);
            },
            HubCommand::Disconnect { session_id } => {
                if let Some(leave) = self.remove_session(session_id) {
                    self.broadcast(leave);
                }
            },
        }
    }

    fn capture_joined(
        &mut self,
        session_id: SessionId,
        auth: CaptureAuthMsg,
        remote_ip: IpAddr,
        sender: Outbound,
        now: Instant,
    ) {
        let source_id = auth
            .source_id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| session_id.to_string());
        let source_name = auth
            .source_name
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("Capture {session_id}"));

        tracing::info!(
            %session_id,
            source_id = %source_id,
            source_name = %source_name,
            %remote_ip,
            "Capture agent connected"
        );
        self.registry.insert_capture(
            session_id,
            CaptureSession::new(source_id, source_name, remote_ip, sender, now),
        );
    }

    fn game_joined(&mut self, session_id: SessionId, auth: GameAuthMsg, sender: Outbound) {
        let world = &self.config.world;
        let player = (auth.mode == GameMode::Player).then(|| {
            PlayerState::spawn(
                sanitize_name(auth.player_name.as_deref(), session_id),
                sanitize_avatar(auth.avatar.as_deref()),
                world,
            )
        });

        let welcome = ServerMessage::AuthSuccess(AuthSuccessMsg {
            player_id: session_id,
            game_config: GameConfigPayload {
                max_bullets: world.max_bullets,
                game_width: world.width,
                game_height: world.height,
                difficulty: world.difficulty,
            },
        });
        if let Some(frame) = encode(&welcome) {
            send_direct(&sender, frame, session_id);
        }

        let join = player.as_ref().map(|p| {
            ServerMessage::PlayerEvent(PlayerEventMsg {
                event: PlayerEventKind::Join,
                player: p.summary(session_id),
            })
        });

        tracing::info!(
            %session_id,
            mode = ?auth.mode,
            name = player.as_ref().map(|p| p.name.as_str()).unwrap_or("-"),
            "Game client connected"
        );
        self.registry.insert_game(
            session_id,
            GameSession {
                mode: auth.mode,
                player,
                sender,
            },
        );

        if let Some(frame) = join.as_ref().and_then(encode) {
            self.broadcast(frame);
        }
    }

    fn packet_data(&mut self, session_id: SessionId, packets: &[PacketRecord], now: Instant) {
        let Some(source_index) = self.registry.source_index(session_id) else {
            tracing::debug!(%session_id, "packet_data from unknown capture session");
            return;
        };
        let Some(capture) = self.registry.capture(session_id) else {
            return;
        };
        let source_id = capture.source_id.clone();

        let bullets = transform::spawn_bullets(
            packets,
            SourceContext {
                source_id: &source_id,
                source_index,
            },
            &mut self.rng,
            &mut self.bullet_ids,
            now,
            &self.config.world,
        );
        self.field.spawn(bullets, self.config.world.max_bullets);

        let stats = ServerMessage::CaptureStats(CaptureStatsMsg {
            connected_players: self.registry.player_count(),
            active_players: self.registry.alive_count(),
            total_bullets: self.field.len(),
            bullets_from_source: self.field.count_from(&source_id),
        });
        let admitted = transform::admitted(packets.len(), &self.config.world);
        if let Some(capture) = self.registry.capture_mut(session_id) {
            capture.record_batch(admitted, now);
            if let Some(frame) = encode(&stats) {
                send_direct(&capture.sender, frame, session_id);
            }
        }
    }

    fn game_input(&mut self, session_id: SessionId, input: GameInput, now: Instant) {
        let world = &self.config.world;
        let Some(session) = self.registry.game_mut(session_id) else {
            return;
        };

        match input {
            GameInput::Move { x, y } => {
                if let Some(p) = session.player.as_mut() {
                    p.move_to(x, y, world);
                }
            },
            GameInput::Hit { bullet_id } => {
                let Some(p) = session.player.as_mut() else {
                    return;
                };
                let outcome = p.apply_hit(now, world.invulnerability());
                tracing::debug!(%session_id, ?bullet_id, ?outcome, "Player hit");
                if outcome == HitOutcome::Died {
                    let death = ServerMessage::PlayerEvent(PlayerEventMsg {
                        event: PlayerEventKind::Death,
                        player: p.summary(session_id),
                    });
                    tracing::info!(%session_id, score = p.score, "Player died");
                    if let Some(frame) = encode(&death) {
                        self.broadcast(frame);
                    }
                    self.broadcast_leaderboard();
                }
            },
            GameInput::Graze => {
                if let Some(p) = session.player.as_mut() {
                    p.graze();
                }
            },
            GameInput::Control(ControlAction::Restart) => {
                let Some(p) = session.player.as_mut() else {
                    return;
                };
                if !p.respawn(now, world) {
                    tracing::debug!(%session_id, "Ignoring restart from living player");
                    return;
                }
                let respawn = ServerMessage::PlayerEvent(PlayerEventMsg {
                    event: PlayerEventKind::Respawn,
                    player: p.summary(session_id),
                });
                if let Some(frame) = encode(&respawn) {
                    self.broadcast(frame);
                }
            },
            GameInput::Control(ControlAction::Other(action)) => {
                tracing::debug!(%session_id, action = %action, "Ignoring unknown game_control action");
            },
            GameInput::Chat(message) => {
                if !chat_allowed(&message, self.config.limits.max_chat_len) {
                    tracing::debug!(%session_id, "Dropping chat message");
                    return;
                }
                let player_name = session
                    .player
                    .as_ref()
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| "Spectator".to_string());
                let chat = ServerMessage::ChatBroadcast(ChatBroadcastMsg {
                    player_id: session_id,
                    player_name,
                    message,
                    timestamp: unix_millis(),
                });
                if let Some(frame) = encode(&chat) {
                    self.broadcast(frame);
                }
            },
        }
    }

    fn broadcast_leaderboard(&mut self) {
        let total = self.registry.game_count();
        let msg = self.leaderboard.compute(self.registry.players(), total);
        if let Some(frame) = encode(&ServerMessage::Leaderboard(msg)) {
            self.broadcast(frame);
        }
    }

    /// Drop a session. Returns the encoded `leave` event when a player left.
    fn remove_session(&mut self, session_id: SessionId) -> Option<Utf8Bytes> {
        match self.registry.remove(session_id)? {
            Removed::Capture(c) => {
                tracing::info!(
                    %session_id,
                    source_id = %c.source_id,
                    packets = c.packets_received,
                    "Capture agent disconnected"
                );
                None
            },
            Removed::Game(g) => {
                tracing::info!(%session_id, mode = ?g.mode, "Game client disconnected");
                let player = g.player?;
                encode(&ServerMessage::PlayerEvent(PlayerEventMsg {
                    event: PlayerEventKind::Leave,
                    player: player.summary(session_id),
                }))
            },
        }
    }

    /// Offer a frame to every game session. Sessions whose queue is closed
    /// are removed afterwards; their `leave` events go out the same way.
    fn broadcast(&mut self, frame: Utf8Bytes) {
        let mut pending = VecDeque::from([frame]);
        while let Some(frame) = pending.pop_front() {
            let mut dead = Vec::new();
            for id in self.registry.game_ids() {
                let Some(session) = self.registry.game(id) else {
                    continue;
                };
                match session.sender.try_send(frame.clone()) {
                    Ok(()) => {},
                    Err(TrySendError::Full(_)) => {
                        tracing::debug!(session_id = %id, "Outbound queue full, dropping frame");
                    },
                    Err(TrySendError::Closed(_)) => dead.push(id),
                }
            }
            for id in dead {
                if let Some(leave) = self.remove_session(id) {
                    pending.push_back(leave);
                }
            }
        }
    }

    /// One simulation step followed by the snapshot broadcast.
    pub fn tick(&mut self, now: Instant) {
        let dt = 1.0 / self.config.world.tick_rate_hz.max(1) as f32;
        self.field.step(dt, now, &self.limits);
        for p in self.registry.players_mut() {
            p.expire_invulnerability(now);
        }

        if self.registry.game_count() > 0
            && let Some(frame) = encode(&ServerMessage::GameState(Box::new(self.snapshot(now))))
        {
            self.broadcast(frame);
        }
        self.publish_stats();
    }

    pub fn snapshot(&self, now: Instant) -> GameStateMsg {
        let window = self.config.world.source_active_window();
        let players = self
            .registry
            .players()
            .map(|(id, p)| (id, p.view()))
            .collect();
        let bullets = self
            .field
            .iter()
            .map(|b| b.view(self.registry.source_name(&b.source_id).unwrap_or("Unknown")))
            .collect();
        let capture_sources: BTreeMap<_, _> = self
            .registry
            .captures()
            .map(|(_, c)| (c.source_id.clone(), c.view(now, window)))
            .collect();

        GameStateMsg {
            timestamp: unix_millis(),
            players,
            bullets,
            capture_sources,
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            players_online: self.registry.player_count(),
            spectators: self.registry.spectator_count(),
            captures_active: self.registry.capture_count(),
            bullets: self.field.len(),
        }
    }

    fn publish_stats(&self) {
        let stats = self.stats();
        self.stats_tx.send_if_modified(|current| {
            if *current == stats {
                false
            } else {
                *current = stats;
                true
            }
        });
    }
}

/// Chat must be non-empty, within the length cap, and free of control
/// characters other than newline.
pub fn chat_allowed(message: &str, max_len: usize) -> bool {
    !message.trim().is_empty()
        && message.chars().count() <= max_len
        && !message.chars().any(|c| c.is_control() && c != '\n')
}

fn encode(msg: &ServerMessage) -> Option<Utf8Bytes> {
    match encode_server_message(msg) {
        Ok(text) => Some(Utf8Bytes::from(text)),
        Err(e) => {
            tracing::warn!(error = %e, msg_type = msg.message_type().tag(), "Failed to encode message");
            None
        },
    }
}

/// Queue a frame for one session. A closed queue is left for the
/// handler's disconnect intent to clean up.
fn send_direct(sender: &Outbound, frame: Utf8Bytes, session_id: SessionId) {
    match sender.try_send(frame) {
        Ok(()) => {},
        Err(TrySendError::Full(_)) => {
            tracing::debug!(%session_id, "Outbound queue full, dropping frame");
        },
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(%session_id, "Outbound queue closed");
        },
    }
}

/// Drive the hub until every command sender is dropped.
pub async fn run_hub_loop(mut hub: Hub, mut cmd_rx: mpsc::Receiver<HubCommand>) {
    let mut interval = tokio::time::interval(hub.config.world.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                hub.tick(Instant::now());
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => hub.handle(cmd, Instant::now()),
                    None => {
                        tracing::info!("Hub command channel closed, stopping hub loop");
                        break;
                    },
                }
            }
        }
    }
}
