use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{BulletId, SessionId};
use crate::packet::{PacketRecord, Protocol};

/// Wire `type` discriminator for every message the hub speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // Peer -> Hub (handshake)
    CaptureAuth,
    GameAuth,

    // Agent -> Hub
    PacketData,

    // Game client -> Hub
    PlayerMove,
    PlayerHit,
    PlayerGraze,
    GameControl,
    Chat,

    // Hub -> Peer
    AuthSuccess,
    CaptureStats,
    GameState,
    PlayerEvent,
    ChatBroadcast,
    Leaderboard,
    Error,
}

impl MessageType {
    pub const ALL: [MessageType; 15] = [
        Self::CaptureAuth,
        Self::GameAuth,
        Self::PacketData,
        Self::PlayerMove,
        Self::PlayerHit,
        Self::PlayerGraze,
        Self::GameControl,
        Self::Chat,
        Self::AuthSuccess,
        Self::CaptureStats,
        Self::GameState,
        Self::PlayerEvent,
        Self::ChatBroadcast,
        Self::Leaderboard,
        Self::Error,
    ];

    pub const fn tag(self) -> &'static str {
        match self {
            Self::CaptureAuth => "capture_auth",
            Self::GameAuth => "game_auth",
            Self::PacketData => "packet_data",
            Self::PlayerMove => "player_move",
            Self::PlayerHit => "player_hit",
            Self::PlayerGraze => "player_graze",
            Self::GameControl => "game_control",
            Self::Chat => "chat",
            Self::AuthSuccess => "auth_success",
            Self::CaptureStats => "capture_stats",
            Self::GameState => "game_state",
            Self::PlayerEvent => "player_event",
            Self::ChatBroadcast => "chat_broadcast",
            Self::Leaderboard => "leaderboard",
            Self::Error => "error",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Sent by agents or game clients toward the hub.
    pub const fn is_client(self) -> bool {
        matches!(
            self,
            Self::CaptureAuth
                | Self::GameAuth
                | Self::PacketData
                | Self::PlayerMove
                | Self::PlayerHit
                | Self::PlayerGraze
                | Self::GameControl
                | Self::Chat
        )
    }

    pub const fn is_auth(self) -> bool {
        matches!(self, Self::CaptureAuth | Self::GameAuth)
    }
}

// ---------------------------------------------------------------------------
// Peer -> Hub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CaptureAuth(CaptureAuthMsg),
    GameAuth(GameAuthMsg),
    PacketData(PacketDataMsg),
    PlayerMove(PlayerMoveMsg),
    PlayerHit(PlayerHitMsg),
    PlayerGraze(PlayerGrazeMsg),
    GameControl(GameControlMsg),
    Chat(ChatMsg),
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::CaptureAuth(_) => MessageType::CaptureAuth,
            Self::GameAuth(_) => MessageType::GameAuth,
            Self::PacketData(_) => MessageType::PacketData,
            Self::PlayerMove(_) => MessageType::PlayerMove,
            Self::PlayerHit(_) => MessageType::PlayerHit,
            Self::PlayerGraze(_) => MessageType::PlayerGraze,
            Self::GameControl(_) => MessageType::GameControl,
            Self::Chat(_) => MessageType::Chat,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureAuthMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    #[default]
    Player,
    Spectator,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameAuthMsg {
    #[serde(default)]
    pub mode: GameMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketDataMsg {
    #[serde(default)]
    pub source_id: String,
    #[serde(default, deserialize_with = "crate::packet::deserialize_records")]
    pub packets: Vec<PacketRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerMoveMsg {
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerHitMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bullet_id: Option<BulletId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerGrazeMsg {}

/// Game-control verb. Unrecognized verbs are preserved so the hub can log
/// and ignore them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ControlAction {
    Restart,
    Other(String),
}

impl From<String> for ControlAction {
    fn from(s: String) -> Self {
        if s == "restart" {
            Self::Restart
        } else {
            Self::Other(s)
        }
    }
}

impl From<ControlAction> for String {
    fn from(a: ControlAction) -> Self {
        match a {
            ControlAction::Restart => "restart".to_string(),
            ControlAction::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameControlMsg {
    pub action: ControlAction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMsg {
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// Hub -> Peer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthSuccess(AuthSuccessMsg),
    CaptureStats(CaptureStatsMsg),
    GameState(Box<GameStateMsg>),
    PlayerEvent(PlayerEventMsg),
    ChatBroadcast(ChatBroadcastMsg),
    Leaderboard(LeaderboardMsg),
    Error(ErrorMsg),
}

impl ServerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::AuthSuccess(_) => MessageType::AuthSuccess,
            Self::CaptureStats(_) => MessageType::CaptureStats,
            Self::GameState(_) => MessageType::GameState,
            Self::PlayerEvent(_) => MessageType::PlayerEvent,
            Self::ChatBroadcast(_) => MessageType::ChatBroadcast,
            Self::Leaderboard(_) => MessageType::Leaderboard,
            Self::Error(_) => MessageType::Error,
        }
    }
}

/// World constants handed to a game client on successful auth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfigPayload {
    pub max_bullets: usize,
    pub game_width: f32,
    pub game_height: f32,
    pub difficulty: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSuccessMsg {
    pub player_id: SessionId,
    pub game_config: GameConfigPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStatsMsg {
    pub connected_players: usize,
    pub active_players: usize,
    pub total_bullets: usize,
    pub bullets_from_source: usize,
}

/// Public per-player fields; internal bookkeeping (expiry instants) stays
/// on the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub alive: bool,
    pub hp: u8,
    pub score: u64,
    pub graze_count: u32,
    pub avatar: String,
    pub invulnerable: bool,
    pub death_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletView {
    pub id: BulletId,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub size: f32,
    pub protocol: Protocol,
    pub source: String,
    pub source_name: String,
    pub port: u16,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSourceView {
    pub name: String,
    pub active: bool,
    pub packet_rate: f32,
    pub ip_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStateMsg {
    /// Unix epoch milliseconds.
    pub timestamp: u64,
    pub players: BTreeMap<SessionId, PlayerView>,
    pub bullets: Vec<BulletView>,
    pub capture_sources: BTreeMap<String, CaptureSourceView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerEventKind {
    Join,
    Leave,
    Death,
    Respawn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub id: SessionId,
    pub name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerEventMsg {
    pub event: PlayerEventKind,
    pub player: PlayerSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatBroadcastMsg {
    pub player_id: SessionId,
    pub player_name: String,
    pub message: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub player_id: SessionId,
    pub name: String,
    pub score: u64,
    pub alive: bool,
    pub rank: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardMsg {
    pub rankings: Vec<LeaderboardEntry>,
    pub high_score: u64,
    pub total_players: usize,
    pub active_players: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidAuth,
    AuthTimeout,
    InvalidMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorMsg {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
