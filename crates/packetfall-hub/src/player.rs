use std::time::{Duration, Instant};

use packetfall_core::ids::SessionId;
use packetfall_core::net::messages::{PlayerSummary, PlayerView};
use packetfall_core::time::unix_secs_f64;

use crate::config::WorldConfig;

pub const DEFAULT_AVATAR: &str = "nyan_cat";
pub const MAX_NAME_LEN: usize = 32;
pub const GRAZE_SCORE: u64 = 100;

/// Result of a reported hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome {
    /// Dead or still invulnerable.
    Ignored,
    Damaged { hp: u8 },
    Died,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub name: String,
    pub avatar: String,
    pub x: f32,
    pub y: f32,
    pub hp: u8,
    pub max_hp: u8,
    pub alive: bool,
    pub score: u64,
    pub graze_count: u32,
    pub invulnerable: bool,
    invulnerable_until: Option<Instant>,
    pub death_time: Option<f64>,
}

impl PlayerState {
    pub fn spawn(name: String, avatar: String, world: &WorldConfig) -> Self {
        let (x, y) = world.spawn_point();
        Self {
            name,
            avatar,
            x,
            y,
            hp: world.max_hp,
            max_hp: world.max_hp,
            alive: true,
            score: 0,
            graze_count: 0,
            invulnerable: false,
            invulnerable_until: None,
            death_time: None,
        }
    }

    /// Whether a hit at `now` would be absorbed by invulnerability. The flag
    /// alone is not trusted: once the expiry has passed the player is
    /// vulnerable even if the tick has not cleared it yet.
    fn shielded(&self, now: Instant) -> bool {
        self.invulnerable && self.invulnerable_until.is_some_and(|until| now < until)
    }

    pub fn apply_hit(&mut self, now: Instant, window: Duration) -> HitOutcome {
        if !self.alive || self.shielded(now) {
            return HitOutcome::Ignored;
        }
        self.hp = self.hp.saturating_sub(1);
        if self.hp == 0 {
            self.alive = false;
            self.invulnerable = false;
            self.invulnerable_until = None;
            self.death_time = Some(unix_secs_f64());
            HitOutcome::Died
        } else {
            self.grant_invulnerability(now, window);
            HitOutcome::Damaged { hp: self.hp }
        }
    }

    /// Bring a dead player back at the spawn point. Returns false (and does
    /// nothing) for a living player.
    pub fn respawn(&mut self, now: Instant, world: &WorldConfig) -> bool {
        if self.alive {
            return false;
        }
        let (x, y) = world.spawn_point();
        self.x = x;
        self.y = y;
        self.hp = self.max_hp;
        self.alive = true;
        self.death_time = None;
        self.grant_invulnerability(now, world.invulnerability());
        true
    }

    fn grant_invulnerability(&mut self, now: Instant, window: Duration) {
        self.invulnerable = true;
        self.invulnerable_until = Some(now + window);
    }

    /// Clear an expired invulnerability window. Returns true if it changed.
    pub fn expire_invulnerability(&mut self, now: Instant) -> bool {
        if self.invulnerable && !self.shielded(now) {
            self.invulnerable = false;
            self.invulnerable_until = None;
            return true;
        }
        false
    }

    /// Non-finite coordinates are ignored; absent ones keep the current value.
    pub fn move_to(&mut self, x: Option<f32>, y: Option<f32>, world: &WorldConfig) {
        if let Some(x) = x.filter(|v| v.is_finite()) {
            self.x = x.clamp(0.0, world.width);
        }
        if let Some(y) = y.filter(|v| v.is_finite()) {
            self.y = y.clamp(0.0, world.height);
        }
    }

    pub fn graze(&mut self) {
        self.graze_count = self.graze_count.saturating_add(1);
        self.score = self.score.saturating_add(GRAZE_SCORE);
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            alive: self.alive,
            hp: self.hp,
            score: self.score,
            graze_count: self.graze_count,
            avatar: self.avatar.clone(),
            invulnerable: self.invulnerable,
            death_time: self.death_time,
        }
    }

    pub fn summary(&self, id: SessionId) -> PlayerSummary {
        PlayerSummary {
            id,
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// Trim, drop control characters, cap length. Empty names fall back to
/// `Player <id>`.
pub fn sanitize_name(raw: Option<&str>, id: SessionId) -> String {
    let cleaned: String = raw
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    let trimmed: String = cleaned.trim().chars().take(MAX_NAME_LEN).collect();
    let trimmed = trimmed.trim_end().to_string();
    if trimmed.is_empty() {
        format!("Player {id}")
    } else {
        trimmed
    }
}

pub fn sanitize_avatar(raw: Option<&str>) -> String {
    let cleaned: String = raw
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        DEFAULT_AVATAR.to_string()
    } else {
        cleaned.to_string()
    }
}
