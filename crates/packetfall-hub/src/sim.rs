//! Bullet field advanced once per tick.

use std::time::{Duration, Instant};

use packetfall_core::ids::BulletId;
use packetfall_core::net::messages::BulletView;
use packetfall_core::packet::Protocol;

use crate::config::WorldConfig;

/// Projectile derived from one packet record.
#[derive(Debug, Clone, PartialEq)]
pub struct Bullet {
    pub id: BulletId,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub size: f32,
    pub protocol: Protocol,
    pub source_id: String,
    pub port: u16,
    pub color: &'static str,
    pub created_at: Instant,
}

impl Bullet {
    pub fn view(&self, source_name: &str) -> BulletView {
        BulletView {
            id: self.id,
            x: self.x,
            y: self.y,
            vx: self.vx,
            vy: self.vy,
            size: self.size,
            protocol: self.protocol,
            source: self.source_id.clone(),
            source_name: source_name.to_string(),
            port: self.port,
            color: self.color.to_string(),
        }
    }
}

/// Bounds and limits applied on every step.
#[derive(Debug, Clone, Copy)]
pub struct FieldLimits {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
    pub max_age: Duration,
    pub max_bullets: usize,
}

impl From<&WorldConfig> for FieldLimits {
    fn from(w: &WorldConfig) -> Self {
        Self {
            width: w.width,
            height: w.height,
            margin: w.out_of_bounds_margin,
            max_age: w.bullet_max_age(),
            max_bullets: w.max_bullets,
        }
    }
}

/// Live bullets in creation order.
#[derive(Debug, Default)]
pub struct BulletField {
    bullets: Vec<Bullet>,
}

impl BulletField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bullets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bullets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bullet> {
        self.bullets.iter()
    }

    pub fn count_from(&self, source_id: &str) -> usize {
        self.bullets
            .iter()
            .filter(|b| b.source_id == source_id)
            .count()
    }

    /// Append freshly spawned bullets. Anything past the cap is dropped
    /// immediately so the oldest bullets are the ones kept.
    pub fn spawn(&mut self, bullets: Vec<Bullet>, max_bullets: usize) {
        self.bullets.extend(bullets);
        self.bullets.truncate(max_bullets);
    }

    /// One tick: advance, cull, cap.
    pub fn step(&mut self, dt: f32, now: Instant, limits: &FieldLimits) {
        for b in &mut self.bullets {
            b.x += b.vx * dt;
            b.y += b.vy * dt;
        }

        let y_min = -limits.margin;
        let y_max = limits.height + limits.margin;
        self.bullets.retain(|b| {
            (0.0..=limits.width).contains(&b.x)
                && (y_min..=y_max).contains(&b.y)
                && now.saturating_duration_since(b.created_at) < limits.max_age
        });

        self.bullets.truncate(limits.max_bullets);
    }
}
