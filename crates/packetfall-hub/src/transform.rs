//! Packet batch to bullet conversion.
//!
//! Horizontal position encodes the game port: the registered range
//! [1024, 49151] and the ephemeral range [49152, 65535] each span the full
//! world width. Well-known ports never spawn. Everything here is pure apart
//! from the caller-supplied rng and id counter.

use std::time::Instant;

use rand::Rng;
use rand::seq::index;

use packetfall_core::ids::BulletId;
use packetfall_core::packet::{PacketRecord, Protocol};

use crate::config::WorldConfig;
use crate::sim::Bullet;

const REGISTERED_FIRST: u16 = 1024;
const REGISTERED_SPAN: f32 = 48128.0;
const EPHEMERAL_FIRST: u16 = 49152;
const EPHEMERAL_SPAN: f32 = 16384.0;

/// Synthetic port reported for ICMP bullets.
const ICMP_PORT: u16 = 1;

const STAGGER_ROWS: usize = 3;
const STAGGER_STEP: f32 = 20.0;
const JITTER: f32 = 20.0;

/// Per-source protocol colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub tcp: &'static str,
    pub udp: &'static str,
    pub icmp: &'static str,
    pub unknown: &'static str,
}

impl Palette {
    pub fn color(&self, protocol: Protocol) -> &'static str {
        match protocol {
            Protocol::Tcp => self.tcp,
            Protocol::Udp => self.udp,
            Protocol::Icmp => self.icmp,
            Protocol::Unknown => self.unknown,
        }
    }
}

pub const PALETTES: [Palette; 4] = [
    Palette {
        tcp: "#FF4444",
        udp: "#4444FF",
        icmp: "#44FF44",
        unknown: "#FFFF44",
    },
    Palette {
        tcp: "#CC0000",
        udp: "#0000CC",
        icmp: "#00CC00",
        unknown: "#CCCC00",
    },
    Palette {
        tcp: "#FF8888",
        udp: "#8888FF",
        icmp: "#88FF88",
        unknown: "#FFFF88",
    },
    Palette {
        tcp: "#FF00FF",
        udp: "#00FFFF",
        icmp: "#FFFF00",
        unknown: "#FF8800",
    },
];

pub fn palette_for(source_index: usize) -> &'static Palette {
    &PALETTES[source_index % PALETTES.len()]
}

/// Where a batch came from.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub source_id: &'a str,
    /// Position of the capture session in the registry.
    pub source_index: usize,
}

/// Bullet id generator owned by the hub task.
#[derive(Debug, Default)]
pub struct BulletIds {
    next: u64,
}

impl BulletIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> BulletId {
        self.next += 1;
        BulletId(self.next)
    }
}

/// Map a port onto [0, width). `None` for well-known ports.
pub fn port_to_x(port: u16, width: f32) -> Option<f32> {
    if port >= EPHEMERAL_FIRST {
        Some(f32::from(port - EPHEMERAL_FIRST) / EPHEMERAL_SPAN * width)
    } else if port >= REGISTERED_FIRST {
        Some(f32::from(port - REGISTERED_FIRST) / REGISTERED_SPAN * width)
    } else {
        None
    }
}

/// Size class from the byte length.
pub fn size_class(bytes: u32) -> f32 {
    match bytes {
        0..200 => 5.0,
        200..800 => 10.0,
        _ => 15.0,
    }
}

fn velocity<R: Rng + ?Sized>(protocol: Protocol, source_index: usize, rng: &mut R) -> (f32, f32) {
    let (vx, vy) = match protocol {
        Protocol::Tcp => (0.0, 100.0),
        Protocol::Udp => (rng.random_range(-50.0..50.0), 150.0),
        Protocol::Icmp => (0.0, 200.0),
        Protocol::Unknown => (rng.random_range(-25.0..25.0), 120.0),
    };
    (vx, vy * (1.0 + 0.1 * source_index as f32))
}

/// Number of records a batch of `len` contributes after sampling.
pub fn admitted(len: usize, world: &WorldConfig) -> usize {
    len.min(world.spawn_cap_per_batch)
}

/// Convert one `packet_data` batch into bullets.
///
/// Batches larger than the per-batch cap are reduced to a uniform random
/// sample of exactly that size, kept in arrival order.
pub fn spawn_bullets<R: Rng + ?Sized>(
    packets: &[PacketRecord],
    ctx: SourceContext<'_>,
    rng: &mut R,
    ids: &mut BulletIds,
    now: Instant,
    world: &WorldConfig,
) -> Vec<Bullet> {
    let cap = world.spawn_cap_per_batch;
    let sampled: Vec<&PacketRecord> = if packets.len() > cap {
        let mut picks = index::sample(rng, packets.len(), cap).into_vec();
        picks.sort_unstable();
        picks.into_iter().map(|i| &packets[i]).collect()
    } else {
        packets.iter().collect()
    };

    let palette = palette_for(ctx.source_index);
    let width = world.width;
    let mut bullets = Vec::with_capacity(sampled.len());

    for (i, record) in sampled.into_iter().enumerate() {
        let (mut x, port) = if record.protocol == Protocol::Icmp {
            (rng.random_range(0.1 * width..0.9 * width), ICMP_PORT)
        } else {
            let Some(port) = record.game_port() else {
                continue;
            };
            let Some(x) = port_to_x(port, width) else {
                continue;
            };
            (x, port)
        };

        if i > 0 {
            x += rng.random_range(-JITTER..JITTER);
        }
        let x = x.clamp(0.0, width);
        let y = -STAGGER_STEP * (i % STAGGER_ROWS) as f32;
        let (vx, vy) = velocity(record.protocol, ctx.source_index, rng);

        bullets.push(Bullet {
            id: ids.next_id(),
            x,
            y,
            vx,
            vy,
            size: size_class(record.size),
            protocol: record.protocol,
            source_id: ctx.source_id.to_string(),
            port,
            color: palette.color(record.protocol),
            created_at: now,
        });
    }

    bullets
}

#[cfg(test)]
mod tests {
    use super::*;
    use packetfall_core::test_helpers::{icmp_record, make_record, tcp_burst, tcp_record, udp_record};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ctx(index: usize) -> SourceContext<'static> {
        SourceContext {
            source_id: "capture_a",
            source_index: index,
        }
    }

    fn spawn(packets: &[PacketRecord], index: usize) -> Vec<Bullet> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ids = BulletIds::new();
        spawn_bullets(
            packets,
            ctx(index),
            &mut rng,
            &mut ids,
            Instant::now(),
            &WorldConfig::default(),
        )
    }

    #[test]
    fn port_mapping_edges() {
        assert_eq!(port_to_x(80, 800.0), None);
        assert_eq!(port_to_x(1023, 800.0), None);
        assert_eq!(port_to_x(1024, 800.0), Some(0.0));
        assert_eq!(port_to_x(49152, 800.0), Some(0.0));
        let top_registered = port_to_x(49151, 800.0).unwrap();
        let top_ephemeral = port_to_x(65535, 800.0).unwrap();
        assert!(top_registered < 800.0 && top_registered > 799.0);
        assert!(top_ephemeral < 800.0 && top_ephemeral > 799.0);
    }

    #[test]
    fn well_known_ports_never_spawn() {
        let packets = vec![
            tcp_record("10.0.0.2", 80, "10.0.0.1", 443),
            udp_record("10.0.0.2", 53, "10.0.0.1", 123),
        ];
        assert!(spawn(&packets, 0).is_empty());
    }

    #[test]
    fn dst_port_preferred_then_src() {
        let packets = vec![tcp_record("10.0.0.2", 443, "10.0.0.1", 54321)];
        let b = spawn(&packets, 0);
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].port, 54321);

        let zero_dst = vec![make_record(
            Protocol::Udp,
            "10.0.0.2",
            Some(5000),
            "10.0.0.1",
            Some(0),
            100,
        )];
        let b = spawn(&zero_dst, 0);
        assert_eq!(b[0].port, 5000);
    }

    #[test]
    fn missing_ports_drop_non_icmp() {
        let packets = vec![make_record(Protocol::Tcp, "10.0.0.2", None, "10.0.0.1", None, 100)];
        assert!(spawn(&packets, 0).is_empty());
    }

    #[test]
    fn icmp_spawns_in_middle_band() {
        let packets: Vec<_> = (0..3).map(|_| icmp_record("10.0.0.2", "10.0.0.1")).collect();
        let b = spawn(&packets, 0);
        assert_eq!(b.len(), 3);
        // first record has no jitter so it stays inside [0.1W, 0.9W)
        assert!(b[0].x >= 80.0 && b[0].x < 720.0);
        assert!(b.iter().all(|b| b.port == 1 && b.vy == 200.0 && b.vx == 0.0));
    }

    #[test]
    fn stagger_rows_and_ids() {
        let b = spawn(&tcp_burst(5, 8080), 0);
        let ys: Vec<f32> = b.iter().map(|b| b.y).collect();
        assert_eq!(ys, vec![0.0, -20.0, -40.0, 0.0, -20.0]);
        let ids: Vec<u64> = b.iter().map(|b| b.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn velocity_by_protocol_and_source_index() {
        let tcp = spawn(&[tcp_record("10.0.0.2", 40000, "10.0.0.1", 8080)], 0);
        assert_eq!((tcp[0].vx, tcp[0].vy), (0.0, 100.0));

        let scaled = spawn(&[tcp_record("10.0.0.2", 40000, "10.0.0.1", 8080)], 2);
        assert!((scaled[0].vy - 120.0).abs() < 1e-4);
        assert_eq!(scaled[0].vx, 0.0);

        let udp = spawn(&[udp_record("10.0.0.2", 40000, "10.0.0.1", 5353)], 0);
        assert_eq!(udp[0].vy, 150.0);
        assert!(udp[0].vx >= -50.0 && udp[0].vx < 50.0);
    }

    #[test]
    fn size_classes() {
        assert_eq!(size_class(0), 5.0);
        assert_eq!(size_class(199), 5.0);
        assert_eq!(size_class(200), 10.0);
        assert_eq!(size_class(799), 10.0);
        assert_eq!(size_class(800), 15.0);
        assert_eq!(size_class(9000), 15.0);
    }

    #[test]
    fn palette_wraps_by_source_index() {
        let b = spawn(&[tcp_record("10.0.0.2", 40000, "10.0.0.1", 8080)], 5);
        assert_eq!(b[0].color, "#CC0000");
        assert_eq!(palette_for(0).color(Protocol::Unknown), "#FFFF44");
        assert_eq!(palette_for(3).color(Protocol::Udp), "#00FFFF");
    }

    #[test]
    fn oversized_batch_is_sampled_to_cap() {
        let b = spawn(&tcp_burst(25, 8080), 0);
        assert_eq!(b.len(), 10);
        assert_eq!(admitted(25, &WorldConfig::default()), 10);
        assert_eq!(admitted(4, &WorldConfig::default()), 4);
    }

    #[test]
    fn x_clamped_after_jitter() {
        // port 1024 maps to x = 0; jitter on later records must not leave the world
        let packets: Vec<_> = (0..6)
            .map(|_| tcp_record("10.0.0.2", 40000, "10.0.0.1", 1024))
            .collect();
        let b = spawn(&packets, 0);
        assert!(b.iter().all(|b| (0.0..=800.0).contains(&b.x)));
    }

    proptest! {
        #[test]
        fn registered_range_is_monotonic(a in 1024u16..=49151, b in 1024u16..=49151) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let xl = port_to_x(lo, 800.0).unwrap();
            let xh = port_to_x(hi, 800.0).unwrap();
            prop_assert!(xl <= xh);
            prop_assert!((0.0..800.0).contains(&xh));
        }

        #[test]
        fn ephemeral_range_is_monotonic(a in 49152u16..=65535, b in 49152u16..=65535) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let xl = port_to_x(lo, 800.0).unwrap();
            let xh = port_to_x(hi, 800.0).unwrap();
            prop_assert!(xl <= xh);
            prop_assert!((0.0..800.0).contains(&xh));
        }
    }
}
