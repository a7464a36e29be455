//! Filter, per-connection rate limiter, ring buffer and batch assembly.
//!
//! The capture thread calls [`Pipeline::ingest`]; the network task calls
//! [`Pipeline::take_batch`]. Both sides share the limiter and buffer through
//! `parking_lot` mutexes held only for the duration of one call.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use packetfall_core::conn_key::{ConnectionKey, Endpoint};
use packetfall_core::packet::{PacketRecord, Protocol};

use crate::capture::RawPacket;
use crate::config::PipelineConfig;

/// Why a captured packet was not buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoProtocol,
    Fragment,
    TcpReset,
    RateLimited,
}

/// Apply the static filters and build the wire record plus its flow key.
pub fn classify(raw: &RawPacket) -> Result<(PacketRecord, ConnectionKey), DropReason> {
    let protocol = match raw.protocol {
        Some(p @ (Protocol::Tcp | Protocol::Udp | Protocol::Icmp)) => p,
        Some(Protocol::Unknown) | None => return Err(DropReason::NoProtocol),
    };
    if raw.frag_offset > 0 {
        return Err(DropReason::Fragment);
    }
    if raw.is_tcp_reset() {
        return Err(DropReason::TcpReset);
    }

    let (src_port, dst_port) = if protocol.has_ports() {
        (raw.src_port, raw.dst_port)
    } else {
        (None, None)
    };
    let unspecified = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    let key = ConnectionKey::new(
        protocol,
        Endpoint::new(raw.src_ip.unwrap_or(unspecified), src_port),
        Endpoint::new(raw.dst_ip.unwrap_or(unspecified), dst_port),
    );
    let record = PacketRecord {
        protocol,
        src_ip: raw.src_ip,
        dst_ip: raw.dst_ip,
        src_port,
        dst_port,
        size: raw.size,
    };
    Ok((record, key))
}

/// Forwards at most one record per connection per interval.
#[derive(Debug)]
pub struct ConnectionLimiter {
    min_interval: Duration,
    cleanup_interval: Duration,
    last_forward: HashMap<ConnectionKey, Instant>,
    last_cleanup: Instant,
}

impl ConnectionLimiter {
    pub fn new(min_interval: Duration, cleanup_interval: Duration, now: Instant) -> Self {
        Self {
            min_interval,
            cleanup_interval,
            last_forward: HashMap::new(),
            last_cleanup: now,
        }
    }

    /// Whether a record for `key` may be forwarded at `now`. Admitting
    /// records the time.
    pub fn admit(&mut self, key: ConnectionKey, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_cleanup) >= self.cleanup_interval {
            let keep = self.cleanup_interval;
            self.last_forward
                .retain(|_, t| now.saturating_duration_since(*t) < keep);
            self.last_cleanup = now;
        }

        if let Some(last) = self.last_forward.get(&key)
            && now.saturating_duration_since(*last) < self.min_interval
        {
            return false;
        }
        self.last_forward.insert(key, now);
        true
    }

    pub fn tracked(&self) -> usize {
        self.last_forward.len()
    }
}

/// Fixed-capacity FIFO. Pushing into a full buffer evicts the oldest entry.
#[derive(Debug)]
pub struct PacketBuffer {
    entries: VecDeque<(ConnectionKey, PacketRecord)>,
    capacity: usize,
}

impl PacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns true if an old entry was evicted to make room.
    pub fn push(&mut self, key: ConnectionKey, record: PacketRecord) -> bool {
        let evicted = self.entries.len() >= self.capacity && self.entries.pop_front().is_some();
        self.entries.push_back((key, record));
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take up to `max_batch` records, at most `per_connection` per flow.
    /// Records skipped for the per-flow cap go back to the front in their
    /// original order.
    pub fn drain_batch(&mut self, max_batch: usize, per_connection: usize) -> Vec<PacketRecord> {
        let mut batch = Vec::with_capacity(max_batch.min(self.entries.len()));
        let mut per_flow: HashMap<ConnectionKey, usize> = HashMap::new();
        let mut deferred = Vec::new();

        while batch.len() < max_batch {
            let Some((key, record)) = self.entries.pop_front() else {
                break;
            };
            let count = per_flow.entry(key).or_insert(0);
            if *count >= per_connection {
                deferred.push((key, record));
                continue;
            }
            *count += 1;
            batch.push(record);
        }

        for entry in deferred.into_iter().rev() {
            self.entries.push_front(entry);
        }
        batch
    }
}

/// Snapshot of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub captured: u64,
    pub skipped: u64,
    pub filtered: u64,
    pub evicted: u64,
    pub tracked_connections: usize,
    pub buffered: usize,
}

/// When the batcher should send.
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    pub interval: Duration,
    pub threshold: usize,
}

impl FlushPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            interval: config.batch_interval(),
            threshold: config.batch_threshold,
        }
    }

    pub fn should_flush(&self, since_last_send: Duration, buffered: usize) -> bool {
        buffered > 0 && (since_last_send >= self.interval || buffered >= self.threshold)
    }
}

/// Shared between the capture thread and the network task.
#[derive(Debug)]
pub struct Pipeline {
    limiter: Mutex<ConnectionLimiter>,
    buffer: Mutex<PacketBuffer>,
    max_batch: usize,
    per_connection: usize,
    captured: AtomicU64,
    skipped: AtomicU64,
    filtered: AtomicU64,
    evicted: AtomicU64,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            limiter: Mutex::new(ConnectionLimiter::new(
                config.rate_limit(),
                config.cleanup_interval(),
                Instant::now(),
            )),
            buffer: Mutex::new(PacketBuffer::new(config.buffer_capacity)),
            max_batch: config.max_batch,
            per_connection: config.per_connection_cap,
            captured: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Filter, rate-limit and buffer one captured packet.
    pub fn ingest(&self, raw: &RawPacket, now: Instant) -> Result<(), DropReason> {
        let (record, key) = match classify(raw) {
            Ok(r) => r,
            Err(reason) => {
                self.filtered.fetch_add(1, Ordering::Relaxed);
                return Err(reason);
            },
        };

        if !self.limiter.lock().admit(key, now) {
            let skipped = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
            if skipped % 100 == 0 {
                tracing::debug!(skipped, connection = %key, "Rate limiting busy connections");
            }
            return Err(DropReason::RateLimited);
        }

        if self.buffer.lock().push(key, record) {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        self.captured.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Next batch to transmit; empty when nothing is buffered.
    pub fn take_batch(&self) -> Vec<PacketRecord> {
        self.buffer
            .lock()
            .drain_batch(self.max_batch, self.per_connection)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            captured: self.captured.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            tracked_connections: self.limiter.lock().tracked(),
            buffered: self.buffered(),
        }
    }
}
