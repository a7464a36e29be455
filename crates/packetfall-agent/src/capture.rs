//! Capture sources.
//!
//! A [`PacketSource`] is a blocking producer of [`RawPacket`]s. The agent
//! runs exactly one on a dedicated OS thread and feeds what it yields into the
//! shared pipeline.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::IpAddr;
use std::path::Path;
use std::thread::JoinHandle;

use serde::Deserialize;

use packetfall_core::packet::Protocol;

/// TCP reset flag bit.
pub const TCP_FLAG_RST: u8 = 0x04;

/// Structured metadata for one captured packet, as produced by the capture
/// helper. Everything is optional; the filter decides what is usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RawPacket {
    pub protocol: Option<Protocol>,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    /// Captured length in bytes.
    pub size: u32,
    /// IP fragment offset; non-zero for every fragment but the first.
    pub frag_offset: u16,
    pub more_fragments: bool,
    pub tcp_flags: Option<u8>,
}

impl RawPacket {
    pub fn is_tcp_reset(&self) -> bool {
        self.protocol == Some(Protocol::Tcp)
            && self.tcp_flags.is_some_and(|f| f & TCP_FLAG_RST != 0)
    }
}

#[derive(Debug)]
pub enum CaptureError {
    Open { path: String, source: io::Error },
    Read(io::Error),
    Spawn(io::Error),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { path, source } => write!(f, "cannot open capture input {path}: {source}"),
            Self::Read(e) => write!(f, "capture read failed: {e}"),
            Self::Spawn(e) => write!(f, "cannot start capture thread: {e}"),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } => Some(source),
            Self::Read(e) | Self::Spawn(e) => Some(e),
        }
    }
}

/// Blocking packet producer.
pub trait PacketSource: Send + 'static {
    /// Human-readable origin for logs.
    fn describe(&self) -> String;

    /// Push packets into `sink` until the source ends or fails.
    fn run(&mut self, sink: &mut dyn FnMut(RawPacket)) -> Result<(), CaptureError>;
}

/// One JSON object per line, as written by the external capture helper.
pub struct JsonLinesSource {
    reader: Box<dyn BufRead + Send>,
    origin: String,
    malformed: u64,
}

impl JsonLinesSource {
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(io::stdin()), "stdin")
    }

    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let file = File::open(path).map_err(|source| CaptureError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_reader(BufReader::new(file), path.display().to_string()))
    }

    pub fn from_reader(reader: impl BufRead + Send + 'static, origin: impl Into<String>) -> Self {
        Self {
            reader: Box::new(reader),
            origin: origin.into(),
            malformed: 0,
        }
    }

    /// Lines that were not valid packet JSON.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

impl PacketSource for JsonLinesSource {
    fn describe(&self) -> String {
        format!("json-lines:{}", self.origin)
    }

    fn run(&mut self, sink: &mut dyn FnMut(RawPacket)) -> Result<(), CaptureError> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).map_err(CaptureError::Read)?;
            if n == 0 {
                return Ok(());
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawPacket>(trimmed) {
                Ok(packet) => sink(packet),
                Err(e) => {
                    self.malformed += 1;
                    tracing::debug!(error = %e, "Skipping malformed capture line");
                },
            }
        }
    }
}

/// Run `source` on its own thread. Errors end the thread only; they are
/// logged and the network side keeps going.
pub fn spawn_capture<S, F>(mut source: S, mut sink: F) -> Result<JoinHandle<()>, CaptureError>
where
    S: PacketSource,
    F: FnMut(RawPacket) + Send + 'static,
{
    std::thread::Builder::new()
        .name("packetfall-capture".to_string())
        .spawn(move || {
            let origin = source.describe();
            tracing::info!(source = %origin, "Capture started");
            match source.run(&mut sink) {
                Ok(()) => tracing::info!(source = %origin, "Capture source ended"),
                Err(e) => tracing::error!(source = %origin, error = %e, "Capture failed"),
            }
        })
        .map_err(CaptureError::Spawn)
}
