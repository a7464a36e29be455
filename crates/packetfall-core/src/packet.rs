use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Transport protocol of an observed packet.
///
/// Agents only ever emit TCP, UDP or ICMP. Any other tag arriving at the hub
/// decodes as `Unknown` instead of failing the whole batch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    #[default]
    Unknown,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Icmp => "ICMP",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether the protocol carries port numbers.
    pub const fn has_ports(self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }
}

impl From<String> for Protocol {
    fn from(tag: String) -> Self {
        match tag.to_ascii_uppercase().as_str() {
            "TCP" => Self::Tcp,
            "UDP" => Self::Udp,
            "ICMP" => Self::Icmp,
            _ => Self::Unknown,
        }
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_packet_size() -> u32 {
    100
}

/// One observed packet as it travels from an agent to the hub.
///
/// Capture timestamps are stripped before transmission; the hub applies its
/// own clock on arrival. Decoding never rejects a field value: an unreadable
/// protocol is `Unknown`, an unreadable address or port is `None`, and an
/// unreadable size takes the default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRecord {
    #[serde(default, deserialize_with = "lenient_protocol")]
    pub protocol: Protocol,
    #[serde(default, deserialize_with = "lenient_ip")]
    pub src_ip: Option<IpAddr>,
    #[serde(default, deserialize_with = "lenient_ip")]
    pub dst_ip: Option<IpAddr>,
    #[serde(default, deserialize_with = "lenient_port")]
    pub src_port: Option<u16>,
    #[serde(default, deserialize_with = "lenient_port")]
    pub dst_port: Option<u16>,
    #[serde(default = "default_packet_size", deserialize_with = "lenient_size")]
    pub size: u32,
}

fn lenient_protocol<'de, D: Deserializer<'de>>(d: D) -> Result<Protocol, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(tag) => Protocol::from(tag),
        _ => Protocol::Unknown,
    })
}

fn lenient_ip<'de, D: Deserializer<'de>>(d: D) -> Result<Option<IpAddr>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(text) => text.parse().ok(),
        _ => None,
    })
}

fn lenient_port<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u16>, D::Error> {
    Ok(Value::deserialize(d)?
        .as_u64()
        .and_then(|n| u16::try_from(n).ok()))
}

fn lenient_size<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(Value::deserialize(d)?
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or_else(default_packet_size))
}

/// Decode a `packets` array entry by entry, dropping entries that are not
/// records at all. A non-array value yields an empty batch.
pub fn deserialize_records<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<PacketRecord>, D::Error> {
    let Value::Array(entries) = Value::deserialize(d)? else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

impl PacketRecord {
    /// Port used to place the packet in the game world: the destination port
    /// when present and non-zero, the source port otherwise.
    pub fn game_port(&self) -> Option<u16> {
        self.dst_port
            .filter(|&p| p != 0)
            .or(self.src_port.filter(|&p| p != 0))
    }
}
