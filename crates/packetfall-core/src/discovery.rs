//! LAN discovery datagrams exchanged over UDP multicast.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 42, 99);
pub const DISCOVERY_PORT: u16 = 9999;
pub const SERVICE_NAME: &str = "_packetfall-hub._tcp.local";

/// Largest datagram either side reads.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryMessage {
    Discover(DiscoverMsg),
    Announce(AnnounceMsg),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverMsg {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnounceMsg {
    pub service: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub players_online: usize,
    #[serde(default)]
    pub captures_active: usize,
    #[serde(default)]
    pub game_mode: String,
}

impl DiscoveryMessage {
    pub fn discover(client_type: &str) -> Self {
        Self::Discover(DiscoverMsg {
            service: SERVICE_NAME.to_string(),
            client_type: Some(client_type.to_string()),
        })
    }

    /// Whether this is a probe for our service.
    pub fn is_probe_for(&self, service: &str) -> bool {
        matches!(self, Self::Discover(d) if d.service == service)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
