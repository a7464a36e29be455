//! Multicast hub discovery.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;

use packetfall_core::discovery::{AnnounceMsg, DiscoverMsg, DiscoveryMessage, MAX_DATAGRAM_SIZE};

use crate::config::DiscoveryConfig;

/// Send one probe and wait for a matching announcement. Any failure or
/// timeout yields `None`; the caller falls back to its configured hub.
pub async fn discover_hub(config: &DiscoveryConfig) -> Option<AnnounceMsg> {
    let target = SocketAddr::V4(SocketAddrV4::new(config.multicast_group, config.port));
    tracing::info!(
        group = %config.multicast_group,
        port = config.port,
        timeout_ms = config.timeout_ms,
        "Searching for hub"
    );

    match tokio::time::timeout(config.timeout(), probe(target, &config.service_name)).await {
        Ok(Ok(announce)) => {
            tracing::info!(
                name = %announce.name,
                host = %announce.host,
                port = announce.port,
                players = announce.players_online,
                captures = announce.captures_active,
                "Hub found"
            );
            Some(announce)
        },
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Discovery failed");
            None
        },
        Err(_) => {
            tracing::info!("No hub answered the discovery probe");
            None
        },
    }
}

/// Probe `target` and return the first announcement for `service`.
/// Unrelated datagrams are ignored until the caller's timeout fires.
pub async fn probe(target: SocketAddr, service: &str) -> io::Result<AnnounceMsg> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    let request = DiscoveryMessage::Discover(DiscoverMsg {
        service: service.to_string(),
        client_type: Some("capture".to_string()),
    })
    .encode()
    .map_err(io::Error::other)?;
    socket.send_to(&request, target).await?;

    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        match DiscoveryMessage::decode(&buf[..len]) {
            Ok(DiscoveryMessage::Announce(a)) if a.service == service => return Ok(a),
            _ => tracing::debug!(%from, "Ignoring unrelated discovery datagram"),
        }
    }
}

/// `ws://host:port` for an announcement.
pub fn hub_url(announce: &AnnounceMsg) -> String {
    format!("ws://{}:{}", announce.host, announce.port)
}
