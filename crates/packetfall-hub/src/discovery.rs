//! Multicast discovery responder.
//!
//! Answers `DISCOVER` probes for our service with a unicast `ANNOUNCE` built
//! from the latest published hub statistics.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use packetfall_core::discovery::{AnnounceMsg, DiscoveryMessage, MAX_DATAGRAM_SIZE};

use crate::config::{DiscoveryConfig, HubConfig};
use crate::hub::HubStats;

/// Announced game mode; the hub only runs one.
const GAME_MODE: &str = "multiplayer";

/// Builds replies to discovery probes.
#[derive(Debug, Clone)]
pub struct Responder {
    service: String,
    host: String,
    port: u16,
    name: String,
    stats: watch::Receiver<HubStats>,
}

impl Responder {
    pub fn new(
        config: &HubConfig,
        host: String,
        ws_port: u16,
        stats: watch::Receiver<HubStats>,
    ) -> Self {
        Self {
            service: config.discovery.service_name.clone(),
            host,
            port: ws_port,
            name: config.hub_name.clone(),
            stats,
        }
    }

    /// Reply for one incoming datagram, or `None` if it is not a probe for
    /// our service.
    pub fn reply_to(&self, data: &[u8]) -> Option<DiscoveryMessage> {
        let msg = DiscoveryMessage::decode(data).ok()?;
        if !msg.is_probe_for(&self.service) {
            return None;
        }
        let stats = *self.stats.borrow();
        Some(DiscoveryMessage::Announce(AnnounceMsg {
            service: self.service.clone(),
            host: self.host.clone(),
            port: self.port,
            name: self.name.clone(),
            players_online: stats.players_online,
            captures_active: stats.captures_active,
            game_mode: GAME_MODE.to_string(),
        }))
    }
}

/// Bind the discovery port and join the multicast group. A busy port falls
/// back to an ephemeral one; a failed group join leaves the socket answering
/// unicast probes only.
pub async fn bind_socket(config: &DiscoveryConfig) -> io::Result<UdpSocket> {
    let wanted = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let socket = match UdpSocket::bind(wanted).await {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            let s = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
            tracing::warn!(
                port = config.port,
                fallback = s.local_addr()?.port(),
                "Discovery port in use, using an ephemeral port"
            );
            s
        },
        Err(e) => return Err(e),
    };

    if let Err(e) = socket.join_multicast_v4(config.multicast_group, Ipv4Addr::UNSPECIFIED) {
        tracing::warn!(
            group = %config.multicast_group,
            error = %e,
            "Failed to join discovery multicast group"
        );
    }
    Ok(socket)
}

/// Receive errors that leave the socket usable. `ConnectionReset` is how
/// some platforms report an ICMP unreachable for an earlier reply.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

/// Answer probes until the socket fails.
pub async fn serve(socket: UdpSocket, responder: Responder) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) if is_transient(&e) => {
                tracing::debug!(error = %e, "Transient discovery receive error");
                continue;
            },
            Err(e) => {
                tracing::error!(error = %e, "Discovery socket failed, responder stopped");
                return;
            },
        };

        let Some(reply) = responder.reply_to(&buf[..len]) else {
            tracing::debug!(%peer, "Ignoring discovery datagram");
            continue;
        };
        match reply.encode() {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, peer).await {
                    tracing::debug!(%peer, error = %e, "Failed to send discovery reply");
                } else {
                    tracing::info!(%peer, "Discovery response sent");
                }
            },
            Err(e) => tracing::warn!(error = %e, "Failed to encode discovery reply"),
        }
    }
}

/// Local address of the default route. Connecting a UDP socket sends no
/// packets; it only selects the outgoing interface.
pub fn detect_local_ip() -> IpAddr {
    let probe = || -> io::Result<IpAddr> {
        let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Start the responder in the background. Returns `None` when disabled or
/// when the socket cannot be bound; discovery failure is never fatal.
pub async fn spawn_responder(
    config: &HubConfig,
    ws_port: u16,
    stats: watch::Receiver<HubStats>,
) -> Option<JoinHandle<()>> {
    if !config.discovery.enabled {
        tracing::info!("Discovery responder disabled");
        return None;
    }

    let socket = match bind_socket(&config.discovery).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Discovery responder unavailable");
            return None;
        },
    };

    let host = config
        .discovery
        .advertised_host
        .clone()
        .unwrap_or_else(|| detect_local_ip().to_string());
    tracing::info!(
        group = %config.discovery.multicast_group,
        port = socket.local_addr().map(|a| a.port()).unwrap_or(config.discovery.port),
        host = %host,
        "Discovery responder listening"
    );

    let responder = Responder::new(config, host, ws_port, stats);
    Some(tokio::spawn(serve(socket, responder)))
}
