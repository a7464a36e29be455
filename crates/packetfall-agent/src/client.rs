//! WebSocket link to the hub: handshake and the per-connection send loop.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use packetfall_core::net::messages::{CaptureAuthMsg, ClientMessage, PacketDataMsg, ServerMessage};
use packetfall_core::net::protocol::{ProtocolError, decode_server_message, encode_client_message};

use crate::config::PipelineConfig;
use crate::pipeline::{FlushPolicy, Pipeline};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
pub enum ClientError {
    Connect(tungstenite::Error),
    Send(tungstenite::Error),
    Encode(ProtocolError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect failed: {e}"),
            Self::Send(e) => write!(f, "send failed: {e}"),
            Self::Encode(e) => write!(f, "encode failed: {e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(e) | Self::Send(e) => Some(e),
            Self::Encode(e) => Some(e),
        }
    }
}

/// Who this agent claims to be during the handshake.
#[derive(Debug, Clone)]
pub struct Identity {
    pub source_id: String,
    pub source_name: String,
}

/// Open a socket to `url` and send `capture_auth`. The hub does not reply
/// to a successful capture handshake.
pub async fn connect(url: &str, identity: &Identity) -> Result<WsStream, ClientError> {
    let (mut ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(ClientError::Connect)?;

    let auth = ClientMessage::CaptureAuth(CaptureAuthMsg {
        source_id: Some(identity.source_id.clone()),
        source_name: Some(identity.source_name.clone()),
        client_type: Some("capture".to_string()),
    });
    let text = encode_client_message(&auth).map_err(ClientError::Encode)?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(ClientError::Send)?;
    Ok(ws)
}

/// How a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ConnectionLost,
    Shutdown,
}

/// Flush batches from `pipeline` to the hub until the link drops or
/// `shutdown` flips. Hub replies are logged.
pub async fn run_session(
    ws: WsStream,
    identity: &Identity,
    pipeline: &Pipeline,
    config: &PipelineConfig,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    let policy = FlushPolicy::from_config(config);

    let mut poll = tokio::time::interval(config.poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let stats_every = config.stats_interval();
    let mut stats = tokio::time::interval_at(Instant::now() + stats_every, stats_every);
    stats.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_send = Instant::now();

    loop {
        tokio::select! {
            _ = poll.tick() => {
                if !policy.should_flush(last_send.elapsed(), pipeline.buffered()) {
                    continue;
                }
                let batch = pipeline.take_batch();
                if batch.is_empty() {
                    continue;
                }
                let count = batch.len();
                let msg = ClientMessage::PacketData(PacketDataMsg {
                    source_id: identity.source_id.clone(),
                    packets: batch,
                });
                let text = match encode_client_message(&msg) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::warn!(error = %e, count, "Dropping unencodable batch");
                        continue;
                    },
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::debug!(error = %e, "Send failed");
                    return SessionEnd::ConnectionLost;
                }
                last_send = Instant::now();
                tracing::debug!(count, "Sent batch");
            }
            _ = stats.tick() => {
                let s = pipeline.stats();
                tracing::info!(
                    captured = s.captured,
                    skipped = s.skipped,
                    filtered = s.filtered,
                    connections = s.tracked_connections,
                    buffered = s.buffered,
                    "Capture statistics"
                );
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_hub_message(text.as_str()),
                Some(Ok(Message::Close(_))) | None => return SessionEnd::ConnectionLost,
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Receive failed");
                    return SessionEnd::ConnectionLost;
                },
            },
            _ = shutdown.changed() => {
                let _ = sink.close().await;
                return SessionEnd::Shutdown;
            }
        }
    }
}

fn handle_hub_message(text: &str) {
    match decode_server_message(text) {
        Ok(ServerMessage::CaptureStats(s)) => tracing::info!(
            players = s.connected_players,
            active = s.active_players,
            total_bullets = s.total_bullets,
            our_bullets = s.bullets_from_source,
            "Hub statistics"
        ),
        Ok(ServerMessage::Error(e)) => {
            tracing::warn!(code = ?e.code, message = %e.message, "Hub reported an error");
        },
        Ok(other) => tracing::debug!(msg_type = other.message_type().tag(), "Ignoring hub message"),
        Err(e) => tracing::debug!(error = %e, "Undecodable hub message"),
    }
}

/// Wait out `delay` unless shutdown arrives first. Returns false on shutdown.
pub async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    }
}
