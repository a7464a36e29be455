use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::extract::{ConnectInfo, FromRequest, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use packetfall_core::ids::SessionId;
use packetfall_core::net::messages::{
    ClientMessage, ErrorCode, ErrorMsg, MessageType, ServerMessage,
};
use packetfall_core::net::protocol::{ProtocolError, decode_client_message, encode_server_message};

use crate::hub::{GameInput, HubCommand};
use crate::rate_limit::MessageBudget;
use crate::state::{AppState, ConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<axum::response::Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    // Oversized frames fail the read and end the session.
    let max_bytes = state.config.limits.max_message_bytes;
    let ws = WebSocketUpgrade::from_request(request, &state)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
        .max_message_size(max_bytes)
        .max_frame_size(max_bytes);

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, ip))
        .into_response())
}

/// Which kind of peer completed the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerKind {
    Capture,
    Game,
}

/// Map a failed handshake decode onto the error code sent back.
fn handshake_error(err: &ProtocolError) -> ErrorCode {
    match err {
        ProtocolError::EmptyMessage
        | ProtocolError::PayloadTooLarge(_)
        | ProtocolError::MalformedJson(_) => ErrorCode::InvalidMessage,
        ProtocolError::MissingType
        | ProtocolError::UnknownMessageType(_)
        | ProtocolError::WrongDirection(_)
        | ProtocolError::SerializeError(_)
        | ProtocolError::DeserializeError(_) => ErrorCode::InvalidAuth,
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, remote_ip: IpAddr) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let session_id = state.alloc_session_id();

    // First message must authenticate within the timeout.
    let first = match tokio::time::timeout(
        state.config.limits.auth_timeout(),
        ws_receiver.next(),
    )
    .await
    {
        Err(_) => {
            tracing::info!(%session_id, %remote_ip, "Authentication timeout");
            reject(&mut ws_sender, ErrorCode::AuthTimeout, "Authentication timeout").await;
            return;
        },
        Ok(None | Some(Err(_))) => return,
        Ok(Some(Ok(msg))) => msg,
    };

    let text = match first {
        Message::Text(t) => t,
        Message::Close(_) => return,
        _ => {
            reject(&mut ws_sender, ErrorCode::InvalidMessage, "Expected a text frame").await;
            return;
        },
    };

    let (tx, rx) = mpsc::channel::<Utf8Bytes>(state.config.limits.outbound_queue);
    let (kind, cmd) = match decode_client_message(text.as_str()) {
        Ok(ClientMessage::CaptureAuth(auth)) => (
            PeerKind::Capture,
            HubCommand::CaptureJoined {
                session_id,
                auth,
                remote_ip,
                sender: tx,
            },
        ),
        Ok(ClientMessage::GameAuth(auth)) => (
            PeerKind::Game,
            HubCommand::GameJoined {
                session_id,
                auth,
                sender: tx,
            },
        ),
        Ok(other) => {
            tracing::debug!(%session_id, msg_type = other.message_type().tag(), "Handshake with non-auth message");
            reject(&mut ws_sender, ErrorCode::InvalidAuth, "Invalid authentication").await;
            return;
        },
        Err(e) => {
            tracing::debug!(%session_id, error = %e, "Handshake decode failed");
            let code = handshake_error(&e);
            let message = match code {
                ErrorCode::InvalidMessage => "Invalid message format",
                _ => "Invalid authentication",
            };
            reject(&mut ws_sender, code, message).await;
            return;
        },
    };

    if state.hub_tx.send(cmd).await.is_err() {
        tracing::warn!(%session_id, "Hub task is gone, dropping connection");
        return;
    }

    spawn_writer(ws_sender, rx);

    match kind {
        PeerKind::Capture => capture_read_loop(&mut ws_receiver, &state, session_id).await,
        PeerKind::Game => game_read_loop(&mut ws_receiver, &state, session_id).await,
    }

    // Removal is idempotent on the hub side.
    let _ = state
        .hub_tx
        .send(HubCommand::Disconnect { session_id })
        .await;
    tracing::debug!(%session_id, ?kind, "Connection closed");
}

/// Send an `error` message and close the socket.
async fn reject(
    ws_sender: &mut SplitSink<WebSocket, Message>,
    code: ErrorCode,
    message: &str,
) {
    let msg = ServerMessage::Error(ErrorMsg::new(code, message));
    if let Ok(text) = encode_server_message(&msg)
        && let Err(e) = ws_sender.send(Message::Text(text.into())).await
    {
        tracing::debug!(error = %e, "Failed to send handshake error");
    }
    let _ = ws_sender.close().await;
}

fn spawn_writer(mut ws_sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Utf8Bytes>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });
}

/// Pull the next text frame, skipping control frames. `None` on close or
/// a transport error.
async fn next_text(ws_receiver: &mut SplitStream<WebSocket>) -> Option<Utf8Bytes> {
    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(t)) => return Some(t),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "WebSocket read failed");
                return None;
            },
        }
    }
    None
}

fn log_ignored(session_id: SessionId, msg_type: MessageType, peer: &str) {
    if msg_type.is_auth() {
        tracing::debug!(%session_id, msg_type = msg_type.tag(), "Ignoring repeated authentication");
    } else {
        tracing::debug!(%session_id, msg_type = msg_type.tag(), peer, "Ignoring message");
    }
}

async fn capture_read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    session_id: SessionId,
) {
    while let Some(text) = next_text(ws_receiver).await {
        match decode_client_message(text.as_str()) {
            Ok(ClientMessage::PacketData(data)) => {
                let cmd = HubCommand::PacketData {
                    session_id,
                    packets: data.packets,
                };
                if state.hub_tx.send(cmd).await.is_err() {
                    break;
                }
            },
            Ok(other) => log_ignored(session_id, other.message_type(), "capture"),
            Err(e) => {
                tracing::debug!(%session_id, error = %e, "Skipping undecodable message");
            },
        }
    }
}

fn to_game_input(msg: ClientMessage) -> Option<GameInput> {
    match msg {
        ClientMessage::PlayerMove(m) => Some(GameInput::Move { x: m.x, y: m.y }),
        ClientMessage::PlayerHit(m) => Some(GameInput::Hit {
            bullet_id: m.bullet_id,
        }),
        ClientMessage::PlayerGraze(_) => Some(GameInput::Graze),
        ClientMessage::GameControl(m) => Some(GameInput::Control(m.action)),
        ClientMessage::Chat(m) => Some(GameInput::Chat(m.message)),
        ClientMessage::CaptureAuth(_) | ClientMessage::GameAuth(_) | ClientMessage::PacketData(_) => {
            None
        },
    }
}

async fn game_read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    session_id: SessionId,
) {
    let mut budget = MessageBudget::from_limits(&state.config.limits, Instant::now());

    while let Some(text) = next_text(ws_receiver).await {
        if !budget.try_spend(Instant::now()) {
            tracing::warn!(%session_id, "Rate limited");
            continue;
        }

        let msg = match decode_client_message(text.as_str()) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(%session_id, error = %e, "Skipping undecodable message");
                continue;
            },
        };
        let msg_type = msg.message_type();
        let Some(input) = to_game_input(msg) else {
            log_ignored(session_id, msg_type, "game");
            continue;
        };

        if state
            .hub_tx
            .send(HubCommand::GameInput { session_id, input })
            .await
            .is_err()
        {
            break;
        }
    }
}
