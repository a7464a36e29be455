use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use packetfall_core::ids::SessionId;
use packetfall_core::net::messages::{
    AuthSuccessMsg, CaptureAuthMsg, ClientMessage, GameAuthMsg, GameMode, ServerMessage,
};
use packetfall_core::net::protocol::{decode_server_message, encode_client_message};

use packetfall_hub::build_app;
use packetfall_hub::config::HubConfig;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a hub on an ephemeral port with discovery disabled.
    pub async fn new() -> Self {
        Self::from_config(HubConfig::default()).await
    }

    pub async fn from_config(mut config: HubConfig) -> Self {
        config.discovery.enabled = false;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, _state) = build_app(config);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _shutdown: handle,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub fn hub_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Plain HTTP GET; returns the response body.
    pub async fn http_get(&self, path: &str) -> String {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = String::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut raw))
            .await
            .expect("Timed out reading HTTP response")
            .unwrap();
        assert!(raw.starts_with("HTTP/1.1 200"), "unexpected response: {raw}");
        raw.split("\r\n\r\n").nth(1).unwrap_or_default().to_string()
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn ws_send_client_msg(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Text(encoded.into())).await.unwrap();
}

pub async fn ws_send_text(stream: &mut WsStream, text: &str) {
    stream.send(Message::Text(text.into())).await.unwrap();
}

/// Read the next text frame (5s timeout).
pub async fn ws_read_raw(stream: &mut WsStream) -> String {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let text = ws_read_raw(stream).await;
    decode_server_message(&text).unwrap()
}

/// Next message that is not a periodic `game_state` snapshot.
pub async fn ws_read_event(stream: &mut WsStream) -> ServerMessage {
    loop {
        match ws_read_server_msg(stream).await {
            ServerMessage::GameState(_) => continue,
            other => return other,
        }
    }
}

/// Read until a `game_state` satisfying `pred` arrives (5s overall).
pub async fn ws_read_state_until(
    stream: &mut WsStream,
    pred: impl Fn(&packetfall_core::net::messages::GameStateMsg) -> bool,
) -> packetfall_core::net::messages::GameStateMsg {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            if let ServerMessage::GameState(state) = ws_read_server_msg(stream).await
                && pred(&state)
            {
                return *state;
            }
        }
    })
    .await
    .expect("Timed out waiting for matching game_state")
}

/// Non-snapshot message within `timeout_ms`, or `None`.
pub async fn ws_try_read_event(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerMessage> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), ws_read_event(stream))
        .await
        .ok()
}

/// Wait for the server to close the socket (5s timeout).
pub async fn ws_expect_closed(stream: &mut WsStream) {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for close");
}

/// Authenticate as a player; returns the `auth_success` payload.
pub async fn ws_join_player(stream: &mut WsStream, name: &str) -> AuthSuccessMsg {
    let msg = ClientMessage::GameAuth(GameAuthMsg {
        mode: GameMode::Player,
        player_name: Some(name.to_string()),
        avatar: None,
    });
    ws_send_client_msg(stream, &msg).await;
    match ws_read_server_msg(stream).await {
        ServerMessage::AuthSuccess(auth) => auth,
        other => panic!("Expected AuthSuccess, got: {other:?}"),
    }
}

pub async fn ws_join_spectator(stream: &mut WsStream) -> SessionId {
    let msg = ClientMessage::GameAuth(GameAuthMsg {
        mode: GameMode::Spectator,
        ..GameAuthMsg::default()
    });
    ws_send_client_msg(stream, &msg).await;
    match ws_read_server_msg(stream).await {
        ServerMessage::AuthSuccess(auth) => auth.player_id,
        other => panic!("Expected AuthSuccess, got: {other:?}"),
    }
}

/// Authenticate as a capture agent. The hub sends nothing back.
pub async fn ws_join_capture(stream: &mut WsStream, source_id: &str, name: &str) {
    let msg = ClientMessage::CaptureAuth(CaptureAuthMsg {
        source_id: Some(source_id.to_string()),
        source_name: Some(name.to_string()),
        client_type: Some("capture".to_string()),
    });
    ws_send_client_msg(stream, &msg).await;
}
