use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::messages::{ClientMessage, MessageType, ServerMessage};

/// Default hub WebSocket port.
pub const DEFAULT_HUB_PORT: u16 = 8766;

/// Maximum accepted text frame size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    PayloadTooLarge(usize),
    /// Text was not a JSON object.
    MalformedJson(String),
    MissingType,
    UnknownMessageType(String),
    /// Known tag, but it flows in the other direction.
    WrongDirection(MessageType),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::MalformedJson(e) => write!(f, "malformed json: {e}"),
            Self::MissingType => write!(f, "message has no type field"),
            Self::UnknownMessageType(t) => write!(f, "unknown message type: {t:?}"),
            Self::WrongDirection(t) => write!(f, "unexpected message type: {}", t.tag()),
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }
    Ok(text)
}

/// Encode a `ClientMessage` to a JSON text frame.
pub fn encode_client_message(msg: &ClientMessage) -> Result<String, ProtocolError> {
    encode(msg)
}

/// Encode a `ServerMessage` to a JSON text frame.
///
/// Server frames are not size-capped: a full `game_state` with the bullet
/// limit reached can exceed the inbound limit.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))
}

/// Parse a text frame and peek at its `type` tag.
pub fn decode_message_type(text: &str) -> Result<(MessageType, Value), ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;
    if !value.is_object() {
        return Err(ProtocolError::MalformedJson("expected a JSON object".into()));
    }
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    let msg_type =
        MessageType::from_tag(tag).ok_or_else(|| ProtocolError::UnknownMessageType(tag.into()))?;
    Ok((msg_type, value))
}

fn decode_payload<T: DeserializeOwned>(value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode a text frame sent by an agent or game client.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let (msg_type, value) = decode_message_type(text)?;
    if !msg_type.is_client() {
        return Err(ProtocolError::WrongDirection(msg_type));
    }
    decode_payload(value)
}

/// Decode a text frame sent by the hub.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    let (msg_type, value) = decode_message_type(text)?;
    if msg_type.is_client() {
        return Err(ProtocolError::WrongDirection(msg_type));
    }
    decode_payload(value)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::ids::{BulletId, SessionId};
    use crate::net::messages::*;
    use crate::packet::Protocol;

    #[test]
    fn decode_capture_auth() {
        let msg = decode_client_message(
            r#"{"type":"capture_auth","source_id":"capture_1","source_name":"lab","client_type":"capture"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::CaptureAuth(m) => {
                assert_eq!(m.source_id.as_deref(), Some("capture_1"));
                assert_eq!(m.source_name.as_deref(), Some("lab"));
            },
            other => panic!("expected CaptureAuth, got {other:?}"),
        }
    }

    #[test]
    fn game_auth_defaults_to_player_mode() {
        let msg = decode_client_message(r#"{"type":"game_auth"}"#).unwrap();
        assert_eq!(msg, ClientMessage::GameAuth(GameAuthMsg::default()));

        let msg = decode_client_message(r#"{"type":"game_auth","mode":"spectator"}"#).unwrap();
        match msg {
            ClientMessage::GameAuth(m) => assert_eq!(m.mode, GameMode::Spectator),
            other => panic!("expected GameAuth, got {other:?}"),
        }
    }

    #[test]
    fn packet_data_tolerates_unknown_protocol() {
        let msg = decode_client_message(
            r#"{"type":"packet_data","source_id":"s","packets":[
                {"protocol":"TCP","src_ip":"10.0.0.1","dst_ip":"10.0.0.2","src_port":5000,"dst_port":443,"size":60},
                {"protocol":"GRE","size":10}
            ]}"#,
        )
        .unwrap();
        let ClientMessage::PacketData(data) = msg else {
            panic!("expected PacketData");
        };
        assert_eq!(data.packets.len(), 2);
        assert_eq!(data.packets[0].protocol, Protocol::Tcp);
        assert_eq!(data.packets[0].dst_port, Some(443));
        assert_eq!(data.packets[1].protocol, Protocol::Unknown);
        assert_eq!(data.packets[1].src_ip, None);
    }

    #[test]
    fn bad_record_does_not_sink_the_batch() {
        let good = r#"{"protocol":"TCP","src_ip":"10.0.0.1","dst_ip":"10.0.0.2","src_port":443,"dst_port":54321,"size":60}"#;
        for bad in [
            r#"{"protocol":"TCP","src_ip":"999.1.1.1","dst_port":8080}"#,
            r#"{"protocol":null,"dst_port":8080}"#,
            r#"{"protocol":"UDP","dst_port":70000}"#,
            r#""not a record""#,
        ] {
            let text = format!(r#"{{"type":"packet_data","source_id":"s","packets":[{good},{bad}]}}"#);
            let Ok(ClientMessage::PacketData(data)) = decode_client_message(&text) else {
                panic!("batch with {bad} failed to decode");
            };
            assert_eq!(data.packets[0].dst_port, Some(54321), "{bad}");
            assert!(data.packets.len() <= 2);
        }
    }

    #[test]
    fn player_move_with_partial_coordinates() {
        let msg = decode_client_message(r#"{"type":"player_move","x":120.5}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::PlayerMove(PlayerMoveMsg {
                x: Some(120.5),
                y: None
            })
        );
    }

    #[test]
    fn player_graze_without_fields() {
        let msg = decode_client_message(r#"{"type":"player_graze"}"#).unwrap();
        assert_eq!(msg.message_type(), MessageType::PlayerGraze);
    }

    #[test]
    fn game_control_keeps_unknown_action() {
        let msg = decode_client_message(r#"{"type":"game_control","action":"pause"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::GameControl(GameControlMsg {
                action: ControlAction::Other("pause".into())
            })
        );
        let msg = decode_client_message(r#"{"type":"game_control","action":"restart"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::GameControl(GameControlMsg {
                action: ControlAction::Restart
            })
        );
    }

    #[test]
    fn unknown_type_is_distinct_error() {
        let err = decode_client_message(r#"{"type":"teleport"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(ref t) if t == "teleport"));
    }

    #[test]
    fn malformed_and_missing_type() {
        assert!(matches!(
            decode_client_message("{not json").unwrap_err(),
            ProtocolError::MalformedJson(_)
        ));
        assert!(matches!(
            decode_client_message("[1,2,3]").unwrap_err(),
            ProtocolError::MalformedJson(_)
        ));
        assert!(matches!(
            decode_client_message(r#"{"source_id":"x"}"#).unwrap_err(),
            ProtocolError::MissingType
        ));
        assert!(matches!(
            decode_client_message("").unwrap_err(),
            ProtocolError::EmptyMessage
        ));
    }

    #[test]
    fn server_tag_rejected_by_client_decoder() {
        let err = decode_client_message(r#"{"type":"game_state"}"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::WrongDirection(MessageType::GameState)
        ));
    }

    #[test]
    fn oversized_frame_rejected() {
        let text = format!(
            r#"{{"type":"chat","message":"{}"}}"#,
            "a".repeat(MAX_MESSAGE_SIZE)
        );
        assert!(matches!(
            decode_client_message(&text).unwrap_err(),
            ProtocolError::PayloadTooLarge(_)
        ));
    }

    #[test]
    fn error_message_wire_shape() {
        let text = encode_server_message(&ServerMessage::Error(ErrorMsg::new(
            ErrorCode::AuthTimeout,
            "Authentication timeout",
        )))
        .unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["code"], "AUTH_TIMEOUT");
        assert_eq!(v["message"], "Authentication timeout");
    }

    #[test]
    fn player_event_wire_shape() {
        let text = encode_server_message(&ServerMessage::PlayerEvent(PlayerEventMsg {
            event: PlayerEventKind::Respawn,
            player: PlayerSummary {
                id: SessionId(4),
                name: "ada".into(),
                avatar: "cat".into(),
            },
        }))
        .unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "player_event");
        assert_eq!(v["event"], "respawn");
        assert_eq!(v["player"]["id"], "client_4");
    }

    #[test]
    fn game_state_keys_players_by_session() {
        let mut players = BTreeMap::new();
        players.insert(
            SessionId(1),
            PlayerView {
                name: "Player client_1".into(),
                x: 400.0,
                y: 500.0,
                alive: true,
                hp: 3,
                score: 0,
                graze_count: 0,
                avatar: "default".into(),
                invulnerable: false,
                death_time: None,
            },
        );
        let state = GameStateMsg {
            timestamp: 1_700_000_000_000,
            players,
            bullets: vec![BulletView {
                id: BulletId(9),
                x: 10.0,
                y: 0.0,
                vx: 0.0,
                vy: 120.0,
                size: 4.0,
                protocol: Protocol::Udp,
                source: "capture_a".into(),
                source_name: "lab".into(),
                port: 53,
                color: "#4444FF".into(),
            }],
            capture_sources: BTreeMap::new(),
        };
        let text = encode_server_message(&ServerMessage::GameState(Box::new(state.clone()))).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "game_state");
        assert_eq!(v["players"]["client_1"]["hp"], 3);
        assert_eq!(v["bullets"][0]["id"], "b_9");
        assert_eq!(v["bullets"][0]["protocol"], "UDP");

        match decode_server_message(&text).unwrap() {
            ServerMessage::GameState(back) => assert_eq!(*back, state),
            other => panic!("expected GameState, got {other:?}"),
        }
    }

    #[test]
    fn client_message_encodes_type_tag() {
        let text = encode_client_message(&ClientMessage::CaptureAuth(CaptureAuthMsg {
            source_id: Some("capture_x".into()),
            source_name: None,
            client_type: Some("capture".into()),
        }))
        .unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "capture_auth");
        assert!(v.get("source_name").is_none());
    }

    #[test]
    fn message_type_tags_round_trip() {
        for t in MessageType::ALL {
            assert_eq!(MessageType::from_tag(t.tag()), Some(t));
        }
        assert_eq!(MessageType::from_tag("GAME_STATE"), None);
    }

    #[test]
    fn only_auth_tags_are_auth() {
        let auth: Vec<_> = MessageType::ALL.into_iter().filter(|t| t.is_auth()).collect();
        assert_eq!(auth, [MessageType::CaptureAuth, MessageType::GameAuth]);
    }
}
