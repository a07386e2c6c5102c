//! WebSocket wire protocol between the gateway and web clients.
//!
//! Every frame is a JSON text message with a `type` discriminator.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    uuid::Uuid,
};

pub const PROTOCOL_VERSION: u32 = 1;

/// Lifetime of an issued token.
pub const TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// WebSocket close code sent when authentication fails at upgrade.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Close code sent to every session when the gateway shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

pub const CONNECTION_MESSAGE: &str = "Connected to companion gateway";

pub const ACK_RECEIVED: &str = "received";

// ── Server → client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Connection {
        client_id: Uuid,
        message: String,
    },
    Pong {
        timestamp: u64,
    },
    CommandAck {
        command: String,
        status: String,
    },
    Error {
        message: String,
    },
    CompanionUpdate {
        data: Value,
        timestamp: u64,
    },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing these variants cannot fail: all keys are strings.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ── Client → server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Ping,
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        companion_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid JSON frame")]
    NotJson,
    #[error("Missing message type")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid {kind} frame: {reason}")]
    Invalid { kind: String, reason: String },
}

const KNOWN_TYPES: &[&str] = &["ping", "command"];

impl ClientFrame {
    /// Parse an inbound text frame, separating unknown types from malformed
    /// known ones so the client gets a useful error.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(|_| FrameError::NotJson)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?
            .to_string();
        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(FrameError::UnknownType(kind));
        }
        serde_json::from_value(value).map_err(|e| FrameError::Invalid {
            kind,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn server_frames_use_wire_names() {
        let id = Uuid::nil();
        let v: Value = serde_json::from_str(
            &ServerFrame::Connection {
                client_id: id,
                message: "hi".into(),
            }
            .to_json(),
        )
        .unwrap();
        assert_eq!(v["type"], "connection");
        assert_eq!(v["clientId"], id.to_string());

        let ack: Value = serde_json::from_str(
            &ServerFrame::CommandAck {
                command: "follow".into(),
                status: ACK_RECEIVED.into(),
            }
            .to_json(),
        )
        .unwrap();
        assert_eq!(ack, json!({"type": "command_ack", "command": "follow", "status": "received"}));
    }

    #[test]
    fn parses_known_client_frames() {
        assert_eq!(ClientFrame::parse(r#"{"type":"ping"}"#), Ok(ClientFrame::Ping));
        assert_eq!(
            ClientFrame::parse(r#"{"type":"command","command":"stay","companionId":"abc"}"#),
            Ok(ClientFrame::Command {
                command: "stay".into(),
                companion_id: Some("abc".into()),
                payload: None,
            })
        );
    }

    #[test]
    fn classifies_bad_frames() {
        assert_eq!(ClientFrame::parse("nope"), Err(FrameError::NotJson));
        assert_eq!(ClientFrame::parse(r#"{"command":"x"}"#), Err(FrameError::MissingType));
        assert_eq!(
            ClientFrame::parse(r#"{"type":"unknown"}"#),
            Err(FrameError::UnknownType("unknown".into()))
        );
        assert!(matches!(
            ClientFrame::parse(r#"{"type":"command"}"#),
            Err(FrameError::Invalid { .. })
        ));
    }
}
