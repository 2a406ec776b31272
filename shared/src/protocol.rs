//! Envelope and message kinds exchanged between clients and the server
//!
//! Every frame on the wire is one [`Envelope`]. The `data` payload is opaque
//! JSON whose shape depends on `type`; request replies reuse the request's
//! kind and carry one of the literal status strings defined here.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

pub const GAME_CREATED: &str = "GAME_CREATED";
pub const GAME_CREATION_FAILED: &str = "GAME_CREATION_FAILED";
pub const GAME_JOINED: &str = "GAME_JOINED";
pub const GAME_JOIN_FAILED: &str = "GAME_JOIN_FAILED";
pub const PLAYER_JOINED: &str = "PLAYER_JOINED";
pub const REJECTED: &str = "REJECTED";

pub const GAME_STARTING: &str = "Game starting!";
pub const OPPONENT_READY: &str = "Opponent ready";

/// Closed set of message kinds. Unknown `type` strings fail to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Connect,
    Disconnect,
    CreateGame,
    JoinGame,
    /// Alias of `JoinGame` kept for clients that accept an invitation code.
    AcceptGame,
    Reject,
    Ready,
    Action,
    StateUpdate,
    ScoreUpdate,
    GameOver,
    Surrender,
    Notification,
    InjectPacket,
    Heartbeat,
}

impl MessageKind {
    /// Kinds that only make sense inside a session.
    pub fn is_session_scoped(self) -> bool {
        matches!(
            self,
            MessageKind::Ready
                | MessageKind::Action
                | MessageKind::StateUpdate
                | MessageKind::ScoreUpdate
                | MessageKind::GameOver
                | MessageKind::Surrender
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Connect => "CONNECT",
            MessageKind::Disconnect => "DISCONNECT",
            MessageKind::CreateGame => "CREATE_GAME",
            MessageKind::JoinGame => "JOIN_GAME",
            MessageKind::AcceptGame => "ACCEPT_GAME",
            MessageKind::Reject => "REJECT",
            MessageKind::Ready => "READY",
            MessageKind::Action => "ACTION",
            MessageKind::StateUpdate => "STATE_UPDATE",
            MessageKind::ScoreUpdate => "SCORE_UPDATE",
            MessageKind::GameOver => "GAME_OVER",
            MessageKind::Surrender => "SURRENDER",
            MessageKind::Notification => "NOTIFICATION",
            MessageKind::InjectPacket => "INJECT_PACKET",
            MessageKind::Heartbeat => "HEARTBEAT",
        }
    }
}

/// Single wire unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "playerId")]
    pub sender_id: String,
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "non_empty"
    )]
    pub session_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

impl Envelope {
    pub fn new(
        kind: MessageKind,
        sender_id: impl Into<String>,
        session_id: Option<String>,
        data: Value,
    ) -> Self {
        Self {
            kind,
            sender_id: sender_id.into(),
            session_id,
            data,
        }
    }

    /// Success reply carrying one of the literal status strings.
    pub fn status(
        kind: MessageKind,
        sender_id: impl Into<String>,
        session_id: Option<String>,
        status: &str,
    ) -> Self {
        Self::new(kind, sender_id, session_id, Value::String(status.to_string()))
    }

    /// Failure reply: `{"status": ..., "reason": ...}`.
    pub fn failure(
        kind: MessageKind,
        sender_id: impl Into<String>,
        session_id: Option<String>,
        status: &str,
        reason: &str,
    ) -> Self {
        Self::new(
            kind,
            sender_id,
            session_id,
            json!({ "status": status, "reason": reason }),
        )
    }

    /// Protocol-level rejection of a valid frame sent in the wrong context.
    pub fn reject(
        sender_id: impl Into<String>,
        session_id: Option<String>,
        request: MessageKind,
        reason: &str,
    ) -> Self {
        Self::new(
            MessageKind::Reject,
            sender_id,
            session_id,
            json!({ "status": REJECTED, "request": request.as_str(), "reason": reason }),
        )
    }

    /// Reads the reply status from either reply shape.
    pub fn status_str(&self) -> Option<&str> {
        match &self.data {
            Value::String(s) => Some(s),
            Value::Object(map) => map.get("status").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.data.get("reason").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&MessageKind::CreateGame).unwrap();
        assert_eq!(json, "\"CREATE_GAME\"");
        assert_eq!(MessageKind::InjectPacket.as_str(), "INJECT_PACKET");

        let kind: MessageKind = serde_json::from_str("\"STATE_UPDATE\"").unwrap();
        assert_eq!(kind, MessageKind::StateUpdate);
    }

    #[test]
    fn test_session_scoped_kinds() {
        assert!(MessageKind::Ready.is_session_scoped());
        assert!(MessageKind::Action.is_session_scoped());
        assert!(!MessageKind::CreateGame.is_session_scoped());
        assert!(!MessageKind::Heartbeat.is_session_scoped());
    }

    #[test]
    fn test_status_reply_shapes() {
        let ok = Envelope::status(MessageKind::CreateGame, "server", None, GAME_CREATED);
        assert_eq!(ok.status_str(), Some(GAME_CREATED));
        assert_eq!(ok.reason(), None);

        let failed = Envelope::failure(
            MessageKind::JoinGame,
            "server",
            Some("0042".into()),
            GAME_JOIN_FAILED,
            "FULL",
        );
        assert_eq!(failed.status_str(), Some(GAME_JOIN_FAILED));
        assert_eq!(failed.reason(), Some("FULL"));
    }

    #[test]
    fn test_reject_names_request() {
        let env = Envelope::reject("server", None, MessageKind::Ready, "NO_SESSION");
        assert_eq!(env.kind, MessageKind::Reject);
        assert_eq!(env.data["request"], "READY");
        assert_eq!(env.reason(), Some("NO_SESSION"));
    }
}
