//! Client-side mirror of the session the server is running
//!
//! The server is authoritative; the view only records what it last pushed so
//! the client can log a countdown, scores and the outcome.

use serde::Deserialize;
use serde_json::Value;
use shared::protocol::{GAME_CREATED, GAME_JOINED, PLAYER_JOINED};
use shared::{Envelope, MessageKind, Phase};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Multipliers {
    pub cooldown: f32,
    pub speed: f32,
}

impl Default for Multipliers {
    fn default() -> Self {
        Self {
            cooldown: 1.0,
            speed: 1.0,
        }
    }
}

/// Server tick snapshot as received.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView {
    pub remaining_setup_time: f32,
    pub phase: Phase,
    pub multipliers: Multipliers,
    pub scores: BTreeMap<String, u32>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverView {
    pub winner: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub scores: BTreeMap<String, u32>,
    #[serde(default)]
    pub duration_secs: f32,
}

/// What one inbound envelope meant to this client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected(String),
    SessionCreated(String),
    SessionJoined(String),
    OpponentJoined,
    Notice(String),
    Snapshot,
    PacketInjected(Value),
    /// Opponent traffic relayed by the server.
    Relayed(MessageKind),
    Failed { request: String, reason: String },
    GameOver(GameOverView),
    Ignored,
}

#[derive(Debug, Default)]
pub struct SessionView {
    pub player_id: Option<String>,
    pub session_id: Option<String>,
    pub snapshot: Option<SnapshotView>,
    pub notices: Vec<String>,
    pub injected: usize,
    pub opponent_updates: usize,
    pub outcome: Option<GameOverView>,
}

impl SessionView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.snapshot.as_ref().map(|s| s.phase)
    }

    pub fn is_over(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn apply(&mut self, envelope: &Envelope) -> ClientEvent {
        match envelope.kind {
            MessageKind::Connect => match envelope.data.get("playerId").and_then(Value::as_str) {
                Some(id) => {
                    self.player_id = Some(id.to_string());
                    ClientEvent::Connected(id.to_string())
                }
                None => ClientEvent::Ignored,
            },
            MessageKind::CreateGame | MessageKind::JoinGame | MessageKind::AcceptGame => {
                self.apply_reply(envelope)
            }
            MessageKind::Reject => ClientEvent::Failed {
                request: envelope
                    .data
                    .get("request")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                reason: envelope.reason().unwrap_or_default().to_string(),
            },
            MessageKind::Notification => {
                let text = envelope
                    .data
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| envelope.data.to_string());
                self.notices.push(text.clone());
                ClientEvent::Notice(text)
            }
            MessageKind::StateUpdate if envelope.sender_id == shared::SERVER_ID => {
                match serde_json::from_value::<SnapshotView>(envelope.data.clone()) {
                    Ok(snapshot) => {
                        self.snapshot = Some(snapshot);
                        ClientEvent::Snapshot
                    }
                    Err(_) => ClientEvent::Ignored,
                }
            }
            MessageKind::InjectPacket => {
                self.injected += 1;
                ClientEvent::PacketInjected(envelope.data.get("packet").cloned().unwrap_or_default())
            }
            MessageKind::GameOver => {
                match serde_json::from_value::<GameOverView>(envelope.data.clone()) {
                    Ok(outcome) => {
                        self.outcome = Some(outcome.clone());
                        ClientEvent::GameOver(outcome)
                    }
                    Err(_) => ClientEvent::Ignored,
                }
            }
            MessageKind::StateUpdate | MessageKind::Action | MessageKind::ScoreUpdate => {
                self.opponent_updates += 1;
                ClientEvent::Relayed(envelope.kind)
            }
            _ => ClientEvent::Ignored,
        }
    }

    fn apply_reply(&mut self, envelope: &Envelope) -> ClientEvent {
        let session = envelope.session_id.clone().unwrap_or_default();
        match envelope.status_str() {
            Some(GAME_CREATED) => {
                self.session_id = Some(session.clone());
                ClientEvent::SessionCreated(session)
            }
            Some(GAME_JOINED) => {
                self.session_id = Some(session.clone());
                ClientEvent::SessionJoined(session)
            }
            Some(PLAYER_JOINED) => ClientEvent::OpponentJoined,
            _ => ClientEvent::Failed {
                request: envelope.kind.as_str().to_string(),
                reason: envelope.reason().unwrap_or_default().to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::SERVER_ID;

    fn server(kind: MessageKind, session: Option<&str>, data: Value) -> Envelope {
        Envelope::new(kind, SERVER_ID, session.map(str::to_string), data)
    }

    #[test]
    fn test_replies_update_session() {
        let mut view = SessionView::new();

        let event = view.apply(&server(
            MessageKind::Connect,
            None,
            json!({"playerId": "aa-bb"}),
        ));
        assert_eq!(event, ClientEvent::Connected("aa-bb".into()));

        let event = view.apply(&server(MessageKind::CreateGame, Some("0042"), json!(GAME_CREATED)));
        assert_eq!(event, ClientEvent::SessionCreated("0042".into()));
        assert_eq!(view.session_id.as_deref(), Some("0042"));

        let event = view.apply(&server(MessageKind::JoinGame, Some("0042"), json!(PLAYER_JOINED)));
        assert_eq!(event, ClientEvent::OpponentJoined);
    }

    #[test]
    fn test_failure_reply() {
        let mut view = SessionView::new();
        let reply = Envelope::failure(
            MessageKind::JoinGame,
            SERVER_ID,
            Some("G1".into()),
            "GAME_JOIN_FAILED",
            "FULL",
        );

        assert_eq!(
            view.apply(&reply),
            ClientEvent::Failed {
                request: "JOIN_GAME".into(),
                reason: "FULL".into()
            }
        );
        assert!(view.session_id.is_none());
    }

    #[test]
    fn test_snapshot_and_game_over() {
        let mut view = SessionView::new();
        let snapshot = json!({
            "remainingSetupTime": 12.5,
            "phase": "PENALTY_COOLDOWN",
            "multipliers": {"cooldown": 1.02, "speed": 1.0},
            "scores": {"P1": 0, "P2": 0},
            "timestamp": 1
        });
        assert_eq!(
            view.apply(&server(MessageKind::StateUpdate, Some("G1"), snapshot)),
            ClientEvent::Snapshot
        );
        assert_eq!(view.phase(), Some(Phase::PenaltyCooldown));

        let over = json!({
            "sessionId": "G1",
            "winner": "P2",
            "reason": "OPPONENT_LEFT",
            "scores": {"P1": 3, "P2": 9},
            "durationSecs": 4.0,
            "players": []
        });
        let event = view.apply(&server(MessageKind::GameOver, Some("G1"), over));
        assert!(matches!(event, ClientEvent::GameOver(ref o) if o.winner.as_deref() == Some("P2")));
        assert!(view.is_over());
    }

    #[test]
    fn test_opponent_relay_counted() {
        let mut view = SessionView::new();
        let relayed = Envelope::new(MessageKind::StateUpdate, "P2", Some("G1".into()), json!({"n": 1}));

        assert_eq!(view.apply(&relayed), ClientEvent::Relayed(MessageKind::StateUpdate));
        assert_eq!(view.opponent_updates, 1);
        assert!(view.snapshot.is_none());
    }
}
