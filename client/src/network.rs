use crate::view::{ClientEvent, GameOverView, SessionView};
use log::{debug, info, warn};
use serde_json::{json, Value};
use shared::{Connection, Envelope, MessageKind, TransportError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, sleep_until, Instant};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{request} refused: {reason}")]
    Refused { request: String, reason: String },
    #[error("server closed the connection")]
    Closed,
    #[error("invalid server address {0}")]
    BadAddress(String),
}

/// Splits `host:port`, accepting bracketed IPv6 hosts.
pub fn parse_server_addr(addr: &str) -> Result<(String, u16), ClientError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| ClientError::BadAddress(addr.to_string()))?;
    let port = port
        .parse()
        .map_err(|_| ClientError::BadAddress(addr.to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ClientError::BadAddress(addr.to_string()));
    }
    Ok((host.to_string(), port))
}

/// Headless peer: one connection, one session, logging everything the
/// server pushes.
pub struct GameClient {
    connection: Connection,
    view: SessionView,
}

impl GameClient {
    /// Connects and binds the connection to `player_id`, or keeps the
    /// server-assigned id when none is given.
    pub async fn connect(
        server: &str,
        player_id: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<Self, ClientError> {
        let (host, port) = parse_server_addr(server)?;
        info!("Connecting to {}:{}", host, port);
        let connection = Connection::open(&host, port).await?;
        let mut client = Self {
            connection,
            view: SessionView::new(),
        };

        let data = match display_name {
            Some(name) => json!({ "displayName": name }),
            None => Value::Null,
        };
        client
            .send(MessageKind::Connect, player_id.unwrap_or_default(), None, data)
            .await?;
        client.await_reply(MessageKind::Connect).await?;
        info!("Connected as {}", client.player_id());
        Ok(client)
    }

    pub fn player_id(&self) -> &str {
        self.view.player_id.as_deref().unwrap_or_default()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.view.session_id.as_deref()
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    /// Creates a session; the server picks a code when `session_id` is `None`.
    pub async fn create(&mut self, session_id: Option<&str>) -> Result<String, ClientError> {
        let sender = self.player_id().to_string();
        self.send(
            MessageKind::CreateGame,
            &sender,
            session_id.map(str::to_string),
            Value::Null,
        )
        .await?;
        match self.await_reply(MessageKind::CreateGame).await? {
            ClientEvent::SessionCreated(id) => Ok(id),
            other => Err(refusal(MessageKind::CreateGame, other)),
        }
    }

    pub async fn join(&mut self, session_id: &str) -> Result<String, ClientError> {
        let sender = self.player_id().to_string();
        self.send(
            MessageKind::JoinGame,
            &sender,
            Some(session_id.to_string()),
            Value::Null,
        )
        .await?;
        match self.await_reply(MessageKind::JoinGame).await? {
            ClientEvent::SessionJoined(id) => Ok(id),
            other => Err(refusal(MessageKind::JoinGame, other)),
        }
    }

    pub async fn ready(&mut self) -> Result<(), ClientError> {
        self.session_message(MessageKind::Ready, Value::Null).await
    }

    pub async fn report_score(&mut self, score: u32) -> Result<(), ClientError> {
        self.session_message(MessageKind::ScoreUpdate, json!({ "score": score }))
            .await
    }

    pub async fn surrender(&mut self) -> Result<(), ClientError> {
        self.session_message(MessageKind::Surrender, Value::Null).await
    }

    pub async fn disconnect(mut self) {
        let sender = self.player_id().to_string();
        if let Err(e) = self
            .send(MessageKind::Disconnect, &sender, None, Value::Null)
            .await
        {
            debug!("Disconnect notice not sent: {}", e);
        }
        self.connection.close().await;
    }

    /// Next inbound envelope, applied to the view.
    pub async fn next_event(&mut self) -> Result<ClientEvent, ClientError> {
        loop {
            match self.connection.receive().await {
                Ok(Some(envelope)) => return Ok(self.view.apply(&envelope)),
                Ok(None) => return Err(ClientError::Closed),
                Err(e) if !e.is_fatal() => warn!("Discarding frame: {}", e),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Plays out the session: signals ready after `ready_after` (if given),
    /// sends heartbeats, logs pushes and returns the outcome.
    pub async fn run(
        &mut self,
        ready_after: Option<Duration>,
        heartbeat: Duration,
    ) -> Result<GameOverView, ClientError> {
        let mut heartbeat_timer = interval(heartbeat);
        let mut ready_at = ready_after.map(|delay| Instant::now() + delay);

        loop {
            tokio::select! {
                event = self.next_event() => {
                    let event = event?;
                    log_event(&event, &self.view);
                    if let ClientEvent::GameOver(outcome) = event {
                        return Ok(outcome);
                    }
                }
                _ = sleep_until(ready_at.unwrap_or_else(Instant::now)), if ready_at.is_some() => {
                    ready_at = None;
                    info!("Signalling ready");
                    self.ready().await?;
                }
                _ = heartbeat_timer.tick() => {
                    let sender = self.player_id().to_string();
                    self.send(MessageKind::Heartbeat, &sender, None, Value::Null).await?;
                }
            }
        }
    }

    async fn session_message(&mut self, kind: MessageKind, data: Value) -> Result<(), ClientError> {
        let sender = self.player_id().to_string();
        let session = self.view.session_id.clone();
        self.send(kind, &sender, session, data).await
    }

    async fn send(
        &mut self,
        kind: MessageKind,
        sender: &str,
        session_id: Option<String>,
        data: Value,
    ) -> Result<(), ClientError> {
        let envelope = Envelope::new(kind, sender, session_id, data);
        self.connection.send(&envelope).await?;
        Ok(())
    }

    /// Waits for the reply to `request`, applying any pushes that arrive first.
    async fn await_reply(&mut self, request: MessageKind) -> Result<ClientEvent, ClientError> {
        loop {
            let event = self.next_event().await?;
            match &event {
                ClientEvent::Connected(_) if request == MessageKind::Connect => return Ok(event),
                ClientEvent::SessionCreated(_) | ClientEvent::SessionJoined(_) => return Ok(event),
                ClientEvent::Failed { request: failed, .. } if failed == request.as_str() => {
                    return Err(refusal(request, event))
                }
                _ => log_event(&event, &self.view),
            }
        }
    }
}

fn refusal(request: MessageKind, event: ClientEvent) -> ClientError {
    match event {
        ClientEvent::Failed { request, reason } => ClientError::Refused { request, reason },
        other => ClientError::Refused {
            request: request.as_str().to_string(),
            reason: format!("unexpected reply {:?}", other),
        },
    }
}

fn log_event(event: &ClientEvent, view: &SessionView) {
    match event {
        ClientEvent::Snapshot => {
            if let Some(snapshot) = &view.snapshot {
                debug!(
                    "{:?}: {:.1}s setup left, scores {:?}, speed x{:.2}",
                    snapshot.phase,
                    snapshot.remaining_setup_time,
                    snapshot.scores,
                    snapshot.multipliers.speed
                );
            }
        }
        ClientEvent::Notice(text) => info!("Server: {}", text),
        ClientEvent::OpponentJoined => info!("Opponent joined"),
        ClientEvent::PacketInjected(packet) => warn!("Penalty packet injected: {}", packet),
        ClientEvent::Relayed(kind) => debug!("Opponent sent {}", kind.as_str()),
        ClientEvent::Failed { request, reason } => warn!("{} rejected: {}", request, reason),
        ClientEvent::GameOver(outcome) => info!(
            "Game over ({}), winner {:?}, scores {:?}",
            outcome.reason, outcome.winner, outcome.scores
        ),
        ClientEvent::Connected(_)
        | ClientEvent::SessionCreated(_)
        | ClientEvent::SessionJoined(_)
        | ClientEvent::Ignored => {}
    }
}
