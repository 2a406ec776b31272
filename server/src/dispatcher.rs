//! Per-connection message dispatcher
//!
//! One [`Dispatcher`] runs for every accepted peer. It reads frames from that
//! peer only, routes them by kind to the registry, the session directory or
//! the peer's session, and answers protocol errors with typed replies. It
//! never holds a lock belonging to another peer: other peers are reached only
//! through [`ConnectionRegistry::send_to`](crate::registry::ConnectionRegistry::send_to).
//!
//! When the loop ends (DISCONNECT, EOF, I/O failure or a shutdown signal from
//! the registry) the teardown runs exactly once: the peer is deregistered and
//! any live session it belonged to is ended in favour of the opponent.

use crate::directory::{CreateError, SessionHandle};
use crate::network::ServerContext;
use crate::registry::RegistryError;
use crate::session::{PlayerInfo, SessionError};
use log::{debug, info, warn};
use serde_json::{json, Value};
use shared::protocol::{GAME_CREATED, GAME_CREATION_FAILED, GAME_JOINED, GAME_JOIN_FAILED, PLAYER_JOINED};
use shared::{Envelope, FrameReader, MessageKind, SERVER_ID};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncRead;
use tokio::sync::Notify;

/// REJECT reasons that do not come from a session.
const NO_SESSION: &str = "NO_SESSION";
const NOT_FOUND: &str = "NOT_FOUND";
const ID_IN_USE: &str = "ID_IN_USE";
const BAD_PAYLOAD: &str = "BAD_PAYLOAD";

pub struct Dispatcher {
    ctx: Arc<ServerContext>,
    peer_id: String,
    display_name: Option<String>,
    session_id: Option<String>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ServerContext>, peer_id: String) -> Self {
        Self {
            ctx,
            peer_id,
            display_name: None,
            session_id: None,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Queues an envelope for this peer. Never blocks.
    pub fn send(&self, envelope: Envelope) {
        if let Err(e) = self.ctx.registry.send_to(&self.peer_id, envelope) {
            debug!("Reply to {} dropped: {}", self.peer_id, e);
        }
    }

    /// Read loop. Runs until the peer leaves or the registry asks it to stop.
    pub async fn run<R>(mut self, mut reader: FrameReader<R>, shutdown: Arc<Notify>)
    where
        R: AsyncRead + Unpin,
    {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("Shutdown requested for {}", self.peer_id);
                    break;
                }
                frame = reader.receive() => match frame {
                    Ok(Some(envelope)) => {
                        self.ctx.registry.touch(&self.peer_id);
                        if !self.handle(envelope).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Peer {} closed the connection", self.peer_id);
                        break;
                    }
                    Err(e) if !e.is_fatal() => {
                        warn!("Discarding frame from {}: {}", self.peer_id, e);
                    }
                    Err(e) => {
                        warn!("Connection to {} failed: {}", self.peer_id, e);
                        break;
                    }
                }
            }
        }

        self.teardown().await;
    }

    /// Routes one envelope. Returns `false` when the peer asked to leave.
    pub async fn handle(&mut self, envelope: Envelope) -> bool {
        match envelope.kind {
            MessageKind::Connect => self.on_connect(envelope).await,
            MessageKind::CreateGame => self.on_create(envelope).await,
            MessageKind::JoinGame | MessageKind::AcceptGame => self.on_join(envelope).await,
            MessageKind::Ready
            | MessageKind::Action
            | MessageKind::StateUpdate
            | MessageKind::ScoreUpdate
            | MessageKind::GameOver
            | MessageKind::Surrender => self.on_session_message(envelope).await,
            MessageKind::Heartbeat => {}
            MessageKind::Disconnect => {
                info!("Peer {} disconnecting", self.peer_id);
                return false;
            }
            MessageKind::Reject | MessageKind::Notification | MessageKind::InjectPacket => {
                debug!(
                    "Ignoring server-only {} from {}",
                    envelope.kind.as_str(),
                    self.peer_id
                );
            }
        }
        true
    }

    async fn on_connect(&mut self, envelope: Envelope) {
        if let Some(name) = envelope.data.get("displayName").and_then(Value::as_str) {
            self.display_name = Some(name.to_string());
        }

        let requested = envelope.sender_id.trim();
        if !requested.is_empty() && requested != self.peer_id {
            if self.current_session().await.is_some() {
                self.send(Envelope::reject(
                    SERVER_ID,
                    None,
                    MessageKind::Connect,
                    CreateError::AlreadyInSession.code(),
                ));
                return;
            }
            match self.ctx.registry.rebind(&self.peer_id, requested) {
                Ok(()) => self.peer_id = requested.to_string(),
                Err(RegistryError::IdInUse(_)) => {
                    debug!("Peer {} asked for taken id {}", self.peer_id, requested);
                    self.send(Envelope::reject(SERVER_ID, None, MessageKind::Connect, ID_IN_USE));
                    return;
                }
                Err(e) => {
                    warn!("Rebinding {} failed: {}", self.peer_id, e);
                    return;
                }
            }
        }

        self.send(Envelope::new(
            MessageKind::Connect,
            SERVER_ID,
            None,
            json!({ "playerId": self.peer_id }),
        ));
    }

    async fn on_create(&mut self, envelope: Envelope) {
        let requested = envelope.session_id;
        if self.current_session().await.is_some() {
            self.send(Envelope::failure(
                MessageKind::CreateGame,
                SERVER_ID,
                requested,
                GAME_CREATION_FAILED,
                CreateError::AlreadyInSession.code(),
            ));
            return;
        }

        let creator = self.player_info();
        let now = Instant::now();
        let created = match &requested {
            Some(id) => self
                .ctx
                .directory
                .create(id, creator, now)
                .map(|_| id.clone()),
            None => self
                .ctx
                .directory
                .create_with_generated_id(creator, now)
                .map(|(id, _)| id),
        };

        match created {
            Ok(session_id) => {
                self.session_id = Some(session_id.clone());
                self.send(Envelope::status(
                    MessageKind::CreateGame,
                    SERVER_ID,
                    Some(session_id),
                    GAME_CREATED,
                ));
            }
            Err(e) => {
                debug!("Create {:?} by {} failed: {}", requested, self.peer_id, e);
                self.send(Envelope::failure(
                    MessageKind::CreateGame,
                    SERVER_ID,
                    requested,
                    GAME_CREATION_FAILED,
                    e.code(),
                ));
            }
        }
    }

    async fn on_join(&mut self, envelope: Envelope) {
        let kind = envelope.kind;
        let Some(session_id) = envelope.session_id else {
            self.send(Envelope::failure(kind, SERVER_ID, None, GAME_JOIN_FAILED, NOT_FOUND));
            return;
        };
        if self.current_session().await.is_some() {
            self.send(Envelope::failure(
                kind,
                SERVER_ID,
                Some(session_id),
                GAME_JOIN_FAILED,
                CreateError::AlreadyInSession.code(),
            ));
            return;
        }

        let joined = self
            .ctx
            .directory
            .join(&session_id, self.player_info(), Instant::now())
            .await;

        match joined {
            Ok(handle) => {
                self.session_id = Some(session_id.clone());
                let creator = handle.lock().await.creator_id().to_string();
                self.send(Envelope::status(
                    kind,
                    SERVER_ID,
                    Some(session_id.clone()),
                    GAME_JOINED,
                ));
                if let Err(e) = self.ctx.registry.send_to(
                    &creator,
                    Envelope::status(kind, SERVER_ID, Some(session_id), PLAYER_JOINED),
                ) {
                    debug!("Could not tell {} about the join: {}", creator, e);
                }
            }
            Err(e) => {
                debug!("Join {} by {} failed: {}", session_id, self.peer_id, e);
                self.send(Envelope::failure(
                    kind,
                    SERVER_ID,
                    Some(session_id),
                    GAME_JOIN_FAILED,
                    e.code(),
                ));
            }
        }
    }

    async fn on_session_message(&mut self, envelope: Envelope) {
        let kind = envelope.kind;
        let Some(session_id) = envelope.session_id else {
            self.send(Envelope::reject(SERVER_ID, None, kind, NO_SESSION));
            return;
        };
        let Some(handle) = self.ctx.directory.get(&session_id) else {
            self.send(Envelope::reject(SERVER_ID, Some(session_id), kind, NOT_FOUND));
            return;
        };

        let score = if kind == MessageKind::ScoreUpdate {
            match parse_score(&envelope.data) {
                Some(score) => Some(score),
                None => {
                    self.send(Envelope::reject(SERVER_ID, Some(session_id), kind, BAD_PAYLOAD));
                    return;
                }
            }
        } else {
            None
        };

        let now = Instant::now();
        let (result, ended) = {
            let mut session = handle.lock().await;
            let peer = self.peer_id.as_str();
            let result: Result<_, SessionError> = match kind {
                MessageKind::Ready => session.set_ready(peer, now),
                MessageKind::Action => session.handle_action(peer, envelope.data),
                MessageKind::StateUpdate => session.relay_state(peer, envelope.data),
                MessageKind::ScoreUpdate => session.apply_score(peer, score.unwrap_or_default()),
                MessageKind::GameOver | MessageKind::Surrender => session.surrender(peer, now),
                _ => Ok(Vec::new()),
            };
            (result, !session.is_active())
        };

        match result {
            Ok(outbound) => self.ctx.registry.deliver(outbound),
            Err(e) => {
                debug!(
                    "{} from {} rejected in {}: {}",
                    kind.as_str(),
                    self.peer_id,
                    session_id,
                    e
                );
                self.send(Envelope::reject(
                    SERVER_ID,
                    Some(session_id.clone()),
                    kind,
                    e.code(),
                ));
            }
        }

        if ended {
            self.ctx.retire_session(&session_id).await;
        }
    }

    /// The session this peer still plays in, forgetting it once it has ended.
    async fn current_session(&mut self) -> Option<SessionHandle> {
        let handle = self.ctx.directory.get(self.session_id.as_deref()?);
        let active = match &handle {
            Some(handle) => handle.lock().await.is_active(),
            None => false,
        };
        if active {
            handle
        } else {
            self.session_id = None;
            None
        }
    }

    fn player_info(&self) -> PlayerInfo {
        PlayerInfo::new(&self.peer_id, self.display_name.as_deref())
    }

    async fn teardown(&mut self) {
        self.ctx.registry.remove(&self.peer_id);

        let Some(session_id) = self.session_id.take() else {
            return;
        };
        let Some(handle) = self.ctx.directory.get(&session_id) else {
            return;
        };

        let (outbound, ended) = {
            let mut session = handle.lock().await;
            let outbound = session.player_left(&self.peer_id, Instant::now());
            (outbound, !session.is_active())
        };
        self.ctx.registry.deliver(outbound);
        if ended {
            self.ctx.retire_session(&session_id).await;
        }
    }
}

/// Accepts `{"score": n}` or a bare number.
fn parse_score(data: &Value) -> Option<u32> {
    data.get("score")
        .unwrap_or(data)
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
}
