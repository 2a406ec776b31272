//! Session directory: the only owner of live sessions, keyed by session code
//!
//! Lookups and insertions are atomic per key (sharded map); no operation
//! locks the directory as a whole. Each session sits behind its own mutex so
//! the tick and a dispatcher never mutate it at the same time.

use crate::session::{PlayerInfo, Session};
use crate::simulation::SimulationFactory;
use crate::utils::generate_session_code;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::info;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;

pub type SessionHandle = Arc<Mutex<Session>>;

/// Attempts at drawing an unused random code before giving up.
const CODE_ATTEMPTS: usize = 16;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    #[error("session id already exists")]
    AlreadyExists,
    #[error("player is already in an active session")]
    AlreadyInSession,
}

impl CreateError {
    pub fn code(&self) -> &'static str {
        match self {
            CreateError::AlreadyExists => "ALREADY_EXISTS",
            CreateError::AlreadyInSession => "ALREADY_IN_SESSION",
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    #[error("no joinable session with that id")]
    NotFound,
    #[error("cannot join your own session")]
    SelfJoin,
    #[error("session already has two players")]
    Full,
}

impl JoinError {
    pub fn code(&self) -> &'static str {
        match self {
            JoinError::NotFound => "NOT_FOUND",
            JoinError::SelfJoin => "SELF_JOIN",
            JoinError::Full => "FULL",
        }
    }
}

pub struct SessionDirectory {
    sessions: DashMap<String, SessionHandle>,
    simulations: SimulationFactory,
}

impl SessionDirectory {
    pub fn new(simulations: SimulationFactory) -> Self {
        Self {
            sessions: DashMap::new(),
            simulations,
        }
    }

    /// Creates a session under `session_id`; fails if the id is taken.
    pub fn create(
        &self,
        session_id: &str,
        creator: PlayerInfo,
        now: Instant,
    ) -> Result<SessionHandle, CreateError> {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(CreateError::AlreadyExists),
            Entry::Vacant(slot) => {
                info!("Session {} created by {}", session_id, creator.id);
                let session = Session::new(session_id, creator, (self.simulations)(), now);
                let handle = Arc::new(Mutex::new(session));
                slot.insert(Arc::clone(&handle));
                Ok(handle)
            }
        }
    }

    /// Creates a session under a freshly drawn code.
    pub fn create_with_generated_id(
        &self,
        creator: PlayerInfo,
        now: Instant,
    ) -> Result<(String, SessionHandle), CreateError> {
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_session_code();
            match self.create(&code, creator.clone(), now) {
                Ok(handle) => return Ok((code, handle)),
                Err(CreateError::AlreadyExists) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(CreateError::AlreadyExists)
    }

    /// The session if `requester` could join it right now.
    pub async fn find_joinable(
        &self,
        session_id: &str,
        requester: &str,
    ) -> Result<SessionHandle, JoinError> {
        let handle = self.get(session_id).ok_or(JoinError::NotFound)?;
        handle.lock().await.check_joinable(requester)?;
        Ok(handle)
    }

    /// Seats `player`. Eligibility is checked again under the session lock.
    pub async fn join(
        &self,
        session_id: &str,
        player: PlayerInfo,
        now: Instant,
    ) -> Result<SessionHandle, JoinError> {
        let handle = self.find_joinable(session_id, &player.id).await?;
        handle.lock().await.join(player, now)?;
        Ok(handle)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes a session. Only the first caller for a given id gets it back.
    pub fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.remove(session_id).map(|(_, handle)| handle)
    }

    /// Copies the current handles so callers can iterate without holding map locks.
    pub fn snapshot(&self) -> Vec<(String, SessionHandle)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
