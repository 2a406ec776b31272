//! Connection registry for the session server
//!
//! This module owns every live peer connection, including:
//! - Capacity enforcement at accept time (excess sockets are closed unread)
//! - Peer identity assignment and rebinding to a client-declared id
//! - Outbound queues drained by one writer task per connection
//! - Dead-peer detection through write failures, missed sends and idle timeouts
//!
//! Other components never hold a socket. They reach a peer only through
//! [`ConnectionRegistry::send_to`] or [`ConnectionRegistry::broadcast`], which
//! enqueue without blocking.

use crate::session::Outbound;
use crate::utils::derive_peer_id;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info, warn};
use shared::{Connection, Envelope, FrameReader, FrameWriter, TransportError, SERVER_ID};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("connection limit of {0} reached")]
    CapacityReached(usize),
    #[error("unknown peer {0}")]
    UnknownPeer(String),
    #[error("peer id {0} is already in use")]
    IdInUse(String),
    #[error("peer {0} is closed")]
    Closed(String),
    #[error("peer {0} is not draining its queue")]
    Backlogged(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Registry-side state of one live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub addr: Option<SocketAddr>,
    pub connected_at: Instant,
    outbound: mpsc::Sender<Envelope>,
    last_seen: Mutex<Instant>,
    missed_sends: AtomicU32,
    shutdown: Arc<Notify>,
    /// Stops the writer task, even while it is blocked on a stalled socket.
    closed: Arc<Notify>,
}

impl ConnectionHandle {
    fn is_idle(&self, timeout: Duration) -> bool {
        self.last_seen
            .lock()
            .map(|seen| seen.elapsed() > timeout)
            .unwrap_or(false)
    }
}

/// What the owner of a freshly attached peer needs: its queued outbound
/// envelopes, the signal that the registry wants it torn down, and the
/// signal that it has been removed.
pub struct PeerChannel {
    pub outbound: mpsc::Receiver<Envelope>,
    pub shutdown: Arc<Notify>,
    pub closed: Arc<Notify>,
}

/// An accepted TCP peer, ready to be handed to a dispatcher.
pub struct AcceptedPeer {
    pub peer_id: String,
    pub addr: Option<SocketAddr>,
    pub reader: FrameReader<OwnedReadHalf>,
    pub shutdown: Arc<Notify>,
}

pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<ConnectionHandle>>,
    capacity: usize,
    live: AtomicUsize,
    accepted: AtomicU64,
    queue_len: usize,
    max_missed_sends: u32,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize, queue_len: usize, max_missed_sends: u32) -> Self {
        Self {
            connections: DashMap::new(),
            capacity,
            live: AtomicUsize::new(0),
            accepted: AtomicU64::new(0),
            queue_len: queue_len.max(1),
            max_missed_sends: max_missed_sends.max(1),
        }
    }

    /// Takes ownership of an accepted socket. Over capacity the socket is
    /// dropped immediately, with no protocol-level message.
    pub fn accept(&self, stream: TcpStream) -> Result<AcceptedPeer, RegistryError> {
        let addr = stream.peer_addr().ok();
        let peer_id = self.identify(addr);

        let channel = match self.attach(&peer_id, addr) {
            Ok(channel) => channel,
            Err(e) => {
                drop(stream);
                warn!("Rejected connection from {:?}: {}", addr, e);
                return Err(e);
            }
        };

        let connection = match Connection::from_stream(stream) {
            Ok(connection) => connection,
            Err(e) => {
                self.remove(&peer_id);
                return Err(e.into());
            }
        };
        let (reader, writer) = connection.into_split();
        spawn_writer(
            peer_id.clone(),
            writer,
            channel.outbound,
            Arc::clone(&channel.shutdown),
            channel.closed,
        );

        info!("Peer {} connected from {:?}", peer_id, addr);
        Ok(AcceptedPeer {
            peer_id,
            addr,
            reader,
            shutdown: channel.shutdown,
        })
    }

    /// Registers a peer under `peer_id` and hands back its outbound queue.
    pub fn attach(
        &self,
        peer_id: &str,
        addr: Option<SocketAddr>,
    ) -> Result<PeerChannel, RegistryError> {
        if !self.try_reserve() {
            return Err(RegistryError::CapacityReached(self.capacity));
        }

        let (tx, rx) = mpsc::channel(self.queue_len);
        let shutdown = Arc::new(Notify::new());
        let closed = Arc::new(Notify::new());
        let now = Instant::now();
        let handle = Arc::new(ConnectionHandle {
            addr,
            connected_at: now,
            outbound: tx,
            last_seen: Mutex::new(now),
            missed_sends: AtomicU32::new(0),
            shutdown: Arc::clone(&shutdown),
            closed: Arc::clone(&closed),
        });

        match self.connections.entry(peer_id.to_string()) {
            Entry::Occupied(existing) => {
                drop(existing);
                self.release();
                Err(RegistryError::IdInUse(peer_id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(PeerChannel {
                    outbound: rx,
                    shutdown,
                    closed,
                })
            }
        }
    }

    /// Provisional id for a new connection, unique per connection.
    pub fn identify(&self, addr: Option<SocketAddr>) -> String {
        let seq = self.accepted.fetch_add(1, Ordering::SeqCst) + 1;
        let id = derive_peer_id(addr, seq);
        if self.connections.contains_key(&id) {
            format!("{}-{}", id, seq)
        } else {
            id
        }
    }

    /// Moves a connection to the id its client declared.
    pub fn rebind(&self, current: &str, requested: &str) -> Result<(), RegistryError> {
        if current == requested {
            return Ok(());
        }
        if requested.is_empty() || requested == SERVER_ID {
            return Err(RegistryError::IdInUse(requested.to_string()));
        }

        let (_, handle) = self
            .connections
            .remove(current)
            .ok_or_else(|| RegistryError::UnknownPeer(current.to_string()))?;

        let entry = self.connections.entry(requested.to_string());
        match entry {
            Entry::Vacant(slot) => {
                slot.insert(handle);
                info!("Peer {} is now {}", current, requested);
                Ok(())
            }
            Entry::Occupied(existing) => {
                drop(existing);
                self.connections.insert(current.to_string(), handle);
                Err(RegistryError::IdInUse(requested.to_string()))
            }
        }
    }

    /// Deregisters a peer and signals its read loop and writer to stop.
    /// Safe to repeat.
    pub fn remove(&self, peer_id: &str) -> bool {
        match self.connections.remove(peer_id) {
            Some((_, handle)) => {
                self.release();
                handle.shutdown.notify_one();
                handle.closed.notify_one();
                info!("Peer {} disconnected", peer_id);
                true
            }
            None => false,
        }
    }

    /// Queues an envelope for one peer without blocking.
    pub fn send_to(&self, peer_id: &str, envelope: Envelope) -> Result<(), RegistryError> {
        let handle = self
            .connections
            .get(peer_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::UnknownPeer(peer_id.to_string()))?;

        match handle.outbound.try_send(envelope) {
            Ok(()) => {
                handle.missed_sends.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                let missed = handle.missed_sends.fetch_add(1, Ordering::Relaxed) + 1;
                if missed >= self.max_missed_sends {
                    warn!("Peer {} missed {} sends, dropping it", peer_id, missed);
                    handle.shutdown.notify_one();
                }
                Err(RegistryError::Backlogged(peer_id.to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                handle.shutdown.notify_one();
                Err(RegistryError::Closed(peer_id.to_string()))
            }
        }
    }

    pub fn broadcast(&self, envelope: &Envelope) {
        for peer_id in self.peer_ids() {
            if let Err(e) = self.send_to(&peer_id, envelope.clone()) {
                debug!("Broadcast to {} failed: {}", peer_id, e);
            }
        }
    }

    /// Delivers session output. Peers that are already gone are skipped.
    pub fn deliver(&self, outbound: Vec<Outbound>) {
        for Outbound { recipient, envelope } in outbound {
            if let Err(e) = self.send_to(&recipient, envelope) {
                debug!("Delivery to {} failed: {}", recipient, e);
            }
        }
    }

    /// Records inbound activity for idle detection.
    pub fn touch(&self, peer_id: &str) {
        if let Some(entry) = self.connections.get(peer_id) {
            if let Ok(mut seen) = entry.last_seen.lock() {
                *seen = Instant::now();
            }
        }
    }

    /// Removes peers that have been silent longer than `timeout`.
    pub fn check_timeouts(&self, timeout: Duration) -> Vec<String> {
        let timed_out: Vec<String> = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_idle(timeout))
            .map(|entry| entry.key().clone())
            .collect();

        for peer_id in &timed_out {
            warn!("Peer {} timed out", peer_id);
            self.remove(peer_id);
        }

        timed_out
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.connections.contains_key(peer_id)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live connections, counting slots reserved by in-flight accepts.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_reserve(&self) -> bool {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < self.capacity).then_some(live + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        let _ = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| live.checked_sub(1));
    }
}

/// Drains one peer's queue onto its socket. A failed write asks the read
/// loop to tear the connection down. Removal from the registry ends the task
/// at once, abandoning any write the peer is not reading.
fn spawn_writer<W>(
    peer_id: String,
    mut writer: FrameWriter<W>,
    mut outbound: mpsc::Receiver<Envelope>,
    shutdown: Arc<Notify>,
    closed: Arc<Notify>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let envelope = tokio::select! {
                _ = closed.notified() => break,
                next = outbound.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            tokio::select! {
                _ = closed.notified() => {
                    debug!("Abandoning pending write to {}", peer_id);
                    return;
                }
                sent = writer.send(&envelope) => {
                    if let Err(e) = sent {
                        warn!("Write to {} failed: {}", peer_id, e);
                        shutdown.notify_one();
                        break;
                    }
                }
            }
        }
        writer.close().await;
        debug!("Writer for {} finished", peer_id);
    })
}
