//! # Session Server Library
//!
//! This library provides the authoritative server for two-player packet-routing
//! matches. Clients connect over TCP, pair up in a session, build their
//! networks during a timed setup window and then compete in a live phase
//! driven by a fixed server tick.
//!
//! ## Core Responsibilities
//!
//! ### Connection Handling
//! Every accepted socket gets a provisional peer id, a bounded outbound queue
//! drained by its own writer task, and a dispatcher running its read loop.
//! Connections beyond the configured capacity are closed at accept time.
//!
//! ### Session Lifecycle
//! Sessions move through a 60 second setup window with three escalating
//! penalty sub-phases (packet injection, cooldown inflation, speed inflation)
//! before the live phase. Both players signalling ready skips straight to the
//! live phase. A session ends on the score limit, the time limit, a surrender
//! or a disconnect.
//!
//! ### State Broadcasting
//! Every tick pushes a snapshot (remaining setup time, phase, multipliers,
//! scores) to both peers of every live session, so independently clocked
//! clients render the same countdown.
//!
//! ## Architecture Design
//!
//! ### One Worker Per Connection
//! Each dispatcher only ever blocks on its own socket. Cross-peer traffic goes
//! through the connection registry's non-blocking `send_to`, never through
//! another peer's lock.
//!
//! ### Single Writer Per Session
//! Sessions live in a sharded map, each behind its own mutex. A dispatcher and
//! the ticker take that mutex for the duration of one synchronous state
//! transition. The session returns the envelopes it wants sent, and they are
//! delivered after the lock is released.
//!
//! ### Explicit Context
//! The registry, directory, score store and configuration are bundled in a
//! [`ServerContext`](network::ServerContext) handed to every task at
//! construction. There is no global state.
//!
//! ## Module Organization
//!
//! - `config`: runtime settings and their defaults
//! - `registry`: live connections, capacity, identity and dead-peer detection
//! - `dispatcher`: per-connection read loop and message routing
//! - `directory`: session creation, lookup, join eligibility and retirement
//! - `session`: the per-session state machine
//! - `penalty`: penalty effects and the closed set of injected packets
//! - `simulation`: the hook the live phase drives every tick
//! - `ticker`: fixed-rate session tick and idle sweeper
//! - `persistence`: profiles and score records written when a match ends
//! - `network`: server context and the accept loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 8081,
//!         ..ServerConfig::default()
//!     };
//!     let server = Server::bind(config).await?;
//!
//!     // Accepts peers and ticks sessions until the future is dropped
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod network;
pub mod penalty;
pub mod persistence;
pub mod registry;
pub mod session;
pub mod simulation;
pub mod ticker;
pub mod utils;
