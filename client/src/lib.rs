//! # Session Client Library
//!
//! A headless peer for the session server. It opens one connection, binds it
//! to a player id, creates or joins a session and then follows the server's
//! pushes until the match ends. There is no rendering: everything the server
//! sends is mirrored into a [`view::SessionView`] and logged.
//!
//! ## Module Organization
//!
//! ### View Module (`view`)
//! Client-side mirror of the session:
//! - Latest tick snapshot (phase, remaining setup time, multipliers, scores)
//! - Server notices and injected penalty packets
//! - Final outcome once `GAME_OVER` arrives
//!
//! ### Network Module (`network`)
//! Connection handling and the request/reply flow:
//! - `CONNECT` handshake and identity binding
//! - Session create/join with typed refusals
//! - Ready signal, score reports, surrender and heartbeats
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::GameClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = GameClient::connect("127.0.0.1:8081", Some("alice"), None).await?;
//!     let code = client.create(None).await?;
//!     println!("Share this code: {}", code);
//!
//!     let outcome = client
//!         .run(Some(Duration::from_secs(10)), Duration::from_secs(5))
//!         .await?;
//!     println!("Winner: {:?}", outcome.winner);
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod view;
