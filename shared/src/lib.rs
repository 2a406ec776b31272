//! Protocol types, wire codec and transport shared by the server and client.

pub mod codec;
pub mod phase;
pub mod protocol;
pub mod transport;

pub use codec::{decode, encode, FrameError};
pub use phase::{phase_for, Phase};
pub use protocol::{Envelope, MessageKind};
pub use transport::{Connection, FrameReader, FrameWriter, TransportError};

pub const DEFAULT_PORT: u16 = 8081;
pub const MAX_CONNECTIONS: usize = 10;
pub const TICK_RATE: u32 = 20;

/// Sender id stamped on every server-originated envelope.
pub const SERVER_ID: &str = "server";

/// Cumulative setup thresholds in seconds since the setup clock started.
pub const PACKET_INJECTION_AT: f32 = 30.0;
pub const COOLDOWN_PENALTY_AT: f32 = 40.0;
pub const SPEED_PENALTY_AT: f32 = 50.0;
pub const SETUP_DURATION: f32 = 60.0;

pub const INJECTION_INTERVAL: f32 = 2.0;
pub const COOLDOWN_GROWTH_PER_SEC: f32 = 0.01;
pub const SPEED_GROWTH_PER_SEC: f32 = 0.03;

pub const MAX_RUNNING_SECS: f32 = 300.0;
pub const WINNING_SCORE: u32 = 50;

/// Session codes are zero-padded to this many digits.
pub const SESSION_ID_DIGITS: usize = 4;
