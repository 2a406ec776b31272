use shared::{DEFAULT_PORT, MAX_CONNECTIONS, TICK_RATE};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the session server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Live connections beyond this are closed at accept time.
    pub max_connections: usize,
    /// Session ticks per second.
    pub tick_rate: u32,
    /// Envelopes buffered per peer before sends start missing.
    pub outbound_queue: usize,
    /// Consecutive missed sends after which a peer is treated as dead.
    pub max_missed_sends: u32,
    /// Drop peers that send nothing for this long. Disabled when `None`.
    pub idle_timeout: Option<Duration>,
    /// Persist profiles and score records as JSON here; in memory when `None`.
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_connections: MAX_CONNECTIONS,
            tick_rate: TICK_RATE,
            outbound_queue: 256,
            max_missed_sends: 2 * TICK_RATE,
            idle_timeout: None,
            data_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}
