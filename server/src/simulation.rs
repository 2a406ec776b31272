//! Hook into the packet-routing simulation that runs inside a session
//!
//! The session core only drives time and relays input; routing, movement and
//! collisions belong to whatever implements [`Simulation`].

use crate::penalty::InjectedPacket;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Points earned per player during one simulation step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreDelta {
    pub points: HashMap<String, u32>,
}

impl ScoreDelta {
    pub fn award(&mut self, player_id: &str, points: u32) {
        *self.points.entry(player_id.to_string()).or_insert(0) += points;
    }

    pub fn is_empty(&self) -> bool {
        self.points.values().all(|p| *p == 0)
    }
}

pub trait Simulation: Send {
    /// Advances the live simulation by `dt` seconds.
    fn simulate(&mut self, dt: f32, speed_multiplier: f32) -> ScoreDelta;

    /// Applies a player's action to the authoritative state.
    fn apply_action(&mut self, player_id: &str, action: &Value);

    /// Adds a penalty packet to a player's network.
    fn inject_packet(&mut self, player_id: &str, packet: &InjectedPacket);
}

pub type SimulationFactory = Arc<dyn Fn() -> Box<dyn Simulation> + Send + Sync>;

/// Bookkeeping-only simulation: counts what it is fed and never scores.
/// Scores then come solely from clients' `SCORE_UPDATE` reports.
#[derive(Debug, Default)]
pub struct LedgerSimulation {
    pub elapsed: f32,
    pub actions: HashMap<String, usize>,
    pub pending_packets: HashMap<String, Vec<InjectedPacket>>,
}

impl Simulation for LedgerSimulation {
    fn simulate(&mut self, dt: f32, speed_multiplier: f32) -> ScoreDelta {
        self.elapsed += dt * speed_multiplier;
        ScoreDelta::default()
    }

    fn apply_action(&mut self, player_id: &str, _action: &Value) {
        *self.actions.entry(player_id.to_string()).or_insert(0) += 1;
    }

    fn inject_packet(&mut self, player_id: &str, packet: &InjectedPacket) {
        self.pending_packets
            .entry(player_id.to_string())
            .or_default()
            .push(packet.clone());
    }
}

pub fn ledger_factory() -> SimulationFactory {
    Arc::new(|| Box::new(LedgerSimulation::default()))
}
