use crate::{COOLDOWN_PENALTY_AT, PACKET_INJECTION_AT, SETUP_DURATION, SPEED_PENALTY_AT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stage of a session. Setup and the three penalty sub-phases are derived
/// from the setup clock; `Running` and `Ended` are terminal for that clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    SetupNormal,
    PenaltyPacketInjection,
    PenaltyCooldown,
    PenaltySpeed,
    Running,
    Ended,
}

impl Phase {
    pub fn is_setup(self) -> bool {
        !matches!(self, Phase::Running | Phase::Ended)
    }

    pub fn is_penalty(self) -> bool {
        matches!(
            self,
            Phase::PenaltyPacketInjection | Phase::PenaltyCooldown | Phase::PenaltySpeed
        )
    }

    /// Seconds on the setup clock at which this phase begins.
    pub fn starts_at(self) -> Option<f32> {
        match self {
            Phase::SetupNormal => Some(0.0),
            Phase::PenaltyPacketInjection => Some(PACKET_INJECTION_AT),
            Phase::PenaltyCooldown => Some(COOLDOWN_PENALTY_AT),
            Phase::PenaltySpeed => Some(SPEED_PENALTY_AT),
            Phase::Running => Some(SETUP_DURATION),
            Phase::Ended => None,
        }
    }
}

/// Phase for a given time on the setup clock.
pub fn phase_for(elapsed: Duration) -> Phase {
    // f32 cannot resolve nanoseconds near the thresholds.
    let secs = elapsed.as_secs_f64();
    if secs < f64::from(PACKET_INJECTION_AT) {
        Phase::SetupNormal
    } else if secs < f64::from(COOLDOWN_PENALTY_AT) {
        Phase::PenaltyPacketInjection
    } else if secs < f64::from(SPEED_PENALTY_AT) {
        Phase::PenaltyCooldown
    } else if secs < f64::from(SETUP_DURATION) {
        Phase::PenaltySpeed
    } else {
        Phase::Running
    }
}

/// Seconds left before the setup window closes, never negative.
pub fn remaining_setup_time(elapsed: Duration) -> f32 {
    (SETUP_DURATION - elapsed.as_secs_f32()).max(0.0)
}
