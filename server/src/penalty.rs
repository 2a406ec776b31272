//! Setup-overrun penalties
//!
//! Each penalty sub-phase has exactly one effect, looked up by
//! [`penalty_effect`] from the phase and the time spent in it. Adversarial
//! packets are a closed set built by [`spawn_packet`].

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use shared::{Phase, COOLDOWN_GROWTH_PER_SEC, INJECTION_INTERVAL, SPEED_GROWTH_PER_SEC};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketKind {
    Square,
    Triangle,
    Bulky,
    Trojan,
    Confidential,
}

impl PacketKind {
    pub const ALL: [PacketKind; 5] = [
        PacketKind::Square,
        PacketKind::Triangle,
        PacketKind::Bulky,
        PacketKind::Trojan,
        PacketKind::Confidential,
    ];

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        *Self::ALL.choose(rng).unwrap_or(&PacketKind::Square)
    }
}

/// Packet pushed into a player's network as a penalty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectedPacket {
    pub kind: PacketKind,
    pub size: u8,
    pub coin_value: u8,
    pub hostile: bool,
}

pub fn spawn_packet(kind: PacketKind) -> InjectedPacket {
    let (size, coin_value, hostile) = match kind {
        PacketKind::Square => (2, 2, false),
        PacketKind::Triangle => (3, 3, false),
        PacketKind::Bulky => (8, 8, false),
        PacketKind::Trojan => (2, 0, true),
        PacketKind::Confidential => (4, 3, false),
    };
    InjectedPacket {
        kind,
        size,
        coin_value,
        hostile,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyMultipliers {
    pub cooldown: f32,
    pub speed: f32,
}

impl Default for PenaltyMultipliers {
    fn default() -> Self {
        Self {
            cooldown: 1.0,
            speed: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PenaltyEffect {
    None,
    /// Inject one packet whenever `interval` has passed since the last one.
    InjectPackets { interval: Duration },
    Cooldown(f32),
    Speed(f32),
}

pub fn penalty_effect(phase: Phase, in_phase: Duration) -> PenaltyEffect {
    let secs = in_phase.as_secs_f32();
    match phase {
        Phase::PenaltyPacketInjection => PenaltyEffect::InjectPackets {
            interval: Duration::from_secs_f32(INJECTION_INTERVAL),
        },
        Phase::PenaltyCooldown => PenaltyEffect::Cooldown(1.0 + COOLDOWN_GROWTH_PER_SEC * secs),
        Phase::PenaltySpeed => PenaltyEffect::Speed(1.0 + SPEED_GROWTH_PER_SEC * secs),
        _ => PenaltyEffect::None,
    }
}

/// Which of the two players takes an injected packet: whoever is not ready,
/// chosen at random when both or neither are.
pub fn injection_target<R: Rng + ?Sized>(first_ready: bool, second_ready: bool, rng: &mut R) -> usize {
    match (first_ready, second_ready) {
        (true, false) => 1,
        (false, true) => 0,
        _ => rng.gen_range(0..2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_effect_per_phase() {
        assert_eq!(
            penalty_effect(Phase::SetupNormal, Duration::from_secs(10)),
            PenaltyEffect::None
        );
        assert_eq!(
            penalty_effect(Phase::PenaltyPacketInjection, Duration::from_secs(3)),
            PenaltyEffect::InjectPackets {
                interval: Duration::from_secs(2)
            }
        );
        assert_eq!(
            penalty_effect(Phase::Running, Duration::from_secs(3)),
            PenaltyEffect::None
        );
    }

    #[test]
    fn test_cooldown_growth() {
        match penalty_effect(Phase::PenaltyCooldown, Duration::from_secs(5)) {
            PenaltyEffect::Cooldown(m) => assert_approx_eq!(m, 1.05, 1e-5),
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[test]
    fn test_speed_growth_is_monotonic() {
        let mut last = 1.0;
        for tenth in 0..100 {
            let in_phase = Duration::from_millis(tenth * 100);
            match penalty_effect(Phase::PenaltySpeed, in_phase) {
                PenaltyEffect::Speed(m) => {
                    assert!(m >= last);
                    last = m;
                }
                other => panic!("unexpected effect {:?}", other),
            }
        }
        assert_approx_eq!(last, 1.0 + 0.03 * 9.9, 1e-4);
    }

    #[test]
    fn test_target_is_the_unready_player() {
        let mut rng = rand::thread_rng();
        assert_eq!(injection_target(true, false, &mut rng), 1);
        assert_eq!(injection_target(false, true, &mut rng), 0);
        for _ in 0..50 {
            assert!(injection_target(false, false, &mut rng) < 2);
        }
    }

    #[test]
    fn test_factory_covers_every_kind() {
        for kind in PacketKind::ALL {
            let packet = spawn_packet(kind);
            assert_eq!(packet.kind, kind);
            assert!(packet.size > 0);
        }
        assert!(spawn_packet(PacketKind::Trojan).hostile);
        assert_eq!(spawn_packet(PacketKind::Bulky).coin_value, 8);
    }
}
