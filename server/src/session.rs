//! Per-session state machine
//!
//! A [`Session`] owns one match: the two players, the setup clock, penalty
//! multipliers, scores and the simulation hook. It never touches sockets.
//! Every operation returns the envelopes it wants delivered as [`Outbound`]
//! values; the caller hands them to the connection registry after releasing
//! the session lock.
//!
//! Time is always passed in (`now`), so the whole machine can be driven by a
//! simulated clock in tests.

use crate::directory::JoinError;
use crate::penalty::{
    injection_target, penalty_effect, spawn_packet, PacketKind, PenaltyEffect, PenaltyMultipliers,
};
use crate::simulation::Simulation;
use crate::utils::timestamp_millis;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::phase::remaining_setup_time;
use shared::protocol::{GAME_STARTING, OPPONENT_READY};
use shared::{
    phase_for, Envelope, MessageKind, Phase, MAX_RUNNING_SECS, SERVER_ID, WINNING_SCORE,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Longest simulation step taken after a stall.
const MAX_TICK_DELTA: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: String,
    pub display_name: String,
    pub score: u32,
    pub ready: bool,
}

impl PlayerInfo {
    pub fn new(id: &str, display_name: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.unwrap_or(id).to_string(),
            score: 0,
            ready: false,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("player is not a member of this session")]
    NotAMember,
    #[error("session is not running")]
    NotRunning,
    #[error("session has ended")]
    Ended,
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotAMember => "NOT_A_MEMBER",
            SessionError::NotRunning => "NOT_RUNNING",
            SessionError::Ended => "ENDED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    ScoreLimit,
    TimeLimit,
    Surrender,
    OpponentLeft,
    /// Creator left before anyone joined.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResult {
    pub session_id: String,
    pub winner: Option<String>,
    pub reason: EndReason,
    pub scores: BTreeMap<String, u32>,
    pub duration_secs: f32,
    pub players: Vec<PlayerInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub remaining_setup_time: f32,
    pub phase: Phase,
    pub multipliers: PenaltyMultipliers,
    pub scores: BTreeMap<String, u32>,
    pub timestamp: u64,
}

/// An envelope addressed to one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub recipient: String,
    pub envelope: Envelope,
}

impl Outbound {
    pub fn new(recipient: &str, envelope: Envelope) -> Self {
        Self {
            recipient: recipient.to_string(),
            envelope,
        }
    }
}

pub struct Session {
    id: String,
    player1: PlayerInfo,
    player2: Option<PlayerInfo>,
    phase: Phase,
    phase_clock_start: Instant,
    running_since: Option<Instant>,
    last_tick: Option<Instant>,
    last_injection: Option<Instant>,
    multipliers: PenaltyMultipliers,
    simulation: Box<dyn Simulation>,
    rng: StdRng,
    created_at: Instant,
    started_at: u64,
    result: Option<GameResult>,
}

impl Session {
    pub fn new(
        id: &str,
        player1: PlayerInfo,
        simulation: Box<dyn Simulation>,
        now: Instant,
    ) -> Self {
        Self {
            id: id.to_string(),
            player1,
            player2: None,
            phase: Phase::SetupNormal,
            phase_clock_start: now,
            running_since: None,
            last_tick: None,
            last_injection: None,
            multipliers: PenaltyMultipliers::default(),
            simulation,
            rng: StdRng::from_entropy(),
            created_at: now,
            started_at: timestamp_millis(),
            result: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn multipliers(&self) -> PenaltyMultipliers {
        self.multipliers
    }

    /// Wall-clock creation time in milliseconds.
    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn result(&self) -> Option<&GameResult> {
        self.result.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.phase != Phase::Ended
    }

    pub fn is_full(&self) -> bool {
        self.player2.is_some()
    }

    pub fn creator_id(&self) -> &str {
        &self.player1.id
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.player(player_id).is_some()
    }

    pub fn player(&self, player_id: &str) -> Option<&PlayerInfo> {
        self.players().find(|p| p.id == player_id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerInfo> {
        std::iter::once(&self.player1).chain(self.player2.iter())
    }

    pub fn opponent_of(&self, player_id: &str) -> Option<&str> {
        let second = self.player2.as_ref()?;
        if self.player1.id == player_id {
            Some(&second.id)
        } else if second.id == player_id {
            Some(&self.player1.id)
        } else {
            None
        }
    }

    fn player_mut(&mut self, player_id: &str) -> Option<&mut PlayerInfo> {
        if self.player1.id == player_id {
            return Some(&mut self.player1);
        }
        self.player2.as_mut().filter(|p| p.id == player_id)
    }

    fn scores(&self) -> BTreeMap<String, u32> {
        self.players().map(|p| (p.id.clone(), p.score)).collect()
    }

    fn both_ready(&self) -> bool {
        self.player1.ready && self.player2.as_ref().is_some_and(|p| p.ready)
    }

    /// Joinable iff still active, missing a second player, and not asked by its creator.
    pub fn check_joinable(&self, requester: &str) -> Result<(), JoinError> {
        if !self.is_active() {
            Err(JoinError::NotFound)
        } else if self.player1.id == requester {
            Err(JoinError::SelfJoin)
        } else if self.is_full() {
            Err(JoinError::Full)
        } else {
            Ok(())
        }
    }

    /// Seats the second player and restarts the setup clock.
    pub fn join(&mut self, player: PlayerInfo, now: Instant) -> Result<(), JoinError> {
        self.check_joinable(&player.id)?;
        info!("Player {} joined session {}", player.id, self.id);
        self.player2 = Some(player);
        self.restart_setup_clock(now);
        Ok(())
    }

    fn restart_setup_clock(&mut self, now: Instant) {
        self.phase = Phase::SetupNormal;
        self.phase_clock_start = now;
        self.last_injection = None;
        self.multipliers = PenaltyMultipliers::default();
    }

    pub fn set_ready(&mut self, player_id: &str, now: Instant) -> Result<Vec<Outbound>, SessionError> {
        self.require_member(player_id)?;
        let mut out = Vec::new();
        if self.phase == Phase::Running {
            return Ok(out);
        }

        if let Some(player) = self.player_mut(player_id) {
            if player.ready {
                return Ok(out);
            }
            player.ready = true;
        }
        debug!("Player {} ready in session {}", player_id, self.id);

        if let Some(opponent) = self.opponent_of(player_id) {
            out.push(Outbound::new(
                opponent,
                self.server_envelope(MessageKind::Notification, json!(OPPONENT_READY)),
            ));
        }

        if self.both_ready() {
            self.start_running(now, true, &mut out);
        }
        Ok(out)
    }

    /// Applies and relays an action. Only accepted while running.
    pub fn handle_action(&mut self, player_id: &str, action: Value) -> Result<Vec<Outbound>, SessionError> {
        self.require_member(player_id)?;
        if self.phase != Phase::Running {
            return Err(SessionError::NotRunning);
        }
        self.simulation.apply_action(player_id, &action);
        Ok(self.relay(player_id, MessageKind::Action, action))
    }

    /// Relays a player's own network layout to the opponent.
    pub fn relay_state(&mut self, player_id: &str, state: Value) -> Result<Vec<Outbound>, SessionError> {
        self.require_member(player_id)?;
        Ok(self.relay(player_id, MessageKind::StateUpdate, state))
    }

    /// Records a reported absolute score and tells the opponent.
    pub fn apply_score(&mut self, player_id: &str, score: u32) -> Result<Vec<Outbound>, SessionError> {
        self.require_member(player_id)?;
        if self.phase != Phase::Running {
            return Err(SessionError::NotRunning);
        }
        if let Some(player) = self.player_mut(player_id) {
            player.score = score;
        }
        Ok(self.relay(
            player_id,
            MessageKind::ScoreUpdate,
            json!({ "playerId": player_id, "score": score }),
        ))
    }

    pub fn surrender(&mut self, player_id: &str, now: Instant) -> Result<Vec<Outbound>, SessionError> {
        self.require_member(player_id)?;
        let winner = self.opponent_of(player_id).map(str::to_string);
        let mut out = Vec::new();
        self.end(EndReason::Surrender, winner, now, &mut out);
        Ok(out)
    }

    /// A member's connection is gone. Ends the session; the survivor, if any, wins.
    pub fn player_left(&mut self, player_id: &str, now: Instant) -> Vec<Outbound> {
        let mut out = Vec::new();
        if !self.is_active() || !self.has_player(player_id) {
            return out;
        }
        match self.opponent_of(player_id).map(str::to_string) {
            Some(survivor) => {
                self.end(EndReason::OpponentLeft, Some(survivor), now, &mut out);
                out.retain(|o| o.recipient != player_id);
            }
            None => self.end(EndReason::Abandoned, None, now, &mut out),
        }
        out
    }

    /// One scheduler tick: advance the phase clock or the live simulation,
    /// then push a snapshot to both peers.
    pub fn update(&mut self, now: Instant) -> Vec<Outbound> {
        let mut out = Vec::new();
        if self.phase == Phase::Ended {
            return out;
        }

        let dt = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default()
            .min(MAX_TICK_DELTA);
        self.last_tick = Some(now);

        if self.phase == Phase::Running {
            self.tick_running(now, dt, &mut out);
        } else {
            self.tick_setup(now, &mut out);
        }

        let snapshot = self.snapshot(now);
        let data = serde_json::to_value(&snapshot).unwrap_or(Value::Null);
        for player in self.players() {
            out.push(Outbound::new(
                &player.id,
                self.server_envelope(MessageKind::StateUpdate, data.clone()),
            ));
        }
        out
    }

    pub fn snapshot(&self, now: Instant) -> Snapshot {
        let remaining = if self.phase.is_setup() {
            remaining_setup_time(now.saturating_duration_since(self.phase_clock_start))
        } else {
            0.0
        };
        Snapshot {
            remaining_setup_time: remaining,
            phase: self.phase,
            multipliers: self.multipliers,
            scores: self.scores(),
            timestamp: timestamp_millis(),
        }
    }

    fn tick_setup(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        if self.player2.is_none() {
            // Setup only counts once both players are seated.
            self.phase_clock_start = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.phase_clock_start);
        let next = if self.both_ready() {
            Phase::Running
        } else {
            phase_for(elapsed)
        };
        if next != self.phase {
            self.enter_phase(next, now, out);
        }

        let in_phase = self
            .phase
            .starts_at()
            .map(|start| elapsed.saturating_sub(Duration::from_secs_f32(start)))
            .unwrap_or_default();

        match penalty_effect(self.phase, in_phase) {
            PenaltyEffect::InjectPackets { interval } => {
                let due = self
                    .last_injection
                    .map_or(true, |last| now.saturating_duration_since(last) >= interval);
                if due {
                    self.inject_packet(now, out);
                }
            }
            PenaltyEffect::Cooldown(m) => {
                self.multipliers.cooldown = self.multipliers.cooldown.max(m);
            }
            PenaltyEffect::Speed(m) => {
                self.multipliers.speed = self.multipliers.speed.max(m);
            }
            PenaltyEffect::None => {}
        }
    }

    fn enter_phase(&mut self, next: Phase, now: Instant, out: &mut Vec<Outbound>) {
        match self.phase {
            Phase::PenaltyCooldown => self.multipliers.cooldown = 1.0,
            Phase::PenaltyPacketInjection => self.last_injection = None,
            _ => {}
        }

        if next == Phase::Running {
            let early = self.both_ready();
            self.start_running(now, early, out);
        } else {
            debug!("Session {} entering {:?}", self.id, next);
            self.phase = next;
        }
    }

    /// Early starts drop every accumulated penalty; a clock-forced start keeps
    /// the speed inflation for the live phase.
    fn start_running(&mut self, now: Instant, early: bool, out: &mut Vec<Outbound>) {
        self.phase = Phase::Running;
        self.running_since = Some(now);
        self.last_tick = Some(now);
        self.multipliers.cooldown = 1.0;
        if early {
            self.multipliers.speed = 1.0;
        }
        info!(
            "Session {} running ({})",
            self.id,
            if early { "both ready" } else { "setup expired" }
        );
        self.broadcast(MessageKind::Notification, json!(GAME_STARTING), out);
    }

    fn inject_packet(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        let target = match &self.player2 {
            Some(second) => {
                if injection_target(self.player1.ready, second.ready, &mut self.rng) == 0 {
                    self.player1.id.clone()
                } else {
                    second.id.clone()
                }
            }
            None => self.player1.id.clone(),
        };
        let packet = spawn_packet(PacketKind::random(&mut self.rng));
        debug!(
            "Session {} injecting {:?} into {}",
            self.id, packet.kind, target
        );
        self.simulation.inject_packet(&target, &packet);
        self.last_injection = Some(now);
        out.push(Outbound::new(
            &target,
            self.server_envelope(
                MessageKind::InjectPacket,
                json!({ "packet": packet, "target": target }),
            ),
        ));
    }

    fn tick_running(&mut self, now: Instant, dt: Duration, out: &mut Vec<Outbound>) {
        let delta = self
            .simulation
            .simulate(dt.as_secs_f32(), self.multipliers.speed);
        for (player_id, points) in delta.points {
            if let Some(player) = self.player_mut(&player_id) {
                player.score = player.score.saturating_add(points);
            }
        }

        let running_for = self
            .running_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();

        if self.players().any(|p| p.score >= WINNING_SCORE) {
            let winner = self.leader();
            self.end(EndReason::ScoreLimit, winner, now, out);
        } else if running_for.as_secs_f32() > MAX_RUNNING_SECS {
            let winner = self.leader();
            self.end(EndReason::TimeLimit, winner, now, out);
        }
    }

    /// Highest scorer; `None` on a tie.
    fn leader(&self) -> Option<String> {
        match &self.player2 {
            None => Some(self.player1.id.clone()),
            Some(second) if second.score > self.player1.score => Some(second.id.clone()),
            Some(second) if second.score < self.player1.score => Some(self.player1.id.clone()),
            Some(_) => None,
        }
    }

    fn end(&mut self, reason: EndReason, winner: Option<String>, now: Instant, out: &mut Vec<Outbound>) {
        if self.phase == Phase::Ended {
            return;
        }
        let since = self.running_since.unwrap_or(self.created_at);
        let result = GameResult {
            session_id: self.id.clone(),
            winner,
            reason,
            scores: self.scores(),
            duration_secs: now.saturating_duration_since(since).as_secs_f32(),
            players: self.players().cloned().collect(),
        };
        info!(
            "Session {} ended: {:?}, winner {:?}",
            self.id, result.reason, result.winner
        );
        self.phase = Phase::Ended;
        if reason != EndReason::Abandoned {
            let data = serde_json::to_value(&result).unwrap_or(Value::Null);
            self.broadcast(MessageKind::GameOver, data, out);
        }
        self.result = Some(result);
    }

    fn require_member(&self, player_id: &str) -> Result<(), SessionError> {
        if !self.has_player(player_id) {
            return Err(SessionError::NotAMember);
        }
        if self.phase == Phase::Ended {
            return Err(SessionError::Ended);
        }
        Ok(())
    }

    fn relay(&self, player_id: &str, kind: MessageKind, data: Value) -> Vec<Outbound> {
        match self.opponent_of(player_id) {
            Some(opponent) => vec![Outbound::new(
                opponent,
                Envelope::new(kind, player_id, Some(self.id.clone()), data),
            )],
            None => Vec::new(),
        }
    }

    fn broadcast(&self, kind: MessageKind, data: Value, out: &mut Vec<Outbound>) {
        for player in self.players() {
            out.push(Outbound::new(
                &player.id,
                self.server_envelope(kind, data.clone()),
            ));
        }
    }

    fn server_envelope(&self, kind: MessageKind, data: Value) -> Envelope {
        Envelope::new(kind, SERVER_ID, Some(self.id.clone()), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::penalty::InjectedPacket;
    use crate::simulation::{LedgerSimulation, ScoreDelta};
    use assert_approx_eq::assert_approx_eq;
    use std::sync::{Arc, Mutex};

    const TICK: Duration = Duration::from_millis(50);

    /// Awards `points` to one player on every simulated step.
    struct ScoringSimulation {
        player: String,
        points: u32,
        speeds: Arc<Mutex<Vec<f32>>>,
    }

    impl Simulation for ScoringSimulation {
        fn simulate(&mut self, _dt: f32, speed_multiplier: f32) -> ScoreDelta {
            self.speeds.lock().unwrap().push(speed_multiplier);
            let mut delta = ScoreDelta::default();
            delta.award(&self.player, self.points);
            delta
        }

        fn apply_action(&mut self, _player_id: &str, _action: &Value) {}

        fn inject_packet(&mut self, _player_id: &str, _packet: &InjectedPacket) {}
    }

    fn paired_session(start: Instant) -> Session {
        let mut session = Session::new(
            "G1",
            PlayerInfo::new("P1", None),
            Box::new(LedgerSimulation::default()),
            start,
        );
        session.join(PlayerInfo::new("P2", None), start).unwrap();
        session
    }

    /// Ticks at 20 Hz from `from` up to and including `until`, collecting output.
    fn run_ticks(session: &mut Session, from: Instant, until: Duration) -> Vec<Outbound> {
        let mut out = Vec::new();
        let mut t = Duration::ZERO;
        while t <= until {
            out.extend(session.update(from + t));
            t += TICK;
        }
        out
    }

    fn count_kind(out: &[Outbound], recipient: &str, kind: MessageKind) -> usize {
        out.iter()
            .filter(|o| o.recipient == recipient && o.envelope.kind == kind)
            .count()
    }

    fn notifications(out: &[Outbound], recipient: &str, text: &str) -> usize {
        out.iter()
            .filter(|o| {
                o.recipient == recipient
                    && o.envelope.kind == MessageKind::Notification
                    && o.envelope.data == json!(text)
            })
            .count()
    }

    #[test]
    fn test_new_session_defaults() {
        let start = Instant::now();
        let session = Session::new(
            "G1",
            PlayerInfo::new("P1", Some("Alice")),
            Box::new(LedgerSimulation::default()),
            start,
        );

        assert_eq!(session.phase(), Phase::SetupNormal);
        assert_eq!(session.multipliers(), PenaltyMultipliers::default());
        assert!(session.is_active());
        assert!(!session.is_full());
        assert_eq!(session.player("P1").unwrap().display_name, "Alice");
    }

    #[test]
    fn test_phase_follows_setup_clock() {
        let start = Instant::now();
        let mut session = paired_session(start);

        let checkpoints = [
            (10.0, Phase::SetupNormal),
            (30.0, Phase::PenaltyPacketInjection),
            (39.0, Phase::PenaltyPacketInjection),
            (40.0, Phase::PenaltyCooldown),
            (50.0, Phase::PenaltySpeed),
            (59.9, Phase::PenaltySpeed),
        ];
        for (secs, expected) in checkpoints {
            session.update(start + Duration::from_secs_f32(secs));
            assert_eq!(session.phase(), expected, "at {}s", secs);
        }
    }

    #[test]
    fn test_setup_expiry_forces_running() {
        let start = Instant::now();
        let mut session = paired_session(start);

        let out = run_ticks(&mut session, start, Duration::from_secs(60));

        assert_eq!(session.phase(), Phase::Running);
        assert_eq!(notifications(&out, "P1", GAME_STARTING), 1);
        assert_eq!(notifications(&out, "P2", GAME_STARTING), 1);
    }

    #[test]
    fn test_both_ready_skips_penalties() {
        let start = Instant::now();
        let mut session = paired_session(start);

        run_ticks(&mut session, start, Duration::from_secs(5));
        let at = start + Duration::from_secs(5);

        let first = session.set_ready("P1", at).unwrap();
        assert_eq!(session.phase(), Phase::SetupNormal);
        assert_eq!(notifications(&first, "P2", OPPONENT_READY), 1);

        let second = session.set_ready("P2", at).unwrap();
        assert_eq!(notifications(&second, "P1", GAME_STARTING), 1);
        assert_eq!(notifications(&second, "P2", GAME_STARTING), 1);

        session.update(at + TICK);
        assert_eq!(session.phase(), Phase::Running);

        let out = run_ticks(&mut session, at + TICK, Duration::from_secs(40));
        assert_eq!(count_kind(&out, "P1", MessageKind::InjectPacket), 0);
        assert_eq!(count_kind(&out, "P2", MessageKind::InjectPacket), 0);
        assert_eq!(session.multipliers(), PenaltyMultipliers::default());
    }

    #[test]
    fn test_ready_is_idempotent() {
        let start = Instant::now();
        let mut session = paired_session(start);

        session.set_ready("P1", start).unwrap();
        let again = session.set_ready("P1", start).unwrap();
        assert!(again.is_empty());
        assert_eq!(session.phase(), Phase::SetupNormal);
    }

    #[test]
    fn test_ready_from_non_member_rejected() {
        let start = Instant::now();
        let mut session = paired_session(start);

        assert_eq!(
            session.set_ready("P3", start).unwrap_err(),
            SessionError::NotAMember
        );
        assert!(!session.player("P1").unwrap().ready);
    }

    #[test]
    fn test_injection_targets_unready_player() {
        let start = Instant::now();
        let mut session = paired_session(start);
        session.set_ready("P1", start).unwrap();

        let out = run_ticks(&mut session, start, Duration::from_secs(39));

        let to_p2 = count_kind(&out, "P2", MessageKind::InjectPacket);
        assert_eq!(count_kind(&out, "P1", MessageKind::InjectPacket), 0);
        // 30s, 32s, ... 38s
        assert_eq!(to_p2, 5);
    }

    #[test]
    fn test_injection_tie_hits_someone() {
        let start = Instant::now();
        let mut session = paired_session(start);

        let out = run_ticks(&mut session, start, Duration::from_secs(39));
        let total = count_kind(&out, "P1", MessageKind::InjectPacket)
            + count_kind(&out, "P2", MessageKind::InjectPacket);
        assert_eq!(total, 5);
    }

    #[test]
    fn test_cooldown_grows_then_resets() {
        let start = Instant::now();
        let mut session = paired_session(start);

        let mut last = 1.0;
        let mut t = Duration::from_secs(40);
        while t < Duration::from_secs(50) {
            session.update(start + t);
            let cooldown = session.multipliers().cooldown;
            assert!(cooldown >= last);
            last = cooldown;
            t += TICK;
        }
        assert_approx_eq!(last, 1.0 + 0.01 * 9.95, 1e-3);

        session.update(start + Duration::from_secs(50));
        assert_eq!(session.phase(), Phase::PenaltySpeed);
        assert_approx_eq!(session.multipliers().cooldown, 1.0, 1e-6);
    }

    #[test]
    fn test_speed_penalty_carries_into_running() {
        let start = Instant::now();
        let speeds = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::new(
            "G1",
            PlayerInfo::new("P1", None),
            Box::new(ScoringSimulation {
                player: "P1".into(),
                points: 0,
                speeds: Arc::clone(&speeds),
            }),
            start,
        );
        session.join(PlayerInfo::new("P2", None), start).unwrap();

        run_ticks(&mut session, start, Duration::from_secs(61));

        assert_eq!(session.phase(), Phase::Running);
        let speeds = speeds.lock().unwrap();
        assert!(!speeds.is_empty());
        assert_approx_eq!(speeds[0], 1.0 + 0.03 * 9.95, 1e-3);
    }

    #[test]
    fn test_score_limit_ends_session() {
        let start = Instant::now();
        let mut session = Session::new(
            "G1",
            PlayerInfo::new("P1", None),
            Box::new(ScoringSimulation {
                player: "P1".into(),
                points: 0,
                speeds: Arc::default(),
            }),
            start,
        );
        session.join(PlayerInfo::new("P2", None), start).unwrap();
        session.set_ready("P1", start).unwrap();
        session.set_ready("P2", start).unwrap();

        session.apply_score("P1", 50).unwrap();
        let out = session.update(start + TICK);

        assert_eq!(session.phase(), Phase::Ended);
        assert_eq!(count_kind(&out, "P1", MessageKind::GameOver), 1);
        assert_eq!(count_kind(&out, "P2", MessageKind::GameOver), 1);

        let result = session.result().unwrap();
        assert_eq!(result.reason, EndReason::ScoreLimit);
        assert_eq!(result.winner.as_deref(), Some("P1"));
        assert_eq!(result.scores["P1"], 50);
    }

    #[test]
    fn test_simulation_points_end_session() {
        let start = Instant::now();
        let mut session = Session::new(
            "G1",
            PlayerInfo::new("P1", None),
            Box::new(ScoringSimulation {
                player: "P2".into(),
                points: 10,
                speeds: Arc::default(),
            }),
            start,
        );
        session.join(PlayerInfo::new("P2", None), start).unwrap();
        session.set_ready("P1", start).unwrap();
        session.set_ready("P2", start).unwrap();

        let out = run_ticks(&mut session, start + TICK, Duration::from_secs(1));

        assert_eq!(session.phase(), Phase::Ended);
        assert_eq!(session.result().unwrap().winner.as_deref(), Some("P2"));
        assert_eq!(count_kind(&out, "P1", MessageKind::GameOver), 1);
    }

    #[test]
    fn test_time_limit_ends_session() {
        let start = Instant::now();
        let mut session = paired_session(start);
        session.set_ready("P1", start).unwrap();
        session.set_ready("P2", start).unwrap();

        session.update(start + Duration::from_secs(299));
        assert_eq!(session.phase(), Phase::Running);

        session.update(start + Duration::from_secs(301));
        assert_eq!(session.phase(), Phase::Ended);
        let result = session.result().unwrap();
        assert_eq!(result.reason, EndReason::TimeLimit);
        assert_eq!(result.winner, None);
    }

    #[test]
    fn test_action_only_while_running() {
        let start = Instant::now();
        let mut session = paired_session(start);

        assert_eq!(
            session.handle_action("P1", json!({"wire": 1})).unwrap_err(),
            SessionError::NotRunning
        );

        session.set_ready("P1", start).unwrap();
        session.set_ready("P2", start).unwrap();

        let out = session.handle_action("P1", json!({"wire": 1})).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient, "P2");
        assert_eq!(out[0].envelope.kind, MessageKind::Action);
        assert_eq!(out[0].envelope.sender_id, "P1");
        assert_eq!(out[0].envelope.data, json!({"wire": 1}));
    }

    #[test]
    fn test_state_relay_reaches_opponent() {
        let start = Instant::now();
        let mut session = paired_session(start);

        let out = session.relay_state("P2", json!({"systems": 4})).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient, "P1");
        assert_eq!(out[0].envelope.kind, MessageKind::StateUpdate);
    }

    #[test]
    fn test_snapshot_every_tick() {
        let start = Instant::now();
        let mut session = paired_session(start);

        let out = session.update(start + Duration::from_secs(12));
        let snapshot = out
            .iter()
            .find(|o| o.recipient == "P1" && o.envelope.kind == MessageKind::StateUpdate)
            .unwrap();
        assert_eq!(snapshot.envelope.sender_id, SERVER_ID);

        let decoded: Snapshot = serde_json::from_value(snapshot.envelope.data.clone()).unwrap();
        assert_eq!(decoded.phase, Phase::SetupNormal);
        assert_approx_eq!(decoded.remaining_setup_time, 48.0, 0.01);
        assert_eq!(decoded.scores.len(), 2);
        assert_eq!(count_kind(&out, "P2", MessageKind::StateUpdate), 1);
    }

    #[test]
    fn test_clock_waits_for_second_player() {
        let start = Instant::now();
        let mut session = Session::new(
            "G1",
            PlayerInfo::new("P1", None),
            Box::new(LedgerSimulation::default()),
            start,
        );

        session.update(start + Duration::from_secs(90));
        assert_eq!(session.phase(), Phase::SetupNormal);

        let joined_at = start + Duration::from_secs(100);
        session.join(PlayerInfo::new("P2", None), joined_at).unwrap();
        session.update(joined_at + Duration::from_secs(31));
        assert_eq!(session.phase(), Phase::PenaltyPacketInjection);
    }

    #[test]
    fn test_join_eligibility() {
        let start = Instant::now();
        let mut session = Session::new(
            "G1",
            PlayerInfo::new("P1", None),
            Box::new(LedgerSimulation::default()),
            start,
        );

        assert_eq!(session.check_joinable("P1"), Err(JoinError::SelfJoin));
        session.join(PlayerInfo::new("P2", None), start).unwrap();
        assert_eq!(session.check_joinable("P3"), Err(JoinError::Full));
        assert_eq!(session.check_joinable("P1"), Err(JoinError::SelfJoin));
    }

    #[test]
    fn test_leaving_player_forfeits() {
        let start = Instant::now();
        let mut session = paired_session(start);

        let out = session.player_left("P2", start + Duration::from_secs(3));

        assert_eq!(session.phase(), Phase::Ended);
        assert_eq!(count_kind(&out, "P1", MessageKind::GameOver), 1);
        assert_eq!(count_kind(&out, "P2", MessageKind::GameOver), 0);
        let result = session.result().unwrap();
        assert_eq!(result.reason, EndReason::OpponentLeft);
        assert_eq!(result.winner.as_deref(), Some("P1"));

        assert!(session.player_left("P1", start).is_empty());
        assert!(session.update(start + Duration::from_secs(4)).is_empty());
    }

    #[test]
    fn test_creator_leaving_alone_is_silent() {
        let start = Instant::now();
        let mut session = Session::new(
            "G1",
            PlayerInfo::new("P1", None),
            Box::new(LedgerSimulation::default()),
            start,
        );

        let out = session.player_left("P1", start);
        assert!(out.is_empty());
        assert_eq!(session.result().unwrap().reason, EndReason::Abandoned);
    }

    #[test]
    fn test_surrender_awards_opponent() {
        let start = Instant::now();
        let mut session = paired_session(start);

        let out = session.surrender("P1", start).unwrap();
        assert_eq!(count_kind(&out, "P1", MessageKind::GameOver), 1);
        assert_eq!(count_kind(&out, "P2", MessageKind::GameOver), 1);
        assert_eq!(session.result().unwrap().winner.as_deref(), Some("P2"));
        assert_eq!(
            session.surrender("P2", start).unwrap_err(),
            SessionError::Ended
        );
    }
}
