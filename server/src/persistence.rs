//! Player profiles and per-match score records
//!
//! The session core hands a finished [`GameResult`] to [`record_outcome`],
//! which writes one [`ScoreRecord`] per player and folds the match into each
//! player's [`UserProfile`]. Storage failures are logged and never undo the
//! in-memory outcome.

use crate::session::{EndReason, GameResult};
use crate::utils::timestamp_millis;
use dashmap::DashMap;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub player_id: String,
    pub display_name: String,
    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_score: u64,
    pub high_score: u32,
}

impl UserProfile {
    pub fn new(player_id: &str, display_name: &str) -> Self {
        Self {
            player_id: player_id.to_string(),
            display_name: display_name.to_string(),
            games_played: 0,
            wins: 0,
            losses: 0,
            total_score: 0,
            high_score: 0,
        }
    }

    /// Folds one finished match into the running totals.
    pub fn apply(&mut self, record: &ScoreRecord) {
        self.games_played += 1;
        match record.won {
            Some(true) => self.wins += 1,
            Some(false) => self.losses += 1,
            None => {}
        }
        self.total_score += u64::from(record.score);
        self.high_score = self.high_score.max(record.score);
    }
}

/// One player's view of one finished match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub session_id: String,
    pub opponent_id: String,
    pub score: u32,
    pub opponent_score: u32,
    /// `None` for a draw.
    pub won: Option<bool>,
    pub reason: EndReason,
    pub duration_secs: f32,
    pub recorded_at: u64,
}

pub trait ScoreStore: Send + Sync {
    fn record_score(&self, player_id: &str, record: &ScoreRecord) -> Result<(), StoreError>;

    fn load_user_data(&self, player_id: &str) -> Result<Option<UserProfile>, StoreError>;

    fn update_user_data(&self, player_id: &str, profile: &UserProfile) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    profiles: DashMap<String, UserProfile>,
    records: DashMap<String, Vec<ScoreRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, player_id: &str) -> Vec<ScoreRecord> {
        self.records
            .get(player_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

impl ScoreStore for MemoryStore {
    fn record_score(&self, player_id: &str, record: &ScoreRecord) -> Result<(), StoreError> {
        self.records
            .entry(player_id.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn load_user_data(&self, player_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profiles.get(player_id).map(|entry| entry.value().clone()))
    }

    fn update_user_data(&self, player_id: &str, profile: &UserProfile) -> Result<(), StoreError> {
        self.profiles.insert(player_id.to_string(), profile.clone());
        Ok(())
    }
}

/// Stores each player as `profiles/<id>.json` plus `scores/<id>.json` under a root directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root.join("profiles"))?;
        std::fs::create_dir_all(root.join("scores"))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn records(&self, player_id: &str) -> Result<Vec<ScoreRecord>, StoreError> {
        let path = self.path_for("scores", player_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn path_for(&self, kind: &str, player_id: &str) -> PathBuf {
        self.root
            .join(kind)
            .join(format!("{}.json", file_stem(player_id)))
    }
}

/// Player ids come off the wire, so anything outside `[A-Za-z0-9.-]` is
/// written as `_` plus its utf-8 bytes in hex. `_` itself is escaped, so
/// distinct ids never share a file.
fn file_stem(player_id: &str) -> String {
    let mut stem = String::with_capacity(player_id.len());
    for c in player_id.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            stem.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                stem.push_str(&format!("_{:02x}", byte));
            }
        }
    }
    stem
}

impl ScoreStore for JsonFileStore {
    fn record_score(&self, player_id: &str, record: &ScoreRecord) -> Result<(), StoreError> {
        let mut records = self.records(player_id)?;
        records.push(record.clone());
        let serialized = serde_json::to_string_pretty(&records)?;
        std::fs::write(self.path_for("scores", player_id), serialized)?;
        Ok(())
    }

    fn load_user_data(&self, player_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let path = self.path_for("profiles", player_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn update_user_data(&self, player_id: &str, profile: &UserProfile) -> Result<(), StoreError> {
        let serialized = serde_json::to_string_pretty(profile)?;
        std::fs::write(self.path_for("profiles", player_id), serialized)?;
        Ok(())
    }
}

/// Persists a finished two-player match. Returns how many players were
/// written successfully; a single-player session records nothing.
pub fn record_outcome(store: &dyn ScoreStore, result: &GameResult) -> usize {
    if result.players.len() < 2 {
        return 0;
    }

    let mut written = 0;
    for player in &result.players {
        let Some(opponent) = result.players.iter().find(|p| p.id != player.id) else {
            continue;
        };
        let record = ScoreRecord {
            session_id: result.session_id.clone(),
            opponent_id: opponent.id.clone(),
            score: player.score,
            opponent_score: opponent.score,
            won: result.winner.as_ref().map(|winner| *winner == player.id),
            reason: result.reason,
            duration_secs: result.duration_secs,
            recorded_at: timestamp_millis(),
        };

        let outcome = store.record_score(&player.id, &record).and_then(|()| {
            let mut profile = store
                .load_user_data(&player.id)?
                .unwrap_or_else(|| UserProfile::new(&player.id, &player.display_name));
            profile.display_name = player.display_name.clone();
            profile.apply(&record);
            store.update_user_data(&player.id, &profile)
        });

        match outcome {
            Ok(()) => {
                debug!("Recorded {} for {}", result.session_id, player.id);
                written += 1;
            }
            Err(e) => error!(
                "Failed to persist result of {} for {}: {}",
                result.session_id, player.id, e
            ),
        }
    }
    written
}
