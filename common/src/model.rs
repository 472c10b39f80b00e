use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::constants::{FULL_INK, SESSION_CODE_CHARSET, SESSION_CODE_LENGTH};
use crate::viewport::NormalizedPoint;

/// Six character uppercase alphanumeric session code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Parses a user-entered code. Lowercase input is accepted and normalized.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim().to_ascii_uppercase();
        let valid = code.len() == SESSION_CODE_LENGTH
            && code.bytes().all(|b| SESSION_CODE_CHARSET.contains(&b));
        valid.then_some(SessionId(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Slot identifier inside a session: `player0` is the host, `player1` the joiner
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn slot(index: usize) -> Self {
        PlayerId(format!("player{}", index))
    }

    pub fn host() -> Self {
        Self::slot(0)
    }

    pub fn from_key(key: &str) -> Self {
        PlayerId(key.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_host(&self) -> bool {
        self.slot_index() == Some(0)
    }

    pub fn slot_index(&self) -> Option<usize> {
        self.0.strip_prefix("player").and_then(|n| n.parse().ok())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ARGB color packed the way the rendering layer stores it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u32);

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color(0xFF00_0000 | (r as u32) << 16 | (g as u32) << 8 | b as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MazeComplexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    Coverage,
    Zones,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerMode {
    Paint,
    Fill,
}

/// Transient per-player state replicated under `players/{playerId}`.
/// Only the owning client writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub norm_x: f64,
    pub norm_y: f64,
    pub color: Color,
    pub mode: PlayerMode,
    pub ink: f64,
    pub active: bool,
    pub player_name: String,
    pub uid: String,
}

impl PlayerState {
    pub fn new(uid: impl Into<String>, player_name: impl Into<String>, color: Color) -> Self {
        Self {
            norm_x: 0.0,
            norm_y: 0.0,
            color,
            mode: PlayerMode::Paint,
            ink: FULL_INK,
            active: true,
            player_name: player_name.into(),
            uid: uid.into(),
        }
    }

    pub fn position(&self) -> NormalizedPoint {
        NormalizedPoint::new(self.norm_x, self.norm_y)
    }

    pub fn set_position(&mut self, point: NormalizedPoint) {
        self.norm_x = point.x;
        self.norm_y = point.y;
    }
}

/// One painting action in the append-only paint log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaintEvent {
    pub color: Color,
    pub timestamp: i64,
    pub player: PlayerId,
    pub normalized_x: f64,
    pub normalized_y: f64,
}

impl PaintEvent {
    pub fn point(&self) -> NormalizedPoint {
        NormalizedPoint::new(self.normalized_x, self.normalized_y)
    }
}

/// Host-chosen match options at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    pub match_duration_ms: i64,
    pub maze_complexity: MazeComplexity,
    pub game_mode: GameMode,
    pub is_private: bool,
}

/// Match settings as read back from the live session record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub maze_seed: i64,
    pub match_duration_ms: i64,
    pub maze_complexity: MazeComplexity,
    pub game_mode: GameMode,
    pub is_private: bool,
}

/// Full session record under `sessions/{sessionId}`.
///
/// Players are kept as raw JSON so that one malformed player node does not make
/// the whole session unreadable; use [`SessionRecord::player_states`] to parse them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default)]
    pub players: BTreeMap<PlayerId, JsonValue>,
    pub maze_seed: i64,
    pub match_duration_ms: i64,
    pub maze_complexity: MazeComplexity,
    pub game_mode: GameMode,
    pub is_private: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub last_activity_at: i64,
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub player_count: i64,
    #[serde(default)]
    pub rematch_votes: BTreeMap<PlayerId, bool>,
    #[serde(default)]
    pub rematch_in_progress: bool,
}

impl SessionRecord {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            maze_seed: self.maze_seed,
            match_duration_ms: self.match_duration_ms,
            maze_complexity: self.maze_complexity,
            game_mode: self.game_mode,
            is_private: self.is_private,
        }
    }

    /// Number of keys under the player map
    pub fn live_player_count(&self) -> usize {
        self.players.len()
    }

    /// Parses every player node, skipping the ones that are malformed
    pub fn player_states(&self) -> BTreeMap<PlayerId, PlayerState> {
        self.players
            .iter()
            .filter_map(|(id, raw)| {
                serde_json::from_value::<PlayerState>(raw.clone())
                    .ok()
                    .map(|state| (id.clone(), state))
            })
            .collect()
    }

    pub fn active_player_count(&self) -> usize {
        self.player_states().values().filter(|s| s.active).count()
    }

    /// First joiner slot not present in the player map. `player0` belongs to
    /// the host and is never handed out, even after the host left.
    pub fn next_free_slot(&self, capacity: usize) -> Option<PlayerId> {
        (1..capacity)
            .map(PlayerId::slot)
            .find(|id| !self.players.contains_key(id))
    }
}

/// Denormalized summary under `sessionDirectory/{sessionId}` used for discovery scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEntry {
    pub is_private: bool,
    pub player_count: i64,
    pub started: bool,
    #[serde(default)]
    pub created_at: i64,
}

impl DiscoveryEntry {
    /// Public, waiting for exactly one more player, not started
    pub fn is_joinable(&self) -> bool {
        !self.is_private && self.player_count == 1 && !self.started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_id_parse() {
        assert_eq!(SessionId::parse("ab12cd").unwrap().as_str(), "AB12CD");
        assert!(SessionId::parse("AB12C").is_none());
        assert!(SessionId::parse("AB12CDE").is_none());
        assert!(SessionId::parse("AB-2CD").is_none());
    }

    #[test]
    fn test_player_id_slots() {
        assert_eq!(PlayerId::host().as_str(), "player0");
        assert_eq!(PlayerId::slot(1).as_str(), "player1");
        assert!(PlayerId::host().is_host());
        assert!(!PlayerId::slot(1).is_host());
        assert_eq!(PlayerId::from_key("observer").slot_index(), None);
    }

    #[test]
    fn test_player_state_wire_names() {
        let state = PlayerState::new("uid-1", "Ada", Color::rgb(255, 0, 0));
        let value = serde_json::to_value(&state).unwrap();
        let object = value.as_object().unwrap();
        for key in ["normX", "normY", "color", "mode", "ink", "active", "playerName", "uid"] {
            assert!(object.contains_key(key), "missing {}", key);
        }
        assert_eq!(value["mode"], json!("PAINT"));
        assert_eq!(value["color"], json!(0xFFFF0000u32));
    }

    #[test]
    fn test_session_record_tolerates_bad_player() {
        let record: SessionRecord = serde_json::from_value(json!({
            "players": {
                "player0": serde_json::to_value(PlayerState::new("a", "A", Color(1))).unwrap(),
                "player1": {"normX": "broken"}
            },
            "mazeSeed": 42,
            "matchDurationMs": 180000,
            "mazeComplexity": "HIGH",
            "gameMode": "COVERAGE",
            "isPrivate": false
        }))
        .unwrap();

        assert_eq!(record.live_player_count(), 2);
        assert_eq!(record.player_states().len(), 1);
        assert_eq!(record.active_player_count(), 1);
        assert_eq!(record.next_free_slot(2), None);
        assert_eq!(record.settings().maze_complexity, MazeComplexity::High);
        assert!(!record.started);
    }

    #[test]
    fn test_next_free_slot_skips_host() {
        let mut record: SessionRecord = serde_json::from_value(json!({
            "players": {"player1": {"active": true}},
            "mazeSeed": 1,
            "matchDurationMs": 180000,
            "mazeComplexity": "LOW",
            "gameMode": "ZONES",
            "isPrivate": false
        }))
        .unwrap();
        assert_eq!(record.next_free_slot(2), None);
        assert_eq!(record.next_free_slot(3), Some(PlayerId::slot(2)));

        record.players.clear();
        assert_eq!(record.next_free_slot(2), Some(PlayerId::slot(1)));
    }

    #[test]
    fn test_discovery_entry_joinable() {
        let entry = DiscoveryEntry { is_private: false, player_count: 1, started: false, created_at: 0 };
        assert!(entry.is_joinable());
        assert!(!DiscoveryEntry { started: true, ..entry }.is_joinable());
        assert!(!DiscoveryEntry { player_count: 2, ..entry }.is_joinable());
        assert!(!DiscoveryEntry { is_private: true, ..entry }.is_joinable());
    }
}
