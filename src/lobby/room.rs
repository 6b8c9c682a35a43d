//! Room and player records replicated to every connected peer

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of one connected client.
pub type PeerId = Uuid;

/// Opaque room token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Room lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Lobby open, accepting joins
    Waiting,
    /// Every member is ready; auto-start may be pending
    Ready,
    /// Round in progress
    InGame,
    /// Round over, scoreboard visible
    Finished,
    /// Torn down by the owner before starting
    Cancelled,
}

impl RoomStatus {
    /// Whether `self -> next` is a legal lifecycle transition.
    pub fn can_transition(self, next: RoomStatus) -> bool {
        use RoomStatus::*;
        matches!(
            (self, next),
            (Waiting, Ready)
                | (Ready, Waiting)
                | (Ready, InGame)
                | (Waiting, InGame)
                | (InGame, Finished)
                | (Finished, Waiting)
                | (Waiting, Cancelled)
                | (Ready, Cancelled)
        )
    }

    /// Lobby phases during which the ready-gate applies.
    pub fn is_lobby(self) -> bool {
        matches!(self, RoomStatus::Waiting | RoomStatus::Ready)
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Ready => "ready",
            RoomStatus::InGame => "in_game",
            RoomStatus::Finished => "finished",
            RoomStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    TeamDeathmatch,
    FreeForAll,
    CaptureTheFlag,
    Domination,
}

impl GameMode {
    pub const ALL: [GameMode; 4] = [
        GameMode::TeamDeathmatch,
        GameMode::FreeForAll,
        GameMode::CaptureTheFlag,
        GameMode::Domination,
    ];

    /// Number of queued players grouped into one matchmade room.
    pub fn match_size(self) -> usize {
        match self {
            GameMode::TeamDeathmatch => 4,
            GameMode::FreeForAll => 4,
            GameMode::CaptureTheFlag => 6,
            GameMode::Domination => 6,
        }
    }

    pub fn default_map(self) -> &'static str {
        match self {
            GameMode::TeamDeathmatch => "warehouse",
            GameMode::FreeForAll => "arena",
            GameMode::CaptureTheFlag => "canyon",
            GameMode::Domination => "outpost",
        }
    }
}

impl Default for GameMode {
    fn default() -> Self {
        Self::TeamDeathmatch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::Normal
    }
}

/// Room settings chosen by the creator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSettings {
    pub game_mode: GameMode,
    pub map: String,
    pub time_limit_secs: u32,
    pub score_limit: u32,
    pub friendly_fire: bool,
    pub max_players: usize,
    pub team_size: usize,
    pub difficulty: Difficulty,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            game_mode: GameMode::TeamDeathmatch,
            map: GameMode::TeamDeathmatch.default_map().to_string(),
            time_limit_secs: 600,
            score_limit: 50,
            friendly_fire: false,
            max_players: 8,
            team_size: 4,
            difficulty: Difficulty::Normal,
        }
    }
}

impl RoomSettings {
    /// Settings for a room formed by matchmaking.
    pub fn for_match(game_mode: GameMode, players: usize) -> Self {
        Self {
            game_mode,
            map: game_mode.default_map().to_string(),
            max_players: players.max(2),
            team_size: players.div_ceil(2).max(1),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Red,
    Blue,
}

impl Team {
    pub fn other(self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
        }
    }

    /// Alternating assignment used for matchmade rooms.
    pub fn alternating(index: usize) -> Team {
        if index % 2 == 0 {
            Team::Red
        } else {
            Team::Blue
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Assault,
    Support,
    Recon,
    Medic,
}

impl Default for Role {
    fn default() -> Self {
        Self::Assault
    }
}

pub const DEFAULT_MAX_HEALTH: f32 = 100.0;

/// A member's replicated state within a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub id: PeerId,
    pub name: String,
    pub x: f32,
    pub y: f32,
    /// Facing direction in radians
    pub angle: f32,
    pub health: f32,
    pub max_health: f32,
    pub team: Team,
    pub role: Role,
    pub is_ready: bool,
    pub score: u32,
    pub kills: u32,
    pub deaths: u32,
    /// Last measured round-trip time in milliseconds
    pub ping: u32,
}

impl PlayerState {
    pub fn new(id: PeerId, name: impl Into<String>, team: Team) -> Self {
        Self {
            id,
            name: name.into(),
            x: 0.0,
            y: 0.0,
            angle: 0.0,
            health: DEFAULT_MAX_HEALTH,
            max_health: DEFAULT_MAX_HEALTH,
            team,
            role: Role::Assault,
            is_ready: false,
            score: 0,
            kills: 0,
            deaths: 0,
            ping: 0,
        }
    }

    /// Default display name when the client supplies none.
    pub fn default_name(id: &PeerId) -> String {
        format!("Player_{}", &id.simple().to_string()[..8])
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }

    /// Reset per-round counters and vitals.
    pub fn reset_round(&mut self) {
        self.health = self.max_health;
        self.score = 0;
        self.kills = 0;
        self.deaths = 0;
    }
}

/// Start slot handed out with the round-start signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPosition {
    pub player_id: PeerId,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
}

/// A mutable session container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub owner_id: PeerId,
    pub players: HashMap<PeerId, PlayerState>,
    pub status: RoomStatus,
    pub settings: RoomSettings,
    /// Always equal to `players.len()` once written through the store
    pub current_players: usize,
    /// Bumped by the store on every write
    pub revision: u64,
    pub round_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(
        id: RoomId,
        name: impl Into<String>,
        owner: PlayerState,
        settings: RoomSettings,
    ) -> Self {
        let owner_id = owner.id;
        let mut players = HashMap::new();
        players.insert(owner_id, owner);

        Self {
            id,
            name: name.into(),
            owner_id,
            players,
            status: RoomStatus::Waiting,
            settings,
            current_players: 1,
            revision: 0,
            round_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_member(&self, peer: &PeerId) -> bool {
        self.players.contains_key(peer)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.settings.max_players
    }

    /// Members on (red, blue)
    pub fn team_counts(&self) -> (usize, usize) {
        self.players.values().fold((0, 0), |(red, blue), p| match p.team {
            Team::Red => (red + 1, blue),
            Team::Blue => (red, blue + 1),
        })
    }

    /// True when the room has members and every one is ready.
    pub fn all_ready(&self) -> bool {
        !self.players.is_empty() && self.players.values().all(|p| p.is_ready)
    }

    /// Member ids in ascending order
    pub fn member_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.players.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Recompute derived counters from membership.
    pub fn sync_counters(&mut self) {
        self.current_players = self.players.len();
    }

    /// Members sorted by score, then kills, for end-of-round display.
    pub fn scoreboard(&self) -> Vec<PlayerState> {
        let mut board: Vec<PlayerState> = self.players.values().cloned().collect();
        board.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(b.kills.cmp(&a.kills))
                .then(a.id.cmp(&b.id))
        });
        board
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u128) -> PeerId {
        Uuid::from_u128(n)
    }

    #[test]
    fn lifecycle_transitions() {
        assert!(RoomStatus::Waiting.can_transition(RoomStatus::Ready));
        assert!(RoomStatus::Ready.can_transition(RoomStatus::InGame));
        assert!(RoomStatus::InGame.can_transition(RoomStatus::Finished));
        assert!(RoomStatus::Ready.can_transition(RoomStatus::Cancelled));
        assert!(!RoomStatus::InGame.can_transition(RoomStatus::Cancelled));
        assert!(!RoomStatus::Finished.can_transition(RoomStatus::InGame));
        assert!(!RoomStatus::Cancelled.can_transition(RoomStatus::Waiting));
    }

    #[test]
    fn team_counts_and_ready() {
        let mut room = Room::new(
            RoomId::from("r1"),
            "test",
            PlayerState::new(peer(1), "a", Team::Red),
            RoomSettings::default(),
        );
        room.players.insert(peer(2), PlayerState::new(peer(2), "b", Team::Blue));
        room.players.insert(peer(3), PlayerState::new(peer(3), "c", Team::Blue));
        assert_eq!(room.team_counts(), (1, 2));
        assert!(!room.all_ready());

        for p in room.players.values_mut() {
            p.is_ready = true;
        }
        assert!(room.all_ready());

        room.players.clear();
        assert!(!room.all_ready());
    }

    #[test]
    fn room_serializes_camel_case() {
        let room = Room::new(
            RoomId::from("r1"),
            "test",
            PlayerState::new(peer(1), "a", Team::Red),
            RoomSettings::default(),
        );
        let json = serde_json::to_value(&room).unwrap();
        assert_eq!(json["ownerId"], serde_json::json!(peer(1)));
        assert_eq!(json["currentPlayers"], 1);
        assert_eq!(json["status"], "waiting");
        assert_eq!(json["settings"]["maxPlayers"], 8);
    }

    #[test]
    fn match_settings_fit_group() {
        let settings = RoomSettings::for_match(GameMode::CaptureTheFlag, 6);
        assert_eq!(settings.max_players, 6);
        assert_eq!(settings.team_size, 3);
        assert_eq!(settings.map, "canyon");
    }
}
