//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lobby::room::{
    GameMode, PeerId, PlayerState, Room, RoomId, RoomSettings, StartPosition, Team,
};
use crate::matchmaking::skill::PlayerStats;

/// Identifier of a reliable event, allocated by whoever sends it.
pub type EventId = u64;

/// Per-tick transform and vitals published by the owning peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionState {
    pub x: f32,
    pub y: f32,
    /// Facing direction in radians
    pub angle: f32,
    pub vx: f32,
    pub vy: f32,
    pub health: f32,
    pub shooting: bool,
}

/// Only the fields of a [`MotionState`] that changed since the last send
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vx: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shooting: Option<bool>,
}

impl MotionPatch {
    pub fn is_empty(&self) -> bool {
        *self == MotionPatch::default()
    }

    /// Apply this patch on top of a previously known state.
    pub fn apply(&self, base: &MotionState) -> MotionState {
        MotionState {
            x: self.x.unwrap_or(base.x),
            y: self.y.unwrap_or(base.y),
            angle: self.angle.unwrap_or(base.angle),
            vx: self.vx.unwrap_or(base.vx),
            vy: self.vy.unwrap_or(base.vy),
            health: self.health.unwrap_or(base.health),
            shooting: self.shooting.unwrap_or(base.shooting),
        }
    }
}

/// Where and how a shot landed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HitImpact {
    pub x: f32,
    pub y: f32,
    pub weapon: Option<String>,
    pub headshot: bool,
}

/// A confirmed hit as seen by room members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitNotice {
    pub room_id: RoomId,
    pub attacker_id: PeerId,
    pub target_id: PeerId,
    pub damage: f32,
    /// Target health after the hit
    pub health: f32,
    pub killed: bool,
    pub impact: HitImpact,
    /// Where the target was at shot time, when its history covers it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewound: Option<RewoundTarget>,
}

/// A target's recorded state looked up for a hit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewoundTarget {
    pub seq: u64,
    /// Server receive time of the recorded state
    pub timestamp: u64,
    pub x: f32,
    pub y: f32,
}

/// Payloads that must survive transient delivery loss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ReliablePayload {
    /// Sent to the player who was hit
    PlayerHit(HitNotice),
    /// Sent to the attacker when a hit changed their score
    ScoreConfirmed {
        room_id: RoomId,
        victim_id: PeerId,
        score: u32,
        kills: u32,
    },
}

impl ReliablePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ReliablePayload::PlayerHit(_) => "player_hit",
            ReliablePayload::ScoreConfirmed { .. } => "score_confirmed",
        }
    }
}

/// Envelope tracked until the target acknowledges it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReliableEvent {
    pub id: EventId,
    pub source: Option<PeerId>,
    pub target: PeerId,
    pub payload: ReliablePayload,
    pub timestamp: u64,
}

/// Matchmaking preferences supplied with a queue request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchPreferences {
    pub game_modes: Vec<GameMode>,
    pub regions: Vec<String>,
    pub max_ping: Option<u32>,
    pub team_size: Option<usize>,
}

/// Periodic link-quality estimate for one peer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    /// 0.0 = no loss, 1.0 = everything lost
    pub packet_loss: f32,
    pub jitter_ms: f32,
    /// 0.0 = unusable, 1.0 = perfect
    pub stability: f32,
    pub send_interval_ms: u64,
    pub compression_epsilon: f32,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    CreateRoom {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        player_name: Option<String>,
        #[serde(default)]
        settings: RoomSettings,
    },

    ListRooms,

    JoinRoom {
        room_id: RoomId,
        #[serde(default)]
        player_name: Option<String>,
        /// Preferred team, honoured when it keeps teams balanced
        #[serde(default)]
        team: Option<Team>,
    },

    LeaveRoom {
        room_id: RoomId,
        /// Must match the connection identity when supplied
        #[serde(default)]
        player_id: Option<PeerId>,
    },

    SetReady {
        room_id: RoomId,
        is_ready: bool,
    },

    StartRound {
        room_id: RoomId,
        #[serde(default)]
        start_positions: Option<Vec<StartPosition>>,
    },

    EndRound {
        room_id: RoomId,
    },

    ReturnToLobby {
        room_id: RoomId,
    },

    CancelRoom {
        room_id: RoomId,
    },

    KickPlayer {
        room_id: RoomId,
        target_id: PeerId,
    },

    SwitchTeam {
        room_id: RoomId,
        target_id: PeerId,
        team: Team,
    },

    PromotePlayer {
        room_id: RoomId,
        target_id: PeerId,
    },

    /// Remove every room owned by the caller
    ClearRooms {
        #[serde(default)]
        owner_id: Option<PeerId>,
    },

    /// Cosmetic state update, never retried
    PlayerUpdate {
        state: MotionState,
    },

    /// Hit confirmation; the client retries until it sees an `ack`
    ReportHit {
        event_id: EventId,
        target_id: PeerId,
        damage: f32,
        #[serde(default)]
        impact: HitImpact,
        /// Client clock (unix millis) when the shot was fired
        #[serde(default)]
        shot_time: Option<u64>,
    },

    /// Acknowledge a reliable event from the server
    Ack {
        event_id: EventId,
    },

    JoinMatchmaking {
        mode: GameMode,
        #[serde(default)]
        preferences: MatchPreferences,
        #[serde(default)]
        stats: PlayerStats,
        #[serde(default)]
        region: Option<String>,
    },

    CancelMatchmaking {
        ticket_id: Uuid,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
        /// Round trip the client measured on its previous ping
        #[serde(default)]
        rtt_ms: Option<u32>,
        /// Player updates the client has sent so far
        #[serde(default)]
        sent: Option<u64>,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        peer_id: PeerId,
        server_time: u64,
        /// Guest mode only: present as `token` to resume this peer id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_token: Option<String>,
    },

    RoomList {
        rooms: Vec<Room>,
    },

    RoomUpdated {
        room: Room,
    },

    RoomCreated {
        room: Room,
    },

    RoomJoined {
        room_id: RoomId,
        player: PlayerState,
        room: Room,
    },

    JoinFailed {
        reason: String,
        room_id: RoomId,
        available_rooms: Vec<Room>,
    },

    PlayerJoined {
        room_id: RoomId,
        player: PlayerState,
    },

    PlayerLeft {
        room_id: RoomId,
        id: PeerId,
    },

    PlayerUpdate {
        player_id: PeerId,
        seq: u64,
        timestamp: u64,
        patch: MotionPatch,
    },

    /// Unreliable hit notice for room members other than the target
    PlayerHit(HitNotice),

    /// Reliable event; the client must answer with `ack`
    Reliable {
        event: ReliableEvent,
    },

    StartRound {
        room_id: RoomId,
        round_id: Uuid,
        start_positions: Vec<StartPosition>,
    },

    RoundEnded {
        room_id: RoomId,
        round_id: Option<Uuid>,
        scoreboard: Vec<PlayerState>,
    },

    RoomCancelled {
        room_id: RoomId,
    },

    Kicked {
        room_id: RoomId,
        by: PeerId,
    },

    MatchmakingQueued {
        ticket_id: Uuid,
        game_mode: GameMode,
        queue_position: usize,
    },

    MatchmakingCancelled {
        ticket_id: Uuid,
        found: bool,
    },

    MatchFound {
        room_id: RoomId,
        game_mode: GameMode,
        players: Vec<PeerId>,
        estimated_start_time: u64,
        quality: u8,
    },

    RoomsCleared {
        room_ids: Vec<RoomId>,
    },

    ClearRoomsFailed {
        reason: String,
    },

    DeliveryFailed {
        event_id: EventId,
        target_id: PeerId,
        reason: String,
    },

    NetworkQuality {
        report: QualityReport,
    },

    /// Acknowledges a client `report_hit`
    Ack {
        event_id: EventId,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },
}

impl ServerMsg {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_snake_case_tags_and_camel_case_fields() {
        let json = r#"{"type":"set_ready","roomId":"room_1","isReady":true}"#;
        match serde_json::from_str::<ClientMsg>(json).unwrap() {
            ClientMsg::SetReady { room_id, is_ready } => {
                assert_eq!(room_id, RoomId::from("room_1"));
                assert!(is_ready);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn report_hit_reads_optional_shot_time() {
        let mut wire = serde_json::json!({
            "type": "report_hit",
            "eventId": 7,
            "targetId": Uuid::from_u128(2),
            "damage": 10,
        });
        match serde_json::from_value::<ClientMsg>(wire.clone()).unwrap() {
            ClientMsg::ReportHit { shot_time, .. } => assert_eq!(shot_time, None),
            other => panic!("unexpected {other:?}"),
        }

        wire["shotTime"] = 1150.into();
        match serde_json::from_value::<ClientMsg>(wire).unwrap() {
            ClientMsg::ReportHit { shot_time, .. } => assert_eq!(shot_time, Some(1150)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn create_room_defaults_settings() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"create_room"}"#).unwrap();
        match msg {
            ClientMsg::CreateRoom { settings, name, .. } => {
                assert_eq!(settings, RoomSettings::default());
                assert!(name.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn patch_omits_unchanged_fields() {
        let patch = MotionPatch {
            x: Some(3.0),
            ..MotionPatch::default()
        };
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"x":3.0}"#);

        let base = MotionState {
            y: 9.0,
            ..MotionState::default()
        };
        let applied = patch.apply(&base);
        assert_eq!(applied.x, 3.0);
        assert_eq!(applied.y, 9.0);
    }

    #[test]
    fn reliable_payload_is_tagged() {
        let payload = ReliablePayload::ScoreConfirmed {
            room_id: RoomId::from("r"),
            victim_id: Uuid::nil(),
            score: 100,
            kills: 1,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "score_confirmed");
        assert_eq!(json["victimId"], serde_json::json!(Uuid::nil()));
        assert_eq!(payload.kind(), "score_confirmed");
    }

    #[test]
    fn join_failed_shape() {
        let msg = ServerMsg::JoinFailed {
            reason: "not_found".into(),
            room_id: RoomId::from("no-such-id"),
            available_rooms: vec![],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "join_failed");
        assert_eq!(json["roomId"], "no-such-id");
        assert!(json["availableRooms"].as_array().unwrap().is_empty());
    }
}
