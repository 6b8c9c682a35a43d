//! Room state machine: create, join, leave, ready-check, rounds, moderation
//!
//! ```text
//! waiting ──all ready──▶ ready ──start──▶ in_game ──end──▶ finished
//!    ▲  ◀──someone unready──┘                                 │
//!    └───────────────────── return to lobby ─────────────────┘
//! waiting | ready ──owner cancels──▶ cancelled (then removed)
//! ```
//!
//! Every mutation is applied to an owned copy of the room and written back
//! through [`RoomStore::upsert`] / [`RoomStore::remove`] in one step.

use std::collections::HashMap;
use std::f32::consts::{PI, TAU};
use std::sync::Arc;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::LobbyError;
use super::room::{PeerId, PlayerState, Room, RoomId, RoomSettings, RoomStatus, StartPosition, Team};
use crate::config::LobbyConfig;
use crate::store::RoomStore;
use crate::transport::Transport;
use crate::util::tasks::{Fired, ScheduledTasks};
use crate::ws::protocol::ServerMsg;

/// Centre of the generated start circle, in map units
pub const START_CENTER: (f32, f32) = (1000.0, 1000.0);
/// Radius of the generated start circle
pub const START_RADIUS: f32 = 300.0;
/// Score awarded for a kill
pub const KILL_SCORE: u32 = 100;

/// Result of applying a confirmed hit
#[derive(Debug, Clone, PartialEq)]
pub struct HitOutcome {
    pub room_id: RoomId,
    pub applied: bool,
    pub target_health: f32,
    pub killed: bool,
    pub attacker_score: u32,
    pub attacker_kills: u32,
    pub members: Vec<PeerId>,
}

pub struct RoomLifecycle {
    store: RoomStore,
    transport: Arc<dyn Transport>,
    /// peer -> the one room it is seated in
    memberships: HashMap<PeerId, RoomId>,
    ready_timers: ScheduledTasks<RoomId>,
    /// Latest measured ping per peer, folded into the next room write
    pending_pings: HashMap<PeerId, u32>,
    policy: LobbyConfig,
    rng: ChaCha8Rng,
}

impl RoomLifecycle {
    pub fn new(
        store: RoomStore,
        transport: Arc<dyn Transport>,
        policy: LobbyConfig,
        ready_timers: ScheduledTasks<RoomId>,
    ) -> Self {
        let rng = match policy.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        Self {
            store,
            transport,
            memberships: HashMap::new(),
            ready_timers,
            pending_pings: HashMap::new(),
            policy,
            rng,
        }
    }

    pub fn store(&self) -> &RoomStore {
        &self.store
    }

    pub fn list_rooms(&self) -> Vec<Room> {
        self.store.get_all()
    }

    pub fn room(&self, id: &RoomId) -> Option<Room> {
        self.store.get_by_id(id)
    }

    /// The room `peer` is seated in, if any
    pub fn room_of(&self, peer: &PeerId) -> Option<&RoomId> {
        self.memberships.get(peer)
    }

    pub fn has_ready_timer(&self, id: &RoomId) -> bool {
        self.ready_timers.is_scheduled(id)
    }

    pub fn policy(&self) -> &LobbyConfig {
        &self.policy
    }

    /// Open a new room with `creator` as its only member and owner.
    pub fn create(
        &mut self,
        creator: PeerId,
        player_name: Option<String>,
        room_name: Option<String>,
        mut settings: RoomSettings,
    ) -> Result<Room, LobbyError> {
        self.vacate(&creator);

        settings.max_players = settings.max_players.max(1);
        let id = self.generate_room_id();
        let name = player_name.unwrap_or_else(|| PlayerState::default_name(&creator));
        let room_name = room_name.unwrap_or_else(|| format!("{}'s room", name));
        let owner = PlayerState::new(creator, name, Team::Red);

        let room = self
            .commit(Room::new(id.clone(), room_name, owner, settings))
            .ok_or_else(|| LobbyError::RoomNotFound(id.clone()))?;
        self.memberships.insert(creator, id.clone());

        info!(room_id = %id, owner_id = %creator, "Room created");
        self.transport
            .notify(&creator, ServerMsg::RoomCreated { room: room.clone() });
        Ok(room)
    }

    /// Seat `peer` in an existing room. Failures never mutate the room.
    pub fn join(
        &mut self,
        room_id: &RoomId,
        peer: PeerId,
        player_name: Option<String>,
        requested_team: Option<Team>,
    ) -> Result<Room, LobbyError> {
        let mut room = self
            .store
            .get_by_id(room_id)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.clone()))?;

        if room.is_member(&peer) {
            return Ok(room);
        }
        if room.is_full() {
            return Err(LobbyError::RoomFull(room_id.clone()));
        }
        if room.status != RoomStatus::Waiting {
            return Err(LobbyError::AlreadyStarted(room_id.clone()));
        }

        self.vacate(&peer);

        let team = self.pick_team(&room, requested_team);
        let name = player_name.unwrap_or_else(|| PlayerState::default_name(&peer));
        let player = PlayerState::new(peer, name, team);
        let others = room.member_ids();
        room.players.insert(peer, player.clone());
        self.apply_ready_gate(&mut room);

        let room = self
            .commit(room)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.clone()))?;
        self.memberships.insert(peer, room_id.clone());

        info!(
            room_id = %room_id,
            peer_id = %peer,
            team = ?team,
            player_count = room.current_players,
            "Player joined room"
        );

        self.transport.notify(
            &peer,
            ServerMsg::RoomJoined {
                room_id: room_id.clone(),
                player: player.clone(),
                room: room.clone(),
            },
        );
        self.transport.notify_all(
            &others,
            &ServerMsg::PlayerJoined {
                room_id: room_id.clone(),
                player,
            },
        );
        Ok(room)
    }

    /// Remove `peer` from a room. Returns the room afterwards, or `None` if
    /// it was the last member and the room was deleted.
    pub fn leave(&mut self, room_id: &RoomId, peer: PeerId) -> Result<Option<Room>, LobbyError> {
        let mut room = self
            .store
            .get_by_id(room_id)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.clone()))?;

        if room.players.remove(&peer).is_none() {
            return Err(LobbyError::NotAMember(peer));
        }
        self.memberships.remove(&peer);
        self.pending_pings.remove(&peer);

        if room.players.is_empty() {
            self.ready_timers.cancel(room_id);
            self.store.remove(room_id);
            info!(room_id = %room_id, "Last player left, room removed");
            return Ok(None);
        }

        if room.owner_id == peer {
            reassign_owner(&mut room);
            info!(room_id = %room_id, owner_id = %room.owner_id, "Ownership reassigned");
        }
        self.apply_ready_gate(&mut room);

        let room = self.commit(room);
        if let Some(room) = &room {
            info!(room_id = %room_id, peer_id = %peer, "Player left room");
            self.transport.notify_all(
                &room.member_ids(),
                &ServerMsg::PlayerLeft {
                    room_id: room_id.clone(),
                    id: peer,
                },
            );
        }
        Ok(room)
    }

    /// Drop a disconnected peer from whatever room it is in.
    pub fn disconnect(&mut self, peer: &PeerId) {
        self.pending_pings.remove(peer);
        self.vacate(peer);
    }

    pub fn set_ready(
        &mut self,
        room_id: &RoomId,
        peer: PeerId,
        is_ready: bool,
    ) -> Result<Room, LobbyError> {
        let mut room = self.member_room(room_id, &peer)?;
        if !room.status.is_lobby() {
            return Err(LobbyError::InvalidTransition {
                from: room.status,
                to: if is_ready { RoomStatus::Ready } else { RoomStatus::Waiting },
            });
        }

        if let Some(player) = room.players.get_mut(&peer) {
            player.is_ready = is_ready;
        }
        self.apply_ready_gate(&mut room);

        debug!(
            room_id = %room_id,
            peer_id = %peer,
            is_ready,
            status = %room.status,
            "Ready flag set"
        );
        self.commit(room)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.clone()))
    }

    /// Handle an elapsed ready-grace timer.
    pub fn on_ready_timer(&mut self, fired: &Fired<RoomId>) {
        if !self.ready_timers.accept(fired) {
            debug!(room_id = %fired.key, "Ignoring stale ready timer");
            return;
        }

        match self.store.get_by_id(&fired.key) {
            Some(room) if room.status == RoomStatus::Ready => {
                info!(room_id = %room.id, "Ready grace elapsed, starting round");
                self.begin_round(room, None);
            }
            Some(room) => {
                debug!(
                    room_id = %room.id,
                    status = %room.status,
                    "Ready timer fired after status changed"
                );
            }
            None => {}
        }
    }

    /// Start a round. From `ready` any member may start; from `waiting`
    /// only the owner may force it.
    pub fn start(
        &mut self,
        room_id: &RoomId,
        requester: PeerId,
        start_positions: Option<Vec<StartPosition>>,
    ) -> Result<Room, LobbyError> {
        let room = self.member_room(room_id, &requester)?;
        match room.status {
            RoomStatus::Ready => {}
            RoomStatus::Waiting if room.owner_id == requester => {}
            RoomStatus::Waiting => return Err(LobbyError::NotOwner),
            from => {
                return Err(LobbyError::InvalidTransition {
                    from,
                    to: RoomStatus::InGame,
                })
            }
        }

        self.begin_round(room, start_positions)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.clone()))
    }

    fn begin_round(
        &mut self,
        mut room: Room,
        supplied: Option<Vec<StartPosition>>,
    ) -> Option<Room> {
        self.ready_timers.cancel(&room.id);

        let members = room.member_ids();
        let positions = match supplied {
            Some(p) if members.iter().all(|id| p.iter().any(|s| &s.player_id == id)) => p,
            Some(_) => {
                warn!(
                    room_id = %room.id,
                    "Supplied start positions do not cover every member, generating"
                );
                generate_start_positions(&members)
            }
            None => generate_start_positions(&members),
        };

        for slot in &positions {
            if let Some(player) = room.players.get_mut(&slot.player_id) {
                player.x = slot.x;
                player.y = slot.y;
                player.angle = slot.angle;
            }
        }
        for player in room.players.values_mut() {
            player.reset_round();
        }

        let round_id = Uuid::new_v4();
        room.round_id = Some(round_id);
        room.status = RoomStatus::InGame;

        let room = self.commit(room)?;
        info!(
            room_id = %room.id,
            round_id = %round_id,
            players = room.current_players,
            "Round started"
        );
        self.transport.notify_all(
            &room.member_ids(),
            &ServerMsg::StartRound {
                room_id: room.id.clone(),
                round_id,
                start_positions: positions,
            },
        );
        Some(room)
    }

    pub fn end(&mut self, room_id: &RoomId, requester: PeerId) -> Result<Room, LobbyError> {
        let mut room = self.member_room(room_id, &requester)?;
        transition(&mut room, RoomStatus::Finished)?;

        let room = self
            .commit(room)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.clone()))?;
        info!(room_id = %room_id, "Round ended");
        self.transport.notify_all(
            &room.member_ids(),
            &ServerMsg::RoundEnded {
                room_id: room_id.clone(),
                round_id: room.round_id,
                scoreboard: room.scoreboard(),
            },
        );
        Ok(room)
    }

    /// Owner moves a finished room back to the lobby for another round.
    pub fn return_to_lobby(
        &mut self,
        room_id: &RoomId,
        requester: PeerId,
    ) -> Result<Room, LobbyError> {
        let mut room = self.owned_room(room_id, &requester)?;
        transition(&mut room, RoomStatus::Waiting)?;

        room.round_id = None;
        for player in room.players.values_mut() {
            player.is_ready = false;
            player.reset_round();
        }

        self.commit(room)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.clone()))
    }

    /// Owner tears down a room that has not started.
    pub fn cancel(&mut self, room_id: &RoomId, requester: PeerId) -> Result<(), LobbyError> {
        let mut room = self.owned_room(room_id, &requester)?;
        transition(&mut room, RoomStatus::Cancelled)?;

        self.ready_timers.cancel(room_id);
        if let Some(room) = self.commit(room) {
            self.close_room(&room);
        }
        info!(room_id = %room_id, "Room cancelled by owner");
        Ok(())
    }

    pub fn kick(
        &mut self,
        room_id: &RoomId,
        requester: PeerId,
        target: PeerId,
    ) -> Result<Room, LobbyError> {
        let mut room = self.owned_room(room_id, &requester)?;
        if target == requester {
            return Err(LobbyError::CannotKickSelf);
        }
        if room.players.remove(&target).is_none() {
            return Err(LobbyError::NotAMember(target));
        }
        self.memberships.remove(&target);
        self.pending_pings.remove(&target);
        self.apply_ready_gate(&mut room);

        let room = self
            .commit(room)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.clone()))?;
        info!(room_id = %room_id, target_id = %target, "Player kicked");

        self.transport.notify(
            &target,
            ServerMsg::Kicked {
                room_id: room_id.clone(),
                by: requester,
            },
        );
        self.transport.notify_all(
            &room.member_ids(),
            &ServerMsg::PlayerLeft {
                room_id: room_id.clone(),
                id: target,
            },
        );
        Ok(room)
    }

    pub fn switch_team(
        &mut self,
        room_id: &RoomId,
        requester: PeerId,
        target: PeerId,
        team: Team,
    ) -> Result<Room, LobbyError> {
        let mut room = self.owned_room(room_id, &requester)?;
        let player = room
            .players
            .get_mut(&target)
            .ok_or(LobbyError::NotAMember(target))?;
        player.team = team;

        self.commit(room)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.clone()))
    }

    pub fn promote(
        &mut self,
        room_id: &RoomId,
        requester: PeerId,
        target: PeerId,
    ) -> Result<Room, LobbyError> {
        let mut room = self.owned_room(room_id, &requester)?;
        if !room.is_member(&target) {
            return Err(LobbyError::NotAMember(target));
        }
        room.owner_id = target;

        info!(room_id = %room_id, owner_id = %target, "Ownership transferred");
        self.commit(room)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.clone()))
    }

    /// Remove every room owned by `requester`. The owner is always the
    /// authenticated connection; a differing claimed id is rejected.
    pub fn clear_rooms(
        &mut self,
        requester: PeerId,
        claimed_owner: Option<PeerId>,
    ) -> Result<Vec<RoomId>, LobbyError> {
        if claimed_owner.is_some_and(|claimed| claimed != requester) {
            warn!(peer_id = %requester, "Rejected room clear for another owner");
            return Err(LobbyError::IdentityMismatch);
        }

        let owned: Vec<Room> = self
            .store
            .get_all()
            .into_iter()
            .filter(|r| r.owner_id == requester)
            .collect();

        let mut cleared = Vec::with_capacity(owned.len());
        for room in owned {
            self.ready_timers.cancel(&room.id);
            self.close_room(&room);
            cleared.push(room.id);
        }

        info!(peer_id = %requester, rooms = cleared.len(), "Cleared owned rooms");
        Ok(cleared)
    }

    /// Apply a confirmed hit from `attacker` to `target` in their shared room.
    pub fn record_hit(
        &mut self,
        attacker: PeerId,
        target: PeerId,
        damage: f32,
    ) -> Result<HitOutcome, LobbyError> {
        let room_id = self
            .memberships
            .get(&attacker)
            .cloned()
            .ok_or(LobbyError::NotAMember(attacker))?;
        let mut room = self.member_room(&room_id, &attacker)?;
        if room.status != RoomStatus::InGame {
            return Err(LobbyError::RoundNotActive);
        }

        let attacker_team = room.players.get(&attacker).map(|p| p.team);
        let target_state = room.players.get_mut(&target).ok_or(LobbyError::NotAMember(target))?;

        let friendly = attacker != target && attacker_team == Some(target_state.team);
        let damage = if damage.is_finite() { damage.max(0.0) } else { 0.0 };

        if !target_state.is_alive() || (friendly && !room.settings.friendly_fire) {
            let health = target_state.health;
            let attacker_state = room.players.get(&attacker);
            return Ok(HitOutcome {
                room_id,
                applied: false,
                target_health: health,
                killed: false,
                attacker_score: attacker_state.map_or(0, |p| p.score),
                attacker_kills: attacker_state.map_or(0, |p| p.kills),
                members: room.member_ids(),
            });
        }

        target_state.health = (target_state.health - damage).max(0.0);
        let killed = !target_state.is_alive();
        let target_health = target_state.health;
        if killed {
            target_state.deaths += 1;
        }

        if killed && attacker != target {
            if let Some(a) = room.players.get_mut(&attacker) {
                a.kills += 1;
                a.score += KILL_SCORE;
            }
        }
        let (attacker_score, attacker_kills) = room
            .players
            .get(&attacker)
            .map_or((0, 0), |p| (p.score, p.kills));
        let members = room.member_ids();

        self.commit(room);
        debug!(
            room_id = %room_id,
            attacker_id = %attacker,
            target_id = %target,
            damage,
            killed,
            "Hit applied"
        );

        Ok(HitOutcome {
            room_id,
            applied: true,
            target_health,
            killed,
            attacker_score,
            attacker_kills,
            members,
        })
    }

    /// Remember a peer's latest ping for the next write of its room.
    pub fn record_ping(&mut self, peer: PeerId, ping_ms: u32) {
        if self.memberships.contains_key(&peer) {
            self.pending_pings.insert(peer, ping_ms);
        }
    }

    /// Members of the room `peer` is in, excluding `peer`.
    pub fn room_peers(&self, peer: &PeerId) -> Vec<PeerId> {
        self.memberships
            .get(peer)
            .and_then(|id| self.store.get_by_id(id))
            .map(|room| room.member_ids().into_iter().filter(|p| p != peer).collect())
            .unwrap_or_default()
    }

    /// Leave the current room, if any, ignoring errors.
    fn vacate(&mut self, peer: &PeerId) {
        if let Some(current) = self.memberships.get(peer).cloned() {
            if let Err(e) = self.leave(&current, *peer) {
                warn!(peer_id = %peer, room_id = %current, error = %e, "Stale membership");
                self.memberships.remove(peer);
            }
        }
    }

    /// Notify members that a room is gone, drop their memberships and delete it.
    fn close_room(&mut self, room: &Room) {
        let members = room.member_ids();
        self.transport.notify_all(
            &members,
            &ServerMsg::RoomCancelled {
                room_id: room.id.clone(),
            },
        );
        for peer in &members {
            self.memberships.remove(peer);
        }
        self.store.remove(&room.id);
    }

    fn member_room(&self, room_id: &RoomId, peer: &PeerId) -> Result<Room, LobbyError> {
        let room = self
            .store
            .get_by_id(room_id)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.clone()))?;
        if !room.is_member(peer) {
            return Err(LobbyError::NotAMember(*peer));
        }
        Ok(room)
    }

    fn owned_room(&self, room_id: &RoomId, peer: &PeerId) -> Result<Room, LobbyError> {
        let room = self
            .store
            .get_by_id(room_id)
            .ok_or_else(|| LobbyError::RoomNotFound(room_id.clone()))?;
        if room.owner_id != *peer {
            return Err(LobbyError::NotOwner);
        }
        Ok(room)
    }

    /// Keep `ready` ⇔ every member ready while in the lobby, scheduling or
    /// cancelling the automatic start alongside.
    fn apply_ready_gate(&mut self, room: &mut Room) {
        if !room.status.is_lobby() {
            return;
        }

        let all_ready = room.all_ready();
        match room.status {
            RoomStatus::Waiting if all_ready => {
                room.status = RoomStatus::Ready;
                info!(room_id = %room.id, "All players ready");
                if self.policy.auto_start {
                    self.ready_timers.schedule(room.id.clone(), self.policy.ready_grace);
                }
            }
            RoomStatus::Ready if !all_ready => {
                room.status = RoomStatus::Waiting;
                if self.ready_timers.cancel(&room.id) {
                    debug!(room_id = %room.id, "Auto-start cancelled");
                }
            }
            _ => {}
        }
    }

    /// Team for a new member: the requested one if it keeps the teams within
    /// one of each other, else the smaller team with a coin flip on ties.
    fn pick_team(&mut self, room: &Room, requested: Option<Team>) -> Team {
        let (red, blue) = room.team_counts();
        let count = |t: Team| if t == Team::Red { red } else { blue };

        if let Some(team) = requested {
            if count(team) <= count(team.other()) {
                return team;
            }
        }

        match red.cmp(&blue) {
            std::cmp::Ordering::Less => Team::Red,
            std::cmp::Ordering::Greater => Team::Blue,
            std::cmp::Ordering::Equal => {
                if self.rng.gen_bool(0.5) {
                    Team::Red
                } else {
                    Team::Blue
                }
            }
        }
    }

    fn generate_room_id(&mut self) -> RoomId {
        loop {
            let mut bytes = [0u8; 6];
            self.rng.fill_bytes(&mut bytes);
            let id = RoomId(format!("room_{}", hex::encode(bytes)));
            if !self.store.contains(&id) {
                return id;
            }
        }
    }

    /// Write a room through the store and tell its members.
    fn commit(&mut self, mut room: Room) -> Option<Room> {
        for (peer, player) in room.players.iter_mut() {
            if let Some(ping) = self.pending_pings.remove(peer) {
                player.ping = ping;
            }
        }

        let room = self.store.upsert(room)?;
        self.transport.notify_all(
            &room.member_ids(),
            &ServerMsg::RoomUpdated { room: room.clone() },
        );
        Some(room)
    }
}

fn transition(room: &mut Room, to: RoomStatus) -> Result<(), LobbyError> {
    if !room.status.can_transition(to) {
        return Err(LobbyError::InvalidTransition {
            from: room.status,
            to,
        });
    }
    room.status = to;
    Ok(())
}

/// Lowest remaining peer id becomes owner.
fn reassign_owner(room: &mut Room) {
    if let Some(next) = room.players.keys().min().copied() {
        room.owner_id = next;
    }
}

/// Evenly spaced slots on a circle around [`START_CENTER`], one per member
/// in the given order, each facing the centre.
pub fn generate_start_positions(members: &[PeerId]) -> Vec<StartPosition> {
    let n = members.len().max(1) as f32;
    members
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let theta = TAU * i as f32 / n;
            let facing = (theta + PI) % TAU;
            StartPosition {
                player_id: *id,
                x: START_CENTER.0 + START_RADIUS * theta.cos(),
                y: START_CENTER.1 + START_RADIUS * theta.sin(),
                angle: facing,
            }
        })
        .collect()
}
