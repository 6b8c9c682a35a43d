//! Matchmaking service - turns queued players into rooms

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use super::queue::{MatchmakingPlayer, MatchmakingQueue};
use super::skill::{match_quality, SkillSample};
use crate::lobby::error::LobbyError;
use crate::lobby::lifecycle::RoomLifecycle;
use crate::lobby::room::{GameMode, PeerId, PlayerState, RoomId, RoomSettings, Team};
use crate::transport::Transport;
use crate::util::time::unix_millis;
use crate::ws::protocol::ServerMsg;

pub type TicketId = Uuid;

pub struct Matchmaker {
    queue: MatchmakingQueue,
    transport: Arc<dyn Transport>,
    /// Advertised delay between match formation and round start
    start_delay: Duration,
}

impl Matchmaker {
    pub fn new(transport: Arc<dyn Transport>, start_delay: Duration) -> Self {
        Self {
            queue: MatchmakingQueue::new(),
            transport,
            start_delay,
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.total_len()
    }

    pub fn is_queued(&self, peer: &PeerId) -> bool {
        self.queue.contains(peer)
    }

    /// Queue a player for `mode`. Peers already seated in a room are rejected.
    pub fn join(
        &mut self,
        lifecycle: &RoomLifecycle,
        mode: GameMode,
        player: MatchmakingPlayer,
    ) -> Result<TicketId, LobbyError> {
        let peer = player.peer_id;
        if lifecycle.room_of(&peer).is_some() {
            return Err(LobbyError::AlreadyInRoom);
        }

        let ticket_id = player.ticket_id;
        let mmr = player.skill.mmr;
        self.queue.enqueue(mode, player);
        let queue_position = self.queue.position(&peer).unwrap_or(1);

        info!(
            peer_id = %peer,
            game_mode = ?mode,
            mmr,
            queue_size = self.queue.len(mode),
            "Player joined matchmaking queue"
        );

        self.transport.notify(
            &peer,
            ServerMsg::MatchmakingQueued {
                ticket_id,
                game_mode: mode,
                queue_position,
            },
        );
        Ok(ticket_id)
    }

    /// Withdraw `peer`'s ticket. Tickets held by other peers are left alone.
    pub fn cancel(&mut self, peer: PeerId, ticket_id: TicketId) -> bool {
        let found = self.queue.owner_of(&ticket_id) == Some(peer)
            && self.queue.dequeue_ticket(&ticket_id).is_some();

        self.transport
            .notify(&peer, ServerMsg::MatchmakingCancelled { ticket_id, found });
        found
    }

    /// Drop `peer` from every queue without notifying it.
    pub fn cancel_peer(&mut self, peer: &PeerId) -> bool {
        self.queue.dequeue(peer)
    }

    /// Form as many rooms as the queues allow. Returns the new room ids.
    pub fn tick(&mut self, lifecycle: &mut RoomLifecycle) -> Vec<RoomId> {
        let mut formed = Vec::new();

        for mode in GameMode::ALL {
            for group in self.queue.find_matches(mode, mode.match_size()) {
                if let Some(room_id) = self.form_room(lifecycle, mode, &group) {
                    formed.push(room_id);
                }
            }
        }

        formed
    }

    fn form_room(
        &mut self,
        lifecycle: &mut RoomLifecycle,
        mode: GameMode,
        group: &[MatchmakingPlayer],
    ) -> Option<RoomId> {
        let (host, guests) = group.split_first()?;

        let room = match lifecycle.create(
            host.peer_id,
            Some(host.display_name.clone()),
            Some(format!("{:?} match", mode)),
            RoomSettings::for_match(mode, group.len()),
        ) {
            Ok(room) => room,
            Err(e) => {
                warn!(error = %e, game_mode = ?mode, "Failed to create matchmade room");
                return None;
            }
        };

        for (i, guest) in guests.iter().enumerate() {
            let team = Team::alternating(i + 1);
            let name = Some(guest.display_name.clone());
            if let Err(e) = lifecycle.join(&room.id, guest.peer_id, name, Some(team)) {
                warn!(
                    room_id = %room.id,
                    peer_id = %guest.peer_id,
                    error = %e,
                    "Matched player could not be seated"
                );
            }
        }

        let samples: Vec<SkillSample> = group.iter().map(MatchmakingPlayer::sample).collect();
        let quality = match_quality(&samples);
        let players: Vec<PeerId> = group.iter().map(|p| p.peer_id).collect();
        let estimated_start_time = unix_millis() + self.start_delay.as_millis() as u64;
        let longest_wait_ms = group
            .iter()
            .map(|p| p.queued_at.elapsed().as_millis() as u64)
            .max()
            .unwrap_or_default();

        info!(
            room_id = %room.id,
            game_mode = ?mode,
            player_count = players.len(),
            quality,
            longest_wait_ms,
            "Match formed"
        );

        self.transport.notify_all(
            &players,
            &ServerMsg::MatchFound {
                room_id: room.id.clone(),
                game_mode: mode,
                players: players.clone(),
                estimated_start_time,
                quality,
            },
        );
        Some(room.id)
    }
}

/// Queue entry for a peer that supplied no display name.
pub fn queued_player(peer: PeerId, skill: super::skill::SkillRating) -> MatchmakingPlayer {
    MatchmakingPlayer::new(peer, PlayerState::default_name(&peer), skill)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LobbyConfig;
    use crate::matchmaking::skill::{mmr, PlayerStats};
    use crate::store::{RoomStore, SnapshotWriter};
    use crate::transport::testing::RecordingTransport;
    use crate::util::tasks::ScheduledTasks;

    fn peer(n: u128) -> PeerId {
        Uuid::from_u128(n)
    }

    fn setup() -> (Matchmaker, RoomLifecycle, RecordingTransport) {
        let transport = RecordingTransport::new();
        for n in 1..=12 {
            transport.connect(peer(n));
        }
        let shared: Arc<dyn Transport> = Arc::new(transport.clone());
        let store = RoomStore::new(shared.clone(), SnapshotWriter::disabled());
        let (tasks, _rx) = ScheduledTasks::channel();
        let lifecycle = RoomLifecycle::new(
            store,
            shared.clone(),
            LobbyConfig {
                rng_seed: Some(1),
                ..LobbyConfig::default()
            },
            tasks,
        );
        (Matchmaker::new(shared, Duration::from_secs(3)), lifecycle, transport)
    }

    fn queue(mm: &mut Matchmaker, lifecycle: &RoomLifecycle, mode: GameMode, n: u128) -> TicketId {
        mm.join(lifecycle, mode, queued_player(peer(n), mmr(&PlayerStats::default())))
            .unwrap()
    }

    #[tokio::test]
    async fn full_group_forms_room_with_alternating_teams() {
        let (mut mm, mut lifecycle, transport) = setup();
        for n in 1..=4 {
            queue(&mut mm, &lifecycle, GameMode::TeamDeathmatch, n);
        }

        let formed = mm.tick(&mut lifecycle);
        assert_eq!(formed.len(), 1);
        assert_eq!(mm.queue_size(), 0);

        let room = lifecycle.room(&formed[0]).unwrap();
        assert_eq!(room.owner_id, peer(1));
        assert_eq!(room.current_players, 4);
        assert_eq!(room.settings.game_mode, GameMode::TeamDeathmatch);
        assert_eq!(room.players[&peer(1)].team, Team::Red);
        assert_eq!(room.players[&peer(2)].team, Team::Blue);
        assert_eq!(room.players[&peer(3)].team, Team::Red);
        assert_eq!(room.players[&peer(4)].team, Team::Blue);

        for n in 1..=4 {
            let found = transport.count_to(&peer(n), |m| {
                matches!(
                    m,
                    ServerMsg::MatchFound { quality: 100, players, .. } if players.len() == 4
                )
            });
            assert_eq!(found, 1, "peer {n}");
        }
    }

    #[tokio::test]
    async fn partial_group_waits() {
        let (mut mm, mut lifecycle, _) = setup();
        for n in 1..=3 {
            queue(&mut mm, &lifecycle, GameMode::FreeForAll, n);
        }
        assert!(mm.tick(&mut lifecycle).is_empty());
        assert_eq!(mm.queue_size(), 3);
        assert!(lifecycle.list_rooms().is_empty());
    }

    #[tokio::test]
    async fn seated_peer_cannot_queue() {
        let (mut mm, mut lifecycle, _) = setup();
        lifecycle
            .create(peer(1), None, None, RoomSettings::default())
            .unwrap();

        let err = mm
            .join(&lifecycle, GameMode::Domination, queued_player(peer(1), Default::default()))
            .unwrap_err();
        assert_eq!(err, LobbyError::AlreadyInRoom);
        assert!(!mm.is_queued(&peer(1)));
    }

    #[tokio::test]
    async fn requeue_keeps_one_ticket() {
        let (mut mm, lifecycle, transport) = setup();
        queue(&mut mm, &lifecycle, GameMode::FreeForAll, 1);
        queue(&mut mm, &lifecycle, GameMode::FreeForAll, 1);

        assert_eq!(mm.queue_size(), 1);
        assert_eq!(
            transport.count_to(&peer(1), |m| matches!(m, ServerMsg::MatchmakingQueued { .. })),
            2
        );
    }

    #[tokio::test]
    async fn cancel_only_own_ticket() {
        let (mut mm, lifecycle, transport) = setup();
        let ticket = queue(&mut mm, &lifecycle, GameMode::FreeForAll, 1);

        assert!(!mm.cancel(peer(2), ticket));
        assert!(mm.is_queued(&peer(1)));
        assert!(mm.cancel(peer(1), ticket));
        assert!(!mm.is_queued(&peer(1)));
        assert_eq!(
            transport.count_to(&peer(1), |m| {
                matches!(m, ServerMsg::MatchmakingCancelled { found: true, .. })
            }),
            1
        );
    }
}
