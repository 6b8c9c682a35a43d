//! Lobby actor: the single writer of room state
//!
//! Connections never touch rooms directly. They post [`LobbyCommand`]s through
//! a [`LobbyHandle`]; the actor applies them one at a time, interleaved with
//! its own timers, so every room mutation happens in one well-defined order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::error::LobbyError;
use super::lifecycle::RoomLifecycle;
use super::room::{GameMode, PeerId, Room, RoomId, RoomStatus};
use crate::config::Config;
use crate::matchmaking::{mmr, queued_player, Matchmaker, PlayerStats, TicketId};
use crate::store::{RoomStore, RoomSubscription, SnapshotWriter};
use crate::sync::{InboundDedup, ReliableChannel, Replicator};
use crate::transport::Transport;
use crate::util::tasks::{Fired, ScheduledTasks};
use crate::util::time::unix_millis;
use crate::ws::protocol::{
    ClientMsg, EventId, HitImpact, HitNotice, MatchPreferences, ReliablePayload, RewoundTarget,
    ServerMsg,
};

const COMMAND_CAPACITY: usize = 1024;

/// Queue request carried through the actor
#[derive(Debug, Clone, Default)]
pub struct QueueRequest {
    pub mode: GameMode,
    pub preferences: MatchPreferences,
    pub stats: PlayerStats,
    pub region: Option<String>,
}

#[derive(Debug)]
pub enum LobbyCommand {
    Connected {
        peer: PeerId,
        session_token: Option<String>,
    },
    Disconnected {
        peer: PeerId,
    },
    Client {
        peer: PeerId,
        msg: ClientMsg,
        received_at: u64,
    },
    JoinQueue {
        peer: PeerId,
        request: QueueRequest,
        reply: oneshot::Sender<Result<TicketId, LobbyError>>,
    },
    ListRooms {
        reply: oneshot::Sender<Vec<Room>>,
    },
    QueueSize {
        reply: oneshot::Sender<usize>,
    },
}

/// Cheap, cloneable sender side of the lobby actor
#[derive(Clone)]
pub struct LobbyHandle {
    tx: mpsc::Sender<LobbyCommand>,
}

impl LobbyHandle {
    async fn send(&self, cmd: LobbyCommand) -> Result<(), LobbyError> {
        self.tx.send(cmd).await.map_err(|_| LobbyError::Unavailable)
    }

    pub async fn connect(
        &self,
        peer: PeerId,
        session_token: Option<String>,
    ) -> Result<(), LobbyError> {
        self.send(LobbyCommand::Connected {
            peer,
            session_token,
        })
        .await
    }

    pub async fn disconnect(&self, peer: PeerId) -> Result<(), LobbyError> {
        self.send(LobbyCommand::Disconnected { peer }).await
    }

    /// Forward a client message, stamped with its arrival time.
    pub async fn submit(&self, peer: PeerId, msg: ClientMsg) -> Result<(), LobbyError> {
        self.send(LobbyCommand::Client {
            peer,
            msg,
            received_at: unix_millis(),
        })
        .await
    }

    pub async fn join_queue(
        &self,
        peer: PeerId,
        request: QueueRequest,
    ) -> Result<TicketId, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::JoinQueue { peer, request, reply }).await?;
        rx.await.map_err(|_| LobbyError::Unavailable)?
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::ListRooms { reply }).await?;
        rx.await.map_err(|_| LobbyError::Unavailable)
    }

    pub async fn queue_size(&self) -> Result<usize, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::QueueSize { reply }).await?;
        rx.await.map_err(|_| LobbyError::Unavailable)
    }
}

pub struct LobbyService {
    lifecycle: RoomLifecycle,
    matchmaker: Matchmaker,
    replicator: Replicator,
    reliable: ReliableChannel,
    dedup: InboundDedup,
    transport: Arc<dyn Transport>,
    commands: mpsc::Receiver<LobbyCommand>,
    ready_timers: mpsc::UnboundedReceiver<Fired<RoomId>>,
    retry_timers: mpsc::UnboundedReceiver<Fired<EventId>>,
    matchmaking_tick: Duration,
    quality_interval: Duration,
    relay_flush_interval: Duration,
}

impl LobbyService {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        snapshots: SnapshotWriter,
    ) -> (Self, LobbyHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (ready_tasks, ready_timers) = ScheduledTasks::channel();
        let (retry_tasks, retry_timers) = ScheduledTasks::channel();

        let store = RoomStore::new(transport.clone(), snapshots);
        let lifecycle =
            RoomLifecycle::new(store, transport.clone(), config.lobby.clone(), ready_tasks);
        let matchmaker = Matchmaker::new(transport.clone(), config.lobby.ready_grace);
        let replicator = Replicator::new(
            transport.clone(),
            config.sync.history_capacity,
            config.sync.base_send_interval,
        );
        let reliable = ReliableChannel::new(
            transport.clone(),
            retry_tasks,
            config.sync.reliable_retry,
            config.sync.reliable_max_retries,
        );

        let service = Self {
            lifecycle,
            matchmaker,
            replicator,
            reliable,
            dedup: InboundDedup::default(),
            transport,
            commands,
            ready_timers,
            retry_timers,
            matchmaking_tick: config.matchmaking.tick_interval,
            quality_interval: config.sync.network_quality_interval,
            relay_flush_interval: config.sync.base_send_interval,
        };
        (service, LobbyHandle { tx })
    }

    /// Room list feed for read-side mirrors.
    pub fn subscribe(&self) -> RoomSubscription {
        self.lifecycle.store().subscribe()
    }

    /// Run until every [`LobbyHandle`] is dropped.
    pub async fn run(mut self) {
        info!("Lobby service started");

        let mut matchmaking = interval(self.matchmaking_tick);
        matchmaking.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut quality = interval(self.quality_interval);
        quality.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut relay_flush = interval(self.relay_flush_interval);
        relay_flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(fired) = self.ready_timers.recv() => self.lifecycle.on_ready_timer(&fired),
                Some(fired) = self.retry_timers.recv() => self.reliable.on_retry(&fired),
                _ = matchmaking.tick() => {
                    let formed = self.matchmaker.tick(&mut self.lifecycle);
                    for room_id in &formed {
                        self.reset_room_channels(room_id);
                    }
                }
                _ = quality.tick() => {
                    self.replicator.evaluate_quality();
                }
                _ = relay_flush.tick() => {
                    self.replicator.flush_due(unix_millis());
                }
            }
        }

        info!("Lobby service stopped");
    }

    pub fn handle_command(&mut self, cmd: LobbyCommand) {
        match cmd {
            LobbyCommand::Connected {
                peer,
                session_token,
            } => self.on_connected(peer, session_token),
            LobbyCommand::Disconnected { peer } => self.on_disconnected(peer),
            LobbyCommand::Client {
                peer,
                msg,
                received_at,
            } => self.dispatch(peer, msg, received_at),
            LobbyCommand::JoinQueue { peer, request, reply } => {
                let result = self.join_queue(peer, request);
                let _ = reply.send(result);
            }
            LobbyCommand::ListRooms { reply } => {
                let _ = reply.send(self.lifecycle.list_rooms());
            }
            LobbyCommand::QueueSize { reply } => {
                let _ = reply.send(self.matchmaker.queue_size());
            }
        }
    }

    fn on_connected(&mut self, peer: PeerId, session_token: Option<String>) {
        debug!(peer_id = %peer, "Peer connected to lobby");
        self.transport.notify(
            &peer,
            ServerMsg::Welcome {
                peer_id: peer,
                server_time: unix_millis(),
                session_token,
            },
        );
        self.transport.notify(
            &peer,
            ServerMsg::RoomList {
                rooms: self.lifecycle.list_rooms(),
            },
        );
    }

    fn on_disconnected(&mut self, peer: PeerId) {
        let was_queued = self.matchmaker.cancel_peer(&peer);
        let released = self.reliable.release_peer(&peer);
        self.replicator.forget(&peer);
        self.dedup.forget_source(&peer);
        self.lifecycle.disconnect(&peer);

        info!(peer_id = %peer, was_queued, released, "Peer disconnected from lobby");
    }

    fn dispatch(&mut self, peer: PeerId, msg: ClientMsg, received_at: u64) {
        match msg {
            ClientMsg::CreateRoom {
                name,
                player_name,
                settings,
            } => {
                self.matchmaker.cancel_peer(&peer);
                let result = self.lifecycle.create(peer, player_name, name, settings);
                if result.is_ok() {
                    self.replicator.reset_channels(&peer);
                }
                self.reply_err(peer, result);
            }

            ClientMsg::ListRooms => {
                self.transport.notify(
                    &peer,
                    ServerMsg::RoomList {
                        rooms: self.lifecycle.list_rooms(),
                    },
                );
            }

            ClientMsg::JoinRoom {
                room_id,
                player_name,
                team,
            } => {
                self.matchmaker.cancel_peer(&peer);
                match self.lifecycle.join(&room_id, peer, player_name, team) {
                    Ok(_) => self.replicator.reset_channels(&peer),
                    Err(e) if e.is_join_failure() => {
                        info!(
                            room_id = %room_id,
                            peer_id = %peer,
                            reason = e.reason(),
                            "Join rejected"
                        );
                        self.transport.notify(
                            &peer,
                            ServerMsg::JoinFailed {
                                reason: e.reason().to_string(),
                                room_id,
                                available_rooms: self.joinable_rooms(),
                            },
                        );
                    }
                    Err(e) => self.send_error(peer, &e),
                }
            }

            ClientMsg::LeaveRoom { room_id, player_id } => {
                if player_id.is_some_and(|claimed| claimed != peer) {
                    self.send_error(peer, &LobbyError::IdentityMismatch);
                    return;
                }
                let result = self.lifecycle.leave(&room_id, peer);
                if result.is_ok() {
                    self.replicator.reset_channels(&peer);
                }
                self.reply_err(peer, result);
            }

            ClientMsg::SetReady { room_id, is_ready } => {
                let result = self.lifecycle.set_ready(&room_id, peer, is_ready);
                self.reply_err(peer, result);
            }

            ClientMsg::StartRound {
                room_id,
                start_positions,
            } => {
                let result = self.lifecycle.start(&room_id, peer, start_positions);
                self.reply_err(peer, result);
            }

            ClientMsg::EndRound { room_id } => {
                let result = self.lifecycle.end(&room_id, peer);
                self.reply_err(peer, result);
            }

            ClientMsg::ReturnToLobby { room_id } => {
                let result = self.lifecycle.return_to_lobby(&room_id, peer);
                self.reply_err(peer, result);
            }

            ClientMsg::CancelRoom { room_id } => {
                let result = self.lifecycle.cancel(&room_id, peer);
                self.reply_err(peer, result);
            }

            ClientMsg::KickPlayer { room_id, target_id } => {
                let result = self.lifecycle.kick(&room_id, peer, target_id);
                if result.is_ok() {
                    self.replicator.reset_channels(&target_id);
                }
                self.reply_err(peer, result);
            }

            ClientMsg::SwitchTeam {
                room_id,
                target_id,
                team,
            } => {
                let result = self.lifecycle.switch_team(&room_id, peer, target_id, team);
                self.reply_err(peer, result);
            }

            ClientMsg::PromotePlayer { room_id, target_id } => {
                let result = self.lifecycle.promote(&room_id, peer, target_id);
                self.reply_err(peer, result);
            }

            ClientMsg::ClearRooms { owner_id } => match self.lifecycle.clear_rooms(peer, owner_id) {
                Ok(room_ids) => self
                    .transport
                    .notify(&peer, ServerMsg::RoomsCleared { room_ids }),
                Err(e) => self.transport.notify(
                    &peer,
                    ServerMsg::ClearRoomsFailed {
                        reason: e.reason().to_string(),
                    },
                ),
            },

            ClientMsg::PlayerUpdate { state } => {
                if self.lifecycle.room_of(&peer).is_none() {
                    debug!(peer_id = %peer, "Dropping state update from peer outside any room");
                    return;
                }
                let receivers = self.lifecycle.room_peers(&peer);
                self.replicator.publish(peer, &receivers, state, received_at);
            }

            ClientMsg::ReportHit {
                event_id,
                target_id,
                damage,
                impact,
                shot_time,
            } => {
                let shot_at = shot_time.unwrap_or(received_at);
                self.on_report_hit(peer, event_id, target_id, damage, impact, shot_at);
            }

            ClientMsg::Ack { event_id } => {
                if !self.reliable.on_ack(peer, event_id) {
                    debug!(peer_id = %peer, event_id, "Ack for unknown event");
                }
            }

            ClientMsg::JoinMatchmaking {
                mode,
                preferences,
                stats,
                region,
            } => {
                let request = QueueRequest {
                    mode,
                    preferences,
                    stats,
                    region,
                };
                let result = self.join_queue(peer, request);
                self.reply_err(peer, result);
            }

            ClientMsg::CancelMatchmaking { ticket_id } => {
                self.matchmaker.cancel(peer, ticket_id);
            }

            ClientMsg::Ping { t, rtt_ms, sent } => {
                self.transport.notify(
                    &peer,
                    ServerMsg::Pong {
                        t,
                        server_time: unix_millis(),
                    },
                );
                self.replicator.record_ping(peer, rtt_ms, sent);
                if let Some(rtt) = rtt_ms {
                    self.lifecycle.record_ping(peer, rtt);
                }
            }
        }
    }

    /// Ack first so a retried report is always answered; apply only once.
    /// The notice carries the target's recorded state at `shot_at`.
    fn on_report_hit(
        &mut self,
        attacker: PeerId,
        event_id: EventId,
        target: PeerId,
        damage: f32,
        impact: HitImpact,
        shot_at: u64,
    ) {
        self.transport.notify(&attacker, ServerMsg::Ack { event_id });
        if !self.dedup.first_sighting(attacker, event_id) {
            debug!(peer_id = %attacker, event_id, "Duplicate hit report");
            return;
        }

        let outcome = match self.lifecycle.record_hit(attacker, target, damage) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.send_error(attacker, &e);
                return;
            }
        };
        if !outcome.applied {
            return;
        }

        let rewound = self
            .replicator
            .rewind(&target, shot_at)
            .map(|entry| RewoundTarget {
                seq: entry.seq,
                timestamp: entry.timestamp,
                x: entry.state.x,
                y: entry.state.y,
            });
        if rewound.is_none() {
            debug!(target_id = %target, shot_at, "No recorded state covers the shot");
        }

        let notice = HitNotice {
            room_id: outcome.room_id.clone(),
            attacker_id: attacker,
            target_id: target,
            damage,
            health: outcome.target_health,
            killed: outcome.killed,
            impact,
            rewound,
        };

        self.reliable
            .send_reliable(Some(attacker), target, ReliablePayload::PlayerHit(notice.clone()));

        let bystanders: Vec<PeerId> = outcome
            .members
            .iter()
            .copied()
            .filter(|p| *p != target)
            .collect();
        self.transport
            .notify_all(&bystanders, &ServerMsg::PlayerHit(notice));

        if outcome.killed && attacker != target {
            self.reliable.send_reliable(
                None,
                attacker,
                ReliablePayload::ScoreConfirmed {
                    room_id: outcome.room_id,
                    victim_id: target,
                    score: outcome.attacker_score,
                    kills: outcome.attacker_kills,
                },
            );
        }
    }

    fn join_queue(&mut self, peer: PeerId, request: QueueRequest) -> Result<TicketId, LobbyError> {
        let mut player = queued_player(peer, mmr(&request.stats));
        player.region = request.region;
        player.preferences = request.preferences;
        player.ping = self
            .replicator
            .link(&peer)
            .map_or(0, |link| (link.latency_ms() * 2.0).round() as u32);

        self.matchmaker.join(&self.lifecycle, request.mode, player)
    }

    fn joinable_rooms(&self) -> Vec<Room> {
        self.lifecycle
            .list_rooms()
            .into_iter()
            .filter(|r| r.status == RoomStatus::Waiting && !r.is_full())
            .collect()
    }

    fn reset_room_channels(&mut self, room_id: &RoomId) {
        if let Some(room) = self.lifecycle.room(room_id) {
            for peer in room.member_ids() {
                self.replicator.reset_channels(&peer);
            }
        }
    }

    fn reply_err<T>(&self, peer: PeerId, result: Result<T, LobbyError>) {
        if let Err(e) = result {
            self.send_error(peer, &e);
        }
    }

    fn send_error(&self, peer: PeerId, error: &LobbyError) {
        warn!(peer_id = %peer, reason = error.reason(), error = %error, "Lobby request rejected");
        self.transport
            .notify(&peer, ServerMsg::error(error.reason(), error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::room::{RoomSettings, Team};
    use crate::store::SnapshotWriter;
    use crate::transport::testing::RecordingTransport;
    use crate::ws::protocol::MotionState;
    use uuid::Uuid;

    fn peer(n: u128) -> PeerId {
        Uuid::from_u128(n)
    }

    fn service() -> (LobbyService, LobbyHandle, RecordingTransport) {
        let transport = RecordingTransport::new();
        for n in 1..=4 {
            transport.connect(peer(n));
        }
        let mut config = Config::default();
        config.lobby.rng_seed = Some(3);
        let (service, handle) =
            LobbyService::new(&config, Arc::new(transport.clone()), SnapshotWriter::disabled());
        (service, handle, transport)
    }

    fn client(service: &mut LobbyService, peer: PeerId, msg: ClientMsg) {
        client_at(service, peer, msg, unix_millis());
    }

    fn client_at(service: &mut LobbyService, peer: PeerId, msg: ClientMsg, received_at: u64) {
        service.handle_command(LobbyCommand::Client {
            peer,
            msg,
            received_at,
        });
    }

    /// Two players in a started round, on opposite teams.
    fn in_round(service: &mut LobbyService) -> RoomId {
        client(
            service,
            peer(1),
            ClientMsg::CreateRoom {
                name: None,
                player_name: None,
                settings: RoomSettings::default(),
            },
        );
        let room_id = service.lifecycle.room_of(&peer(1)).cloned().unwrap();
        client(
            service,
            peer(2),
            ClientMsg::JoinRoom {
                room_id: room_id.clone(),
                player_name: None,
                team: Some(Team::Blue),
            },
        );
        client(
            service,
            peer(1),
            ClientMsg::StartRound {
                room_id: room_id.clone(),
                start_positions: None,
            },
        );
        room_id
    }

    fn report_hit(event_id: EventId) -> ClientMsg {
        report_hit_at(event_id, None)
    }

    fn report_hit_at(event_id: EventId, shot_time: Option<u64>) -> ClientMsg {
        ClientMsg::ReportHit {
            event_id,
            target_id: peer(2),
            damage: 25.0,
            impact: HitImpact::default(),
            shot_time,
        }
    }

    fn hit_notices_to(transport: &RecordingTransport, peer: PeerId) -> Vec<HitNotice> {
        transport
            .sent_to(&peer)
            .into_iter()
            .filter_map(|m| match m {
                ServerMsg::PlayerHit(notice) => Some(notice),
                ServerMsg::Reliable { event } => match event.payload {
                    ReliablePayload::PlayerHit(notice) => Some(notice),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn hit_carries_target_state_at_shot_time() {
        let (mut service, _handle, transport) = service();
        in_round(&mut service);
        for (i, x) in [10.0, 20.0, 30.0].into_iter().enumerate() {
            let state = MotionState {
                x,
                ..MotionState::default()
            };
            let at = 1_000 + i as u64 * 100;
            client_at(&mut service, peer(2), ClientMsg::PlayerUpdate { state }, at);
        }

        client_at(&mut service, peer(1), report_hit_at(3, Some(1_150)), 1_300);

        let to_target = hit_notices_to(&transport, peer(2));
        let to_attacker = hit_notices_to(&transport, peer(1));
        assert_eq!(to_target.len(), 1);
        assert_eq!(to_attacker.len(), 1);
        let rewound = to_target[0].rewound.unwrap();
        assert_eq!((rewound.seq, rewound.timestamp, rewound.x), (2, 1_100, 20.0));
        assert_eq!(to_attacker[0].rewound, Some(rewound));
    }

    #[tokio::test]
    async fn hit_before_any_recorded_state_has_no_rewound_target() {
        let (mut service, _handle, transport) = service();
        let room_id = in_round(&mut service);
        let state = MotionState {
            x: 5.0,
            ..MotionState::default()
        };
        client_at(&mut service, peer(2), ClientMsg::PlayerUpdate { state }, 2_000);

        client_at(&mut service, peer(1), report_hit_at(4, Some(1_500)), 2_100);

        let notices = hit_notices_to(&transport, peer(2));
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].rewound, None);
        let room = service.lifecycle.room(&room_id).unwrap();
        assert_eq!(room.players[&peer(2)].health, 75.0);
    }

    #[tokio::test]
    async fn duplicate_hit_report_is_acked_twice_applied_once() {
        let (mut service, _handle, transport) = service();
        let room_id = in_round(&mut service);

        client(&mut service, peer(1), report_hit(7));
        client(&mut service, peer(1), report_hit(7));

        assert_eq!(
            transport.count_to(&peer(1), |m| matches!(m, ServerMsg::Ack { event_id: 7 })),
            2
        );
        let room = service.lifecycle.room(&room_id).unwrap();
        assert_eq!(room.players[&peer(2)].health, 75.0);
        assert_eq!(
            transport.count_to(&peer(2), |m| matches!(m, ServerMsg::Reliable { .. })),
            1
        );
        assert_eq!(service.reliable.pending_len(), 1);
    }

    #[tokio::test]
    async fn disconnect_releases_reliable_events() {
        let (mut service, _handle, _) = service();
        in_round(&mut service);
        client(&mut service, peer(1), report_hit(1));
        assert_eq!(service.reliable.pending_len(), 1);

        service.handle_command(LobbyCommand::Disconnected { peer: peer(2) });
        assert_eq!(service.reliable.pending_len(), 0);
    }

    #[tokio::test]
    async fn join_failure_lists_joinable_rooms() {
        let (mut service, _handle, transport) = service();
        client(
            &mut service,
            peer(1),
            ClientMsg::CreateRoom {
                name: None,
                player_name: None,
                settings: RoomSettings::default(),
            },
        );
        client(
            &mut service,
            peer(2),
            ClientMsg::JoinRoom {
                room_id: RoomId::from("no-such-id"),
                player_name: None,
                team: None,
            },
        );

        let failures: Vec<(String, usize)> = transport
            .sent_to(&peer(2))
            .into_iter()
            .filter_map(|m| match m {
                ServerMsg::JoinFailed {
                    reason,
                    available_rooms,
                    ..
                } => Some((reason, available_rooms.len())),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![("not_found".to_string(), 1)]);
    }

    #[tokio::test]
    async fn leave_for_someone_else_is_rejected() {
        let (mut service, _handle, transport) = service();
        let room_id = in_round(&mut service);
        client(
            &mut service,
            peer(1),
            ClientMsg::LeaveRoom {
                room_id: room_id.clone(),
                player_id: Some(peer(2)),
            },
        );

        assert!(service.lifecycle.room(&room_id).unwrap().is_member(&peer(2)));
        assert_eq!(
            transport.count_to(&peer(1), |m| {
                matches!(m, ServerMsg::Error { code, .. } if code == "permission_denied")
            }),
            1
        );
    }

    #[tokio::test]
    async fn clear_rooms_for_other_owner_fails() {
        let (mut service, _handle, transport) = service();
        in_round(&mut service);
        client(&mut service, peer(2), ClientMsg::ClearRooms { owner_id: Some(peer(1)) });

        assert_eq!(service.lifecycle.list_rooms().len(), 1);
        assert_eq!(
            transport.count_to(&peer(2), |m| {
                matches!(
                    m,
                    ServerMsg::ClearRoomsFailed { reason } if reason == "permission_denied"
                )
            }),
            1
        );
    }

    #[tokio::test]
    async fn ping_answers_pong_and_tracks_latency() {
        let (mut service, _handle, transport) = service();
        client(
            &mut service,
            peer(1),
            ClientMsg::Ping {
                t: 5,
                rtt_ms: Some(80),
                sent: None,
            },
        );
        assert_eq!(
            transport.count_to(&peer(1), |m| matches!(m, ServerMsg::Pong { t: 5, .. })),
            1
        );
        assert_eq!(service.replicator.link(&peer(1)).map(|l| l.latency_ms()), Some(40.0));
    }

    #[tokio::test]
    async fn handle_reports_unavailable_after_shutdown() {
        let (service, handle, _) = service();
        drop(service);
        assert_eq!(handle.list_rooms().await, Err(LobbyError::Unavailable));
    }
}
