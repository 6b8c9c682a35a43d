//! Matchmaking queue implementation

use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use uuid::Uuid;

use super::skill::{SkillRating, SkillSample};
use crate::lobby::room::{GameMode, PeerId};
use crate::ws::protocol::MatchPreferences;

/// Player in the matchmaking queue
#[derive(Debug, Clone)]
pub struct MatchmakingPlayer {
    pub peer_id: PeerId,
    pub ticket_id: Uuid,
    pub display_name: String,
    pub skill: SkillRating,
    pub region: Option<String>,
    pub ping: u32,
    pub preferences: MatchPreferences,
    pub queued_at: Instant,
}

impl MatchmakingPlayer {
    pub fn new(peer_id: PeerId, display_name: String, skill: SkillRating) -> Self {
        Self {
            peer_id,
            ticket_id: Uuid::new_v4(),
            display_name,
            skill,
            region: None,
            ping: 0,
            preferences: MatchPreferences::default(),
            queued_at: Instant::now(),
        }
    }

    pub fn sample(&self) -> SkillSample {
        SkillSample {
            mmr: self.skill.mmr,
            ping: self.ping,
        }
    }
}

/// One FIFO queue per game mode
#[derive(Default)]
pub struct MatchmakingQueue {
    queues: HashMap<GameMode, VecDeque<MatchmakingPlayer>>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player to the queue for `mode`. A peer already queued anywhere
    /// is moved to the back of the new queue.
    pub fn enqueue(&mut self, mode: GameMode, player: MatchmakingPlayer) {
        self.dequeue(&player.peer_id);
        self.queues.entry(mode).or_default().push_back(player);
    }

    /// Remove a peer from every queue. Returns true if it was queued.
    pub fn dequeue(&mut self, peer_id: &PeerId) -> bool {
        let mut found = false;
        for queue in self.queues.values_mut() {
            let before = queue.len();
            queue.retain(|p| &p.peer_id != peer_id);
            found |= queue.len() != before;
        }
        found
    }

    /// Remove the entry holding `ticket_id`.
    pub fn dequeue_ticket(&mut self, ticket_id: &Uuid) -> Option<MatchmakingPlayer> {
        for queue in self.queues.values_mut() {
            if let Some(pos) = queue.iter().position(|p| &p.ticket_id == ticket_id) {
                return queue.remove(pos);
            }
        }
        None
    }

    /// Peer holding `ticket_id`
    pub fn owner_of(&self, ticket_id: &Uuid) -> Option<PeerId> {
        self.queues
            .values()
            .flat_map(|q| q.iter())
            .find(|p| &p.ticket_id == ticket_id)
            .map(|p| p.peer_id)
    }

    /// Check if a peer is in any queue
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.queues
            .values()
            .any(|q| q.iter().any(|p| &p.peer_id == peer_id))
    }

    /// 1-based position of a peer within its queue
    pub fn position(&self, peer_id: &PeerId) -> Option<usize> {
        self.queues
            .values()
            .find_map(|q| q.iter().position(|p| &p.peer_id == peer_id))
            .map(|i| i + 1)
    }

    /// Queue length for one mode
    pub fn len(&self, mode: GameMode) -> usize {
        self.queues.get(&mode).map_or(0, VecDeque::len)
    }

    pub fn total_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Drain groups of `team_size` players from the front of the queue for
    /// `mode` until fewer than `team_size` remain.
    pub fn find_matches(
        &mut self,
        mode: GameMode,
        team_size: usize,
    ) -> Vec<Vec<MatchmakingPlayer>> {
        let Some(queue) = self.queues.get_mut(&mode) else {
            return Vec::new();
        };
        if team_size == 0 {
            return Vec::new();
        }

        let mut groups = Vec::with_capacity(queue.len() / team_size);
        while queue.len() >= team_size {
            groups.push(queue.drain(..team_size).collect());
        }
        groups
    }
}
