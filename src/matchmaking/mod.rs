//! Matchmaking module - queue management and room formation

pub mod queue;
pub mod service;
pub mod skill;

pub use queue::{MatchmakingPlayer, MatchmakingQueue};
pub use service::{queued_player, Matchmaker, TicketId};
pub use skill::{match_quality, mmr, PlayerStats, SkillRating};
