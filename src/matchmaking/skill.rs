//! Skill rating and match quality estimation
//!
//! Both functions are pure and total: any input, including zeroed stats or an
//! empty group, yields a value without panicking.

use serde::{Deserialize, Serialize};

pub const BASE_MMR: f64 = 1000.0;
const WIN_BONUS: f64 = 10.0;
const KDA_BONUS_PER_POINT: f64 = 100.0;
const KDA_BONUS_CAP: f64 = 300.0;
const GAMES_BONUS_PER_GAME: f64 = 2.0;
const GAMES_BONUS_CAP: f64 = 200.0;

const MAX_UNCERTAINTY: f64 = 350.0;
const MIN_UNCERTAINTY: f64 = 50.0;

const SPREAD_PENALTY_DIVISOR: f64 = 10.0;
const SPREAD_PENALTY_CAP: f64 = 50.0;
const PING_PENALTY_DIVISOR: f64 = 10.0;
const PING_PENALTY_CAP: f64 = 30.0;

/// Lifetime stats a client reports when queueing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerStats {
    pub wins: u32,
    pub losses: u32,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub games_played: u32,
}

impl PlayerStats {
    /// (kills + assists) / deaths, treating zero deaths as one.
    pub fn kda(&self) -> f64 {
        f64::from(self.kills + self.assists) / f64::from(self.deaths.max(1))
    }

    fn games(&self) -> u32 {
        self.games_played.max(self.wins.saturating_add(self.losses))
    }

    pub fn win_rate(&self) -> f64 {
        match self.games() {
            0 => 0.0,
            games => f64::from(self.wins) / f64::from(games),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRating {
    pub mmr: f64,
    pub uncertainty: f64,
    pub volatility: f64,
    pub games_played: u32,
    pub win_rate: f64,
}

impl Default for SkillRating {
    fn default() -> Self {
        mmr(&PlayerStats::default())
    }
}

pub fn mmr(stats: &PlayerStats) -> SkillRating {
    let games = stats.games();

    let win_bonus = f64::from(stats.wins) * WIN_BONUS;
    let kda = stats.kda();
    let kda_bonus = if kda > 1.0 {
        ((kda - 1.0) * KDA_BONUS_PER_POINT).min(KDA_BONUS_CAP)
    } else {
        0.0
    };
    let games_bonus = (f64::from(games) * GAMES_BONUS_PER_GAME).min(GAMES_BONUS_CAP);

    let win_rate = stats.win_rate();
    let uncertainty = (MAX_UNCERTAINTY / (1.0 + f64::from(games) / 10.0)).max(MIN_UNCERTAINTY);
    let volatility = 0.06 + (win_rate - 0.5).abs() * 0.1;

    SkillRating {
        mmr: BASE_MMR + win_bonus + kda_bonus + games_bonus,
        uncertainty,
        volatility,
        games_played: games,
        win_rate,
    }
}

/// One participant as seen by [`match_quality`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkillSample {
    pub mmr: f64,
    pub ping: u32,
}

/// Score a candidate group from 0 (unplayable) to 100 (perfect).
///
/// Starts at 100 and subtracts a capped penalty for the MMR spread and a
/// capped penalty for the average ping. An empty group scores 0.
pub fn match_quality(players: &[SkillSample]) -> u8 {
    if players.is_empty() {
        return 0;
    }

    let (min, max) = players
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.mmr), hi.max(p.mmr))
        });
    let spread = if max >= min { max - min } else { 0.0 };
    let avg_ping = players.iter().map(|p| f64::from(p.ping)).sum::<f64>() / players.len() as f64;

    let spread_penalty = (spread / SPREAD_PENALTY_DIVISOR).min(SPREAD_PENALTY_CAP);
    let ping_penalty = (avg_ping / PING_PENALTY_DIVISOR).min(PING_PENALTY_CAP);

    (100.0 - spread_penalty - ping_penalty).clamp(0.0, 100.0).round() as u8
}
