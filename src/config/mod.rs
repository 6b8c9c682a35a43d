//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::util::time::millis;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated); permissive when unset
    pub client_origin: Option<String>,
    /// HS256 secret for connection tokens. Guest mode when unset.
    pub jwt_secret: Option<String>,
    /// Where the room snapshot is written, if anywhere
    pub room_snapshot_path: Option<PathBuf>,

    pub lobby: LobbyConfig,
    pub sync: SyncConfig,
    pub matchmaking: MatchmakingConfig,
}

/// Room lifecycle policy
#[derive(Clone, Debug)]
pub struct LobbyConfig {
    /// Start automatically once every member is ready
    pub auto_start: bool,
    /// Delay between the all-ready transition and the automatic start
    pub ready_grace: Duration,
    /// Seed for room ids and team tie breaks; random when unset
    pub rng_seed: Option<u64>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            ready_grace: Duration::from_secs(3),
            rng_seed: None,
        }
    }
}

/// Replication and reliable-delivery tuning
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub reliable_retry: Duration,
    /// Resends attempted before a reliable event is reported failed
    pub reliable_max_retries: u32,
    pub network_quality_interval: Duration,
    /// Per-player history entries kept for lag-compensated lookups
    pub history_capacity: usize,
    pub base_send_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reliable_retry: Duration::from_secs(1),
            reliable_max_retries: 3,
            network_quality_interval: Duration::from_secs(5),
            history_capacity: 100,
            base_send_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MatchmakingConfig {
    pub tick_interval: Duration,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(3),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT; fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let lobby = LobbyConfig {
            auto_start: parse_env("AUTO_START", true)?,
            ready_grace: millis(parse_env("READY_GRACE_MS", 3_000u64)?),
            rng_seed: optional_env("LOBBY_RNG_SEED")?,
        };

        let sync = SyncConfig {
            reliable_retry: millis(parse_env("RELIABLE_RETRY_MS", 1_000u64)?),
            reliable_max_retries: parse_env("RELIABLE_MAX_RETRIES", 3u32)?,
            network_quality_interval: millis(parse_env("NETWORK_QUALITY_INTERVAL_MS", 5_000u64)?),
            history_capacity: parse_env("HISTORY_CAPACITY", 100usize)?.max(1),
            base_send_interval: millis(parse_env("BASE_SEND_INTERVAL_MS", 50u64)?),
        };

        let matchmaking = MatchmakingConfig {
            tick_interval: millis(parse_env("MATCHMAKING_TICK_MS", 3_000u64)?),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: non_empty_env("CLIENT_ORIGIN"),
            jwt_secret: non_empty_env("JWT_SECRET"),
            room_snapshot_path: non_empty_env("ROOM_SNAPSHOT_PATH").map(PathBuf::from),

            lobby,
            sync,
            matchmaking,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            client_origin: None,
            jwt_secret: None,
            room_snapshot_path: None,
            lobby: LobbyConfig::default(),
            sync: SyncConfig::default(),
            matchmaking: MatchmakingConfig::default(),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty_env(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

fn optional_env<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    non_empty_env(key)
        .map(|raw| raw.trim().parse().map_err(|_| ConfigError::Invalid(key)))
        .transpose()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names; the process environment is shared.

    #[test]
    fn parse_env_uses_default_when_unset() {
        assert_eq!(parse_env("SKIRMISH_TEST_UNSET_VALUE", 7u32).unwrap(), 7);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        env::set_var("SKIRMISH_TEST_BAD_NUMBER", "seven");
        let err = parse_env("SKIRMISH_TEST_BAD_NUMBER", 7u32).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("SKIRMISH_TEST_BAD_NUMBER")));
    }

    #[test]
    fn optional_env_parses_when_present() {
        env::set_var("SKIRMISH_TEST_SEED", " 42 ");
        assert_eq!(optional_env::<u64>("SKIRMISH_TEST_SEED").unwrap(), Some(42));
        assert_eq!(optional_env::<u64>("SKIRMISH_TEST_NO_SEED").unwrap(), None);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert!(config.lobby.auto_start);
        assert_eq!(config.lobby.ready_grace, Duration::from_secs(3));
        assert_eq!(config.sync.reliable_max_retries, 3);
        assert_eq!(config.sync.history_capacity, 100);
    }
}
