//! Skirmish Server - room lifecycle, matchmaking and state sync for
//! small-team multiplayer sessions

pub mod app;
pub mod config;
pub mod http;
pub mod lobby;
pub mod matchmaking;
pub mod store;
pub mod sync;
pub mod transport;
pub mod util;
pub mod ws;
