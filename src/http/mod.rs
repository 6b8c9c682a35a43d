//! HTTP surface: health, room list, WebSocket upgrade and matchmaking

pub mod middleware;
pub mod routes;
pub mod session;

pub use routes::{build_router, AppError};
pub use session::GuestSessions;
