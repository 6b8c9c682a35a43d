//! Lobby protocol errors

use super::room::{PeerId, RoomId, RoomStatus};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LobbyError {
    #[error("Room {0} not found")]
    RoomNotFound(RoomId),

    #[error("Room {0} is full")]
    RoomFull(RoomId),

    #[error("Room {0} has already started")]
    AlreadyStarted(RoomId),

    #[error("Only the room owner may do that")]
    NotOwner,

    #[error("Player {0} is not in this room")]
    NotAMember(PeerId),

    #[error("The owner cannot kick themselves")]
    CannotKickSelf,

    #[error("Cannot move room from {from} to {to}")]
    InvalidTransition { from: RoomStatus, to: RoomStatus },

    #[error("No round is in progress")]
    RoundNotActive,

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Supplied owner id does not match the connection identity")]
    IdentityMismatch,

    #[error("Lobby service is not running")]
    Unavailable,
}

impl LobbyError {
    /// Stable reason code carried in failure events.
    pub fn reason(&self) -> &'static str {
        match self {
            LobbyError::RoomNotFound(_) => "not_found",
            LobbyError::RoomFull(_) => "full",
            LobbyError::AlreadyStarted(_) => "already_started",
            LobbyError::NotOwner
            | LobbyError::CannotKickSelf
            | LobbyError::IdentityMismatch => "permission_denied",
            LobbyError::NotAMember(_) => "not_a_member",
            LobbyError::InvalidTransition { .. } => "invalid_state",
            LobbyError::RoundNotActive => "round_not_active",
            LobbyError::AlreadyInRoom => "already_in_room",
            LobbyError::Unavailable => "unavailable",
        }
    }

    /// Whether this error is a join rejection the client may retry elsewhere.
    pub fn is_join_failure(&self) -> bool {
        matches!(
            self,
            LobbyError::RoomNotFound(_) | LobbyError::RoomFull(_) | LobbyError::AlreadyStarted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_distinguish_capacity_from_state() {
        let id = RoomId::from("r");
        assert_eq!(LobbyError::RoomFull(id.clone()).reason(), "full");
        assert_eq!(LobbyError::AlreadyStarted(id.clone()).reason(), "already_started");
        assert_eq!(LobbyError::RoomNotFound(id).reason(), "not_found");
        assert_eq!(LobbyError::NotOwner.reason(), "permission_denied");
    }
}
