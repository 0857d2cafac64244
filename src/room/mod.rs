//! Authoritative room: state, simulation, liveness and lifecycle

pub mod controller;
pub mod heartbeat;
pub mod publisher;
pub mod simulation;
pub mod state;
pub mod task;
pub mod validation;

pub use controller::{ClientLink, JoinOptions, Outbound, RoomPhase};
pub use state::ConnectionId;
pub use task::{RoomEvent, RoomHandle, RoomRegistry};

/// Longest accepted room id
pub const MAX_ROOM_ID_LEN: usize = 64;

/// Room errors
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("Room is not accepting players (phase: {0:?})")]
    NotActive(RoomPhase),

    #[error("Connection already joined: {0}")]
    DuplicateConnection(ConnectionId),

    #[error("Room is closed")]
    Closed,

    #[error("Invalid room id")]
    InvalidRoomId,
}

/// Room ids are 1-64 characters of `[A-Za-z0-9_-]`
pub fn validate_room_id(id: &str) -> Result<(), RoomError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ROOM_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(RoomError::InvalidRoomId)
    }
}
