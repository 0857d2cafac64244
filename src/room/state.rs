//! Room state aggregate and per-connection player records

use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

/// Opaque per-connection identifier, unique within a room
pub type ConnectionId = Uuid;

/// One directional intent sent by a client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputCommand {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

/// Authoritative state for one connected client
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub connection_id: ConnectionId,
    pub name: String,
    pub skin: String,

    // Position and heading
    pub x: f32,
    pub y: f32,
    /// Degrees in `[0, 360)`
    pub heading: f32,

    // Liveness (room clock milliseconds)
    pub ping: u64,
    pub last_ping_sent_at: u64,
    pub last_pong_received_at: u64,

    /// Inputs awaiting the next fixed update, oldest first
    pub pending_inputs: VecDeque<InputCommand>,
}

impl PlayerRecord {
    pub fn new(
        connection_id: ConnectionId,
        name: String,
        skin: String,
        spawn_x: f32,
        spawn_y: f32,
        now: u64,
    ) -> Self {
        Self {
            connection_id,
            name,
            skin,
            x: spawn_x,
            y: spawn_y,
            heading: 0.0,
            ping: 0,
            last_ping_sent_at: now,
            last_pong_received_at: now,
            pending_inputs: VecDeque::new(),
        }
    }

    /// Queue an input, refusing it once `cap` commands are pending.
    /// Returns whether the command was accepted.
    pub fn enqueue_input(&mut self, command: InputCommand, cap: usize) -> bool {
        if self.pending_inputs.len() >= cap {
            return false;
        }
        self.pending_inputs.push_back(command);
        true
    }

    /// Set the heading, wrapping any finite angle into `[0, 360)`
    pub fn set_heading(&mut self, degrees: f64) {
        self.heading = normalize_degrees(degrees);
    }
}

/// Wrap an angle into `[0, 360)`; non-finite input yields 0.
///
/// The remainder is taken in `f64` and only the result is narrowed.
pub fn normalize_degrees(degrees: f64) -> f32 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let wrapped = degrees.rem_euclid(360.0) as f32;
    // tiny negative inputs land just below 360, which rounds up in f32
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Everything a room owns about its session
#[derive(Debug, Default)]
pub struct RoomState {
    pub players: HashMap<ConnectionId, PlayerRecord>,
    /// Accumulated simulation seconds
    pub elapsed_sim_time: f64,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn player(&self, id: &ConnectionId) -> Option<&PlayerRecord> {
        self.players.get(id)
    }

    pub fn player_mut(&mut self, id: &ConnectionId) -> Option<&mut PlayerRecord> {
        self.players.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
