//! Application state shared across routes

use std::sync::Arc;

use crate::config::{Config, RoomConfig};
use crate::room::RoomRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Snapshot served to clients; identical for every room
    pub room_config: Arc<RoomConfig>,
    pub rooms: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let room_config = Arc::new(config.room.clone());
        let config = Arc::new(config);

        // Rooms are spawned on first join
        let rooms = Arc::new(RoomRegistry::new(room_config.clone()));

        Self {
            config,
            room_config,
            rooms,
        }
    }
}
