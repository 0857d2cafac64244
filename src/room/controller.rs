//! Room controller: lifecycle state machine and message routing
//!
//! A `Room` is synchronous and owned by exactly one task (see `task`),
//! which serializes every call. Time is passed in as room-clock
//! milliseconds so every path can be driven deterministically.

use std::collections::HashMap;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::config::RoomConfig;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, LeaveCode, ServerMsg};

use super::heartbeat::HeartbeatMonitor;
use super::publisher::ReplicationPublisher;
use super::simulation::Simulation;
use super::state::{ConnectionId, PlayerRecord, RoomState};
use super::validation::{NameSanitizer, SkinSanitizer};
use super::RoomError;

/// Room lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Uninitialized,
    Active,
    Disposing,
    Disposed,
}

/// Something the room wants delivered to one connection
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMsg),
    /// Close the socket with this code
    Close(LeaveCode),
}

/// Non-blocking outbound path to one connection
#[derive(Debug, Clone)]
pub struct ClientLink {
    connection_id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
}

impl ClientLink {
    pub fn new(connection_id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self { connection_id, tx }
    }

    pub fn send(&self, msg: ServerMsg) -> bool {
        self.deliver(Outbound::Message(msg))
    }

    pub fn close(&self, code: LeaveCode) -> bool {
        self.deliver(Outbound::Close(code))
    }

    fn deliver(&self, out: Outbound) -> bool {
        match self.tx.try_send(out) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %self.connection_id, "Outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = %self.connection_id, "Outbound queue closed");
                false
            }
        }
    }
}

/// Untrusted join-time options; sanitized before use
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinOptions {
    #[serde(default)]
    pub name: Value,
    #[serde(default)]
    pub skin: Value,
}

/// The authoritative room
pub struct Room {
    id: String,
    config: Arc<RoomConfig>,
    phase: RoomPhase,
    state: RoomState,
    clients: HashMap<ConnectionId, ClientLink>,
    simulation: Simulation,
    heartbeat: HeartbeatMonitor,
    names: NameSanitizer,
    skins: SkinSanitizer,
    rng: ChaCha8Rng,
    publisher: Box<dyn ReplicationPublisher>,
}

impl Room {
    pub fn new(
        id: impl Into<String>,
        config: Arc<RoomConfig>,
        seed: u64,
        publisher: Box<dyn ReplicationPublisher>,
    ) -> Self {
        Self {
            id: id.into(),
            simulation: Simulation::new(config.fixed_time_step(), config.player.velocity),
            heartbeat: HeartbeatMonitor::new(config.max_allowed_ping, config.ping_response_max_time),
            names: NameSanitizer::default(),
            skins: SkinSanitizer::new(config.skins.clone()),
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
            phase: RoomPhase::Uninitialized,
            state: RoomState::new(),
            clients: HashMap::new(),
            publisher,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn state(&self) -> &RoomState {
        &self.state
    }

    pub fn config(&self) -> &Arc<RoomConfig> {
        &self.config
    }

    pub fn player_count(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Uninitialized -> Active
    pub fn create(&mut self) -> Result<(), RoomError> {
        if self.phase != RoomPhase::Uninitialized {
            return Err(RoomError::NotActive(self.phase));
        }
        self.phase = RoomPhase::Active;
        info!(room_id = %self.id, "Room created");
        Ok(())
    }

    /// Accept a connection: sanitize its options and insert its record
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        options: &JoinOptions,
        link: ClientLink,
        now: u64,
    ) -> Result<&PlayerRecord, RoomError> {
        if self.phase != RoomPhase::Active {
            return Err(RoomError::NotActive(self.phase));
        }
        if self.state.player(&connection_id).is_some() {
            return Err(RoomError::DuplicateConnection(connection_id));
        }

        let name = self.names.sanitize(&options.name);
        let skin = self.skins.sanitize(&options.skin);
        let (x, y) = self.spawn_position();

        link.send(ServerMsg::Welcome {
            connection_id,
            room_id: self.id.clone(),
            server_time: unix_millis(),
        });

        self.clients.insert(connection_id, link);
        let record = self
            .state
            .players
            .entry(connection_id)
            .or_insert(PlayerRecord::new(connection_id, name, skin, x, y, now));
        self.publisher.mark_dirty();

        info!(
            room_id = %self.id,
            connection_id = %connection_id,
            name = %record.name,
            skin = %record.skin,
            "Player joined room"
        );

        Ok(record)
    }

    /// Remove a connection. Idempotent; returns whether a record existed.
    pub fn leave(&mut self, connection_id: ConnectionId) -> bool {
        self.clients.remove(&connection_id);
        let removed = self.state.players.remove(&connection_id).is_some();
        if removed {
            self.publisher.mark_dirty();
            info!(
                room_id = %self.id,
                connection_id = %connection_id,
                player_count = self.state.len(),
                "Player left room"
            );
        }
        removed
    }

    /// Close a connection with `code`, then remove it
    pub fn evict(&mut self, connection_id: ConnectionId, code: LeaveCode) -> bool {
        if let Some(link) = self.clients.get(&connection_id) {
            link.close(code);
        }
        self.leave(connection_id)
    }

    /// Route one decoded client message
    pub fn handle_message(&mut self, connection_id: ConnectionId, msg: ClientMsg, now: u64) {
        if self.phase != RoomPhase::Active {
            debug!(room_id = %self.id, phase = ?self.phase, "Dropping message for inactive room");
            return;
        }

        let Some(player) = self.state.player_mut(&connection_id) else {
            debug!(room_id = %self.id, connection_id = %connection_id, "Dropping message from unknown connection");
            return;
        };

        match msg {
            ClientMsg::Input(command) => {
                if !player.enqueue_input(command, self.config.max_pending_inputs) {
                    debug!(connection_id = %connection_id, "Input queue full, dropping input");
                }
            }
            ClientMsg::Rotation { angle } => {
                player.set_heading(angle);
                self.publisher.mark_dirty();
            }
            ClientMsg::Pong => {
                let outcome = self.heartbeat.record_pong(player, now);
                self.publisher.mark_dirty();
                if outcome.exceeded {
                    debug!(connection_id = %connection_id, rtt = outcome.rtt, "Ping above allowed maximum");
                    if let Some(link) = self.clients.get(&connection_id) {
                        link.send(ServerMsg::MaxPingWarning { ping: outcome.rtt });
                    }
                }
            }
            ClientMsg::FetchConfig => {
                if let Some(link) = self.clients.get(&connection_id) {
                    link.send(ServerMsg::Config {
                        config: self.config.as_ref().clone(),
                    });
                }
            }
        }
    }

    /// Feed a wall-clock delta (seconds) to the simulation
    pub fn advance(&mut self, delta: f64) -> u32 {
        if self.phase != RoomPhase::Active {
            return 0;
        }
        let steps = self.simulation.advance(&mut self.state, delta);
        if steps > 0 {
            self.publisher.mark_dirty();
        }
        steps
    }

    /// One heartbeat firing: ping everyone, then evict the silent.
    /// Returns the evicted connections.
    pub fn heartbeat(&mut self, now: u64) -> Vec<ConnectionId> {
        if self.phase != RoomPhase::Active {
            return Vec::new();
        }

        for connection_id in self.heartbeat.stamp_pings(&mut self.state, now) {
            if let Some(link) = self.clients.get(&connection_id) {
                link.send(ServerMsg::Ping);
            }
        }

        let stale = self.heartbeat.sweep(&self.state, now);
        for &connection_id in &stale {
            info!(
                room_id = %self.id,
                connection_id = %connection_id,
                "Evicting connection: max ping exceeded"
            );
            self.evict(connection_id, LeaveCode::MaxPingReached);
        }
        stale
    }

    /// Hand committed state to the publisher
    pub fn publish(&mut self) -> bool {
        if self.phase != RoomPhase::Active {
            return false;
        }
        self.publisher.publish(&self.state)
    }

    /// Active -> Disposing -> Disposed; closes every remaining connection
    pub fn dispose(&mut self) {
        if matches!(self.phase, RoomPhase::Disposing | RoomPhase::Disposed) {
            return;
        }
        self.phase = RoomPhase::Disposing;
        info!(room_id = %self.id, player_count = self.state.len(), "Room disposing");

        for link in self.clients.values() {
            link.close(LeaveCode::Normal);
        }
        self.clients.clear();
        self.state.players.clear();

        self.phase = RoomPhase::Disposed;
        info!(room_id = %self.id, "Room disposed");
    }

    fn spawn_position(&mut self) -> (f32, f32) {
        let map = self.config.map_size;
        (
            self.rng.gen_range(0.0..map.width),
            self.rng.gen_range(0.0..map.height),
        )
    }
}
