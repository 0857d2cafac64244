//! Ping/pong liveness accounting
//!
//! Two thresholds are kept apart on purpose: `max_allowed_ping` only
//! triggers an advisory warning to the slow client, while
//! `ping_response_max_time` is the silence after which a connection is
//! evicted. Only the periodic sweep evicts.

use super::state::{ConnectionId, PlayerRecord, RoomState};

/// Result of handling a pong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PongOutcome {
    /// Measured round trip in milliseconds
    pub rtt: u64,
    /// RTT exceeded the advisory threshold
    pub exceeded: bool,
}

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    max_allowed_ping: u64,
    ping_response_max_time: u64,
}

impl HeartbeatMonitor {
    pub fn new(max_allowed_ping: u64, ping_response_max_time: u64) -> Self {
        Self {
            max_allowed_ping,
            ping_response_max_time,
        }
    }

    /// Stamp every player as pinged at `now`; returns who to ping
    pub fn stamp_pings(&self, state: &mut RoomState, now: u64) -> Vec<ConnectionId> {
        state
            .players
            .values_mut()
            .map(|player| {
                player.last_ping_sent_at = now;
                player.connection_id
            })
            .collect()
    }

    /// Connections silent for longer than the response timeout
    pub fn sweep(&self, state: &RoomState, now: u64) -> Vec<ConnectionId> {
        state
            .players
            .values()
            .filter(|player| self.is_stale(player, now))
            .map(|player| player.connection_id)
            .collect()
    }

    pub fn is_stale(&self, player: &PlayerRecord, now: u64) -> bool {
        now.saturating_sub(player.last_pong_received_at) > self.ping_response_max_time
    }

    /// Record a pong from `player` received at `now`
    pub fn record_pong(&self, player: &mut PlayerRecord, now: u64) -> PongOutcome {
        player.last_pong_received_at = now;
        let rtt = now.saturating_sub(player.last_ping_sent_at);
        player.ping = rtt;

        PongOutcome {
            rtt,
            exceeded: rtt > self.max_allowed_ping,
        }
    }
}
