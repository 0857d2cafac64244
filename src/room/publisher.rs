//! State replication: the seam between the room and its broadcast transport

use tokio::sync::broadcast;

use crate::ws::protocol::{PlayerSnapshot, ServerMsg};

use super::state::RoomState;

/// Receives committed room state.
///
/// The room calls `mark_dirty` after every mutation and `publish` on the
/// patch timer, always between events, so implementations only ever see
/// fully applied state.
pub trait ReplicationPublisher: Send {
    fn mark_dirty(&mut self);

    /// Ship the state if anything changed since the last call.
    /// Returns whether a message went out.
    fn publish(&mut self, state: &RoomState) -> bool;
}

/// Sends a full `state` snapshot over a broadcast channel
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ServerMsg>,
    dirty: bool,
}

impl BroadcastPublisher {
    pub fn new(tx: broadcast::Sender<ServerMsg>) -> Self {
        Self { tx, dirty: false }
    }

    /// Build a snapshot message
    pub fn build(state: &RoomState) -> ServerMsg {
        ServerMsg::State {
            elapsed_sim_time: state.elapsed_sim_time,
            players: state.players.values().map(PlayerSnapshot::from).collect(),
        }
    }
}

impl ReplicationPublisher for BroadcastPublisher {
    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn publish(&mut self, state: &RoomState) -> bool {
        if !self.dirty {
            return false;
        }
        self.dirty = false;

        // No subscribers is not an error
        let _ = self.tx.send(Self::build(state));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::state::PlayerRecord;
    use uuid::Uuid;

    #[test]
    fn publishes_only_when_dirty() {
        let (tx, mut rx) = broadcast::channel(8);
        let mut publisher = BroadcastPublisher::new(tx);
        let mut state = RoomState::new();
        let id = Uuid::new_v4();
        state
            .players
            .insert(id, PlayerRecord::new(id, "bob".into(), "a".into(), 1.0, 2.0, 0));

        assert!(!publisher.publish(&state));
        assert!(rx.try_recv().is_err());

        publisher.mark_dirty();
        assert!(publisher.publish(&state));
        match rx.try_recv().unwrap() {
            ServerMsg::State { players, .. } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].connection_id, id);
                assert_eq!((players[0].x, players[0].y), (1.0, 2.0));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        assert!(!publisher.publish(&state));
    }
}
