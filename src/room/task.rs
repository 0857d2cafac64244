//! Per-room event loop and the registry of running rooms

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RoomConfig;
use crate::util::time::RoomClock;
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::controller::{ClientLink, JoinOptions, Room, RoomPhase};
use super::publisher::BroadcastPublisher;
use super::state::ConnectionId;
use super::RoomError;

/// Everything that can happen to a room from the outside
#[derive(Debug)]
pub enum RoomEvent {
    Join {
        connection_id: ConnectionId,
        options: JoinOptions,
        link: ClientLink,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Leave {
        connection_id: ConnectionId,
    },
    Message {
        connection_id: ConnectionId,
        msg: ClientMsg,
    },
    /// Administrative shutdown
    Dispose,
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: String,
    pub events_tx: mpsc::Sender<RoomEvent>,
    pub state_tx: broadcast::Sender<ServerMsg>,
    pub player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    /// Receive committed state broadcasts
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.state_tx.subscribe()
    }

    pub async fn send(&self, event: RoomEvent) -> Result<(), RoomError> {
        self.events_tx
            .send(event)
            .await
            .map_err(|_| RoomError::Closed)
    }

    pub fn same_room(&self, other: &RoomHandle) -> bool {
        self.events_tx.same_channel(&other.events_tx)
    }
}

/// Owns one `Room` and serializes everything that touches it
pub struct RoomTask {
    room: Room,
    events_rx: mpsc::Receiver<RoomEvent>,
    player_count: Arc<AtomicUsize>,
}

impl RoomTask {
    pub fn new(id: &str, config: Arc<RoomConfig>, seed: u64) -> (Self, RoomHandle) {
        let (events_tx, events_rx) = mpsc::channel(1024);
        let (state_tx, _) = broadcast::channel(64);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id: id.to_string(),
            events_tx,
            state_tx: state_tx.clone(),
            player_count: player_count.clone(),
        };

        let publisher = Box::new(BroadcastPublisher::new(state_tx));
        let task = Self {
            room: Room::new(id, config, seed, publisher),
            events_rx,
            player_count,
        };

        (task, handle)
    }

    /// Run until the room is disposed
    pub async fn run(mut self) {
        if let Err(e) = self.room.create() {
            error!(room_id = %self.room.id(), error = %e, "Room failed to start");
            return;
        }

        let config = self.room.config().clone();
        let clock = RoomClock::start();
        let start = clock.epoch();

        // Three independent clocks: simulation, liveness, replication
        let mut tick = interval_at(start + config.tick_interval(), config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat = interval_at(
            start + config.heartbeat_interval(),
            config.heartbeat_interval(),
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut patch = interval_at(start + config.patch_interval(), config.patch_interval());
        patch.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_tick = start;

        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_event(event, clock.now_ms()),
                    None => self.room.dispose(),
                },
                now = tick.tick() => {
                    let delta = now.saturating_duration_since(last_tick);
                    last_tick = now;
                    self.room.advance(delta.as_secs_f64());
                }
                _ = heartbeat.tick() => {
                    let evicted = self.room.heartbeat(clock.now_ms());
                    if !evicted.is_empty() {
                        self.dispose_if_empty();
                    }
                }
                _ = patch.tick() => {
                    self.room.publish();
                }
            }

            self.player_count
                .store(self.room.player_count(), Ordering::Relaxed);

            if self.room.phase() == RoomPhase::Disposed {
                break;
            }
        }

        info!(room_id = %self.room.id(), "Room task finished");
    }

    fn handle_event(&mut self, event: RoomEvent, now: u64) {
        match event {
            RoomEvent::Join {
                connection_id,
                options,
                link,
                reply,
            } => {
                let result = self
                    .room
                    .join(connection_id, &options, link, now)
                    .map(|_| ());
                if let Err(e) = &result {
                    warn!(room_id = %self.room.id(), connection_id = %connection_id, error = %e, "Join rejected");
                }
                if reply.send(result).is_err() {
                    // Joiner went away before hearing back
                    debug!(connection_id = %connection_id, "Join reply dropped");
                    self.room.leave(connection_id);
                    self.dispose_if_empty();
                }
            }
            RoomEvent::Leave { connection_id } => {
                if self.room.leave(connection_id) {
                    self.dispose_if_empty();
                }
            }
            RoomEvent::Message { connection_id, msg } => {
                self.room.handle_message(connection_id, msg, now);
            }
            RoomEvent::Dispose => {
                self.room.dispose();
            }
        }
    }

    /// Rooms close once their last client is gone
    fn dispose_if_empty(&mut self) {
        if self.room.phase() == RoomPhase::Active && self.room.is_empty() {
            self.room.dispose();
        }
    }
}

/// Registry of all running rooms
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, RoomHandle>>,
    config: Arc<RoomConfig>,
}

impl RoomRegistry {
    pub fn new(config: Arc<RoomConfig>) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Handle for `id`, spawning the room if it is not running
    pub fn get_or_create(&self, id: &str) -> RoomHandle {
        self.rooms
            .entry(id.to_string())
            .or_insert_with(|| self.spawn(id))
            .value()
            .clone()
    }

    fn spawn(&self, id: &str) -> RoomHandle {
        let (task, handle) = RoomTask::new(id, self.config.clone(), rand::random());
        let rooms = self.rooms.clone();
        let own = handle.clone();

        tokio::spawn(async move {
            task.run().await;
            rooms.remove_if(&own.id, |_, current| current.same_room(&own));
        });

        info!(room_id = %id, "Room spawned");
        handle
    }

    /// Join `room_id`, creating it on demand.
    ///
    /// A room that is shutting down refuses the join; in that case the
    /// stale handle is forgotten and the join is retried once on a fresh room.
    pub async fn join(
        &self,
        room_id: &str,
        connection_id: ConnectionId,
        options: JoinOptions,
        link: ClientLink,
    ) -> Result<RoomHandle, RoomError> {
        for _ in 0..2 {
            let handle = self.get_or_create(room_id);
            let (reply_tx, reply_rx) = oneshot::channel();
            let event = RoomEvent::Join {
                connection_id,
                options: options.clone(),
                link: link.clone(),
                reply: reply_tx,
            };

            if handle.send(event).await.is_err() {
                self.forget(&handle);
                continue;
            }

            match reply_rx.await {
                Ok(Ok(())) => return Ok(handle),
                Ok(Err(RoomError::NotActive(_))) | Err(_) => self.forget(&handle),
                Ok(Err(e)) => return Err(e),
            }
        }

        Err(RoomError::Closed)
    }

    fn forget(&self, handle: &RoomHandle) {
        self.rooms
            .remove_if(&handle.id, |_, current| current.same_room(handle));
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }

    /// Ask every room to shut down
    pub async fn dispose_all(&self) {
        let handles: Vec<RoomHandle> = self.rooms.iter().map(|r| r.value().clone()).collect();
        for handle in handles {
            let _ = handle.send(RoomEvent::Dispose).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::controller::Outbound;
    use crate::room::state::InputCommand;
    use crate::ws::protocol::LeaveCode;
    use std::time::Duration;
    use uuid::Uuid;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Arc::new(RoomConfig::default()))
    }

    fn link() -> (ConnectionId, ClientLink, mpsc::Receiver<Outbound>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(256);
        (id, ClientLink::new(id, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_is_evicted_with_liveness_code() {
        let registry = registry();
        let (id, link, mut rx) = link();
        let started = Instant::now();

        registry
            .join("arena", id, JoinOptions::default(), link)
            .await
            .unwrap();

        let code = loop {
            match rx.recv().await {
                Some(Outbound::Close(code)) => break code,
                Some(_) => continue,
                None => panic!("link closed without a close code"),
            }
        };

        let elapsed = started.elapsed();
        assert_eq!(code, LeaveCode::MaxPingReached);
        assert!(elapsed > Duration::from_millis(5000), "evicted early: {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(6100), "evicted late: {elapsed:?}");

        // Last player gone: the room disposes and leaves the registry
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.active_rooms(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mid_period_joiner_is_evicted_within_one_period_of_timeout() {
        let registry = registry();
        let (a, link_a, mut rx_a) = link();
        let handle = registry
            .join("arena", a, JoinOptions::default(), link_a)
            .await
            .unwrap();

        // First client answers every ping so the room outlives the second
        let responder = handle.clone();
        tokio::spawn(async move {
            while let Some(out) = rx_a.recv().await {
                if out == Outbound::Message(ServerMsg::Ping) {
                    let _ = responder
                        .send(RoomEvent::Message {
                            connection_id: a,
                            msg: ClientMsg::Pong,
                        })
                        .await;
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(400)).await;
        let (b, link_b, mut rx_b) = link();
        registry
            .join("arena", b, JoinOptions::default(), link_b)
            .await
            .unwrap();
        let joined = Instant::now();

        let code = loop {
            match rx_b.recv().await {
                Some(Outbound::Close(code)) => break code,
                Some(_) => continue,
                None => panic!("link closed without a close code"),
            }
        };

        let elapsed = joined.elapsed();
        let period = RoomConfig::default().heartbeat_interval();
        assert_eq!(code, LeaveCode::MaxPingReached);
        assert!(elapsed > Duration::from_millis(5000), "evicted early: {elapsed:?}");
        assert!(
            elapsed <= Duration::from_millis(5000) + period,
            "evicted late: {elapsed:?}"
        );
        assert_eq!(handle.player_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn answering_pings_keeps_client_connected() {
        let registry = registry();
        let (id, link, mut rx) = link();
        let handle = registry
            .join("arena", id, JoinOptions::default(), link)
            .await
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(12), async {
            loop {
                match rx.recv().await {
                    Some(Outbound::Message(ServerMsg::Ping)) => {
                        handle
                            .send(RoomEvent::Message {
                                connection_id: id,
                                msg: ClientMsg::Pong,
                            })
                            .await
                            .unwrap();
                    }
                    Some(Outbound::Close(code)) => return code,
                    Some(_) => {}
                    None => return LeaveCode::AbnormalClosure,
                }
            }
        })
        .await;

        assert!(outcome.is_err(), "client was closed: {outcome:?}");
        assert_eq!(handle.player_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_input_shows_up_in_published_state() {
        let registry = registry();
        let (id, link, _rx) = link();
        let handle = registry
            .join("arena", id, JoinOptions::default(), link)
            .await
            .unwrap();
        let mut states = handle.subscribe();

        let x_of = |msg: &ServerMsg| match msg {
            ServerMsg::State { players, .. } => players
                .iter()
                .find(|p| p.connection_id == id)
                .map(|p| p.x),
            _ => None,
        };

        let first = loop {
            if let Some(x) = x_of(&states.recv().await.unwrap()) {
                break x;
            }
        };

        handle
            .send(RoomEvent::Message {
                connection_id: id,
                msg: ClientMsg::Input(InputCommand {
                    right: true,
                    ..Default::default()
                }),
            })
            .await
            .unwrap();

        let moved = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(x) = x_of(&states.recv().await.unwrap()) {
                    if x != first {
                        return x;
                    }
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(moved, first + 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn last_leave_disposes_and_next_join_gets_a_fresh_room() {
        let registry = registry();
        let (a, link_a, _rx_a) = link();
        let first = registry
            .join("arena", a, JoinOptions::default(), link_a)
            .await
            .unwrap();
        assert_eq!(registry.active_rooms(), 1);

        first
            .send(RoomEvent::Leave { connection_id: a })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.active_rooms(), 0);

        let (b, link_b, _rx_b) = link();
        let second = registry
            .join("arena", b, JoinOptions::default(), link_b)
            .await
            .unwrap();
        assert!(!second.same_room(&first));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.total_players(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_all_closes_clients_normally() {
        let registry = registry();
        let (id, link, mut rx) = link();
        registry
            .join("arena", id, JoinOptions::default(), link)
            .await
            .unwrap();

        registry.dispose_all().await;

        let code = loop {
            match rx.recv().await {
                Some(Outbound::Close(code)) => break code,
                Some(_) => continue,
                None => panic!("link closed without a close code"),
            }
        };
        assert_eq!(code, LeaveCode::Normal);
    }
}
