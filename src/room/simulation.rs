//! Fixed-timestep simulation: input draining and motion integration

use super::state::{InputCommand, PlayerRecord, RoomState};

/// Accumulator that converts wall-clock deltas into whole fixed steps
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    /// Step length in seconds
    step: f64,
    accumulator: f64,
}

impl FixedTimestep {
    pub fn new(step: f64) -> Self {
        Self {
            step,
            accumulator: 0.0,
        }
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    #[cfg(test)]
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    /// Add `delta` seconds and return how many fixed steps are now due
    pub fn accumulate(&mut self, delta: f64) -> u32 {
        if !delta.is_finite() || delta <= 0.0 {
            return 0;
        }

        self.accumulator += delta;
        let mut steps = 0;
        while self.accumulator >= self.step {
            self.accumulator -= self.step;
            steps += 1;
        }
        steps
    }
}

/// Advances room state in discrete, deterministic steps
#[derive(Debug, Clone)]
pub struct Simulation {
    timestep: FixedTimestep,
    velocity: f32,
}

impl Simulation {
    pub fn new(fixed_time_step: f64, velocity: f32) -> Self {
        Self {
            timestep: FixedTimestep::new(fixed_time_step),
            velocity,
        }
    }

    /// Feed a wall-clock delta; runs every fixed update that became due.
    /// Returns the number of fixed updates executed.
    pub fn advance(&mut self, state: &mut RoomState, delta: f64) -> u32 {
        let steps = self.timestep.accumulate(delta);
        for _ in 0..steps {
            self.fixed_update(state);
            state.elapsed_sim_time += self.timestep.step();
        }
        steps
    }

    /// One fixed update: drain every player's queue to empty
    pub fn fixed_update(&self, state: &mut RoomState) {
        for player in state.players.values_mut() {
            drain_inputs(player, self.velocity);
        }
    }
}

fn drain_inputs(player: &mut PlayerRecord, velocity: f32) {
    while let Some(command) = player.pending_inputs.pop_front() {
        integrate(player, &command, velocity);
    }
}

/// Apply one command: horizontal and vertical axes combine, each axis
/// resolves its own conflict (left beats right, up beats down).
pub fn integrate(player: &mut PlayerRecord, command: &InputCommand, velocity: f32) {
    if command.left {
        player.x -= velocity;
    } else if command.right {
        player.x += velocity;
    }

    if command.up {
        player.y -= velocity;
    } else if command.down {
        player.y += velocity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomConfig;
    use uuid::Uuid;

    const STEP: f64 = 1.0 / 60.0;

    fn room_with_player(x: f32, y: f32) -> (RoomState, Uuid) {
        let mut state = RoomState::new();
        let id = Uuid::new_v4();
        state
            .players
            .insert(id, PlayerRecord::new(id, "p".into(), "a".into(), x, y, 0));
        (state, id)
    }

    fn cmd(left: bool, right: bool, up: bool, down: bool) -> InputCommand {
        InputCommand { left, right, up, down }
    }

    #[test]
    fn accumulator_carries_remainder() {
        let mut ts = FixedTimestep::new(0.010);
        assert_eq!(ts.accumulate(0.004), 0);
        assert_eq!(ts.accumulate(0.004), 0);
        assert_eq!(ts.accumulate(0.004), 1);
        assert!((ts.accumulator() - 0.002).abs() < 1e-9);
        assert_eq!(ts.accumulate(0.035), 3);
    }

    #[test]
    fn accumulator_ignores_bad_deltas() {
        let mut ts = FixedTimestep::new(STEP);
        assert_eq!(ts.accumulate(-1.0), 0);
        assert_eq!(ts.accumulate(f64::NAN), 0);
        assert_eq!(ts.accumulate(f64::INFINITY), 0);
        assert_eq!(ts.accumulator(), 0.0);
    }

    #[test]
    fn scheduler_deltas_run_one_step_per_tick() {
        let config = RoomConfig::default();
        let (mut state, _) = room_with_player(0.0, 0.0);
        let mut sim = Simulation::new(config.fixed_time_step(), 2.0);
        let delta = config.tick_interval().as_secs_f64();

        for tick in 0..600 {
            assert_eq!(sim.advance(&mut state, delta), 1, "tick {tick}");
        }
    }

    #[test]
    fn single_input_is_applied_once_over_a_second() {
        let (mut state, id) = room_with_player(100.0, 100.0);
        let mut sim = Simulation::new(STEP, 2.0);

        state
            .player_mut(&id)
            .unwrap()
            .enqueue_input(cmd(false, true, false, false), 64);

        let mut ticks = 0;
        for _ in 0..60 {
            ticks += sim.advance(&mut state, STEP);
        }

        assert_eq!(ticks, 60);
        let player = state.player(&id).unwrap();
        assert_eq!(player.x, 102.0);
        assert_eq!(player.y, 100.0);
        assert!(player.pending_inputs.is_empty());
        assert!((state.elapsed_sim_time - 1.0).abs() < 1e-9);
    }

    #[test]
    fn axes_combine_and_conflicts_resolve() {
        let (mut state, id) = room_with_player(0.0, 0.0);
        let sim = Simulation::new(STEP, 1.0);
        {
            let player = state.player_mut(&id).unwrap();
            player.enqueue_input(cmd(true, true, false, true), 64);
            player.enqueue_input(cmd(false, true, true, true), 64);
        }
        sim.fixed_update(&mut state);

        let player = state.player(&id).unwrap();
        // first: left wins, down; second: right, up wins
        assert_eq!(player.x, 0.0);
        assert_eq!(player.y, 0.0);

        let (mut state, id) = room_with_player(0.0, 0.0);
        state
            .player_mut(&id)
            .unwrap()
            .enqueue_input(cmd(false, true, false, true), 64);
        sim.fixed_update(&mut state);
        let player = state.player(&id).unwrap();
        assert_eq!((player.x, player.y), (1.0, 1.0));
    }

    #[test]
    fn no_steps_before_a_full_step_elapses() {
        let (mut state, id) = room_with_player(0.0, 0.0);
        let mut sim = Simulation::new(STEP, 2.0);
        state
            .player_mut(&id)
            .unwrap()
            .enqueue_input(cmd(true, false, false, false), 64);

        assert_eq!(sim.advance(&mut state, STEP / 2.0), 0);
        assert_eq!(state.player(&id).unwrap().x, 0.0);
        assert_eq!(state.player(&id).unwrap().pending_inputs.len(), 1);
        assert_eq!(state.elapsed_sim_time, 0.0);
    }

    #[test]
    fn replay_is_deterministic() {
        let script: Vec<(usize, InputCommand)> = vec![
            (0, cmd(false, true, false, false)),
            (0, cmd(false, true, true, false)),
            (3, cmd(true, false, false, true)),
            (7, cmd(false, false, false, true)),
            (7, cmd(false, true, false, false)),
            (12, cmd(true, true, true, true)),
        ];

        let run = || {
            let (mut state, id) = room_with_player(50.0, 50.0);
            let mut sim = Simulation::new(STEP, 2.0);
            let mut trajectory = Vec::new();

            for tick in 0..20 {
                for (_, command) in script.iter().filter(|(at, _)| *at == tick) {
                    state.player_mut(&id).unwrap().enqueue_input(*command, 64);
                }
                assert_eq!(sim.advance(&mut state, STEP), 1);
                let p = state.player(&id).unwrap();
                trajectory.push((p.x, p.y));
            }
            trajectory
        };

        let a = run();
        let b = run();
        assert_eq!(a, b);
        assert_eq!(a[0], (54.0, 48.0));
        assert_eq!(a.last(), Some(&(52.0, 50.0)));
    }
}
