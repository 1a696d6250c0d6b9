// src/rl/environment.rs
//
// Per-tick training loop driver.
//
// TrainingEnvironment turns collaborator telemetry into a state vector, asks
// the agent for an action, shapes the reward, stores the transition and
// schedules DQN updates. It also owns the episode state machine:
//
//   Idle -> Airborne -> { MissionComplete | Dead | Timeout } -> Airborne (next episode)
//
// The engine never touches physics. Reward-coupled damage is reported in the
// StepOutcome for the collaborator to apply.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::action::FlightAction;
use super::agent::{DqnAgent, EpisodeReport, SavedModel, TrainingMetrics};
use super::observation::{drone_state_to_vector, STATE_SIZE};
use super::replay::Experience;
use super::reward::{self, RewardBreakdown, RewardContext, RewardDamage};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{ensure_len, Error, Result};
use crate::types::{DroneTelemetry, Obstacle, TimestampMs};

/// Episode lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EpisodePhase {
    /// No episode running; the next step starts one.
    #[default]
    Idle,
    Airborne,
    MissionComplete,
    Dead,
    Timeout,
}

impl EpisodePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EpisodePhase::MissionComplete | EpisodePhase::Dead | EpisodePhase::Timeout
        )
    }
}

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    MissionComplete,
    /// Telemetry reported the drone dead.
    Crashed,
    /// Cumulative reward fell to twice the damage threshold.
    RewardDeath,
    MaxSteps,
    /// Wall-clock episode limit.
    Timeout,
    /// Ended by `reset_episode`.
    Manual,
}

impl TerminationReason {
    pub fn phase(&self) -> EpisodePhase {
        match self {
            TerminationReason::MissionComplete => EpisodePhase::MissionComplete,
            TerminationReason::Crashed | TerminationReason::RewardDeath => EpisodePhase::Dead,
            TerminationReason::MaxSteps | TerminationReason::Timeout => EpisodePhase::Timeout,
            TerminationReason::Manual => EpisodePhase::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::MissionComplete => "mission_complete",
            TerminationReason::Crashed => "crashed",
            TerminationReason::RewardDeath => "reward_death",
            TerminationReason::MaxSteps => "max_steps",
            TerminationReason::Timeout => "timeout",
            TerminationReason::Manual => "manual",
        }
    }
}

/// Mutable session state of the environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub phase: EpisodePhase,
    /// Episodes started this session.
    pub episode: u64,
    /// Ticks in the current episode.
    pub step: u64,
    /// Ticks across the session.
    pub total_steps: u64,
    pub episode_reward: f64,
    pub best_reward: Option<f64>,
    pub collisions: u32,
    pub exploration_steps: u64,
    pub exploitation_steps: u64,

    // ----- Loss accounting -----
    pub episode_loss_sum: f64,
    pub episode_train_calls: u64,

    // ----- Previous tick -----
    pub previous_state: Option<Vec<f64>>,
    pub previous_action: Option<FlightAction>,
    pub previous_distance: Option<f64>,

    // ----- Edge trackers -----
    pub mission_completed: bool,
    pub was_dead: bool,

    pub episode_start_ms: TimestampMs,
}

impl TrainingState {
    /// Clear per-episode fields, keeping session counters.
    fn begin_episode(&mut self, now_ms: TimestampMs) {
        self.phase = EpisodePhase::Airborne;
        self.episode += 1;
        self.step = 0;
        self.episode_reward = 0.0;
        self.collisions = 0;
        self.exploration_steps = 0;
        self.exploitation_steps = 0;
        self.episode_loss_sum = 0.0;
        self.episode_train_calls = 0;
        self.previous_state = None;
        self.previous_action = None;
        self.previous_distance = None;
        self.mission_completed = false;
        self.was_dead = false;
        self.episode_start_ms = now_ms;
    }

    fn reward_context(&self) -> RewardContext {
        RewardContext {
            mission_completed: self.mission_completed,
            was_dead: self.was_dead,
        }
    }

    fn average_loss(&self) -> f64 {
        if self.episode_train_calls == 0 {
            0.0
        } else {
            self.episode_loss_sum / self.episode_train_calls as f64
        }
    }
}

/// Result of one environment tick.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub action: FlightAction,
    /// Action came from the exploration branch.
    pub explored: bool,
    pub reward: f64,
    pub done: bool,
    pub phase: EpisodePhase,
    pub termination: Option<TerminationReason>,
    /// Damage the collaborator should apply for poor cumulative reward.
    pub reward_damage: RewardDamage,
    pub breakdown: RewardBreakdown,
    /// Loss of a DQN update run on this tick.
    pub loss: Option<f64>,
    /// Metrics record when this tick ended the episode.
    pub metrics: Option<TrainingMetrics>,
}

#[derive(Debug)]
pub struct TrainingEnvironment {
    config: EngineConfig,
    agent: DqnAgent,
    state: TrainingState,
    clock: Box<dyn Clock>,
}

impl TrainingEnvironment {
    pub fn new<C>(config: EngineConfig, clock: C) -> Result<Self>
    where
        C: Clock + Clone + 'static,
    {
        config.validate()?;
        let agent = DqnAgent::new(
            config.network.clone(),
            config.training.clone(),
            Box::new(clock.clone()),
        )?;
        Ok(Self {
            config,
            agent,
            state: TrainingState::default(),
            clock: Box::new(clock),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn agent(&self) -> &DqnAgent {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut DqnAgent {
        &mut self.agent
    }

    pub fn phase(&self) -> EpisodePhase {
        self.state.phase
    }

    /// Advance one tick.
    ///
    /// Encoding or action-selection failures are returned before any session
    /// state changes, so the caller can skip the tick.
    pub fn step(&mut self, telemetry: &DroneTelemetry, obstacles: &[Obstacle]) -> Result<StepOutcome> {
        let state_vector = drone_state_to_vector(telemetry)?;
        ensure_len(
            "forward input",
            self.agent.network_config().input_size,
            &state_vector,
        )?;

        if self.state.phase != EpisodePhase::Airborne {
            self.start_episode();
        }

        let selection = self.agent.act(&state_vector)?;
        let action = selection.action;

        // This telemetry is the result of the previous tick's action.
        let previous_distance = self
            .state
            .previous_distance
            .unwrap_or(telemetry.distance_to_target);
        let acted = self.state.previous_action.unwrap_or(action);
        let breakdown = self.calculate_reward(telemetry, acted, obstacles, previous_distance);
        let reward = breakdown.total();

        if breakdown.mission_completed_now {
            self.state.mission_completed = true;
        }
        if breakdown.collision_now {
            self.state.collisions += 1;
        }
        self.state.was_dead = telemetry.is_dead;

        let previous_cumulative = self.state.episode_reward;
        self.state.episode_reward += reward;
        let reward_damage =
            self.check_reward_based_damage(previous_cumulative, self.state.episode_reward);

        self.state.step += 1;
        self.state.total_steps += 1;
        if selection.explored {
            self.state.exploration_steps += 1;
        } else {
            self.state.exploitation_steps += 1;
        }

        let termination = if telemetry.is_dead {
            Some(TerminationReason::Crashed)
        } else if reward_damage.should_die {
            Some(TerminationReason::RewardDeath)
        } else {
            self.completion_reason()
        };
        let done = termination.is_some();

        if let (Some(prev_state), Some(prev_action)) =
            (self.state.previous_state.take(), self.state.previous_action)
        {
            self.agent.store_experience(Experience {
                state: prev_state,
                action: prev_action,
                reward,
                next_state: state_vector.clone(),
                done,
                timestamp_ms: self.clock.now_ms(),
            })?;
        }

        let loss = if self.state.total_steps % self.config.training.train_frequency == 0 {
            let before = self.agent.training_steps();
            let loss = self.agent.train()?;
            if self.agent.training_steps() > before {
                self.state.episode_loss_sum += loss;
                self.state.episode_train_calls += 1;
                Some(loss)
            } else {
                None
            }
        } else {
            None
        };

        self.state.previous_state = Some(state_vector);
        self.state.previous_action = Some(action);
        self.state.previous_distance = Some(telemetry.distance_to_target);

        let metrics = match termination {
            Some(reason) => Some(self.end_episode(reason)),
            None => None,
        };

        Ok(StepOutcome {
            action,
            explored: selection.explored,
            reward,
            done,
            phase: self.state.phase,
            termination,
            reward_damage,
            breakdown,
            loss,
            metrics,
        })
    }

    /// Shaped reward for a tick under the current episode flags.
    pub fn calculate_reward(
        &self,
        telemetry: &DroneTelemetry,
        action: FlightAction,
        obstacles: &[Obstacle],
        previous_distance: f64,
    ) -> RewardBreakdown {
        reward::calculate_reward(
            &self.config.reward,
            telemetry,
            action,
            obstacles,
            previous_distance,
            self.state.reward_context(),
        )
    }

    pub fn check_reward_based_damage(&self, previous_cumulative: f64, cumulative: f64) -> RewardDamage {
        reward::check_reward_based_damage(&self.config.reward, previous_cumulative, cumulative)
    }

    /// Mission completed, step limit reached, or episode wall-clock limit hit.
    ///
    /// Death is checked separately by `step`.
    pub fn is_episode_complete(&self) -> bool {
        self.completion_reason().is_some()
    }

    fn completion_reason(&self) -> Option<TerminationReason> {
        if self.state.mission_completed {
            return Some(TerminationReason::MissionComplete);
        }
        if self.state.step >= self.config.episode.max_steps {
            return Some(TerminationReason::MaxSteps);
        }
        let elapsed = self
            .clock
            .now_ms()
            .saturating_sub(self.state.episode_start_ms);
        if elapsed >= self.config.episode.max_duration_ms {
            return Some(TerminationReason::Timeout);
        }
        None
    }

    fn start_episode(&mut self) {
        self.state.begin_episode(self.clock.now_ms());
        self.agent.start_episode();
    }

    fn end_episode(&mut self, reason: TerminationReason) -> TrainingMetrics {
        let s = &mut self.state;
        s.phase = reason.phase();
        if s.best_reward.map_or(true, |best| s.episode_reward > best) {
            s.best_reward = Some(s.episode_reward);
        }
        debug!(
            episode = s.episode,
            reason = reason.as_str(),
            reward = s.episode_reward,
            "episode terminated"
        );
        let report = EpisodeReport {
            total_reward: s.episode_reward,
            length: s.step,
            collisions: s.collisions,
            exploration_steps: s.exploration_steps,
            exploitation_steps: s.exploitation_steps,
            average_loss: s.average_loss(),
        };
        self.agent.end_episode(report)
    }

    /// End the running episode early (external reset). The next step starts a
    /// fresh one. Returns the metrics record if an episode was running.
    pub fn reset_episode(&mut self) -> Option<TrainingMetrics> {
        if self.state.phase != EpisodePhase::Airborne {
            self.state.phase = EpisodePhase::Idle;
            return None;
        }
        let metrics = self.end_episode(TerminationReason::Manual);
        self.state.previous_state = None;
        self.state.previous_action = None;
        self.state.previous_distance = None;
        Some(metrics)
    }

    /// Fresh session: agent re-initialised, counters zeroed, phase Idle.
    pub fn reset(&mut self) -> Result<()> {
        self.agent.reset()?;
        self.state = TrainingState::default();
        Ok(())
    }

    pub fn save_model(&self) -> Result<String> {
        self.agent.save()
    }

    /// Restore the agent. The running episode is abandoned so no transition
    /// spans two models.
    pub fn load_model(&mut self, blob: &str) -> Result<()> {
        let saved: SavedModel = serde_json::from_str(blob)
            .map_err(|e| Error::load(format!("model json: {e}")))?;
        if saved.network_config.input_size != STATE_SIZE {
            return Err(Error::load(format!(
                "model input_size {} does not match the {STATE_SIZE}-feature observation",
                saved.network_config.input_size
            )));
        }
        self.agent.restore(saved)?;
        self.state.phase = EpisodePhase::Idle;
        self.state.previous_state = None;
        self.state.previous_action = None;
        self.state.previous_distance = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::NetworkConfig;
    use crate::types::Vec3;

    fn small_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.network.hidden_layers = vec![16];
        cfg.network.dropout_rate = 0.0;
        cfg.training.batch_size = 4;
        cfg.training.replay_capacity = 256;
        cfg.training.train_frequency = 2;
        cfg.episode.max_steps = 50;
        cfg
    }

    fn flying_at(distance: f64) -> DroneTelemetry {
        DroneTelemetry {
            position: Vec3::new(0.0, 20.0, 0.0),
            is_flying: true,
            is_landed: false,
            target_position: Vec3::new(distance, 0.0, 0.0),
            distance_to_target: distance,
            ..DroneTelemetry::default()
        }
    }

    #[test]
    fn first_step_starts_episode_without_storing() {
        let mut env = TrainingEnvironment::new(small_config(), ManualClock::new(0)).unwrap();
        assert_eq!(env.phase(), EpisodePhase::Idle);

        let out = env.step(&flying_at(80.0), &[]).unwrap();
        assert!(!out.done);
        assert_eq!(out.phase, EpisodePhase::Airborne);
        assert_eq!(env.state().episode, 1);
        assert_eq!(out.breakdown.progress, 0.0, "first tick has no progress term");
        assert!(env.agent().replay_buffer().is_empty());

        env.step(&flying_at(79.0), &[]).unwrap();
        assert_eq!(env.agent().replay_buffer().len(), 1);
    }

    #[test]
    fn death_ends_episode_and_next_step_starts_another() {
        let mut env = TrainingEnvironment::new(small_config(), ManualClock::new(0)).unwrap();
        env.step(&flying_at(60.0), &[]).unwrap();

        let mut dead = flying_at(60.0);
        dead.is_dead = true;
        dead.is_flying = false;
        let out = env.step(&dead, &[]).unwrap();
        assert!(out.done);
        assert_eq!(out.termination, Some(TerminationReason::Crashed));
        assert_eq!(out.phase, EpisodePhase::Dead);
        assert!(out.metrics.is_some());
        assert_eq!(env.state().collisions, 1);

        let stored = env.agent().replay_buffer().get(0).unwrap();
        assert!(stored.done, "terminal transition is marked done");

        env.step(&flying_at(60.0), &[]).unwrap();
        assert_eq!(env.state().episode, 2);
        assert_eq!(env.state().step, 1);
        assert_eq!(env.agent().replay_buffer().len(), 1, "no transition across episodes");
    }

    #[test]
    fn wall_clock_timeout() {
        let clock = ManualClock::new(1_000);
        let mut env = TrainingEnvironment::new(small_config(), clock.clone()).unwrap();
        env.step(&flying_at(60.0), &[]).unwrap();
        clock.advance_ms(120_000);
        let out = env.step(&flying_at(60.0), &[]).unwrap();
        assert_eq!(out.termination, Some(TerminationReason::Timeout));
        assert_eq!(out.phase, EpisodePhase::Timeout);
    }

    #[test]
    fn step_limit_ends_episode() {
        let mut cfg = small_config();
        cfg.episode.max_steps = 3;
        let mut env = TrainingEnvironment::new(cfg, ManualClock::new(0)).unwrap();
        let outcomes: Vec<_> = (0..3)
            .map(|_| env.step(&flying_at(60.0), &[]).unwrap())
            .collect();
        assert!(!outcomes[1].done);
        assert_eq!(outcomes[2].termination, Some(TerminationReason::MaxSteps));
        assert_eq!(outcomes[2].metrics.as_ref().map(|m| m.episode_length), Some(3));
    }

    #[test]
    fn invalid_telemetry_leaves_state_untouched() {
        let mut env = TrainingEnvironment::new(small_config(), ManualClock::new(0)).unwrap();
        env.step(&flying_at(60.0), &[]).unwrap();
        let before = env.state().clone();

        let mut bad = flying_at(60.0);
        bad.velocity.x = f64::INFINITY;
        bad.position.z = f64::NAN;
        assert!(env.step(&bad, &[]).is_err());
        assert_eq!(env.state(), &before);
    }

    #[test]
    fn reward_breakdown_names_the_action_that_was_flown() {
        let mut env = TrainingEnvironment::new(small_config(), ManualClock::new(0)).unwrap();
        let first = env.step(&flying_at(60.0), &[]).unwrap();
        assert_eq!(first.breakdown.action, first.action);

        let second = env.step(&flying_at(59.0), &[]).unwrap();
        assert_eq!(
            second.breakdown.action, first.action,
            "second tick's telemetry came from the first tick's action"
        );
    }

    #[test]
    fn mismatched_network_width_fails_before_episode_starts() {
        let mut narrow = DqnAgent::new(
            NetworkConfig {
                input_size: 10,
                hidden_layers: vec![8],
                ..NetworkConfig::default()
            },
            small_config().training,
            Box::new(ManualClock::new(0)),
        )
        .unwrap();
        narrow.start_episode();
        let blob = narrow.save().unwrap();

        let mut env = TrainingEnvironment::new(small_config(), ManualClock::new(0)).unwrap();
        assert!(
            matches!(env.load_model(&blob), Err(Error::LoadError { .. })),
            "environment refuses a model that cannot read its observation"
        );

        env.agent_mut().load(&blob).unwrap();
        for _ in 0..3 {
            let err = env.step(&flying_at(60.0), &[]).unwrap_err();
            assert!(matches!(err, Error::DimensionMismatch { expected: 10, actual: 40, .. }));
        }
        assert_eq!(env.state().episode, 0);
        assert_eq!(env.agent().episode(), 1, "agent keeps the loaded counter");
        assert_eq!(env.phase(), EpisodePhase::Idle);
    }

    #[test]
    fn reset_episode_records_manual_termination() {
        let mut env = TrainingEnvironment::new(small_config(), ManualClock::new(0)).unwrap();
        assert!(env.reset_episode().is_none());
        env.step(&flying_at(60.0), &[]).unwrap();
        let metrics = env.reset_episode().unwrap();
        assert_eq!(metrics.episode_length, 1);
        assert_eq!(env.phase(), EpisodePhase::Idle);
        assert_eq!(env.agent().metrics().len(), 1);
    }
}
