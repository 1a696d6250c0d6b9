// src/rl/agent.rs
//
// Deep Q-Network agent.
//
// Owns the main and target networks, the replay buffer and the per-episode
// metrics log. Bellman targets come from the target network, which is
// hard-synced from the main network every `target_update_frequency` training
// steps (no Polyak averaging).
//
// Session state (episode counter, epsilon schedule, step counters) lives on
// the agent; nothing is global.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::action::ACTION_COUNT;
use super::imitation::ImitationLearning;
use super::network::{ActionSelection, NetworkWeights, NeuralNetwork};
use super::observation::OBS_VERSION;
use super::replay::{Experience, ReplayBuffer};
use crate::clock::Clock;
use crate::config::{NetworkConfig, TrainingConfig};
use crate::error::{ensure_finite, ensure_len, Error, Result};
use crate::types::TimestampMs;

/// Current saved-model format version.
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Episodes retained in the rolling metrics log.
pub const METRICS_LOG_CAP: usize = 1000;

/// Window for the trailing average reward.
pub const MOVING_AVERAGE_WINDOW: usize = 100;

/// Per-episode inputs to `end_episode`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeReport {
    pub total_reward: f64,
    pub length: u64,
    pub collisions: u32,
    pub exploration_steps: u64,
    pub exploitation_steps: u64,
    /// Mean training loss over the episode.
    pub average_loss: f64,
}

/// One record per completed episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub episode: u64,
    pub total_reward: f64,
    /// Trailing average over the last 100 episodes, this one included.
    pub average_reward: f64,
    pub episode_length: u64,
    pub epsilon: f64,
    pub collisions: u32,
    pub exploration_steps: u64,
    pub exploitation_steps: u64,
    pub average_loss: f64,
    pub timestamp_ms: TimestampMs,
}

/// Snapshot of agent progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub episode: u64,
    pub total_steps: u64,
    pub training_steps: u64,
    pub epsilon: f64,
    pub buffer_len: usize,
    pub best_reward: Option<f64>,
    pub recent_average_reward: f64,
}

/// Losses from one blended RL + imitation training call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlendedLoss {
    pub rl_loss: f64,
    /// None when no demonstrations were available.
    pub imitation_loss: Option<f64>,
}

/// Serialized agent state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedModel {
    pub format_version: u32,
    pub obs_version: u32,
    pub main_weights: NetworkWeights,
    pub target_weights: NetworkWeights,
    pub network_config: NetworkConfig,
    pub training_config: TrainingConfig,
    pub episode: u64,
    pub total_steps: u64,
    pub training_steps: u64,
    /// Last 100 episode records.
    pub recent_metrics: Vec<TrainingMetrics>,
}

/// DQN agent with experience replay and a hard-synced target network.
#[derive(Debug)]
pub struct DqnAgent {
    network_config: NetworkConfig,
    training_config: TrainingConfig,
    main: NeuralNetwork,
    target: NeuralNetwork,
    replay: ReplayBuffer,
    /// Replay sampling stream.
    rng: ChaCha8Rng,

    // ----- Session counters -----
    episode: u64,
    total_steps: u64,
    training_steps: u64,
    best_reward: Option<f64>,
    metrics: Vec<TrainingMetrics>,

    clock: Box<dyn Clock>,
}

impl DqnAgent {
    pub fn new(
        network_config: NetworkConfig,
        training_config: TrainingConfig,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        training_config.validate()?;
        let (main, target) = build_networks(&network_config)?;
        Ok(Self {
            replay: ReplayBuffer::new(training_config.replay_capacity),
            rng: ChaCha8Rng::seed_from_u64(training_config.seed),
            network_config,
            training_config,
            main,
            target,
            episode: 0,
            total_steps: 0,
            training_steps: 0,
            best_reward: None,
            metrics: Vec::new(),
            clock,
        })
    }

    // ----- Accessors -----

    pub fn network_config(&self) -> &NetworkConfig {
        &self.network_config
    }

    pub fn training_config(&self) -> &TrainingConfig {
        &self.training_config
    }

    pub fn main_network(&self) -> &NeuralNetwork {
        &self.main
    }

    pub fn main_network_mut(&mut self) -> &mut NeuralNetwork {
        &mut self.main
    }

    pub fn target_network(&self) -> &NeuralNetwork {
        &self.target
    }

    pub fn replay_buffer(&self) -> &ReplayBuffer {
        &self.replay
    }

    pub fn episode(&self) -> u64 {
        self.episode
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn training_steps(&self) -> u64 {
        self.training_steps
    }

    pub fn metrics(&self) -> &[TrainingMetrics] {
        &self.metrics
    }

    pub fn now_ms(&self) -> TimestampMs {
        self.clock.now_ms()
    }

    // ----- Acting -----

    /// `max(epsilon_min, epsilon_start * epsilon_decay^episode)`.
    ///
    /// Non-increasing across episodes; only `reset()` restarts it.
    pub fn current_epsilon(&self) -> f64 {
        let t = &self.training_config;
        (t.epsilon_start * t.epsilon_decay.powf(self.episode as f64)).max(t.epsilon_min)
    }

    /// Epsilon-greedy action from the main network. Counts as one agent step.
    pub fn select_action(&mut self, state: &[f64], epsilon: f64) -> Result<ActionSelection> {
        let selection = self.main.select_action(state, epsilon)?;
        self.total_steps += 1;
        Ok(selection)
    }

    /// Select with the scheduled epsilon.
    pub fn act(&mut self, state: &[f64]) -> Result<ActionSelection> {
        let epsilon = self.current_epsilon();
        self.select_action(state, epsilon)
    }

    /// Validate and store a transition.
    pub fn store_experience(&mut self, experience: Experience) -> Result<()> {
        let n = self.network_config.input_size;
        ensure_len("experience state", n, &experience.state)?;
        ensure_len("experience next_state", n, &experience.next_state)?;
        ensure_finite("experience state", &experience.state)?;
        ensure_finite("experience next_state", &experience.next_state)?;
        if !experience.reward.is_finite() {
            return Err(Error::NumericInvalid {
                context: "experience reward",
                index: 0,
            });
        }
        self.replay.store(experience);
        Ok(())
    }

    // ----- Learning -----

    /// One DQN update over a sampled batch. Returns the mean loss.
    ///
    /// No-op (0 loss) until the buffer holds `batch_size` experiences. Only
    /// the taken action's Q slot is supervised per sample.
    pub fn train(&mut self) -> Result<f64> {
        let batch_size = self.training_config.batch_size;
        if self.replay.len() < batch_size {
            return Ok(0.0);
        }

        let gamma = self.training_config.gamma;
        let batch = self.replay.sample_batch(batch_size, &mut self.rng);
        let mut total_loss = 0.0;

        for exp in &batch {
            let current_q = self.main.forward(&exp.state)?;
            let y = if exp.done {
                exp.reward
            } else {
                let next_q = self.target.forward(&exp.next_state)?;
                let max_next = next_q.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                exp.reward + gamma * max_next
            };

            let mut target = current_q;
            target[exp.action.index()] = y;
            total_loss += self.main.backward(&target)?;
        }
        let loss = total_loss / batch.len() as f64;

        self.training_steps += 1;
        debug!(
            training_steps = self.training_steps,
            loss,
            buffer_len = self.replay.len(),
            "dqn train step"
        );

        if self.training_steps % self.training_config.target_update_frequency == 0 {
            self.sync_target()?;
            info!(
                training_steps = self.training_steps,
                "target network synced"
            );
        }
        Ok(loss)
    }

    /// RL update followed by an imitation batch through the same main network.
    ///
    /// The imitation batch is `imitation_weight * batch_size` (at least 1).
    pub fn train_blended(&mut self, imitation: &mut ImitationLearning) -> Result<BlendedLoss> {
        let rl_loss = self.train()?;
        let imitation_loss = self.train_imitation(imitation)?;
        Ok(BlendedLoss {
            rl_loss,
            imitation_loss,
        })
    }

    /// Imitation half of a blended update, for callers whose RL update ran
    /// elsewhere (the environment tick). None without demonstrations.
    pub fn train_imitation(&mut self, imitation: &mut ImitationLearning) -> Result<Option<f64>> {
        if imitation.demonstration_count() == 0 {
            return Ok(None);
        }
        let weight = imitation.config().imitation_weight;
        let n = ((self.training_config.batch_size as f64 * weight).round() as usize).max(1);
        imitation.train_from_demonstrations(&mut self.main, n).map(Some)
    }

    /// Hard copy of main weights into the target network.
    pub fn sync_target(&mut self) -> Result<()> {
        self.target.set_weights(self.main.weights())
    }

    // ----- Episodes -----

    pub fn start_episode(&mut self) {
        self.episode += 1;
        debug!(episode = self.episode, epsilon = self.current_epsilon(), "episode start");
    }

    /// Record a finished episode and return its metrics record.
    pub fn end_episode(&mut self, report: EpisodeReport) -> TrainingMetrics {
        let window = MOVING_AVERAGE_WINDOW - 1;
        let start = self.metrics.len().saturating_sub(window);
        let previous = &self.metrics[start..];
        let average_reward = (previous.iter().map(|m| m.total_reward).sum::<f64>()
            + report.total_reward)
            / (previous.len() + 1) as f64;

        let record = TrainingMetrics {
            episode: self.episode,
            total_reward: report.total_reward,
            average_reward,
            episode_length: report.length,
            epsilon: self.current_epsilon(),
            collisions: report.collisions,
            exploration_steps: report.exploration_steps,
            exploitation_steps: report.exploitation_steps,
            average_loss: report.average_loss,
            timestamp_ms: self.clock.now_ms(),
        };

        self.metrics.push(record.clone());
        if self.metrics.len() > METRICS_LOG_CAP {
            let excess = self.metrics.len() - METRICS_LOG_CAP;
            self.metrics.drain(..excess);
        }
        if self.best_reward.map_or(true, |best| report.total_reward > best) {
            self.best_reward = Some(report.total_reward);
        }

        info!(
            episode = record.episode,
            reward = record.total_reward,
            avg_reward = record.average_reward,
            length = record.episode_length,
            epsilon = record.epsilon,
            collisions = record.collisions,
            "episode finished"
        );
        record
    }

    /// Trailing average reward of the most recent episode (0 when none).
    pub fn recent_average_reward(&self) -> f64 {
        self.metrics.last().map(|m| m.average_reward).unwrap_or(0.0)
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            episode: self.episode,
            total_steps: self.total_steps,
            training_steps: self.training_steps,
            epsilon: self.current_epsilon(),
            buffer_len: self.replay.len(),
            best_reward: self.best_reward,
            recent_average_reward: self.recent_average_reward(),
        }
    }

    /// Fresh session: re-initialised networks, empty buffer, episode 0.
    pub fn reset(&mut self) -> Result<()> {
        let (main, target) = build_networks(&self.network_config)?;
        self.main = main;
        self.target = target;
        self.replay = ReplayBuffer::new(self.training_config.replay_capacity);
        self.rng = ChaCha8Rng::seed_from_u64(self.training_config.seed);
        self.episode = 0;
        self.total_steps = 0;
        self.training_steps = 0;
        self.best_reward = None;
        self.metrics.clear();
        Ok(())
    }

    // ----- Persistence -----

    pub fn to_saved_model(&self) -> SavedModel {
        let start = self.metrics.len().saturating_sub(MOVING_AVERAGE_WINDOW);
        SavedModel {
            format_version: MODEL_FORMAT_VERSION,
            obs_version: OBS_VERSION,
            main_weights: self.main.get_weights(),
            target_weights: self.target.get_weights(),
            network_config: self.network_config.clone(),
            training_config: self.training_config.clone(),
            episode: self.episode,
            total_steps: self.total_steps,
            training_steps: self.training_steps,
            recent_metrics: self.metrics[start..].to_vec(),
        }
    }

    /// Serialize the agent to an opaque JSON blob.
    pub fn save(&self) -> Result<String> {
        serde_json::to_string(&self.to_saved_model())
            .map_err(|e| Error::load(format!("model serialization: {e}")))
    }

    /// Restore from a blob produced by `save`.
    ///
    /// Everything is validated before any state changes; on error the agent
    /// keeps its previous state.
    pub fn load(&mut self, blob: &str) -> Result<()> {
        let result = serde_json::from_str::<SavedModel>(blob)
            .map_err(|e| Error::load(format!("model json: {e}")))
            .and_then(|saved| self.restore(saved));
        if let Err(ref e) = result {
            warn!(error = %e, "model load rejected; keeping previous state");
        }
        result
    }

    pub fn restore(&mut self, saved: SavedModel) -> Result<()> {
        if saved.format_version != MODEL_FORMAT_VERSION {
            return Err(Error::load(format!(
                "unsupported model format {} (expected {MODEL_FORMAT_VERSION})",
                saved.format_version
            )));
        }
        if saved.obs_version != OBS_VERSION {
            return Err(Error::load(format!(
                "observation schema {} does not match {OBS_VERSION}",
                saved.obs_version
            )));
        }
        if saved.network_config.output_size != ACTION_COUNT {
            return Err(Error::load(format!(
                "network output size {} does not match {ACTION_COUNT} actions",
                saved.network_config.output_size
            )));
        }
        saved.training_config.validate()?;

        let main = NeuralNetwork::from_weights(saved.network_config.clone(), saved.main_weights)
            .map_err(|e| Error::load(format!("main network: {e}")))?;
        let target = NeuralNetwork::from_weights(
            target_config(&saved.network_config),
            saved.target_weights,
        )
        .map_err(|e| Error::load(format!("target network: {e}")))?;

        // Commit.
        let keep_buffer = saved.training_config.replay_capacity == self.replay.capacity()
            && saved.network_config.input_size == self.network_config.input_size;
        if !keep_buffer {
            self.replay = ReplayBuffer::new(saved.training_config.replay_capacity);
        }
        self.main = main;
        self.target = target;
        self.network_config = saved.network_config;
        self.training_config = saved.training_config;
        self.episode = saved.episode;
        self.total_steps = saved.total_steps;
        self.training_steps = saved.training_steps;
        self.best_reward = saved
            .recent_metrics
            .iter()
            .map(|m| m.total_reward)
            .reduce(f64::max);
        self.metrics = saved.recent_metrics;

        info!(
            episode = self.episode,
            total_steps = self.total_steps,
            "model loaded"
        );
        Ok(())
    }
}

/// Target network runs its own dropout stream.
fn target_config(config: &NetworkConfig) -> NetworkConfig {
    let mut cfg = config.clone();
    cfg.seed = config.seed.wrapping_add(1);
    cfg
}

/// Main network plus a deep-copied target.
fn build_networks(config: &NetworkConfig) -> Result<(NeuralNetwork, NeuralNetwork)> {
    if config.output_size != ACTION_COUNT {
        return Err(Error::DimensionMismatch {
            context: "network output size",
            expected: ACTION_COUNT,
            actual: config.output_size,
        });
    }
    let main = NeuralNetwork::new(config.clone())?;
    let target = NeuralNetwork::from_weights(target_config(config), main.get_weights())?;
    Ok((main, target))
}
