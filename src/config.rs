// src/config.rs
//
// Central configuration for the learning engine.
//
// One EngineConfig carries every tunable: network topology, DQN training
// schedule, reward shaping coefficients, episode limits and imitation
// learning. Presets (TrainingProfile) tweak a handful of values on top of the
// defaults; YAML files and AEROLEARN_* environment variables can override
// individual fields for research runs.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::rl::action::ACTION_COUNT;
use crate::rl::observation::STATE_SIZE;

/// Feedforward network topology and optimiser settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Length of the state vector fed to the first layer.
    pub input_size: usize,
    /// Widths of the hidden (ReLU) layers, in order.
    pub hidden_layers: Vec<usize>,
    /// Number of discrete actions (softmax outputs).
    pub output_size: usize,
    pub learning_rate: f64,
    /// Per-activation dropout probability in hidden layers.
    /// Applied on every forward pass; set to 0 for deterministic inference.
    pub dropout_rate: f64,
    /// Ceiling for the global gradient L2 norm.
    pub gradient_clip: f64,
    /// Seed for He initialisation, dropout and exploration draws.
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_size: STATE_SIZE,
            hidden_layers: vec![128, 64],
            output_size: ACTION_COUNT,
            learning_rate: 0.001,
            dropout_rate: 0.1,
            gradient_clip: 1.0,
            seed: 42,
        }
    }
}

impl NetworkConfig {
    /// Topology and optimiser checks. Any input width is accepted; the
    /// output layer must cover every action.
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.hidden_layers.iter().any(|&w| w == 0) {
            return Err(Error::load("network layers must be non-empty"));
        }
        if self.output_size != ACTION_COUNT {
            return Err(Error::load(format!(
                "network output_size {} does not match {ACTION_COUNT} actions",
                self.output_size
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(Error::load("dropout_rate must be in [0, 1)"));
        }
        if self.learning_rate <= 0.0 || self.gradient_clip <= 0.0 {
            return Err(Error::load(
                "learning_rate and gradient_clip must be positive",
            ));
        }
        Ok(())
    }

    /// Layer sizes from input to output, e.g. `[40, 128, 64, 9]`.
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.hidden_layers.len() + 2);
        sizes.push(self.input_size);
        sizes.extend_from_slice(&self.hidden_layers);
        sizes.push(self.output_size);
        sizes
    }
}

/// DQN schedule: discounting, exploration decay, replay and target sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Discount factor for Bellman targets.
    pub gamma: f64,
    pub epsilon_start: f64,
    pub epsilon_min: f64,
    /// Multiplicative decay applied once per episode.
    pub epsilon_decay: f64,
    pub batch_size: usize,
    pub replay_capacity: usize,
    /// Hard-copy main weights into the target network every N training steps.
    pub target_update_frequency: u64,
    /// Run `train()` every N environment ticks.
    pub train_frequency: u64,
    /// Seed for replay sampling.
    pub seed: u64,
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.replay_capacity == 0 || self.batch_size == 0 {
            return Err(Error::load("replay_capacity and batch_size must be positive"));
        }
        if self.batch_size > self.replay_capacity {
            return Err(Error::load("batch_size exceeds replay_capacity"));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(Error::load("gamma must be in [0, 1]"));
        }
        if self.epsilon_min > self.epsilon_start {
            return Err(Error::load("epsilon_min exceeds epsilon_start"));
        }
        if self.target_update_frequency == 0 || self.train_frequency == 0 {
            return Err(Error::load("update frequencies must be positive"));
        }
        Ok(())
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            epsilon_start: 1.0,
            epsilon_min: 0.01,
            epsilon_decay: 0.995,
            batch_size: 32,
            replay_capacity: 50_000,
            target_update_frequency: 100,
            train_frequency: 4,
            seed: 7,
        }
    }
}

/// Reward shaping coefficients.
///
/// Distances in metres, speeds in m/s. Penalties are stored as negative
/// numbers and added as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    // ----- Per-tick -----
    pub time_step_penalty: f64,

    // ----- Progress toward target -----
    /// Reward per metre of closing distance.
    pub progress_weight: f64,
    /// Reward per metre of opening distance (negative).
    pub away_weight: f64,

    // ----- Proximity tiers (highest satisfied tier applies) -----
    pub proximity_bonus_50: f64,
    pub proximity_bonus_20: f64,
    pub proximity_bonus_10: f64,
    pub proximity_bonus_5: f64,

    // ----- Mission / landing -----
    pub mission_complete_bonus: f64,
    pub mission_complete_radius: f64,
    pub landing_approach_bonus: f64,
    pub landing_zone_radius: f64,
    pub landing_altitude: f64,
    pub landing_speed: f64,

    // ----- Failure -----
    pub collision_penalty: f64,
    pub out_of_bounds_penalty: f64,
    /// Horizontal half-extent of the world (|x| and |z|).
    pub world_limit: f64,
    pub altitude_limit: f64,

    // ----- Stability -----
    pub stable_flight_bonus: f64,
    pub stable_speed_threshold: f64,

    // ----- Altitude shaping -----
    /// Below this target distance the very-near regime applies.
    pub very_near_distance: f64,
    /// Below this target distance (and above very-near) the near regime applies.
    pub near_distance: f64,
    pub very_near_low_altitude: f64,
    pub very_near_high_altitude: f64,
    pub very_near_low_bonus: f64,
    pub very_near_high_penalty: f64,
    pub near_band_min: f64,
    pub near_band_max: f64,
    pub near_band_bonus: f64,
    pub cruise_band_min: f64,
    pub cruise_band_max: f64,
    pub cruise_band_bonus: f64,
    pub cruise_low_penalty: f64,
    pub cruise_high_penalty: f64,
    pub cruise_danger_altitude: f64,
    pub cruise_danger_penalty: f64,

    // ----- Obstacle proximity bands -----
    pub obstacle_penalty_2: f64,
    pub obstacle_penalty_4: f64,
    pub obstacle_penalty_6: f64,
    pub obstacle_penalty_10: f64,

    // ----- Reward-coupled damage -----
    /// Cumulative episode reward at which a damage increment is applied (negative).
    pub reward_damage_threshold: f64,
    pub reward_damage_amount: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            time_step_penalty: -0.1,

            progress_weight: 10.0,
            away_weight: -15.0,

            proximity_bonus_50: 0.5,
            proximity_bonus_20: 1.0,
            proximity_bonus_10: 2.0,
            proximity_bonus_5: 5.0,

            mission_complete_bonus: 1000.0,
            mission_complete_radius: 3.0,
            landing_approach_bonus: 2.0,
            landing_zone_radius: 10.0,
            landing_altitude: 5.0,
            landing_speed: 2.0,

            collision_penalty: -500.0,
            out_of_bounds_penalty: -100.0,
            world_limit: 200.0,
            altitude_limit: 100.0,

            stable_flight_bonus: 0.1,
            stable_speed_threshold: 5.0,

            very_near_distance: 10.0,
            near_distance: 30.0,
            very_near_low_altitude: 5.0,
            very_near_high_altitude: 15.0,
            very_near_low_bonus: 1.0,
            very_near_high_penalty: -1.0,
            near_band_min: 5.0,
            near_band_max: 25.0,
            near_band_bonus: 0.5,
            cruise_band_min: 10.0,
            cruise_band_max: 30.0,
            cruise_band_bonus: 0.3,
            cruise_low_penalty: -0.5,
            cruise_high_penalty: -0.5,
            cruise_danger_altitude: 3.0,
            cruise_danger_penalty: -2.0,

            obstacle_penalty_2: -10.0,
            obstacle_penalty_4: -5.0,
            obstacle_penalty_6: -2.0,
            obstacle_penalty_10: -0.5,

            reward_damage_threshold: -200.0,
            reward_damage_amount: 20.0,
        }
    }
}

/// Episode termination limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    pub max_steps: u64,
    /// Wall-clock episode limit in milliseconds.
    pub max_duration_ms: u64,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            max_steps: 2000,
            max_duration_ms: 120_000,
        }
    }
}

/// Demonstration recording and supervised imitation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImitationConfig {
    /// Capacity of the merged demonstration buffer.
    pub max_demonstrations: usize,
    /// Minimum batch quality for a recording to be kept.
    pub quality_threshold: f64,
    /// Per-component change needed before a new frame is recorded.
    pub dedup_threshold: f64,
    /// Share of the (quality-sorted) buffer treated as "top" demonstrations.
    pub top_fraction: f64,
    /// Probability of drawing from the top share.
    pub top_bias: f64,
    /// Imitation batch size relative to the RL batch when training is blended.
    pub imitation_weight: f64,
    pub seed: u64,
}

impl Default for ImitationConfig {
    fn default() -> Self {
        Self {
            max_demonstrations: 10_000,
            quality_threshold: 0.6,
            dedup_threshold: 0.01,
            top_fraction: 0.5,
            top_bias: 0.7,
            imitation_weight: 0.3,
            seed: 11,
        }
    }
}

/// Coarse training preset used by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingProfile {
    Quick,
    Standard,
    Thorough,
}

impl TrainingProfile {
    /// Stable lowercase name (used in logs).
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingProfile::Quick => "quick",
            TrainingProfile::Standard => "standard",
            TrainingProfile::Thorough => "thorough",
        }
    }

    /// Parse a profile name (case-insensitive). Returns None if unrecognized.
    pub fn parse(s: &str) -> Option<TrainingProfile> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" | "q" | "fast" => Some(TrainingProfile::Quick),
            "standard" | "std" | "s" | "default" => Some(TrainingProfile::Standard),
            "thorough" | "t" | "deep" => Some(TrainingProfile::Thorough),
            _ => None,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub network: NetworkConfig,
    pub training: TrainingConfig,
    pub reward: RewardConfig,
    pub episode: EpisodeConfig,
    pub imitation: ImitationConfig,
}

impl EngineConfig {
    pub fn for_profile(profile: TrainingProfile) -> Self {
        let mut cfg = EngineConfig::default();
        match profile {
            TrainingProfile::Standard => {}
            TrainingProfile::Quick => {
                cfg.network.hidden_layers = vec![64, 32];
                cfg.network.learning_rate = 0.002;
                cfg.training.replay_capacity = 10_000;
                cfg.training.epsilon_decay = 0.99;
                cfg.training.target_update_frequency = 50;
                cfg.episode.max_steps = 1000;
            }
            TrainingProfile::Thorough => {
                cfg.network.hidden_layers = vec![256, 128];
                cfg.network.learning_rate = 0.0005;
                cfg.training.replay_capacity = 100_000;
                cfg.training.epsilon_decay = 0.998;
                cfg.training.target_update_frequency = 200;
            }
        }
        cfg
    }

    /// Parse a YAML document. Missing fields fall back to defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: EngineConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::load(format!("config yaml: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::load(format!("config file '{}': {e}", path.display())))?;
        Self::from_yaml_str(&raw)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::load(format!("config yaml: {e}")))
    }

    /// Apply AEROLEARN_* environment overrides.
    ///
    ///   - AEROLEARN_LEARNING_RATE   (f64)
    ///   - AEROLEARN_GAMMA           (f64)
    ///   - AEROLEARN_EPSILON_DECAY   (f64)
    ///   - AEROLEARN_BATCH_SIZE      (usize)
    ///   - AEROLEARN_MAX_STEPS       (u64)
    ///   - AEROLEARN_SEED            (u64, reseeds every component)
    ///
    /// Any variable that fails to parse is ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// arbitrary variable source.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override::<f64, _>(&lookup, "AEROLEARN_LEARNING_RATE") {
            self.network.learning_rate = v;
        }
        if let Some(v) = parse_override::<f64, _>(&lookup, "AEROLEARN_GAMMA") {
            self.training.gamma = v.clamp(0.0, 1.0);
        }
        if let Some(v) = parse_override::<f64, _>(&lookup, "AEROLEARN_EPSILON_DECAY") {
            self.training.epsilon_decay = v;
        }
        if let Some(v) = parse_override::<usize, _>(&lookup, "AEROLEARN_BATCH_SIZE") {
            self.training.batch_size = v.max(1);
        }
        if let Some(v) = parse_override::<u64, _>(&lookup, "AEROLEARN_MAX_STEPS") {
            self.episode.max_steps = v;
        }
        if let Some(seed) = parse_override::<u64, _>(&lookup, "AEROLEARN_SEED") {
            self.reseed(seed);
        }
    }

    /// Derive every component seed from one base seed.
    pub fn reseed(&mut self, seed: u64) {
        self.network.seed = seed;
        self.training.seed = seed.wrapping_add(1);
        self.imitation.seed = seed.wrapping_add(2);
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        if self.network.input_size != STATE_SIZE {
            return Err(Error::load(format!(
                "network input_size {} does not match the {STATE_SIZE}-feature observation",
                self.network.input_size
            )));
        }
        self.training.validate()?;

        let r = &self.reward;
        if r.away_weight > 0.0 {
            return Err(Error::load("away_weight must be non-positive"));
        }
        if r.reward_damage_threshold >= 0.0 {
            return Err(Error::load("reward_damage_threshold must be negative"));
        }

        let i = &self.imitation;
        if !(0.0..=1.0).contains(&i.quality_threshold)
            || !(0.0..=1.0).contains(&i.top_bias)
            || !(0.0..=1.0).contains(&i.top_fraction)
        {
            return Err(Error::load(
                "imitation quality_threshold, top_bias and top_fraction must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

fn parse_override<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(v) => {
            info!(target: "aerolearn::config", "{name} = {v} (overrode default)");
            Some(v)
        }
        Err(_) => {
            warn!(target: "aerolearn::config", "could not parse {name} = {raw:?}; keeping default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.network.layer_sizes(), vec![40, 128, 64, 9]);
    }

    #[test]
    fn profiles_parse_case_insensitively() {
        assert_eq!(TrainingProfile::parse("QUICK"), Some(TrainingProfile::Quick));
        assert_eq!(TrainingProfile::parse(" std "), Some(TrainingProfile::Standard));
        assert_eq!(TrainingProfile::parse("deep"), Some(TrainingProfile::Thorough));
        assert_eq!(TrainingProfile::parse("nope"), None);
        for p in [
            TrainingProfile::Quick,
            TrainingProfile::Standard,
            TrainingProfile::Thorough,
        ] {
            assert_eq!(TrainingProfile::parse(p.as_str()), Some(p));
            EngineConfig::for_profile(p).validate().unwrap();
        }
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            ("AEROLEARN_LEARNING_RATE", "0.01"),
            ("AEROLEARN_BATCH_SIZE", "not-a-number"),
            ("AEROLEARN_SEED", "100"),
        ]
        .into_iter()
        .collect();

        let mut cfg = EngineConfig::default();
        cfg.apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.network.learning_rate, 0.01);
        assert_eq!(cfg.training.batch_size, 32, "bad value keeps default");
        assert_eq!(cfg.network.seed, 100);
        assert_eq!(cfg.training.seed, 101);
        assert_eq!(cfg.imitation.seed, 102);
    }

    #[test]
    fn yaml_partial_document_fills_defaults() {
        let yaml = r#"
network:
  hidden_layers: [16]
training:
  batch_size: 8
"#;
        let cfg = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.network.hidden_layers, vec![16]);
        assert_eq!(cfg.network.input_size, 40);
        assert_eq!(cfg.training.batch_size, 8);
        assert_eq!(cfg.reward, RewardConfig::default());
    }

    #[test]
    fn observation_and_action_widths_are_enforced() {
        let mut cfg = EngineConfig::default();
        cfg.network.input_size = 10;
        let err = cfg.validate().unwrap_err();
        assert!(
            matches!(err, Error::LoadError { .. }),
            "input width must equal the observation length, got {err:?}"
        );

        let mut cfg = EngineConfig::default();
        cfg.network.output_size = 4;
        assert!(matches!(cfg.validate(), Err(Error::LoadError { .. })));

        let err = EngineConfig::from_yaml_str("network:\n  input_size: 10\n").unwrap_err();
        assert!(matches!(err, Error::LoadError { .. }));
    }

    #[test]
    fn training_config_rejects_zero_schedule_fields() {
        TrainingConfig::default().validate().unwrap();
        for cfg in [
            TrainingConfig { target_update_frequency: 0, ..TrainingConfig::default() },
            TrainingConfig { batch_size: 0, ..TrainingConfig::default() },
            TrainingConfig { replay_capacity: 0, ..TrainingConfig::default() },
            TrainingConfig { train_frequency: 0, ..TrainingConfig::default() },
        ] {
            assert!(matches!(cfg.validate(), Err(Error::LoadError { .. })), "{cfg:?}");
        }
    }

    #[test]
    fn yaml_invalid_values_are_rejected() {
        let err = EngineConfig::from_yaml_str("training:\n  gamma: 1.5\n").unwrap_err();
        assert!(matches!(err, Error::LoadError { .. }));
        let err = EngineConfig::from_yaml_str("network: [not, a, map]").unwrap_err();
        assert!(matches!(err, Error::LoadError { .. }));
    }
}
