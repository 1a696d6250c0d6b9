// src/rl/mod.rs
//
// Learning engine for autonomous flight.
//
// Key components:
// - FlightAction: discrete action space (network output slots)
// - NeuralNetwork: feedforward MLP with manual backprop
// - ReplayBuffer: ring buffer with recency-biased sampling
// - DqnAgent: DQN with target network, epsilon schedule, save/load
// - Observation: versioned 40-feature state encoding
// - Reward: shaped per-tick reward and reward-coupled damage
// - TrainingEnvironment: per-tick loop and episode state machine
// - ImitationLearning: demonstration recording and supervised imitation

pub mod action;
pub mod agent;
pub mod environment;
pub mod imitation;
pub mod network;
pub mod observation;
pub mod replay;
pub mod reward;

// Re-exports for convenience
pub use action::{FlightAction, ACTION_COUNT};
pub use agent::{
    AgentStats, BlendedLoss, DqnAgent, EpisodeReport, SavedModel, TrainingMetrics,
    MODEL_FORMAT_VERSION,
};
pub use environment::{
    EpisodePhase, StepOutcome, TerminationReason, TrainingEnvironment, TrainingState,
};
pub use imitation::{
    action_from_controls, quality_score, DemonstrationData, DemonstrationExport,
    ImitationLearning, ImitationStats, RecordingState, RecordingSummary,
};
pub use network::{ActionSelection, LayerWeights, NetworkWeights, NeuralNetwork};
pub use observation::{drone_state_to_vector, OBS_VERSION, STATE_SIZE};
pub use replay::{Experience, ReplayBuffer};
pub use reward::{
    calculate_reward, check_reward_based_damage, RewardBreakdown, RewardContext, RewardDamage,
};
