//! Aerolearn core library.
//!
//! A reinforcement-learning engine for a simulated autonomous drone. The
//! engine consumes per-tick telemetry from an external physics collaborator
//! and emits discrete flight actions; it never touches physics state. The
//! binary (`src/main.rs`) is a thin research harness around these components
//! driving the toy simulator in `sim`.
//!
//! # Components
//!
//! - **NeuralNetwork** (`rl::network`): feedforward MLP (ReLU, dropout,
//!   softmax output) trained by manual backprop with global-norm clipping.
//! - **DqnAgent** (`rl::agent`): DQN with experience replay, a hard-synced
//!   target network, an epsilon schedule, metrics and save/load.
//! - **TrainingEnvironment** (`rl::environment`): state encoding, shaped
//!   reward, reward-coupled damage and the episode state machine.
//! - **ImitationLearning** (`rl::imitation`): demonstration recording,
//!   quality scoring and supervised imitation through the shared network.
//!
//! # Determinism
//!
//! Every stochastic component owns a seeded `ChaCha8Rng`, and every timed
//! component reads an injected `Clock`. Same config, same seeds and the same
//! telemetry stream reproduce the same actions and weights.

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod rl;
pub mod sim;
pub mod types;

// --- Re-exports for ergonomic external use ---------------------------------

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    EngineConfig, EpisodeConfig, ImitationConfig, NetworkConfig, RewardConfig, TrainingConfig,
    TrainingProfile,
};
pub use error::{Error, Result};
pub use rl::{
    DqnAgent, Experience, FlightAction, ImitationLearning, NeuralNetwork, ReplayBuffer,
    TrainingEnvironment,
};
pub use types::{ControlInputs, DroneTelemetry, Obstacle, SensorHit, SensorReading, TimestampMs, Vec3};
