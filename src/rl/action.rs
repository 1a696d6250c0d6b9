// src/rl/action.rs
//
// Discrete action space emitted by the engine.
//
// The collaborator maps each ActionId to its own control signals; the engine
// never manipulates physics state. Indices are part of the model format (they
// are the network's output slots) and must not be reordered.

use serde::{Deserialize, Serialize};

/// Number of discrete actions (network output width).
pub const ACTION_COUNT: usize = 9;

/// Discrete flight command. Serialized as its ActionId (0-8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FlightAction {
    ThrottleUp = 0,
    ThrottleDown = 1,
    MoveLeft = 2,
    MoveRight = 3,
    MoveForward = 4,
    MoveBackward = 5,
    RotateLeft = 6,
    RotateRight = 7,
    Hover = 8,
}

impl FlightAction {
    /// All actions in output-slot order.
    pub const ALL: [FlightAction; ACTION_COUNT] = [
        FlightAction::ThrottleUp,
        FlightAction::ThrottleDown,
        FlightAction::MoveLeft,
        FlightAction::MoveRight,
        FlightAction::MoveForward,
        FlightAction::MoveBackward,
        FlightAction::RotateLeft,
        FlightAction::RotateRight,
        FlightAction::Hover,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Stable lowercase name (used in logs).
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightAction::ThrottleUp => "throttle_up",
            FlightAction::ThrottleDown => "throttle_down",
            FlightAction::MoveLeft => "move_left",
            FlightAction::MoveRight => "move_right",
            FlightAction::MoveForward => "move_forward",
            FlightAction::MoveBackward => "move_backward",
            FlightAction::RotateLeft => "rotate_left",
            FlightAction::RotateRight => "rotate_right",
            FlightAction::Hover => "hover",
        }
    }

    /// One-hot vector over the action space scaled by `weight`.
    pub fn one_hot(self, weight: f64) -> Vec<f64> {
        let mut v = vec![0.0; ACTION_COUNT];
        v[self.index()] = weight;
        v
    }
}

impl From<FlightAction> for u8 {
    fn from(action: FlightAction) -> u8 {
        action as u8
    }
}

impl TryFrom<u8> for FlightAction {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        FlightAction::from_index(id as usize)
            .ok_or_else(|| format!("action id {id} outside 0..{ACTION_COUNT}"))
    }
}
