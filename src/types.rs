// src/types.rs
//
// Shared types exchanged with the physics/collision collaborator.
//
// The collaborator hands the engine one immutable DroneTelemetry snapshot per
// tick and receives a discrete FlightAction back. The engine never touches
// physics state directly.

use serde::{Deserialize, Serialize};

/// Millisecond timestamp.
pub type TimestampMs = u64;

/// Plain 3-vector in metres (or m/s, or radians for rotation).
/// `y` is altitude.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Length ignoring altitude.
    pub fn horizontal_length(&self) -> f64 {
        (self.x * self.x + self.z * self.z).sqrt()
    }

    pub fn sub(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn add(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn scale(&self, k: f64) -> Vec3 {
        Vec3::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn distance(&self, other: &Vec3) -> f64 {
        self.sub(other).length()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// What a ranged sensor ray hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SensorHit {
    #[default]
    None,
    Obstacle,
    Ground,
    Boundary,
}

/// Single ranged-sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Distance to the hit in metres (max range when nothing was hit).
    pub distance: f64,
    pub hit: SensorHit,
}

impl SensorReading {
    pub fn clear(max_range: f64) -> Self {
        Self {
            distance: max_range,
            hit: SensorHit::None,
        }
    }
}

/// Per-tick telemetry snapshot produced by the collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneTelemetry {
    // ----- Kinematics -----
    pub position: Vec3,
    pub velocity: Vec3,
    /// Euler angles in radians.
    pub rotation: Vec3,

    // ----- Status -----
    /// Throttle in [0, 1].
    pub throttle: f64,
    /// Battery percentage in [0, 100].
    pub battery: f64,
    /// Damage percentage in [0, 100]; 100 means destroyed.
    pub damage: f64,
    /// Engine power in [0, 1].
    pub engine_power: f64,

    // ----- Sensors -----
    /// Up to 16 ranged readings. Missing readings are treated as max range.
    pub sensors: Vec<SensorReading>,

    // ----- Flight flags -----
    pub is_flying: bool,
    pub is_landed: bool,
    pub is_dead: bool,

    // ----- Mission -----
    pub start_position: Vec3,
    pub target_position: Vec3,
    pub mission_active: bool,
    pub mission_complete: bool,
    pub distance_to_target: f64,
}

impl DroneTelemetry {
    pub fn speed(&self) -> f64 {
        self.velocity.length()
    }

    pub fn altitude(&self) -> f64 {
        self.position.y
    }
}

impl Default for DroneTelemetry {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            rotation: Vec3::ZERO,
            throttle: 0.0,
            battery: 100.0,
            damage: 0.0,
            engine_power: 1.0,
            sensors: Vec::new(),
            is_flying: false,
            is_landed: true,
            is_dead: false,
            start_position: Vec3::ZERO,
            target_position: Vec3::ZERO,
            mission_active: true,
            mission_complete: false,
            distance_to_target: 0.0,
        }
    }
}

/// Axis-aligned box obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    /// Box centre.
    pub position: Vec3,
    /// Full extents along each axis.
    pub size: Vec3,
}

impl Obstacle {
    pub fn new(position: Vec3, size: Vec3) -> Self {
        Self { position, size }
    }

    /// Euclidean distance from `point` to the nearest box surface (0 inside).
    pub fn surface_distance(&self, point: &Vec3) -> f64 {
        let dx = ((point.x - self.position.x).abs() - self.size.x / 2.0).max(0.0);
        let dy = ((point.y - self.position.y).abs() - self.size.y / 2.0).max(0.0);
        let dz = ((point.z - self.position.z).abs() - self.size.z / 2.0).max(0.0);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Manual-flight control state sampled from the pilot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlInputs {
    pub throttle_up: bool,
    pub throttle_down: bool,
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub rotate_left: bool,
    pub rotate_right: bool,
    pub hover: bool,
}
