// src/rl/observation.rs
//
// Versioned state-vector encoding for network input.
//
// The layout below is part of the model format: a saved network is only
// portable if every feature lands in the same slot with the same scaling.
// Increment OBS_VERSION whenever a slot or a scale changes.
//
// Layout (40 features):
//   0..3    position / POSITION_SCALE
//   3..6    tanh(velocity / VELOCITY_SCALE)
//   6..9    rotation / PI
//   9..13   throttle, battery/100, damage/100, engine_power
//   13..29  16 sensor distances, min(d, SENSOR_RANGE) / SENSOR_RANGE
//   29..32  mean, min, max of the normalised sensors
//   32..34  is_flying, is_landed
//   34..37  target position / POSITION_SCALE
//   37      min(distance_to_target / TARGET_DISTANCE_SCALE, 1)
//   38..40  horizontal unit direction to target (x, z)

use std::f64::consts::PI;

use crate::error::{ensure_finite, Result};
use crate::types::DroneTelemetry;

/// Current observation schema version.
pub const OBS_VERSION: u32 = 1;

/// Length of the encoded state vector.
pub const STATE_SIZE: usize = 40;

/// Number of ranged sensors encoded (missing ones are padded).
pub const SENSOR_COUNT: usize = 16;

/// Sensor range cap in metres.
pub const SENSOR_RANGE: f64 = 50.0;

pub const POSITION_SCALE: f64 = 100.0;
pub const VELOCITY_SCALE: f64 = 10.0;
pub const TARGET_DISTANCE_SCALE: f64 = 200.0;

/// Slot offsets, for consumers that inspect individual features.
pub mod slots {
    pub const POSITION: usize = 0;
    pub const VELOCITY: usize = 3;
    pub const ROTATION: usize = 6;
    pub const STATUS: usize = 9;
    pub const SENSORS: usize = 13;
    pub const SENSOR_AGGREGATES: usize = 29;
    pub const FLIGHT_FLAGS: usize = 32;
    pub const TARGET_POSITION: usize = 34;
    pub const TARGET_DISTANCE: usize = 37;
    pub const TARGET_DIRECTION: usize = 38;
}

/// Encode a telemetry snapshot into the fixed 40-feature state vector.
///
/// Deterministic. Rejects telemetry that encodes to NaN or infinity.
pub fn drone_state_to_vector(telemetry: &DroneTelemetry) -> Result<Vec<f64>> {
    let mut v = Vec::with_capacity(STATE_SIZE);

    // Kinematics
    let p = &telemetry.position;
    v.extend([p.x, p.y, p.z].map(|c| c / POSITION_SCALE));
    let vel = &telemetry.velocity;
    v.extend([vel.x, vel.y, vel.z].map(|c| (c / VELOCITY_SCALE).tanh()));
    let r = &telemetry.rotation;
    v.extend([r.x, r.y, r.z].map(|c| c / PI));

    // Status
    v.push(telemetry.throttle);
    v.push(telemetry.battery / 100.0);
    v.push(telemetry.damage / 100.0);
    v.push(telemetry.engine_power);

    // Sensors, padded to SENSOR_COUNT with max range
    let sensors = normalized_sensors(telemetry);
    v.extend_from_slice(&sensors);

    let mean = sensors.iter().sum::<f64>() / SENSOR_COUNT as f64;
    let min = sensors.iter().copied().fold(f64::INFINITY, f64::min);
    let max = sensors.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    v.extend([mean, min, max]);

    // Flight status
    v.push(flag(telemetry.is_flying));
    v.push(flag(telemetry.is_landed));

    // Mission
    let t = &telemetry.target_position;
    v.extend([t.x, t.y, t.z].map(|c| c / POSITION_SCALE));
    v.push((telemetry.distance_to_target / TARGET_DISTANCE_SCALE).min(1.0));

    let dx = t.x - p.x;
    let dz = t.z - p.z;
    let horizontal = (dx * dx + dz * dz).sqrt();
    if horizontal > 1e-6 {
        v.extend([dx / horizontal, dz / horizontal]);
    } else {
        v.extend([0.0, 0.0]);
    }

    debug_assert_eq!(v.len(), STATE_SIZE);
    ensure_finite("state vector", &v)?;
    Ok(v)
}

/// The 16 sensor readings normalised to [0, 1] against SENSOR_RANGE.
///
/// Missing readings count as max range. Extra readings beyond 16 are ignored.
pub fn normalized_sensors(telemetry: &DroneTelemetry) -> [f64; SENSOR_COUNT] {
    let mut out = [1.0; SENSOR_COUNT];
    for (slot, reading) in out.iter_mut().zip(&telemetry.sensors) {
        *slot = reading.distance.clamp(0.0, SENSOR_RANGE) / SENSOR_RANGE;
    }
    out
}

#[inline]
fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}
