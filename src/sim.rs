// src/sim.rs
//
// Toy point-mass drone used by the harness and the integration tests.
//
// This is not a flight model. It exists so the training loop can run end to
// end: actions nudge throttle, heading and velocity, position integrates at a
// fixed dt, and telemetry comes back in the shape the engine expects.
//
// Collisions use one authoritative check after movement each tick, so a tick
// can apply collision damage at most once.

use std::f64::consts::{PI, TAU};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::rl::action::FlightAction;
use crate::rl::observation::{SENSOR_COUNT, SENSOR_RANGE};
use crate::types::{ControlInputs, DroneTelemetry, Obstacle, SensorHit, SensorReading, Vec3};

/// Integration step in seconds.
pub const DT_S: f64 = 0.1;

const HOVER_THROTTLE: f64 = 0.5;
const LIFT_GAIN: f64 = 20.0;
const THROTTLE_STEP: f64 = 0.05;
const MOVE_ACCEL: f64 = 6.0;
const YAW_STEP: f64 = 0.15;
const HORIZONTAL_DRAG: f64 = 0.97;
const VERTICAL_DRAG: f64 = 0.98;
const CRASH_SPEED: f64 = 6.0;
const HARD_LANDING_DAMAGE: f64 = 50.0;
const BATTERY_DRAIN: f64 = 0.02;
const MISSION_RADIUS: f64 = 3.0;

/// Scenario layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub seed: u64,
    /// Horizontal target distance range from the start pad.
    pub target_distance: (f64, f64),
    pub obstacle_count: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            target_distance: (40.0, 80.0),
            obstacle_count: 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PointMassSim {
    config: SimConfig,
    rng: ChaCha8Rng,
    telemetry: DroneTelemetry,
    obstacles: Vec<Obstacle>,
}

impl PointMassSim {
    pub fn new(config: SimConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut sim = Self {
            config,
            rng,
            telemetry: DroneTelemetry::default(),
            obstacles: Vec::new(),
        };
        sim.reset();
        sim
    }

    pub fn telemetry(&self) -> &DroneTelemetry {
        &self.telemetry
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    /// New scenario: drone landed at the origin, fresh target and obstacles.
    pub fn reset(&mut self) -> &DroneTelemetry {
        let (lo, hi) = self.config.target_distance;
        let radius = self.rng.gen_range(lo..=hi);
        let bearing = self.rng.gen_range(0.0..TAU);
        let target = Vec3::new(radius * bearing.sin(), 0.0, radius * bearing.cos());

        self.obstacles.clear();
        for _ in 0..self.config.obstacle_count * 20 {
            if self.obstacles.len() == self.config.obstacle_count {
                break;
            }
            let along = self.rng.gen_range(0.25..0.75);
            let offset = self.rng.gen_range(-15.0..15.0);
            let centre = Vec3::new(
                target.x * along + offset * bearing.cos(),
                0.0,
                target.z * along - offset * bearing.sin(),
            );
            let size = Vec3::new(
                self.rng.gen_range(2.0..6.0),
                self.rng.gen_range(8.0..30.0),
                self.rng.gen_range(2.0..6.0),
            );
            // Boxes sit on the ground.
            let obstacle = Obstacle::new(Vec3::new(centre.x, size.y / 2.0, centre.z), size);
            if obstacle.surface_distance(&Vec3::ZERO) > 5.0
                && obstacle.surface_distance(&target) > 5.0
            {
                self.obstacles.push(obstacle);
            }
        }

        self.telemetry = DroneTelemetry {
            target_position: target,
            distance_to_target: target.length(),
            ..DroneTelemetry::default()
        };
        self.telemetry.sensors = self.scan();
        &self.telemetry
    }

    /// Advance one tick under `action`.
    pub fn step(&mut self, action: FlightAction) -> &DroneTelemetry {
        if self.telemetry.is_dead {
            return &self.telemetry;
        }
        let t = &mut self.telemetry;
        let yaw = t.rotation.y;
        let forward = Vec3::new(yaw.sin(), 0.0, yaw.cos());
        let right = Vec3::new(yaw.cos(), 0.0, -yaw.sin());
        let push = MOVE_ACCEL * DT_S;

        match action {
            FlightAction::ThrottleUp => t.throttle = (t.throttle + THROTTLE_STEP).min(1.0),
            FlightAction::ThrottleDown => t.throttle = (t.throttle - THROTTLE_STEP).max(0.0),
            FlightAction::MoveForward => t.velocity = t.velocity.add(&forward.scale(push)),
            FlightAction::MoveBackward => t.velocity = t.velocity.sub(&forward.scale(push)),
            FlightAction::MoveRight => t.velocity = t.velocity.add(&right.scale(push)),
            FlightAction::MoveLeft => t.velocity = t.velocity.sub(&right.scale(push)),
            FlightAction::RotateLeft => t.rotation.y = wrap_angle(yaw - YAW_STEP),
            FlightAction::RotateRight => t.rotation.y = wrap_angle(yaw + YAW_STEP),
            FlightAction::Hover => {
                t.throttle = HOVER_THROTTLE;
                t.velocity = t.velocity.scale(0.8);
            }
        }

        // Horizontal moves only work off the ground.
        if t.is_landed {
            t.velocity.x = 0.0;
            t.velocity.z = 0.0;
        }

        let lift = t.throttle * t.engine_power;
        t.velocity.y = (t.velocity.y + (lift - HOVER_THROTTLE) * LIFT_GAIN * DT_S) * VERTICAL_DRAG;
        t.velocity.x *= HORIZONTAL_DRAG;
        t.velocity.z *= HORIZONTAL_DRAG;
        t.position = t.position.add(&t.velocity.scale(DT_S));

        t.battery = (t.battery - BATTERY_DRAIN * t.throttle).max(0.0);
        if t.battery == 0.0 {
            t.engine_power = 0.0;
        }

        if t.position.y <= 0.0 {
            let impact = -t.velocity.y;
            t.position.y = 0.0;
            t.velocity = Vec3::ZERO;
            t.is_landed = true;
            t.is_flying = false;
            if impact > CRASH_SPEED {
                t.damage += HARD_LANDING_DAMAGE;
            }
        } else {
            t.is_landed = false;
            t.is_flying = true;
        }

        if self
            .obstacles
            .iter()
            .any(|o| o.surface_distance(&t.position) == 0.0)
        {
            t.damage = 100.0;
        }
        if t.damage >= 100.0 {
            t.damage = 100.0;
            t.is_dead = true;
            t.is_flying = false;
        }

        t.distance_to_target = t.position.distance(&t.target_position);
        t.mission_complete = t.is_landed && !t.is_dead && t.distance_to_target <= MISSION_RADIUS;
        t.mission_active = !t.mission_complete && !t.is_dead;

        self.telemetry.sensors = self.scan();
        &self.telemetry
    }

    /// Apply damage reported by the engine (reward-coupled health).
    pub fn apply_damage(&mut self, amount: f64, kill: bool) {
        let t = &mut self.telemetry;
        t.damage = (t.damage + amount).min(100.0);
        if kill || t.damage >= 100.0 {
            t.is_dead = true;
            t.is_flying = false;
            t.mission_active = false;
        }
    }

    /// Sixteen horizontal rays starting at the heading, capped at sensor range.
    fn scan(&self) -> Vec<SensorReading> {
        let origin = self.telemetry.position;
        let yaw = self.telemetry.rotation.y;
        (0..SENSOR_COUNT)
            .map(|k| {
                let angle = yaw + TAU * k as f64 / SENSOR_COUNT as f64;
                let dir = Vec3::new(angle.sin(), 0.0, angle.cos());
                self.obstacles
                    .iter()
                    .filter_map(|o| ray_box_distance(&origin, &dir, o))
                    .filter(|d| *d <= SENSOR_RANGE)
                    .reduce(f64::min)
                    .map(|distance| SensorReading {
                        distance,
                        hit: SensorHit::Obstacle,
                    })
                    .unwrap_or_else(|| SensorReading::clear(SENSOR_RANGE))
            })
            .collect()
    }
}

/// Control inputs a pilot would hold to produce `action`.
pub fn controls_for(action: FlightAction) -> ControlInputs {
    let mut c = ControlInputs::default();
    match action {
        FlightAction::ThrottleUp => c.throttle_up = true,
        FlightAction::ThrottleDown => c.throttle_down = true,
        FlightAction::MoveLeft => c.left = true,
        FlightAction::MoveRight => c.right = true,
        FlightAction::MoveForward => c.forward = true,
        FlightAction::MoveBackward => c.backward = true,
        FlightAction::RotateLeft => c.rotate_left = true,
        FlightAction::RotateRight => c.rotate_right = true,
        FlightAction::Hover => c.hover = true,
    }
    c
}

/// Scripted pilot: climb to cruise, turn toward the target, fly, descend.
pub fn scripted_pilot(t: &DroneTelemetry) -> FlightAction {
    let to_target = t.target_position.sub(&t.position);
    let horizontal = to_target.horizontal_length();
    let altitude = t.altitude();

    if horizontal > MISSION_RADIUS {
        if altitude < 12.0 {
            return if t.velocity.y < 2.0 {
                FlightAction::ThrottleUp
            } else {
                FlightAction::Hover
            };
        }
        if t.velocity.y > 0.5 {
            return FlightAction::ThrottleDown;
        }
        let bearing = to_target.x.atan2(to_target.z);
        let error = wrap_angle(bearing - t.rotation.y);
        if error > YAW_STEP {
            return FlightAction::RotateRight;
        }
        if error < -YAW_STEP {
            return FlightAction::RotateLeft;
        }
        return if t.velocity.horizontal_length() < 6.0 {
            FlightAction::MoveForward
        } else {
            FlightAction::Hover
        };
    }

    if t.velocity.horizontal_length() > 1.0 {
        return FlightAction::MoveBackward;
    }
    if t.velocity.y < -3.0 {
        FlightAction::ThrottleUp
    } else {
        FlightAction::ThrottleDown
    }
}

/// Distance along `dir` from `origin` to the box, if the ray hits it (slab test).
pub fn ray_box_distance(origin: &Vec3, dir: &Vec3, obstacle: &Obstacle) -> Option<f64> {
    let half = obstacle.size.scale(0.5);
    let min = obstacle.position.sub(&half);
    let max = obstacle.position.add(&half);
    let mut t_min = f64::NEG_INFINITY;
    let mut t_max = f64::INFINITY;

    for (o, d, lo, hi) in [
        (origin.x, dir.x, min.x, max.x),
        (origin.y, dir.y, min.y, max.y),
        (origin.z, dir.z, min.z, max.z),
    ] {
        if d.abs() < 1e-12 {
            if o < lo || o > hi {
                return None;
            }
            continue;
        }
        let t1 = (lo - o) / d;
        let t2 = (hi - o) / d;
        t_min = t_min.max(t1.min(t2));
        t_max = t_max.min(t1.max(t2));
    }

    if t_max < t_min.max(0.0) {
        return None;
    }
    Some(t_min.max(0.0))
}

fn wrap_angle(a: f64) -> f64 {
    let mut a = a % TAU;
    if a > PI {
        a -= TAU;
    } else if a < -PI {
        a += TAU;
    }
    a
}
