// src/rl/reward.rs
//
// Shaped reward for one tick, plus reward-coupled damage.
//
// The reward is an additive composition of independent terms. No term is
// clamped, so the total is unbounded in both directions. Each term is kept in
// RewardBreakdown for logging and for reconstructing the scalar.
//
// calculate_reward is a pure function of its inputs: the edge-triggered terms
// (mission bonus, collision penalty) read the episode flags from RewardContext
// and report whether they fired; the environment applies the transition.

use serde::{Deserialize, Serialize};

use super::action::FlightAction;
use crate::config::RewardConfig;
use crate::types::{DroneTelemetry, Obstacle};

/// Episode flags that gate the one-time reward terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewardContext {
    /// Mission bonus already paid this episode.
    pub mission_completed: bool,
    /// Drone was already dead on the previous tick.
    pub was_dead: bool,
}

/// Per-term reward for a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    /// Action that produced this telemetry. On the first tick of an episode
    /// nothing has been flown yet, so this is the action just selected.
    pub action: FlightAction,
    pub distance: f64,
    pub previous_distance: f64,
    /// Nearest obstacle surface distance, if any obstacles were given.
    pub nearest_obstacle: Option<f64>,

    // ----- Terms -----
    pub time_penalty: f64,
    pub progress: f64,
    pub proximity: f64,
    pub mission_complete: f64,
    pub landing_approach: f64,
    pub collision: f64,
    pub out_of_bounds: f64,
    pub stable_flight: f64,
    pub altitude: f64,
    pub obstacle_proximity: f64,

    // ----- Edges fired this tick -----
    pub mission_completed_now: bool,
    pub collision_now: bool,
}

impl RewardBreakdown {
    pub fn total(&self) -> f64 {
        self.time_penalty
            + self.progress
            + self.proximity
            + self.mission_complete
            + self.landing_approach
            + self.collision
            + self.out_of_bounds
            + self.stable_flight
            + self.altitude
            + self.obstacle_proximity
    }
}

/// Compute the shaped reward for one tick.
///
/// `previous_distance` is the distance to target on the previous tick.
pub fn calculate_reward(
    config: &RewardConfig,
    telemetry: &DroneTelemetry,
    action: FlightAction,
    obstacles: &[Obstacle],
    previous_distance: f64,
    ctx: RewardContext,
) -> RewardBreakdown {
    let distance = telemetry.distance_to_target;
    let altitude = telemetry.altitude();
    let speed = telemetry.speed();
    let alive = !telemetry.is_dead;
    let airborne = telemetry.is_flying && alive;

    // Progress: closing and opening are mutually exclusive.
    let progress = if distance < previous_distance {
        config.progress_weight * (previous_distance - distance)
    } else if distance > previous_distance {
        config.away_weight * (distance - previous_distance)
    } else {
        0.0
    };

    let proximity = if distance <= 5.0 {
        config.proximity_bonus_5
    } else if distance <= 10.0 {
        config.proximity_bonus_10
    } else if distance <= 20.0 {
        config.proximity_bonus_20
    } else if distance <= 50.0 {
        config.proximity_bonus_50
    } else {
        0.0
    };

    let mission_completed_now = distance <= config.mission_complete_radius
        && telemetry.is_landed
        && !ctx.mission_completed;
    let mission_complete = if mission_completed_now {
        config.mission_complete_bonus
    } else {
        0.0
    };

    let horizontal_to_target = telemetry
        .target_position
        .sub(&telemetry.position)
        .horizontal_length();
    let landing_approach = if airborne
        && horizontal_to_target <= config.landing_zone_radius
        && altitude <= config.landing_altitude
        && speed <= config.landing_speed
    {
        config.landing_approach_bonus
    } else {
        0.0
    };

    let collision_now = telemetry.is_dead && !ctx.was_dead;
    let collision = if collision_now {
        config.collision_penalty
    } else {
        0.0
    };

    let p = &telemetry.position;
    let out_of_bounds = if p.x.abs() > config.world_limit
        || p.z.abs() > config.world_limit
        || p.y > config.altitude_limit
    {
        config.out_of_bounds_penalty
    } else {
        0.0
    };

    let stable_flight = if airborne && speed < config.stable_speed_threshold {
        config.stable_flight_bonus
    } else {
        0.0
    };

    let altitude_term = if alive {
        altitude_shaping(config, distance, altitude)
    } else {
        0.0
    };

    let nearest_obstacle = obstacles
        .iter()
        .map(|o| o.surface_distance(&telemetry.position))
        .reduce(f64::min);
    let obstacle_proximity = match nearest_obstacle {
        Some(d) if d < 2.0 => config.obstacle_penalty_2,
        Some(d) if d < 4.0 => config.obstacle_penalty_4,
        Some(d) if d < 6.0 => config.obstacle_penalty_6,
        Some(d) if d < 10.0 => config.obstacle_penalty_10,
        _ => 0.0,
    };

    RewardBreakdown {
        action,
        distance,
        previous_distance,
        nearest_obstacle,
        time_penalty: config.time_step_penalty,
        progress,
        proximity,
        mission_complete,
        landing_approach,
        collision,
        out_of_bounds,
        stable_flight,
        altitude: altitude_term,
        obstacle_proximity,
        mission_completed_now,
        collision_now,
    }
}

/// Three distance regimes: very near (land), near (descend), cruise (hold band).
fn altitude_shaping(config: &RewardConfig, distance: f64, altitude: f64) -> f64 {
    if distance < config.very_near_distance {
        if altitude < config.very_near_low_altitude {
            config.very_near_low_bonus
        } else if altitude > config.very_near_high_altitude {
            config.very_near_high_penalty
        } else {
            0.0
        }
    } else if distance < config.near_distance {
        if (config.near_band_min..=config.near_band_max).contains(&altitude) {
            config.near_band_bonus
        } else {
            0.0
        }
    } else {
        let mut r = 0.0;
        if (config.cruise_band_min..=config.cruise_band_max).contains(&altitude) {
            r += config.cruise_band_bonus;
        } else if altitude < config.cruise_band_min {
            r += config.cruise_low_penalty;
            if altitude < config.cruise_danger_altitude {
                r += config.cruise_danger_penalty;
            }
        } else {
            r += config.cruise_high_penalty;
        }
        r
    }
}

/// Outcome of the reward-coupled health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardDamage {
    pub should_take_damage: bool,
    /// Damage to apply (0 unless `should_take_damage`).
    pub damage_amount: f64,
    /// Cumulative reward is at or below twice the threshold.
    pub should_die: bool,
}

/// Check whether cumulative episode reward crossed the damage threshold.
///
/// Damage is edge-triggered: it fires when the cumulative reward moves from
/// above a multiple of the (negative) threshold to at or below it, so falling
/// from -150 to -210 fires once, and falling on to -410 fires again. Death is
/// level-triggered at `2 * threshold`.
pub fn check_reward_based_damage(
    config: &RewardConfig,
    previous_cumulative: f64,
    cumulative: f64,
) -> RewardDamage {
    let threshold = config.reward_damage_threshold;
    let should_take_damage =
        damage_band(threshold, cumulative) > damage_band(threshold, previous_cumulative);
    RewardDamage {
        should_take_damage,
        damage_amount: if should_take_damage {
            config.reward_damage_amount
        } else {
            0.0
        },
        should_die: cumulative <= 2.0 * threshold,
    }
}

/// How many whole thresholds the cumulative reward has fallen through.
fn damage_band(threshold: f64, cumulative: f64) -> i64 {
    if threshold >= 0.0 || cumulative > threshold {
        return 0;
    }
    (cumulative / threshold).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vec3;

    fn cruising(distance: f64) -> DroneTelemetry {
        DroneTelemetry {
            position: Vec3::new(0.0, 20.0, 0.0),
            velocity: Vec3::new(1.0, 0.0, 0.0),
            is_flying: true,
            is_landed: false,
            target_position: Vec3::new(distance, 0.0, 0.0),
            distance_to_target: distance,
            ..DroneTelemetry::default()
        }
    }

    fn reward(
        t: &DroneTelemetry,
        prev: f64,
        obstacles: &[Obstacle],
        ctx: RewardContext,
    ) -> RewardBreakdown {
        calculate_reward(
            &RewardConfig::default(),
            t,
            FlightAction::MoveForward,
            obstacles,
            prev,
            ctx,
        )
    }

    #[test]
    fn closing_distance_earns_progress_and_tier() {
        let r = reward(&cruising(40.0), 45.0, &[], RewardContext::default());
        assert!((r.progress - 50.0).abs() < 1e-9);
        assert_eq!(r.proximity, 0.5, "inside 50 m but not 20 m");
        assert_eq!(r.mission_complete, 0.0);
    }

    #[test]
    fn opening_distance_is_penalised_only() {
        let r = reward(&cruising(42.0), 40.0, &[], RewardContext::default());
        assert!((r.progress - (-30.0)).abs() < 1e-9);
        let still = reward(&cruising(40.0), 40.0, &[], RewardContext::default());
        assert_eq!(still.progress, 0.0);
    }

    #[test]
    fn proximity_tiers_grow_as_distance_shrinks() {
        let tiers: Vec<f64> = [60.0, 45.0, 15.0, 8.0, 4.0]
            .iter()
            .map(|d| reward(&cruising(*d), *d, &[], RewardContext::default()).proximity)
            .collect();
        assert_eq!(tiers, vec![0.0, 0.5, 1.0, 2.0, 5.0]);
    }

    #[test]
    fn mission_bonus_is_one_time() {
        let mut t = cruising(2.0);
        t.position.y = 0.0;
        t.is_flying = false;
        t.is_landed = true;
        let first = reward(&t, 2.5, &[], RewardContext::default());
        assert!(first.mission_completed_now);
        assert_eq!(first.mission_complete, 1000.0);

        let again = reward(
            &t,
            2.0,
            &[],
            RewardContext {
                mission_completed: true,
                was_dead: false,
            },
        );
        assert!(!again.mission_completed_now);
        assert_eq!(again.mission_complete, 0.0);
    }

    #[test]
    fn collision_penalty_fires_on_death_edge_only() {
        let mut t = cruising(80.0);
        t.is_dead = true;
        let edge = reward(&t, 80.0, &[], RewardContext::default());
        assert!(edge.collision_now);
        assert_eq!(edge.collision, -500.0);

        let after = reward(
            &t,
            80.0,
            &[],
            RewardContext {
                mission_completed: false,
                was_dead: true,
            },
        );
        assert_eq!(after.collision, 0.0);
        assert_eq!(after.stable_flight, 0.0, "dead drones are not stable");
    }

    #[test]
    fn landing_approach_needs_low_slow_and_close() {
        let mut t = cruising(4.0);
        t.position.y = 3.0;
        t.velocity = Vec3::new(0.5, -0.5, 0.0);
        let r = reward(&t, 4.0, &[], RewardContext::default());
        assert_eq!(r.landing_approach, 2.0);

        t.velocity = Vec3::new(4.0, 0.0, 0.0);
        let fast = reward(&t, 4.0, &[], RewardContext::default());
        assert_eq!(fast.landing_approach, 0.0);
    }

    #[test]
    fn out_of_bounds_horizontal_and_vertical() {
        let mut t = cruising(300.0);
        t.position.x = 250.0;
        let r = reward(&t, 300.0, &[], RewardContext::default());
        assert_eq!(r.out_of_bounds, -100.0);
        let mut high = cruising(80.0);
        high.position.y = 120.0;
        let r = reward(&high, 80.0, &[], RewardContext::default());
        assert_eq!(r.out_of_bounds, -100.0);
    }

    #[test]
    fn altitude_regimes() {
        let cfg = RewardConfig::default();
        // very near
        assert_eq!(altitude_shaping(&cfg, 5.0, 2.0), 1.0);
        assert_eq!(altitude_shaping(&cfg, 5.0, 20.0), -1.0);
        assert_eq!(altitude_shaping(&cfg, 5.0, 10.0), 0.0);
        // near
        assert_eq!(altitude_shaping(&cfg, 20.0, 15.0), 0.5);
        assert_eq!(altitude_shaping(&cfg, 20.0, 40.0), 0.0);
        // cruise
        assert_eq!(altitude_shaping(&cfg, 80.0, 20.0), 0.3);
        assert_eq!(altitude_shaping(&cfg, 80.0, 6.0), -0.5);
        assert_eq!(altitude_shaping(&cfg, 80.0, 1.0), -2.5);
        assert_eq!(altitude_shaping(&cfg, 80.0, 60.0), -0.5);
    }

    #[test]
    fn obstacle_bands_use_nearest_surface() {
        let t = cruising(80.0);
        let near = Obstacle::new(Vec3::new(3.0, 20.0, 0.0), Vec3::new(2.0, 2.0, 2.0)); // 2 m
        let far = Obstacle::new(Vec3::new(0.0, 20.0, 30.0), Vec3::new(2.0, 2.0, 2.0));
        let r = reward(&t, 80.0, &[far, near], RewardContext::default());
        assert_eq!(r.nearest_obstacle, Some(2.0));
        assert_eq!(r.obstacle_proximity, -5.0);

        let r = reward(&t, 80.0, &[far], RewardContext::default());
        assert_eq!(r.obstacle_proximity, 0.0);
        let r = reward(&t, 80.0, &[], RewardContext::default());
        assert_eq!(r.nearest_obstacle, None);
    }

    #[test]
    fn total_sums_every_term() {
        let r = reward(&cruising(40.0), 45.0, &[], RewardContext::default());
        let expected = -0.1 + 50.0 + 0.5 + 0.1 + 0.3;
        assert!((r.total() - expected).abs() < 1e-9, "total {}", r.total());
    }

    #[test]
    fn reward_damage_edges() {
        let cfg = RewardConfig::default();
        let first = check_reward_based_damage(&cfg, -150.0, -210.0);
        assert!(first.should_take_damage);
        assert_eq!(first.damage_amount, 20.0);
        assert!(!first.should_die);

        let steady = check_reward_based_damage(&cfg, -210.0, -230.0);
        assert!(!steady.should_take_damage, "no repeat inside the same band");

        let deep = check_reward_based_damage(&cfg, -150.0, -410.0);
        assert!(deep.should_take_damage);
        assert!(deep.should_die);

        let second = check_reward_based_damage(&cfg, -210.0, -410.0);
        assert!(second.should_take_damage);
        assert!(second.should_die);

        let healthy = check_reward_based_damage(&cfg, 10.0, -50.0);
        assert_eq!(healthy, RewardDamage::default());
    }
}
