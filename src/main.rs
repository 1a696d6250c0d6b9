// src/main.rs
//
// Research-harness CLI for aerolearn.
//
// Constraints:
// - Config precedence: --config YAML, else --profile, else AEROLEARN_PROFILE
//   (default Standard); AEROLEARN_* env overrides apply on top; --seed last.
// - Optional scripted demonstration flights before training (--demos) feed
//   imitation updates blended into the DQN updates.
// - Print a concise run header and a run summary.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use tracing::info;

use aerolearn::config::{EngineConfig, TrainingProfile};
use aerolearn::logging;
use aerolearn::rl::reward::{calculate_reward, RewardContext};
use aerolearn::rl::{drone_state_to_vector, ImitationLearning, TerminationReason, OBS_VERSION};
use aerolearn::sim::{controls_for, scripted_pilot, PointMassSim, SimConfig};
use aerolearn::{SystemClock, TrainingEnvironment};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ProfileArg {
    Quick,
    Standard,
    Thorough,
}

#[derive(Debug, Parser)]
#[command(
    name = "aerolearn",
    about = "DQN + imitation training harness for a simulated drone",
    version
)]
struct Args {
    /// Number of training episodes to run.
    #[arg(long, default_value_t = 20)]
    episodes: u64,

    /// Training profile preset (ignored when --config is given).
    /// If omitted, uses AEROLEARN_PROFILE (default Standard).
    #[arg(long, value_enum)]
    profile: Option<ProfileArg>,

    /// YAML engine config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base seed for every component and the simulator.
    #[arg(long)]
    seed: Option<u64>,

    /// Scripted demonstration flights to record before training.
    #[arg(long, default_value_t = 0)]
    demos: u32,

    /// Load a saved model before training.
    #[arg(long)]
    load: Option<PathBuf>,

    /// Write the trained model here.
    #[arg(long)]
    save: Option<PathBuf>,

    /// Verbosity: -v, -vv
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn resolve_profile(cli: Option<ProfileArg>) -> TrainingProfile {
    if let Some(p) = cli {
        return match p {
            ProfileArg::Quick => TrainingProfile::Quick,
            ProfileArg::Standard => TrainingProfile::Standard,
            ProfileArg::Thorough => TrainingProfile::Thorough,
        };
    }
    std::env::var("AEROLEARN_PROFILE")
        .ok()
        .and_then(|s| TrainingProfile::parse(&s))
        .unwrap_or(TrainingProfile::Standard)
}

fn load_config(args: &Args, profile: TrainingProfile) -> Result<EngineConfig> {
    let mut cfg = match &args.config {
        Some(path) => EngineConfig::load_yaml(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::for_profile(profile),
    };
    cfg.apply_env_overrides();
    if let Some(seed) = args.seed {
        cfg.reseed(seed);
    }
    cfg.validate().context("validating config")?;
    Ok(cfg)
}

/// Fly the scripted pilot once and offer the flight as a demonstration.
fn record_demonstration(
    cfg: &EngineConfig,
    sim: &mut PointMassSim,
    imitation: &mut ImitationLearning,
) -> Result<()> {
    sim.reset();
    imitation.start_recording();

    let mut ctx = RewardContext::default();
    let mut total_reward = 0.0;
    let mut collisions = 0u32;
    let mut previous_distance = sim.telemetry().distance_to_target;

    for _ in 0..cfg.episode.max_steps {
        let telemetry = sim.telemetry().clone();
        let action = scripted_pilot(&telemetry);
        let state = drone_state_to_vector(&telemetry)?;
        imitation.record_step(&telemetry, &controls_for(action), &state)?;

        let breakdown = calculate_reward(
            &cfg.reward,
            &telemetry,
            action,
            sim.obstacles(),
            previous_distance,
            ctx,
        );
        total_reward += breakdown.total();
        ctx.mission_completed |= breakdown.mission_completed_now;
        ctx.was_dead = telemetry.is_dead;
        if breakdown.collision_now {
            collisions += 1;
        }
        previous_distance = telemetry.distance_to_target;

        if telemetry.is_dead || telemetry.mission_complete {
            break;
        }
        sim.step(action);
    }

    let success = sim.telemetry().mission_complete;
    let summary = imitation.stop_recording(success, total_reward, collisions);
    info!(
        success,
        frames = summary.frames,
        quality = summary.quality,
        accepted = summary.accepted,
        "demonstration flight"
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_tracing(args.verbose).context("installing tracing subscriber")?;

    let profile = resolve_profile(args.profile);
    let cfg = load_config(&args, profile)?;
    let base_seed = args.seed.unwrap_or(cfg.network.seed);

    let mut env = TrainingEnvironment::new(cfg.clone(), SystemClock)?;
    let mut imitation = ImitationLearning::new(cfg.imitation.clone(), Box::new(SystemClock));
    let mut sim = PointMassSim::new(SimConfig {
        seed: base_seed,
        ..SimConfig::default()
    });

    println!(
        "aerolearn | obs_v={} | profile={} | episodes={} | demos={} | params={} | seed={}",
        OBS_VERSION,
        if args.config.is_some() { "yaml" } else { profile.as_str() },
        args.episodes,
        args.demos,
        env.agent().main_network().parameter_count(),
        base_seed,
    );

    if let Some(path) = &args.load {
        let blob = fs::read_to_string(path)
            .with_context(|| format!("reading model {}", path.display()))?;
        env.load_model(&blob)
            .with_context(|| format!("loading model {}", path.display()))?;
    }

    for _ in 0..args.demos {
        record_demonstration(&cfg, &mut sim, &mut imitation)?;
    }

    let mut missions = 0u64;
    let mut reward_sum = 0.0;
    for _ in 0..args.episodes {
        sim.reset();
        loop {
            let outcome = env.step(sim.telemetry(), sim.obstacles())?;
            let damage = outcome.reward_damage;
            if damage.should_take_damage || damage.should_die {
                sim.apply_damage(damage.damage_amount, damage.should_die);
            }
            if outcome.loss.is_some() {
                env.agent_mut().train_imitation(&mut imitation)?;
            }
            if let Some(metrics) = &outcome.metrics {
                reward_sum += metrics.total_reward;
                if outcome.termination == Some(TerminationReason::MissionComplete) {
                    missions += 1;
                }
                break;
            }
            sim.step(outcome.action);
        }
    }

    let stats = env.agent().stats();
    let imitation_stats = imitation.stats();
    println!(
        "done | episodes={} | missions={} | mean_reward={:.2} | best_reward={:.2} | epsilon={:.4} | train_steps={} | demos={}",
        stats.episode,
        missions,
        if args.episodes > 0 { reward_sum / args.episodes as f64 } else { 0.0 },
        stats.best_reward.unwrap_or(0.0),
        stats.epsilon,
        stats.training_steps,
        imitation_stats.count,
    );

    if let Some(path) = &args.save {
        let blob = env.save_model()?;
        fs::write(path, blob).with_context(|| format!("writing model {}", path.display()))?;
        println!("saved model to {}", path.display());
    }
    Ok(())
}
