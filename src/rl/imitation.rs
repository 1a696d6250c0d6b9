// src/rl/imitation.rs
//
// Learning from manual flight.
//
// While a pilot flies, record_step turns the dominant control into a discrete
// action and keeps (state, action) frames that differ enough from the last
// kept frame. stop_recording scores the whole batch; batches at or above the
// quality threshold are stamped with their score and merged into a capped,
// quality-sorted buffer. train_from_demonstrations supervises the shared
// network toward recorded actions through the same backward pass the DQN
// uses, with the one-hot target scaled by demonstration quality.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::action::FlightAction;
use super::network::NeuralNetwork;
use crate::clock::Clock;
use crate::config::ImitationConfig;
use crate::error::{ensure_finite, Error, Result};
use crate::types::{ControlInputs, DroneTelemetry, TimestampMs};

/// Reward at which the reward term saturates upward.
const REWARD_POSITIVE_REFERENCE: f64 = 1000.0;
/// Reward magnitude at which the reward term saturates downward.
const REWARD_NEGATIVE_REFERENCE: f64 = 500.0;
/// Flights shorter than this earn a time-efficiency bonus.
const TIME_BONUS_WINDOW_MS: u64 = 120_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
}

/// One recorded (state, action) frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemonstrationData {
    pub state: Vec<f64>,
    pub action: FlightAction,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: TimestampMs,
    /// Batch quality in [0, 1]; 0 while the batch is still recording.
    pub quality: f64,
}

/// Result of closing a recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub quality: f64,
    pub frames: usize,
    pub accepted: bool,
    pub duration_ms: u64,
}

/// Export/import payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemonstrationExport {
    pub demonstrations: Vec<DemonstrationData>,
    pub config: ImitationConfig,
    pub export_time: TimestampMs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImitationStats {
    pub count: usize,
    pub average_quality: f64,
    pub recording: bool,
    pub pending_frames: usize,
}

/// Map pilot controls to a single action.
///
/// Priority: throttle up, throttle down, forward, backward, left, right,
/// rotate left, rotate right, hover. None when nothing is pressed.
pub fn action_from_controls(controls: &ControlInputs) -> Option<FlightAction> {
    let ordered = [
        (controls.throttle_up, FlightAction::ThrottleUp),
        (controls.throttle_down, FlightAction::ThrottleDown),
        (controls.forward, FlightAction::MoveForward),
        (controls.backward, FlightAction::MoveBackward),
        (controls.left, FlightAction::MoveLeft),
        (controls.right, FlightAction::MoveRight),
        (controls.rotate_left, FlightAction::RotateLeft),
        (controls.rotate_right, FlightAction::RotateRight),
        (controls.hover, FlightAction::Hover),
    ];
    ordered
        .into_iter()
        .find_map(|(active, action)| active.then_some(action))
}

/// Post-hoc quality of a recorded flight, clamped to [0, 1].
pub fn quality_score(
    mission_success: bool,
    total_reward: f64,
    collisions: u32,
    duration_ms: u64,
) -> f64 {
    let mut q = 0.5;
    if mission_success {
        q += 0.4;
    }
    if total_reward > 0.0 {
        q += 0.3 * (total_reward / REWARD_POSITIVE_REFERENCE).min(1.0);
    } else if total_reward < 0.0 {
        q -= 0.3 * (total_reward.abs() / REWARD_NEGATIVE_REFERENCE).min(1.0);
    }
    q -= 0.1 * collisions as f64;
    if duration_ms < TIME_BONUS_WINDOW_MS {
        q += 0.2 * (1.0 - duration_ms as f64 / TIME_BONUS_WINDOW_MS as f64);
    }
    if q.is_nan() {
        return 0.0;
    }
    q.clamp(0.0, 1.0)
}

#[derive(Debug)]
pub struct ImitationLearning {
    config: ImitationConfig,
    recording: RecordingState,
    pending: Vec<DemonstrationData>,
    last_recorded: Option<Vec<f64>>,
    recording_start_ms: TimestampMs,
    /// Sorted by quality, best first.
    demonstrations: Vec<DemonstrationData>,
    rng: ChaCha8Rng,
    clock: Box<dyn Clock>,
}

impl ImitationLearning {
    pub fn new(config: ImitationConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            recording: RecordingState::Idle,
            pending: Vec::new(),
            last_recorded: None,
            recording_start_ms: 0,
            demonstrations: Vec::new(),
            clock,
        }
    }

    pub fn config(&self) -> &ImitationConfig {
        &self.config
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recording
    }

    pub fn is_recording(&self) -> bool {
        self.recording == RecordingState::Recording
    }

    pub fn demonstrations(&self) -> &[DemonstrationData] {
        &self.demonstrations
    }

    pub fn demonstration_count(&self) -> usize {
        self.demonstrations.len()
    }

    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    // ----- Recording -----

    /// Begin a new recording, discarding any unfinished one.
    pub fn start_recording(&mut self) {
        self.pending.clear();
        self.last_recorded = None;
        self.recording_start_ms = self.clock.now_ms();
        self.recording = RecordingState::Recording;
        debug!(start_ms = self.recording_start_ms, "demonstration recording started");
    }

    /// Record one manual-flight frame. Returns whether a frame was kept.
    ///
    /// Frames are skipped when idle, while the drone is dead, when no control
    /// is active, or when every component is within `dedup_threshold` of the
    /// last kept frame.
    pub fn record_step(
        &mut self,
        telemetry: &DroneTelemetry,
        controls: &ControlInputs,
        state_vector: &[f64],
    ) -> Result<bool> {
        if !self.is_recording() || telemetry.is_dead {
            return Ok(false);
        }
        let Some(action) = action_from_controls(controls) else {
            return Ok(false);
        };
        ensure_finite("demonstration state", state_vector)?;

        if let Some(last) = &self.last_recorded {
            if !differs(last, state_vector, self.config.dedup_threshold) {
                return Ok(false);
            }
        }

        self.pending.push(DemonstrationData {
            state: state_vector.to_vec(),
            action,
            timestamp_ms: self.clock.now_ms(),
            quality: 0.0,
        });
        self.last_recorded = Some(state_vector.to_vec());
        Ok(true)
    }

    /// Close the recording, score it, and keep it if good enough.
    pub fn stop_recording(
        &mut self,
        mission_success: bool,
        total_reward: f64,
        collisions: u32,
    ) -> RecordingSummary {
        let duration_ms = self.clock.now_ms().saturating_sub(self.recording_start_ms);
        let was_recording = self.is_recording();
        self.recording = RecordingState::Idle;
        self.last_recorded = None;

        let mut batch = std::mem::take(&mut self.pending);
        if !was_recording {
            warn!("stop_recording called while idle");
            return RecordingSummary {
                quality: 0.0,
                frames: 0,
                accepted: false,
                duration_ms: 0,
            };
        }

        let quality = quality_score(mission_success, total_reward, collisions, duration_ms);
        let frames = batch.len();
        let accepted = quality >= self.config.quality_threshold;
        if accepted {
            for frame in &mut batch {
                frame.quality = quality;
            }
            self.merge(batch);
            info!(
                frames,
                quality,
                buffer = self.demonstrations.len(),
                "demonstration batch accepted"
            );
        } else {
            info!(
                frames,
                quality,
                threshold = self.config.quality_threshold,
                "demonstration batch discarded"
            );
        }

        RecordingSummary {
            quality,
            frames,
            accepted,
            duration_ms,
        }
    }

    /// Append, drop the oldest excess by timestamp, re-sort by quality.
    fn merge(&mut self, frames: Vec<DemonstrationData>) {
        self.demonstrations.extend(frames);
        let cap = self.config.max_demonstrations;
        if self.demonstrations.len() > cap {
            let excess = self.demonstrations.len() - cap;
            self.demonstrations.sort_by_key(|d| d.timestamp_ms);
            self.demonstrations.drain(..excess);
        }
        self.demonstrations
            .sort_by(|a, b| b.quality.total_cmp(&a.quality));
    }

    // ----- Training -----

    /// Supervise `network` on `batch_size` sampled demonstrations.
    ///
    /// Draws come from the top `top_fraction` of the buffer with probability
    /// `top_bias`, else from the whole buffer. Returns the mean loss (0 when
    /// there is nothing to train on).
    pub fn train_from_demonstrations(
        &mut self,
        network: &mut NeuralNetwork,
        batch_size: usize,
    ) -> Result<f64> {
        let len = self.demonstrations.len();
        if len == 0 || batch_size == 0 {
            return Ok(0.0);
        }
        let top_len = ((len as f64 * self.config.top_fraction).ceil() as usize).clamp(1, len);

        let mut total_loss = 0.0;
        for _ in 0..batch_size {
            let idx = if self.rng.gen::<f64>() < self.config.top_bias {
                self.rng.gen_range(0..top_len)
            } else {
                self.rng.gen_range(0..len)
            };
            let demo = &self.demonstrations[idx];
            network.forward(&demo.state)?;
            total_loss += network.backward(&demo.action.one_hot(demo.quality))?;
        }
        let loss = total_loss / batch_size as f64;
        debug!(batch_size, loss, "imitation train step");
        Ok(loss)
    }

    // ----- Persistence -----

    pub fn export_demonstrations(&self) -> Result<String> {
        let export = DemonstrationExport {
            demonstrations: self.demonstrations.clone(),
            config: self.config.clone(),
            export_time: self.clock.now_ms(),
        };
        serde_json::to_string(&export)
            .map_err(|e| Error::load(format!("demonstration serialization: {e}")))
    }

    /// Merge an exported set into the buffer. Returns the number imported.
    ///
    /// The whole payload is validated first; on error the buffer is unchanged.
    /// The exported config is informational and not adopted.
    pub fn import_demonstrations(&mut self, payload: &str) -> Result<usize> {
        let export: DemonstrationExport = serde_json::from_str(payload)
            .map_err(|e| Error::load(format!("demonstration json: {e}")))?;

        let expected_len = export.demonstrations.first().map(|d| d.state.len());
        for (i, demo) in export.demonstrations.iter().enumerate() {
            if demo.state.is_empty() || Some(demo.state.len()) != expected_len {
                return Err(Error::load(format!(
                    "demonstration {i}: inconsistent state length {}",
                    demo.state.len()
                )));
            }
            if demo.state.iter().any(|v| !v.is_finite()) {
                return Err(Error::load(format!("demonstration {i}: non-finite state")));
            }
            if !(0.0..=1.0).contains(&demo.quality) {
                return Err(Error::load(format!(
                    "demonstration {i}: quality {} outside [0, 1]",
                    demo.quality
                )));
            }
        }
        if let (Some(existing), Some(incoming)) =
            (self.demonstrations.first().map(|d| d.state.len()), expected_len)
        {
            if existing != incoming {
                return Err(Error::load(format!(
                    "imported state length {incoming} does not match buffer ({existing})"
                )));
            }
        }

        let count = export.demonstrations.len();
        self.merge(export.demonstrations);
        info!(count, buffer = self.demonstrations.len(), "demonstrations imported");
        Ok(count)
    }

    pub fn clear_demonstrations(&mut self) {
        self.demonstrations.clear();
    }

    pub fn stats(&self) -> ImitationStats {
        let count = self.demonstrations.len();
        let average_quality = if count == 0 {
            0.0
        } else {
            self.demonstrations.iter().map(|d| d.quality).sum::<f64>() / count as f64
        };
        ImitationStats {
            count,
            average_quality,
            recording: self.is_recording(),
            pending_frames: self.pending.len(),
        }
    }

    /// Back to a fresh session: idle, empty buffers, RNG reseeded.
    pub fn reset(&mut self) {
        self.recording = RecordingState::Idle;
        self.pending.clear();
        self.last_recorded = None;
        self.recording_start_ms = 0;
        self.demonstrations.clear();
        self.rng = ChaCha8Rng::seed_from_u64(self.config.seed);
    }
}

/// Any component moved by more than `threshold`, or the lengths differ.
fn differs(a: &[f64], b: &[f64], threshold: f64) -> bool {
    a.len() != b.len() || a.iter().zip(b).any(|(x, y)| (x - y).abs() > threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn learner(clock: &ManualClock) -> ImitationLearning {
        ImitationLearning::new(ImitationConfig::default(), Box::new(clock.clone()))
    }

    fn forward_controls() -> ControlInputs {
        ControlInputs {
            forward: true,
            ..ControlInputs::default()
        }
    }

    #[test]
    fn control_priority_first_match_wins() {
        let c = ControlInputs {
            right: true,
            backward: true,
            hover: true,
            ..ControlInputs::default()
        };
        assert_eq!(action_from_controls(&c), Some(FlightAction::MoveBackward));
        let c = ControlInputs {
            throttle_down: true,
            throttle_up: true,
            ..ControlInputs::default()
        };
        assert_eq!(action_from_controls(&c), Some(FlightAction::ThrottleUp));
        assert_eq!(action_from_controls(&ControlInputs::default()), None);
    }

    #[test]
    fn quality_of_successful_minute_flight() {
        let q = quality_score(true, 800.0, 0, 60_000);
        assert!(q >= 0.9, "quality {q}");
        assert_eq!(q, 1.0);
    }

    #[test]
    fn quality_penalises_crashes_and_losses() {
        // 0.5 - 0.3 - 0.2 + 0 (no time bonus)
        let q = quality_score(false, -600.0, 2, 150_000);
        assert!(q.abs() < 1e-12, "quality {q}");
        // 0.5 + 0.3 * 0.5 + 0.2 * 0.5
        let q = quality_score(false, 500.0, 0, 60_000);
        assert!((q - 0.75).abs() < 1e-12);
    }

    #[test]
    fn near_static_frames_are_deduplicated() {
        let clock = ManualClock::new(0);
        let mut il = learner(&clock);
        let t = DroneTelemetry::default();
        il.start_recording();

        assert!(il.record_step(&t, &forward_controls(), &[0.5, 0.5]).unwrap());
        assert!(!il.record_step(&t, &forward_controls(), &[0.505, 0.495]).unwrap());
        assert!(il.record_step(&t, &forward_controls(), &[0.52, 0.5]).unwrap());
        assert!(!il.record_step(&t, &ControlInputs::default(), &[0.9, 0.9]).unwrap());
        assert_eq!(il.pending_frames(), 2);
    }

    #[test]
    fn dead_or_idle_frames_are_ignored() {
        let clock = ManualClock::new(0);
        let mut il = learner(&clock);
        let t = DroneTelemetry::default();
        assert!(!il.record_step(&t, &forward_controls(), &[0.1]).unwrap());

        il.start_recording();
        let dead = DroneTelemetry {
            is_dead: true,
            ..DroneTelemetry::default()
        };
        assert!(!il.record_step(&dead, &forward_controls(), &[0.1]).unwrap());
        assert_eq!(il.pending_frames(), 0);
    }

    #[test]
    fn low_quality_batch_is_discarded() {
        let clock = ManualClock::new(0);
        let mut il = learner(&clock);
        il.start_recording();
        il.record_step(&DroneTelemetry::default(), &forward_controls(), &[0.1])
            .unwrap();
        clock.advance_ms(200_000);
        let summary = il.stop_recording(false, -1000.0, 3);
        assert!(!summary.accepted);
        assert_eq!(summary.frames, 1);
        assert_eq!(il.demonstration_count(), 0);
        assert!(!il.is_recording());
    }

    #[test]
    fn merge_caps_oldest_and_sorts_by_quality() {
        let clock = ManualClock::new(0);
        let mut il = ImitationLearning::new(
            ImitationConfig {
                max_demonstrations: 3,
                quality_threshold: 0.0,
                ..ImitationConfig::default()
            },
            Box::new(clock.clone()),
        );
        let t = DroneTelemetry::default();

        // Two frames at t=0,1 with poor quality.
        il.start_recording();
        il.record_step(&t, &forward_controls(), &[0.0]).unwrap();
        clock.advance_ms(1);
        il.record_step(&t, &forward_controls(), &[1.0]).unwrap();
        clock.advance_ms(200_000);
        let low = il.stop_recording(false, 0.0, 0).quality;

        // Two frames later with high quality; the oldest frame must go.
        il.start_recording();
        il.record_step(&t, &forward_controls(), &[2.0]).unwrap();
        clock.advance_ms(1);
        il.record_step(&t, &forward_controls(), &[3.0]).unwrap();
        let high = il.stop_recording(true, 1000.0, 0).quality;
        assert!(high > low);

        let states: Vec<f64> = il.demonstrations().iter().map(|d| d.state[0]).collect();
        assert_eq!(states, vec![2.0, 3.0, 1.0]);
        assert_eq!(il.demonstrations()[2].quality, low);
    }

    #[test]
    fn stats_and_reset() {
        let clock = ManualClock::new(0);
        let mut il = learner(&clock);
        il.start_recording();
        il.record_step(&DroneTelemetry::default(), &forward_controls(), &[0.3])
            .unwrap();
        let stats = il.stats();
        assert!(stats.recording);
        assert_eq!(stats.pending_frames, 1);
        il.stop_recording(true, 500.0, 0);
        assert_eq!(il.stats().count, 1);
        il.reset();
        assert_eq!(il.stats().count, 0);
        assert_eq!(il.recording_state(), RecordingState::Idle);
    }
}
