// src/rl/replay.rs
//
// Experience replay.
//
// Fixed-capacity ring buffer: stores append until full, then overwrite the
// slot under a write cursor that advances modulo capacity. This is not LRU;
// slot order after wrap-around is e.g. [E4, E2, E3] for capacity 3.
//
// Sampling is recency biased: 30% of draws come from the newest 20% of the
// buffer so training tracks the current policy region.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::action::FlightAction;
use crate::types::TimestampMs;

/// Share of the buffer (from the end) treated as "recent".
const RECENT_WINDOW_START: f64 = 0.8;
/// Probability that a draw is taken from the recent window.
const RECENT_DRAW_PROB: f64 = 0.3;

/// One stored transition. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub state: Vec<f64>,
    pub action: FlightAction,
    pub reward: f64,
    pub next_state: Vec<f64>,
    pub done: bool,
    pub timestamp_ms: TimestampMs,
}

#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    buffer: Vec<Experience>,
    max_size: usize,
    cursor: usize,
}

impl ReplayBuffer {
    /// Create an empty buffer. A zero capacity is treated as 1.
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            buffer: Vec::with_capacity(max_size.min(4096)),
            max_size,
            cursor: 0,
        }
    }

    /// O(1) insert: append below capacity, else overwrite the oldest slot.
    pub fn store(&mut self, experience: Experience) {
        if self.buffer.len() < self.max_size {
            self.buffer.push(experience);
        } else {
            self.buffer[self.cursor] = experience;
        }
        self.cursor = (self.cursor + 1) % self.max_size;
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Slot that the next `store` writes to once the buffer is full.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn get(&self, slot: usize) -> Option<&Experience> {
        self.buffer.get(slot)
    }

    /// Iterate in slot order (not insertion order once wrapped).
    pub fn iter(&self) -> impl Iterator<Item = &Experience> {
        self.buffer.iter()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }

    /// Sample `n` distinct experiences.
    ///
    /// Returns the whole buffer when it holds fewer than `n` entries.
    pub fn sample_batch<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<&Experience> {
        let size = self.buffer.len();
        if size < n {
            return self.buffer.iter().collect();
        }

        let recent_threshold = (RECENT_WINDOW_START * size as f64).floor() as usize;
        let mut seen = HashSet::with_capacity(n);
        let mut indices = Vec::with_capacity(n);

        while indices.len() < n {
            let idx = if rng.gen::<f64>() < RECENT_DRAW_PROB {
                rng.gen_range(recent_threshold..size)
            } else {
                rng.gen_range(0..size)
            };
            if seen.insert(idx) {
                indices.push(idx);
            }
        }

        indices.into_iter().map(|i| &self.buffer[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn exp(tag: f64) -> Experience {
        Experience {
            state: vec![tag],
            action: FlightAction::Hover,
            reward: tag,
            next_state: vec![tag + 1.0],
            done: false,
            timestamp_ms: tag as u64,
        }
    }

    #[test]
    fn wraps_over_oldest_slot() {
        let mut buf = ReplayBuffer::new(3);
        for tag in 1..=4 {
            buf.store(exp(tag as f64));
        }
        let rewards: Vec<f64> = buf.iter().map(|e| e.reward).collect();
        assert_eq!(rewards, vec![4.0, 2.0, 3.0]);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.cursor(), 1);
    }

    #[test]
    fn small_buffer_returns_everything() {
        let mut buf = ReplayBuffer::new(10);
        buf.store(exp(1.0));
        buf.store(exp(2.0));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(buf.sample_batch(5, &mut rng).len(), 2);
    }

    #[test]
    fn samples_are_unique_and_deterministic() {
        let mut buf = ReplayBuffer::new(100);
        for tag in 0..50 {
            buf.store(exp(tag as f64));
        }

        let mut rng_a = ChaCha8Rng::seed_from_u64(77);
        let mut rng_b = ChaCha8Rng::seed_from_u64(77);
        let a: Vec<f64> = buf.sample_batch(20, &mut rng_a).iter().map(|e| e.reward).collect();
        let b: Vec<f64> = buf.sample_batch(20, &mut rng_b).iter().map(|e| e.reward).collect();
        assert_eq!(a, b, "same seed must give the same batch");

        let unique: HashSet<u64> = a.iter().map(|r| *r as u64).collect();
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn sampling_is_biased_toward_recent_slots() {
        let mut buf = ReplayBuffer::new(1000);
        for tag in 0..1000 {
            buf.store(exp(tag as f64));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut recent = 0usize;
        let mut total = 0usize;
        for _ in 0..200 {
            for e in buf.sample_batch(10, &mut rng) {
                total += 1;
                if e.reward >= 800.0 {
                    recent += 1;
                }
            }
        }
        // Expected share: 0.3 + 0.7 * 0.2 = 0.44 (vs 0.2 for uniform).
        let share = recent as f64 / total as f64;
        assert!(share > 0.35 && share < 0.53, "recent share {share}");
    }

    #[test]
    fn clear_resets_cursor() {
        let mut buf = ReplayBuffer::new(2);
        buf.store(exp(1.0));
        buf.store(exp(2.0));
        buf.store(exp(3.0));
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.cursor(), 0);
        buf.store(exp(9.0));
        assert_eq!(buf.get(0).map(|e| e.reward), Some(9.0));
    }
}
