// src/rl/network.rs
//
// Feedforward policy/Q network with manual backpropagation.
//
// Topology: fully connected layers, ReLU + dropout on hidden layers, softmax
// output. Weights are owned exclusively by the network; every export is a
// structural deep copy (NetworkWeights: Clone) so main and target networks
// never alias.
//
// Determinism: He initialisation, dropout masks and exploration draws all come
// from a ChaCha8 stream seeded by NetworkConfig::seed.

use std::f64::consts::PI;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::action::FlightAction;
use crate::config::NetworkConfig;
use crate::error::{ensure_finite, ensure_len, Error, Result};

/// Temperature used to soften the output distribution when exploring.
pub const EXPLORATION_TEMPERATURE: f64 = 2.0;

/// One fully connected layer: `weights[out][in]` plus `biases[out]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerWeights {
    pub weights: Vec<Vec<f64>>,
    pub biases: Vec<f64>,
}

impl LayerWeights {
    pub fn inputs(&self) -> usize {
        self.weights.first().map(|row| row.len()).unwrap_or(0)
    }

    pub fn outputs(&self) -> usize {
        self.biases.len()
    }
}

/// Ordered layer weights, input layer first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkWeights {
    pub layers: Vec<LayerWeights>,
}

impl NetworkWeights {
    /// Check that the layers chain consecutively and match `config`'s topology.
    pub fn validate_shape(&self, config: &NetworkConfig) -> Result<()> {
        let sizes = config.layer_sizes();
        if self.layers.len() + 1 != sizes.len() {
            return Err(Error::invalid_weights(format!(
                "expected {} layers, got {}",
                sizes.len() - 1,
                self.layers.len()
            )));
        }

        for (l, layer) in self.layers.iter().enumerate() {
            let (fan_in, fan_out) = (sizes[l], sizes[l + 1]);
            if layer.weights.len() != fan_out || layer.biases.len() != fan_out {
                return Err(Error::invalid_weights(format!(
                    "layer {l}: expected {fan_out} outputs, got {} rows / {} biases",
                    layer.weights.len(),
                    layer.biases.len()
                )));
            }
            if let Some((row, r)) = layer
                .weights
                .iter()
                .enumerate()
                .find(|(_, r)| r.len() != fan_in)
            {
                return Err(Error::invalid_weights(format!(
                    "layer {l} row {row}: expected {fan_in} inputs, got {}",
                    r.len()
                )));
            }
            let finite = layer.biases.iter().all(|v| v.is_finite())
                && layer.weights.iter().flatten().all(|v| v.is_finite());
            if !finite {
                return Err(Error::invalid_weights(format!(
                    "layer {l} contains non-finite values"
                )));
            }
        }
        Ok(())
    }

    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.outputs() * l.inputs() + l.outputs())
            .sum()
    }
}

/// Result of epsilon-greedy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSelection {
    pub action: FlightAction,
    /// True when the action came from the exploration branch.
    pub explored: bool,
}

/// Intermediate values from the last forward pass, consumed by `backward`.
#[derive(Debug, Clone)]
struct ForwardCache {
    /// `activations[0]` is the input; `activations[l + 1]` is layer l's output.
    activations: Vec<Vec<f64>>,
    /// Pre-activation sums per layer.
    pre_activations: Vec<Vec<f64>>,
    /// Dropout scale per hidden unit (0 when dropped, 1/keep otherwise).
    masks: Vec<Vec<f64>>,
}

/// Feedforward network with ReLU hidden layers and a softmax head.
#[derive(Debug, Clone)]
pub struct NeuralNetwork {
    config: NetworkConfig,
    weights: NetworkWeights,
    rng: ChaCha8Rng,
    cache: Option<ForwardCache>,
}

impl NeuralNetwork {
    /// Build a He-initialised network (`stddev = sqrt(2 / fan_in)`, zero biases).
    pub fn new(config: NetworkConfig) -> Result<Self> {
        let sizes = config.layer_sizes();
        if sizes.iter().any(|&s| s == 0) {
            return Err(Error::invalid_weights("layer sizes must be positive"));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let layers = sizes
            .windows(2)
            .map(|pair| {
                let (fan_in, fan_out) = (pair[0], pair[1]);
                let std_dev = (2.0 / fan_in as f64).sqrt();
                let weights = (0..fan_out)
                    .map(|_| {
                        (0..fan_in)
                            .map(|_| standard_normal(&mut rng) * std_dev)
                            .collect()
                    })
                    .collect();
                LayerWeights {
                    weights,
                    biases: vec![0.0; fan_out],
                }
            })
            .collect();

        Ok(Self {
            config,
            weights: NetworkWeights { layers },
            rng,
            cache: None,
        })
    }

    /// Build a network around existing weights.
    pub fn from_weights(config: NetworkConfig, weights: NetworkWeights) -> Result<Self> {
        weights.validate_shape(&config)?;
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            weights,
            cache: None,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn input_size(&self) -> usize {
        self.config.input_size
    }

    pub fn output_size(&self) -> usize {
        self.config.output_size
    }

    pub fn parameter_count(&self) -> usize {
        self.weights.parameter_count()
    }

    pub fn set_dropout_rate(&mut self, rate: f64) {
        self.config.dropout_rate = rate.clamp(0.0, 0.95);
    }

    /// Deep copy of the current weights.
    pub fn get_weights(&self) -> NetworkWeights {
        self.weights.clone()
    }

    /// Borrow the current weights without copying.
    pub fn weights(&self) -> &NetworkWeights {
        &self.weights
    }

    /// Replace all weights with a deep copy of `weights`.
    ///
    /// Shapes are validated first; on failure the current weights are kept.
    pub fn set_weights(&mut self, weights: &NetworkWeights) -> Result<()> {
        weights.validate_shape(&self.config)?;
        self.weights = weights.clone();
        self.cache = None;
        Ok(())
    }

    /// Forward pass. Returns a probability vector over the actions.
    ///
    /// Dropout is applied on every call at the configured rate.
    pub fn forward(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        ensure_len("forward input", self.config.input_size, input)?;
        ensure_finite("forward input", input)?;

        let rate = self.config.dropout_rate;
        let keep_scale = 1.0 / (1.0 - rate);
        let last = self.weights.layers.len() - 1;

        let mut activations = Vec::with_capacity(last + 2);
        let mut pre_activations = Vec::with_capacity(last + 1);
        let mut masks = Vec::with_capacity(last);
        activations.push(input.to_vec());

        for (l, layer) in self.weights.layers.iter().enumerate() {
            let z: Vec<f64> = layer
                .weights
                .iter()
                .zip(&layer.biases)
                .map(|(row, b)| b + dot(row, &activations[l]))
                .collect();

            if l == last {
                activations.push(softmax(&z));
            } else {
                let mut mask = Vec::with_capacity(z.len());
                let mut a = Vec::with_capacity(z.len());
                for &zi in &z {
                    let m = if rate > 0.0 && self.rng.gen::<f64>() < rate {
                        0.0
                    } else {
                        keep_scale
                    };
                    mask.push(m);
                    a.push(zi.max(0.0) * m);
                }
                masks.push(mask);
                activations.push(a);
            }
            pre_activations.push(z);
        }

        let output = activations.last().cloned().unwrap_or_default();
        ensure_finite("forward output", &output)?;

        self.cache = Some(ForwardCache {
            activations,
            pre_activations,
            masks,
        });
        Ok(output)
    }

    /// Epsilon-greedy selection.
    ///
    /// Exploration samples from the temperature-softened output distribution
    /// rather than uniformly, so promising actions stay favoured. Exploitation
    /// takes the first maximum.
    pub fn select_action(&mut self, input: &[f64], epsilon: f64) -> Result<ActionSelection> {
        let probs = self.forward(input)?;

        let explored = self.rng.gen::<f64>() < epsilon;
        let index = if explored {
            sample_tempered(&probs, EXPLORATION_TEMPERATURE, &mut self.rng)
        } else {
            argmax(&probs)
        };

        let action = FlightAction::from_index(index).ok_or(Error::DimensionMismatch {
            context: "action index",
            expected: super::action::ACTION_COUNT,
            actual: index + 1,
        })?;
        Ok(ActionSelection { action, explored })
    }

    /// One gradient step toward `target` from the last forward pass.
    ///
    /// Loss is the mean squared error of `output - target`. Gradients are
    /// clipped by their global L2 norm before the update. Returns the loss.
    pub fn backward(&mut self, target: &[f64]) -> Result<f64> {
        ensure_len("backward target", self.config.output_size, target)?;
        ensure_finite("backward target", target)?;
        let cache = self.cache.take().ok_or(Error::DimensionMismatch {
            context: "backward without a cached forward pass",
            expected: self.config.input_size,
            actual: 0,
        })?;

        let output = &cache.activations[cache.activations.len() - 1];
        let error: Vec<f64> = output.iter().zip(target).map(|(o, t)| o - t).collect();
        let loss = error.iter().map(|e| e * e).sum::<f64>() / error.len() as f64;

        let n_layers = self.weights.layers.len();
        let mut grad_w: Vec<Vec<Vec<f64>>> = Vec::with_capacity(n_layers);
        let mut grad_b: Vec<Vec<f64>> = Vec::with_capacity(n_layers);
        let mut delta = error;

        for l in (0..n_layers).rev() {
            let a_prev = &cache.activations[l];
            let layer = &self.weights.layers[l];

            grad_w.push(
                delta
                    .iter()
                    .map(|d| a_prev.iter().map(|a| d * a).collect())
                    .collect(),
            );
            grad_b.push(delta.clone());

            if l > 0 {
                let z_prev = &cache.pre_activations[l - 1];
                let mask = &cache.masks[l - 1];
                delta = (0..layer.inputs())
                    .map(|i| {
                        if z_prev[i] <= 0.0 {
                            return 0.0;
                        }
                        let back: f64 = layer
                            .weights
                            .iter()
                            .zip(&delta)
                            .map(|(row, d)| row[i] * d)
                            .sum();
                        back * mask[i]
                    })
                    .collect();
            }
        }
        grad_w.reverse();
        grad_b.reverse();

        let norm_sq: f64 = grad_w.iter().flatten().flatten().map(|g| g * g).sum::<f64>()
            + grad_b.iter().flatten().map(|g| g * g).sum::<f64>();
        let norm = norm_sq.sqrt();
        let clip_ratio = if norm > self.config.gradient_clip {
            self.config.gradient_clip / norm
        } else {
            1.0
        };
        let step = self.config.learning_rate * clip_ratio;

        for (layer, (gw, gb)) in self
            .weights
            .layers
            .iter_mut()
            .zip(grad_w.iter().zip(&grad_b))
        {
            for (row, grow) in layer.weights.iter_mut().zip(gw) {
                for (w, g) in row.iter_mut().zip(grow) {
                    *w -= step * g;
                }
            }
            for (b, g) in layer.biases.iter_mut().zip(gb) {
                *b -= step * g;
            }
        }

        Ok(loss)
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Softmax with the max subtracted before exponentiating.
pub fn softmax(z: &[f64]) -> Vec<f64> {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = z.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the first maximum.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Sample an index from `probs` softened by `temperature` (`p^(1/T)`, renormalised).
fn sample_tempered<R: Rng>(probs: &[f64], temperature: f64, rng: &mut R) -> usize {
    let weights: Vec<f64> = probs.iter().map(|p| p.max(0.0).powf(1.0 / temperature)).collect();
    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return rng.gen_range(0..probs.len());
    }

    let mut r = rng.gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        if r < *w {
            return i;
        }
        r -= w;
    }
    probs.len() - 1
}

/// Standard normal draw via Box–Muller.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(dropout: f64) -> NetworkConfig {
        NetworkConfig {
            input_size: 4,
            hidden_layers: vec![8, 6],
            output_size: 9,
            learning_rate: 0.05,
            dropout_rate: dropout,
            gradient_clip: 1.0,
            seed: 3,
        }
    }

    fn flat(weights: &NetworkWeights) -> Vec<f64> {
        weights
            .layers
            .iter()
            .flat_map(|l| l.weights.iter().flatten().chain(l.biases.iter()).copied())
            .collect()
    }

    #[test]
    fn forward_produces_probability_vector() {
        let mut net = NeuralNetwork::new(small_config(0.2)).unwrap();
        let out = net.forward(&[0.1, -0.4, 0.9, 0.0]).unwrap();
        assert_eq!(out.len(), 9);
        assert!(out.iter().all(|p| *p >= 0.0));
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn forward_rejects_wrong_length_and_nan() {
        let mut net = NeuralNetwork::new(small_config(0.0)).unwrap();
        assert!(matches!(
            net.forward(&[1.0, 2.0]),
            Err(Error::DimensionMismatch {
                expected: 4,
                actual: 2,
                ..
            })
        ));
        assert!(matches!(
            net.forward(&[1.0, f64::NAN, 0.0, 0.0]),
            Err(Error::NumericInvalid { index: 1, .. })
        ));
    }

    #[test]
    fn he_init_is_deterministic_per_seed() {
        let a = NeuralNetwork::new(small_config(0.0)).unwrap();
        let b = NeuralNetwork::new(small_config(0.0)).unwrap();
        assert_eq!(a.get_weights(), b.get_weights());

        let mut other = small_config(0.0);
        other.seed = 4;
        let c = NeuralNetwork::new(other).unwrap();
        assert_ne!(a.get_weights(), c.get_weights());
        assert!(a.get_weights().layers[0].biases.iter().all(|b| *b == 0.0));
    }

    #[test]
    fn zero_dropout_forward_is_repeatable() {
        let mut net = NeuralNetwork::new(small_config(0.0)).unwrap();
        let x = [0.3, 0.2, -0.1, 0.7];
        assert_eq!(net.forward(&x).unwrap(), net.forward(&x).unwrap());
    }

    #[test]
    fn backward_moves_output_toward_target() {
        let mut net = NeuralNetwork::new(small_config(0.0)).unwrap();
        let x = [0.5, -0.2, 0.1, 0.8];
        let target = FlightAction::Hover.one_hot(1.0);

        net.forward(&x).unwrap();
        let first = net.backward(&target).unwrap();
        let mut last = first;
        for _ in 0..300 {
            net.forward(&x).unwrap();
            last = net.backward(&target).unwrap();
        }
        assert!(last < first, "loss should fall: {first} -> {last}");
        let out = net.forward(&x).unwrap();
        assert_eq!(argmax(&out), FlightAction::Hover.index());
    }

    #[test]
    fn update_magnitude_is_bounded_by_clip() {
        let mut cfg = small_config(0.0);
        cfg.learning_rate = 0.5;
        let mut net = NeuralNetwork::new(cfg).unwrap();
        let before = flat(net.weights());

        net.forward(&[10.0, -10.0, 10.0, -10.0]).unwrap();
        // Huge target error forces the clip path.
        net.backward(&[1000.0; 9]).unwrap();

        let after = flat(net.weights());
        let delta_norm = before
            .iter()
            .zip(&after)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        assert!(
            delta_norm <= 0.5 * 1.0 + 1e-9,
            "update norm {delta_norm} exceeds lr * clip"
        );
    }

    #[test]
    fn backward_requires_forward() {
        let mut net = NeuralNetwork::new(small_config(0.0)).unwrap();
        assert!(net.backward(&[0.0; 9]).is_err());
        net.forward(&[0.0; 4]).unwrap();
        assert!(net.backward(&[0.0; 9]).is_ok());
        // The cache is consumed by the update.
        assert!(net.backward(&[0.0; 9]).is_err());
    }

    #[test]
    fn exported_weights_are_independent() {
        let mut net = NeuralNetwork::new(small_config(0.0)).unwrap();
        let mut copy = net.get_weights();
        copy.layers[0].weights[0][0] += 100.0;
        assert_ne!(copy, net.get_weights());

        net.set_weights(&copy).unwrap();
        copy.layers[0].weights[0][0] = 0.0;
        assert_ne!(copy, net.get_weights(), "set_weights must deep copy");
    }

    #[test]
    fn set_weights_rejects_bad_shapes_and_keeps_state() {
        let mut net = NeuralNetwork::new(small_config(0.0)).unwrap();
        let original = net.get_weights();

        let mut missing_layer = original.clone();
        missing_layer.layers.pop();
        assert!(matches!(
            net.set_weights(&missing_layer),
            Err(Error::InvalidWeights { .. })
        ));

        let mut ragged = original.clone();
        ragged.layers[1].weights[2].push(0.0);
        assert!(net.set_weights(&ragged).is_err());

        let mut poisoned = original.clone();
        poisoned.layers[2].biases[0] = f64::INFINITY;
        assert!(net.set_weights(&poisoned).is_err());

        assert_eq!(net.get_weights(), original);
    }

    #[test]
    fn greedy_selection_takes_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]), 1);
        let mut net = NeuralNetwork::new(small_config(0.0)).unwrap();
        let x = [0.2, 0.1, 0.0, -0.3];
        let probs = net.forward(&x).unwrap();
        let sel = net.select_action(&x, 0.0).unwrap();
        assert!(!sel.explored);
        assert_eq!(sel.action.index(), argmax(&probs));
    }

    #[test]
    fn full_epsilon_always_explores() {
        let mut net = NeuralNetwork::new(small_config(0.0)).unwrap();
        for _ in 0..20 {
            assert!(net.select_action(&[0.0; 4], 1.0).unwrap().explored);
        }
    }

    #[test]
    fn tempered_sampling_favours_likely_actions() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let probs = [0.9, 0.1, 0.0];
        let mut counts = [0usize; 3];
        for _ in 0..2000 {
            counts[sample_tempered(&probs, EXPLORATION_TEMPERATURE, &mut rng)] += 1;
        }
        assert!(counts[0] > counts[1]);
        assert_eq!(counts[2], 0, "zero-probability action never sampled");
        // sqrt(0.9) / (sqrt(0.9) + sqrt(0.1)) = 0.75
        let share = counts[0] as f64 / 2000.0;
        assert!((share - 0.75).abs() < 0.05, "share {share}");
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let p = softmax(&[1000.0, 1000.0, -1000.0]);
        assert!((p[0] - 0.5).abs() < 1e-12);
        assert!((p[1] - 0.5).abs() < 1e-12);
        assert!(p[2] >= 0.0);
    }
}
