// src/error.rs
//
// Error taxonomy for the learning engine.
//
// Every failure here is local and synchronous: the caller (whatever schedules
// ticks) decides whether to skip the tick, fall back to a default action, or
// abort training. Nothing in this crate retries.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Input or target vector has the wrong length.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Weight set does not match the network topology.
    #[error("invalid weights: {reason}")]
    InvalidWeights { reason: String },

    /// Serialized model, demonstration set or config could not be restored.
    #[error("load failed: {reason}")]
    LoadError { reason: String },

    /// NaN or infinity found in a vector.
    #[error("non-finite value in {context} at index {index}")]
    NumericInvalid { context: &'static str, index: usize },
}

impl Error {
    pub(crate) fn load(reason: impl Into<String>) -> Self {
        Error::LoadError {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_weights(reason: impl Into<String>) -> Self {
        Error::InvalidWeights {
            reason: reason.into(),
        }
    }
}

/// Reject vectors containing NaN or infinity.
pub(crate) fn ensure_finite(context: &'static str, values: &[f64]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(Error::NumericInvalid { context, index }),
        None => Ok(()),
    }
}

/// Reject vectors whose length differs from `expected`.
pub(crate) fn ensure_len(context: &'static str, expected: usize, values: &[f64]) -> Result<()> {
    if values.len() != expected {
        return Err(Error::DimensionMismatch {
            context,
            expected,
            actual: values.len(),
        });
    }
    Ok(())
}
