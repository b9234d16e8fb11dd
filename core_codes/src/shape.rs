//! Structural dimensions and per-call options of the MxK coding scheme.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{CodingError, Result};

/// Default Gumbel floor used to keep logarithms away from zero.
pub const DEFAULT_EPS: f64 = 1e-20;

/// Dimensions of a compositional code model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeShape {
    emb_size: usize,
    m: usize,
    k: usize,
    hidden_size: usize,
}

impl CodeShape {
    /// Validates the dimensions. The hidden width defaults to `M * K / 2`.
    pub fn new(emb_size: usize, m: usize, k: usize, hidden_size: Option<usize>) -> Result<Self> {
        positive("emb_size", emb_size)?;
        positive("M", m)?;
        positive("K", k)?;
        let hidden_size = match hidden_size {
            Some(hidden) => positive("hidden_size", hidden)?,
            None => (m * k / 2).max(1),
        };
        Ok(Self {
            emb_size,
            m,
            k,
            hidden_size,
        })
    }

    pub fn emb_size(&self) -> usize {
        self.emb_size
    }

    /// Number of code slots.
    pub fn m(&self) -> usize {
        self.m
    }

    /// Alphabet size of each slot.
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Bits needed to store one word's code: `M * ceil(log2 K)`.
    pub fn code_bits(&self) -> usize {
        let per_slot = if self.k <= 1 {
            0
        } else {
            (usize::BITS - (self.k - 1).leading_zeros()) as usize
        };
        self.m * per_slot
    }
}

fn positive(name: &'static str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(CodingError::InvalidDimension { name, value });
    }
    Ok(value)
}

/// Strictly positive, finite relaxation temperature.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Temperature(f64);

impl Temperature {
    pub fn new(tau: f64) -> Result<Self> {
        if !tau.is_finite() || tau <= 0.0 {
            return Err(CodingError::InvalidTemperature(tau));
        }
        Ok(Self(tau))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Per-call knobs of the encoder.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Gumbel-softmax temperature.
    pub tau: f64,
    /// Floor applied to uniform draws and to `alpha` before its logarithm.
    pub eps: f64,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            tau: 1.0,
            eps: DEFAULT_EPS,
        }
    }
}

impl EncodeOptions {
    pub fn with_tau(tau: f64) -> Self {
        Self {
            tau,
            ..Self::default()
        }
    }

    /// Rejects options that would silently turn into NaN or infinities downstream.
    pub fn validate(&self) -> Result<Temperature> {
        if !self.eps.is_finite() || self.eps < 0.0 {
            return Err(CodingError::InvalidEpsilon(self.eps));
        }
        Temperature::new(self.tau)
    }
}

/// How the encoder turns its relaxed distribution into code vectors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeMode {
    /// Differentiable relaxed sample, used while training.
    #[default]
    Soft,
    /// One-hot at the argmax of the noise-perturbed relaxed sample.
    Hard,
    /// One-hot at the argmax of `alpha`, with no noise involved.
    Deterministic,
}

/// Fails with [`CodingError::ShapeMismatch`] unless `tensor` has exactly `expected` dims.
pub fn ensure_shape(context: &'static str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() != expected {
        return Err(CodingError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            found: tensor.dims().to_vec(),
        });
    }
    Ok(())
}
