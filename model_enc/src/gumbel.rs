//! Gumbel noise and the concrete (Gumbel-softmax) relaxation of categorical sampling.

use candle_core::{D, Device, Shape, Tensor};
use core_codes::{ComputeContext, Result, Temperature, streams};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Draws i.i.d. standard Gumbel samples, `-ln(-ln(U + eps) + eps)` with `U ~ U[0, 1)`.
#[derive(Debug)]
pub struct GumbelSampler {
    rng: Mutex<ChaCha8Rng>,
}

impl GumbelSampler {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    pub fn from_seed(seed: u64) -> Self {
        Self::new(ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn from_context(ctx: &ComputeContext) -> Self {
        Self::new(ctx.rng(streams::GUMBEL))
    }

    /// Fresh noise of exactly `shape`, placed on `device`.
    pub fn sample<S: Into<Shape>>(&self, shape: S, eps: f64, device: &Device) -> Result<Tensor> {
        let shape = shape.into();
        let mut rng = self.rng.lock();
        let values: Vec<f32> = (0..shape.elem_count())
            .map(|_| {
                let u: f64 = rng.r#gen();
                (-(-(u + eps).ln() + eps).ln()) as f32
            })
            .collect();
        Ok(Tensor::from_vec(values, shape, device)?)
    }
}

/// Turns per-slot log-weights of shape `(B, M, K)` into relaxed one-hot vectors over `K`.
pub trait Relaxation: Send + Sync {
    fn relax(&self, log_alpha: &Tensor, tau: Temperature, eps: f64) -> Result<Tensor>;
}

/// `softmax((log_alpha + g) / tau)` with fresh Gumbel noise `g` on every call.
#[derive(Debug)]
pub struct GumbelSoftmax {
    sampler: GumbelSampler,
}

impl GumbelSoftmax {
    pub fn new(sampler: GumbelSampler) -> Self {
        Self { sampler }
    }

    pub fn from_context(ctx: &ComputeContext) -> Self {
        Self::new(GumbelSampler::from_context(ctx))
    }
}

impl Relaxation for GumbelSoftmax {
    fn relax(&self, log_alpha: &Tensor, tau: Temperature, eps: f64) -> Result<Tensor> {
        let noise = self
            .sampler
            .sample(log_alpha.dims(), eps, log_alpha.device())?;
        gumbel_softmax(log_alpha, &noise, tau)
    }
}

/// Pure relaxation step given pre-drawn noise; softmax runs over the last axis.
pub fn gumbel_softmax(log_alpha: &Tensor, noise: &Tensor, tau: Temperature) -> Result<Tensor> {
    let noise = noise.to_dtype(log_alpha.dtype())?;
    let logits = (log_alpha + noise)?.affine(1.0 / tau.value(), 0.0)?;
    Ok(candle_nn::ops::softmax(&logits, D::Minus1)?)
}
