use std::path::PathBuf;

use anyhow::{Result, ensure};
use core_codes::DEFAULT_EPS;
use serde::{Deserialize, Serialize};

/// Configuration for the reconstruction trainer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub warmup_steps: usize,
    pub min_lr: f64,
    pub batch_size: usize,
    pub epochs: usize,
    /// Temperature at step 0, decayed exponentially towards `tau_min`.
    pub tau_start: f64,
    pub tau_min: f64,
    pub tau_decay: f64,
    pub eps: f64,
    pub validation_fraction: f64,
    pub seed: u64,
    /// Also checkpoint every N epochs; 0 writes only improvements.
    pub checkpoint_every: usize,
    /// Root of `<M>_<K>/epoch_<n>.safetensors`; no checkpoints when unset.
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            weight_decay: 0.0,
            warmup_steps: 0,
            min_lr: 1e-5,
            batch_size: 128,
            epochs: 200,
            tau_start: 1.0,
            tau_min: 0.1,
            tau_decay: 1e-3,
            eps: DEFAULT_EPS,
            validation_fraction: 0.05,
            seed: 42,
            checkpoint_every: 0,
            checkpoint_dir: None,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(
            self.learning_rate.is_finite() && self.learning_rate > 0.0,
            "learning_rate must be positive, got {}",
            self.learning_rate
        );
        ensure!(
            self.min_lr >= 0.0 && self.min_lr <= self.learning_rate,
            "min_lr must lie in [0, learning_rate], got {}",
            self.min_lr
        );
        ensure!(
            self.weight_decay >= 0.0,
            "weight_decay must be non-negative"
        );
        ensure!(
            (0.0..1.0).contains(&self.validation_fraction),
            "validation_fraction must lie in [0, 1), got {}",
            self.validation_fraction
        );
        ensure!(
            self.eps.is_finite() && self.eps >= 0.0,
            "eps must be finite and non-negative"
        );
        Ok(())
    }
}
