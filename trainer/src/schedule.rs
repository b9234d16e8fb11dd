use anyhow::{Result, ensure};
use core_codes::EncodeOptions;

use crate::TrainerConfig;

/// Exponentially annealed relaxation temperature, floored at `min`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TemperatureSchedule {
    start: f64,
    min: f64,
    decay: f64,
}

impl TemperatureSchedule {
    pub fn new(start: f64, min: f64, decay: f64) -> Result<Self> {
        ensure!(
            start.is_finite() && start > 0.0,
            "tau_start must be positive, got {start}"
        );
        ensure!(
            min.is_finite() && min > 0.0,
            "tau_min must be positive, got {min}"
        );
        ensure!(
            decay.is_finite() && decay >= 0.0,
            "tau_decay must be non-negative, got {decay}"
        );
        Ok(Self { start, min, decay })
    }

    pub fn from_config(config: &TrainerConfig) -> Result<Self> {
        Self::new(config.tau_start, config.tau_min, config.tau_decay)
    }

    /// `max(min, start * exp(-decay * step))`
    pub fn tau(&self, step: usize) -> f64 {
        (self.start * (-self.decay * step as f64).exp()).max(self.min)
    }

    pub fn options(&self, step: usize, eps: f64) -> EncodeOptions {
        EncodeOptions {
            tau: self.tau(step),
            eps,
        }
    }
}
