use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use core_codes::{EncodeMode, EncodeOptions, streams};
use model_enc::EmbeddingTable;
use model_learner::CodeLearner;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::TrainerConfig;
use crate::dataset::{EmbeddingBatches, gather_rows, train_validation_split, upload};
use crate::metrics::{cosine_similarity, mean_entropy, median};
use crate::optimizer::AdamWSchedule;
use crate::schedule::TemperatureSchedule;

/// Summary of one pass over the training rows.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    /// Mean soft-mode MSE over the epoch's batches, weighted by batch size.
    pub train_loss: f32,
    /// Hard-mode MSE on the held-out rows.
    pub validation_loss: Option<f32>,
    pub validation_median_cosine: Option<f32>,
    /// Mean per-slot entropy of the soft codes at the epoch's final temperature.
    pub code_entropy: f32,
    pub tau: f64,
    pub learning_rate: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochStats>,
    pub steps: usize,
    pub best_epoch: Option<usize>,
    pub best_loss: Option<f32>,
    pub best_checkpoint: Option<PathBuf>,
    pub checkpoints: Vec<PathBuf>,
}

impl TrainingReport {
    pub fn final_epoch(&self) -> Option<&EpochStats> {
        self.epochs.last()
    }
}

/// Fits a [`CodeLearner`] to reproduce a table of embeddings.
pub struct ReconstructionTrainer {
    config: TrainerConfig,
    temperature: TemperatureSchedule,
}

impl ReconstructionTrainer {
    pub fn new(config: TrainerConfig) -> Result<Self> {
        config.validate()?;
        let temperature = TemperatureSchedule::from_config(&config)?;
        Ok(Self {
            config,
            temperature,
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn temperature(&self) -> &TemperatureSchedule {
        &self.temperature
    }

    #[instrument(skip_all, fields(words = table.len(), m = learner.shape().m(), k = learner.shape().k()))]
    pub fn fit(&self, learner: &CodeLearner, table: &EmbeddingTable) -> Result<TrainingReport> {
        let shape = *learner.shape();
        ensure!(
            table.dimension() == shape.emb_size(),
            "embeddings have {} dimensions but the learner expects {}",
            table.dimension(),
            shape.emb_size()
        );
        let data = upload(table, learner.device())?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        rng.set_stream(streams::BATCHES);
        let (train_rows, validation_rows) =
            train_validation_split(table.len(), self.config.validation_fraction, &mut rng);
        let mut batches = EmbeddingBatches::new(train_rows, self.config.batch_size, rng)?;
        let validation = if validation_rows.is_empty() {
            None
        } else {
            Some(gather_rows(&data, &validation_rows)?)
        };
        info!(
            train = batches.len(),
            validation = validation_rows.len(),
            epochs = self.config.epochs,
            "starting reconstruction training"
        );

        let lr_schedule = AdamWSchedule::new(
            self.config.learning_rate,
            self.config.min_lr,
            self.config.warmup_steps,
            self.config.epochs * batches.batches_per_epoch(),
        );
        let mut optimizer = AdamW::new(
            learner.parameters(),
            ParamsAdamW {
                lr: self.config.learning_rate,
                weight_decay: self.config.weight_decay,
                ..ParamsAdamW::default()
            },
        )?;

        let mut report = TrainingReport::default();
        let mut step = 0usize;
        for epoch in 1..=self.config.epochs {
            let mut weighted_loss = 0f32;
            let mut seen = 0usize;
            let mut learning_rate = lr_schedule.learning_rate(step);
            for rows in batches.epoch() {
                learning_rate = lr_schedule.learning_rate(step);
                optimizer.set_learning_rate(learning_rate);
                let opts = self.temperature.options(step, self.config.eps);
                let x = gather_rows(&data, &rows)?;
                let y = learner.forward(&x, &opts, EncodeMode::Soft)?;
                let loss = candle_nn::loss::mse(&y, &x)?;
                optimizer.backward_step(&loss)?;
                let loss = loss.to_scalar::<f32>()?;
                ensure!(loss.is_finite(), "loss diverged at step {step}");
                weighted_loss += loss * rows.len() as f32;
                seen += rows.len();
                step += 1;
            }
            let train_loss = if seen == 0 {
                0.0
            } else {
                weighted_loss / seen as f32
            };

            let opts = self.temperature.options(step, self.config.eps);
            let probe = match &validation {
                Some(rows) => rows.clone(),
                None => data.clone(),
            };
            let code_entropy = mean_entropy(&learner.encode(&probe, &opts, EncodeMode::Soft)?.codes)?;
            let (validation_loss, validation_median_cosine) = match &validation {
                Some(rows) => {
                    let (loss, cosine) = evaluate(learner, rows, &opts)?;
                    (Some(loss), Some(cosine))
                }
                None => (None, None),
            };
            let stats = EpochStats {
                epoch,
                train_loss,
                validation_loss,
                validation_median_cosine,
                code_entropy,
                tau: opts.tau,
                learning_rate,
            };
            info!(
                epoch,
                train_loss,
                validation_loss = ?validation_loss,
                cosine = ?validation_median_cosine,
                entropy = code_entropy,
                tau = opts.tau,
                lr = learning_rate,
                "epoch finished"
            );

            let selection_loss = validation_loss.unwrap_or(train_loss);
            let improved = report.best_loss.is_none_or(|best| selection_loss < best);
            let periodic =
                self.config.checkpoint_every > 0 && epoch % self.config.checkpoint_every == 0;
            if improved {
                report.best_loss = Some(selection_loss);
                report.best_epoch = Some(epoch);
            }
            if let Some(dir) = &self.config.checkpoint_dir {
                if improved || periodic {
                    let path = checkpoint_path(dir, learner, epoch);
                    save_checkpoint(learner, &path)?;
                    if improved {
                        report.best_checkpoint = Some(path.clone());
                    }
                    report.checkpoints.push(path);
                }
            }
            report.epochs.push(stats);
        }
        report.steps = step;
        info!(
            steps = step,
            best_epoch = ?report.best_epoch,
            best_loss = ?report.best_loss,
            "training finished"
        );
        Ok(report)
    }
}

/// Hard-mode reconstruction MSE and median cosine similarity over `rows`.
pub fn evaluate(learner: &CodeLearner, rows: &Tensor, opts: &EncodeOptions) -> Result<(f32, f32)> {
    let reconstructed = learner.forward(rows, opts, EncodeMode::Hard)?;
    let loss = candle_nn::loss::mse(&reconstructed, rows)?.to_scalar::<f32>()?;
    let originals = rows.to_vec2::<f32>()?;
    let cosines: Vec<f32> = reconstructed
        .to_vec2::<f32>()?
        .iter()
        .zip(&originals)
        .map(|(a, b)| cosine_similarity(a, b))
        .collect();
    Ok((loss, median(&cosines)))
}

/// `<dir>/<M>_<K>/epoch_<n>.safetensors`
pub fn checkpoint_path(dir: &Path, learner: &CodeLearner, epoch: usize) -> PathBuf {
    let shape = learner.shape();
    dir.join(format!("{}_{}", shape.m(), shape.k()))
        .join(format!("epoch_{epoch}.safetensors"))
}

fn save_checkpoint(learner: &CodeLearner, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating checkpoint directory {}", parent.display()))?;
    }
    learner
        .save(path)
        .with_context(|| format!("writing checkpoint {}", path.display()))?;
    debug!(path = %path.display(), "checkpoint saved");
    Ok(())
}
