//! Reconstruction training of code learners: configuration, annealing and learning-rate
//! schedules, minibatching and the metrics reported per epoch.

pub mod config;
pub mod dataset;
pub mod metrics;
pub mod offline;
pub mod optimizer;
pub mod schedule;

pub use config::TrainerConfig;
pub use dataset::{EmbeddingBatches, gather_rows, train_validation_split};
pub use metrics::{
    cosine_similarity, mean_entropy, median, mse, slot_perplexity, slot_utilisation,
};
pub use offline::{EpochStats, ReconstructionTrainer, TrainingReport, checkpoint_path, evaluate};
pub use optimizer::AdamWSchedule;
pub use schedule::TemperatureSchedule;
