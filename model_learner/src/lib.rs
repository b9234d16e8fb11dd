//! The trainable code learner and everything built from a trained one: checkpoints,
//! vocabulary tables, table snapshots and exported codebooks.

pub mod assembly;
pub mod checkpoint;
pub mod codebook;
pub mod learner;
pub mod snapshot;

pub use assembly::{AssembledTable, TableAssembler};
pub use checkpoint::{CHECKPOINT_FORMAT, CHECKPOINT_VERSION, CheckpointError, CheckpointSchema};
pub use codebook::{Codebook, CodebookError};
pub use learner::CodeLearner;
pub use snapshot::{EmbeddingSnapshot, EmbeddingSnapshotError, TableKind};
