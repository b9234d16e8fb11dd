//! Evaluation of learned codes against the embeddings they replace, plus synthetic fixtures.

pub mod codes;
pub mod synthetic;

pub use codes::{CodeQualityReport, compression_ratio, evaluate_codes, neighbour_overlap};
pub use synthetic::{cluster_of, clustered_embeddings};
