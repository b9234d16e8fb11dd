//! Loaders for the inputs of the coding pipeline: pretrained text embeddings, word lists and
//! the vocabulary enumeration that indexes assembled tables.

pub mod embeddings;
pub mod vocab;

use std::path::PathBuf;

use model_enc::EmbeddingTableError;
use thiserror::Error;

pub use embeddings::{read_text_embeddings, read_word_list};
pub use vocab::{PAD, UNK, Vocabulary};

/// Errors raised while reading dataset files.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{path} is not valid utf-8: {source}")]
    InvalidUtf8 {
        path: PathBuf,
        source: std::str::Utf8Error,
    },
    /// The file holds no usable entry.
    #[error("{0} contains no embeddings")]
    Empty(PathBuf),
    #[error("line {line}: cannot parse {token:?} as a number")]
    InvalidNumber { line: usize, token: String },
    #[error("line {line}: word has no vector")]
    MissingVector { line: usize },
    /// A line's vector length differs from the first line's.
    #[error("line {line}: expected {expected} values, found {found}")]
    DimensionMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    Table(#[from] EmbeddingTableError),
}
