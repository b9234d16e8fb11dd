//! Source embedding lookup consumed by the encoder, training and table assembly.

use std::collections::HashMap;

use candle_core::{Device, Tensor};
use thiserror::Error;

/// Errors raised while filling an [`EmbeddingTable`].
#[derive(Debug, Error, PartialEq)]
pub enum EmbeddingTableError {
    /// Raised when a vector does not match the table dimensionality.
    #[error("embedding for `{word}` has {found} values, table expects {expected}")]
    DimensionMismatch {
        word: String,
        expected: usize,
        found: usize,
    },
    /// Raised when the table is created with zero dimensions.
    #[error("embedding dimension must be positive")]
    ZeroDimension,
}

/// Word → vector table with a fixed dimensionality, kept in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmbeddingTable {
    dimension: usize,
    words: Vec<String>,
    vectors: Vec<f32>,
    index: HashMap<String, usize>,
}

impl EmbeddingTable {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingTableError> {
        if dimension == 0 {
            return Err(EmbeddingTableError::ZeroDimension);
        }
        Ok(Self {
            dimension,
            ..Self::default()
        })
    }

    /// Builds a table ensuring all embeddings share the first entry's dimensionality.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, EmbeddingTableError>
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let mut pairs = pairs.into_iter().peekable();
        let dimension = pairs
            .peek()
            .map(|(_, vector)| vector.len())
            .ok_or(EmbeddingTableError::ZeroDimension)?;
        let mut table = Self::new(dimension)?;
        for (word, vector) in pairs {
            table.insert(word, vector)?;
        }
        Ok(table)
    }

    /// Inserts or replaces the vector for `word`.
    pub fn insert(
        &mut self,
        word: impl Into<String>,
        vector: Vec<f32>,
    ) -> Result<(), EmbeddingTableError> {
        let word = word.into();
        if vector.len() != self.dimension {
            return Err(EmbeddingTableError::DimensionMismatch {
                word,
                expected: self.dimension,
                found: vector.len(),
            });
        }
        match self.index.get(&word) {
            Some(&row) => {
                let start = row * self.dimension;
                self.vectors[start..start + self.dimension].copy_from_slice(&vector);
            }
            None => {
                self.index.insert(word.clone(), self.words.len());
                self.words.push(word);
                self.vectors.extend(vector);
            }
        }
        Ok(())
    }

    /// Returns the vector for `word`, or `None` when the word is absent.
    pub fn lookup(&self, word: &str) -> Option<&[f32]> {
        self.index.get(word).map(|&row| self.row(row))
    }

    pub fn contains(&self, word: &str) -> bool {
        self.index.contains_key(word)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Row-major `(len, dimension)` payload in insertion order.
    pub fn as_flat(&self) -> &[f32] {
        &self.vectors
    }

    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> + '_ {
        self.words
            .iter()
            .enumerate()
            .map(|(row, word)| (word.as_str(), self.row(row)))
    }

    /// Copies the whole table into a `(len, dimension)` tensor.
    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.vectors, (self.len(), self.dimension), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_distinguishes_present_and_absent_words() {
        let table =
            EmbeddingTable::from_pairs([("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])]).unwrap();
        assert_eq!(table.dimension(), 2);
        assert_eq!(table.lookup("a"), Some(&[1.0, 0.0][..]));
        assert_eq!(table.lookup("b"), Some(&[0.0, 1.0][..]));
        assert_eq!(table.lookup("missing"), None);
        assert_eq!(table.words(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn inconsistent_dimensions_are_errors() {
        let err =
            EmbeddingTable::from_pairs([("a", vec![1.0]), ("b", vec![0.0, 1.0])]).unwrap_err();
        assert_eq!(
            err,
            EmbeddingTableError::DimensionMismatch {
                word: "b".into(),
                expected: 1,
                found: 2
            }
        );
        assert_eq!(
            EmbeddingTable::new(0).unwrap_err(),
            EmbeddingTableError::ZeroDimension
        );
    }

    #[test]
    fn reinserting_replaces_in_place() {
        let mut table = EmbeddingTable::new(2).unwrap();
        table.insert("a", vec![1.0, 1.0]).unwrap();
        table.insert("b", vec![2.0, 2.0]).unwrap();
        table.insert("a", vec![3.0, 3.0]).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("a"), Some(&[3.0, 3.0][..]));
        let tensor = table.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(
            tensor.to_vec2::<f32>().unwrap(),
            vec![vec![3.0, 3.0], vec![2.0, 2.0]]
        );
    }
}
