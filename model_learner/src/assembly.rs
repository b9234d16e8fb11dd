//! Builds vocabulary-indexed embedding tables from a source lookup, either by copying source
//! vectors or by replacing them with their coded reconstruction.

use core_codes::{CodingError, ComputeContext, EncodeMode, EncodeOptions, Result, streams};
use model_enc::EmbeddingTable;
use rand::Rng;
use tracing::{debug, info, instrument};

use crate::learner::CodeLearner;
use crate::snapshot::{EmbeddingSnapshot, EmbeddingSnapshotError, TableKind};

/// Row-major table with one row per vocabulary entry.
#[derive(Clone, Debug, PartialEq)]
pub struct AssembledTable {
    dims: usize,
    data: Vec<f32>,
    present: Vec<bool>,
}

impl AssembledTable {
    pub fn rows(&self) -> usize {
        self.present.len()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Row `index`, or `None` past the last vocabulary entry.
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows() {
            return None;
        }
        let start = index * self.dims;
        self.data.get(start..start + self.dims)
    }

    /// Whether the row at `index` was filled from the source lookup.
    pub fn is_present(&self, index: usize) -> bool {
        self.present.get(index).copied().unwrap_or(false)
    }

    pub fn hits(&self) -> usize {
        self.present.iter().filter(|present| **present).count()
    }

    pub fn misses(&self) -> usize {
        self.rows() - self.hits()
    }

    pub fn to_snapshot(&self, kind: TableKind) -> Result<EmbeddingSnapshot, EmbeddingSnapshotError> {
        EmbeddingSnapshot::new(kind, self.rows(), self.dims, self.data.clone())
    }
}

/// Fills a randomly initialised table from a source lookup. Words the source does not know
/// keep their random row.
#[derive(Clone, Debug)]
pub struct TableAssembler {
    ctx: ComputeContext,
    init_range: f32,
    batch_size: usize,
}

impl TableAssembler {
    pub const DEFAULT_INIT_RANGE: f32 = 0.25;
    pub const DEFAULT_BATCH_SIZE: usize = 512;

    /// An unseeded context is pinned to one random seed so every table this assembler
    /// builds starts from the same initial rows.
    pub fn new(ctx: &ComputeContext) -> Self {
        let seed = ctx
            .seed()
            .unwrap_or_else(|| ctx.rng(streams::TABLE_INIT).r#gen());
        Self {
            ctx: ctx.clone().with_seed(seed),
            init_range: Self::DEFAULT_INIT_RANGE,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_init_range(mut self, init_range: f32) -> Self {
        self.init_range = init_range.abs();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn init_range(&self) -> f32 {
        self.init_range
    }

    /// Random `(rows, dims)` payload drawn from `U(-init_range, init_range)`.
    pub fn initial_table(&self, rows: usize, dims: usize) -> Vec<f32> {
        let mut rng = self.ctx.rng(streams::TABLE_INIT);
        let range = self.init_range;
        (0..rows * dims)
            .map(|_| {
                if range == 0.0 {
                    0.0
                } else {
                    rng.gen_range(-range..=range)
                }
            })
            .collect()
    }

    /// Copies source vectors into the rows of the words the source knows.
    #[instrument(skip_all, fields(words = vocab.len(), dims = source.dimension()))]
    pub fn assemble_baseline<S: AsRef<str>>(
        &self,
        vocab: &[S],
        source: &EmbeddingTable,
    ) -> AssembledTable {
        let dims = source.dimension();
        let mut table = self.empty(vocab.len(), dims);
        for (index, word) in vocab.iter().enumerate() {
            if let Some(vector) = source.lookup(word.as_ref()) {
                table.data[index * dims..(index + 1) * dims].copy_from_slice(vector);
                table.present[index] = true;
            }
        }
        info!(hits = table.hits(), misses = table.misses(), "baseline table assembled");
        table
    }

    /// Replaces the rows of known words with the learner's reconstruction of their source
    /// vectors, running the model in batches.
    #[instrument(skip_all, fields(words = vocab.len(), mode = ?mode))]
    pub fn assemble_coded<S: AsRef<str>>(
        &self,
        vocab: &[S],
        source: &EmbeddingTable,
        learner: &CodeLearner,
        opts: &EncodeOptions,
        mode: EncodeMode,
    ) -> Result<AssembledTable> {
        let dims = learner.shape().emb_size();
        if source.dimension() != dims {
            return Err(CodingError::ShapeMismatch {
                context: "source embeddings",
                expected: vec![dims],
                found: vec![source.dimension()],
            });
        }
        let mut table = self.empty(vocab.len(), dims);
        let known: Vec<(usize, &[f32])> = vocab
            .iter()
            .enumerate()
            .filter_map(|(index, word)| source.lookup(word.as_ref()).map(|v| (index, v)))
            .collect();
        for chunk in known.chunks(self.batch_size) {
            let rows: Vec<&[f32]> = chunk.iter().map(|(_, vector)| *vector).collect();
            let coded = learner.reconstruct(&rows, opts, mode)?;
            for ((index, _), vector) in chunk.iter().zip(coded) {
                table.data[index * dims..(index + 1) * dims].copy_from_slice(&vector);
                table.present[*index] = true;
            }
            debug!(batch = chunk.len(), "coded batch written");
        }
        info!(hits = table.hits(), misses = table.misses(), "coded table assembled");
        Ok(table)
    }

    fn empty(&self, rows: usize, dims: usize) -> AssembledTable {
        AssembledTable {
            dims,
            data: self.initial_table(rows, dims),
            present: vec![false; rows],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_codes::CodeShape;

    fn source() -> EmbeddingTable {
        EmbeddingTable::from_pairs([
            ("good", vec![0.5f32, -0.5, 1.0, 0.0]),
            ("bad", vec![-1.0f32, 0.25, 0.0, 0.75]),
        ])
        .unwrap()
    }

    const VOCAB: [&str; 5] = ["<unk>", "good", "movie", "bad", "plot"];

    #[test]
    fn initial_table_is_bounded_and_stable() {
        let assembler = TableAssembler::new(&ComputeContext::cpu());
        let first = assembler.initial_table(10, 3);
        assert_eq!(first.len(), 30);
        assert!(first.iter().all(|v| v.abs() <= 0.25));
        assert_eq!(first, assembler.initial_table(10, 3));
    }

    #[test]
    fn baseline_copies_known_rows_and_keeps_random_rows() {
        let assembler = TableAssembler::new(&ComputeContext::cpu().with_seed(4));
        let initial = assembler.initial_table(5, 4);
        let table = assembler.assemble_baseline(&VOCAB, &source());
        assert_eq!((table.hits(), table.misses()), (2, 3));
        assert_eq!(table.row(1), source().lookup("good"));
        assert_eq!(table.row(3), source().lookup("bad"));
        for index in [0, 2, 4] {
            assert!(!table.is_present(index));
            assert_eq!(table.row(index), Some(&initial[index * 4..(index + 1) * 4]));
        }
        assert_eq!(table.row(5), None);
        assert!(!table.is_present(5));
    }

    #[test]
    fn coded_rows_overwrite_only_known_words() {
        let ctx = ComputeContext::cpu().with_seed(11);
        let learner = CodeLearner::new(CodeShape::new(4, 2, 3, None).unwrap(), &ctx).unwrap();
        let assembler = TableAssembler::new(&ctx).with_batch_size(1);
        let initial = assembler.initial_table(5, 4);
        let table = assembler
            .assemble_coded(
                &VOCAB,
                &source(),
                &learner,
                &EncodeOptions::default(),
                EncodeMode::Deterministic,
            )
            .unwrap();
        assert_eq!(table.rows(), 5);
        for index in [1, 3] {
            assert!(table.is_present(index));
            assert_ne!(table.row(index), Some(&initial[index * 4..(index + 1) * 4]));
        }
        for index in [0, 2, 4] {
            assert_eq!(table.row(index), Some(&initial[index * 4..(index + 1) * 4]));
        }
        assert_eq!(table.row(table.rows()), None);
    }

    #[test]
    fn coded_assembly_rejects_mismatched_source() {
        let ctx = ComputeContext::cpu().with_seed(1);
        let learner = CodeLearner::new(CodeShape::new(3, 2, 3, None).unwrap(), &ctx).unwrap();
        let err = TableAssembler::new(&ctx)
            .assemble_coded(
                &VOCAB,
                &source(),
                &learner,
                &EncodeOptions::default(),
                EncodeMode::Hard,
            )
            .unwrap_err();
        assert!(matches!(err, CodingError::ShapeMismatch { .. }));
    }
}
