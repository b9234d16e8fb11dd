//! Quality of the discrete codes a trained learner assigns to a table of embeddings.

use std::collections::HashSet;

use anyhow::{Result, ensure};
use core_codes::{CodeShape, EncodeMode, EncodeOptions};
use model_enc::EmbeddingTable;
use model_learner::{CodeLearner, Codebook};
use serde::Serialize;
use tracing::{info, instrument};
use trainer::{cosine_similarity, median, mse, slot_perplexity, slot_utilisation};

/// Words taking part in the neighbour comparison, which is quadratic in their number.
pub const NEIGHBOUR_SAMPLE: usize = 2000;
const ENCODE_BATCH: usize = 512;

/// Summary metrics for one learner on one embedding table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CodeQualityReport {
    pub words: usize,
    pub m: usize,
    pub k: usize,
    /// Mean per-word reconstruction error.
    pub mean_mse: f32,
    pub median_cosine: f32,
    /// Fraction of the `K` symbols used, per slot.
    pub slot_utilisation: Vec<f32>,
    pub slot_perplexity: Vec<f32>,
    /// Words whose full code is unique, over all words.
    pub distinct_code_ratio: f32,
    pub neighbour_k: usize,
    /// Mean overlap of the `k` nearest neighbours before and after coding.
    pub neighbour_overlap: f32,
    /// Float table bytes over dictionary bytes plus packed code bytes.
    pub compression_ratio: f32,
}

impl CodeQualityReport {
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("words = {}", self.words),
            format!("code = {}x{}", self.m, self.k),
            format!("mean_mse = {:.6}", self.mean_mse),
            format!("median_cosine = {:.6}", self.median_cosine),
            format!("distinct_code_ratio = {:.6}", self.distinct_code_ratio),
            format!(
                "neighbour_overlap@{} = {:.6}",
                self.neighbour_k, self.neighbour_overlap
            ),
            format!("compression_ratio = {:.3}", self.compression_ratio),
        ];
        for (slot, (usage, perplexity)) in self
            .slot_utilisation
            .iter()
            .zip(&self.slot_perplexity)
            .enumerate()
        {
            lines.push(format!(
                "slot {slot}: utilisation = {usage:.3}, perplexity = {perplexity:.3}"
            ));
        }
        lines.join("\n")
    }
}

/// Encodes every word of `table`, rebuilds it from the codes alone and compares the two.
#[instrument(skip_all, fields(words = table.len(), mode = ?mode, k = k_neighbours))]
pub fn evaluate_codes(
    learner: &CodeLearner,
    table: &EmbeddingTable,
    opts: &EncodeOptions,
    mode: EncodeMode,
    k_neighbours: usize,
) -> Result<CodeQualityReport> {
    let shape = *learner.shape();
    ensure!(!table.is_empty(), "embedding table is empty");
    ensure!(
        table.dimension() == shape.emb_size(),
        "embeddings have {} dimensions but the learner expects {}",
        table.dimension(),
        shape.emb_size()
    );

    let codebook = Codebook::build(learner, table, opts, mode, ENCODE_BATCH)?;
    let rebuilt = codebook.reconstruct(learner.decoder())?.to_vec2::<f32>()?;

    let mut errors = Vec::with_capacity(table.len());
    let mut cosines = Vec::with_capacity(table.len());
    for ((_, original), coded) in table.iter().zip(&rebuilt) {
        errors.push(mse(original, coded));
        cosines.push(cosine_similarity(original, coded));
    }
    let mean_mse = errors.iter().sum::<f32>() / errors.len() as f32;

    let sample = table.len().min(NEIGHBOUR_SAMPLE);
    let originals: Vec<&[f32]> = (0..sample).map(|row| table.row(row)).collect();
    let coded: Vec<&[f32]> = rebuilt.iter().take(sample).map(Vec::as_slice).collect();
    let neighbour_overlap = neighbour_overlap(&originals, &coded, k_neighbours);

    let report = CodeQualityReport {
        words: table.len(),
        m: shape.m(),
        k: shape.k(),
        mean_mse,
        median_cosine: median(&cosines),
        slot_utilisation: slot_utilisation(codebook.as_flat(), shape.m(), shape.k()),
        slot_perplexity: slot_perplexity(codebook.as_flat(), shape.m(), shape.k()),
        distinct_code_ratio: (codebook.len() - codebook.collisions()) as f32
            / codebook.len() as f32,
        neighbour_k: k_neighbours,
        neighbour_overlap,
        compression_ratio: compression_ratio(table.len(), &shape),
    };
    info!(
        mean_mse = report.mean_mse,
        median_cosine = report.median_cosine,
        distinct = report.distinct_code_ratio,
        overlap = report.neighbour_overlap,
        "code quality evaluated"
    );
    Ok(report)
}

/// Mean fraction of each row's `k` nearest neighbours (by cosine) shared between two tables
/// with the same row order.
pub fn neighbour_overlap(original: &[&[f32]], coded: &[&[f32]], k: usize) -> f32 {
    let rows = original.len().min(coded.len());
    let k = k.min(rows.saturating_sub(1));
    if k == 0 {
        return 1.0;
    }
    let mut total = 0f32;
    for query in 0..rows {
        let before: HashSet<usize> = nearest(original, query, k).into_iter().collect();
        let shared = nearest(coded, query, k)
            .into_iter()
            .filter(|row| before.contains(row))
            .count();
        total += shared as f32 / k as f32;
    }
    total / rows as f32
}

fn nearest(rows: &[&[f32]], query: usize, k: usize) -> Vec<usize> {
    let mut scored: Vec<(usize, f32)> = rows
        .iter()
        .enumerate()
        .filter(|(row, _)| *row != query)
        .map(|(row, vector)| (row, cosine_similarity(rows[query], vector)))
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.into_iter().take(k).map(|(row, _)| row).collect()
}

/// Bytes of a dense f32 table over the bytes of `M` dictionaries plus bit-packed codes.
pub fn compression_ratio(words: usize, shape: &CodeShape) -> f32 {
    let dense = (words * shape.emb_size() * 4) as f64;
    let dictionaries = (shape.m() * shape.emb_size() * shape.k() * 4) as f64;
    let codes = (words * shape.code_bits()).div_ceil(8) as f64;
    (dense / (dictionaries + codes)) as f32
}
