//! Deterministic embedding fixtures with known cluster structure.

use anyhow::{Result, ensure};
use model_enc::EmbeddingTable;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Spread of the words around their cluster centre, relative to the centre range `[-1, 1]`.
pub const CLUSTER_SPREAD: f32 = 0.1;

/// `words` vectors named `w0, w1, ...`; word `i` belongs to cluster `i % clusters`.
pub fn clustered_embeddings(
    words: usize,
    dims: usize,
    clusters: usize,
    seed: u64,
) -> Result<EmbeddingTable> {
    ensure!(dims > 0, "dims must be positive");
    ensure!(clusters > 0, "clusters must be positive");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let centres: Vec<Vec<f32>> = (0..clusters)
        .map(|_| (0..dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect();
    let mut table = EmbeddingTable::new(dims)?;
    for word in 0..words {
        let vector = centres[word % clusters]
            .iter()
            .map(|centre| centre + rng.gen_range(-CLUSTER_SPREAD..CLUSTER_SPREAD))
            .collect();
        table.insert(format!("w{word}"), vector)?;
    }
    Ok(table)
}

/// Cluster index of the word at `row` in a table from [`clustered_embeddings`].
pub fn cluster_of(row: usize, clusters: usize) -> usize {
    row % clusters.max(1)
}
