use anyhow::{Result, ensure};
use candle_core::{Device, Tensor};
use model_enc::EmbeddingTable;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// Shuffled row indices, split into train and validation once per run.
pub fn train_validation_split(
    rows: usize,
    validation_fraction: f64,
    rng: &mut ChaCha8Rng,
) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..rows).collect();
    indices.shuffle(rng);
    let mut held_out = (rows as f64 * validation_fraction).round() as usize;
    if validation_fraction > 0.0 && rows > 1 {
        held_out = held_out.clamp(1, rows - 1);
    } else {
        held_out = held_out.min(rows.saturating_sub(1));
    }
    let train = indices.split_off(held_out);
    (train, indices)
}

/// Seeded minibatches over a subset of embedding rows, reshuffled every epoch.
pub struct EmbeddingBatches {
    indices: Vec<usize>,
    batch_size: usize,
    rng: ChaCha8Rng,
}

impl EmbeddingBatches {
    pub fn new(indices: Vec<usize>, batch_size: usize, rng: ChaCha8Rng) -> Result<Self> {
        ensure!(batch_size > 0, "batch_size must be positive");
        Ok(Self {
            indices,
            batch_size,
            rng,
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    /// Index batches of the next epoch; the last one may be short.
    pub fn epoch(&mut self) -> Vec<Vec<usize>> {
        self.indices.shuffle(&mut self.rng);
        self.indices
            .chunks(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }
}

/// Selects rows of an uploaded `(N, emb_size)` table.
pub fn gather_rows(data: &Tensor, rows: &[usize]) -> Result<Tensor> {
    let ids = rows
        .iter()
        .map(|row| u32::try_from(*row))
        .collect::<Result<Vec<_>, _>>()?;
    let ids = Tensor::from_vec(ids, rows.len(), data.device())?;
    Ok(data.index_select(&ids, 0)?)
}

pub fn upload(table: &EmbeddingTable, device: &Device) -> Result<Tensor> {
    ensure!(!table.is_empty(), "embedding table is empty");
    Ok(table.to_tensor(device)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn split_holds_out_at_least_one_row() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (train, validation) = train_validation_split(10, 0.05, &mut rng);
        assert_eq!((train.len(), validation.len()), (9, 1));
        let mut all: Vec<_> = train.iter().chain(&validation).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());

        let (train, validation) = train_validation_split(1, 0.5, &mut rng);
        assert_eq!((train.len(), validation.len()), (1, 0));
        let (train, validation) = train_validation_split(8, 0.0, &mut rng);
        assert_eq!((train.len(), validation.len()), (8, 0));
    }

    #[test]
    fn epochs_cover_every_row_once() {
        let rng = ChaCha8Rng::seed_from_u64(2);
        let mut batches = EmbeddingBatches::new((0..7).collect(), 3, rng).unwrap();
        assert_eq!(batches.batches_per_epoch(), 3);
        let epoch = batches.epoch();
        assert_eq!(
            epoch.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );
        let mut seen: Vec<_> = epoch.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn same_seed_gives_same_order() {
        let make = || EmbeddingBatches::new((0..20).collect(), 4, ChaCha8Rng::seed_from_u64(9));
        assert_eq!(make().unwrap().epoch(), make().unwrap().epoch());
    }

    #[test]
    fn gathered_rows_follow_requested_order() {
        let data = Tensor::new(&[[0f32, 0.0], [1.0, 1.0], [2.0, 2.0]], &Device::Cpu).unwrap();
        let rows = gather_rows(&data, &[2, 0]).unwrap();
        assert_eq!(
            rows.to_vec2::<f32>().unwrap(),
            vec![vec![2.0, 2.0], vec![0.0, 0.0]]
        );
    }
}
