//! Bank of M bias-free source dictionaries, each mapping a K-way code to an embedding.

use candle_core::{IndexOp, Tensor};
use core_codes::{CodingError, ComputeContext, ParamStore, Result, ensure_shape, streams};

/// Weights of shape `(M, emb_size, K)`, initialised from `U(-1/sqrt(emb), 1/sqrt(emb))`.
#[derive(Clone, Debug)]
pub struct SourceDictionary {
    weight: Tensor,
    m: usize,
    emb_size: usize,
    k: usize,
}

impl SourceDictionary {
    pub const WEIGHT: &'static str = "decoder.dictionary.weight";

    pub fn new(
        m: usize,
        emb_size: usize,
        k: usize,
        store: &ParamStore,
        ctx: &ComputeContext,
    ) -> Result<Self> {
        for (name, value) in [("M", m), ("emb_size", emb_size), ("K", k)] {
            if value == 0 {
                return Err(CodingError::InvalidDimension { name, value });
            }
        }
        let mut rng = ctx.rng(streams::DICTIONARY_INIT);
        let bound = 1.0 / (emb_size as f64).sqrt();
        let weight = store.uniform(Self::WEIGHT, (m, emb_size, k), bound, &mut rng)?;
        Ok(Self {
            weight,
            m,
            emb_size,
            k,
        })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Column `k` of dictionary `m`, i.e. the contribution of symbol `k` in slot `m`.
    pub fn column(&self, m: usize, k: usize) -> Result<Vec<f32>> {
        if m >= self.m || k >= self.k {
            return Err(CodingError::ShapeMismatch {
                context: "dictionary column",
                expected: vec![self.m, self.k],
                found: vec![m, k],
            });
        }
        Ok(self.weight.i((m, .., k))?.to_vec1::<f32>()?)
    }

    /// Maps codes `(B, M, K, 1)` to per-slot contributions `(B, M, emb_size)`.
    pub fn forward(&self, codes: &Tensor) -> Result<Tensor> {
        let batch = codes.dims().first().copied().unwrap_or(1);
        ensure_shape("source dictionary input", codes, &[batch, self.m, self.k, 1])?;
        // (M, B, K) x (M, K, E) -> (M, B, E), batched over the slots.
        let codes = codes
            .squeeze(3)?
            .to_dtype(self.weight.dtype())?
            .transpose(0, 1)?
            .contiguous()?;
        let weight = self.weight.transpose(1, 2)?.contiguous()?;
        let out = codes.matmul(&weight)?.transpose(0, 1)?.contiguous()?;
        debug_assert_eq!(out.dims(), &[batch, self.m, self.emb_size]);
        Ok(out)
    }
}
