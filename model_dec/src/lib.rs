//! Decoder side of the compositional code model: reconstructs embeddings as the sum of
//! per-slot dictionary lookups.

pub mod dictionary;

use candle_core::{DType, Tensor};
use core_codes::{CodeShape, ComputeContext, ParamStore, Result, ensure_shape};
use tracing::trace;

pub use dictionary::SourceDictionary;

/// Reconstructs `(B, emb_size)` embeddings from `(B, M, K, 1)` codes.
#[derive(Clone, Debug)]
pub struct Decoder {
    dictionary: SourceDictionary,
    shape: CodeShape,
}

impl Decoder {
    pub fn new(shape: CodeShape, store: &ParamStore, ctx: &ComputeContext) -> Result<Self> {
        let dictionary = SourceDictionary::new(shape.m(), shape.emb_size(), shape.k(), store, ctx)?;
        Ok(Self { dictionary, shape })
    }

    pub fn dictionary(&self) -> &SourceDictionary {
        &self.dictionary
    }

    pub fn forward(&self, codes: &Tensor) -> Result<Tensor> {
        let contributions = self.dictionary.forward(codes)?;
        trace!(dims = ?contributions.dims(), "summing slot contributions");
        Ok(contributions.sum(1)?)
    }

    /// Decodes integer codes `(B, M)` without going through the encoder.
    pub fn decode_indices(&self, indices: &Tensor) -> Result<Tensor> {
        let batch = indices.dims().first().copied().unwrap_or(1);
        ensure_shape("decoder indices", indices, &[batch, self.shape.m()])?;
        let indices = indices.to_dtype(DType::U32)?;
        let one_hot = candle_nn::encoding::one_hot(indices, self.shape.k(), 1f32, 0f32)?;
        self.forward(&one_hot.unsqueeze(3)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use core_codes::CodingError;

    fn decoder(emb: usize, m: usize, k: usize) -> Decoder {
        let ctx = ComputeContext::cpu().with_seed(9);
        let store = ParamStore::new(ctx.device());
        Decoder::new(CodeShape::new(emb, m, k, None).unwrap(), &store, &ctx).unwrap()
    }

    #[test]
    fn output_is_batch_by_embedding() {
        let decoder = decoder(5, 3, 4);
        let codes = Tensor::rand(0f32, 1f32, (7, 3, 4, 1), &Device::Cpu).unwrap();
        assert_eq!(decoder.forward(&codes).unwrap().dims(), &[7, 5]);
    }

    #[test]
    fn hard_code_reconstruction_is_sum_of_selected_columns() {
        let decoder = decoder(4, 3, 5);
        let picks = [4u32, 0, 2];
        let indices = Tensor::new(&[picks], &Device::Cpu).unwrap();
        let out = decoder.decode_indices(&indices).unwrap();
        assert_eq!(out.dims(), &[1, 4]);

        let mut expected = vec![0f32; 4];
        for (m, k) in picks.iter().enumerate() {
            let column = decoder.dictionary().column(m, *k as usize).unwrap();
            for (acc, v) in expected.iter_mut().zip(column) {
                *acc += v;
            }
        }
        let got = out.squeeze(0).unwrap().to_vec1::<f32>().unwrap();
        for (a, b) in got.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn wrong_index_layout_is_rejected() {
        let decoder = decoder(4, 3, 5);
        let indices = Tensor::new(&[[0u32, 1]], &Device::Cpu).unwrap();
        assert!(matches!(
            decoder.decode_indices(&indices),
            Err(CodingError::ShapeMismatch { .. })
        ));
    }
}
