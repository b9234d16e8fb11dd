//! End-to-end reconstruction autoencoder wiring the encoder into the decoder.

use candle_core::{Device, Tensor, Var};
use core_codes::{
    CodeShape, CodingError, ComputeContext, EncodeMode, EncodeOptions, ParamStore, Result,
};
use model_dec::Decoder;
use model_enc::{CodeAssignment, Encoder, Relaxation};

/// Encoder → decoder composite trained to reproduce its input embeddings.
#[derive(Debug)]
pub struct CodeLearner {
    shape: CodeShape,
    store: ParamStore,
    encoder: Encoder,
    decoder: Decoder,
}

impl CodeLearner {
    pub fn new(shape: CodeShape, ctx: &ComputeContext) -> Result<Self> {
        let store = ParamStore::new(ctx.device());
        let encoder = Encoder::new(shape, &store, ctx)?;
        let decoder = Decoder::new(shape, &store, ctx)?;
        Ok(Self {
            shape,
            store,
            encoder,
            decoder,
        })
    }

    /// Same as [`CodeLearner::new`] but with a custom categorical relaxation.
    pub fn with_relaxation(
        shape: CodeShape,
        ctx: &ComputeContext,
        relaxation: Box<dyn Relaxation>,
    ) -> Result<Self> {
        let store = ParamStore::new(ctx.device());
        let encoder = Encoder::with_relaxation(shape, &store, ctx, relaxation)?;
        let decoder = Decoder::new(shape, &store, ctx)?;
        Ok(Self {
            shape,
            store,
            encoder,
            decoder,
        })
    }

    pub fn shape(&self) -> &CodeShape {
        &self.shape
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn device(&self) -> &Device {
        self.store.device()
    }

    pub fn params(&self) -> &ParamStore {
        &self.store
    }

    /// Every trainable tensor, for handing to an optimizer.
    pub fn parameters(&self) -> Vec<Var> {
        self.store.all_vars()
    }

    /// Reconstructed embeddings `(B, emb_size)`; the code indices are dropped.
    pub fn forward(&self, x: &Tensor, opts: &EncodeOptions, mode: EncodeMode) -> Result<Tensor> {
        let CodeAssignment { codes, .. } = self.encoder.encode(x, opts, mode)?;
        self.decoder.forward(&codes)
    }

    pub fn encode(
        &self,
        x: &Tensor,
        opts: &EncodeOptions,
        mode: EncodeMode,
    ) -> Result<CodeAssignment> {
        self.encoder.encode(x, opts, mode)
    }

    /// Runs rows of `emb_size` values through the model in one batch.
    pub fn reconstruct<R: AsRef<[f32]>>(
        &self,
        rows: &[R],
        opts: &EncodeOptions,
        mode: EncodeMode,
    ) -> Result<Vec<Vec<f32>>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let batch = self.batch_tensor(rows)?;
        Ok(self.forward(&batch, opts, mode)?.to_vec2::<f32>()?)
    }

    /// Stacks rows into a `(B, emb_size)` tensor on the model's device.
    pub fn batch_tensor<R: AsRef<[f32]>>(&self, rows: &[R]) -> Result<Tensor> {
        let emb = self.shape.emb_size();
        let mut flat = Vec::with_capacity(rows.len() * emb);
        for row in rows {
            let row = row.as_ref();
            if row.len() != emb {
                return Err(CodingError::ShapeMismatch {
                    context: "embedding row",
                    expected: vec![emb],
                    found: vec![row.len()],
                });
            }
            flat.extend_from_slice(row);
        }
        Ok(Tensor::from_vec(flat, (rows.len(), emb), self.device())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn learner() -> CodeLearner {
        let ctx = ComputeContext::cpu().with_seed(21);
        CodeLearner::new(CodeShape::new(4, 2, 3, None).unwrap(), &ctx).unwrap()
    }

    #[test]
    fn zero_vector_reconstruction_is_finite() {
        let learner = learner();
        let x = Tensor::zeros((1, 4), DType::F32, &Device::Cpu).unwrap();
        for mode in [EncodeMode::Soft, EncodeMode::Hard, EncodeMode::Deterministic] {
            let out = learner.forward(&x, &EncodeOptions::default(), mode).unwrap();
            assert_eq!(out.dims(), &[1, 4]);
            let values = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
            assert!(values.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn parameters_cover_encoder_and_dictionary() {
        let learner = learner();
        assert_eq!(learner.parameters().len(), 5);
        let names: Vec<_> = learner
            .params()
            .named_vars()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert!(names.contains(&model_dec::SourceDictionary::WEIGHT.to_string()));
        assert!(names.contains(&Encoder::ALPHA_WEIGHT.to_string()));
    }

    #[test]
    fn same_seed_builds_identical_models() {
        let a = learner();
        let b = learner();
        let x = Tensor::new(&[[0.3f32, -0.1, 0.7, 0.2]], &Device::Cpu).unwrap();
        let opts = EncodeOptions::default();
        let ya = a.forward(&x, &opts, EncodeMode::Deterministic).unwrap();
        let yb = b.forward(&x, &opts, EncodeMode::Deterministic).unwrap();
        assert_eq!(ya.to_vec2::<f32>().unwrap(), yb.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn reconstruct_rejects_short_rows() {
        let learner = learner();
        let rows: [&[f32]; 2] = [&[0.0, 0.0, 0.0, 0.0], &[0.0, 0.0]];
        let err = learner
            .reconstruct(&rows, &EncodeOptions::default(), EncodeMode::Hard)
            .unwrap_err();
        assert!(matches!(err, CodingError::ShapeMismatch { .. }));
    }

    #[test]
    fn soft_forward_is_differentiable_through_all_parameters() {
        let learner = learner();
        let x = Tensor::new(&[[0.5f32, -0.5, 0.25, 1.0]], &Device::Cpu).unwrap();
        let y = learner
            .forward(&x, &EncodeOptions::default(), EncodeMode::Soft)
            .unwrap();
        let loss = candle_nn::loss::mse(&y, &x).unwrap();
        let grads = loss.backward().unwrap();
        for var in learner.parameters() {
            assert!(grads.get(var.as_tensor()).is_some());
        }
    }
}
