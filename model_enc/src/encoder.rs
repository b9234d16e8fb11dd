//! Encoder mapping embeddings to M relaxed (or discretized) K-way codes.

use candle_core::{D, DType, Tensor};
use candle_nn::{Linear, Module};
use core_codes::{
    CodeShape, ComputeContext, EncodeMode, EncodeOptions, ParamStore, Result, ensure_shape,
    streams,
};
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use crate::gumbel::{GumbelSoftmax, Relaxation};

/// Output of one encoder pass.
#[derive(Clone, Debug)]
pub struct CodeAssignment {
    /// Code vectors of shape `(B, M, K, 1)`.
    pub codes: Tensor,
    /// Selected symbol per slot, shape `(B, M)`, dtype `u32`.
    pub indices: Tensor,
}

/// Two-layer projection (`tanh`, then `softplus`) followed by a categorical relaxation.
pub struct Encoder {
    shape: CodeShape,
    hidden: Linear,
    alpha: Linear,
    relaxation: Box<dyn Relaxation>,
}

impl Encoder {
    pub const HIDDEN_WEIGHT: &'static str = "encoder.hidden.weight";
    pub const HIDDEN_BIAS: &'static str = "encoder.hidden.bias";
    pub const ALPHA_WEIGHT: &'static str = "encoder.alpha.weight";
    pub const ALPHA_BIAS: &'static str = "encoder.alpha.bias";

    /// Builds an encoder using Gumbel-softmax, registering its weights in `store`.
    pub fn new(shape: CodeShape, store: &ParamStore, ctx: &ComputeContext) -> Result<Self> {
        Self::with_relaxation(
            shape,
            store,
            ctx,
            Box::new(GumbelSoftmax::from_context(ctx)),
        )
    }

    pub fn with_relaxation(
        shape: CodeShape,
        store: &ParamStore,
        ctx: &ComputeContext,
        relaxation: Box<dyn Relaxation>,
    ) -> Result<Self> {
        let mut rng = ctx.rng(streams::ENCODER_INIT);
        let hidden = linear(
            store,
            (Self::HIDDEN_WEIGHT, Self::HIDDEN_BIAS),
            shape.emb_size(),
            shape.hidden_size(),
            &mut rng,
        )?;
        let alpha = linear(
            store,
            (Self::ALPHA_WEIGHT, Self::ALPHA_BIAS),
            shape.hidden_size(),
            shape.m() * shape.k(),
            &mut rng,
        )?;
        Ok(Self {
            shape,
            hidden,
            alpha,
            relaxation,
        })
    }

    pub fn shape(&self) -> &CodeShape {
        &self.shape
    }

    /// Accepts `(emb_size)` as a batch of one or `(B, emb_size)`.
    pub fn batch(&self, x: &Tensor) -> Result<Tensor> {
        let emb = self.shape.emb_size();
        let x = x.to_dtype(DType::F32)?;
        let x = if x.rank() == 1 { x.unsqueeze(0)? } else { x };
        let b = x.dims().first().copied().unwrap_or(1);
        ensure_shape("encoder input", &x, &[b, emb])?;
        Ok(x)
    }

    /// Strictly positive slot weights of shape `(B, M, K)`, floored at `eps`.
    pub fn alpha(&self, x: &Tensor, eps: f64) -> Result<Tensor> {
        let x = self.batch(x)?;
        let b = x.dim(0)?;
        let hidden = self.hidden.forward(&x)?.tanh()?;
        let alpha = softplus(&self.alpha.forward(&hidden)?)?;
        let floor = eps.max(f32::MIN_POSITIVE as f64);
        Ok(alpha
            .reshape((b, self.shape.m(), self.shape.k()))?
            .maximum(floor)?)
    }

    pub fn log_alpha(&self, x: &Tensor, eps: f64) -> Result<Tensor> {
        Ok(self.alpha(x, eps)?.log()?)
    }

    /// Relaxed codes; every `K`-vector is a probability distribution.
    pub fn encode_soft(&self, x: &Tensor, opts: &EncodeOptions) -> Result<CodeAssignment> {
        let soft = self.relaxed(x, opts)?;
        let indices = soft.argmax(D::Minus1)?;
        Ok(CodeAssignment {
            codes: soft.unsqueeze(3)?,
            indices,
        })
    }

    /// One-hot codes at the argmax of the noise-perturbed relaxed sample.
    pub fn encode_hard(&self, x: &Tensor, opts: &EncodeOptions) -> Result<CodeAssignment> {
        let soft = self.relaxed(x, opts)?;
        self.discretize(soft.argmax(D::Minus1)?)
    }

    /// One-hot codes at the argmax of `alpha`; identical inputs give identical codes.
    pub fn encode_deterministic(
        &self,
        x: &Tensor,
        opts: &EncodeOptions,
    ) -> Result<CodeAssignment> {
        opts.validate()?;
        let alpha = self.alpha(x, opts.eps)?;
        self.discretize(alpha.argmax(D::Minus1)?)
    }

    pub fn encode(
        &self,
        x: &Tensor,
        opts: &EncodeOptions,
        mode: EncodeMode,
    ) -> Result<CodeAssignment> {
        match mode {
            EncodeMode::Soft => self.encode_soft(x, opts),
            EncodeMode::Hard => self.encode_hard(x, opts),
            EncodeMode::Deterministic => self.encode_deterministic(x, opts),
        }
    }

    fn relaxed(&self, x: &Tensor, opts: &EncodeOptions) -> Result<Tensor> {
        let tau = opts.validate()?;
        let log_alpha = self.log_alpha(x, opts.eps)?;
        trace!(dims = ?log_alpha.dims(), tau = tau.value(), "relaxing codes");
        self.relaxation.relax(&log_alpha, tau, opts.eps)
    }

    fn discretize(&self, indices: Tensor) -> Result<CodeAssignment> {
        let one_hot = candle_nn::encoding::one_hot(indices.clone(), self.shape.k(), 1f32, 0f32)?;
        Ok(CodeAssignment {
            codes: one_hot.unsqueeze(3)?,
            indices,
        })
    }
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder")
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// Below this input `e^x` is closer to softplus than the f32 sum `1 + e^-|x|` allows.
const SOFTPLUS_EXP_BELOW: f64 = -8.0;

/// `ln(1 + e^x)` as `relu(x) + ln(1 + e^-|x|)`, switching to `e^x` on the far left so that
/// `ln(softplus(x))` keeps tracking `x` and its gradient.
fn softplus(x: &Tensor) -> candle_core::Result<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let stable = (x.relu()? + tail)?;
    // Clamped so the unselected branch never overflows into the gradient.
    let left = x.minimum(SOFTPLUS_EXP_BELOW)?.exp()?;
    x.lt(SOFTPLUS_EXP_BELOW)?.where_cond(&left, &stable)
}

fn linear(
    store: &ParamStore,
    (weight_name, bias_name): (&str, &str),
    in_dim: usize,
    out_dim: usize,
    rng: &mut ChaCha8Rng,
) -> Result<Linear> {
    let bound = 1.0 / (in_dim as f64).sqrt();
    let weight = store.uniform(weight_name, (out_dim, in_dim), bound, rng)?;
    let bias = store.uniform(bias_name, out_dim, bound, rng)?;
    Ok(Linear::new(weight, Some(bias)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use core_codes::CodingError;
    use rstest::rstest;

    fn encoder(emb: usize, m: usize, k: usize) -> Encoder {
        let ctx = ComputeContext::cpu().with_seed(11);
        let store = ParamStore::new(ctx.device());
        let shape = CodeShape::new(emb, m, k, None).unwrap();
        Encoder::new(shape, &store, &ctx).unwrap()
    }

    fn inputs(b: usize, emb: usize) -> Tensor {
        let values: Vec<f32> = (0..b * emb).map(|i| ((i as f32) * 0.37).sin()).collect();
        Tensor::from_vec(values, (b, emb), &Device::Cpu).unwrap()
    }

    fn slots(codes: &Tensor) -> Vec<Vec<f32>> {
        let (b, m, k, _) = codes.dims4().unwrap();
        codes
            .reshape((b * m, k))
            .unwrap()
            .to_vec2::<f32>()
            .unwrap()
    }

    #[rstest]
    #[case(1, 2, 3, 4)]
    #[case(5, 4, 8, 10)]
    #[case(3, 1, 2, 6)]
    fn hard_codes_are_one_hot(
        #[case] b: usize,
        #[case] m: usize,
        #[case] k: usize,
        #[case] emb: usize,
    ) {
        let encoder = encoder(emb, m, k);
        let out = encoder
            .encode_hard(&inputs(b, emb), &EncodeOptions::default())
            .unwrap();
        assert_eq!(out.codes.dims(), &[b, m, k, 1]);
        assert_eq!(out.indices.dims(), &[b, m]);
        let indices: Vec<u32> = out.indices.flatten_all().unwrap().to_vec1().unwrap();
        for (slot, idx) in slots(&out.codes).iter().zip(indices) {
            assert_eq!(slot.iter().sum::<f32>(), 1.0);
            assert_eq!(slot.iter().filter(|v| **v == 1.0).count(), 1);
            assert_eq!(slot[idx as usize], 1.0);
        }
    }

    #[rstest]
    #[case(0.1)]
    #[case(1.0)]
    #[case(10.0)]
    fn soft_codes_are_distributions(#[case] tau: f64) {
        let encoder = encoder(6, 3, 5);
        let out = encoder
            .encode_soft(&inputs(4, 6), &EncodeOptions::with_tau(tau))
            .unwrap();
        assert_eq!(out.codes.dims(), &[4, 3, 5, 1]);
        let indices: Vec<u32> = out.indices.flatten_all().unwrap().to_vec1().unwrap();
        for (slot, idx) in slots(&out.codes).iter().zip(indices) {
            assert!((slot.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            assert!(slot.iter().all(|v| *v >= 0.0));
            let best = slot.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            assert_eq!(slot[idx as usize], best);
        }
    }

    #[test]
    fn single_vector_is_treated_as_batch_of_one() {
        let encoder = encoder(4, 2, 3);
        let x = Tensor::new(&[0.1f32, 0.2, 0.3, 0.4], &Device::Cpu).unwrap();
        let out = encoder.encode_soft(&x, &EncodeOptions::default()).unwrap();
        assert_eq!(out.codes.dims(), &[1, 2, 3, 1]);
    }

    #[test]
    fn wrong_embedding_width_is_rejected() {
        let encoder = encoder(4, 2, 3);
        let err = encoder
            .encode_soft(&inputs(2, 5), &EncodeOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CodingError::ShapeMismatch {
                context: "encoder input",
                ..
            }
        ));
        let rank3 = Tensor::zeros((1, 1, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(encoder.encode_soft(&rank3, &EncodeOptions::default()).is_err());
    }

    #[test]
    fn non_positive_temperature_is_rejected_before_compute() {
        let encoder = encoder(4, 2, 3);
        for tau in [0.0, -1.0, f64::INFINITY] {
            let err = encoder
                .encode_hard(&inputs(1, 4), &EncodeOptions::with_tau(tau))
                .unwrap_err();
            assert!(matches!(err, CodingError::InvalidTemperature(_)));
        }
    }

    #[test]
    fn deterministic_codes_repeat_exactly() {
        let encoder = encoder(8, 4, 6);
        let x = inputs(7, 8);
        let opts = EncodeOptions::default();
        let first: Vec<Vec<u32>> = encoder
            .encode_deterministic(&x, &opts)
            .unwrap()
            .indices
            .to_vec2()
            .unwrap();
        let second: Vec<Vec<u32>> = encoder
            .encode(&x, &opts, EncodeMode::Deterministic)
            .unwrap()
            .indices
            .to_vec2()
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn alpha_stays_positive_for_extreme_inputs() {
        let encoder = encoder(4, 2, 3);
        let x = Tensor::new(&[[1e4f32, -1e4, 1e4, -1e4]], &Device::Cpu).unwrap();
        let log_alpha = encoder.log_alpha(&x, 1e-20).unwrap();
        let values = log_alpha.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn softplus_keeps_relative_precision_everywhere() {
        let inputs = [-80f32, -30.0, -20.0, -12.0, -1.0, 0.0, 1.0, 30.0];
        let x = Tensor::new(&inputs, &Device::Cpu).unwrap();
        let y = softplus(&x).unwrap().to_vec1::<f32>().unwrap();
        for (got, v) in y.iter().zip(inputs) {
            let expected = (v as f64).exp().ln_1p();
            let rel = ((*got as f64 - expected) / expected).abs();
            assert!(rel < 1e-4, "softplus({v}) = {got}, expected {expected}");
        }
    }

    #[rstest]
    #[case(-20.0)]
    #[case(-25.0)]
    #[case(-30.0)]
    fn log_alpha_follows_very_negative_logits(#[case] logit: f32) {
        let ctx = ComputeContext::cpu().with_seed(11);
        let store = ParamStore::new(ctx.device());
        let shape = CodeShape::new(2, 1, 3, None).unwrap();
        let encoder = Encoder::new(shape, &store, &ctx).unwrap();
        let weight = store.get(Encoder::ALPHA_WEIGHT).unwrap();
        store
            .assign(Encoder::ALPHA_WEIGHT, &weight.zeros_like().unwrap())
            .unwrap();
        let bias = store.get(Encoder::ALPHA_BIAS).unwrap();
        let logits = [logit - 5.0, logit, logit - 10.0];
        store
            .assign(
                Encoder::ALPHA_BIAS,
                &Tensor::new(&logits, &Device::Cpu).unwrap(),
            )
            .unwrap();

        let x = Tensor::new(&[[0.3f32, -0.7]], &Device::Cpu).unwrap();
        let log_alpha = encoder.log_alpha(&x, core_codes::DEFAULT_EPS).unwrap();
        let values = log_alpha.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for (got, expected) in values.iter().zip(logits) {
            assert!((got - expected).abs() < 1e-3, "{got} vs {expected}");
        }
        let picked = encoder
            .encode_deterministic(&x, &EncodeOptions::default())
            .unwrap()
            .indices
            .flatten_all()
            .unwrap()
            .to_vec1::<u32>()
            .unwrap();
        assert_eq!(picked, vec![1]);

        let grads = log_alpha.sum_all().unwrap().backward().unwrap();
        let grad = grads
            .get(bias.as_tensor())
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        for g in grad {
            assert!((g - 1.0).abs() < 1e-3, "gradient {g}");
        }
    }
}
