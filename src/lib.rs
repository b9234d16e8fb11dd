//! Compositional `M x K` codes for word embeddings: a Gumbel-softmax autoencoder that learns
//! to rebuild every vector from `M` discrete symbols, and the tooling to train it, swap coded
//! vectors into task embedding tables and export the codes.

pub use core_codes::{
    CodeShape, CodingError, ComputeContext, DEFAULT_EPS, EncodeMode, EncodeOptions, ParamStore,
    Temperature,
};
pub use model_dec::{Decoder, SourceDictionary};
pub use model_enc::{
    CodeAssignment, EmbeddingTable, Encoder, GumbelSampler, GumbelSoftmax, Relaxation,
    gumbel_softmax,
};
pub use model_learner::{
    AssembledTable, CheckpointSchema, CodeLearner, Codebook, EmbeddingSnapshot, TableAssembler,
    TableKind,
};

pub use datasets;
pub use evalbench;
pub use trainer;
