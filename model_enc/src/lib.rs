//! Encoder side of the compositional code model: Gumbel relaxation, the two-layer code
//! encoder and the source embedding lookup it reads from.

pub mod encoder;
pub mod gumbel;
pub mod table;

pub use encoder::{CodeAssignment, Encoder};
pub use gumbel::{GumbelSampler, GumbelSoftmax, Relaxation, gumbel_softmax};
pub use table::{EmbeddingTable, EmbeddingTableError};
