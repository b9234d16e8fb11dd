//! Shared building blocks of the compositional code model: dimensions, call options,
//! device/seed context, parameter storage and the error taxonomy.

pub mod context;
pub mod error;
pub mod params;
pub mod shape;

pub use context::{ComputeContext, streams};
pub use error::{CodingError, Result};
pub use params::ParamStore;
pub use shape::{CodeShape, DEFAULT_EPS, EncodeMode, EncodeOptions, Temperature, ensure_shape};
