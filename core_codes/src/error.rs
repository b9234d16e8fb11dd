use thiserror::Error;

/// Errors raised while configuring or running the coding model.
#[derive(Debug, Error)]
pub enum CodingError {
    /// A structural dimension (`emb_size`, `M`, `K`, hidden width) was zero.
    #[error("{name} must be positive but was {value}")]
    InvalidDimension { name: &'static str, value: usize },
    /// Relaxation temperature must be finite and strictly positive.
    #[error("temperature must be finite and > 0, got {0}")]
    InvalidTemperature(f64),
    /// Numerical floor must be finite and non-negative.
    #[error("eps must be finite and >= 0, got {0}")]
    InvalidEpsilon(f64),
    /// A tensor handed to the model does not have the configured layout.
    #[error("shape mismatch in {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// A named parameter was not registered in the store.
    #[error("parameter `{0}` is not registered")]
    MissingParameter(String),
    /// The parameter map lock was poisoned by a panicking writer.
    #[error("parameter store lock poisoned")]
    ParamStorePoisoned,
    /// Wrapper around tensor backend failures.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

pub type Result<T, E = CodingError> = std::result::Result<T, E>;
