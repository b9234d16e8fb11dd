//! Versioned single-file checkpoints of a [`CodeLearner`].
//!
//! The file is a safetensors archive holding every parameter by name. Its header metadata
//! records the format tag, the schema version and the model dimensions so a loader can
//! validate compatibility before any weight is restored.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use bytemuck::cast_slice;
use candle_core::Tensor;
use core_codes::{CodeShape, CodingError, ComputeContext};
use safetensors::tensor::TensorView;
use safetensors::{SafeTensorError, SafeTensors, serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::learner::CodeLearner;
use crate::snapshot::f32_payload;

pub const CHECKPOINT_FORMAT: &str = "compcode.code_learner";
pub const CHECKPOINT_VERSION: u32 = 1;

/// Errors raised while writing or restoring checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("safetensors error: {0}")]
    SafeTensors(#[from] SafeTensorError),
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
    #[error(transparent)]
    Coding(#[from] CodingError),
    /// The header lacks a required metadata entry.
    #[error("checkpoint metadata is missing `{0}`")]
    MissingMetadata(&'static str),
    /// A metadata entry could not be parsed.
    #[error("checkpoint metadata `{key}` has invalid value {value:?}")]
    InvalidMetadata { key: &'static str, value: String },
    #[error("not a code learner checkpoint (format {0:?})")]
    UnsupportedFormat(String),
    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),
    /// The stored dimensions differ from the model being restored into.
    #[error("checkpoint was written for {found:?}, model is {expected:?}")]
    IncompatibleSchema {
        expected: CodeShape,
        found: CodeShape,
    },
    #[error("checkpoint does not contain tensor `{0}`")]
    MissingTensor(String),
    #[error("tensor `{name}` has dtype {dtype:?}, expected F32")]
    InvalidDType {
        name: String,
        dtype: safetensors::Dtype,
    },
}

/// Header of a checkpoint: everything needed to rebuild a compatible model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointSchema {
    pub version: u32,
    pub shape: CodeShape,
}

impl CheckpointSchema {
    pub fn new(shape: CodeShape) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            shape,
        }
    }

    /// Reads and validates the header of the checkpoint at `path`.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let bytes = read_bytes(path.as_ref())?;
        Self::from_bytes(&bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let (_, header) = SafeTensors::read_metadata(bytes)?;
        let empty = HashMap::new();
        let meta = header.metadata().as_ref().unwrap_or(&empty);
        let format = meta
            .get("format")
            .ok_or(CheckpointError::MissingMetadata("format"))?;
        if format != CHECKPOINT_FORMAT {
            return Err(CheckpointError::UnsupportedFormat(format.clone()));
        }
        let version = parse_field::<u32>(meta, "version")?;
        if version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion(version));
        }
        let shape = CodeShape::new(
            parse_field(meta, "emb_size")?,
            parse_field(meta, "m")?,
            parse_field(meta, "k")?,
            Some(parse_field(meta, "hidden_size")?),
        )?;
        Ok(Self { version, shape })
    }

    fn to_metadata(self) -> HashMap<String, String> {
        HashMap::from([
            ("format".to_string(), CHECKPOINT_FORMAT.to_string()),
            ("version".to_string(), self.version.to_string()),
            ("emb_size".to_string(), self.shape.emb_size().to_string()),
            ("m".to_string(), self.shape.m().to_string()),
            ("k".to_string(), self.shape.k().to_string()),
            (
                "hidden_size".to_string(),
                self.shape.hidden_size().to_string(),
            ),
        ])
    }
}

impl CodeLearner {
    /// Writes every parameter plus the schema header to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        let mut payloads = Vec::new();
        for (name, var) in self.params().named_vars()? {
            let dims = var.dims().to_vec();
            let values = var.as_tensor().flatten_all()?.to_vec1::<f32>()?;
            payloads.push((name, dims, values));
        }
        let views = payloads
            .iter()
            .map(|(name, dims, values)| {
                TensorView::new(
                    safetensors::Dtype::F32,
                    dims.clone(),
                    cast_slice(values.as_slice()),
                )
                .map(|view| (name.clone(), view))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let metadata = CheckpointSchema::new(*self.shape()).to_metadata();
        let bytes = serialize(views, &Some(metadata))?;
        File::create(path)?.write_all(&bytes)?;
        info!(path = %path.display(), tensors = payloads.len(), "checkpoint written");
        Ok(())
    }

    /// Rebuilds a model from the dimensions recorded in the checkpoint, then restores it.
    pub fn load<P: AsRef<Path>>(path: P, ctx: &ComputeContext) -> Result<Self, CheckpointError> {
        let bytes = read_bytes(path.as_ref())?;
        let schema = CheckpointSchema::from_bytes(&bytes)?;
        let learner = CodeLearner::new(schema.shape, ctx)?;
        learner.restore(&bytes)?;
        Ok(learner)
    }

    /// Restores weights into this model, refusing checkpoints of other dimensions.
    pub fn load_into<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let bytes = read_bytes(path.as_ref())?;
        let schema = CheckpointSchema::from_bytes(&bytes)?;
        if schema.shape != *self.shape() {
            return Err(CheckpointError::IncompatibleSchema {
                expected: *self.shape(),
                found: schema.shape,
            });
        }
        self.restore(&bytes)
    }

    fn restore(&self, bytes: &[u8]) -> Result<(), CheckpointError> {
        let tensors = SafeTensors::deserialize(bytes)?;
        for (name, _) in self.params().named_vars()? {
            let view = tensors
                .tensor(&name)
                .map_err(|_| CheckpointError::MissingTensor(name.clone()))?;
            if view.dtype() != safetensors::Dtype::F32 {
                return Err(CheckpointError::InvalidDType {
                    name,
                    dtype: view.dtype(),
                });
            }
            let value = Tensor::from_vec(f32_payload(view.data()), view.shape(), self.device())?;
            self.params().assign(&name, &value)?;
            debug!(tensor = %name, dims = ?view.shape(), "restored parameter");
        }
        Ok(())
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, CheckpointError> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn parse_field<T: std::str::FromStr>(
    meta: &HashMap<String, String>,
    key: &'static str,
) -> Result<T, CheckpointError> {
    let raw = meta.get(key).ok_or(CheckpointError::MissingMetadata(key))?;
    raw.parse().map_err(|_| CheckpointError::InvalidMetadata {
        key,
        value: raw.clone(),
    })
}
