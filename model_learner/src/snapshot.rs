//! Utilities for persisting assembled embedding tables to safetensors snapshots.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use bytemuck::cast_slice;
use candle_core::{Device, Tensor};
use safetensors::tensor::TensorView;
use safetensors::{SafeTensorError, SafeTensors, serialize};
use thiserror::Error;

/// Errors that can occur while reading or writing embedding snapshots.
#[derive(Debug, Error)]
pub enum EmbeddingSnapshotError {
    /// Wrapper around IO failures when accessing the snapshot file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Raised when the safetensors payload is malformed.
    #[error("safetensors error: {0}")]
    SafeTensors(#[from] SafeTensorError),
    /// Raised when tensor conversion fails.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
    /// Raised when the provided tensor is not two dimensional.
    #[error("embedding tensor must be two dimensional")]
    InvalidShape,
    /// Raised when the safetensors tensor has an unexpected dtype.
    #[error("expected f32 tensor but found {0:?}")]
    InvalidDType(safetensors::Dtype),
    /// Raised when the `kind` metadata entry is missing or unknown.
    #[error("unknown table kind {0:?}")]
    UnknownKind(Option<String>),
}

/// Where the rows of an assembled table came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableKind {
    /// Rows copied verbatim from the source embeddings.
    Baseline,
    /// Rows synthesised from discrete codes.
    Coded,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Baseline => "baseline",
            TableKind::Coded => "coded",
        }
    }

    fn parse(value: Option<&String>) -> Result<Self, EmbeddingSnapshotError> {
        match value.map(String::as_str) {
            Some("baseline") => Ok(TableKind::Baseline),
            Some("coded") => Ok(TableKind::Coded),
            other => Err(EmbeddingSnapshotError::UnknownKind(
                other.map(str::to_string),
            )),
        }
    }
}

/// Snapshot storing a single embedding table backed by f32 weights.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingSnapshot {
    kind: TableKind,
    rows: usize,
    dims: usize,
    data: Vec<f32>,
}

impl EmbeddingSnapshot {
    const TENSOR_NAME: &'static str = "embeddings";
    const KIND_KEY: &'static str = "kind";

    /// Wraps a row-major payload; `data.len()` must equal `rows * dims`.
    pub fn new(
        kind: TableKind,
        rows: usize,
        dims: usize,
        data: Vec<f32>,
    ) -> Result<Self, EmbeddingSnapshotError> {
        if rows.checked_mul(dims) != Some(data.len()) {
            return Err(EmbeddingSnapshotError::InvalidShape);
        }
        Ok(Self {
            kind,
            rows,
            dims,
            data,
        })
    }

    /// Creates a snapshot from a Candle tensor.
    pub fn from_tensor(kind: TableKind, tensor: &Tensor) -> Result<Self, EmbeddingSnapshotError> {
        let (rows, dims) = tensor
            .dims2()
            .map_err(|_| EmbeddingSnapshotError::InvalidShape)?;
        let data = tensor.to_vec2::<f32>()?.into_iter().flatten().collect();
        Ok(Self {
            kind,
            rows,
            dims,
            data,
        })
    }

    /// Restores the snapshot into a tensor located on the supplied device.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor, candle_core::Error> {
        Tensor::from_slice(&self.data, (self.rows, self.dims), device)
    }

    /// Writes the snapshot to a safetensors file.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), EmbeddingSnapshotError> {
        let path = path.as_ref();
        let tensor_view = TensorView::new(
            safetensors::Dtype::F32,
            vec![self.rows, self.dims],
            cast_slice(self.data.as_slice()),
        )?;
        let metadata = HashMap::from([(
            Self::KIND_KEY.to_string(),
            self.kind.as_str().to_string(),
        )]);
        let serialized = serialize(
            std::iter::once((Self::TENSOR_NAME.to_string(), tensor_view)),
            &Some(metadata),
        )?;
        let mut file = File::create(path)?;
        file.write_all(&serialized)?;
        Ok(())
    }

    /// Reads a snapshot from a safetensors file.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, EmbeddingSnapshotError> {
        let path = path.as_ref();
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        let (_, header) = SafeTensors::read_metadata(&bytes)?;
        let kind = TableKind::parse(
            header
                .metadata()
                .as_ref()
                .and_then(|meta| meta.get(Self::KIND_KEY)),
        )?;
        let tensors = SafeTensors::deserialize(&bytes)?;
        let tensor = tensors.tensor(Self::TENSOR_NAME)?;
        if tensor.dtype() != safetensors::Dtype::F32 {
            return Err(EmbeddingSnapshotError::InvalidDType(tensor.dtype()));
        }
        let shape = tensor.shape();
        if shape.len() != 2 {
            return Err(EmbeddingSnapshotError::InvalidShape);
        }
        let rows = shape[0];
        let dims = shape[1];
        let data = f32_payload(tensor.data());
        Ok(Self {
            kind,
            rows,
            dims,
            data,
        })
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Returns the number of embeddings stored in the snapshot.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Returns the embedding dimensionality.
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// Little-endian f32 payload; copies byte-wise when the buffer is not 4-byte aligned.
pub(crate) fn f32_payload(bytes: &[u8]) -> Vec<f32> {
    match bytemuck::try_cast_slice::<u8, f32>(bytes) {
        Ok(values) => values.to_vec(),
        Err(_) => bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    }
}
