//! Discrete codes of a vocabulary, exported as a long-format parquet table.
//!
//! Each row holds one `(word, slot, code)` triple; a word occupies `M` consecutive rows with
//! slots `0..M`. The file's key-value metadata records `m` and `k`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use candle_core::Tensor;
use core_codes::{CodingError, EncodeMode, EncodeOptions};
use model_dec::Decoder;
use model_enc::EmbeddingTable;
use parquet::data_type::{ByteArray, ByteArrayType, Int32Type};
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::RowAccessor;
use parquet::schema::parser::parse_message_type;
use thiserror::Error;
use tracing::{info, instrument};

use crate::learner::CodeLearner;

const SCHEMA: &str = "message codebook {\n  REQUIRED BYTE_ARRAY word (UTF8);\n  REQUIRED INT32 slot;\n  REQUIRED INT32 code;\n}";

#[derive(Debug, Error)]
pub enum CodebookError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error(transparent)]
    Coding(#[from] CodingError),
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
    #[error("codebook metadata is missing `{0}`")]
    MissingMetadata(&'static str),
    #[error("codebook metadata `{key}` has invalid value {value:?}")]
    InvalidMetadata { key: &'static str, value: String },
    /// A row breaks the `M` consecutive slots per word layout or holds a code `>= K`.
    #[error("row {row}: {reason}")]
    Malformed { row: usize, reason: String },
    #[error("value {0} exceeds parquet INT32 range")]
    Overflow(usize),
    #[error("word `{0}` appears twice")]
    DuplicateWord(String),
}

/// `M` code indices per word, in word order.
#[derive(Clone, Debug, PartialEq)]
pub struct Codebook {
    m: usize,
    k: usize,
    words: Vec<String>,
    codes: Vec<u32>,
    index: HashMap<String, usize>,
}

impl Codebook {
    pub fn new(m: usize, k: usize) -> Result<Self, CodebookError> {
        if m == 0 || k == 0 {
            return Err(CodingError::InvalidDimension {
                name: if m == 0 { "M" } else { "K" },
                value: 0,
            }
            .into());
        }
        Ok(Self {
            m,
            k,
            words: Vec::new(),
            codes: Vec::new(),
            index: HashMap::new(),
        })
    }

    /// Appends the codes of a new word.
    pub fn push(&mut self, word: impl Into<String>, codes: &[u32]) -> Result<(), CodebookError> {
        let word = word.into();
        if codes.len() != self.m {
            return Err(CodingError::ShapeMismatch {
                context: "codebook entry",
                expected: vec![self.m],
                found: vec![codes.len()],
            }
            .into());
        }
        if let Some(code) = codes.iter().find(|code| **code as usize >= self.k) {
            return Err(CodebookError::Malformed {
                row: self.words.len() * self.m,
                reason: format!("code {code} outside alphabet of {}", self.k),
            });
        }
        if self.index.contains_key(&word) {
            return Err(CodebookError::DuplicateWord(word));
        }
        self.index.insert(word.clone(), self.words.len());
        self.words.push(word);
        self.codes.extend_from_slice(codes);
        Ok(())
    }

    /// Encodes every word of `source` with the learner, `batch_size` words at a time.
    #[instrument(skip_all, fields(words = source.len(), mode = ?mode))]
    pub fn build(
        learner: &CodeLearner,
        source: &EmbeddingTable,
        opts: &EncodeOptions,
        mode: EncodeMode,
        batch_size: usize,
    ) -> Result<Self, CodebookError> {
        let shape = learner.shape();
        let mut codebook = Self::new(shape.m(), shape.k())?;
        let entries: Vec<(&str, &[f32])> = source.iter().collect();
        for chunk in entries.chunks(batch_size.max(1)) {
            let rows: Vec<&[f32]> = chunk.iter().map(|(_, vector)| *vector).collect();
            let batch = learner.batch_tensor(&rows)?;
            let indices = learner.encode(&batch, opts, mode)?.indices.to_vec2::<u32>()?;
            for ((word, _), codes) in chunk.iter().zip(indices) {
                codebook.push(*word, &codes)?;
            }
        }
        info!(words = codebook.len(), bits = shape.code_bits(), "codebook built");
        Ok(codebook)
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn codes(&self, word: &str) -> Option<&[u32]> {
        self.index
            .get(word)
            .map(|&row| &self.codes[row * self.m..(row + 1) * self.m])
    }

    /// Row-major `(len, M)` code matrix.
    pub fn as_flat(&self) -> &[u32] {
        &self.codes
    }

    /// Number of words sharing their full code with an earlier word.
    pub fn collisions(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        self.codes
            .chunks(self.m)
            .filter(|code| !seen.insert(*code))
            .count()
    }

    /// Rebuilds embeddings `(len, emb_size)` from the codes and the decoder's dictionaries.
    pub fn reconstruct(&self, decoder: &Decoder) -> Result<Tensor, CodebookError> {
        let dictionary = decoder.dictionary().weight();
        let indices = Tensor::from_slice(&self.codes, (self.len(), self.m), dictionary.device())?;
        Ok(decoder.decode_indices(&indices)?)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), CodebookError> {
        let schema = Arc::new(parse_message_type(SCHEMA)?);
        let props = Arc::new(
            WriterProperties::builder()
                .set_key_value_metadata(Some(vec![
                    KeyValue::new("m".to_string(), self.m.to_string()),
                    KeyValue::new("k".to_string(), self.k.to_string()),
                ]))
                .build(),
        );
        let mut words = Vec::with_capacity(self.codes.len());
        let mut slots = Vec::with_capacity(self.codes.len());
        for word in &self.words {
            for slot in 0..self.m {
                words.push(ByteArray::from(word.as_str()));
                slots.push(to_i32(slot)?);
            }
        }
        let codes = self
            .codes
            .iter()
            .map(|code| to_i32(*code as usize))
            .collect::<Result<Vec<_>, _>>()?;

        let file = std::fs::File::create(path.as_ref())?;
        let mut writer = SerializedFileWriter::new(file, schema, props)?;
        {
            let mut row_group = writer.next_row_group()?;
            if let Some(mut col) = row_group.next_column()? {
                col.typed::<ByteArrayType>()
                    .write_batch(&words, None, None)?;
                col.close()?;
            }
            if let Some(mut col) = row_group.next_column()? {
                col.typed::<Int32Type>().write_batch(&slots, None, None)?;
                col.close()?;
            }
            if let Some(mut col) = row_group.next_column()? {
                col.typed::<Int32Type>().write_batch(&codes, None, None)?;
                col.close()?;
            }
            row_group.close()?;
        }
        writer.close()?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, CodebookError> {
        let file = std::fs::File::open(path.as_ref())?;
        let reader = SerializedFileReader::new(file)?;
        let meta: HashMap<String, String> = reader
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .map(|pairs| {
                pairs
                    .iter()
                    .filter_map(|kv| kv.value.clone().map(|value| (kv.key.clone(), value)))
                    .collect()
            })
            .unwrap_or_default();
        let mut codebook = Self::new(parse_meta(&meta, "m")?, parse_meta(&meta, "k")?)?;

        let mut pending: Option<(String, Vec<u32>)> = None;
        for (row_index, row) in reader.get_row_iter(None)?.enumerate() {
            let row = row?;
            let word = row.get_string(0)?;
            let slot = row.get_int(1)?;
            let code = row.get_int(2)?;
            let malformed = |reason: String| CodebookError::Malformed {
                row: row_index,
                reason,
            };
            let code = u32::try_from(code).map_err(|_| malformed(format!("negative code {code}")))?;
            let expected_slot = match &pending {
                Some((current, codes)) if current == word => codes.len(),
                _ => 0,
            };
            if usize::try_from(slot).ok() != Some(expected_slot) {
                return Err(malformed(format!(
                    "expected slot {expected_slot} for `{word}`, found {slot}"
                )));
            }
            let (current, mut codes) = match pending.take() {
                Some((current, codes)) if expected_slot > 0 => (current, codes),
                Some((previous, codes)) => {
                    return Err(malformed(format!(
                        "`{previous}` has {} of {} slots",
                        codes.len(),
                        codebook.m
                    )));
                }
                None => (word.clone(), Vec::with_capacity(codebook.m)),
            };
            codes.push(code);
            if codes.len() == codebook.m {
                codebook.push(current, &codes)?;
            } else {
                pending = Some((current, codes));
            }
        }
        if let Some((word, codes)) = pending {
            return Err(CodebookError::Malformed {
                row: codebook.codes.len() + codes.len(),
                reason: format!("`{word}` has {} of {} slots", codes.len(), codebook.m),
            });
        }
        Ok(codebook)
    }
}

fn to_i32(value: usize) -> Result<i32, CodebookError> {
    i32::try_from(value).map_err(|_| CodebookError::Overflow(value))
}

fn parse_meta(meta: &HashMap<String, String>, key: &'static str) -> Result<usize, CodebookError> {
    let raw = meta.get(key).ok_or(CodebookError::MissingMetadata(key))?;
    raw.parse().map_err(|_| CodebookError::InvalidMetadata {
        key,
        value: raw.clone(),
    })
}
