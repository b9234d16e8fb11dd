//! Text embedding files: one `word v1 ... vD` entry per line, as distributed with GloVe.
//! A leading `count dims` header (word2vec text format) is skipped.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use model_enc::EmbeddingTable;
use tracing::{debug, info};

use crate::DatasetError;

/// Reads a text embedding file through a memory map.
pub fn read_text_embeddings<P: AsRef<Path>>(path: P) -> Result<EmbeddingTable, DatasetError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Err(DatasetError::Empty(path.to_path_buf()));
    }
    let mmap = unsafe { Mmap::map(&file)? };
    let text = std::str::from_utf8(&mmap).map_err(|source| DatasetError::InvalidUtf8 {
        path: path.to_path_buf(),
        source,
    })?;
    let table = parse_text_embeddings(text)?
        .ok_or_else(|| DatasetError::Empty(path.to_path_buf()))?;
    info!(
        path = %path.display(),
        words = table.len(),
        dims = table.dimension(),
        "loaded text embeddings"
    );
    Ok(table)
}

fn parse_text_embeddings(text: &str) -> Result<Option<EmbeddingTable>, DatasetError> {
    let mut dims: Option<usize> = None;
    let mut entries = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let mut tokens = line.split_whitespace();
        let Some(word) = tokens.next() else {
            continue;
        };
        let values: Vec<&str> = tokens.collect();
        if index == 0 && is_header(word, &values) {
            debug!(header = line, "skipping embedding header");
            continue;
        }
        if values.is_empty() {
            return Err(DatasetError::MissingVector { line: line_no });
        }
        let vector = values
            .iter()
            .map(|token| {
                token.parse::<f32>().map_err(|_| DatasetError::InvalidNumber {
                    line: line_no,
                    token: (*token).to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let expected = *dims.get_or_insert(vector.len());
        if vector.len() != expected {
            return Err(DatasetError::DimensionMismatch {
                line: line_no,
                expected,
                found: vector.len(),
            });
        }
        entries.push((word, vector));
    }
    let Some(dims) = dims else {
        return Ok(None);
    };
    let mut table = EmbeddingTable::new(dims)?;
    let mut duplicates = 0usize;
    for (word, vector) in entries {
        if table.contains(word) {
            duplicates += 1;
        }
        table.insert(word, vector)?;
    }
    if duplicates > 0 {
        debug!(duplicates, "later entries replaced duplicated words");
    }
    Ok(Some(table))
}

fn is_header(first: &str, rest: &[&str]) -> bool {
    rest.len() == 1 && first.parse::<usize>().is_ok() && rest[0].parse::<usize>().is_ok()
}

/// Newline separated words; surrounding whitespace is trimmed and blank lines skipped.
pub fn read_word_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>, DatasetError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_glove_lines_and_skips_blanks() {
        let file = file_with("the 0.1 0.2 0.3\n\nmovie -1 0 1.5\n");
        let table = read_text_embeddings(file.path()).unwrap();
        assert_eq!(table.dimension(), 3);
        assert_eq!(table.words(), &["the".to_string(), "movie".to_string()]);
        assert_eq!(table.lookup("movie"), Some(&[-1.0f32, 0.0, 1.5][..]));
    }

    #[test]
    fn word2vec_header_is_skipped() {
        let file = file_with("2 2\na 1 2\nb 3 4\n");
        let table = read_text_embeddings(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert!(!table.contains("2"));
    }

    #[test]
    fn inconsistent_dimensions_report_the_line() {
        let file = file_with("a 1 2 3\nb 1 2\n");
        assert!(matches!(
            read_text_embeddings(file.path()),
            Err(DatasetError::DimensionMismatch {
                line: 2,
                expected: 3,
                found: 2
            })
        ));
        let file = file_with("a 1 x\n");
        assert!(matches!(
            read_text_embeddings(file.path()),
            Err(DatasetError::InvalidNumber { line: 1, .. })
        ));
        let file = file_with("a 1\nlonely\n");
        assert!(matches!(
            read_text_embeddings(file.path()),
            Err(DatasetError::MissingVector { line: 2 })
        ));
    }

    #[test]
    fn empty_files_are_rejected() {
        let file = file_with("");
        assert!(matches!(
            read_text_embeddings(file.path()),
            Err(DatasetError::Empty(_))
        ));
        let file = file_with("\n\n");
        assert!(matches!(
            read_text_embeddings(file.path()),
            Err(DatasetError::Empty(_))
        ));
    }

    #[test]
    fn word_lists_are_trimmed() {
        let file = file_with("  good \n\nbad\n");
        assert_eq!(
            read_word_list(file.path()).unwrap(),
            vec!["good".to_string(), "bad".to_string()]
        );
    }
}
