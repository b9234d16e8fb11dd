//! Vocabulary enumeration with reserved unknown and padding entries.

use std::collections::HashMap;

pub const UNK: &str = "<unk>";
pub const PAD: &str = "<pad>";

/// Dense word ids; `<unk>` is 0 and `<pad>` is 1.
#[derive(Clone, Debug, PartialEq)]
pub struct Vocabulary {
    words: Vec<String>,
    index: HashMap<String, usize>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let mut vocab = Self {
            words: Vec::new(),
            index: HashMap::new(),
        };
        vocab.push(UNK);
        vocab.push(PAD);
        vocab
    }
}

impl Vocabulary {
    pub const UNK_ID: usize = 0;
    pub const PAD_ID: usize = 1;

    /// Keeps the first occurrence of every word, after the reserved entries.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab = Self::default();
        for word in words {
            vocab.push(word.as_ref());
        }
        vocab
    }

    /// Counts tokens and keeps those seen at least `min_freq` times, most frequent first and
    /// ties in lexicographic order.
    pub fn from_tokens<I, S>(tokens: I, min_freq: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for token in tokens {
            *counts.entry(token.as_ref().to_string()).or_default() += 1;
        }
        let mut ranked: Vec<_> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_freq.max(1))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self::from_words(ranked.into_iter().map(|(word, _)| word))
    }

    fn push(&mut self, word: &str) {
        if !self.index.contains_key(word) {
            self.index.insert(word.to_string(), self.words.len());
            self.words.push(word.to_string());
        }
    }

    /// Id of `word`, or of `<unk>` when it is not in the vocabulary.
    pub fn id(&self, word: &str) -> usize {
        self.index.get(word).copied().unwrap_or(Self::UNK_ID)
    }

    pub fn word(&self, id: usize) -> Option<&str> {
        self.words.get(id).map(String::as_str)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.index.contains_key(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Words in id order, reserved entries included.
    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.words.iter().map(String::as_str).enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn reserved_entries_come_first() {
        let vocab = Vocabulary::from_words(["film", "<pad>", "plot", "film"]);
        assert_eq!(vocab.words(), &["<unk>", "<pad>", "film", "plot"]);
        assert_eq!(vocab.id(UNK), Vocabulary::UNK_ID);
        assert_eq!(vocab.id(PAD), Vocabulary::PAD_ID);
        assert_eq!(vocab.word(3), Some("plot"));
        assert_eq!(vocab.word(4), None);
    }

    #[test]
    fn tokens_are_ranked_by_frequency_then_spelling() {
        let tokens = "b a c a b a d".split(' ');
        let vocab = Vocabulary::from_tokens(tokens, 1);
        let ranked: Vec<_> = vocab.iter().skip(2).map(|(_, word)| word).collect();
        assert_eq!(ranked, vec!["a", "b", "c", "d"]);
    }

    #[rstest]
    #[case(1, 6)]
    #[case(2, 4)]
    #[case(3, 3)]
    #[case(4, 2)]
    fn min_freq_filters_rare_tokens(#[case] min_freq: usize, #[case] expected_len: usize) {
        let tokens = "b a c a b a d".split(' ');
        assert_eq!(Vocabulary::from_tokens(tokens, min_freq).len(), expected_len);
    }

    #[test]
    fn unknown_words_map_to_unk() {
        let vocab = Vocabulary::from_words(["good"]);
        assert_eq!(vocab.id("good"), 2);
        assert_eq!(vocab.id("great"), Vocabulary::UNK_ID);
        assert!(!vocab.contains("great"));
    }
}
