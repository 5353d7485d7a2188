//! Label and token vocabularies
//!
//! Vocabularies are built once from the data partitions and are immutable
//! afterwards; they are passed explicitly to every stage that needs them.

use crate::chunk::{Chunk, Example};
use crate::config::SpanModelConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Bijective mapping between chunk labels and indices
///
/// The none label always sits at index 0; other labels follow in the order
/// they were first seen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LabelList", into = "LabelList")]
pub struct LabelVocab {
    idx2label: Vec<String>,
    label2idx: HashMap<String, u32>,
}

#[derive(Serialize, Deserialize)]
struct LabelList {
    labels: Vec<String>,
}

impl TryFrom<LabelList> for LabelVocab {
    type Error = Error;

    fn try_from(list: LabelList) -> Result<Self> {
        LabelVocab::from_labels(list.labels)
    }
}

impl From<LabelVocab> for LabelList {
    fn from(vocab: LabelVocab) -> Self {
        LabelList {
            labels: vocab.idx2label,
        }
    }
}

impl LabelVocab {
    /// Index of the none label
    pub const NONE_IDX: u32 = 0;

    /// Build from an ordered label list whose first entry is the none label
    pub fn from_labels<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Result<Self> {
        let idx2label: Vec<String> = labels.into_iter().map(Into::into).collect();
        if idx2label.is_empty() {
            return Err(Error::Validation(
                "label vocabulary needs at least the none label".to_string(),
            ));
        }
        let mut label2idx = HashMap::with_capacity(idx2label.len());
        for (idx, label) in idx2label.iter().enumerate() {
            if label2idx.insert(label.clone(), idx as u32).is_some() {
                return Err(Error::Validation(format!("duplicate label `{}`", label)));
            }
        }
        Ok(Self {
            idx2label,
            label2idx,
        })
    }

    /// Build from the chunks of one or more partitions
    pub fn build(none_label: &str, partitions: &[&[Example]]) -> Self {
        let mut idx2label = vec![none_label.to_string()];
        let mut label2idx = HashMap::from([(none_label.to_string(), Self::NONE_IDX)]);
        for chunk in partitions.iter().flat_map(|data| data.iter()).flat_map(Example::chunks) {
            if !label2idx.contains_key(&chunk.label) {
                label2idx.insert(chunk.label.clone(), idx2label.len() as u32);
                idx2label.push(chunk.label.clone());
            }
        }
        Self {
            idx2label,
            label2idx,
        }
    }

    /// Number of labels, none label included
    pub fn len(&self) -> usize {
        self.idx2label.len()
    }

    /// Check if only the none label is present
    pub fn is_empty(&self) -> bool {
        self.idx2label.len() <= 1
    }

    /// The none label
    pub fn none_label(&self) -> &str {
        &self.idx2label[Self::NONE_IDX as usize]
    }

    /// Index of a label
    pub fn index(&self, label: &str) -> Option<u32> {
        self.label2idx.get(label).copied()
    }

    /// Label at an index
    pub fn label(&self, idx: u32) -> Option<&str> {
        self.idx2label.get(idx as usize).map(String::as_str)
    }

    /// All labels in index order
    pub fn labels(&self) -> &[String] {
        &self.idx2label
    }

    /// Load from JSON file
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Save to JSON file
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), data)?;
        Ok(())
    }
}

/// Gold spans too long to be enumerated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OovSpanStats {
    /// Gold chunks seen
    pub num_spans: usize,

    /// Gold chunks longer than the maximum span size
    pub num_oov_spans: usize,
}

impl OovSpanStats {
    /// Count gold chunks longer than `max_span_size`
    pub fn collect(max_span_size: usize, partitions: &[&[Example]]) -> Self {
        partitions
            .iter()
            .flat_map(|data| data.iter())
            .flat_map(Example::chunks)
            .fold(Self::default(), |mut stats, chunk: &Chunk| {
                stats.num_spans += 1;
                if chunk.len() > max_span_size {
                    stats.num_oov_spans += 1;
                }
                stats
            })
    }

    /// Share of gold chunks that are too long
    pub fn ratio(&self) -> f64 {
        if self.num_spans == 0 {
            0.0
        } else {
            self.num_oov_spans as f64 / self.num_spans as f64
        }
    }
}

/// Token vocabulary of the lookup embedder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TokenList", into = "TokenList")]
pub struct TokenVocab {
    idx2token: Vec<String>,
    token2idx: HashMap<String, u32>,
    lowercase: bool,
}

#[derive(Serialize, Deserialize)]
struct TokenList {
    tokens: Vec<String>,
    lowercase: bool,
}

impl From<TokenList> for TokenVocab {
    fn from(list: TokenList) -> Self {
        TokenVocab::from_tokens(list.tokens, list.lowercase)
    }
}

impl From<TokenVocab> for TokenList {
    fn from(vocab: TokenVocab) -> Self {
        TokenList {
            tokens: vocab.idx2token,
            lowercase: vocab.lowercase,
        }
    }
}

impl TokenVocab {
    /// Padding token
    pub const PAD: &'static str = "<pad>";

    /// Unknown token
    pub const UNK: &'static str = "<unk>";

    /// Index of the padding token
    pub const PAD_IDX: u32 = 0;

    /// Index of the unknown token
    pub const UNK_IDX: u32 = 1;

    /// Build from the tokens of one or more partitions
    pub fn build(min_freq: usize, lowercase: bool, partitions: &[&[Example]]) -> Self {
        let mut counts: Vec<(String, usize)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for token in partitions
            .iter()
            .flat_map(|data| data.iter())
            .flat_map(|example| example.tokens.iter())
        {
            let token = Self::normalize(token, lowercase);
            match positions.get(&token) {
                Some(&pos) => counts[pos].1 += 1,
                None => {
                    positions.insert(token.clone(), counts.len());
                    counts.push((token, 1));
                }
            }
        }

        let idx2token: Vec<String> = [Self::PAD.to_string(), Self::UNK.to_string()]
            .into_iter()
            .chain(
                counts
                    .into_iter()
                    .filter(|(_, count)| *count >= min_freq)
                    .map(|(token, _)| token),
            )
            .collect();
        Self::from_tokens(idx2token, lowercase)
    }

    fn from_tokens(idx2token: Vec<String>, lowercase: bool) -> Self {
        let token2idx = idx2token
            .iter()
            .enumerate()
            .map(|(idx, token)| (token.clone(), idx as u32))
            .collect();
        Self {
            idx2token,
            token2idx,
            lowercase,
        }
    }

    fn normalize(token: &str, lowercase: bool) -> String {
        if lowercase {
            token.to_lowercase()
        } else {
            token.to_string()
        }
    }

    /// Number of tokens, special tokens included
    pub fn len(&self) -> usize {
        self.idx2token.len()
    }

    /// Check if only the special tokens are present
    pub fn is_empty(&self) -> bool {
        self.idx2token.len() <= 2
    }

    /// Index of a token, falling back to the unknown token
    pub fn index(&self, token: &str) -> u32 {
        let token = Self::normalize(token, self.lowercase);
        self.token2idx.get(&token).copied().unwrap_or(Self::UNK_IDX)
    }

    /// Indices of a token sequence
    pub fn encode(&self, tokens: &[String]) -> Vec<u32> {
        tokens.iter().map(|token| self.index(token)).collect()
    }
}

/// Vocabularies needed by a span model
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabs {
    /// Token vocabulary of the embedder
    pub tokens: TokenVocab,

    /// Chunk label vocabulary of the decoder
    pub labels: LabelVocab,
}

impl SpanModelConfig {
    /// Build the token and label vocabularies from the data partitions
    pub fn build_vocabs(&self, partitions: &[&[Example]]) -> Vocabs {
        let tokens = TokenVocab::build(
            self.embedder.min_freq,
            self.embedder.lowercase,
            partitions,
        );
        tracing::debug!(num_tokens = tokens.len(), "built token vocabulary");
        Vocabs {
            tokens,
            labels: self.decoder.build_vocab(partitions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> Vec<Example> {
        vec![
            Example::with_chunks(
                ["John", "lives", "in", "New", "York"],
                vec![Chunk::new("PER", 0, 1), Chunk::new("LOC", 3, 5)],
            ),
            Example::with_chunks(["Acme", "hired", "John"], vec![Chunk::new("ORG", 0, 1)]),
        ]
    }

    #[test]
    fn test_label_vocab_order() {
        let data = partition();
        let vocab = LabelVocab::build("<none>", &[&data]);
        assert_eq!(vocab.labels(), &["<none>", "PER", "LOC", "ORG"]);
        assert_eq!(vocab.index("<none>"), Some(0));
        assert_eq!(vocab.index("ORG"), Some(3));
        assert_eq!(vocab.label(2), Some("LOC"));
        assert_eq!(vocab.none_label(), "<none>");
    }

    #[test]
    fn test_label_vocab_multiple_partitions() {
        let train = partition();
        let test = vec![Example::with_chunks(["x"], vec![Chunk::new("MISC", 0, 1)])];
        let vocab = LabelVocab::build("O", &[&train, &test]);
        assert_eq!(vocab.len(), 5);
        assert_eq!(vocab.index("MISC"), Some(4));
    }

    #[test]
    fn test_label_vocab_without_chunks() {
        let data = vec![Example::from_text("no labels here")];
        let vocab = LabelVocab::build("<none>", &[&data]);
        assert_eq!(vocab.len(), 1);
        assert!(vocab.is_empty());
    }

    #[test]
    fn test_label_vocab_duplicate_rejected() {
        assert!(LabelVocab::from_labels(["<none>", "PER", "PER"]).is_err());
        assert!(LabelVocab::from_labels(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_label_vocab_json() {
        let data = partition();
        let vocab = LabelVocab::build("<none>", &[&data]);
        let json = serde_json::to_string(&vocab).unwrap();
        let restored: LabelVocab = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, vocab);
    }

    #[test]
    fn test_oov_span_stats() {
        let data = partition();
        let stats = OovSpanStats::collect(1, &[&data]);
        assert_eq!(stats.num_spans, 3);
        assert_eq!(stats.num_oov_spans, 1);
        assert!((stats.ratio() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(OovSpanStats::default().ratio(), 0.0);
    }

    #[test]
    fn test_token_vocab() {
        let data = partition();
        let vocab = TokenVocab::build(2, false, &[&data]);
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.index("John"), 2);
        assert_eq!(vocab.index("York"), TokenVocab::UNK_IDX);

        let lower = TokenVocab::build(1, true, &[&data]);
        assert_eq!(lower.index("JOHN"), lower.index("john"));
        assert_eq!(
            lower.encode(&["acme".to_string(), "zzz".to_string()]),
            vec![lower.index("Acme"), TokenVocab::UNK_IDX]
        );

        let json = serde_json::to_string(&lower).unwrap();
        let restored: TokenVocab = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.index("hired"), lower.index("hired"));
    }
}
