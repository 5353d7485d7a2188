//! Labeled chunks and annotated examples

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A labeled token span `[start, end)`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Chunk {
    /// Entity type label
    pub label: String,

    /// First token of the chunk
    pub start: usize,

    /// One past the last token of the chunk
    pub end: usize,
}

impl Chunk {
    /// Create a new chunk
    pub fn new(label: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            label: label.into(),
            start,
            end,
        }
    }

    /// Get the span as a tuple
    pub fn span(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    /// Number of tokens covered
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Check if the chunk covers no token
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Check the chunk against a sequence of `seq_len` tokens
    pub fn validate(&self, seq_len: usize) -> Result<()> {
        if self.start >= self.end || self.end > seq_len {
            return Err(Error::Validation(format!(
                "chunk ({}, {}, {}) is out of range for a sequence of {} tokens",
                self.label, self.start, self.end, seq_len
            )));
        }
        Ok(())
    }
}

impl From<(&str, usize, usize)> for Chunk {
    fn from((label, start, end): (&str, usize, usize)) -> Self {
        Self::new(label, start, end)
    }
}

/// A tokenized sequence with optional gold chunks
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Ordered tokens
    pub tokens: Vec<String>,

    /// Gold chunks, absent for unlabeled input
    #[serde(default)]
    pub chunks: Option<Vec<Chunk>>,
}

impl Example {
    /// Create an unlabeled example
    pub fn new<S: Into<String>>(tokens: impl IntoIterator<Item = S>) -> Self {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            chunks: None,
        }
    }

    /// Create a labeled example
    pub fn with_chunks<S: Into<String>>(
        tokens: impl IntoIterator<Item = S>,
        chunks: Vec<Chunk>,
    ) -> Self {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            chunks: Some(chunks),
        }
    }

    /// Split whitespace-separated text into an unlabeled example
    pub fn from_text(text: &str) -> Self {
        Self::new(text.split_whitespace())
    }

    /// Sequence length in tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check if the sequence has no token
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Gold chunks, or an empty slice
    pub fn chunks(&self) -> &[Chunk] {
        self.chunks.as_deref().unwrap_or(&[])
    }

    /// Check every gold chunk lies within the token range
    pub fn validate(&self) -> Result<()> {
        self.chunks()
            .iter()
            .try_for_each(|chunk| chunk.validate(self.tokens.len()))
    }

    /// Text covered by a chunk
    pub fn chunk_text(&self, chunk: &Chunk) -> Option<String> {
        self.tokens
            .get(chunk.start..chunk.end)
            .map(|tokens| tokens.join(" "))
    }
}
