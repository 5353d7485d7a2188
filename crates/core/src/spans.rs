//! Candidate span enumeration and negative sampling

use crate::chunk::{Chunk, Example};
use crate::config::{SpanClassifierConfig, SpanModelConfig};
use crate::error::{Error, Result};
use crate::vocab::{LabelVocab, OovSpanStats, Vocabs};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// A candidate token range `[start, end)`
pub type Span = (usize, usize);

/// Every span of at most `max_span_size` tokens in a sequence of `seq_len` tokens
///
/// Spans are ordered by start, then by end.
pub fn enumerate_spans(seq_len: usize, max_span_size: usize) -> Vec<Span> {
    let mut spans = Vec::with_capacity(num_candidate_spans(seq_len, max_span_size));
    for start in 0..seq_len {
        for end in (start + 1)..=(start + max_span_size).min(seq_len) {
            spans.push((start, end));
        }
    }
    spans
}

/// Number of spans [`enumerate_spans`] yields
pub fn num_candidate_spans(seq_len: usize, max_span_size: usize) -> usize {
    (1..=max_span_size.min(seq_len))
        .map(|size| seq_len - size + 1)
        .sum()
}

/// Size embedding index of a span: `min(len - 1, max_span_size - 1)`
pub fn span_size_id((start, end): Span, max_span_size: usize) -> u32 {
    let size = end.saturating_sub(start).max(1);
    (size.min(max_span_size.max(1)) - 1) as u32
}

/// Candidate spans of one example with their size indices and gold labels
///
/// Positives (training only) come first, in chunk order, followed by the
/// negatives. Spans never repeat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanSet {
    chunks: Option<Vec<Chunk>>,
    spans: Vec<Span>,
    num_positives: usize,
    span_size_ids: Vec<u32>,
    label_ids: Option<Vec<u32>>,
}

impl SpanSet {
    /// Build the span set of an example
    ///
    /// In training, gold spans are always kept regardless of their length and
    /// at most `num_neg_chunks` negatives are sampled from `rng`. Otherwise
    /// every span up to `max_span_size` is a candidate.
    pub fn new<R: Rng + ?Sized>(
        example: &Example,
        config: &SpanClassifierConfig,
        vocab: &LabelVocab,
        training: bool,
        rng: &mut R,
    ) -> Result<Self> {
        example.validate()?;
        let seq_len = example.tokens.len();

        let positives: Vec<Span> = if training {
            let chunks = example.chunks.as_ref().ok_or_else(|| {
                Error::Validation("training example has no chunk annotation".to_string())
            })?;
            let mut seen = HashSet::with_capacity(chunks.len());
            chunks
                .iter()
                .map(Chunk::span)
                .filter(|span| seen.insert(*span))
                .collect()
        } else {
            Vec::new()
        };

        let excluded: HashSet<Span> = positives.iter().copied().collect();
        let mut negatives: Vec<Span> = enumerate_spans(seq_len, config.max_span_size)
            .into_iter()
            .filter(|span| !excluded.contains(span))
            .collect();

        if training && negatives.len() > config.num_neg_chunks {
            negatives = negatives
                .choose_multiple(rng, config.num_neg_chunks)
                .copied()
                .collect();
        }

        let num_positives = positives.len();
        let mut spans = positives;
        spans.extend(negatives);

        let span_size_ids = spans
            .iter()
            .map(|&span| span_size_id(span, config.max_span_size))
            .collect();

        let label_ids = match &example.chunks {
            Some(chunks) => Some(Self::gold_label_ids(chunks, &spans, vocab)?),
            None => None,
        };

        Ok(Self {
            chunks: example.chunks.clone(),
            spans,
            num_positives,
            span_size_ids,
            label_ids,
        })
    }

    fn gold_label_ids(chunks: &[Chunk], spans: &[Span], vocab: &LabelVocab) -> Result<Vec<u32>> {
        let mut span2label: HashMap<Span, u32> = HashMap::with_capacity(chunks.len());
        for chunk in chunks {
            let idx = vocab.index(&chunk.label).ok_or_else(|| {
                Error::Validation(format!("label `{}` is not in the vocabulary", chunk.label))
            })?;
            span2label.entry(chunk.span()).or_insert(idx);
        }
        Ok(spans
            .iter()
            .map(|span| span2label.get(span).copied().unwrap_or(LabelVocab::NONE_IDX))
            .collect())
    }

    /// Gold chunks, if the example was labeled
    pub fn chunks(&self) -> Option<&[Chunk]> {
        self.chunks.as_deref()
    }

    /// All candidate spans
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Gold spans placed at the front of [`SpanSet::spans`]
    pub fn positives(&self) -> &[Span] {
        &self.spans[..self.num_positives]
    }

    /// Sampled or enumerated spans after the positives
    pub fn negatives(&self) -> &[Span] {
        &self.spans[self.num_positives..]
    }

    /// Size embedding index of each span
    pub fn span_size_ids(&self) -> &[u32] {
        &self.span_size_ids
    }

    /// Gold label index of each span, if the example was labeled
    pub fn label_ids(&self) -> Option<&[u32]> {
        self.label_ids.as_deref()
    }

    /// Number of candidate spans
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Check if there is no candidate span
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

impl SpanClassifierConfig {
    /// Build the label vocabulary, reporting gold spans longer than `max_span_size`
    ///
    /// Such spans are never enumerated as candidates at inference time, so they
    /// cap the achievable recall.
    pub fn build_vocab(&self, partitions: &[&[Example]]) -> LabelVocab {
        let vocab = LabelVocab::build(&self.none_label, partitions);
        tracing::debug!(num_labels = vocab.len(), "built label vocabulary");

        let stats = OovSpanStats::collect(self.max_span_size, partitions);
        if stats.num_oov_spans > 0 {
            tracing::warn!(
                "OOV positive spans: {} ({:.2}%)",
                stats.num_oov_spans,
                stats.ratio() * 100.0
            );
        }
        vocab
    }

    /// Data preparation hook: the span set of one example
    pub fn exemplify<R: Rng + ?Sized>(
        &self,
        example: &Example,
        vocab: &LabelVocab,
        training: bool,
        rng: &mut R,
    ) -> Result<SpanSet> {
        SpanSet::new(example, self, vocab, training, rng)
    }

    /// Data preparation hook: collect the span sets of a batch
    pub fn batchify(&self, span_sets: impl IntoIterator<Item = SpanSet>) -> Vec<SpanSet> {
        span_sets.into_iter().collect()
    }
}

/// Token ids and span set of one example, ready for batching
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedExample {
    /// Token vocabulary index of each token
    pub token_ids: Vec<u32>,

    /// Candidate spans of the decoder
    pub span_set: SpanSet,
}

impl PreparedExample {
    /// Number of tokens
    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    /// Check if the example has no token
    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }
}

impl SpanModelConfig {
    /// Data preparation hook of the whole model
    pub fn exemplify<R: Rng + ?Sized>(
        &self,
        example: &Example,
        vocabs: &Vocabs,
        training: bool,
        rng: &mut R,
    ) -> Result<PreparedExample> {
        Ok(PreparedExample {
            token_ids: vocabs.tokens.encode(&example.tokens),
            span_set: self
                .decoder
                .exemplify(example, &vocabs.labels, training, rng)?,
        })
    }
}
