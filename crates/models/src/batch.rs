//! Padded batches of prepared examples

use crate::tensor::{keep_mask, padding_mask, ToSpannerResult};
use candle_core::{Device, Tensor};
use spanner_core::error::Result;
use spanner_core::spans::{PreparedExample, SpanSet};
use spanner_core::vocab::TokenVocab;

/// A batch of examples padded to the longest one
#[derive(Clone, Debug)]
pub struct Batch {
    /// (batch, step) u32 token ids, padded with the padding index
    pub token_ids: Tensor,

    /// Number of tokens of each example
    pub seq_lens: Vec<usize>,

    /// (batch, step) u8, 1 at padding positions
    pub mask: Tensor,

    /// Span set of each example
    pub span_sets: Vec<SpanSet>,
}

impl Batch {
    /// Pad and stack `examples` on `device`
    pub fn from_examples(examples: Vec<PreparedExample>, device: &Device) -> Result<Self> {
        let seq_lens: Vec<usize> = examples.iter().map(PreparedExample::len).collect();
        let max_len = seq_lens.iter().copied().max().unwrap_or(0);

        let mut ids = Vec::with_capacity(examples.len() * max_len);
        let mut span_sets = Vec::with_capacity(examples.len());
        for example in examples {
            let pad = max_len - example.token_ids.len();
            ids.extend(example.token_ids);
            ids.extend(std::iter::repeat(TokenVocab::PAD_IDX).take(pad));
            span_sets.push(example.span_set);
        }

        let token_ids = Tensor::from_vec(ids, (seq_lens.len(), max_len), device).spanner_result()?;
        let mask = padding_mask(&seq_lens, max_len, device).spanner_result()?;
        Ok(Self {
            token_ids,
            seq_lens,
            mask,
            span_sets,
        })
    }

    /// Number of examples
    pub fn size(&self) -> usize {
        self.seq_lens.len()
    }

    /// Longest sequence length, i.e. the padded step count
    pub fn max_len(&self) -> usize {
        self.seq_lens.iter().copied().max().unwrap_or(0)
    }

    /// (batch, step) f32, 1 at token positions
    pub fn keep_mask(&self) -> Result<Tensor> {
        keep_mask(&self.mask).spanner_result()
    }

    /// Device holding the batch tensors
    pub fn device(&self) -> &Device {
        self.token_ids.device()
    }
}
