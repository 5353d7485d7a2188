//! Token lookup embedder

use crate::tensor::ToSpannerResult;
use candle_core::{DType, Tensor};
use candle_nn::{embedding, Embedding, Module, VarBuilder};
use spanner_core::config::EmbedderConfig;
use spanner_core::error::Result;
use spanner_core::vocab::TokenVocab;

/// Maps `(batch, step)` token ids to `(batch, step, emb_dim)` embeddings
#[derive(Clone, Debug)]
pub struct TokenEmbedder {
    embedding: Embedding,
    emb_dim: usize,
}

impl TokenEmbedder {
    /// Embedding table with one row per token in `vocab`
    pub fn new(config: &EmbedderConfig, vocab: &TokenVocab, vb: VarBuilder) -> Result<Self> {
        let embedding =
            embedding(vocab.len(), config.emb_dim, vb.pp("embedding")).spanner_result()?;
        Ok(Self {
            embedding,
            emb_dim: config.emb_dim,
        })
    }

    /// Embedding width
    pub fn emb_dim(&self) -> usize {
        self.emb_dim
    }

    /// Look up `(batch, step)` u32 ids
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (batch, step) = token_ids.dims2().spanner_result()?;
        if batch * step == 0 {
            return Tensor::zeros((batch, step, self.emb_dim), DType::F32, token_ids.device())
                .spanner_result();
        }
        self.embedding.forward(token_ids).spanner_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use spanner_core::chunk::Example;

    #[test]
    fn test_embedder_shapes() {
        let data = vec![Example::from_text("the cat sat")];
        let vocab = TokenVocab::build(1, false, &[&data]);
        let config = EmbedderConfig::default().with_emb_dim(6);
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let embedder = TokenEmbedder::new(&config, &vocab, vb).unwrap();
        assert_eq!(embedder.emb_dim(), 6);

        let ids = Tensor::new(&[[2u32, 3, 4], [1, 0, 0]], &Device::Cpu).unwrap();
        assert_eq!(embedder.forward(&ids).unwrap().dims(), &[2, 3, 6]);

        let empty = Tensor::zeros((2, 0), DType::U32, &Device::Cpu).unwrap();
        assert_eq!(embedder.forward(&empty).unwrap().dims(), &[2, 0, 6]);
    }
}
