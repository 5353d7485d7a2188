//! Span model assembly: embedder, optional encoder, span decoder

use crate::batch::Batch;
use crate::embedder::TokenEmbedder;
use crate::encoder::Encoder;
use crate::span_decoder::SpanClassificationDecoder;
use candle_core::Tensor;
use candle_nn::VarBuilder;
use spanner_core::chunk::Chunk;
use spanner_core::config::SpanModelConfig;
use spanner_core::error::Result;
use spanner_core::vocab::Vocabs;

/// Span-based entity recognizer
///
/// Components run in a fixed order; a model without encoder hands the
/// embeddings straight to the decoder.
#[derive(Clone, Debug)]
pub struct SpanModel {
    config: SpanModelConfig,
    embedder: TokenEmbedder,
    encoder: Option<Encoder>,
    decoder: SpanClassificationDecoder,
}

impl SpanModel {
    /// Build every component of `config`, sized by `vocabs`
    pub fn new(config: &SpanModelConfig, vocabs: &Vocabs, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let embedder = TokenEmbedder::new(&config.embedder, &vocabs.tokens, vb.pp("embedder"))?;
        let encoder = config
            .encoder
            .as_ref()
            .map(|encoder| Encoder::new(encoder, embedder.emb_dim(), vb.pp("encoder")))
            .transpose()?;
        let hid_dim = encoder
            .as_ref()
            .map_or(embedder.emb_dim(), Encoder::out_dim);
        let decoder = SpanClassificationDecoder::new(
            &config.decoder,
            &vocabs.labels,
            hid_dim,
            vb.pp("decoder"),
        )?;

        tracing::debug!(
            model = %config.name(),
            emb_dim = embedder.emb_dim(),
            hid_dim,
            num_labels = decoder.num_labels(),
            "assembled span model"
        );

        Ok(Self {
            config: config.clone(),
            embedder,
            encoder,
            decoder,
        })
    }

    /// Configuration the model was built from
    pub fn config(&self) -> &SpanModelConfig {
        &self.config
    }

    /// Span classification head
    pub fn decoder(&self) -> &SpanClassificationDecoder {
        &self.decoder
    }

    /// Hidden states (batch, step, hid_dim) handed to the decoder
    pub fn forward2states(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let embedded = self.embedder.forward(&batch.token_ids)?;
        match &self.encoder {
            Some(encoder) => encoder.forward(&embedded, &batch.mask, train),
            None => Ok(embedded),
        }
    }

    /// Per-example losses (batch,) together with the hidden states
    pub fn forward_with_hidden(&self, batch: &Batch, train: bool) -> Result<(Tensor, Tensor)> {
        let hidden = self.forward2states(batch, train)?;
        let losses = self.decoder.forward(batch, &hidden, train)?;
        Ok((losses, hidden))
    }

    /// Per-example losses (batch,)
    pub fn forward(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        self.forward_with_hidden(batch, train).map(|(losses, _)| losses)
    }

    /// Predicted chunks, computing hidden states at inference mode
    pub fn decode(&self, batch: &Batch) -> Result<Vec<Vec<Chunk>>> {
        let hidden = self.forward2states(batch, false)?;
        self.decoder.decode(batch, &hidden)
    }

    /// Predicted chunks from precomputed hidden states
    pub fn decode_hidden(&self, batch: &Batch, hidden: &Tensor) -> Result<Vec<Vec<Chunk>>> {
        self.decoder.decode(batch, hidden)
    }

    /// Gold chunks of every example
    pub fn retrieve(&self, batch: &Batch) -> Vec<Vec<Chunk>> {
        self.decoder.retrieve(batch)
    }

    /// Micro-averaged chunk F1
    pub fn evaluate(&self, y_gold: &[Vec<Chunk>], y_pred: &[Vec<Chunk>]) -> Result<f64> {
        self.decoder.evaluate(y_gold, y_pred)
    }
}
