//! Span classification decoder
//!
//! Each candidate span is represented by pooling the hidden states inside it
//! and appending a learned embedding of its size. A linear layer scores the
//! span against every label, the none label included.

use crate::batch::Batch;
use crate::dropout::CombinedDropout;
use crate::loss::span_loss;
use crate::tensor::{argmax_rows, ToSpannerResult};
use candle_core::{DType, IndexOp, Result as CandleResult, Tensor};
use candle_nn::{embedding, linear, Embedding, Linear, Module, VarBuilder};
use spanner_core::chunk::Chunk;
use spanner_core::config::{AggMode, Criterion, SpanClassifierConfig};
use spanner_core::error::{Error, Result};
use spanner_core::metrics::micro_f1;
use spanner_core::spans::{Span, SpanSet};
use spanner_core::vocab::LabelVocab;

/// Pool `hidden` (step, hid_dim) over each span into (num_spans, hid_dim)
pub fn pool_spans(hidden: &Tensor, spans: &[Span], agg_mode: AggMode) -> CandleResult<Tensor> {
    let pooled = spans
        .iter()
        .map(|&(start, end)| {
            let inside = hidden.i(start..end)?;
            match agg_mode {
                AggMode::MaxPooling => inside.max(0),
                AggMode::MeanPooling => inside.mean(0),
                AggMode::MinPooling => inside.min(0),
            }
        })
        .collect::<CandleResult<Vec<_>>>()?;
    Tensor::stack(&pooled, 0)
}

/// Classifies pooled span representations into labels or the none label
#[derive(Clone, Debug)]
pub struct SpanClassificationDecoder {
    size_embedding: Embedding,
    dropout: CombinedDropout,
    hid2logit: Linear,
    agg_mode: AggMode,
    criterion: Criterion,
    vocab: LabelVocab,
}

impl SpanClassificationDecoder {
    /// Build a decoder over hidden states of width `in_dim`
    pub fn new(
        config: &SpanClassifierConfig,
        vocab: &LabelVocab,
        in_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        if vocab.none_label() != config.none_label {
            return Err(Error::Configuration(format!(
                "vocabulary none label `{}` differs from configured `{}`",
                vocab.none_label(),
                config.none_label
            )));
        }

        let size_embedding = embedding(
            config.max_span_size,
            config.size_emb_dim,
            vb.pp("size_embedding"),
        )
        .spanner_result()?;
        let hid2logit = linear(
            in_dim + config.size_emb_dim,
            vocab.len(),
            vb.pp("hid2logit"),
        )
        .spanner_result()?;

        Ok(Self {
            size_embedding,
            dropout: CombinedDropout::new(config.in_drop_rates),
            hid2logit,
            agg_mode: config.agg_mode,
            criterion: config.criterion,
            vocab: vocab.clone(),
        })
    }

    /// Number of labels, the none label included
    pub fn num_labels(&self) -> usize {
        self.vocab.len()
    }

    /// Label vocabulary
    pub fn vocab(&self) -> &LabelVocab {
        &self.vocab
    }

    fn span_logits(&self, hidden: &Tensor, span_set: &SpanSet, train: bool) -> Result<Tensor> {
        if span_set.is_empty() {
            return Tensor::zeros((0, self.num_labels()), DType::F32, hidden.device())
                .spanner_result();
        }
        // span_hidden: (num_spans, hid_dim)
        let span_hidden = pool_spans(hidden, span_set.spans(), self.agg_mode).spanner_result()?;
        // size_embedded: (num_spans, size_emb_dim)
        let size_ids = Tensor::from_slice(span_set.span_size_ids(), span_set.len(), hidden.device())
            .spanner_result()?;
        let size_embedded = self.size_embedding.forward(&size_ids).spanner_result()?;

        let features = Tensor::cat(&[span_hidden, size_embedded], 1).spanner_result()?;
        let features = self.dropout.forward(&features, train)?;
        self.hid2logit.forward(&features).spanner_result()
    }

    /// Logits (num_spans, num_labels) of every example
    pub fn get_logits(
        &self,
        batch: &Batch,
        full_hidden: &Tensor,
        train: bool,
    ) -> Result<Vec<Tensor>> {
        batch
            .span_sets
            .iter()
            .enumerate()
            .map(|(k, span_set)| {
                let hidden = full_hidden.i(k).spanner_result()?;
                self.span_logits(&hidden, span_set, train)
            })
            .collect()
    }

    /// Summed loss of each example, shape (batch,)
    pub fn forward(&self, batch: &Batch, full_hidden: &Tensor, train: bool) -> Result<Tensor> {
        let batch_logits = self.get_logits(batch, full_hidden, train)?;
        let losses = batch_logits
            .iter()
            .zip(&batch.span_sets)
            .map(|(logits, span_set)| {
                let label_ids = span_set.label_ids().ok_or_else(|| {
                    Error::Validation("cannot compute a loss without gold chunks".to_string())
                })?;
                let targets = Tensor::from_slice(label_ids, label_ids.len(), logits.device())
                    .spanner_result()?;
                span_loss(&self.criterion, logits, &targets)
            })
            .collect::<Result<Vec<_>>>()?;

        if losses.is_empty() {
            return Tensor::zeros(0, DType::F32, full_hidden.device()).spanner_result();
        }
        Tensor::stack(&losses, 0).spanner_result()
    }

    /// Predicted chunks of every example, in span order
    ///
    /// Spans classified as the none label are dropped. Overlapping chunks are
    /// returned as predicted.
    pub fn decode(&self, batch: &Batch, full_hidden: &Tensor) -> Result<Vec<Vec<Chunk>>> {
        let batch_logits = self.get_logits(batch, full_hidden, false)?;
        batch_logits
            .iter()
            .zip(&batch.span_sets)
            .map(|(logits, span_set)| {
                let label_ids = argmax_rows(logits).spanner_result()?;
                let mut chunks = Vec::new();
                for (&idx, &(start, end)) in label_ids.iter().zip(span_set.spans()) {
                    if idx == LabelVocab::NONE_IDX {
                        continue;
                    }
                    let label = self.vocab.label(idx).ok_or_else(|| {
                        Error::NotFound(format!("label index {} out of vocabulary", idx))
                    })?;
                    chunks.push(Chunk::new(label, start, end));
                }
                Ok(chunks)
            })
            .collect()
    }

    /// Gold chunks of every example, empty when unlabeled
    pub fn retrieve(&self, batch: &Batch) -> Vec<Vec<Chunk>> {
        batch
            .span_sets
            .iter()
            .map(|span_set| span_set.chunks().map(<[Chunk]>::to_vec).unwrap_or_default())
            .collect()
    }

    /// Micro-averaged chunk F1; both lists must cover the same examples
    pub fn evaluate(&self, y_gold: &[Vec<Chunk>], y_pred: &[Vec<Chunk>]) -> Result<f64> {
        micro_f1(y_gold, y_pred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use spanner_core::chunk::Example;
    use spanner_core::config::SpanModelConfig;
    use spanner_core::spans::PreparedExample;
    use spanner_core::vocab::Vocabs;

    const HID_DIM: usize = 6;

    fn data() -> Vec<Example> {
        vec![
            Example::with_chunks(
                ["John", "lives", "in", "New", "York"],
                vec![Chunk::new("PER", 0, 1), Chunk::new("LOC", 3, 5)],
            ),
            Example::with_chunks(["Hi"], Vec::new()),
            Example::with_chunks(Vec::<String>::new(), Vec::new()),
        ]
    }

    fn setup(
        config: SpanClassifierConfig,
        training: bool,
    ) -> (SpanClassificationDecoder, Batch, Tensor) {
        let model_config = SpanModelConfig::new().with_decoder(config.clone());
        let data = data();
        let vocabs: Vocabs = model_config.build_vocabs(&[&data]);
        let mut rng = StdRng::seed_from_u64(0);
        let prepared = data
            .iter()
            .map(|ex| model_config.exemplify(ex, &vocabs, training, &mut rng).unwrap())
            .collect();
        let batch = Batch::from_examples(prepared, &Device::Cpu).unwrap();

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let decoder = SpanClassificationDecoder::new(&config, &vocabs.labels, HID_DIM, vb).unwrap();
        let hidden = Tensor::randn(0f32, 1f32, (3, 5, HID_DIM), &Device::Cpu).unwrap();
        (decoder, batch, hidden)
    }

    #[test]
    fn test_pool_spans() {
        let device = Device::Cpu;
        let hidden = Tensor::new(&[[1f32, 4.0], [3.0, 2.0], [5.0, 0.0]], &device).unwrap();
        let spans = [(0, 2), (1, 3), (2, 3)];

        let max = pool_spans(&hidden, &spans, AggMode::MaxPooling).unwrap();
        assert_eq!(
            max.to_vec2::<f32>().unwrap(),
            vec![vec![3.0, 4.0], vec![5.0, 2.0], vec![5.0, 0.0]]
        );
        let mean = pool_spans(&hidden, &spans, AggMode::MeanPooling).unwrap();
        assert_eq!(
            mean.to_vec2::<f32>().unwrap(),
            vec![vec![2.0, 3.0], vec![4.0, 1.0], vec![5.0, 0.0]]
        );
        let min = pool_spans(&hidden, &spans, AggMode::MinPooling).unwrap();
        assert_eq!(
            min.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 2.0], vec![3.0, 0.0], vec![5.0, 0.0]]
        );
    }

    #[test]
    fn test_logits_shapes() {
        let (decoder, batch, hidden) =
            setup(SpanClassifierConfig::new().with_max_span_size(3), false);
        assert_eq!(decoder.num_labels(), 3);

        let logits = decoder.get_logits(&batch, &hidden, false).unwrap();
        assert_eq!(logits[0].dims(), &[12, 3]);
        assert_eq!(logits[1].dims(), &[1, 3]);
        assert_eq!(logits[2].dims(), &[0, 3]);
    }

    #[test]
    fn test_forward_losses() {
        for criterion in [Criterion::CrossEntropy, Criterion::focal(), Criterion::smooth_label()] {
            let config = SpanClassifierConfig::new().with_criterion(criterion);
            let (decoder, batch, hidden) = setup(config, true);
            let losses = decoder.forward(&batch, &hidden, true).unwrap();
            let losses = losses.to_vec1::<f32>().unwrap();
            assert_eq!(losses.len(), 3);
            assert!(losses[0] > 0.0);
            assert!(losses[1] > 0.0);
            assert_eq!(losses[2], 0.0);
        }
    }

    #[test]
    fn test_forward_requires_gold() {
        let (decoder, _, hidden) = setup(SpanClassifierConfig::new(), false);
        let config = SpanModelConfig::new();
        let unlabeled = vec![Example::from_text("a b")];
        let vocabs = config.build_vocabs(&[&unlabeled]);
        let mut rng = StdRng::seed_from_u64(0);
        let prepared = config.exemplify(&unlabeled[0], &vocabs, false, &mut rng).unwrap();
        let batch = Batch::from_examples(vec![prepared], &Device::Cpu).unwrap();
        assert!(decoder.forward(&batch, &hidden, false).is_err());
    }

    #[test]
    fn test_decode_is_deterministic() {
        let (decoder, batch, hidden) = setup(SpanClassifierConfig::new(), false);
        let first = decoder.decode(&batch, &hidden).unwrap();
        let second = decoder.decode(&batch, &hidden).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert!(first[2].is_empty());

        for (chunks, span_set) in first.iter().zip(&batch.span_sets) {
            for chunk in chunks {
                assert_ne!(chunk.label, "<none>");
                assert!(span_set.spans().contains(&chunk.span()));
            }
        }
    }

    #[test]
    fn test_decode_picks_argmax_label() {
        // Zero weights except a bias favoring LOC on every span
        let config = SpanClassifierConfig::new().with_max_span_size(2);
        let vocab = LabelVocab::from_labels(["<none>", "PER", "LOC"]).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let decoder = SpanClassificationDecoder::new(&config, &vocab, HID_DIM, vb).unwrap();
        {
            let data = varmap.data().lock().unwrap();
            let weight = data["hid2logit.weight"].clone();
            weight.set(&weight.as_tensor().zeros_like().unwrap()).unwrap();
            let bias = Tensor::new(&[0f32, 0.0, 1.0], &Device::Cpu).unwrap();
            data["hid2logit.bias"].set(&bias).unwrap();
        }

        let example = Example::new(["a", "b"]);
        let mut rng = StdRng::seed_from_u64(0);
        let span_set = config.exemplify(&example, &vocab, false, &mut rng).unwrap();
        let prepared = PreparedExample {
            token_ids: vec![2, 3],
            span_set,
        };
        let batch = Batch::from_examples(vec![prepared], &Device::Cpu).unwrap();
        let hidden = Tensor::randn(0f32, 1f32, (1, 2, HID_DIM), &Device::Cpu).unwrap();

        let chunks = decoder.decode(&batch, &hidden).unwrap();
        assert_eq!(
            chunks,
            vec![vec![
                Chunk::new("LOC", 0, 1),
                Chunk::new("LOC", 0, 2),
                Chunk::new("LOC", 1, 2),
            ]]
        );
    }

    #[test]
    fn test_retrieve_and_evaluate() {
        let (decoder, batch, _) = setup(SpanClassifierConfig::new(), false);
        let gold = decoder.retrieve(&batch);
        assert_eq!(gold[0], vec![Chunk::new("PER", 0, 1), Chunk::new("LOC", 3, 5)]);
        assert!(gold[1].is_empty());
        assert_eq!(decoder.evaluate(&gold, &gold).unwrap(), 1.0);
    }

    #[test]
    fn test_mismatched_none_label_rejected() {
        let config = SpanClassifierConfig::new().with_none_label("O");
        let vocab = LabelVocab::from_labels(["<none>", "PER"]).unwrap();
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        assert!(SpanClassificationDecoder::new(&config, &vocab, HID_DIM, vb).is_err());
    }
}
