//! Sequence encoders from embeddings to hidden states
//!
//! Every encoder shares the same front and back: combined dropout on the
//! embeddings, an optional square input projection, the architecture itself,
//! and an optional shortcut concatenating the raw embeddings to the output.

mod attention;
mod conv;
mod recurrent;

pub use attention::{TransformerEncoder, TransformerLayer};
pub use conv::{ConvBlock, ConvEncoder};
pub use recurrent::RecurrentEncoder;

use crate::dropout::CombinedDropout;
use crate::tensor::{keep_mask, ToSpannerResult};
use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};
use spanner_core::config::{EncoderArch, EncoderConfig};
use spanner_core::error::Result;

/// Architecture-specific part of an [`Encoder`]
#[derive(Clone, Debug)]
pub enum EncoderKind {
    /// Pass-through
    Identity,
    /// Bidirectional LSTM or GRU
    Recurrent(RecurrentEncoder),
    /// Gated CNN
    Conv(ConvEncoder),
    /// Transformer
    Transformer(TransformerEncoder),
}

/// Contextualizes `(batch, step, in_dim)` embeddings into hidden states
#[derive(Clone, Debug)]
pub struct Encoder {
    dropout: CombinedDropout,
    in_proj: Option<Linear>,
    kind: EncoderKind,
    shortcut: bool,
    out_dim: usize,
}

impl Encoder {
    /// Build the encoder of `config` over inputs of width `in_dim`
    pub fn new(config: &EncoderConfig, in_dim: usize, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let in_proj = if config.in_proj {
            Some(linear(in_dim, in_dim, vb.pp("in_proj")).spanner_result()?)
        } else {
            None
        };

        let kind = match config.arch {
            EncoderArch::Identity => EncoderKind::Identity,
            EncoderArch::Lstm | EncoderArch::Gru => {
                EncoderKind::Recurrent(RecurrentEncoder::new(config, in_dim, vb.pp("rnn"))?)
            }
            EncoderArch::Conv => EncoderKind::Conv(ConvEncoder::new(config, in_dim, vb.pp("cnn"))?),
            EncoderArch::Transformer => EncoderKind::Transformer(TransformerEncoder::new(
                config,
                in_dim,
                vb.pp("transformer"),
            )?),
        };

        Ok(Self {
            dropout: CombinedDropout::new(config.in_drop_rates),
            in_proj,
            kind,
            shortcut: config.shortcut,
            out_dim: config.out_dim(in_dim),
        })
    }

    /// Width of the hidden states
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Architecture-specific part
    pub fn kind(&self) -> &EncoderKind {
        &self.kind
    }

    /// Encode `embedded` (batch, step, in_dim) into (batch, step, out_dim)
    ///
    /// `mask` is the (batch, step) u8 padding mask, 1 at padding.
    pub fn forward(&self, embedded: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, step, _) = embedded.dims3().spanner_result()?;
        if step == 0 {
            return Tensor::zeros((batch, 0, self.out_dim), embedded.dtype(), embedded.device())
                .spanner_result();
        }

        let mut xs = self.dropout.forward(embedded, train)?;
        if let Some(in_proj) = &self.in_proj {
            xs = in_proj.forward(&xs).spanner_result()?;
        }

        let hidden = match &self.kind {
            EncoderKind::Identity => xs,
            EncoderKind::Recurrent(rnn) => {
                rnn.forward(&xs, &keep_mask(mask).spanner_result()?, train)?
            }
            EncoderKind::Conv(cnn) => cnn.forward(&xs, &keep_mask(mask).spanner_result()?, train)?,
            EncoderKind::Transformer(transformer) => transformer.forward(&xs, mask, train)?,
        };

        if self.shortcut {
            Tensor::cat(&[&hidden, embedded], 2).spanner_result()
        } else {
            Ok(hidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::padding_mask;
    use candle_core::{DType, Device, IndexOp};
    use candle_nn::VarMap;

    const IN_DIM: usize = 8;

    fn build(config: &EncoderConfig, varmap: &VarMap) -> Encoder {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        Encoder::new(config, IN_DIM, vb).unwrap()
    }

    fn small_configs() -> Vec<EncoderConfig> {
        vec![
            EncoderConfig::identity(),
            EncoderConfig::lstm().with_hid_dim(6).with_num_layers(2),
            EncoderConfig::gru().with_hid_dim(6),
            EncoderConfig::conv().with_hid_dim(6).with_num_layers(2),
            EncoderConfig::transformer()
                .with_hid_dim(8)
                .with_num_layers(2)
                .with_attention(2, 16),
        ]
    }

    /// Second example has 3 tokens; its padding is replaced in the returned copy
    fn padded_inputs() -> (Tensor, Tensor, Tensor) {
        let device = Device::Cpu;
        let embedded = Tensor::randn(0f32, 1f32, (2, 5, IN_DIM), &device).unwrap();
        let noise = Tensor::randn(0f32, 5f32, (2, IN_DIM), &device).unwrap();
        let second = Tensor::cat(&[embedded.i((1, 0..3)).unwrap(), noise], 0).unwrap();
        let perturbed = Tensor::stack(&[embedded.i(0).unwrap(), second], 0).unwrap();
        let mask = padding_mask(&[5, 3], 5, &device).unwrap();
        (embedded, perturbed, mask)
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    #[test]
    fn test_output_shapes() {
        let (embedded, _, mask) = padded_inputs();
        for config in small_configs() {
            let encoder = build(&config, &VarMap::new());
            let hidden = encoder.forward(&embedded, &mask, false).unwrap();
            assert_eq!(hidden.dims(), &[2, 5, config.out_dim(IN_DIM)]);
        }
    }

    #[test]
    fn test_shortcut_and_in_proj() {
        let (embedded, _, mask) = padded_inputs();
        let config = EncoderConfig::gru()
            .with_hid_dim(4)
            .with_in_proj(true)
            .with_shortcut(true);
        let encoder = build(&config, &VarMap::new());
        assert_eq!(encoder.out_dim(), 4 + IN_DIM);

        let hidden = encoder.forward(&embedded, &mask, false).unwrap();
        assert_eq!(hidden.dims(), &[2, 5, 4 + IN_DIM]);
        let tail = hidden.narrow(2, 4, IN_DIM).unwrap();
        assert_eq!(max_abs_diff(&tail, &embedded), 0.0);
    }

    #[test]
    fn test_identity_returns_embeddings() {
        let (embedded, _, mask) = padded_inputs();
        let encoder = build(&EncoderConfig::identity(), &VarMap::new());
        assert!(matches!(encoder.kind(), EncoderKind::Identity));
        let hidden = encoder.forward(&embedded, &mask, true).unwrap();
        assert_eq!(max_abs_diff(&hidden, &embedded), 0.0);
    }

    #[test]
    fn test_padding_does_not_leak_into_tokens() {
        let (embedded, perturbed, mask) = padded_inputs();
        for config in small_configs() {
            let encoder = build(&config, &VarMap::new());
            let a = encoder.forward(&embedded, &mask, false).unwrap();
            let b = encoder.forward(&perturbed, &mask, false).unwrap();

            let a_tokens = a.i((1, 0..3)).unwrap();
            let b_tokens = b.i((1, 0..3)).unwrap();
            assert!(
                max_abs_diff(&a_tokens, &b_tokens) < 1e-5,
                "{} leaks padding",
                config.arch.name()
            );
            assert!(max_abs_diff(&a.i(0).unwrap(), &b.i(0).unwrap()) < 1e-5);
        }
    }

    #[test]
    fn test_recurrent_outputs_zero_at_padding() {
        let (embedded, _, mask) = padded_inputs();
        let encoder = build(&EncoderConfig::lstm().with_hid_dim(6), &VarMap::new());
        let hidden = encoder.forward(&embedded, &mask, false).unwrap();
        let padding = hidden.i((1, 3..5)).unwrap();
        assert_eq!(padding.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn test_recurrent_ignores_trailing_padding() {
        // A sequence encoded alone equals the same sequence padded in a batch
        let (embedded, _, mask) = padded_inputs();
        let encoder = build(&EncoderConfig::gru().with_hid_dim(6), &VarMap::new());
        let batched = encoder.forward(&embedded, &mask, false).unwrap();

        let alone = embedded.i((1..2, 0..3)).unwrap();
        let alone_mask = padding_mask(&[3], 3, &Device::Cpu).unwrap();
        let single = encoder.forward(&alone, &alone_mask, false).unwrap();

        assert!(max_abs_diff(&single.i(0).unwrap(), &batched.i((1, 0..3)).unwrap()) < 1e-5);
    }

    #[test]
    fn test_trainable_init_hidden() {
        let config = EncoderConfig::lstm()
            .with_hid_dim(6)
            .with_num_layers(2)
            .with_train_init_hidden(true);
        let varmap = VarMap::new();
        let _ = build(&config, &varmap);
        let data = varmap.data().lock().unwrap();
        assert_eq!(data["rnn.h_0"].as_tensor().dims(), &[4, 1, 3]);
        assert_eq!(data["rnn.c_0"].as_tensor().dims(), &[4, 1, 3]);

        let gru_varmap = VarMap::new();
        let _ = build(&EncoderConfig::gru().with_train_init_hidden(true), &gru_varmap);
        let gru_data = gru_varmap.data().lock().unwrap();
        assert!(gru_data.contains_key("rnn.h_0"));
        assert!(!gru_data.contains_key("rnn.c_0"));
    }

    #[test]
    fn test_zero_length_batch() {
        let device = Device::Cpu;
        let embedded = Tensor::zeros((2, 0, IN_DIM), DType::F32, &device).unwrap();
        let mask = padding_mask(&[0, 0], 0, &device).unwrap();
        for config in small_configs() {
            let encoder = build(&config, &VarMap::new());
            let hidden = encoder.forward(&embedded, &mask, false).unwrap();
            assert_eq!(hidden.dims(), &[2, 0, config.out_dim(IN_DIM)]);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        assert!(Encoder::new(&EncoderConfig::lstm().with_hid_dim(5), IN_DIM, vb).is_err());
    }
}
