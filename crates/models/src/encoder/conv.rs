//! Gated convolutional encoder (Gehring et al., 2017)

use crate::tensor::{glu, glu_last, ToSpannerResult};
use candle_core::{Result as CandleResult, Tensor};
use candle_nn::{conv1d, linear, Conv1d, Conv1dConfig, Dropout, Linear, Module, VarBuilder};
use spanner_core::config::EncoderConfig;
use spanner_core::error::Result;
use std::f64::consts::FRAC_1_SQRT_2;

/// Residual GLU convolution over `(batch, channels, step)`
#[derive(Clone, Debug)]
pub struct ConvBlock {
    conv: Conv1d,
    dropout: Dropout,
    padding: usize,
}

impl ConvBlock {
    /// Same-length convolution; `kernel_size` must be odd
    pub fn new(hid_dim: usize, kernel_size: usize, drop_rate: f32, vb: VarBuilder) -> Result<Self> {
        // Unpadded: `forward` pads explicitly, which keeps the backward pass
        // valid on sequences shorter than the kernel
        let conv = conv1d(hid_dim, hid_dim * 2, kernel_size, Conv1dConfig::default(), vb.pp("conv"))
            .spanner_result()?;
        Ok(Self {
            conv,
            dropout: Dropout::new(drop_rate),
            padding: (kernel_size - 1) / 2,
        })
    }

    /// `keep`: (batch, 1, step)
    ///
    /// Padding positions of the input are zeroed first: a convolution is the
    /// only layer whose outputs at tokens see the inputs at padding.
    pub fn forward(&self, hidden: &Tensor, keep: &Tensor, train: bool) -> CandleResult<Tensor> {
        let hidden = hidden.broadcast_mul(keep)?;
        let padded = self
            .dropout
            .forward(&hidden, train)?
            .pad_with_zeros(2, self.padding, self.padding)?;
        let conved = glu(&self.conv.forward(&padded)?, 1)?;
        (hidden + conved)?.affine(FRAC_1_SQRT_2, 0.0)
    }
}

/// Stack of [`ConvBlock`]s between a GLU input projection and a residual
#[derive(Clone, Debug)]
pub struct ConvEncoder {
    emb2init_hid: Linear,
    blocks: Vec<ConvBlock>,
}

impl ConvEncoder {
    /// Build the blocks of `config` over inputs of width `in_dim`
    pub fn new(config: &EncoderConfig, in_dim: usize, vb: VarBuilder) -> Result<Self> {
        let emb2init_hid =
            linear(in_dim, config.hid_dim * 2, vb.pp("emb2init_hid")).spanner_result()?;
        let blocks = (0..config.num_layers)
            .map(|i| {
                ConvBlock::new(
                    config.hid_dim,
                    config.kernel_size,
                    config.hid_drop_rate,
                    vb.pp(format!("blocks.{i}")),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            emb2init_hid,
            blocks,
        })
    }

    fn forward_impl(&self, xs: &Tensor, keep: &Tensor, train: bool) -> CandleResult<Tensor> {
        let init_hidden = glu_last(&self.emb2init_hid.forward(xs)?)?;

        // (batch, step, channels) -> (batch, channels, step)
        let mut hidden = init_hidden.transpose(1, 2)?.contiguous()?;
        let keep = keep.unsqueeze(1)?;
        for block in &self.blocks {
            hidden = block.forward(&hidden, &keep, train)?;
        }
        let final_hidden = hidden.transpose(1, 2)?;
        (init_hidden + final_hidden)?.affine(FRAC_1_SQRT_2, 0.0)
    }

    /// `xs`: (batch, step, in_dim); `keep`: (batch, step), 1 at tokens
    pub fn forward(&self, xs: &Tensor, keep: &Tensor, train: bool) -> Result<Tensor> {
        self.forward_impl(xs, keep, train).spanner_result()
    }
}
