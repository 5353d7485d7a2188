//! Transformer encoder (Vaswani et al., 2017)

use crate::tensor::{glu_last, ToSpannerResult};
use candle_core::{DType, Result as CandleResult, Tensor, D};
use candle_nn::{linear, Dropout, Init, Linear, Module, VarBuilder};
use spanner_core::config::EncoderConfig;
use spanner_core::error::Result;

const MASK_VALUE: f64 = -1e9;

const LAYER_NORM_EPS: f64 = 1e-5;

/// Layer normalization over the last dimension, built from differentiable ops
#[derive(Clone, Debug)]
struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
}

impl LayerNorm {
    fn new(dim: usize, vb: VarBuilder) -> CandleResult<Self> {
        Ok(Self {
            weight: vb.get_with_hints(dim, "weight", Init::Const(1.0))?,
            bias: vb.get_with_hints(dim, "bias", Init::Const(0.0))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor> {
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        centered
            .broadcast_div(&(var + LAYER_NORM_EPS)?.sqrt()?)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

/// Post-norm self-attention layer with a ReLU feed-forward
/// Post-norm self-attention layer with a ReLU feed-forward block
#[derive(Clone, Debug)]
pub struct TransformerLayer {
    in_proj: Linear,
    out_proj: Linear,
    linear1: Linear,
    linear2: Linear,
    norm1: LayerNorm,
    norm2: LayerNorm,
    dropout: Dropout,
    nhead: usize,
    head_dim: usize,
}

impl TransformerLayer {
    /// `hid_dim` must be divisible by `nhead`
    pub fn new(
        hid_dim: usize,
        nhead: usize,
        pf_dim: usize,
        drop_rate: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            in_proj: linear(hid_dim, hid_dim * 3, vb.pp("self_attn.in_proj")).spanner_result()?,
            out_proj: linear(hid_dim, hid_dim, vb.pp("self_attn.out_proj")).spanner_result()?,
            linear1: linear(hid_dim, pf_dim, vb.pp("linear1")).spanner_result()?,
            linear2: linear(pf_dim, hid_dim, vb.pp("linear2")).spanner_result()?,
            norm1: LayerNorm::new(hid_dim, vb.pp("norm1")).spanner_result()?,
            norm2: LayerNorm::new(hid_dim, vb.pp("norm2")).spanner_result()?,
            dropout: Dropout::new(drop_rate),
            nhead,
            head_dim: hid_dim / nhead,
        })
    }

    fn split_heads(&self, xs: &Tensor, batch: usize, step: usize) -> CandleResult<Tensor> {
        xs.reshape((batch, step, self.nhead, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn self_attention(&self, xs: &Tensor, attn_mask: &Tensor, train: bool) -> CandleResult<Tensor> {
        let (batch, step, hid_dim) = xs.dims3()?;
        let qkv = self.in_proj.forward(xs)?;
        let q = self.split_heads(&qkv.narrow(2, 0, hid_dim)?, batch, step)?;
        let k = self.split_heads(&qkv.narrow(2, hid_dim, hid_dim)?, batch, step)?;
        let v = self.split_heads(&qkv.narrow(2, 2 * hid_dim, hid_dim)?, batch, step)?;

        // scores: (batch, nhead, step, step)
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q
            .matmul(&k.t()?.contiguous()?)?
            .affine(scale, 0.0)?
            .broadcast_add(attn_mask)?;
        let attn = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let attn = self.dropout.forward(&attn, train)?;

        let context = attn
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, step, hid_dim))?;
        self.out_proj.forward(&context)
    }

    /// `attn_mask`: additive key mask broadcastable to `(batch, nhead, step, step)`
    pub fn forward(&self, xs: &Tensor, attn_mask: &Tensor, train: bool) -> CandleResult<Tensor> {
        let attended = self.self_attention(xs, attn_mask, train)?;
        let xs = self
            .norm1
            .forward(&(xs + self.dropout.forward(&attended, train)?)?)?;

        let ff = self.linear1.forward(&xs)?.relu()?;
        let ff = self.linear2.forward(&self.dropout.forward(&ff, train)?)?;
        self.norm2.forward(&(xs + self.dropout.forward(&ff, train)?)?)
    }
}

/// Stack of [`TransformerLayer`]s over a GLU input projection
#[derive(Clone, Debug)]
pub struct TransformerEncoder {
    emb2init_hid: Linear,
    layers: Vec<TransformerLayer>,
}

impl TransformerEncoder {
    /// Build the layers of `config` over inputs of width `in_dim`
    pub fn new(config: &EncoderConfig, in_dim: usize, vb: VarBuilder) -> Result<Self> {
        let emb2init_hid =
            linear(in_dim, config.hid_dim * 2, vb.pp("emb2init_hid")).spanner_result()?;
        let layers = (0..config.num_layers)
            .map(|i| {
                TransformerLayer::new(
                    config.hid_dim,
                    config.nhead,
                    config.pf_dim,
                    config.hid_drop_rate,
                    vb.pp(format!("layers.{i}")),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            emb2init_hid,
            layers,
        })
    }

    fn forward_impl(&self, xs: &Tensor, mask: &Tensor, train: bool) -> CandleResult<Tensor> {
        let (batch, step) = mask.dims2()?;
        // (batch, 1, 1, step), large negative at padding keys
        let attn_mask = mask
            .to_dtype(DType::F32)?
            .affine(MASK_VALUE, 0.0)?
            .reshape((batch, 1, 1, step))?;

        let mut hidden = glu_last(&self.emb2init_hid.forward(xs)?)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &attn_mask, train)?;
        }
        Ok(hidden)
    }

    /// `xs`: (batch, step, in_dim); `mask`: (batch, step) u8, 1 at padding
    pub fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        self.forward_impl(xs, mask, train).spanner_result()
    }
}
