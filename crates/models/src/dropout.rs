//! Dropout variants applied to `(batch, step, dim)` inputs

use crate::tensor::ToSpannerResult;
use candle_core::Tensor;
use spanner_core::config::DropoutRates;
use spanner_core::error::Result;

/// Zero whole vectors along the last dimension with probability `p`, without rescaling
#[derive(Clone, Copy, Debug)]
pub struct WordDropout {
    p: f32,
}

impl WordDropout {
    /// Drop each vector with probability `p`
    pub fn new(p: f32) -> Self {
        Self { p }
    }

    /// Identity unless `train`
    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        if !train || self.p == 0.0 {
            return Ok(xs.clone());
        }
        let mut mask_shape = xs.dims().to_vec();
        if let Some(last) = mask_shape.last_mut() {
            *last = 1;
        }
        let mask = Tensor::rand(0f32, 1f32, mask_shape, xs.device())
            .and_then(|r| r.ge(self.p as f64))
            .and_then(|m| m.to_dtype(xs.dtype()))
            .spanner_result()?;
        xs.broadcast_mul(&mask).spanner_result()
    }
}

/// Dropout with one mask per sequence shared across all time steps
///
/// Variational dropout as in Gal & Ghahramani (2016).
#[derive(Clone, Copy, Debug)]
pub struct LockedDropout {
    p: f32,
}

impl LockedDropout {
    /// Drop each feature with probability `p`
    pub fn new(p: f32) -> Self {
        Self { p }
    }

    /// Identity unless `train`; expects `(batch, step, dim)`
    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        if !train || self.p == 0.0 {
            return Ok(xs.clone());
        }
        let (batch, _, dim) = xs.dims3().spanner_result()?;
        let scale = 1.0 / (1.0 - self.p as f64);
        let mask = Tensor::rand(0f32, 1f32, (batch, 1, dim), xs.device())
            .and_then(|r| r.ge(self.p as f64))
            .and_then(|m| m.to_dtype(xs.dtype()))
            .and_then(|m| m.affine(scale, 0.0))
            .spanner_result()?;
        xs.broadcast_mul(&mask).spanner_result()
    }
}

/// Element-wise, word and locked dropout applied in sequence
#[derive(Clone, Debug)]
pub struct CombinedDropout {
    dropout: Option<candle_nn::Dropout>,
    word: Option<WordDropout>,
    locked: Option<LockedDropout>,
}

impl CombinedDropout {
    /// Only nonzero rates are applied
    pub fn new(rates: DropoutRates) -> Self {
        Self {
            dropout: (rates.dropout > 0.0).then(|| candle_nn::Dropout::new(rates.dropout)),
            word: (rates.word > 0.0).then(|| WordDropout::new(rates.word)),
            locked: (rates.locked > 0.0).then(|| LockedDropout::new(rates.locked)),
        }
    }

    /// Identity at inference time
    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        if let Some(dropout) = &self.dropout {
            xs = dropout.forward(&xs, train).spanner_result()?;
        }
        if let Some(word) = &self.word {
            xs = word.forward(&xs, train)?;
        }
        // Locked masks need a time axis; span features have none
        if let (Some(locked), 3) = (&self.locked, xs.rank()) {
            xs = locked.forward(&xs, train)?;
        }
        Ok(xs)
    }

    /// Check if any dropout is active
    pub fn is_active(&self) -> bool {
        self.dropout.is_some() || self.word.is_some() || self.locked.is_some()
    }
}
