//! Bridging helpers between candle and spanner

use candle_core::{DType, Device as CandleDevice, Result as CandleResult, Tensor, D};
use spanner_core::error::{Device, Error, Result};

/// Convert a CandleResult to a spanner Result
pub trait ToSpannerResult<T> {
    fn spanner_result(self) -> Result<T>;
}

impl<T> ToSpannerResult<T> for CandleResult<T> {
    fn spanner_result(self) -> Result<T> {
        self.map_err(|e| Error::Tensor(e.to_string()))
    }
}

/// Convert spanner device to Candle device
pub fn to_candle_device(device: &Device) -> CandleDevice {
    match device {
        Device::Cpu => CandleDevice::Cpu,
        Device::Gpu(id) => CandleDevice::new_cuda(*id as usize).unwrap_or(CandleDevice::Cpu),
        Device::Metal => CandleDevice::new_metal(0).unwrap_or(CandleDevice::Cpu),
    }
}

/// Gated linear unit: split `dim` in halves `a`, `b` and return `a * sigmoid(b)`
pub fn glu(xs: &Tensor, dim: usize) -> CandleResult<Tensor> {
    let halves = xs.chunk(2, dim)?;
    halves[0].mul(&candle_nn::ops::sigmoid(&halves[1])?)
}

/// Same as [`glu`] over the last dimension
pub fn glu_last(xs: &Tensor) -> CandleResult<Tensor> {
    glu(xs, xs.dims().len() - 1)
}

/// Padding mask `(batch, step)` as u8, 1 at padding positions
pub fn padding_mask(
    seq_lens: &[usize],
    step: usize,
    device: &CandleDevice,
) -> CandleResult<Tensor> {
    let mask: Vec<u8> = seq_lens
        .iter()
        .flat_map(|&len| (0..step).map(move |t| u8::from(t >= len)))
        .collect();
    Tensor::from_vec(mask, (seq_lens.len(), step), device)
}

/// Complement of a u8 padding mask as f32, 1 at token positions
pub fn keep_mask(mask: &Tensor) -> CandleResult<Tensor> {
    mask.to_dtype(DType::F32)?.affine(-1.0, 1.0)
}

/// Scalar zero on `device`
pub fn zero_scalar(device: &CandleDevice) -> CandleResult<Tensor> {
    Tensor::zeros((), DType::F32, device)
}

/// Row-wise argmax of a `(rows, cols)` tensor
pub fn argmax_rows(xs: &Tensor) -> CandleResult<Vec<u32>> {
    if xs.dim(0)? == 0 {
        return Ok(Vec::new());
    }
    xs.argmax(D::Minus1)?.to_vec1::<u32>()
}
