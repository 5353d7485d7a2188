//! Bidirectional LSTM / GRU over padded batches
//!
//! Sequences of different lengths are handled without sorting or packing:
//! at padding steps the recurrent state is carried over unchanged and the
//! output is zeroed. The backward direction therefore starts from the initial
//! state at the last token of each sequence.

use crate::tensor::ToSpannerResult;
use candle_core::{DType, IndexOp, Result as CandleResult, Tensor};
use candle_nn::rnn::{GRUConfig, GRUState, LSTMConfig, LSTMState, GRU, LSTM, RNN};
use candle_nn::{Dropout, Init, VarBuilder};
use spanner_core::config::{EncoderArch, EncoderConfig};
use spanner_core::error::Result;

#[derive(Clone, Debug)]
enum Cell {
    Lstm(LSTM),
    Gru(GRU),
}

#[derive(Clone, Debug)]
struct CellState {
    h: Tensor,
    c: Option<Tensor>,
}

impl Cell {
    fn new(arch: EncoderArch, in_dim: usize, hid_dim: usize, vb: VarBuilder) -> CandleResult<Self> {
        match arch {
            EncoderArch::Gru => Ok(Cell::Gru(candle_nn::rnn::gru(
                in_dim,
                hid_dim,
                GRUConfig::default(),
                vb,
            )?)),
            _ => Ok(Cell::Lstm(candle_nn::rnn::lstm(
                in_dim,
                hid_dim,
                LSTMConfig::default(),
                vb,
            )?)),
        }
    }

    fn step(&self, input: &Tensor, state: &CellState) -> CandleResult<CellState> {
        match self {
            Cell::Lstm(lstm) => {
                let c = match &state.c {
                    Some(c) => c.clone(),
                    None => state.h.zeros_like()?,
                };
                let next = lstm.step(input, &LSTMState::new(state.h.clone(), c))?;
                Ok(CellState {
                    h: next.h().clone(),
                    c: Some(next.c().clone()),
                })
            }
            Cell::Gru(gru) => {
                let next = gru.step(input, &GRUState { h: state.h.clone() })?;
                Ok(CellState {
                    h: next.h().clone(),
                    c: None,
                })
            }
        }
    }
}

/// `prev + keep * (next - prev)`, with `keep` of shape `(batch, 1)`
fn blend(next: &Tensor, prev: &Tensor, keep: &Tensor) -> CandleResult<Tensor> {
    (next - prev)?.broadcast_mul(keep)?.add(prev)
}

/// Run one direction of one layer, returning `(batch, step, hid_dim)`
fn run_direction(
    cell: &Cell,
    xs: &Tensor,
    keep: &Tensor,
    init: CellState,
    reverse: bool,
) -> CandleResult<Tensor> {
    let step = xs.dim(1)?;
    let mut order: Vec<usize> = (0..step).collect();
    if reverse {
        order.reverse();
    }

    let mut state = init;
    let mut outputs = Vec::with_capacity(step);
    for t in order {
        let x_t = xs.i((.., t, ..))?.contiguous()?;
        let k_t = keep.i((.., t..t + 1))?;
        let next = cell.step(&x_t, &state)?;

        let h = blend(&next.h, &state.h, &k_t)?;
        let c = match (&next.c, &state.c) {
            (Some(next_c), Some(prev_c)) => Some(blend(next_c, prev_c, &k_t)?),
            _ => None,
        };
        outputs.push(h.broadcast_mul(&k_t)?);
        state = CellState { h, c };
    }
    if reverse {
        outputs.reverse();
    }
    Tensor::stack(&outputs, 1)
}

/// Stacked bidirectional recurrent encoder
#[derive(Clone, Debug)]
pub struct RecurrentEncoder {
    layers: Vec<[Cell; 2]>,
    h_0: Option<Tensor>,
    c_0: Option<Tensor>,
    half_dim: usize,
    is_lstm: bool,
    hid_dropout: Option<Dropout>,
}

impl RecurrentEncoder {
    /// `hid_dim / 2` units per direction
    pub fn new(config: &EncoderConfig, in_dim: usize, vb: VarBuilder) -> Result<Self> {
        let half_dim = config.hid_dim / 2;
        let is_lstm = config.arch == EncoderArch::Lstm;

        let mut layers = Vec::with_capacity(config.num_layers);
        for layer in 0..config.num_layers {
            let layer_in = if layer == 0 { in_dim } else { config.hid_dim };
            let forward =
                Cell::new(config.arch, layer_in, half_dim, vb.pp(format!("l{layer}_forward")))
                    .spanner_result()?;
            let backward =
                Cell::new(config.arch, layer_in, half_dim, vb.pp(format!("l{layer}_backward")))
                    .spanner_result()?;
            layers.push([forward, backward]);
        }

        // (num_layers * num_directions, 1, hid_dim / 2)
        let init_shape = (config.num_layers * 2, 1, half_dim);
        let h_0 = if config.train_init_hidden {
            Some(vb.get_with_hints(init_shape, "h_0", Init::Const(0.0)).spanner_result()?)
        } else {
            None
        };
        let c_0 = if config.train_init_hidden && is_lstm {
            Some(vb.get_with_hints(init_shape, "c_0", Init::Const(0.0)).spanner_result()?)
        } else {
            None
        };

        let hid_dropout = (config.num_layers > 1 && config.hid_drop_rate > 0.0)
            .then(|| Dropout::new(config.hid_drop_rate));

        Ok(Self {
            layers,
            h_0,
            c_0,
            half_dim,
            is_lstm,
            hid_dropout,
        })
    }

    fn init_tensor(
        &self,
        param: Option<&Tensor>,
        idx: usize,
        batch: usize,
        like: &Tensor,
    ) -> CandleResult<Tensor> {
        match param {
            Some(param) => param.i(idx)?.broadcast_as((batch, self.half_dim))?.contiguous(),
            None => Tensor::zeros((batch, self.half_dim), DType::F32, like.device()),
        }
    }

    fn init_state(&self, idx: usize, batch: usize, like: &Tensor) -> CandleResult<CellState> {
        let h = self.init_tensor(self.h_0.as_ref(), idx, batch, like)?;
        let c = if self.is_lstm {
            Some(self.init_tensor(self.c_0.as_ref(), idx, batch, like)?)
        } else {
            None
        };
        Ok(CellState { h, c })
    }

    fn forward_impl(&self, xs: &Tensor, keep: &Tensor, train: bool) -> CandleResult<Tensor> {
        let batch = xs.dim(0)?;
        let mut hidden = xs.clone();
        for (layer, [forward, backward]) in self.layers.iter().enumerate() {
            if let (Some(dropout), true) = (&self.hid_dropout, layer > 0) {
                hidden = dropout.forward(&hidden, train)?;
            }
            let fwd = run_direction(
                forward,
                &hidden,
                keep,
                self.init_state(2 * layer, batch, xs)?,
                false,
            )?;
            let bwd = run_direction(
                backward,
                &hidden,
                keep,
                self.init_state(2 * layer + 1, batch, xs)?,
                true,
            )?;
            hidden = Tensor::cat(&[fwd, bwd], 2)?;
        }
        Ok(hidden)
    }

    /// `xs`: (batch, step, in_dim); `keep`: (batch, step), 1 at tokens
    pub fn forward(&self, xs: &Tensor, keep: &Tensor, train: bool) -> Result<Tensor> {
        self.forward_impl(xs, keep, train).spanner_result()
    }
}
