//! Tensor-backed components of spanner
//!
//! Encoders, the span classification decoder, model assembly and the
//! training driver, all built on candle.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod dropout;
pub mod embedder;
pub mod encoder;
pub mod loss;
pub mod model;
pub mod span_decoder;
pub mod tensor;
pub mod trainer;

// Re-exports
pub use batch::Batch;
pub use dropout::{CombinedDropout, LockedDropout, WordDropout};
pub use embedder::TokenEmbedder;
pub use encoder::{Encoder, EncoderKind};
pub use loss::{cross_entropy, focal_loss, label_smoothing_loss, span_loss};
pub use model::SpanModel;
pub use span_decoder::{pool_spans, SpanClassificationDecoder};
pub use tensor::{to_candle_device, ToSpannerResult};
pub use trainer::{clip_grad_norm, BatchOutput, SpanTrainer, TrainingState};
