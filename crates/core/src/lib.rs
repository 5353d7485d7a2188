//! spanner core library
//!
//! Data model, vocabularies, configuration and metrics for span-based
//! named entity recognition. Tensor-backed components live in
//! `spanner-models`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod config;
pub mod error;
pub mod metrics;
pub mod spans;
pub mod training;
pub mod vocab;

pub use chunk::{Chunk, Example};
pub use config::*;
pub use error::{Error, Result};
pub use metrics::{micro_f1, precision_recall_f1_report, AveragedScores, ChunkScores};
pub use spans::{enumerate_spans, num_candidate_spans, span_size_id, PreparedExample, Span, SpanSet};
pub use training::*;
pub use vocab::{LabelVocab, OovSpanStats, TokenVocab, Vocabs};
