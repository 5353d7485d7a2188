//! Loss functions for span classification
//!
//! Every criterion reduces by summing over the spans of one example, so the
//! loss of a sentence grows with its number of candidate spans.

use crate::tensor::{zero_scalar, ToSpannerResult};
use candle_core::{Tensor, D};
use spanner_core::config::Criterion;
use spanner_core::error::Result;

/// Log-probability of the target class of each row
///
/// # Arguments
/// * `log_probs` - Log-softmax outputs (num_spans, num_labels)
/// * `targets` - Target label ids (num_spans,) as u32
fn target_log_probs(log_probs: &Tensor, targets: &Tensor) -> Result<Tensor> {
    targets
        .unsqueeze(1)
        .and_then(|idx| log_probs.gather(&idx, 1))
        .and_then(|picked| picked.squeeze(1))
        .spanner_result()
}

/// Summed cross-entropy loss
///
/// # Arguments
/// * `logits` - Span logits (num_spans, num_labels)
/// * `targets` - Gold label ids (num_spans,)
///
/// # Returns
/// Scalar loss tensor, zero when there is no span
pub fn cross_entropy(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    if logits.dim(0).spanner_result()? == 0 {
        return zero_scalar(logits.device()).spanner_result();
    }
    let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1).spanner_result()?;
    target_log_probs(&log_probs, targets)?
        .sum_all()
        .and_then(|s| s.neg())
        .spanner_result()
}

/// Summed focal loss `-Σ (1 - p_y)^γ log p_y`
///
/// Down-weights well-classified spans, which dominate among the negatives.
/// With `gamma == 0` this is exactly [`cross_entropy`].
pub fn focal_loss(logits: &Tensor, targets: &Tensor, gamma: f32) -> Result<Tensor> {
    if gamma == 0.0 {
        return cross_entropy(logits, targets);
    }
    if logits.dim(0).spanner_result()? == 0 {
        return zero_scalar(logits.device()).spanner_result();
    }
    let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1).spanner_result()?;
    let logp = target_log_probs(&log_probs, targets)?;
    logp.exp()
        .and_then(|p| p.affine(-1.0, 1.0))
        .and_then(|q| q.powf(gamma as f64))
        .and_then(|weight| weight.mul(&logp))
        .and_then(|weighted| weighted.sum_all())
        .and_then(|s| s.neg())
        .spanner_result()
}

/// Summed cross-entropy against label-smoothed targets
///
/// The target of each span is `(1 - ε) * onehot + ε / C`, giving
/// `Σ [(1 - ε) (-log p_y) + ε * mean_c(-log p_c)]`.
pub fn label_smoothing_loss(logits: &Tensor, targets: &Tensor, epsilon: f32) -> Result<Tensor> {
    if logits.dim(0).spanner_result()? == 0 {
        return zero_scalar(logits.device()).spanner_result();
    }
    let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1).spanner_result()?;
    let nll = target_log_probs(&log_probs, targets)?
        .neg()
        .and_then(|t| t.sum_all())
        .spanner_result()?;
    let smooth = log_probs
        .mean(D::Minus1)
        .and_then(|m| m.sum_all())
        .and_then(|s| s.neg())
        .spanner_result()?;

    let epsilon = epsilon as f64;
    nll.affine(1.0 - epsilon, 0.0)
        .and_then(|nll| smooth.affine(epsilon, 0.0)?.add(&nll))
        .spanner_result()
}

/// Dispatch to the loss of `criterion`
pub fn span_loss(criterion: &Criterion, logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    match *criterion {
        Criterion::CrossEntropy => cross_entropy(logits, targets),
        Criterion::Focal { gamma } => focal_loss(logits, targets, gamma),
        Criterion::SmoothLabel { epsilon } => label_smoothing_loss(logits, targets, epsilon),
    }
}

// ============================================================================
// Tests
// ============================================================================
