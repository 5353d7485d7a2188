//! Chunk-level precision, recall and F1
//!
//! Scores follow the CoNLL-2000 chunking convention: a predicted chunk is
//! correct only if its label, start and end all match a gold chunk of the
//! same example. Micro averages pool the counts of every label before
//! dividing; macro averages take the mean of the per-label scores.
//!
//! See <https://www.clips.uantwerpen.be/conll2000/chunking/output.html>.

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Scores of a single label, or of an average
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkScores {
    /// Correct predictions over all predictions
    pub precision: f64,
    /// Correct predictions over all gold chunks
    pub recall: f64,
    /// Harmonic mean of precision and recall
    pub f1: f64,
    /// Number of gold chunks
    pub n_gold: usize,
    /// Number of predicted chunks
    pub n_pred: usize,
    /// Number of predicted chunks matching a gold chunk
    pub n_true_positive: usize,
}

impl ChunkScores {
    fn from_counts(n_gold: usize, n_pred: usize, n_true_positive: usize) -> Self {
        let precision = ratio(n_true_positive, n_pred);
        let recall = ratio(n_true_positive, n_gold);
        Self {
            precision,
            recall,
            f1: harmonic_mean(precision, recall),
            n_gold,
            n_pred,
            n_true_positive,
        }
    }
}

/// Micro and macro averages over all labels
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AveragedScores {
    /// Scores from counts pooled over labels
    pub micro: ChunkScores,
    /// Mean of the per-label scores
    pub macro_: ChunkScores,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn harmonic_mean(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

#[derive(Default)]
struct Counts {
    n_gold: usize,
    n_pred: usize,
    n_true_positive: usize,
}

/// Per-label and averaged scores of predicted chunks against gold chunks
///
/// `gold` and `pred` hold one chunk list per example, aligned by position,
/// and must have the same length.
pub fn precision_recall_f1_report(
    gold: &[Vec<Chunk>],
    pred: &[Vec<Chunk>],
) -> Result<(BTreeMap<String, ChunkScores>, AveragedScores)> {
    if gold.len() != pred.len() {
        return Err(Error::Validation(format!(
            "{} gold chunk lists but {} predicted chunk lists",
            gold.len(),
            pred.len()
        )));
    }

    let mut counts: BTreeMap<String, Counts> = BTreeMap::new();

    for (gold_chunks, pred_chunks) in gold.iter().zip(pred.iter()) {
        let gold_set: HashSet<&Chunk> = gold_chunks.iter().collect();
        let pred_set: HashSet<&Chunk> = pred_chunks.iter().collect();

        for chunk in &gold_set {
            counts.entry(chunk.label.clone()).or_default().n_gold += 1;
        }
        for chunk in &pred_set {
            let entry = counts.entry(chunk.label.clone()).or_default();
            entry.n_pred += 1;
            if gold_set.contains(chunk) {
                entry.n_true_positive += 1;
            }
        }
    }

    let scores: BTreeMap<String, ChunkScores> = counts
        .iter()
        .map(|(label, c)| {
            (
                label.clone(),
                ChunkScores::from_counts(c.n_gold, c.n_pred, c.n_true_positive),
            )
        })
        .collect();

    let total = counts.values().fold(Counts::default(), |mut acc, c| {
        acc.n_gold += c.n_gold;
        acc.n_pred += c.n_pred;
        acc.n_true_positive += c.n_true_positive;
        acc
    });
    let micro = ChunkScores::from_counts(total.n_gold, total.n_pred, total.n_true_positive);

    let num_labels = scores.len().max(1) as f64;
    let macro_ = ChunkScores {
        precision: scores.values().map(|s| s.precision).sum::<f64>() / num_labels,
        recall: scores.values().map(|s| s.recall).sum::<f64>() / num_labels,
        f1: scores.values().map(|s| s.f1).sum::<f64>() / num_labels,
        n_gold: total.n_gold,
        n_pred: total.n_pred,
        n_true_positive: total.n_true_positive,
    };

    Ok((scores, AveragedScores { micro, macro_ }))
}

/// Micro-averaged F1 of predicted chunks against gold chunks
pub fn micro_f1(gold: &[Vec<Chunk>], pred: &[Vec<Chunk>]) -> Result<f64> {
    precision_recall_f1_report(gold, pred).map(|(_, ave)| ave.micro.f1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gold() -> Vec<Vec<Chunk>> {
        vec![
            vec![Chunk::new("PER", 0, 1), Chunk::new("LOC", 3, 5)],
            vec![Chunk::new("ORG", 0, 2)],
        ]
    }

    #[test]
    fn test_perfect_prediction() {
        let gold = gold();
        let (scores, ave) = precision_recall_f1_report(&gold, &gold).unwrap();
        assert_eq!(ave.micro.f1, 1.0);
        assert_eq!(ave.micro.precision, 1.0);
        assert_eq!(ave.micro.recall, 1.0);
        assert_eq!(ave.macro_.f1, 1.0);
        assert_eq!(scores.len(), 3);
        assert_eq!(micro_f1(&gold, &gold).unwrap(), 1.0);
    }

    #[test]
    fn test_partial_prediction() {
        let gold = gold();
        let pred = vec![
            vec![Chunk::new("PER", 0, 1), Chunk::new("LOC", 3, 4)],
            vec![Chunk::new("ORG", 0, 2), Chunk::new("PER", 1, 2)],
        ];
        let (scores, ave) = precision_recall_f1_report(&gold, &pred).unwrap();

        // 2 correct out of 4 predicted and 3 gold
        assert_eq!(ave.micro.n_true_positive, 2);
        assert!((ave.micro.precision - 0.5).abs() < 1e-9);
        assert!((ave.micro.recall - 2.0 / 3.0).abs() < 1e-9);
        assert!((ave.micro.f1 - 4.0 / 7.0).abs() < 1e-9);

        assert_eq!(scores["LOC"].f1, 0.0);
        assert_eq!(scores["ORG"].f1, 1.0);
        assert!((scores["PER"].precision - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_same_span_different_example_does_not_match() {
        let gold = vec![vec![Chunk::new("PER", 0, 1)], vec![]];
        let pred = vec![vec![], vec![Chunk::new("PER", 0, 1)]];
        assert_eq!(micro_f1(&gold, &pred).unwrap(), 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        let (scores, ave) = precision_recall_f1_report(&[], &[]).unwrap();
        assert!(scores.is_empty());
        assert_eq!(ave.micro.f1, 0.0);
        assert_eq!(ave.macro_.f1, 0.0);
    }

    #[test]
    fn test_no_prediction() {
        let gold = gold();
        let pred = vec![vec![], vec![]];
        let (_, ave) = precision_recall_f1_report(&gold, &pred).unwrap();
        assert_eq!(ave.micro.precision, 0.0);
        assert_eq!(ave.micro.recall, 0.0);
        assert_eq!(ave.micro.f1, 0.0);
    }

    #[test]
    fn test_missing_predictions_rejected() {
        let gold = gold();
        let pred = vec![vec![Chunk::new("PER", 0, 1)]];
        assert!(matches!(
            precision_recall_f1_report(&gold, &pred),
            Err(Error::Validation(_))
        ));
        assert!(micro_f1(&gold, &pred).is_err());
        assert!(micro_f1(&pred, &gold).is_err());
    }
}
