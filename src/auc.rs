//! Ranking performance without building the ROC curve.
//!
//! The AUC is obtained from the rank sum of the sensitive predictions
//! (Hand & Till 2001, eq. 3), i.e. the normalised Mann-Whitney U statistic.

use crate::data::Label;
use crate::error::EvalError;
use crate::utils::fractional_ranks;

/// AUC = (S0 - n_p(n_p + 1)/2) / (n_p n_n), where S0 is the sum of the
/// fractional ranks of sensitive predictions among all predictions.
///
/// Unlabelled entries are ignored. Fails with `DegenerateLabelSet` when one
/// of the two classes is absent.
pub fn rank_auc(predictions: &[(f64, Label)]) -> Result<f64, EvalError> {
    let known: Vec<(f64, Label)> = predictions.iter().copied().filter(|(_, label)| label.is_known()).collect();

    let n_p = known.iter().filter(|(_, label)| *label == Label::Sensitive).count();
    let n_n = known.len() - n_p;
    if n_p == 0 || n_n == 0 {
        return Err(EvalError::DegenerateLabelSet { positives: n_p, negatives: n_n });
    }

    let scores: Vec<f64> = known.iter().map(|(score, _)| *score).collect();
    let ranks = fractional_ranks(&scores);

    let s0: f64 = known
        .iter()
        .zip(ranks.iter())
        .filter(|((_, label), _)| *label == Label::Sensitive)
        .map(|(_, rank)| rank)
        .sum();

    let n_p = n_p as f64;
    let n_n = n_n as f64;
    Ok((s0 - n_p * (n_p + 1.0) / 2.0) / (n_p * n_n))
}

/// Indices of `predictions` from the highest score to the lowest, ties kept in
/// input order: the order in which a ROC curve visits the samples.
pub fn roc_order(predictions: &[(f64, Label)]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..predictions.len()).collect();
    order.sort_by(|&a, &b| predictions[b].0.total_cmp(&predictions[a].0));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use Label::{Resistant, Sensitive};

    #[test]
    fn test_auc_perfect_separation() {
        let predictions = vec![(0.9, Sensitive), (0.8, Sensitive), (0.3, Resistant), (0.1, Resistant)];
        assert_eq!(rank_auc(&predictions).unwrap(), 1.0);
    }

    #[test]
    fn test_auc_perfect_anti_separation() {
        let predictions = vec![(0.1, Sensitive), (0.2, Sensitive), (0.7, Resistant), (0.8, Resistant)];
        assert_eq!(rank_auc(&predictions).unwrap(), 0.0);
    }

    #[test]
    fn test_auc_all_tied_is_half() {
        let predictions = vec![(0.5, Sensitive), (0.5, Resistant), (0.5, Resistant), (0.5, Sensitive), (0.5, Resistant)];
        assert_eq!(rank_auc(&predictions).unwrap(), 0.5);
    }

    #[test]
    fn test_auc_partial_ordering() {
        // pairs (s, r): (0.8,0.6) (0.8,0.2) (0.4,0.6) (0.4,0.2) -> 3 of 4 correctly ordered
        let predictions = vec![(0.8, Sensitive), (0.4, Sensitive), (0.6, Resistant), (0.2, Resistant)];
        assert_eq!(rank_auc(&predictions).unwrap(), 0.75);
    }

    #[test]
    fn test_auc_ties_count_half() {
        // (0.5,0.5) tie counts 1/2, (0.5,0.1) counts 1 -> 1.5 / 2
        let predictions = vec![(0.5, Sensitive), (0.5, Resistant), (0.1, Resistant)];
        assert_eq!(rank_auc(&predictions).unwrap(), 0.75);
    }

    #[test]
    fn test_auc_invariant_to_monotonic_transform() {
        let predictions = vec![(0.31, Sensitive), (0.12, Resistant), (0.77, Sensitive), (0.45, Resistant), (0.45, Sensitive), (0.02, Resistant)];
        let reference = rank_auc(&predictions).unwrap();

        let scaled: Vec<(f64, Label)> = predictions.iter().map(|(s, l)| (s * 10.0 + 3.0, *l)).collect();
        let logit: Vec<(f64, Label)> = predictions.iter().map(|(s, l)| ((s / (1.0 - s)).ln(), *l)).collect();
        assert_eq!(rank_auc(&scaled).unwrap(), reference);
        assert_eq!(rank_auc(&logit).unwrap(), reference);
    }

    #[test]
    fn test_auc_ignores_unlabelled() {
        let predictions = vec![(0.9, Sensitive), (0.95, Label::Missing), (0.1, Resistant)];
        assert_eq!(rank_auc(&predictions).unwrap(), 1.0);
    }

    #[test]
    fn test_auc_degenerate_label_set() {
        let only_sensitive = vec![(0.9, Sensitive), (0.2, Sensitive)];
        assert!(matches!(rank_auc(&only_sensitive), Err(EvalError::DegenerateLabelSet { positives: 2, negatives: 0 })));
        assert!(matches!(rank_auc(&[]), Err(EvalError::DegenerateLabelSet { positives: 0, negatives: 0 })));
    }

    #[test]
    fn test_roc_order_descending_and_stable() {
        let predictions = vec![(0.2, Resistant), (0.9, Sensitive), (0.2, Sensitive), (0.5, Resistant)];
        assert_eq!(roc_order(&predictions), vec![1, 3, 0, 2]);
    }
}
