use crate::data::{FeatureMatrix, Label};
use crate::error::EvalError;
use crate::scorer::{is_sensitive, require_both_classes, FittedScorer, ParamConfig, Scorer};

/// k nearest neighbours on binary fingerprints, Tanimoto similarity.
/// The grid is one configuration per value of k.
pub struct KnnScorer {
    pub k_values: Vec<usize>,
}

struct FittedKnn {
    rows: Vec<Vec<u8>>,
    labels: Vec<Label>,
    k: usize,
}

/// |a AND b| / |a OR b|, 1 when both fingerprints are empty
pub fn tanimoto(a: &[u8], b: &[u8]) -> f64 {
    let mut both = 0usize;
    let mut either = 0usize;
    for (x, y) in a.iter().zip(b.iter()) {
        both += (*x & *y) as usize;
        either += (*x | *y) as usize;
    }
    if either == 0 { 1.0 } else { both as f64 / either as f64 }
}

impl Scorer for KnnScorer {
    fn name(&self) -> &str {
        "knn"
    }

    fn param_grid(&self) -> Vec<ParamConfig> {
        self.k_values.iter().map(|&k| ParamConfig::new().with("k", k as f64)).collect()
    }

    fn fit(&self, train: &FeatureMatrix, config: &ParamConfig, _seed: u64) -> Result<Box<dyn FittedScorer>, EvalError> {
        require_both_classes(self.name(), train, config)?;

        let k = config.get("k").unwrap_or(5.0);
        if k < 1.0 {
            return Err(EvalError::FitFailure {
                method: self.name().to_string(),
                config: config.id(),
                reason: format!("k must be at least 1, got {}", k),
            });
        }

        let labelled = train.training_indices();
        let rows: Vec<Vec<u8>> = labelled.iter().map(|&i| train.row(i).to_vec()).collect();
        let labels: Vec<Label> = labelled.iter().map(|&i| train.label(i)).collect();
        let k = (k as usize).min(rows.len());

        Ok(Box::new(FittedKnn { rows, labels, k }))
    }
}

impl FittedScorer for FittedKnn {
    fn predict_probability(&self, row: &[u8]) -> f64 {
        let similarities: Vec<f64> = self.rows.iter().map(|r| tanimoto(r, row)).collect();
        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        // stable: equally similar neighbours keep training order
        order.sort_by(|&a, &b| similarities[b].total_cmp(&similarities[a]));

        let sensitive = order.iter().take(self.k).filter(|&&i| is_sensitive(self.labels[i])).count();
        sensitive as f64 / self.k as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tanimoto() {
        assert_eq!(tanimoto(&[1, 1, 0, 0], &[1, 0, 1, 0]), 1.0 / 3.0);
        assert_eq!(tanimoto(&[0, 0], &[0, 0]), 1.0);
        assert_eq!(tanimoto(&[1, 0], &[0, 1]), 0.0);
    }

    #[test]
    fn test_knn_grid() {
        let scorer = KnnScorer { k_values: vec![1, 3] };
        let grid = scorer.param_grid();
        assert_eq!(grid.iter().map(|c| c.id()).collect::<Vec<_>>(), vec!["k=1", "k=3"]);
    }

    #[test]
    fn test_knn_nearest_neighbour_vote() {
        let data = FeatureMatrix::test().training_subset();
        let scorer = KnnScorer { k_values: vec![1] };
        let fitted = scorer.fit(&data, &scorer.param_grid()[0], 0).unwrap();

        // identical to s1 (sensitive)
        assert_eq!(fitted.predict_probability(&[1, 0, 1]), 1.0);
        // identical to s5 (resistant)
        assert_eq!(fitted.predict_probability(&[0, 0, 1]), 0.0);
    }

    #[test]
    fn test_knn_k_larger_than_training_set_is_clamped() {
        let data = FeatureMatrix::test().training_subset();
        let scorer = KnnScorer { k_values: vec![50] };
        let fitted = scorer.fit(&data, &scorer.param_grid()[0], 0).unwrap();
        assert_eq!(fitted.predict_probability(&[1, 1, 1]), 0.5, "all six neighbours vote, three are sensitive");
    }

    #[test]
    fn test_knn_single_class_fails() {
        let data = FeatureMatrix::test().subset(&[0, 1, 2]);
        let scorer = KnnScorer { k_values: vec![1] };
        assert!(matches!(scorer.fit(&data, &scorer.param_grid()[0], 0), Err(EvalError::FitFailure { .. })));
    }

    #[test]
    fn test_knn_invalid_k_fails() {
        let data = FeatureMatrix::test().training_subset();
        let scorer = KnnScorer { k_values: vec![0] };
        assert!(matches!(scorer.fit(&data, &scorer.param_grid()[0], 0), Err(EvalError::FitFailure { .. })));
    }
}
