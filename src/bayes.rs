use crate::data::{FeatureMatrix, Label};
use crate::error::EvalError;
use crate::scorer::{require_both_classes, sensitive_prior, FittedScorer, ParamConfig, Scorer};

/// Bernoulli naive Bayes with additive (Lidstone) smoothing; the grid runs over alpha.
pub struct NaiveBayesScorer {
    pub alphas: Vec<f64>,
}

struct FittedNaiveBayes {
    features: Vec<String>,
    log_prior_sensitive: f64,
    log_prior_resistant: f64,
    // per feature: (ln P(x=1|class), ln P(x=0|class))
    sensitive: Vec<(f64, f64)>,
    resistant: Vec<(f64, f64)>,
}

impl Scorer for NaiveBayesScorer {
    fn name(&self) -> &str {
        "bayes"
    }

    fn param_grid(&self) -> Vec<ParamConfig> {
        self.alphas.iter().map(|&alpha| ParamConfig::new().with("alpha", alpha)).collect()
    }

    fn fit(&self, train: &FeatureMatrix, config: &ParamConfig, _seed: u64) -> Result<Box<dyn FittedScorer>, EvalError> {
        let (n_resistant, n_sensitive) = require_both_classes(self.name(), train, config)?;

        let alpha = config.get("alpha").unwrap_or(1.0);
        if !(alpha > 0.0 && alpha.is_finite()) {
            return Err(EvalError::FitFailure {
                method: self.name().to_string(),
                config: config.id(),
                reason: format!("smoothing alpha must be positive, got {}", alpha),
            });
        }

        let mut present_sensitive = vec![0usize; train.feature_len()];
        let mut present_resistant = vec![0usize; train.feature_len()];
        for i in 0..train.sample_len() {
            let counts = match train.label(i) {
                Label::Sensitive => &mut present_sensitive,
                Label::Resistant => &mut present_resistant,
                Label::Missing => continue,
            };
            for (j, &v) in train.row(i).iter().enumerate() {
                counts[j] += v as usize;
            }
        }

        let log_probabilities = |present: &[usize], total: usize| -> Vec<(f64, f64)> {
            present
                .iter()
                .map(|&c| {
                    let theta = (c as f64 + alpha) / (total as f64 + 2.0 * alpha);
                    (theta.ln(), (1.0 - theta).ln())
                })
                .collect()
        };

        let prior = sensitive_prior(train);
        Ok(Box::new(FittedNaiveBayes {
            features: train.feature_names().to_vec(),
            log_prior_sensitive: prior.ln(),
            log_prior_resistant: (1.0 - prior).ln(),
            sensitive: log_probabilities(&present_sensitive, n_sensitive),
            resistant: log_probabilities(&present_resistant, n_resistant),
        }))
    }
}

impl FittedNaiveBayes {
    fn log_likelihood(&self, row: &[u8], table: &[(f64, f64)], log_prior: f64) -> f64 {
        row.iter()
            .zip(table.iter())
            .map(|(&x, &(present, absent))| if x == 1 { present } else { absent })
            .sum::<f64>()
            + log_prior
    }
}

impl FittedScorer for FittedNaiveBayes {
    fn predict_probability(&self, row: &[u8]) -> f64 {
        let s = self.log_likelihood(row, &self.sensitive, self.log_prior_sensitive);
        let r = self.log_likelihood(row, &self.resistant, self.log_prior_resistant);
        1.0 / (1.0 + (r - s).exp())
    }

    /// |ln P(x=1|sensitive) - ln P(x=1|resistant)| per feature
    fn importances(&self) -> Option<Vec<(String, f64)>> {
        Some(
            self.features
                .iter()
                .zip(self.sensitive.iter().zip(self.resistant.iter()))
                .map(|(name, (s, r))| (name.clone(), (s.0 - r.0).abs()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bayes_scores_marker_carriers_higher() {
        let data = FeatureMatrix::test_balanced(8);
        let scorer = NaiveBayesScorer { alphas: vec![1.0] };
        let fitted = scorer.fit(&data, &scorer.param_grid()[0], 0).unwrap();

        let with_marker = fitted.predict_probability(&[1, 1]);
        let without_marker = fitted.predict_probability(&[0, 1]);
        assert!(with_marker > 0.5 && without_marker < 0.5, "{} vs {}", with_marker, without_marker);
        // four sensitive carriers, alpha = 1: theta_s = 5/6, theta_r = 1/6, equal priors
        assert!((with_marker - 5.0 / 6.0).abs() < 1e-12, "got {}", with_marker);
    }

    #[test]
    fn test_bayes_probabilities_in_unit_interval() {
        let data = FeatureMatrix::test().training_subset();
        let scorer = NaiveBayesScorer { alphas: vec![0.1, 1.0] };
        for config in scorer.param_grid() {
            let fitted = scorer.fit(&data, &config, 0).unwrap();
            for i in 0..data.sample_len() {
                let p = fitted.predict_probability(data.row(i));
                assert!((0.0..=1.0).contains(&p));
            }
        }
    }

    #[test]
    fn test_bayes_importances_rank_marker_above_constant() {
        let data = FeatureMatrix::test_balanced(8);
        let scorer = NaiveBayesScorer { alphas: vec![1.0] };
        let fitted = scorer.fit(&data, &scorer.param_grid()[0], 0).unwrap();
        let importances = fitted.importances().unwrap();

        assert_eq!(importances.len(), 2);
        assert_eq!(importances[0].0, "marker");
        assert!(importances[0].1 > importances[1].1);
        assert!(importances[1].1.abs() < 1e-12, "a constant feature carries no information");
    }

    #[test]
    fn test_bayes_rejects_single_class_and_bad_alpha() {
        let data = FeatureMatrix::test().training_subset();
        let scorer = NaiveBayesScorer { alphas: vec![0.0] };
        assert!(matches!(scorer.fit(&data, &scorer.param_grid()[0], 0), Err(EvalError::FitFailure { .. })));

        let single = data.subset(&[3, 4, 5]);
        let scorer = NaiveBayesScorer { alphas: vec![1.0] };
        assert!(matches!(scorer.fit(&single, &scorer.param_grid()[0], 0), Err(EvalError::FitFailure { .. })));
    }
}
