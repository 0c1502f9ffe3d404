use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::data::FeatureMatrix;
use crate::error::EvalError;
use crate::param::{FitFailurePolicy, Param};
use crate::scorer::{predict_checked, FittedScorer, Scorer};
use crate::utils::derive_seed;

/// Native importance of one feature as reported by a fitted scorer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Probability of an unlabelled sample, averaged over the fitted configurations
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TestPrediction {
    pub sample: String,
    pub probability: f64,
    pub n_configs: usize,
}

/// One method refitted on the whole training subset
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FinalModel {
    pub method: String,
    pub fitted_configs: Vec<String>,
    pub failures: Vec<String>,
    /// Configuration the importances come from
    pub importance_config: Option<String>,
    pub importances: Option<Vec<FeatureImportance>>,
    pub test_predictions: Vec<TestPrediction>,
}

/// The `n` most important features of `fitted`, highest first.
///
/// Equal scores keep the scorer's feature order. Non-finite scores are
/// dropped. Fails with `NoImportanceAvailable` if the scorer reports none.
pub fn top_importances(fitted: &dyn FittedScorer, method: &str, n: usize) -> Result<Vec<FeatureImportance>, EvalError> {
    let importances = fitted
        .importances()
        .ok_or_else(|| EvalError::NoImportanceAvailable { method: method.to_string() })?;

    let total = importances.len();
    let mut ranked: Vec<FeatureImportance> = importances
        .into_iter()
        .filter(|(_, score)| score.is_finite())
        .map(|(feature, importance)| FeatureImportance { feature, importance })
        .collect();
    if ranked.len() < total {
        warn!("{}: {} non-finite importances ignored", method, total - ranked.len());
    }

    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked.truncate(n);
    Ok(ranked)
}

/// Fit every configuration of `scorer` on the labelled samples of `data`,
/// keep the importances of the first configuration that fits and score the
/// unlabelled samples with the average probability of all fitted
/// configurations.
///
/// A failing configuration is skipped or aborts the fit according to
/// `cv.fit_failure_policy`; when none fits the result is `NoSuccessfulFit`.
pub fn fit_final(scorer: &dyn Scorer, data: &FeatureMatrix, param: &Param, running: Arc<AtomicBool>) -> Result<FinalModel, EvalError> {
    let training = data.training_subset();
    let test = data.test_subset();
    if training.sample_len() == 0 {
        return Err(EvalError::EmptyTrainingSet);
    }

    let mut model = FinalModel {
        method: scorer.name().to_string(),
        fitted_configs: Vec::new(),
        failures: Vec::new(),
        importance_config: None,
        importances: None,
        test_predictions: Vec::new(),
    };
    let mut sums = vec![0.0; test.sample_len()];

    for (config_idx, config) in scorer.param_grid().iter().enumerate() {
        if !running.load(Ordering::Relaxed) {
            return Err(EvalError::Cancelled);
        }

        // the full-data fit is keyed as one fold past the cross-validation folds
        let seed = derive_seed(param.general.seed, &[param.cv.outer_folds as u64, config_idx as u64]);
        let outcome = scorer
            .fit(&training, config, seed)
            .and_then(|fitted| predict_checked(fitted.as_ref(), scorer.name(), config, &test).map(|p| (fitted, p)));

        let (fitted, probabilities) = match outcome {
            Ok(fit) => fit,
            Err(e) if param.cv.fit_failure_policy == FitFailurePolicy::abort => return Err(e),
            Err(e) => {
                warn!("Final fit: {}", e);
                model.failures.push(e.to_string());
                continue;
            }
        };

        for (sum, p) in sums.iter_mut().zip(probabilities) {
            *sum += p;
        }
        model.fitted_configs.push(config.id());

        if param.importance.compute_importance && model.importance_config.is_none() {
            match top_importances(fitted.as_ref(), scorer.name(), param.importance.top_n) {
                Ok(top) => {
                    debug!("{} importances taken from configuration {}", scorer.name(), config);
                    model.importances = Some(top);
                }
                Err(e) => warn!("{}", e),
            }
            model.importance_config = Some(config.id());
        }
    }

    if model.fitted_configs.is_empty() {
        let sample = test.sample_names().first().or(training.sample_names().first()).cloned().unwrap_or_default();
        return Err(EvalError::NoSuccessfulFit { method: model.method, sample });
    }

    let n_configs = model.fitted_configs.len();
    model.test_predictions = test
        .sample_names()
        .iter()
        .zip(sums)
        .map(|(sample, sum)| TestPrediction { sample: sample.clone(), probability: sum / n_configs as f64, n_configs })
        .collect();

    info!("Final {} model: {} configurations fitted on {} samples, {} unlabelled samples scored",
        model.method, n_configs, training.sample_len(), model.test_predictions.len());
    Ok(model)
}
