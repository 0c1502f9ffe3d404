#![allow(non_snake_case)]

pub mod association;
pub mod auc;
pub mod bayes;
pub mod cv;
pub mod data;
pub mod error;
pub mod experiment;
pub mod importance;
pub mod knn;
pub mod param;
pub mod scorer;
pub mod utils;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::Local;
use log::{debug, info, warn};

use crate::association::compute_associations;
use crate::cv::cross_validate;
use crate::data::FeatureMatrix;
use crate::error::EvalError;
use crate::experiment::{Experiment, MethodSummary};
use crate::importance::{fit_final, FinalModel};
use crate::param::{self as params, FitFailurePolicy, Param};
use crate::scorer::ScorerRegistry;

/// Load the matrix described by `param.data` and evaluate the built-in methods
/// listed in `param.methods.names`.
pub fn run(param: &Param, running: Arc<AtomicBool>) -> Result<Experiment, EvalError> {
    let mut data = FeatureMatrix::load_data(&param.data.X, &param.data.y, param.data.features_in_rows)?;
    data.set_classes(param.data.classes.clone());

    let registry = ScorerRegistry::from_param(param)?;
    run_on_data(&data, &registry, param, running)
}

/// Evaluate every scorer of `registry` on `data`.
///
/// Univariate associations and cross-validation only see the labelled
/// samples; unlabelled samples are scored by the importance method refitted
/// on the whole training subset.
pub fn run_on_data(data: &FeatureMatrix, registry: &ScorerRegistry, param: &Param, running: Arc<AtomicBool>) -> Result<Experiment, EvalError> {
    let start = std::time::Instant::now();
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();

    debug!("\x1b[2;97m{:?}\x1b[0m", data);
    for note in params::advisories(param) {
        warn!("{}", note);
    }
    if registry.is_empty() {
        return Err(EvalError::InvalidParam("no scoring method registered".to_string()));
    }

    let training = data.training_subset();
    if training.sample_len() == 0 {
        return Err(EvalError::EmptyTrainingSet);
    }

    info!("Univariate associations\n-----------------------------------------------------");
    let associations = compute_associations(&training, param.general.thread_number)?;
    let n_significant = associations.iter().filter(|a| a.fdr <= param.association.max_adj_pvalue).count();
    info!("{} features with FDR <= {}", n_significant, param.association.max_adj_pvalue);

    info!("Cross-validation\n-----------------------------------------------------");
    let cv_result = cross_validate(&training, registry, param, Arc::clone(&running))?;
    let methods: Vec<MethodSummary> = cv_result.methods.into_iter().map(MethodSummary::new).collect();

    let final_model = if param.importance.compute_importance || training.sample_len() < data.sample_len() {
        info!("Final model\n-----------------------------------------------------");
        if !param.importance.compute_importance {
            info!("Skipping importance calculation (disabled in parameters)");
        }
        run_final_model(data, registry, param, running)?
    } else {
        info!("Skipping final model (importances disabled, no unlabelled sample)");
        None
    };

    let exec_time = start.elapsed().as_secs_f64();
    let name = match param.general.save_exp.split('.').next() {
        Some(stem) if !stem.is_empty() => stem,
        _ => "chemsens",
    };

    Ok(Experiment {
        id: format!("{}_{}", name, timestamp),
        timestamp,
        chemsens_version: format!("{}#{}", env!("CARGO_PKG_VERSION"), env!("CHEMSENS_GIT_SHA")),
        parameters: param.clone(),
        data: data.clone(),
        fold_assignment: cv_result.fold_assignment,
        associations,
        methods,
        final_model,
        execution_time: exec_time,
    })
}

/// Refit `importance.method` on the whole training subset and score the
/// unlabelled samples with it.
///
/// A method that cannot be fitted only loses the final model; cancellation,
/// aborting fit failures and structural errors stop the run.
fn run_final_model(data: &FeatureMatrix, registry: &ScorerRegistry, param: &Param, running: Arc<AtomicBool>) -> Result<Option<FinalModel>, EvalError> {
    let method = &param.importance.method;

    let standalone;
    let scorer = match registry.get(method) {
        Some(scorer) => scorer,
        None => {
            let mut single = param.clone();
            single.methods.names = vec![method.clone()];
            standalone = match ScorerRegistry::from_param(&single) {
                Ok(registry) => registry,
                Err(e) => {
                    warn!("No final model: {}", e);
                    return Ok(None);
                }
            };
            match standalone.get(method) {
                Some(scorer) => scorer,
                None => return Ok(None),
            }
        }
    };

    match fit_final(scorer, data, param, running) {
        Ok(model) => Ok(Some(model)),
        Err(e) if e.is_structural() || matches!(e, EvalError::Cancelled) => Err(e),
        Err(e) if param.cv.fit_failure_policy == FitFailurePolicy::abort => Err(e),
        Err(e) => {
            warn!("No final model: {}", e);
            Ok(None)
        }
    }
}
