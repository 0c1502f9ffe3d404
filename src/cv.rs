use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::association::compute_associations;
use crate::auc::rank_auc;
use crate::data::{FeatureMatrix, Label};
use crate::error::EvalError;
use crate::param::{FitFailurePolicy, Param};
use crate::scorer::{fit_and_predict, ParamConfig, ScorerRegistry};
use crate::utils::{self, derive_seed, mean_and_std};

/// One held-out probability for one sample and one method.
///
/// Raw records carry the configuration they come from; aggregated records
/// (`config` is `None`) average the `n_configs` configurations that fitted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionRecord {
    pub sample: String,
    pub method: String,
    pub config: Option<String>,
    pub fold: usize,
    pub probability: f64,
    pub label: Label,
    pub n_configs: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FoldAssignment {
    pub sample: String,
    pub fold: usize,
}

/// Cross-validated predictions of one method
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MethodPredictions {
    pub method: String,
    pub grid_size: usize,
    pub successful_fits: usize,
    pub failed_fits: usize,
    pub failures: Vec<String>,
    /// One aggregated record per training sample, in matrix order
    pub predictions: Vec<PredictionRecord>,
    /// Per configuration records, only kept with `cv.keep_raw_predictions`
    pub raw_predictions: Vec<PredictionRecord>,
    /// AUC of each validation fold alone, `None` when undefined there
    pub fold_aucs: Vec<Option<f64>>,
    /// Set when the method could not produce a prediction for every sample
    pub error: Option<String>,
}

impl MethodPredictions {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// (score, label) pairs for ranking metrics
    pub fn ranking_input(&self) -> Vec<(f64, Label)> {
        self.predictions.iter().map(|r| (r.probability, r.label)).collect()
    }

    /// Pooled AUC over all folds
    pub fn auc(&self) -> Result<f64, EvalError> {
        rank_auc(&self.ranking_input())
    }

    /// Mean and standard deviation of the defined per-fold AUCs
    pub fn fold_auc_summary(&self) -> Option<(f64, f64)> {
        let defined: Vec<f64> = self.fold_aucs.iter().flatten().copied().collect();
        if defined.is_empty() { None } else { Some(mean_and_std(&defined)) }
    }
}

/// Outcome of a complete cross-validation run
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CvResult {
    pub fold_assignment: Vec<FoldAssignment>,
    pub methods: Vec<MethodPredictions>,
}

impl CvResult {
    pub fn method(&self, name: &str) -> Option<&MethodPredictions> {
        self.methods.iter().find(|m| m.method == name)
    }
}

struct Task<'a> {
    fold: usize,
    method_idx: usize,
    config_idx: usize,
    config: &'a ParamConfig,
}

/// This class implement Cross Validation dataset, e.g. split the labelled samples in K validation_folds
/// and keep, for each of them, the complementary training set.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CV {
    /// Per fold, indices (into the source matrix) of the held-out samples, in matrix order
    pub folds: Vec<Vec<usize>>,
    pub validation_folds: Vec<FeatureMatrix>,
    pub training_sets: Vec<FeatureMatrix>,
    sample_names: Vec<String>,
    labels: Vec<Label>,
}

impl CV {
    /// Partition the labelled samples of `data` into `outer_folds` folds.
    ///
    /// Stratified folds deal each class separately so that every fold keeps the
    /// class ratio; otherwise samples are shuffled as a whole. Either way fold
    /// sizes differ by at most one and the result only depends on `rng` and the
    /// sample order of `data`.
    pub fn new(data: &FeatureMatrix, outer_folds: usize, stratify: bool, rng: &mut ChaCha8Rng) -> Result<CV, EvalError> {
        if outer_folds < 2 {
            return Err(EvalError::InvalidParam(format!("cross-validation needs at least 2 folds, got {}", outer_folds)));
        }

        let labelled = data.training_indices();
        if labelled.is_empty() {
            return Err(EvalError::EmptyTrainingSet);
        }
        if labelled.len() < outer_folds {
            warn!("{} labelled samples for {} folds: some validation folds will be empty", labelled.len(), outer_folds);
        }

        let mut folds = if stratify {
            let sensitive: Vec<usize> = labelled.iter().copied().filter(|&i| data.label(i) == Label::Sensitive).collect();
            let resistant: Vec<usize> = labelled.iter().copied().filter(|&i| data.label(i) == Label::Resistant).collect();
            utils::split_into_stratified_random_chunks(vec![sensitive, resistant], outer_folds, rng)
        } else {
            utils::split_into_balanced_random_chunks(labelled.clone(), outer_folds, rng)
        };
        for fold in folds.iter_mut() {
            fold.sort_unstable();
        }

        let mut fold_of = vec![usize::MAX; data.sample_len()];
        for (f, fold) in folds.iter().enumerate() {
            for &i in fold {
                fold_of[i] = f;
            }
        }

        let validation_folds: Vec<FeatureMatrix> = folds.iter().map(|fold| data.subset(fold)).collect();
        let training_sets: Vec<FeatureMatrix> = (0..outer_folds)
            .map(|f| {
                let train: Vec<usize> = labelled.iter().copied().filter(|&i| fold_of[i] != f).collect();
                data.subset(&train)
            })
            .collect();

        debug!("Fold sizes: {:?}", folds.iter().map(|f| f.len()).collect::<Vec<_>>());

        Ok(CV {
            folds,
            validation_folds,
            training_sets,
            sample_names: data.sample_names().to_vec(),
            labels: data.labels().to_vec(),
        })
    }

    pub fn fold_count(&self) -> usize {
        self.folds.len()
    }

    /// Sample -> fold, in matrix order
    pub fn fold_assignment(&self) -> Vec<FoldAssignment> {
        let mut assignment: Vec<(usize, usize)> = self.folds
            .iter()
            .enumerate()
            .flat_map(|(f, fold)| fold.iter().map(move |&i| (i, f)))
            .collect();
        assignment.sort_unstable();
        assignment
            .into_iter()
            .map(|(i, fold)| FoldAssignment { sample: self.sample_names[i].clone(), fold })
            .collect()
    }

    /// (training sample names, validation sample names) of every fold
    pub fn get_ids(&self) -> Vec<(Vec<String>, Vec<String>)> {
        self.training_sets.iter()
            .zip(self.validation_folds.iter())
            .map(|(train, valid)| (train.sample_names().to_vec(), valid.sample_names().to_vec()))
            .collect()
    }

    /// Training and validation matrices of every fold, optionally restricted to
    /// the features associated with the label on that fold's training split.
    fn fold_data(&self, param: &Param) -> Vec<(Cow<'_, FeatureMatrix>, Cow<'_, FeatureMatrix>)> {
        let cutoff = param.cv.preselect_max_adj_pvalue;
        self.training_sets
            .iter()
            .zip(self.validation_folds.iter())
            .enumerate()
            .map(|(f, (train, valid))| {
                if cutoff >= 1.0 {
                    return (Cow::Borrowed(train), Cow::Borrowed(valid));
                }
                let mut kept: Vec<usize> = match compute_associations(train, param.general.thread_number) {
                    Ok(results) => results.iter().filter(|r| r.fdr <= cutoff).map(|r| r.feature_idx).collect(),
                    Err(e) => {
                        warn!("Fold #{}: feature preselection skipped ({})", f + 1, e);
                        Vec::new()
                    }
                };
                if kept.is_empty() {
                    warn!("Fold #{}: no feature with FDR <= {}, all features kept", f + 1, cutoff);
                    return (Cow::Borrowed(train), Cow::Borrowed(valid));
                }
                kept.sort_unstable();
                debug!("Fold #{}: {} features preselected", f + 1, kept.len());
                (Cow::Owned(train.project(&kept)), Cow::Owned(valid.project(&kept)))
            })
            .collect()
    }

    /// Fit every configuration of every registered method on every fold and
    /// collect held-out probabilities, averaged per (sample, method) over the
    /// configurations that fitted.
    ///
    /// Fits run in parallel and are merged in a fixed (method, fold,
    /// configuration) order. If `running` is cleared before all fits are done
    /// the run returns `Cancelled` and no aggregate is exposed.
    pub fn pass(&self, registry: &ScorerRegistry, param: &Param, running: Arc<AtomicBool>) -> Result<Vec<MethodPredictions>, EvalError> {
        let fold_data = self.fold_data(param);
        let grids: Vec<Vec<ParamConfig>> = registry.scorers().iter().map(|s| s.param_grid()).collect();

        let mut tasks: Vec<Task> = Vec::new();
        for (method_idx, grid) in grids.iter().enumerate() {
            for fold in 0..self.fold_count() {
                for (config_idx, config) in grid.iter().enumerate() {
                    tasks.push(Task { fold, method_idx, config_idx, config });
                }
            }
        }
        info!("Cross-validation: {} folds, {} methods, {} fits", self.fold_count(), registry.len(), tasks.len());

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(param.general.thread_number)
            .build()
            .map_err(|e| EvalError::InvalidParam(format!("cannot build thread pool: {}", e)))?;

        let outcomes: Vec<Result<Vec<f64>, EvalError>> = thread_pool.install(|| {
            tasks
                .par_iter()
                .map(|task| {
                    if !running.load(Ordering::Relaxed) {
                        return Err(EvalError::Cancelled);
                    }
                    let scorer = registry.scorers()[task.method_idx].as_ref();
                    let (train, valid) = &fold_data[task.fold];
                    let seed = derive_seed(param.general.seed, &[task.fold as u64, task.method_idx as u64, task.config_idx as u64]);
                    fit_and_predict(scorer, train, valid, task.config, seed)
                })
                .collect()
        });

        if outcomes.iter().any(|o| matches!(o, Err(EvalError::Cancelled))) {
            warn!("Cross-validation interrupted: partial predictions discarded");
            return Err(EvalError::Cancelled);
        }

        if param.cv.fit_failure_policy == FitFailurePolicy::abort {
            if let Some(position) = outcomes.iter().position(|o| o.is_err()) {
                return match outcomes.into_iter().nth(position) {
                    Some(Err(e)) => Err(e),
                    _ => Err(EvalError::Cancelled),
                };
            }
        }

        let mut methods: Vec<MethodPredictions> = registry
            .scorers()
            .iter()
            .zip(grids.iter())
            .map(|(scorer, grid)| MethodPredictions {
                method: scorer.name().to_string(),
                grid_size: grid.len(),
                successful_fits: 0,
                failed_fits: 0,
                failures: Vec::new(),
                predictions: Vec::new(),
                raw_predictions: Vec::new(),
                fold_aucs: Vec::new(),
                error: None,
            })
            .collect();

        let n = self.labels.len();
        let mut fold_of = vec![usize::MAX; n];
        for (f, fold) in self.folds.iter().enumerate() {
            for &i in fold {
                fold_of[i] = f;
            }
        }
        let mut sums: Vec<Vec<f64>> = vec![vec![0.0; n]; methods.len()];
        let mut counts: Vec<Vec<usize>> = vec![vec![0; n]; methods.len()];

        for (task, outcome) in tasks.iter().zip(outcomes.into_iter()) {
            let summary = &mut methods[task.method_idx];
            match outcome {
                Ok(probabilities) => {
                    summary.successful_fits += 1;
                    for (&i, p) in self.folds[task.fold].iter().zip(probabilities) {
                        sums[task.method_idx][i] += p;
                        counts[task.method_idx][i] += 1;
                        if param.cv.keep_raw_predictions {
                            summary.raw_predictions.push(PredictionRecord {
                                sample: self.sample_names[i].clone(),
                                method: summary.method.clone(),
                                config: Some(task.config.id()),
                                fold: task.fold,
                                probability: p,
                                label: self.labels[i],
                                n_configs: 1,
                            });
                        }
                    }
                }
                Err(e) => {
                    warn!("Fold #{}: {}", task.fold + 1, e);
                    summary.failed_fits += 1;
                    summary.failures.push(format!("fold {}: {}", task.fold + 1, e));
                }
            }
        }

        for (m, summary) in methods.iter_mut().enumerate() {
            if summary.grid_size == 0 {
                let message = format!("method '{}' declares an empty parameter grid", summary.method);
                warn!("{}", message);
                summary.error = Some(message);
                continue;
            }

            let probability = |i: usize| sums[m][i] / counts[m][i] as f64;

            summary.fold_aucs = self.folds
                .iter()
                .enumerate()
                .map(|(f, fold)| {
                    let fold_predictions: Vec<(f64, Label)> = fold.iter()
                        .filter(|&&i| counts[m][i] > 0)
                        .map(|&i| (probability(i), self.labels[i]))
                        .collect();
                    let fold_auc = rank_auc(&fold_predictions).ok();
                    debug!("Fold #{} | {} | validation AUC: {}", f + 1, summary.method,
                        fold_auc.map(|a| format!("{:.3}", a)).unwrap_or_else(|| "undefined".to_string()));
                    fold_auc
                })
                .collect();

            for i in 0..n {
                if fold_of[i] == usize::MAX || counts[m][i] == 0 {
                    continue;
                }
                summary.predictions.push(PredictionRecord {
                    sample: self.sample_names[i].clone(),
                    method: summary.method.clone(),
                    config: None,
                    fold: fold_of[i],
                    probability: probability(i),
                    label: self.labels[i],
                    n_configs: counts[m][i],
                });
            }

            let uncovered = self.folds.iter().flatten().copied().filter(|&i| counts[m][i] == 0).min();
            if let Some(i) = uncovered {
                let e = EvalError::NoSuccessfulFit { method: summary.method.clone(), sample: self.sample_names[i].clone() };
                warn!("{}", e);
                summary.error = Some(e.to_string());
                summary.predictions.clear();
            }

            info!("\x1b[1;93m{}: {} fits succeeded, {} failed\x1b[0m", summary.method, summary.successful_fits, summary.failed_fits);
        }

        Ok(methods)
    }
}

/// Partition `training` into `param.cv.outer_folds` folds seeded by
/// `param.general.seed` and cross-validate every method of `registry`.
pub fn cross_validate(training: &FeatureMatrix, registry: &ScorerRegistry, param: &Param, running: Arc<AtomicBool>) -> Result<CvResult, EvalError> {
    let mut rng = ChaCha8Rng::seed_from_u64(param.general.seed);
    let cv = CV::new(training, param.cv.outer_folds, param.cv.stratify, &mut rng)?;
    let methods = cv.pass(registry, param, running)?;
    Ok(CvResult { fold_assignment: cv.fold_assignment(), methods })
}
