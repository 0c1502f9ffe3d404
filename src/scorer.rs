//! Pluggable binary classifiers.
//!
//! The evaluation core never looks inside a classifier: anything that can be
//! fitted on a labelled `FeatureMatrix` with one parameter configuration and
//! then return a probability of the sensitive class is a `Scorer`. Each scorer
//! also declares the finite grid of configurations cross-validation averages
//! over.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bayes::NaiveBayesScorer;
use crate::data::{FeatureMatrix, Label};
use crate::error::EvalError;
use crate::knn::KnnScorer;
use crate::param::Param;

/// One hyperparameter configuration of a method's grid
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ParamConfig {
    pub values: BTreeMap<String, f64>,
}

impl ParamConfig {
    pub fn new() -> ParamConfig {
        ParamConfig { values: BTreeMap::new() }
    }

    pub fn with(mut self, key: &str, value: f64) -> ParamConfig {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Stable identifier, e.g. `alpha=0.5,k=3`
    pub fn id(&self) -> String {
        if self.values.is_empty() {
            return "default".to_string();
        }
        self.values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for ParamConfig {
    fn default() -> Self {
        ParamConfig::new()
    }
}

impl fmt::Display for ParamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// A trainable binary classifier
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    /// Configurations tried during cross-validation; never empty
    fn param_grid(&self) -> Vec<ParamConfig>;

    /// Fit on labelled samples. `seed` makes randomised methods reproducible.
    ///
    /// Returns `FitFailure` when the data is degenerate for the method, e.g. a
    /// single class is present.
    fn fit(&self, train: &FeatureMatrix, config: &ParamConfig, seed: u64) -> Result<Box<dyn FittedScorer>, EvalError>;
}

/// The outcome of a successful `Scorer::fit`
pub trait FittedScorer: Send + Sync {
    /// Estimated probability that `row` is sensitive, in [0, 1]
    fn predict_probability(&self, row: &[u8]) -> f64;

    /// Native feature importances, `None` when the method has no such notion
    fn importances(&self) -> Option<Vec<(String, f64)>> {
        None
    }
}

/// Shared guard for methods that need both classes to learn anything
pub fn require_both_classes(method: &str, train: &FeatureMatrix, config: &ParamConfig) -> Result<(usize, usize), EvalError> {
    let (resistant, sensitive, _) = train.class_counts();
    if resistant == 0 || sensitive == 0 {
        return Err(EvalError::FitFailure {
            method: method.to_string(),
            config: config.id(),
            reason: format!("{} sensitive and {} resistant training samples", sensitive, resistant),
        });
    }
    Ok((resistant, sensitive))
}

/// Baseline returning the same probability for every sample
pub struct ConstantScorer {
    pub value: f64,
}

struct FittedConstant {
    value: f64,
}

impl Scorer for ConstantScorer {
    fn name(&self) -> &str {
        "constant"
    }

    fn param_grid(&self) -> Vec<ParamConfig> {
        vec![ParamConfig::new().with("value", self.value)]
    }

    fn fit(&self, _train: &FeatureMatrix, config: &ParamConfig, _seed: u64) -> Result<Box<dyn FittedScorer>, EvalError> {
        let value = config.get("value").unwrap_or(self.value);
        if !(0.0..=1.0).contains(&value) {
            return Err(EvalError::FitFailure {
                method: self.name().to_string(),
                config: config.id(),
                reason: format!("constant probability {} outside [0, 1]", value),
            });
        }
        Ok(Box::new(FittedConstant { value }))
    }
}

impl FittedScorer for FittedConstant {
    fn predict_probability(&self, _row: &[u8]) -> f64 {
        self.value
    }
}

/// Ordered name -> scorer registry
pub struct ScorerRegistry {
    scorers: Vec<Box<dyn Scorer>>,
}

impl ScorerRegistry {
    pub fn new() -> ScorerRegistry {
        ScorerRegistry { scorers: Vec::new() }
    }

    /// Register a scorer; a scorer with the same name is replaced in place
    pub fn register(&mut self, scorer: Box<dyn Scorer>) {
        match self.scorers.iter().position(|s| s.name() == scorer.name()) {
            Some(idx) => self.scorers[idx] = scorer,
            None => self.scorers.push(scorer),
        }
    }

    /// Build the built-in scorers listed in `param.methods.names`, in that order
    pub fn from_param(param: &Param) -> Result<ScorerRegistry, EvalError> {
        let mut registry = ScorerRegistry::new();
        for name in &param.methods.names {
            let scorer: Box<dyn Scorer> = match name.as_str() {
                "knn" => Box::new(KnnScorer { k_values: param.knn.k_values.clone() }),
                "bayes" => Box::new(NaiveBayesScorer { alphas: param.bayes.alphas.clone() }),
                "constant" => Box::new(ConstantScorer { value: param.methods.constant_value }),
                other => return Err(EvalError::UnknownMethod(other.to_string())),
            };
            registry.register(scorer);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Scorer> {
        self.scorers.iter().find(|s| s.name() == name).map(|s| s.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.scorers.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn scorers(&self) -> &[Box<dyn Scorer>] {
        &self.scorers
    }

    pub fn len(&self) -> usize {
        self.scorers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }
}

impl Default for ScorerRegistry {
    fn default() -> Self {
        ScorerRegistry::new()
    }
}

/// Probabilities of every row of `data`, rejecting anything outside [0, 1]
pub fn predict_checked(fitted: &dyn FittedScorer, method: &str, config: &ParamConfig, data: &FeatureMatrix) -> Result<Vec<f64>, EvalError> {
    (0..data.sample_len())
        .map(|i| {
            let p = fitted.predict_probability(data.row(i));
            if p.is_finite() && (0.0..=1.0).contains(&p) {
                Ok(p)
            } else {
                Err(EvalError::FitFailure {
                    method: method.to_string(),
                    config: config.id(),
                    reason: format!("probability {} predicted for sample '{}'", p, data.sample_names()[i]),
                })
            }
        })
        .collect()
}

/// Fit one configuration and check the probability it gives for every row of `data`
pub fn fit_and_predict(scorer: &dyn Scorer, train: &FeatureMatrix, data: &FeatureMatrix, config: &ParamConfig, seed: u64) -> Result<Vec<f64>, EvalError> {
    let fitted = scorer.fit(train, config, seed)?;
    predict_checked(fitted.as_ref(), scorer.name(), config, data)
}

/// Fraction of sensitive samples, the prior most methods start from
pub fn sensitive_prior(train: &FeatureMatrix) -> f64 {
    let (resistant, sensitive, _) = train.class_counts();
    sensitive as f64 / (resistant + sensitive).max(1) as f64
}

pub(crate) fn is_sensitive(label: Label) -> bool {
    label == Label::Sensitive
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_config_id_is_sorted_and_stable() {
        let config = ParamConfig::new().with("k", 3.0).with("alpha", 0.5);
        assert_eq!(config.id(), "alpha=0.5,k=3");
        assert_eq!(ParamConfig::new().id(), "default");
        assert_eq!(config.get("k"), Some(3.0));
        assert_eq!(config.get("missing"), None);
    }

    #[test]
    fn test_constant_scorer_predicts_its_value() {
        let data = FeatureMatrix::test().training_subset();
        let scorer = ConstantScorer { value: 0.5 };
        let grid = scorer.param_grid();
        assert_eq!(grid.len(), 1);
        let fitted = scorer.fit(&data, &grid[0], 0).unwrap();
        assert_eq!(fitted.predict_probability(data.row(0)), 0.5);
        assert!(fitted.importances().is_none());
    }

    #[test]
    fn test_constant_scorer_rejects_invalid_probability() {
        let data = FeatureMatrix::test().training_subset();
        let scorer = ConstantScorer { value: 1.5 };
        let grid = scorer.param_grid();
        assert!(matches!(scorer.fit(&data, &grid[0], 0), Err(EvalError::FitFailure { .. })));
    }

    #[test]
    fn test_registry_from_param_keeps_order() {
        let mut param = Param::default();
        param.methods.names = vec!["constant".to_string(), "knn".to_string(), "bayes".to_string()];
        let registry = ScorerRegistry::from_param(&param).unwrap();
        assert_eq!(registry.names(), vec!["constant", "knn", "bayes"]);
        assert!(registry.get("knn").is_some());
        assert!(registry.get("svm").is_none());
    }

    #[test]
    fn test_registry_unknown_method() {
        let mut param = Param::default();
        param.methods.names = vec!["svm".to_string()];
        assert!(matches!(ScorerRegistry::from_param(&param), Err(EvalError::UnknownMethod(_))));
    }

    #[test]
    fn test_registry_register_replaces_same_name() {
        let mut registry = ScorerRegistry::new();
        registry.register(Box::new(ConstantScorer { value: 0.2 }));
        registry.register(Box::new(ConstantScorer { value: 0.7 }));
        assert_eq!(registry.len(), 1);
        let grid = registry.get("constant").unwrap().param_grid();
        assert_eq!(grid[0].get("value"), Some(0.7));
    }

    #[test]
    fn test_require_both_classes() {
        let data = FeatureMatrix::test().training_subset();
        let config = ParamConfig::new();
        assert_eq!(require_both_classes("m", &data, &config).unwrap(), (3, 3));
        let single = data.subset(&[0, 1, 2]);
        assert!(matches!(require_both_classes("m", &single, &config), Err(EvalError::FitFailure { .. })));
    }

    #[test]
    fn test_fit_and_predict_rejects_out_of_range_probability() {
        struct Broken;
        struct FittedBroken;
        impl FittedScorer for FittedBroken {
            fn predict_probability(&self, _row: &[u8]) -> f64 { f64::NAN }
        }
        impl Scorer for Broken {
            fn name(&self) -> &str { "broken" }
            fn param_grid(&self) -> Vec<ParamConfig> { vec![ParamConfig::new()] }
            fn fit(&self, _t: &FeatureMatrix, _c: &ParamConfig, _s: u64) -> Result<Box<dyn FittedScorer>, EvalError> {
                Ok(Box::new(FittedBroken))
            }
        }
        let data = FeatureMatrix::test().training_subset();
        let result = fit_and_predict(&Broken, &data, &data, &ParamConfig::new(), 0);
        assert!(matches!(result, Err(EvalError::FitFailure { .. })));
    }
}
