use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::BufReader;

/// What the harness does when one configuration of a method fails to fit
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[allow(non_camel_case_types)]
pub enum FitFailurePolicy {
    /// Log the failure and average over the configurations that did fit
    skip,
    /// Stop the whole run on the first failure
    abort,
}

// Field definitions and associated default values

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Param {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub association: Association,
    #[serde(default)]
    pub cv: CV,
    #[serde(default)]
    pub methods: Methods,
    #[serde(default)]
    pub knn: Knn,
    #[serde(default)]
    pub bayes: Bayes,
    #[serde(default)]
    pub importance: Importance,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct General {
    #[serde(default = "seed_default")]
    pub seed: u64,
    #[serde(default = "one_default")]
    pub thread_number: usize,
    #[serde(default = "log_base_default")]
    pub log_base: String,
    #[serde(default = "log_suffix_default")]
    pub log_suffix: String,
    #[serde(default = "log_level_default")]
    pub log_level: String,
    #[serde(default = "empty_string")]
    pub save_exp: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct Data {
    #[serde(default = "empty_string")]
    pub X: String,
    #[serde(default = "empty_string")]
    pub y: String,
    #[serde(default = "true_default")]
    pub features_in_rows: bool,
    #[serde(default = "class_names_default")]
    pub classes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Association {
    #[serde(default = "max_adj_pvalue_default")]
    pub max_adj_pvalue: f64,
    #[serde(default = "n_to_display_default")]
    pub n_to_display: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CV {
    #[serde(default = "folds_default")]
    pub outer_folds: usize,
    #[serde(default = "true_default")]
    pub stratify: bool,
    #[serde(default = "fit_failure_policy_default")]
    pub fit_failure_policy: FitFailurePolicy,
    #[serde(default = "one_f64_default")]
    pub preselect_max_adj_pvalue: f64,
    #[serde(default = "false_default")]
    pub keep_raw_predictions: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Methods {
    #[serde(default = "method_names_default")]
    pub names: Vec<String>,
    #[serde(default = "half_default")]
    pub constant_value: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Knn {
    #[serde(default = "k_values_default")]
    pub k_values: Vec<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Bayes {
    #[serde(default = "alphas_default")]
    pub alphas: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Importance {
    #[serde(default = "true_default")]
    pub compute_importance: bool,
    #[serde(default = "importance_method_default")]
    pub method: String,
    #[serde(default = "top_n_default")]
    pub top_n: usize,
}

// Default section definitions

impl Default for General {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Data {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Association {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for CV {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Methods {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Knn {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Bayes {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Importance {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Param {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Param {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn get(param_file: String) -> Result<Param, Box<dyn Error>> {
    let param_file_reader = File::open(param_file)?;
    let param_reader = BufReader::new(param_file_reader);

    let mut config: Param = serde_yaml::from_reader(param_reader)?;

    validate(&mut config)?;

    Ok(config)
}

pub fn validate(param: &mut Param) -> Result<(), String> {
    if param.cv.outer_folds < 2 {
        return Err(format!(
            "Invalid outer_folds={}. Cross-validation needs at least 2 folds.",
            param.cv.outer_folds
        ));
    }

    if param.methods.names.is_empty() {
        return Err("At least one method must be listed in methods.names.".to_string());
    }

    if param.data.classes.len() != 2 {
        return Err(format!(
            "data.classes must name exactly two classes (resistant, sensitive), got {:?}",
            param.data.classes
        ));
    }

    if param.methods.names.iter().any(|n| n == "knn") && param.knn.k_values.is_empty() {
        return Err("knn is requested but knn.k_values is empty.".to_string());
    }

    if param.methods.names.iter().any(|n| n == "bayes") && param.bayes.alphas.is_empty() {
        return Err("bayes is requested but bayes.alphas is empty.".to_string());
    }

    if !(0.0..=1.0).contains(&param.methods.constant_value) {
        return Err(format!(
            "Invalid constant_value={:.3}. Must be in range [0, 1].",
            param.methods.constant_value
        ));
    }

    if param.association.max_adj_pvalue <= 0.0 || param.association.max_adj_pvalue > 1.0 {
        return Err(format!(
            "Invalid max_adj_pvalue={:.3}. Must be in range (0, 1].",
            param.association.max_adj_pvalue
        ));
    }

    if param.cv.preselect_max_adj_pvalue <= 0.0 || param.cv.preselect_max_adj_pvalue > 1.0 {
        return Err(format!(
            "Invalid preselect_max_adj_pvalue={:.3}. Must be in range (0, 1].",
            param.cv.preselect_max_adj_pvalue
        ));
    }

    Ok(())
}

/// Settings that are valid but worth a warning at the start of a run.
///
/// Kept apart from `validate`, which runs before any logger is installed.
pub fn advisories(param: &Param) -> Vec<String> {
    let mut notes = Vec::new();

    if param.importance.compute_importance && !param.methods.names.contains(&param.importance.method) {
        notes.push(format!(
            "Importance method '{}' is not among the evaluated methods {:?}: it will be fitted on its own.",
            param.importance.method, param.methods.names
        ));
    }

    if param.cv.fit_failure_policy == FitFailurePolicy::abort {
        notes.push("fit_failure_policy=abort: a single failing configuration will stop the whole run.".to_string());
    }

    notes
}

// Default value definitions

fn seed_default() -> u64 {
    4815162342
}
fn empty_string() -> String {
    "".to_string()
}
fn log_base_default() -> String {
    "".to_string()
}
fn log_suffix_default() -> String {
    "log".to_string()
}
fn log_level_default() -> String {
    "info".to_string()
}
fn folds_default() -> usize {
    5
}
fn fit_failure_policy_default() -> FitFailurePolicy {
    FitFailurePolicy::skip
}
fn max_adj_pvalue_default() -> f64 {
    0.05
}
fn n_to_display_default() -> usize {
    20
}
fn method_names_default() -> Vec<String> {
    vec!["knn".to_string(), "bayes".to_string()]
}
fn k_values_default() -> Vec<usize> {
    vec![3, 5, 7]
}
fn alphas_default() -> Vec<f64> {
    vec![0.5, 1.0]
}
fn importance_method_default() -> String {
    "bayes".to_string()
}
fn top_n_default() -> usize {
    20
}
fn class_names_default() -> Vec<String> {
    vec!["resistant".to_string(), "sensitive".to_string()]
}
fn false_default() -> bool {
    false
}
fn true_default() -> bool {
    true
}
fn half_default() -> f64 {
    0.5
}
fn one_f64_default() -> f64 {
    1.0
}
fn one_default() -> usize {
    1
}
