use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::association::AssociationResult;
use crate::cv::{FoldAssignment, MethodPredictions};
use crate::data::{FeatureMatrix, Label};
use crate::error::EvalError;
use crate::importance::FinalModel;
use crate::param::Param;

//-----------------------------------------------------------------------------
// Method summaries
//-----------------------------------------------------------------------------

/// Cross-validated performance of one method
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MethodSummary {
    pub method: String,
    /// Pooled AUC over all held-out predictions, `None` when undefined
    pub auc: Option<f64>,
    /// Why `auc` is undefined
    pub auc_error: Option<String>,
    /// Mean and standard deviation of the per-fold AUCs
    pub fold_auc_mean: Option<f64>,
    pub fold_auc_std: Option<f64>,
    pub cv: MethodPredictions,
}

impl MethodSummary {
    /// Score the held-out predictions of one method.
    ///
    /// An incomplete method or a degenerate label set leaves the AUC undefined
    /// without affecting the other methods.
    pub fn new(cv: MethodPredictions) -> MethodSummary {
        let (auc, auc_error) = match (&cv.error, cv.auc()) {
            (Some(e), _) => (None, Some(e.clone())),
            (None, Ok(auc)) => (Some(auc), None),
            (None, Err(e)) => (None, Some(e.to_string())),
        };
        let (fold_auc_mean, fold_auc_std) = match cv.fold_auc_summary() {
            Some((mean, std)) => (Some(mean), Some(std)),
            None => (None, None),
        };

        match auc {
            Some(auc) => info!("\x1b[1;92m{}: cross-validated AUC {:.3}\x1b[0m", cv.method, auc),
            None => warn!("{}: cross-validated AUC undefined ({})", cv.method, auc_error.as_deref().unwrap_or("")),
        }

        MethodSummary { method: cv.method.clone(), auc, auc_error, fold_auc_mean, fold_auc_std, cv }
    }

    pub fn auc_display(&self) -> String {
        match self.auc {
            Some(auc) => format!("{:.3}", auc),
            None => "undefined".to_string(),
        }
    }
}

//-----------------------------------------------------------------------------
// Experiment structures and methods
//-----------------------------------------------------------------------------

/// Complete evaluation of a feature matrix
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Experiment {
    /// Experiment ID, i.e. output name and timestamp
    pub id: String,
    pub timestamp: String,
    /// Crate version and git hash used
    pub chemsens_version: String,
    pub parameters: Param,

    pub data: FeatureMatrix,

    /// Fold of every labelled sample
    pub fold_assignment: Vec<FoldAssignment>,
    /// Univariate associations on the whole training subset, best first
    pub associations: Vec<AssociationResult>,
    pub methods: Vec<MethodSummary>,
    /// Importance method refitted on the whole training subset, if requested
    pub final_model: Option<FinalModel>,

    /// Execution time in seconds
    pub execution_time: f64,
}

impl Experiment {
    pub fn method(&self, name: &str) -> Option<&MethodSummary> {
        self.methods.iter().find(|m| m.method == name)
    }

    /// Associations passing the reporting cutoff
    pub fn significant_associations(&self) -> Vec<&AssociationResult> {
        self.associations.iter().filter(|a| a.fdr <= self.parameters.association.max_adj_pvalue).collect()
    }

    /// Terminal summary of the experiment
    pub fn display_results(&self) -> String {
        let mut text = String::new();
        text.push_str(&format!("\n=============== Experiment {} ===============\n\n", self.id));
        text.push_str(&format!("chemsens version: v{}\n", self.chemsens_version));
        text.push_str(&format!("Timestamp: {}\n", self.timestamp));
        text.push_str(&format!("Execution time: {:.2}s\n", self.execution_time));

        let (resistant, sensitive, missing) = self.data.class_counts();
        text.push_str(&format!(
            "Data: {} features, {} {} / {} {} labelled samples, {} unlabelled\n",
            self.data.feature_len(),
            sensitive, self.data.class_name(Label::Sensitive),
            resistant, self.data.class_name(Label::Resistant),
            missing
        ));
        text.push_str(&format!(
            "Cross-validation: {} {}folds, seed {}\n\n",
            self.parameters.cv.outer_folds,
            if self.parameters.cv.stratify { "stratified " } else { "" },
            self.parameters.general.seed
        ));

        let significant = self.significant_associations();
        text.push_str(&format!(
            "\x1b[1;93mUnivariate associations\x1b[0m: {} of {} features with FDR <= {}\n",
            significant.len(), self.associations.len(), self.parameters.association.max_adj_pvalue
        ));
        if !significant.is_empty() {
            text.push_str(&format!("{:<30} {:>11} {:>11} {:>8}  {}\n", "feature", "p-value", "FDR", "log(OR)", "enriched in"));
            for a in significant.iter().take(self.parameters.association.n_to_display) {
                text.push_str(&format!(
                    "{:<30} {:>11.3e} {:>11.3e} {:>8.2}  {}\n",
                    a.feature, a.p_value, a.fdr, a.log_odds_ratio, self.data.class_name(a.enriched_in)
                ));
            }
            if significant.len() > self.parameters.association.n_to_display {
                text.push_str(&format!("... {} more\n", significant.len() - self.parameters.association.n_to_display));
            }
        }

        text.push_str("\n\x1b[1;93mCross-validated performance\x1b[0m\n");
        text.push_str(&format!("{:<12} {:>9} {:>17} {:>8} {:>8}\n", "method", "AUC", "fold AUC", "fits", "failed"));
        for m in &self.methods {
            let fold_auc = match (m.fold_auc_mean, m.fold_auc_std) {
                (Some(mean), Some(std)) => format!("{:.3} ± {:.3}", mean, std),
                _ => "undefined".to_string(),
            };
            text.push_str(&format!(
                "{:<12} {:>9} {:>17} {:>8} {:>8}\n",
                m.method, m.auc_display(), fold_auc, m.cv.successful_fits, m.cv.failed_fits
            ));
            if let Some(reason) = &m.auc_error {
                text.push_str(&format!("    {}\n", reason));
            }
        }

        if let Some(model) = &self.final_model {
            match (&model.importances, &model.importance_config) {
                (Some(importances), Some(config)) => {
                    text.push_str(&format!("\n\x1b[1;93mTop {} features\x1b[0m ({}, {})\n", importances.len(), model.method, config));
                    for (rank, imp) in importances.iter().enumerate() {
                        text.push_str(&format!("{:>4}. {:<30} {:.4}\n", rank + 1, imp.feature, imp.importance));
                    }
                }
                _ => text.push_str(&format!("\nNo feature importance available for {}\n", model.method)),
            }

            if !model.test_predictions.is_empty() {
                text.push_str(&format!("\n\x1b[1;93mUnlabelled samples\x1b[0m ({}, {} configurations)\n", model.method, model.fitted_configs.len()));
                for p in &model.test_predictions {
                    text.push_str(&format!("{:<20} {:.3}\n", p.sample, p.probability));
                }
            }
        }

        text
    }

    /// Saves the experiment in a suitable format based on file extension.
    pub fn save_auto<P: AsRef<Path>>(&self, path: P) -> Result<(), EvalError> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();

        match ext.as_str() {
            "json" => self.save_json(path),
            "bin" | "bincode" => self.save_bincode(path),
            _ => {
                warn!("Unknown format. Saving experiment in json.");
                self.save_json(path.with_extension("json"))
            }
        }
    }

    /// Saves to JSON (human readable, but may have slight inaccuracies for decimal values)
    fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), EvalError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| EvalError::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Saves as Bincode (compact binary, Rust-only)
    fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), EvalError> {
        let encoded = bincode::serialize(self).map_err(|e| EvalError::Serialization(e.to_string()))?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    /// Loads the experiment from a file, automatically detecting the format based on file extension.
    pub fn load_auto<P: AsRef<Path>>(path: P) -> Result<Self, EvalError> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();

        match ext.as_str() {
            "json" => Self::load_json(path),
            "bin" | "bincode" => Self::load_bincode(path),
            _ => Self::load_with_fallback(path),
        }
    }

    fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, EvalError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| EvalError::Serialization(e.to_string()))
    }

    fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self, EvalError> {
        let bytes = std::fs::read(path)?;
        bincode::deserialize(&bytes).map_err(|e| EvalError::Serialization(e.to_string()))
    }

    /// Tries Bincode, then JSON.
    fn load_with_fallback<P: AsRef<Path>>(path: P) -> Result<Self, EvalError> {
        let path = path.as_ref();

        if let Ok(experiment) = Self::load_bincode(path) {
            return Ok(experiment);
        }

        Self::load_json(path).map_err(|_| EvalError::Serialization(format!("unable to load an experiment from {}", path.display())))
    }
}
