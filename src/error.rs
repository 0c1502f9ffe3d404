use thiserror::Error;

/// Errors surfaced by the evaluation pipeline.
///
/// Structural problems (`InvalidMatrix`, `EmptyTrainingSet`) abort a run.
/// `FitFailure` is recoverable under the skip policy, `NoSuccessfulFit` and
/// `DegenerateLabelSet` only invalidate the method they concern, and
/// `NoImportanceAvailable` merely skips the importance step.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Invalid feature matrix: {0}")]
    InvalidMatrix(String),

    #[error("The training subset contains no labelled sample")]
    EmptyTrainingSet,

    #[error("Method '{method}' failed to fit with configuration '{config}': {reason}")]
    FitFailure {
        method: String,
        config: String,
        reason: String,
    },

    #[error("Method '{method}' has no successful fit covering sample '{sample}'")]
    NoSuccessfulFit { method: String, sample: String },

    #[error("AUC is undefined with {positives} sensitive and {negatives} resistant predictions")]
    DegenerateLabelSet { positives: usize, negatives: usize },

    #[error("Method '{method}' does not report feature importances")]
    NoImportanceAvailable { method: String },

    #[error("Unknown scoring method '{0}'")]
    UnknownMethod(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Run interrupted before all fits completed")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error while reading tabular input: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EvalError {
    /// Errors after which no partial result of the run is meaningful.
    pub fn is_structural(&self) -> bool {
        matches!(self, EvalError::InvalidMatrix(_) | EvalError::EmptyTrainingSet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_errors() {
        assert!(EvalError::InvalidMatrix("x".to_string()).is_structural());
        assert!(EvalError::EmptyTrainingSet.is_structural());
        assert!(!EvalError::Cancelled.is_structural());
        assert!(!EvalError::DegenerateLabelSet { positives: 0, negatives: 3 }.is_structural());
    }

    #[test]
    fn test_fit_failure_message_names_method_and_config() {
        let e = EvalError::FitFailure {
            method: "knn".to_string(),
            config: "k=3".to_string(),
            reason: "single class".to_string(),
        };
        let msg = e.to_string();
        assert!(msg.contains("knn") && msg.contains("k=3") && msg.contains("single class"));
    }
}
