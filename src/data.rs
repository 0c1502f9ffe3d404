use serde::{Serialize, Deserialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use log::{info, warn};
use crate::error::EvalError;

/// Sensitivity label of a sample. `Missing` marks unlabelled (test-set) samples,
/// which never take part in training or in any ground-truth evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Resistant,
    Sensitive,
    Missing,
}

impl Label {
    /// Parse a label cell. Accepts 1/0, the class names and the usual null markers.
    pub fn parse(value: &str) -> Result<Label, EvalError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "1.0" | "sensitive" | "s" => Ok(Label::Sensitive),
            "0" | "0.0" | "resistant" | "r" => Ok(Label::Resistant),
            "" | "na" | "nan" | "null" | "none" | "2" => Ok(Label::Missing),
            other => Err(EvalError::InvalidMatrix(format!("unknown label '{}'", other))),
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Label::Missing
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Label::Resistant => "resistant",
            Label::Sensitive => "sensitive",
            Label::Missing => "NA",
        };
        write!(f, "{}", s)
    }
}

/// Samples x binary features, plus one label per sample.
///
/// The matrix is immutable once built: filters (`subset`, `training_subset`,
/// `test_subset`) and projections (`project`) return new matrices that keep
/// the feature order and the sample order of the source.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[allow(non_snake_case)]
pub struct FeatureMatrix {
    X: Vec<Vec<u8>>,              // one row per sample, one column per feature
    y: Vec<Label>,
    features: Vec<String>,
    samples: Vec<String>,
    feature_len: usize,
    sample_len: usize,
    classes: Vec<String>,
}

impl FeatureMatrix {
    /// An empty matrix without features nor samples
    pub fn new() -> FeatureMatrix {
        FeatureMatrix {
            X: Vec::new(),
            y: Vec::new(),
            features: Vec::new(),
            samples: Vec::new(),
            feature_len: 0,
            sample_len: 0,
            classes: vec!["resistant".to_string(), "sensitive".to_string()],
        }
    }

    /// Build a matrix from an explicit schema and validate it.
    ///
    /// Fails with `InvalidMatrix` when a row length disagrees with the number of
    /// declared features, when a value is not 0/1, or when sample identifiers or
    /// feature names are duplicated.
    #[allow(non_snake_case)]
    pub fn from_rows(samples: Vec<String>, features: Vec<String>, X: Vec<Vec<u8>>, y: Vec<Label>) -> Result<FeatureMatrix, EvalError> {
        if samples.len() != X.len() || samples.len() != y.len() {
            return Err(EvalError::InvalidMatrix(format!(
                "{} sample identifiers, {} feature rows and {} labels",
                samples.len(), X.len(), y.len()
            )));
        }

        let mut seen = HashSet::new();
        for sample in &samples {
            if !seen.insert(sample.as_str()) {
                return Err(EvalError::InvalidMatrix(format!("duplicated sample identifier '{}'", sample)));
            }
        }

        let mut seen = HashSet::new();
        for feature in &features {
            if !seen.insert(feature.as_str()) {
                return Err(EvalError::InvalidMatrix(format!("duplicated feature name '{}'", feature)));
            }
        }

        for (i, row) in X.iter().enumerate() {
            if row.len() != features.len() {
                return Err(EvalError::InvalidMatrix(format!(
                    "sample '{}' has {} feature values but {} features are declared",
                    samples[i], row.len(), features.len()
                )));
            }
            if let Some(j) = row.iter().position(|&v| v > 1) {
                return Err(EvalError::InvalidMatrix(format!(
                    "feature '{}' is not binary for sample '{}' (value {})",
                    features[j], samples[i], row[j]
                )));
            }
        }

        Ok(FeatureMatrix {
            feature_len: features.len(),
            sample_len: samples.len(),
            X,
            y,
            features,
            samples,
            classes: vec!["resistant".to_string(), "sensitive".to_string()],
        })
    }

    /// Load a fingerprint matrix and its labels from two TSV files.
    ///
    /// With `features_in_rows`, the first line of `X_path` holds the sample names
    /// and every following line is `feature<TAB>v1<TAB>v2...`; otherwise the first
    /// line holds feature names and each line is a sample. `y_path` is a two
    /// column TSV (`sample<TAB>label`) with a header line; samples absent from it,
    /// or with an empty/NA label, are unlabelled.
    #[allow(non_snake_case)]
    pub fn load_data<P: AsRef<Path>>(X_path: P, y_path: P, features_in_rows: bool) -> Result<FeatureMatrix, EvalError> {
        info!("Loading files {} and {}...", X_path.as_ref().display(), y_path.as_ref().display());

        let mut reader_X = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_path(X_path.as_ref())?;

        let header: Vec<String> = reader_X.headers()?.iter().skip(1).map(|s| s.trim().to_string()).collect();
        let mut row_names: Vec<String> = Vec::new();
        let mut values: Vec<Vec<u8>> = Vec::new();

        for record in reader_X.records() {
            let record = record?;
            let mut fields = record.iter();
            let name = match fields.next() {
                Some(name) => name.trim().to_string(),
                None => continue,
            };
            let row = fields
                .enumerate()
                .map(|(k, value)| parse_binary(value).ok_or_else(|| EvalError::InvalidMatrix(format!(
                    "value '{}' at line '{}', column '{}' is not binary",
                    value, name, header.get(k).map(String::as_str).unwrap_or("?")
                ))))
                .collect::<Result<Vec<u8>, EvalError>>()?;
            row_names.push(name);
            values.push(row);
        }

        let (samples, features, X) = if features_in_rows {
            // transpose: file rows are features
            let mut X = vec![Vec::with_capacity(row_names.len()); header.len()];
            for (j, row) in values.iter().enumerate() {
                if row.len() != header.len() {
                    return Err(EvalError::InvalidMatrix(format!(
                        "feature '{}' has {} values for {} samples", row_names[j], row.len(), header.len()
                    )));
                }
                for (i, &v) in row.iter().enumerate() {
                    X[i].push(v);
                }
            }
            (header, row_names, X)
        } else {
            (row_names, header, values)
        };

        let mut reader_y = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_path(y_path.as_ref())?;

        let mut y_map = std::collections::HashMap::new();
        for record in reader_y.records() {
            let record = record?;
            if let Some(sample_name) = record.get(0) {
                let label = Label::parse(record.get(1).unwrap_or(""))?;
                y_map.insert(sample_name.trim().to_string(), label);
            }
        }

        // Reorder y to match the sample order of the matrix
        let y: Vec<Label> = samples
            .iter()
            .map(|sample_name| match y_map.get(sample_name) {
                Some(label) => *label,
                None => {
                    warn!("No label available for {}. Sample kept as unlabelled.", sample_name);
                    Label::Missing
                }
            })
            .collect();

        FeatureMatrix::from_rows(samples, features, X, y)
    }

    pub fn set_classes(&mut self, classes: Vec<String>) {
        if classes.len() >= 2 {
            self.classes = classes;
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn class_name(&self, label: Label) -> &str {
        match label {
            Label::Resistant => &self.classes[0],
            Label::Sensitive => &self.classes[1],
            Label::Missing => "unknown",
        }
    }

    /// Check if another matrix shares the same features, in the same order
    pub fn check_compatibility(&self, other: &FeatureMatrix) -> bool {
        self.features == other.features
    }

    pub fn feature_names(&self) -> &[String] {
        &self.features
    }

    pub fn sample_names(&self) -> &[String] {
        &self.samples
    }

    pub fn labels(&self) -> &[Label] {
        &self.y
    }

    pub fn feature_len(&self) -> usize {
        self.feature_len
    }

    pub fn sample_len(&self) -> usize {
        self.sample_len
    }

    pub fn row(&self, i: usize) -> &[u8] {
        &self.X[i]
    }

    pub fn value(&self, i: usize, j: usize) -> u8 {
        self.X[i][j]
    }

    pub fn label(&self, i: usize) -> Label {
        self.y[i]
    }

    pub fn sample_index(&self, name: &str) -> Option<usize> {
        self.samples.iter().position(|s| s == name)
    }

    /// Indices of labelled samples, in matrix order
    pub fn training_indices(&self) -> Vec<usize> {
        (0..self.sample_len).filter(|&i| self.y[i].is_known()).collect()
    }

    /// Indices of unlabelled samples, in matrix order
    pub fn test_indices(&self) -> Vec<usize> {
        (0..self.sample_len).filter(|&i| !self.y[i].is_known()).collect()
    }

    /// All samples whose label is not Missing
    pub fn training_subset(&self) -> FeatureMatrix {
        self.subset(&self.training_indices())
    }

    /// All unlabelled samples
    pub fn test_subset(&self) -> FeatureMatrix {
        self.subset(&self.test_indices())
    }

    /// (resistant, sensitive, missing) counts
    pub fn class_counts(&self) -> (usize, usize, usize) {
        self.y.iter().fold((0, 0, 0), |(r, s, m), label| match label {
            Label::Resistant => (r + 1, s, m),
            Label::Sensitive => (r, s + 1, m),
            Label::Missing => (r, s, m + 1),
        })
    }

    /// Filter the matrix for some samples (represented by a slice of indices)
    pub fn subset(&self, samples: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            X: samples.iter().map(|&i| self.X[i].clone()).collect(),
            y: samples.iter().map(|&i| self.y[i]).collect(),
            features: self.features.clone(),
            samples: samples.iter().map(|&i| self.samples[i].clone()).collect(),
            feature_len: self.feature_len,
            sample_len: samples.len(),
            classes: self.classes.clone(),
        }
    }

    /// Keep only some feature columns, in the given order
    pub fn project(&self, features: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            X: self.X.iter().map(|row| features.iter().map(|&j| row[j]).collect()).collect(),
            y: self.y.clone(),
            features: features.iter().map(|&j| self.features[j].clone()).collect(),
            samples: self.samples.clone(),
            feature_len: features.len(),
            sample_len: self.sample_len,
            classes: self.classes.clone(),
        }
    }
}

impl Default for FeatureMatrix {
    fn default() -> Self {
        FeatureMatrix::new()
    }
}

fn parse_binary(value: &str) -> Option<u8> {
    match value.trim().parse::<f64>() {
        Ok(v) if v == 0.0 => Some(0),
        Ok(v) if v == 1.0 => Some(1),
        _ => None,
    }
}

impl fmt::Display for FeatureMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (resistant, sensitive, missing) = self.class_counts();
        writeln!(f, "Features: {}   Samples: {} ({} {}, {} {}, {} unlabelled)",
            self.feature_len, self.sample_len,
            sensitive, self.classes[1], resistant, self.classes[0], missing)?;

        let features_string = self.features.join(" ");
        let truncated_features = if features_string.chars().count() > 100 {
            format!("{}...", features_string.chars().take(97).collect::<String>())
        } else {
            features_string
        };
        writeln!(f, "{:<20} {}", "", truncated_features)?;

        // Limit to the first 20 samples
        for i in (0..self.sample_len).take(20) {
            let row_display: String = self.X[i].iter().map(|v| if *v == 1 { '1' } else { '.' }).collect();
            let truncated_row = if row_display.len() > 80 {
                format!("{}...", &row_display[..77])
            } else {
                row_display
            };
            writeln!(f, "{:<12} {:<7} {}", self.samples[i], self.y[i].to_string(), truncated_row)?;
        }

        Ok(())
    }
}

impl fmt::Debug for FeatureMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the Display formatter
        write!(f, "{}", self)
    }
}

// unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_vec;
    use std::fs;

    impl FeatureMatrix {
        /// Six labelled samples, two unlabelled ones, three features
        pub fn test() -> FeatureMatrix {
            FeatureMatrix::from_rows(
                string_vec!["s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8"],
                string_vec!["f1", "f2", "f3"],
                vec![
                    vec![1, 0, 1],
                    vec![1, 1, 0],
                    vec![1, 0, 0],
                    vec![0, 1, 1],
                    vec![0, 0, 1],
                    vec![1, 1, 0],
                    vec![1, 0, 1],
                    vec![0, 1, 0],
                ],
                vec![
                    Label::Sensitive, Label::Sensitive, Label::Sensitive,
                    Label::Resistant, Label::Resistant, Label::Resistant,
                    Label::Missing, Label::Missing,
                ],
            ).unwrap()
        }

        /// `n` labelled samples alternating sensitive/resistant with one feature
        /// equal to the label and one constant feature
        pub fn test_balanced(n: usize) -> FeatureMatrix {
            let samples: Vec<String> = (0..n).map(|i| format!("sample{}", i)).collect();
            let X: Vec<Vec<u8>> = (0..n).map(|i| vec![(i % 2 == 0) as u8, 1]).collect();
            let y: Vec<Label> = (0..n).map(|i| if i % 2 == 0 { Label::Sensitive } else { Label::Resistant }).collect();
            FeatureMatrix::from_rows(samples, string_vec!["marker", "constant"], X, y).unwrap()
        }
    }

    fn write_tmp(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("chemsens_data_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_label_parse() {
        assert_eq!(Label::parse("1").unwrap(), Label::Sensitive);
        assert_eq!(Label::parse(" Resistant ").unwrap(), Label::Resistant);
        assert_eq!(Label::parse("NA").unwrap(), Label::Missing);
        assert_eq!(Label::parse("").unwrap(), Label::Missing);
        assert!(Label::parse("maybe").is_err(), "unknown labels must be rejected");
    }

    #[test]
    fn test_training_and_test_subsets_are_complementary() {
        let data = FeatureMatrix::test();
        let train = data.training_subset();
        let test = data.test_subset();

        assert_eq!(train.sample_len(), 6);
        assert_eq!(test.sample_len(), 2);
        assert!(train.labels().iter().all(|l| l.is_known()), "training subset should only hold labelled samples");
        assert!(test.labels().iter().all(|l| !l.is_known()), "test subset should only hold unlabelled samples");
        assert_eq!(test.sample_names(), ["s7", "s8"]);
        assert_eq!(train.feature_names(), data.feature_names());
    }

    #[test]
    fn test_from_rows_rejects_wrong_row_length() {
        let result = FeatureMatrix::from_rows(
            string_vec!["a", "b"],
            string_vec!["f1", "f2"],
            vec![vec![0, 1], vec![1]],
            vec![Label::Sensitive, Label::Resistant],
        );
        assert!(matches!(result, Err(EvalError::InvalidMatrix(_))));
    }

    #[test]
    fn test_from_rows_rejects_non_binary_value() {
        let result = FeatureMatrix::from_rows(
            string_vec!["a", "b"],
            string_vec!["f1"],
            vec![vec![0], vec![3]],
            vec![Label::Sensitive, Label::Resistant],
        );
        assert!(matches!(result, Err(EvalError::InvalidMatrix(_))));
    }

    #[test]
    fn test_from_rows_rejects_duplicated_samples() {
        let result = FeatureMatrix::from_rows(
            string_vec!["a", "a"],
            string_vec!["f1"],
            vec![vec![0], vec![1]],
            vec![Label::Sensitive, Label::Resistant],
        );
        assert!(matches!(result, Err(EvalError::InvalidMatrix(_))));
    }

    #[test]
    fn test_subset_indices() {
        let data = FeatureMatrix::test();
        let subset = data.subset(&[0, 3]);
        assert_eq!(subset.sample_names(), ["s1", "s4"]);
        assert_eq!(subset.labels(), [Label::Sensitive, Label::Resistant]);
        assert_eq!(subset.row(1), [0, 1, 1]);
        assert_eq!(subset.feature_len(), data.feature_len());
    }

    #[test]
    fn test_subset_empty_set() {
        let data = FeatureMatrix::test();
        let subset = data.subset(&[]);
        assert_eq!(subset.sample_len(), 0);
        assert_eq!(subset.feature_names(), data.feature_names());
    }

    #[test]
    fn test_project_keeps_requested_columns() {
        let data = FeatureMatrix::test();
        let projected = data.project(&[2, 0]);
        assert_eq!(projected.feature_names(), ["f3", "f1"]);
        assert_eq!(projected.row(3), [1, 0]);
        assert_eq!(projected.labels(), data.labels());
        assert!(!projected.check_compatibility(&data));
    }

    #[test]
    fn test_class_counts() {
        assert_eq!(FeatureMatrix::test().class_counts(), (3, 3, 2));
    }

    #[test]
    fn test_load_data_features_in_rows() {
        let x = write_tmp("X_rows.tsv", "feature\tA\tB\tC\nbit1\t1\t0\t1\nbit2\t0\t0\t1\n");
        let y = write_tmp("y_rows.tsv", "sample\tlabel\nA\t1\nB\t0\nC\tNA\n");
        let data = FeatureMatrix::load_data(&x, &y, true).unwrap();

        assert_eq!(data.sample_names(), ["A", "B", "C"]);
        assert_eq!(data.feature_names(), ["bit1", "bit2"]);
        assert_eq!(data.row(2), [1, 1]);
        assert_eq!(data.labels(), [Label::Sensitive, Label::Resistant, Label::Missing]);
    }

    #[test]
    fn test_load_data_samples_in_rows_with_absent_label() {
        let x = write_tmp("X_cols.tsv", "sample\tbit1\tbit2\nA\t1\t0\nB\t0\t1\n");
        let y = write_tmp("y_cols.tsv", "sample\tlabel\nA\tsensitive\n");
        let data = FeatureMatrix::load_data(&x, &y, false).unwrap();

        assert_eq!(data.feature_names(), ["bit1", "bit2"]);
        assert_eq!(data.row(1), [0, 1]);
        assert_eq!(data.labels(), [Label::Sensitive, Label::Missing], "a sample absent from y should be unlabelled");
    }

    #[test]
    fn test_load_data_rejects_non_binary() {
        let x = write_tmp("X_bad.tsv", "feature\tA\tB\nbit1\t1\t0.5\n");
        let y = write_tmp("y_bad.tsv", "sample\tlabel\nA\t1\nB\t0\n");
        assert!(matches!(FeatureMatrix::load_data(&x, &y, true), Err(EvalError::InvalidMatrix(_))));
    }
}
