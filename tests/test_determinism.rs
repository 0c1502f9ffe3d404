/// Reproducibility of the cross-validation harness
///
/// Fold assignment and aggregated predictions must only depend on the seed and
/// the input, never on the number of worker threads nor on scheduling.
/// Predictions are compared bit for bit through a SHA-256 digest.
///
/// Run with: cargo test --test test_determinism -- --nocapture
use chemsens::cv::{cross_validate, CvResult};
use chemsens::data::{FeatureMatrix, Label};
use chemsens::param::Param;
use chemsens::scorer::ScorerRegistry;
use sha2::{Digest, Sha256};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn synthetic_matrix(n: usize, p: usize) -> FeatureMatrix {
    let samples: Vec<String> = (0..n).map(|i| format!("mol{:03}", i)).collect();
    let features: Vec<String> = (0..p).map(|j| format!("bit{:03}", j)).collect();
    // deterministic pseudo-random bits, the first feature leaning towards sensitive samples
    let rows: Vec<Vec<u8>> = (0..n)
        .map(|i| (0..p).map(|j| (((i * 31 + j * 17 + i * j) % 7) < 3) as u8).collect())
        .collect();
    let labels: Vec<Label> = (0..n)
        .map(|i| match i % 10 {
            0 => Label::Missing,
            _ if rows[i][0] == 1 || i % 4 == 0 => Label::Sensitive,
            _ => Label::Resistant,
        })
        .collect();
    FeatureMatrix::from_rows(samples, features, rows, labels).unwrap()
}

fn digest(result: &CvResult) -> String {
    let mut hasher = Sha256::new();
    for assignment in &result.fold_assignment {
        hasher.update(assignment.sample.as_bytes());
        hasher.update(assignment.fold.to_le_bytes());
    }
    for method in &result.methods {
        hasher.update(method.method.as_bytes());
        for record in &method.predictions {
            hasher.update(record.sample.as_bytes());
            hasher.update(record.probability.to_bits().to_le_bytes());
            hasher.update(record.n_configs.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

fn evaluate(data: &FeatureMatrix, seed: u64, threads: usize) -> CvResult {
    let mut param = Param::default();
    param.general.seed = seed;
    param.general.thread_number = threads;
    param.methods.names = vec!["knn".to_string(), "bayes".to_string(), "constant".to_string()];
    param.knn.k_values = vec![1, 3, 5];
    param.bayes.alphas = vec![0.1, 0.5, 1.0];
    let registry = ScorerRegistry::from_param(&param).unwrap();
    cross_validate(&data.training_subset(), &registry, &param, Arc::new(AtomicBool::new(true))).unwrap()
}

#[test]
fn test_same_seed_same_digest_across_thread_counts() {
    let data = synthetic_matrix(60, 24);

    let reference = digest(&evaluate(&data, 42, 1));
    for threads in [2, 4, 8] {
        assert_eq!(digest(&evaluate(&data, 42, threads)), reference, "{} threads changed the result", threads);
    }
    assert_eq!(digest(&evaluate(&data, 42, 1)), reference, "a second run should be identical");
}

#[test]
fn test_other_seed_other_partition() {
    let data = synthetic_matrix(60, 24);
    let a = evaluate(&data, 42, 2);
    let b = evaluate(&data, 43, 2);
    assert_ne!(a.fold_assignment, b.fold_assignment, "the seed drives the fold assignment");
}

#[test]
fn test_one_record_per_labelled_sample_and_method() {
    let data = synthetic_matrix(60, 24);
    let (resistant, sensitive, missing) = data.class_counts();
    assert_eq!(missing, 6);

    let result = evaluate(&data, 7, 3);
    assert_eq!(result.fold_assignment.len(), resistant + sensitive);
    for method in &result.methods {
        assert!(method.is_complete(), "{} should cover every sample", method.method);
        assert_eq!(method.predictions.len(), resistant + sensitive);
        assert!(method.predictions.iter().all(|r| r.label != Label::Missing));
    }
}
