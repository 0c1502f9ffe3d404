use fishers_exact::fishers_exact;
use log::debug;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::data::{FeatureMatrix, Label};
use crate::error::EvalError;

/// Univariate association between one binary feature and the sensitivity label
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AssociationResult {
    /// Column index of the feature in the analysed matrix
    pub feature_idx: usize,
    pub feature: String,
    /// [present & sensitive, present & resistant, absent & sensitive, absent & resistant]
    pub table: [u32; 4],
    /// Two-sided Fisher exact test p-value
    pub p_value: f64,
    /// Benjamini-Hochberg adjusted p-value
    pub fdr: f64,
    /// Haldane-corrected log odds ratio (positive: enriched in sensitive samples)
    pub log_odds_ratio: f64,
    pub enriched_in: Label,
}

/// Count the 2x2 table of feature `j` against the label, over labelled samples only
pub fn contingency_table(data: &FeatureMatrix, j: usize) -> [u32; 4] {
    let mut table = [0u32; 4];
    for i in 0..data.sample_len() {
        let present = data.value(i, j) == 1;
        match (present, data.label(i)) {
            (true, Label::Sensitive) => table[0] += 1,
            (true, Label::Resistant) => table[1] += 1,
            (false, Label::Sensitive) => table[2] += 1,
            (false, Label::Resistant) => table[3] += 1,
            (_, Label::Missing) => {}
        }
    }
    table
}

/// Two-sided exact p-value of independence for a 2x2 table.
///
/// A table with an empty row or column carries no information on association
/// and gets a p-value of 1.
pub fn fisher_two_sided(table: &[u32; 4]) -> Result<f64, EvalError> {
    let [a, b, c, d] = *table;
    if a + b == 0 || c + d == 0 || a + c == 0 || b + d == 0 {
        return Ok(1.0);
    }

    let test = fishers_exact(table).map_err(|_| EvalError::InvalidMatrix(format!(
        "contingency table {:?} is too large for the exact test", table
    )))?;

    Ok(test.two_tail_pvalue.clamp(0.0, 1.0))
}

/// Benjamini-Hochberg adjusted p-values, returned in the input order.
///
/// With p-values sorted ascending and ranked 1..m, the adjusted value at rank r
/// is the running minimum of p_i * m / i over ranks i >= r, capped at 1.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    if m == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]).then(a.cmp(&b)));

    let mut adjusted = vec![0.0; m];
    let mut running_min = f64::INFINITY;
    for (position, &idx) in order.iter().enumerate().rev() {
        let rank = (position + 1) as f64;
        let candidate = (p_values[idx] * m as f64 / rank).min(1.0);
        running_min = running_min.min(candidate);
        adjusted[idx] = running_min;
    }

    adjusted
}

fn log_odds_ratio(table: &[u32; 4]) -> f64 {
    let [a, b, c, d] = table.map(|v| v as f64 + 0.5);
    ((a * d) / (b * c)).ln()
}

/// Rank every feature of `training` by its association with the label.
///
/// Only labelled samples are counted. P-values are computed in parallel, the
/// FDR adjustment is a single pass once they are all known. The output is
/// sorted by ascending FDR, then ascending p-value, then column order.
pub fn compute_associations(training: &FeatureMatrix, thread_number: usize) -> Result<Vec<AssociationResult>, EvalError> {
    let (resistant, sensitive, _) = training.class_counts();
    if resistant + sensitive == 0 {
        return Err(EvalError::EmptyTrainingSet);
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(thread_number)
        .build()
        .map_err(|e| EvalError::InvalidParam(format!("cannot build thread pool: {}", e)))?;

    let tests: Vec<([u32; 4], f64)> = pool.install(|| {
        (0..training.feature_len())
            .into_par_iter()
            .map(|j| {
                let table = contingency_table(training, j);
                fisher_two_sided(&table).map(|p| (table, p))
            })
            .collect::<Result<Vec<_>, EvalError>>()
    })?;

    let p_values: Vec<f64> = tests.iter().map(|(_, p)| *p).collect();
    let fdr = benjamini_hochberg(&p_values);

    let mut results: Vec<AssociationResult> = tests
        .into_iter()
        .zip(fdr)
        .enumerate()
        .map(|(j, ((table, p_value), fdr))| {
            let lor = log_odds_ratio(&table);
            AssociationResult {
                feature_idx: j,
                feature: training.feature_names()[j].clone(),
                table,
                p_value,
                fdr,
                log_odds_ratio: lor,
                enriched_in: if lor >= 0.0 { Label::Sensitive } else { Label::Resistant },
            }
        })
        .collect();

    results.sort_by(|a, b| {
        a.fdr.total_cmp(&b.fdr)
            .then(a.p_value.total_cmp(&b.p_value))
            .then(a.feature_idx.cmp(&b.feature_idx))
    });

    debug!("Exact tests computed for {} features on {} labelled samples", results.len(), resistant + sensitive);
    Ok(results)
}
