//! Training and evaluation of classifiers against labeled datasets.
//!
//! Fitting is delegated to the logistic model; this module handles the
//! dataset plumbing: picking the training population (optionally gated by a
//! parent classifier), deriving positive/negative labels from a metadata
//! column, and scoring a trained record on held-out cells.

use crate::annotation::features::extract_feature_block;
use crate::classifier::{CellTypeClassifier, ClassifierModel, LogisticModel};
use crate::dataset::SingleCellDataset;
use crate::error::{AnnotationError, Result};
use anyhow::anyhow;
use single_utilities::traits::FloatOpsTS;
use statrs::distribution::{ContinuousCDF, Normal};

/// Evaluation metrics for one classifier on a labeled dataset.
///
/// The p-value is a one-sided normal approximation that the AUC exceeds 0.5
/// (the AUC is the rescaled Mann-Whitney U statistic of positive vs. negative
/// probability scores).
#[derive(Debug, Clone)]
pub struct ClassifierEvaluation {
    pub accuracy: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub auc: f64,
    pub auc_p_value: f64,
    pub n_cells: usize,
    pub n_positive: usize,
}

/// Train a classifier for `cell_type` on a labeled dataset.
///
/// A cell is a positive example iff its value in `label_column` equals
/// `cell_type`. When a parent record is given, the training population is
/// restricted to cells the parent's model marks positive (the parent model is
/// applied directly, without its own ancestor gating) and the returned record
/// carries the parent lineage. Pass
/// [`crate::classifier::registry::DEFAULT_PROBABILITY_THRESHOLD`] unless the
/// threshold was calibrated separately.
pub fn train_classifier<T>(
    dataset: &SingleCellDataset<T>,
    assay: &str,
    features: &[String],
    cell_type: &str,
    label_column: &str,
    parent: Option<&CellTypeClassifier>,
    probability_threshold: f64,
) -> Result<CellTypeClassifier>
where
    T: FloatOpsTS,
{
    let labels = dataset.labels(label_column)?;
    let matrix = dataset.assay(assay)?;

    let rows: Vec<usize> = match parent {
        None => (0..dataset.n_cells()).collect(),
        Some(parent_record) => {
            let all: Vec<usize> = (0..dataset.n_cells()).collect();
            let block = extract_feature_block(
                dataset,
                matrix,
                parent_record.features(),
                parent_record.cell_type(),
                &all,
            )?;
            let probabilities = parent_record.model().predict_probability(&block)?;
            all.into_iter()
                .filter(|&i| probabilities[i] >= parent_record.probability_threshold())
                .collect()
        }
    };
    if rows.is_empty() {
        return Err(AnnotationError::Training(match parent {
            Some(parent_record) => anyhow!(
                "no cells pass the parent classifier '{}'; cannot train '{}'",
                parent_record.cell_type(),
                cell_type
            ),
            None => anyhow!("dataset has no cells; cannot train '{}'", cell_type),
        }));
    }

    let y: Vec<bool> = rows.iter().map(|&i| labels[i] == cell_type).collect();
    let block = extract_feature_block(dataset, matrix, features, cell_type, &rows)?;
    let model = LogisticModel::fit(&block, &y, features)?;

    log::info!(
        "trained classifier '{}' on {} cells ({} positive)",
        cell_type,
        rows.len(),
        y.iter().filter(|&&p| p).count()
    );

    CellTypeClassifier::new(
        cell_type,
        ClassifierModel::Logistic(model),
        features.to_vec(),
        probability_threshold,
        parent.map(|p| p.cell_type()),
    )
}

/// Score a trained classifier against a labeled dataset.
///
/// The record's model is applied to every cell (no hierarchy gating, so the
/// metrics reflect the classifier alone). Requires at least one positive and
/// one negative cell under `label_column`.
pub fn test_classifier<T>(
    dataset: &SingleCellDataset<T>,
    assay: &str,
    record: &CellTypeClassifier,
    label_column: &str,
) -> Result<ClassifierEvaluation>
where
    T: FloatOpsTS,
{
    let labels = dataset.labels(label_column)?;
    let matrix = dataset.assay(assay)?;
    let rows: Vec<usize> = (0..dataset.n_cells()).collect();

    let truth: Vec<bool> = labels.iter().map(|l| l == record.cell_type()).collect();
    let n_positive = truth.iter().filter(|&&t| t).count();
    if n_positive == 0 || n_positive == truth.len() {
        return Err(AnnotationError::Training(anyhow!(
            "evaluating '{}' requires both positive and negative cells, got {} positives out of {}",
            record.cell_type(),
            n_positive,
            truth.len()
        )));
    }

    let block = extract_feature_block(
        dataset,
        matrix,
        record.features(),
        record.cell_type(),
        &rows,
    )?;
    let probabilities = record.model().predict_probability(&block)?;

    let threshold = record.probability_threshold();
    let mut true_positive = 0usize;
    let mut true_negative = 0usize;
    let mut false_positive = 0usize;
    let mut false_negative = 0usize;
    for (i, &t) in truth.iter().enumerate() {
        let predicted = probabilities[i] >= threshold;
        match (t, predicted) {
            (true, true) => true_positive += 1,
            (true, false) => false_negative += 1,
            (false, true) => false_positive += 1,
            (false, false) => true_negative += 1,
        }
    }

    let n = truth.len();
    let n_negative = n - n_positive;
    let accuracy = (true_positive + true_negative) as f64 / n as f64;
    let sensitivity = true_positive as f64 / n_positive as f64;
    let specificity = true_negative as f64 / n_negative as f64;

    let (auc, auc_p_value) = auc_with_p_value(probabilities.as_slice().unwrap_or(&[]), &truth);

    Ok(ClassifierEvaluation {
        accuracy,
        sensitivity,
        specificity,
        auc,
        auc_p_value,
        n_cells: n,
        n_positive,
    })
}

/// AUC of positive vs. negative scores with a one-sided normal-approximation
/// p-value for AUC > 0.5 (tie-averaged ranks, continuity corrected).
fn auc_with_p_value(scores: &[f64], truth: &[bool]) -> (f64, f64) {
    let n = scores.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Average ranks across ties.
    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && scores[order[j]] == scores[order[i]] {
            j += 1;
        }
        let rank = (i + j - 1) as f64 / 2.0 + 1.0;
        for k in i..j {
            ranks[order[k]] = rank;
        }
        i = j;
    }

    let n_positive = truth.iter().filter(|&&t| t).count();
    let n_negative = n - n_positive;
    let rank_sum_positive: f64 = truth
        .iter()
        .enumerate()
        .filter_map(|(i, &t)| if t { Some(ranks[i]) } else { None })
        .sum();
    let u = rank_sum_positive - (n_positive * (n_positive + 1)) as f64 / 2.0;
    let pairs = (n_positive * n_negative) as f64;
    let auc = u / pairs;

    let mean_u = pairs / 2.0;
    let var_u = pairs * (n_positive + n_negative + 1) as f64 / 12.0;
    let z = (u - mean_u - 0.5) / var_u.sqrt();

    let normal = Normal::new(0.0, 1.0).unwrap();
    let p_value = 1.0 - normal.cdf(z);
    (auc, p_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn auc_is_one_for_perfectly_separated_scores() {
        let scores = [0.9, 0.8, 0.1, 0.2];
        let truth = [true, true, false, false];
        let (auc, p) = auc_with_p_value(&scores, &truth);
        assert_relative_eq!(auc, 1.0, epsilon = 1e-12);
        assert!(p < 0.5);
    }

    #[test]
    fn auc_is_half_for_constant_scores() {
        let scores = [0.5, 0.5, 0.5, 0.5];
        let truth = [true, true, false, false];
        let (auc, _) = auc_with_p_value(&scores, &truth);
        assert_relative_eq!(auc, 0.5, epsilon = 1e-12);
    }
}
