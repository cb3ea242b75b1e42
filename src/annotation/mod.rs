//! The hierarchical classification engine.
//!
//! Classifiers are evaluated parent-before-child: a child classifier only sees
//! cells its parent marked positive in the same run, so a cell can never be a
//! subtype of something it is not. After all classifiers have run, per-cell
//! positives are collapsed to the most specific label along each lineage and
//! written to the dataset together with one probability column per cell type.

use crate::classifier::registry::CellTypeRequest;
use crate::classifier::{CellTypeClassifier, ClassifierRegistry};
use crate::dataset::{MetadataColumn, SingleCellDataset};
use crate::error::{AnnotationError, Result};
use single_utilities::traits::FloatOpsTS;
use std::collections::{HashMap, HashSet};

pub mod features;
pub mod training;

/// Sentinel label for cells with no unambiguous positive classification.
/// Distinct from a missing value: aggregation always produces a label.
pub const UNKNOWN_CELL_TYPE: &str = "unknown";

/// Label column holding the full prediction, ambiguity preserved
/// (`"A/B"` when two non-nested cell types both pass threshold).
pub const PREDICTED_CELL_TYPE_COLUMN: &str = "predicted_cell_type";

/// Label column holding the single most specific positive cell type, or the
/// unknown sentinel when there is none or more than one.
pub const MOST_PROBABLE_CELL_TYPE_COLUMN: &str = "most_probable_cell_type";

const AMBIGUOUS_LABEL_SEPARATOR: &str = "/";

/// Classify cells in `dataset` against the requested cell types.
///
/// Resolves the request through the registry (ancestors are pulled in
/// automatically), evaluates classifiers parent-first, and appends to the
/// dataset one probability column per evaluated cell type (named after the
/// cell type; `None` for cells the classifier never saw) plus the
/// [`PREDICTED_CELL_TYPE_COLUMN`] and [`MOST_PROBABLE_CELL_TYPE_COLUMN`]
/// label columns.
///
/// Evaluation order among independent classifiers is registry registration
/// order, which is also the order ambiguous labels are joined in. Any failure
/// aborts the run before columns are written; re-running with identical
/// inputs replaces the columns with identical values.
pub fn classify<T>(
    dataset: &mut SingleCellDataset<T>,
    assay: &str,
    request: &CellTypeRequest,
    registry: &ClassifierRegistry,
) -> Result<()>
where
    T: FloatOpsTS,
{
    let targets = registry.resolve(request)?;

    // Lineage is resolved up front so a corrupt registry fails before any
    // model runs.
    let mut ancestors: HashMap<String, HashSet<String>> = HashMap::new();
    for record in &targets {
        let chain = registry.ancestor_chain(record)?;
        ancestors.insert(
            record.cell_type().to_string(),
            chain.iter().map(|r| r.cell_type().to_string()).collect(),
        );
    }

    let ordered = parent_first_order(targets)?;
    let n_cells = dataset.n_cells();

    let (staged, predicted, most_probable) = {
        let matrix = dataset.assay(assay)?;
        let mut positive: HashMap<String, Vec<bool>> = HashMap::new();
        let mut staged: Vec<(String, Vec<Option<f64>>)> = Vec::with_capacity(ordered.len());

        for record in &ordered {
            let eligible: Vec<usize> = match record.parent() {
                None => (0..n_cells).collect(),
                Some(parent) => positive
                    .get(parent)
                    .map(|mask| {
                        mask.iter()
                            .enumerate()
                            .filter_map(|(i, &hit)| if hit { Some(i) } else { None })
                            .collect()
                    })
                    .unwrap_or_default(),
            };
            log::debug!(
                "evaluating classifier '{}' on {} of {} cells",
                record.cell_type(),
                eligible.len(),
                n_cells
            );

            let mut column = vec![None; n_cells];
            let mut mask = vec![false; n_cells];
            if !eligible.is_empty() {
                let block = features::extract_feature_block(
                    dataset,
                    matrix,
                    record.features(),
                    record.cell_type(),
                    &eligible,
                )?;
                let probabilities = record.model().predict_probability(&block)?;
                for (k, &row) in eligible.iter().enumerate() {
                    let p = probabilities[k];
                    column[row] = Some(p);
                    if p >= record.probability_threshold() {
                        mask[row] = true;
                    }
                }
            }
            positive.insert(record.cell_type().to_string(), mask);
            staged.push((record.cell_type().to_string(), column));
        }

        let mut predicted = Vec::with_capacity(n_cells);
        let mut most_probable = Vec::with_capacity(n_cells);
        for cell in 0..n_cells {
            let positives: Vec<&str> = ordered
                .iter()
                .filter(|r| positive[r.cell_type()][cell])
                .map(|r| r.cell_type())
                .collect();
            // Keep only the deepest positive along each lineage: a type is
            // dropped when some other positive type descends from it.
            let survivors: Vec<&str> = positives
                .iter()
                .copied()
                .filter(|p| {
                    !positives
                        .iter()
                        .any(|q| q != p && ancestors[*q].contains(*p))
                })
                .collect();

            match survivors.len() {
                0 => {
                    predicted.push(UNKNOWN_CELL_TYPE.to_string());
                    most_probable.push(UNKNOWN_CELL_TYPE.to_string());
                }
                1 => {
                    predicted.push(survivors[0].to_string());
                    most_probable.push(survivors[0].to_string());
                }
                // Multiple independent thresholds were satisfied at once;
                // probabilities are calibrated per classifier and are not
                // comparable, so the tie is preserved, not broken.
                _ => {
                    predicted.push(survivors.join(AMBIGUOUS_LABEL_SEPARATOR));
                    most_probable.push(UNKNOWN_CELL_TYPE.to_string());
                }
            }
        }

        (staged, predicted, most_probable)
    };

    for (cell_type, column) in staged {
        dataset.set_column(&cell_type, MetadataColumn::Probabilities(column))?;
    }
    dataset.set_column(PREDICTED_CELL_TYPE_COLUMN, MetadataColumn::Labels(predicted))?;
    dataset.set_column(
        MOST_PROBABLE_CELL_TYPE_COLUMN,
        MetadataColumn::Labels(most_probable),
    )?;
    Ok(())
}

/// Stable topological order: every parent before its children, registration
/// order preserved among classifiers whose parents are already placed.
fn parent_first_order(
    targets: Vec<&CellTypeClassifier>,
) -> Result<Vec<&CellTypeClassifier>> {
    let in_set: HashSet<&str> = targets.iter().map(|r| r.cell_type()).collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(targets.len());
    let mut remaining = targets;

    while !remaining.is_empty() {
        let before = ordered.len();
        remaining.retain(|record| {
            let ready = match record.parent() {
                None => true,
                Some(parent) => !in_set.contains(parent) || placed.contains(parent),
            };
            if ready {
                placed.insert(record.cell_type());
                ordered.push(*record);
            }
            !ready
        });
        if ordered.len() == before {
            return Err(AnnotationError::BrokenLineage {
                cell_type: remaining[0].cell_type().to_string(),
                reason: "parent relationships cycle within the requested set".to_string(),
            });
        }
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierModel, LogisticModel};

    fn record(cell_type: &str, parent: Option<&str>) -> CellTypeClassifier {
        let features = vec!["CD19".to_string()];
        let model = ClassifierModel::Logistic(LogisticModel::from_coefficients(
            &features,
            vec![1.0],
            -1.0,
        ));
        CellTypeClassifier::new(cell_type, model, features, 0.5, parent).unwrap()
    }

    #[test]
    fn parents_are_ordered_before_children() {
        let child = record("CD4+ T cells", Some("T cells"));
        let grandchild = record("Tregs", Some("CD4+ T cells"));
        let root = record("T cells", None);
        // Registration order deliberately lists descendants first.
        let ordered = parent_first_order(vec![&grandchild, &child, &root]).unwrap();
        let names: Vec<&str> = ordered.iter().map(|r| r.cell_type()).collect();
        assert_eq!(names, vec!["T cells", "CD4+ T cells", "Tregs"]);
    }

    #[test]
    fn sibling_order_follows_registration_order() {
        let a = record("B cells", None);
        let b = record("T cells", None);
        let c = record("NK cells", None);
        let ordered = parent_first_order(vec![&a, &b, &c]).unwrap();
        let names: Vec<&str> = ordered.iter().map(|r| r.cell_type()).collect();
        assert_eq!(names, vec!["B cells", "T cells", "NK cells"]);
    }

    #[test]
    fn cyclic_parents_cannot_be_ordered() {
        let a = record("A", Some("B"));
        let b = record("B", Some("A"));
        let err = parent_first_order(vec![&a, &b]).unwrap_err();
        assert!(matches!(err, AnnotationError::BrokenLineage { .. }));
    }
}
