use nalgebra_sparse::{CooMatrix, CsrMatrix};
use single_annotation::annotation::{
    classify, MOST_PROBABLE_CELL_TYPE_COLUMN, PREDICTED_CELL_TYPE_COLUMN, UNKNOWN_CELL_TYPE,
};
use single_annotation::classifier::registry::CellTypeRequest;
use single_annotation::classifier::{
    CellTypeClassifier, ClassifierModel, ClassifierRegistry, LogisticModel,
};
use single_annotation::dataset::SingleCellDataset;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Marker model on raw expression: positive (p >= 0.5) iff the summed marker
/// expression reaches 2.0.
fn marker_model(features: &[&str]) -> ClassifierModel {
    let names: Vec<String> = features.iter().map(|f| f.to_string()).collect();
    let weights = vec![1.0; names.len()];
    ClassifierModel::Logistic(LogisticModel::from_coefficients(&names, weights, -2.0))
}

fn marker_classifier(cell_type: &str, features: &[&str], threshold: f64) -> CellTypeClassifier {
    CellTypeClassifier::new(
        cell_type,
        marker_model(features),
        features.iter().map(|f| f.to_string()).collect(),
        threshold,
        None,
    )
    .unwrap()
}

fn dataset_with(
    feature_names: &[&str],
    n_cells: usize,
    entries: &[(usize, usize, f64)],
) -> SingleCellDataset<f64> {
    let cell_ids = (0..n_cells).map(|i| format!("cell{}", i)).collect();
    let features = feature_names.iter().map(|f| f.to_string()).collect();
    let mut ds = SingleCellDataset::new(cell_ids, features).unwrap();
    let mut coo = CooMatrix::new(n_cells, feature_names.len());
    for &(row, col, value) in entries {
        coo.push(row, col, value);
    }
    ds.add_assay("lognorm", CsrMatrix::from(&coo)).unwrap();
    ds
}

#[test]
fn classify_tolerates_feature_naming_differences() {
    init_logging();
    // The classifier was trained against underscore-separated names; the
    // dataset uses hyphens.
    let record = marker_classifier("B cells", &["HLA_DRA"], 0.5);
    let registry = ClassifierRegistry::from_classifiers(vec![record]).unwrap();

    let mut ds = dataset_with(&["HLA-DRA"], 2, &[(0, 0, 4.0)]);
    classify(&mut ds, "lognorm", &CellTypeRequest::All, &registry).unwrap();

    let probs = ds.probabilities("B cells").unwrap();
    assert!(probs[0].unwrap() > 0.5);
    assert!(probs[1].unwrap() < 0.5);
    let labels = ds.labels(MOST_PROBABLE_CELL_TYPE_COLUMN).unwrap();
    assert_eq!(labels[0], "B cells");
    assert_eq!(labels[1], UNKNOWN_CELL_TYPE);
}

#[test]
fn threshold_above_one_never_predicts_positive() {
    init_logging();
    let record = marker_classifier("B cells", &["CD19"], 1.5);
    let registry = ClassifierRegistry::from_classifiers(vec![record]).unwrap();

    // Extremely high marker expression: the probability approaches but never
    // reaches 1, so a threshold above 1 is never met.
    let mut ds = dataset_with(&["CD19"], 1, &[(0, 0, 100.0)]);
    classify(&mut ds, "lognorm", &CellTypeRequest::All, &registry).unwrap();

    let probs = ds.probabilities("B cells").unwrap();
    assert!(probs[0].unwrap() > 0.99);
    assert_eq!(
        ds.labels(PREDICTED_CELL_TYPE_COLUMN).unwrap()[0],
        UNKNOWN_CELL_TYPE
    );
}

#[test]
fn roots_are_evaluated_on_every_cell() {
    init_logging();
    let registry = ClassifierRegistry::from_classifiers(vec![
        marker_classifier("B cells", &["CD19"], 0.5),
        marker_classifier("T cells", &["CD3D"], 0.5),
    ])
    .unwrap();

    let mut ds = dataset_with(&["CD19", "CD3D"], 3, &[(0, 0, 4.0), (1, 1, 4.0)]);
    classify(&mut ds, "lognorm", &CellTypeRequest::All, &registry).unwrap();

    // Root probability columns carry a value for every cell, even failures.
    for column in ["B cells", "T cells"] {
        let probs = ds.probabilities(column).unwrap();
        assert!(probs.iter().all(|p| p.is_some()), "{} has gaps", column);
    }
    let labels = ds.labels(MOST_PROBABLE_CELL_TYPE_COLUMN).unwrap();
    assert_eq!(labels, &["B cells", "T cells", UNKNOWN_CELL_TYPE]);
}

#[test]
fn no_positive_cell_gets_the_unknown_sentinel_in_both_columns() {
    init_logging();
    let registry =
        ClassifierRegistry::from_classifiers(vec![marker_classifier("B cells", &["CD19"], 0.5)])
            .unwrap();
    let mut ds = dataset_with(&["CD19"], 1, &[]);
    classify(&mut ds, "lognorm", &CellTypeRequest::All, &registry).unwrap();

    assert_eq!(
        ds.labels(PREDICTED_CELL_TYPE_COLUMN).unwrap()[0],
        UNKNOWN_CELL_TYPE
    );
    assert_eq!(
        ds.labels(MOST_PROBABLE_CELL_TYPE_COLUMN).unwrap()[0],
        UNKNOWN_CELL_TYPE
    );
}

#[test]
fn unknown_assay_name_fails_the_run() {
    init_logging();
    let registry =
        ClassifierRegistry::from_classifiers(vec![marker_classifier("B cells", &["CD19"], 0.5)])
            .unwrap();
    let mut ds = dataset_with(&["CD19"], 1, &[]);
    assert!(classify(&mut ds, "counts", &CellTypeRequest::All, &registry).is_err());
}

#[test]
fn bundled_registry_records_describe_their_lineage() {
    let registry = ClassifierRegistry::bundled();
    let shown = registry.get("CD4+ T cells").unwrap().to_string();
    assert!(shown.contains("Cell type: CD4+ T cells"));
    assert!(shown.contains("Parent: T cells"));
    let shown = registry.get("T cells").unwrap().to_string();
    assert!(shown.contains("Parent: no parent"));
}
