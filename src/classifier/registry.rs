//! The classifier registry: an ordered mapping from cell type name to
//! classifier record, with parent/child traversal over a forest of cell types.
//!
//! Registration order is the deterministic order used for evaluation among
//! independent classifiers and for joining ambiguous labels, so the registry
//! preserves it through persistence.

use crate::classifier::model::LogisticModel;
use crate::classifier::{CellTypeClassifier, ClassifierModel};
use crate::error::{AnnotationError, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Default decision threshold for newly trained classifiers and the bundled
/// registry.
pub const DEFAULT_PROBABILITY_THRESHOLD: f64 = 0.5;

/// Which cell types a classification run should target.
#[derive(Debug, Clone, PartialEq)]
pub enum CellTypeRequest {
    /// Every classifier in the registry.
    All,
    /// A specific set of cell type names; ancestors are pulled in implicitly.
    Subset(Vec<String>),
}

/// An ordered collection of classifier records, keyed by cell type name.
///
/// Built once (from the bundled default set, a caller-supplied collection, or
/// a persisted file) and treated as read-only during a classification run.
#[derive(Debug, Clone)]
pub struct ClassifierRegistry {
    entries: Vec<CellTypeClassifier>,
    index: HashMap<String, usize>,
}

impl ClassifierRegistry {
    /// Build a registry from caller-supplied records. Fails with a load error
    /// on duplicate cell type names.
    pub fn from_classifiers(classifiers: Vec<CellTypeClassifier>) -> Result<Self> {
        let mut index = HashMap::with_capacity(classifiers.len());
        for (i, record) in classifiers.iter().enumerate() {
            if index.insert(record.cell_type().to_string(), i).is_some() {
                return Err(AnnotationError::Load(format!(
                    "duplicate cell type '{}' in registry source",
                    record.cell_type()
                )));
            }
        }
        Ok(ClassifierRegistry {
            entries: classifiers,
            index,
        })
    }

    /// The bundled default registry: marker-gene logistic models for common
    /// immune cell types, with CD4+/CD8+ subtypes nested under T cells.
    pub fn bundled() -> Self {
        let entries = vec![
            marker_classifier("B cells", &["CD19", "MS4A1", "CD79A", "CD79B"], None),
            marker_classifier("T cells", &["CD3D", "CD3E", "CD3G", "CD2"], None),
            marker_classifier("NK cells", &["NCAM1", "NKG7", "GNLY", "KLRD1"], None),
            marker_classifier("Monocytes", &["CD14", "LYZ", "FCGR3A", "CST3"], None),
            marker_classifier("CD4+ T cells", &["CD4", "IL7R"], Some("T cells")),
            marker_classifier("CD8+ T cells", &["CD8A", "CD8B"], Some("T cells")),
        ];
        ClassifierRegistry::from_classifiers(entries)
            .expect("bundled registry entries are valid")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, cell_type: &str) -> Option<&CellTypeClassifier> {
        self.index.get(cell_type).map(|&i| &self.entries[i])
    }

    /// Records in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &CellTypeClassifier> {
        self.entries.iter()
    }

    pub fn cell_types(&self) -> Vec<&str> {
        self.entries.iter().map(|r| r.cell_type()).collect()
    }

    /// Ancestors of a record, ordered root first down to the immediate parent.
    ///
    /// Fails with a broken-lineage error on a dangling parent name or a parent
    /// cycle, both of which indicate a corrupt registry source.
    pub fn ancestor_chain(&self, record: &CellTypeClassifier) -> Result<Vec<&CellTypeClassifier>> {
        let mut chain = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(record.cell_type());

        let mut current = record;
        while let Some(parent_name) = current.parent() {
            let parent = self.get(parent_name).ok_or_else(|| AnnotationError::BrokenLineage {
                cell_type: current.cell_type().to_string(),
                reason: format!("parent '{}' is not in the registry", parent_name),
            })?;
            if !seen.insert(parent.cell_type()) {
                return Err(AnnotationError::BrokenLineage {
                    cell_type: record.cell_type().to_string(),
                    reason: format!("parent chain cycles through '{}'", parent.cell_type()),
                });
            }
            chain.push(parent);
            current = parent;
        }

        chain.reverse();
        Ok(chain)
    }

    /// Resolve a request to the records needed for a run: the requested set
    /// unioned with every transitive ancestor, in registration order.
    pub fn resolve(&self, request: &CellTypeRequest) -> Result<Vec<&CellTypeClassifier>> {
        let wanted: HashSet<&str> = match request {
            CellTypeRequest::All => return Ok(self.entries.iter().collect()),
            CellTypeRequest::Subset(names) => {
                let mut wanted = HashSet::new();
                for name in names {
                    let record = self
                        .get(name)
                        .ok_or_else(|| AnnotationError::UnknownCellType(name.clone()))?;
                    wanted.insert(record.cell_type());
                    for ancestor in self.ancestor_chain(record)? {
                        wanted.insert(ancestor.cell_type());
                    }
                }
                wanted
            }
        };
        Ok(self
            .entries
            .iter()
            .filter(|r| wanted.contains(r.cell_type()))
            .collect())
    }

    /// Serialize the registry as a JSON list of records, registration order
    /// preserved.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }

    /// Parse a registry from its JSON form. Every record is re-validated;
    /// invalid entries fail the load as a whole.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<CellTypeClassifier> = serde_json::from_str(json)
            .map_err(|e| AnnotationError::Load(format!("invalid registry JSON: {}", e)))?;
        ClassifierRegistry::from_classifiers(entries)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(&path).map_err(|e| {
            AnnotationError::Load(format!(
                "cannot read registry file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        ClassifierRegistry::from_json(&json)
    }
}

fn marker_classifier(
    cell_type: &str,
    markers: &[&str],
    parent: Option<&str>,
) -> CellTypeClassifier {
    let features: Vec<String> = markers.iter().map(|m| m.to_string()).collect();
    let weights = vec![1.0; features.len()];
    let model = ClassifierModel::Logistic(LogisticModel::from_coefficients(
        &features, weights, -2.0,
    ));
    CellTypeClassifier::new(
        cell_type,
        model,
        features,
        DEFAULT_PROBABILITY_THRESHOLD,
        parent,
    )
    .expect("bundled marker classifier is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_marker(cell_type: &str, marker: &str, parent: Option<&str>) -> CellTypeClassifier {
        let features = vec![marker.to_string()];
        let model = ClassifierModel::Logistic(LogisticModel::from_coefficients(
            &features,
            vec![1.0],
            -1.0,
        ));
        CellTypeClassifier::new(cell_type, model, features, 0.5, parent).unwrap()
    }

    fn lineage_registry() -> ClassifierRegistry {
        ClassifierRegistry::from_classifiers(vec![
            single_marker("B cells", "CD19", None),
            single_marker("T cells", "CD3D", None),
            single_marker("CD4+ T cells", "CD4", Some("T cells")),
            single_marker("Tregs", "FOXP3", Some("CD4+ T cells")),
        ])
        .unwrap()
    }

    #[test]
    fn duplicate_cell_types_fail_to_load() {
        let err = ClassifierRegistry::from_classifiers(vec![
            single_marker("B cells", "CD19", None),
            single_marker("B cells", "MS4A1", None),
        ])
        .unwrap_err();
        assert!(matches!(err, AnnotationError::Load(_)));
    }

    #[test]
    fn resolve_pulls_in_transitive_ancestors() {
        let registry = lineage_registry();
        let resolved = registry
            .resolve(&CellTypeRequest::Subset(vec!["Tregs".to_string()]))
            .unwrap();
        let names: Vec<&str> = resolved.iter().map(|r| r.cell_type()).collect();
        assert_eq!(names, vec!["T cells", "CD4+ T cells", "Tregs"]);
    }

    #[test]
    fn resolve_child_returns_exactly_child_and_parent() {
        let registry = lineage_registry();
        let resolved = registry
            .resolve(&CellTypeRequest::Subset(vec!["CD4+ T cells".to_string()]))
            .unwrap();
        let names: Vec<&str> = resolved.iter().map(|r| r.cell_type()).collect();
        assert_eq!(names, vec!["T cells", "CD4+ T cells"]);
    }

    #[test]
    fn resolve_unknown_name_fails() {
        let registry = lineage_registry();
        let err = registry
            .resolve(&CellTypeRequest::Subset(vec!["Platelets".to_string()]))
            .unwrap_err();
        assert!(matches!(err, AnnotationError::UnknownCellType(name) if name == "Platelets"));
    }

    #[test]
    fn dangling_parent_is_a_broken_lineage() {
        let registry = ClassifierRegistry::from_classifiers(vec![single_marker(
            "CD4+ T cells",
            "CD4",
            Some("T cells"),
        )])
        .unwrap();
        let record = registry.get("CD4+ T cells").unwrap();
        let err = registry.ancestor_chain(record).unwrap_err();
        assert!(matches!(err, AnnotationError::BrokenLineage { .. }));
    }

    #[test]
    fn parent_cycles_are_detected() {
        let registry = ClassifierRegistry::from_classifiers(vec![
            single_marker("A", "X1", Some("B")),
            single_marker("B", "X2", Some("A")),
        ])
        .unwrap();
        let err = registry.ancestor_chain(registry.get("A").unwrap()).unwrap_err();
        assert!(matches!(err, AnnotationError::BrokenLineage { .. }));
    }

    #[test]
    fn json_round_trip_preserves_order_and_lineage() {
        let registry = lineage_registry();
        let json = registry.to_json().unwrap();
        let back = ClassifierRegistry::from_json(&json).unwrap();
        assert_eq!(back.cell_types(), registry.cell_types());
        assert_eq!(back.get("Tregs").unwrap().parent(), Some("CD4+ T cells"));
        assert_eq!(back.get("B cells").unwrap().parent(), None);
    }

    #[test]
    fn invalid_entries_fail_the_whole_load() {
        let json = r#"[{
            "cell_type": "B cells",
            "model": {"kind": "logistic", "terms": [], "means": [], "stds": [], "weights": [], "intercept": 0.0},
            "features": ["CD19"],
            "probability_threshold": 0.5
        }]"#;
        let err = ClassifierRegistry::from_json(json).unwrap_err();
        assert!(matches!(err, AnnotationError::Load(_)));
    }

    #[test]
    fn bundled_registry_nests_t_cell_subtypes() {
        let registry = ClassifierRegistry::bundled();
        assert!(registry.len() >= 6);
        let resolved = registry
            .resolve(&CellTypeRequest::Subset(vec!["CD8+ T cells".to_string()]))
            .unwrap();
        let names: Vec<&str> = resolved.iter().map(|r| r.cell_type()).collect();
        assert_eq!(names, vec!["T cells", "CD8+ T cells"]);
    }
}
