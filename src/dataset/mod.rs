//! In-memory single-cell dataset: named expression assays plus a per-cell
//! metadata table that classification results are appended to.
//!
//! Assays are sparse matrices in cells × features orientation. The dataset keeps
//! a canonicalized feature index so that classifiers trained with slightly
//! different gene naming conventions ("HLA-DRA" vs "HLA_DRA" vs "hla.dra") still
//! resolve to the same matrix column.

use crate::error::{AnnotationError, Result};
use nalgebra_sparse::CsrMatrix;
use std::collections::HashMap;

/// Canonical lookup key for a feature name: uppercased, with `_` and `.`
/// separators mapped to `-`.
pub fn canonical_feature_key(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '_' | '.' => '-',
            _ => c.to_ascii_uppercase(),
        })
        .collect()
}

/// A single per-cell metadata column.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataColumn {
    /// Categorical per-cell labels, e.g. predicted cell types.
    Labels(Vec<String>),
    /// Per-cell probabilities; `None` marks cells that were never evaluated.
    Probabilities(Vec<Option<f64>>),
}

impl MetadataColumn {
    pub fn len(&self) -> usize {
        match self {
            MetadataColumn::Labels(v) => v.len(),
            MetadataColumn::Probabilities(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A cell-by-feature dataset with one or more named assays and an ordered
/// per-cell metadata table.
///
/// The dataset is provided by the caller and mutated in place: classification
/// appends (or replaces) metadata columns and never touches the assays.
#[derive(Debug, Clone)]
pub struct SingleCellDataset<T> {
    cell_ids: Vec<String>,
    feature_names: Vec<String>,
    feature_index: HashMap<String, usize>,
    assays: HashMap<String, CsrMatrix<T>>,
    metadata: Vec<(String, MetadataColumn)>,
}

impl<T> SingleCellDataset<T> {
    /// Create an empty dataset (no assays yet) for the given cells and features.
    ///
    /// Fails with a load error if two feature names collapse onto the same
    /// canonical key, since lookups would then be ambiguous.
    pub fn new(cell_ids: Vec<String>, feature_names: Vec<String>) -> Result<Self> {
        let mut feature_index = HashMap::with_capacity(feature_names.len());
        for (idx, name) in feature_names.iter().enumerate() {
            let key = canonical_feature_key(name);
            if let Some(prev) = feature_index.insert(key.clone(), idx) {
                return Err(AnnotationError::Load(format!(
                    "feature names '{}' and '{}' collide on canonical key '{}'",
                    feature_names[prev], name, key
                )));
            }
        }
        Ok(SingleCellDataset {
            cell_ids,
            feature_names,
            feature_index,
            assays: HashMap::new(),
            metadata: Vec::new(),
        })
    }

    pub fn n_cells(&self) -> usize {
        self.cell_ids.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Add a named assay (cells × features). Dimensions must match the dataset.
    pub fn add_assay(&mut self, name: &str, matrix: CsrMatrix<T>) -> Result<()> {
        if matrix.nrows() != self.n_cells() || matrix.ncols() != self.n_features() {
            return Err(AnnotationError::Load(format!(
                "assay '{}' has shape {}x{}, expected {}x{}",
                name,
                matrix.nrows(),
                matrix.ncols(),
                self.n_cells(),
                self.n_features()
            )));
        }
        self.assays.insert(name.to_string(), matrix);
        Ok(())
    }

    /// Look up an assay by name.
    pub fn assay(&self, name: &str) -> Result<&CsrMatrix<T>> {
        self.assays
            .get(name)
            .ok_or_else(|| AnnotationError::Load(format!("assay '{}' not found in dataset", name)))
    }

    /// Resolve a feature name to its matrix column through the canonical key.
    pub fn feature_column(&self, name: &str) -> Option<usize> {
        self.feature_index
            .get(&canonical_feature_key(name))
            .copied()
    }

    /// Insert a metadata column, replacing any existing column with the same
    /// name in place (column order is otherwise insertion order).
    pub fn set_column(&mut self, name: &str, column: MetadataColumn) -> Result<()> {
        if column.len() != self.n_cells() {
            return Err(AnnotationError::Load(format!(
                "metadata column '{}' has {} entries, expected {}",
                name,
                column.len(),
                self.n_cells()
            )));
        }
        match self.metadata.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = column,
            None => self.metadata.push((name.to_string(), column)),
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&MetadataColumn> {
        self.metadata
            .iter()
            .find_map(|(n, c)| if n == name { Some(c) } else { None })
    }

    /// Convenience accessor for a label column.
    pub fn labels(&self, name: &str) -> Result<&[String]> {
        match self.column(name) {
            Some(MetadataColumn::Labels(v)) => Ok(v),
            Some(_) => Err(AnnotationError::Load(format!(
                "metadata column '{}' is not a label column",
                name
            ))),
            None => Err(AnnotationError::Load(format!(
                "metadata column '{}' not found in dataset",
                name
            ))),
        }
    }

    /// Convenience accessor for a probability column.
    pub fn probabilities(&self, name: &str) -> Result<&[Option<f64>]> {
        match self.column(name) {
            Some(MetadataColumn::Probabilities(v)) => Ok(v),
            Some(_) => Err(AnnotationError::Load(format!(
                "metadata column '{}' is not a probability column",
                name
            ))),
            None => Err(AnnotationError::Load(format!(
                "metadata column '{}' not found in dataset",
                name
            ))),
        }
    }

    /// Metadata columns in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &MetadataColumn)> {
        self.metadata.iter().map(|(n, c)| (n.as_str(), c))
    }
}
