//! The validated classifier record: one cell type, one trained model, the
//! features it needs, a decision threshold, and an optional parent cell type.
//!
//! Records are validated on construction and on every mutation; a record that
//! exists is always internally consistent. The parent is a loose reference
//! (a cell type name resolved through the registry at traversal time), never
//! an owned link, so records serialize independently and lineage cannot form
//! ownership cycles.

use crate::error::{AnnotationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod model;
pub mod registry;

pub use model::{ClassifierModel, LogisticModel};
pub use registry::ClassifierRegistry;

/// A trained classifier for a single cell type.
///
/// Thresholds above 1.0 are legal and mean the classifier never predicts
/// positive; that is documented behavior, not a validation error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawClassifier")]
pub struct CellTypeClassifier {
    cell_type: String,
    model: ClassifierModel,
    features: Vec<String>,
    probability_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
}

impl CellTypeClassifier {
    /// Construct a record, validating fields in fixed order: cell_type, model,
    /// features, probability_threshold, parent. The first failing field is the
    /// one reported.
    pub fn new(
        cell_type: &str,
        model: ClassifierModel,
        features: Vec<String>,
        probability_threshold: f64,
        parent: Option<&str>,
    ) -> Result<Self> {
        validate_cell_type(cell_type)?;
        validate_model(&model)?;
        validate_features(&features)?;
        validate_threshold(probability_threshold)?;
        validate_parent(parent, cell_type)?;
        Ok(CellTypeClassifier {
            cell_type: cell_type.to_string(),
            model,
            features,
            probability_threshold,
            parent: parent.map(|p| p.to_string()),
        })
    }

    pub fn cell_type(&self) -> &str {
        &self.cell_type
    }

    pub fn model(&self) -> &ClassifierModel {
        &self.model
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn probability_threshold(&self) -> f64 {
        self.probability_threshold
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Rename the cell type. Fails on an empty name or one equal to the
    /// current parent.
    pub fn set_cell_type(&mut self, cell_type: &str) -> Result<()> {
        validate_cell_type(cell_type)?;
        validate_parent(self.parent(), cell_type)?;
        self.cell_type = cell_type.to_string();
        Ok(())
    }

    pub fn set_probability_threshold(&mut self, probability_threshold: f64) -> Result<()> {
        validate_threshold(probability_threshold)?;
        self.probability_threshold = probability_threshold;
        Ok(())
    }

    /// Point the record at a (new) parent cell type. Clearing the parent is
    /// not exposed here; a root record is made by construction.
    pub fn set_parent(&mut self, parent: &str) -> Result<()> {
        validate_parent(Some(parent), &self.cell_type)?;
        self.parent = Some(parent.to_string());
        Ok(())
    }

    /// Replace the trained model. Only permitted on root records: a child's
    /// model must stay consistent with its training lineage, so children are
    /// retrained as fresh records instead of patched in place.
    ///
    /// On success the feature list is recomputed from the new model's term
    /// labels, normalized (marker prefix stripped, separators canonicalized).
    pub fn set_model(&mut self, model: ClassifierModel) -> Result<()> {
        if let Some(parent) = &self.parent {
            return Err(AnnotationError::IllegalOperation(format!(
                "cannot replace the model of '{}': it has parent '{}'; retrain it as a new record",
                self.cell_type, parent
            )));
        }
        validate_model(&model)?;
        self.features = model.normalized_features();
        self.model = model;
        Ok(())
    }

    /// Overwrite the feature list directly.
    ///
    /// This exists for completeness; feature lists are supposed to track the
    /// model, and hand-editing them will usually break prediction arity.
    pub fn set_features(&mut self, features: Vec<String>) -> Result<()> {
        validate_features(&features)?;
        self.features = features;
        Ok(())
    }
}

impl fmt::Display for CellTypeClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cell type: {}", self.cell_type)?;
        writeln!(
            f,
            "Features ({}): {}",
            self.features.len(),
            self.features.join(", ")
        )?;
        writeln!(f, "Probability threshold: {}", self.probability_threshold)?;
        match &self.parent {
            Some(parent) => write!(f, "Parent: {}", parent),
            None => write!(f, "Parent: no parent"),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> AnnotationError {
    AnnotationError::InvalidClassifier {
        field,
        reason: reason.into(),
    }
}

fn validate_cell_type(cell_type: &str) -> Result<()> {
    if cell_type.is_empty() {
        return Err(invalid("cell_type", "must be a non-empty string"));
    }
    Ok(())
}

fn validate_model(model: &ClassifierModel) -> Result<()> {
    model.check().map_err(|reason| invalid("model", reason))
}

fn validate_features(features: &[String]) -> Result<()> {
    if features.is_empty() {
        return Err(invalid("features", "must contain at least one feature"));
    }
    if features.iter().any(|f| f.is_empty()) {
        return Err(invalid("features", "feature names must be non-empty"));
    }
    Ok(())
}

fn validate_threshold(threshold: f64) -> Result<()> {
    if !(threshold > 0.0) {
        return Err(invalid(
            "probability_threshold",
            format!("must be strictly positive, got {}", threshold),
        ));
    }
    Ok(())
}

fn validate_parent(parent: Option<&str>, cell_type: &str) -> Result<()> {
    match parent {
        None => Ok(()),
        Some(p) if p.is_empty() => Err(invalid(
            "parent",
            "must be a non-empty string; omit the field for a root classifier",
        )),
        Some(p) if p == cell_type => Err(invalid("parent", "a classifier cannot be its own parent")),
        Some(_) => Ok(()),
    }
}

/// Unvalidated mirror of [`CellTypeClassifier`] used during deserialization,
/// so a corrupt persisted record can never become an invalid in-memory one.
#[derive(Deserialize)]
struct RawClassifier {
    cell_type: String,
    model: ClassifierModel,
    features: Vec<String>,
    probability_threshold: f64,
    #[serde(default)]
    parent: Option<String>,
}

impl TryFrom<RawClassifier> for CellTypeClassifier {
    type Error = AnnotationError;

    fn try_from(raw: RawClassifier) -> Result<Self> {
        CellTypeClassifier::new(
            &raw.cell_type,
            raw.model,
            raw.features,
            raw.probability_threshold,
            raw.parent.as_deref(),
        )
    }
}
