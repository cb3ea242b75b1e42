//! Error types for classifier construction, registry access, and classification runs.

use thiserror::Error;

/// Errors produced by the classifier object model and the classification engine.
#[derive(Debug, Error)]
pub enum AnnotationError {
    /// A classifier field failed validation at construction or mutation time.
    /// Carries the offending field name and the rule it violated.
    #[error("invalid classifier: field '{field}': {reason}")]
    InvalidClassifier {
        field: &'static str,
        reason: String,
    },

    /// A structurally disallowed mutation, e.g. replacing the model of a
    /// classifier that has a parent.
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    /// A requested cell type has no record in the registry.
    #[error("unknown cell type '{0}'")]
    UnknownCellType(String),

    /// A parent reference could not be resolved, or the parent chain loops.
    /// Indicates a corrupt or inconsistent persisted registry.
    #[error("broken lineage for '{cell_type}': {reason}")]
    BrokenLineage { cell_type: String, reason: String },

    /// A feature required by a classifier is absent from the expression matrix.
    #[error("feature '{feature}' required by classifier '{cell_type}' not found in the expression matrix")]
    FeatureMismatch { feature: String, cell_type: String },

    /// The registry source (or a named assay) is unreadable or contains
    /// invalid entries.
    #[error("load error: {0}")]
    Load(String),

    /// Model fitting failed.
    #[error(transparent)]
    Training(#[from] anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AnnotationError>;
