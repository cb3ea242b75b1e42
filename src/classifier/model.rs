//! The trained-model handle carried by a classifier record.
//!
//! The handle is an enum so records stay serializable as a whole; the engine
//! only relies on the "predict a membership probability per cell" contract.
//!
//! Models store their feature names as sanitized *term labels*: a `g_` marker
//! prefix plus the feature name with separators encoded as `_`. Normalizing a
//! term label strips the prefix and maps `_` back to the canonical `-` form,
//! so a record whose features were recomputed from its model still resolves
//! against the dataset's tolerant feature index.

use crate::error::{AnnotationError, Result};
use anyhow::anyhow;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

const FIT_ITERATIONS: usize = 400;
const FIT_LEARNING_RATE: f64 = 0.5;

/// Encode a feature name into the sanitized term-label form models store.
pub fn encode_term(feature: &str) -> String {
    let body: String = feature
        .chars()
        .map(|c| match c {
            '-' | '.' => '_',
            _ => c,
        })
        .collect();
    format!("g_{}", body)
}

/// Normalize a model term label back into a canonical feature name: the
/// leading `g_` marker is stripped and `_` separators become `-`.
pub fn normalize_term(term: &str) -> String {
    let body = term.strip_prefix("g_").unwrap_or(term);
    body.replace('_', "-")
}

/// A trained model usable by a classifier record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierModel {
    Logistic(LogisticModel),
}

impl ClassifierModel {
    /// Term labels the model was trained on, in training order.
    pub fn term_labels(&self) -> &[String] {
        match self {
            ClassifierModel::Logistic(m) => &m.terms,
        }
    }

    /// Feature names recovered from the model's term labels, normalized.
    pub fn normalized_features(&self) -> Vec<String> {
        self.term_labels().iter().map(|t| normalize_term(t)).collect()
    }

    /// Check internal consistency: at least one term, matching coefficient
    /// arity, finite parameters.
    pub(crate) fn check(&self) -> std::result::Result<(), String> {
        match self {
            ClassifierModel::Logistic(m) => m.check(),
        }
    }

    /// Predict the per-cell membership probability for a dense feature block
    /// (cells × terms, column order matching [`Self::term_labels`]).
    pub fn predict_probability(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            ClassifierModel::Logistic(m) => m.predict_probability(x),
        }
    }
}

/// Logistic regression on standardized features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    /// Sanitized term labels, one per feature column.
    pub terms: Vec<String>,
    /// Per-term standardization parameters captured at fit time.
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    /// Build a model directly from known coefficients on raw (unstandardized)
    /// feature values. Used for hand-specified marker models.
    pub fn from_coefficients(features: &[String], weights: Vec<f64>, intercept: f64) -> Self {
        let n = features.len();
        LogisticModel {
            terms: features.iter().map(|f| encode_term(f)).collect(),
            means: vec![0.0; n],
            stds: vec![1.0; n],
            weights,
            intercept,
        }
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.terms.is_empty() {
            return Err("model has no term labels".to_string());
        }
        if self.terms.iter().any(|t| t.is_empty()) {
            return Err("model has an empty term label".to_string());
        }
        let n = self.terms.len();
        if self.weights.len() != n || self.means.len() != n || self.stds.len() != n {
            return Err(format!(
                "model has {} terms but {} weights, {} means, {} stds",
                n,
                self.weights.len(),
                self.means.len(),
                self.stds.len()
            ));
        }
        let finite = self.weights.iter().chain(&self.means).chain(&self.stds).all(|v| v.is_finite());
        if !finite || !self.intercept.is_finite() {
            return Err("model coefficients must be finite".to_string());
        }
        if self.stds.iter().any(|&s| s <= 0.0) {
            return Err("model stds must be strictly positive".to_string());
        }
        Ok(())
    }

    fn predict_probability(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.terms.len() {
            return Err(AnnotationError::Training(anyhow!(
                "feature block has {} columns, model expects {}",
                x.ncols(),
                self.terms.len()
            )));
        }
        let probabilities = x
            .rows()
            .into_iter()
            .map(|row| {
                let mut z = self.intercept;
                for (j, &value) in row.iter().enumerate() {
                    z += self.weights[j] * (value - self.means[j]) / self.stds[j];
                }
                sigmoid(z)
            })
            .collect::<Vec<f64>>();
        Ok(Array1::from_vec(probabilities))
    }

    /// Fit a logistic regression by gradient descent on standardized features.
    ///
    /// `x` is cells × features, `y` marks positive cells, `features` supplies
    /// the names stored as term labels. Requires at least one positive and one
    /// negative example.
    pub fn fit(x: &Array2<f64>, y: &[bool], features: &[String]) -> anyhow::Result<LogisticModel> {
        let n_cells = x.nrows();
        let n_features = x.ncols();
        if n_cells != y.len() {
            return Err(anyhow!(
                "feature block has {} rows but {} labels were provided",
                n_cells,
                y.len()
            ));
        }
        if n_features != features.len() {
            return Err(anyhow!(
                "feature block has {} columns but {} feature names were provided",
                n_features,
                features.len()
            ));
        }
        if n_features == 0 {
            return Err(anyhow!("cannot fit a model with zero features"));
        }
        let n_positive = y.iter().filter(|&&p| p).count();
        if n_positive == 0 || n_positive == n_cells {
            return Err(anyhow!(
                "training requires both positive and negative cells, got {} positives out of {}",
                n_positive,
                n_cells
            ));
        }

        // Standardize; constant columns keep std 1 so they contribute nothing.
        let mut means = vec![0.0; n_features];
        let mut stds = vec![1.0; n_features];
        for j in 0..n_features {
            let column = x.column(j);
            let mean = column.sum() / n_cells as f64;
            let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n_cells as f64;
            means[j] = mean;
            if variance > 0.0 {
                stds[j] = variance.sqrt();
            }
        }

        let mut weights = vec![0.0; n_features];
        let mut intercept = 0.0;
        let mut standardized = x.clone();
        for j in 0..n_features {
            standardized
                .column_mut(j)
                .mapv_inplace(|v| (v - means[j]) / stds[j]);
        }

        for _ in 0..FIT_ITERATIONS {
            let mut weight_gradients = vec![0.0; n_features];
            let mut intercept_gradient = 0.0;
            for (i, row) in standardized.rows().into_iter().enumerate() {
                let mut z = intercept;
                for (j, &value) in row.iter().enumerate() {
                    z += weights[j] * value;
                }
                let residual = sigmoid(z) - if y[i] { 1.0 } else { 0.0 };
                intercept_gradient += residual;
                for (j, &value) in row.iter().enumerate() {
                    weight_gradients[j] += residual * value;
                }
            }
            let scale = FIT_LEARNING_RATE / n_cells as f64;
            intercept -= scale * intercept_gradient;
            for j in 0..n_features {
                weights[j] -= scale * weight_gradients[j];
            }
        }

        Ok(LogisticModel {
            terms: features.iter().map(|f| encode_term(f)).collect(),
            means,
            stds,
            weights,
            intercept,
        })
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
