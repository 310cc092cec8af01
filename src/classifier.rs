//! Binary classifiers backing the categorizer.
//!
//! Every classifier is trained on a [`SampleMatrix`] and a 0/1 label vector and
//! implements [`Classifier`]. Linear models additionally expose a signed
//! `decision_function`; gradient boosting exposes class probabilities only.

pub mod linear_svc;
pub mod logistic;

#[cfg(feature = "gradient-boosting")]
pub mod gradient_boosting;

use serde::{Deserialize, Serialize};

use crate::error::{DocCatError, Result};
use crate::matrix::{RowView, SampleMatrix};
use crate::partition::check_labels;

pub use linear_svc::{LinearSvc, LinearSvcParams};
pub use logistic::{LogisticRegression, LogisticRegressionParams};

#[cfg(feature = "gradient-boosting")]
pub use gradient_boosting::{GradientBoostingClassifier, GradientBoostingParams};

/// Common interface of the binary classifiers.
pub trait Classifier: Send + Sync {
    /// Backend name as used in stored model parameters.
    fn name(&self) -> &'static str;

    /// Train on rows of `x` labelled 0 or 1.
    fn fit(&mut self, x: &SampleMatrix, y: &[u8]) -> Result<()>;

    /// Predicted label per row.
    fn predict(&self, x: &SampleMatrix) -> Result<Vec<u8>>;

    fn is_fitted(&self) -> bool;

    /// Hyperparameters as a JSON object.
    fn params(&self) -> serde_json::Value;
}

/// Weights and intercept of a fitted linear decision function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub coef: Vec<f64>,
    pub intercept: f64,
}

impl LinearModel {
    pub fn zeros(n_features: usize) -> Self {
        Self {
            coef: vec![0.0; n_features],
            intercept: 0.0,
        }
    }

    pub fn n_features(&self) -> usize {
        self.coef.len()
    }

    /// `w . x + b` for one row.
    pub fn decision(&self, row: &RowView<'_>) -> f64 {
        row.dot_slice(&self.coef) + self.intercept
    }

    /// `w . x + b` for every row, after checking the feature count.
    pub fn decision_function(&self, x: &SampleMatrix) -> Result<Vec<f64>> {
        if x.n_features() != self.n_features() {
            return Err(DocCatError::shape_mismatch(format!(
                "X has {} features, model was fitted with {}",
                x.n_features(),
                self.n_features()
            )));
        }
        Ok(x.row_views().iter().map(|row| self.decision(row)).collect())
    }
}

/// Check a binary training set and return the labels as -1/+1.
pub(crate) fn signed_labels(x: &SampleMatrix, y: &[u8]) -> Result<Vec<f64>> {
    check_labels(y, x.n_samples())?;
    let n_positive = y.iter().filter(|&&l| l == 1).count();
    if n_positive == 0 || n_positive == y.len() {
        return Err(DocCatError::invalid_training_set(
            "training labels must contain both classes",
        ));
    }
    Ok(y.iter()
        .map(|&l| if l == 1 { 1.0 } else { -1.0 })
        .collect())
}

/// Threshold decision values at zero.
pub(crate) fn labels_from_decision(decision: &[f64]) -> Vec<u8> {
    decision.iter().map(|&d| u8::from(d > 0.0)).collect()
}

/// Numerically stable logistic function.
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Numerically stable `ln(1 + exp(-m))`.
pub(crate) fn log_loss(margin: f64) -> f64 {
    if margin > 0.0 {
        (-margin).exp().ln_1p()
    } else {
        -margin + margin.exp().ln_1p()
    }
}
